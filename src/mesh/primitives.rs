//! Procedural meshes.

use std::collections::HashMap;

use nalgebra::{Point3, Vector3};

use super::TriMesh;
use crate::error::Result;

/// Unit icosphere: a subdivided icosahedron projected onto the unit sphere.
///
/// Faces are counter-clockwise when seen from outside. `subdivisions = 0`
/// gives the icosahedron (12 vertices, 20 faces); each level splits every
/// triangle into four.
///
/// ```
/// use meshfit::mesh::icosphere;
///
/// let sphere = icosphere(1).unwrap();
/// assert_eq!(sphere.nb_vertices(), 42);
/// assert_eq!(sphere.nb_faces(), 80);
/// ```
pub fn icosphere(subdivisions: usize) -> Result<TriMesh> {
    let t = (1.0 + 5.0_f64.sqrt()) / 2.0;
    let mut vertices: Vec<Point3<f64>> = [
        [-1.0, t, 0.0],
        [1.0, t, 0.0],
        [-1.0, -t, 0.0],
        [1.0, -t, 0.0],
        [0.0, -1.0, t],
        [0.0, 1.0, t],
        [0.0, -1.0, -t],
        [0.0, 1.0, -t],
        [t, 0.0, -1.0],
        [t, 0.0, 1.0],
        [-t, 0.0, -1.0],
        [-t, 0.0, 1.0],
    ]
    .iter()
    .map(|p| Point3::from(Vector3::new(p[0], p[1], p[2]).normalize()))
    .collect();

    let mut faces: Vec<[usize; 3]> = vec![
        [0, 11, 5],
        [0, 5, 1],
        [0, 1, 7],
        [0, 7, 10],
        [0, 10, 11],
        [1, 5, 9],
        [5, 11, 4],
        [11, 10, 2],
        [10, 7, 6],
        [7, 1, 8],
        [3, 9, 4],
        [3, 4, 2],
        [3, 2, 6],
        [3, 6, 8],
        [3, 8, 9],
        [4, 9, 5],
        [2, 4, 11],
        [6, 2, 10],
        [8, 6, 7],
        [9, 8, 1],
    ];

    for _ in 0..subdivisions {
        let mut midpoints: HashMap<(usize, usize), usize> = HashMap::new();
        let mut next = Vec::with_capacity(faces.len() * 4);
        for &[a, b, c] in &faces {
            let ab = midpoint(&mut vertices, &mut midpoints, a, b);
            let bc = midpoint(&mut vertices, &mut midpoints, b, c);
            let ca = midpoint(&mut vertices, &mut midpoints, c, a);
            next.push([a, ab, ca]);
            next.push([b, bc, ab]);
            next.push([c, ca, bc]);
            next.push([ab, bc, ca]);
        }
        faces = next;
    }

    TriMesh::new(faces, vertices)
}

fn midpoint(
    vertices: &mut Vec<Point3<f64>>,
    cache: &mut HashMap<(usize, usize), usize>,
    a: usize,
    b: usize,
) -> usize {
    let key = (a.min(b), a.max(b));
    if let Some(&index) = cache.get(&key) {
        return index;
    }
    let mid = (vertices[a].coords + vertices[b].coords).normalize();
    vertices.push(Point3::from(mid));
    let index = vertices.len() - 1;
    cache.insert(key, index);
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::vertex_normals;

    #[test]
    fn test_icosphere_counts() {
        let ico = icosphere(0).unwrap();
        assert_eq!(ico.nb_vertices(), 12);
        assert_eq!(ico.nb_faces(), 20);
        assert!(ico.topology().is_closed());

        let sphere = icosphere(2).unwrap();
        assert_eq!(sphere.nb_vertices(), 162);
        assert_eq!(sphere.nb_faces(), 320);
        assert!(sphere.topology().is_closed());
    }

    #[test]
    fn test_icosphere_on_unit_sphere_and_outward() {
        let sphere = icosphere(1).unwrap();
        let normals = vertex_normals(sphere.vertices(), sphere.faces());
        for (p, n) in sphere.vertices().iter().zip(&normals.normals) {
            assert!((p.coords.norm() - 1.0).abs() < 1e-12);
            // Outward orientation: normal points away from the center
            assert!(n.dot(&p.coords) > 0.9);
        }
    }
}

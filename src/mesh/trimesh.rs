//! Indexed triangle mesh with fixed topology.

use nalgebra::{Point3, Vector3};

use super::topology::Topology;
use crate::error::{FitError, Result};

/// A triangle mesh: vertex positions, a face list and optional per-vertex colors.
///
/// Faces are validated once at construction and never change afterwards;
/// vertex positions and colors are replaced wholesale through
/// [`TriMesh::set_vertices`] and [`TriMesh::set_vertices_colors`], which is
/// how the fitters feed each iteration's transformed geometry to the renderer.
///
/// # Example
///
/// ```
/// use meshfit::mesh::TriMesh;
/// use nalgebra::Point3;
///
/// let vertices = vec![
///     Point3::new(0.0, 0.0, 0.0),
///     Point3::new(1.0, 0.0, 0.0),
///     Point3::new(0.5, 1.0, 0.0),
/// ];
/// let mesh = TriMesh::new(vec![[0, 1, 2]], vertices).unwrap();
/// assert_eq!(mesh.nb_vertices(), 3);
/// assert_eq!(mesh.nb_faces(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct TriMesh {
    faces: Vec<[usize; 3]>,
    vertices: Vec<Point3<f64>>,
    colors: Option<Vec<Vector3<f64>>>,
    topology: Topology,
}

impl TriMesh {
    /// Build a mesh from faces and vertex positions.
    ///
    /// # Errors
    ///
    /// - [`FitError::EmptyMesh`] if there are no faces
    /// - [`FitError::InvalidVertexIndex`] if a face points past the vertex list
    /// - [`FitError::DegenerateFace`] if a face repeats a vertex
    pub fn new(faces: Vec<[usize; 3]>, vertices: Vec<Point3<f64>>) -> Result<Self> {
        validate_faces(&faces, vertices.len())?;
        let topology = Topology::build(&faces, vertices.len());
        Ok(Self {
            faces,
            vertices,
            colors: None,
            topology,
        })
    }

    /// Build a mesh from faces and vertex positions, with per-vertex colors.
    pub fn with_colors(
        faces: Vec<[usize; 3]>,
        vertices: Vec<Point3<f64>>,
        colors: Vec<Vector3<f64>>,
    ) -> Result<Self> {
        let mut mesh = Self::new(faces, vertices)?;
        mesh.set_vertices_colors(colors)?;
        Ok(mesh)
    }

    /// Number of vertices.
    #[inline]
    pub fn nb_vertices(&self) -> usize {
        self.vertices.len()
    }

    /// Number of triangles.
    #[inline]
    pub fn nb_faces(&self) -> usize {
        self.faces.len()
    }

    /// Triangle list.
    #[inline]
    pub fn faces(&self) -> &[[usize; 3]] {
        &self.faces
    }

    /// Current vertex positions.
    #[inline]
    pub fn vertices(&self) -> &[Point3<f64>] {
        &self.vertices
    }

    /// Per-vertex colors, if any were set.
    #[inline]
    pub fn colors(&self) -> Option<&[Vector3<f64>]> {
        self.colors.as_deref()
    }

    /// Edge and neighbor tables derived from the faces.
    #[inline]
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Replace all vertex positions. The count must not change.
    pub fn set_vertices(&mut self, vertices: Vec<Point3<f64>>) -> Result<()> {
        if vertices.len() != self.vertices.len() {
            return Err(FitError::invalid_param(
                "vertices.len()",
                vertices.len(),
                "must match the mesh vertex count",
            ));
        }
        self.vertices = vertices;
        Ok(())
    }

    /// Replace all per-vertex colors. One color per vertex.
    pub fn set_vertices_colors(&mut self, colors: Vec<Vector3<f64>>) -> Result<()> {
        if colors.len() != self.vertices.len() {
            return Err(FitError::invalid_param(
                "colors.len()",
                colors.len(),
                "must match the mesh vertex count",
            ));
        }
        self.colors = Some(colors);
        Ok(())
    }

    /// Mean of the vertex positions.
    pub fn centroid(&self) -> Point3<f64> {
        centroid(&self.vertices)
    }
}

/// Mean of a point set (origin for an empty set).
pub fn centroid(points: &[Point3<f64>]) -> Point3<f64> {
    if points.is_empty() {
        return Point3::origin();
    }
    let sum: Vector3<f64> = points.iter().map(|p| p.coords).sum();
    Point3::from(sum / points.len() as f64)
}

/// Largest per-axis standard deviation of a point set.
///
/// Used as the object "radius" when placing the fitting camera.
pub fn object_radius(points: &[Point3<f64>]) -> f64 {
    if points.is_empty() {
        return 0.0;
    }
    let mean = centroid(points);
    let n = points.len() as f64;
    let var = points
        .iter()
        .map(|p| (p - mean).component_mul(&(p - mean)))
        .sum::<Vector3<f64>>()
        / n;
    var.x.sqrt().max(var.y.sqrt()).max(var.z.sqrt())
}

fn validate_faces(faces: &[[usize; 3]], nb_vertices: usize) -> Result<()> {
    if faces.is_empty() {
        return Err(FitError::EmptyMesh);
    }
    for (fi, face) in faces.iter().enumerate() {
        for &vi in face {
            if vi >= nb_vertices {
                return Err(FitError::InvalidVertexIndex { face: fi, vertex: vi });
            }
        }
        if face[0] == face[1] || face[1] == face[2] || face[0] == face[2] {
            return Err(FitError::DegenerateFace { face: fi });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle() -> Vec<Point3<f64>> {
        vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.5, 1.0, 0.0),
        ]
    }

    #[test]
    fn test_rejects_empty() {
        assert!(matches!(
            TriMesh::new(vec![], triangle()),
            Err(FitError::EmptyMesh)
        ));
    }

    #[test]
    fn test_rejects_bad_index() {
        let result = TriMesh::new(vec![[0, 1, 3]], triangle());
        assert!(matches!(
            result,
            Err(FitError::InvalidVertexIndex { face: 0, vertex: 3 })
        ));
    }

    #[test]
    fn test_rejects_degenerate() {
        let result = TriMesh::new(vec![[0, 1, 1]], triangle());
        assert!(matches!(result, Err(FitError::DegenerateFace { face: 0 })));
    }

    #[test]
    fn test_set_vertices_checks_count() {
        let mut mesh = TriMesh::new(vec![[0, 1, 2]], triangle()).unwrap();
        assert!(mesh.set_vertices(vec![Point3::origin(); 2]).is_err());
        assert!(mesh.set_vertices(vec![Point3::origin(); 3]).is_ok());
        assert!(mesh.set_vertices_colors(vec![Vector3::zeros(); 4]).is_err());
        assert!(mesh.colors().is_none());
        mesh.set_vertices_colors(vec![Vector3::new(1.0, 0.0, 0.0); 3])
            .unwrap();
        assert_eq!(mesh.colors().unwrap().len(), 3);
    }

    #[test]
    fn test_centroid_and_radius() {
        let points = vec![
            Point3::new(-1.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, -2.0, 0.0),
            Point3::new(0.0, 2.0, 0.0),
        ];
        assert!((centroid(&points) - Point3::origin()).norm() < 1e-12);
        // std along y: sqrt((4 + 4) / 4) = sqrt(2)
        assert!((object_radius(&points) - 2.0_f64.sqrt()).abs() < 1e-12);
    }
}

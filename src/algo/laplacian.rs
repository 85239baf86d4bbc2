//! Discrete Laplacian operators.
//!
//! The uniform (umbrella) Laplacian maps each vertex to its offset from the
//! centroid of its one-ring:
//!
//! ```text
//! (L v)_i = v_i - (1 / deg(i)) * sum_{j in N(i)} v_j
//! ```
//!
//! which is a discrete proxy for the mean curvature normal. Rows sum to zero,
//! so translating every vertex by the same vector leaves `L v` unchanged.

use nalgebra::{DVector, Point3, Vector3};

use super::sparse::CsrMatrix;
use crate::error::Result;
use crate::mesh::Topology;

/// Build the `n x n` uniform Laplacian `I - D^-1 A`.
///
/// Vertices that belong to no face get an all-zero row.
pub fn uniform_laplacian(topology: &Topology) -> CsrMatrix {
    let n = topology.nb_vertices();
    let mut triplets = Vec::new();
    for i in 0..n {
        let neighbors = topology.neighbors(i);
        if neighbors.is_empty() {
            continue;
        }
        let w = 1.0 / neighbors.len() as f64;
        triplets.push((i, i, 1.0));
        for &j in neighbors {
            triplets.push((i, j, -w));
        }
    }
    CsrMatrix::from_triplets(n, n, triplets)
}

/// Apply an `n x n` operator to each coordinate of a point set.
pub fn apply_to_points(op: &CsrMatrix, points: &[Point3<f64>]) -> Result<Vec<Vector3<f64>>> {
    let columns = split_coordinates(points.iter().map(|p| p.coords));
    let mut out = vec![Vector3::zeros(); points.len()];
    for (k, column) in columns.iter().enumerate() {
        let y = op.mul_vec(column)?;
        for (o, v) in out.iter_mut().zip(y.iter()) {
            o[k] = *v;
        }
    }
    Ok(out)
}

/// Split a sequence of 3-vectors into its x, y and z columns.
pub(crate) fn split_coordinates<I>(vectors: I) -> [DVector<f64>; 3]
where
    I: ExactSizeIterator<Item = Vector3<f64>>,
{
    let n = vectors.len();
    let mut columns = [DVector::zeros(n), DVector::zeros(n), DVector::zeros(n)];
    for (i, v) in vectors.enumerate() {
        for k in 0..3 {
            columns[k][i] = v[k];
        }
    }
    columns
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::TriMesh;

    fn tetrahedron() -> TriMesh {
        let vertices = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.5, 1.0, 0.0),
            Point3::new(0.5, 0.5, 1.0),
        ];
        let faces = vec![[0, 2, 1], [0, 1, 3], [1, 2, 3], [2, 0, 3]];
        TriMesh::new(faces, vertices).unwrap()
    }

    #[test]
    fn test_rows_sum_to_zero() {
        let mesh = tetrahedron();
        let l = uniform_laplacian(mesh.topology());
        for i in 0..4 {
            let sum: f64 = l.row(i).map(|(_, v)| v).sum();
            assert!(sum.abs() < 1e-12);
            assert_eq!(l.get(i, i), 1.0);
        }
    }

    #[test]
    fn test_umbrella_offset() {
        let mesh = tetrahedron();
        let l = uniform_laplacian(mesh.topology());
        let lv = apply_to_points(&l, mesh.vertices()).unwrap();
        // Vertex 3 minus centroid of vertices 0, 1, 2
        let expected = Vector3::new(0.5, 0.5, 1.0) - Vector3::new(0.5, 1.0 / 3.0, 0.0);
        assert!((lv[3] - expected).norm() < 1e-12);
    }

    #[test]
    fn test_translation_invariance() {
        let mesh = tetrahedron();
        let l = uniform_laplacian(mesh.topology());
        let shifted: Vec<Point3<f64>> = mesh
            .vertices()
            .iter()
            .map(|p| p + Vector3::new(3.0, -2.0, 7.5))
            .collect();
        let a = apply_to_points(&l, mesh.vertices()).unwrap();
        let b = apply_to_points(&l, &shifted).unwrap();
        for (x, y) in a.iter().zip(&b) {
            assert!((x - y).norm() < 1e-12);
        }
    }
}

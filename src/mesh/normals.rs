//! Vertex normals and their adjoint.
//!
//! A vertex normal is the normalized sum of the (area-weighted, i.e.
//! unnormalized) normals of its incident faces. The adjoint maps a gradient on
//! the normals back onto the vertex positions, which is how shading gradients
//! reach the geometry.

use nalgebra::{Point3, Vector3};

/// Vertex normals together with the unnormalized sums they came from.
#[derive(Debug, Clone)]
pub struct VertexNormals {
    /// Unit normals (zero where the sum vanished).
    pub normals: Vec<Vector3<f64>>,
    /// Per-vertex sums of face normals, kept for the adjoint.
    pub sums: Vec<Vector3<f64>>,
}

/// Compute area-weighted vertex normals.
pub fn vertex_normals(vertices: &[Point3<f64>], faces: &[[usize; 3]]) -> VertexNormals {
    let mut sums = vec![Vector3::zeros(); vertices.len()];
    for face in faces {
        let [a, b, c] = *face;
        let n = (vertices[b] - vertices[a]).cross(&(vertices[c] - vertices[a]));
        sums[a] += n;
        sums[b] += n;
        sums[c] += n;
    }
    let normals = sums
        .iter()
        .map(|s| {
            let len = s.norm();
            if len > 0.0 {
                s / len
            } else {
                Vector3::zeros()
            }
        })
        .collect();
    VertexNormals { normals, sums }
}

/// Pull a gradient on the vertex normals back onto the vertex positions.
///
/// `grad_normals[i]` is `dE/dn_i`. Returns `dE/dv_i`.
pub fn vertex_normals_backward(
    vertices: &[Point3<f64>],
    faces: &[[usize; 3]],
    normals: &VertexNormals,
    grad_normals: &[Vector3<f64>],
) -> Vec<Vector3<f64>> {
    // Through n = s / |s|: ds = (g - n (n.g)) / |s|
    let grad_sums: Vec<Vector3<f64>> = normals
        .sums
        .iter()
        .zip(&normals.normals)
        .zip(grad_normals)
        .map(|((s, n), g)| {
            let len = s.norm();
            if len > 0.0 {
                (g - n * n.dot(g)) / len
            } else {
                Vector3::zeros()
            }
        })
        .collect();

    let mut grad = vec![Vector3::zeros(); vertices.len()];
    for face in faces {
        let [a, b, c] = *face;
        let g = grad_sums[a] + grad_sums[b] + grad_sums[c];
        let e1 = vertices[b] - vertices[a];
        let e2 = vertices[c] - vertices[a];
        let g_e1 = e2.cross(&g);
        let g_e2 = g.cross(&e1);
        grad[b] += g_e1;
        grad[c] += g_e2;
        grad[a] -= g_e1 + g_e2;
    }
    grad
}

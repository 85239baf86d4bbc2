//! Laplacian rigidity energy.
//!
//! Penalizes deviation of the mesh Laplacian from that of a reference shape:
//!
//! ```text
//! E(v)  = 0.5 * cregu * || L (v - v_ref) ||^2
//! dE/dv = cregu * L^T L (v - v_ref)
//! H     = cregu * (L^T L) (x) I_3
//! ```
//!
//! `L` is the uniform Laplacian of the (fixed) mesh topology, so it is built
//! once. The energy is a plain function of raw coordinates: callers that want
//! invariance to rigid motions must center/normalize before calling. Because
//! the rows of `L` sum to zero, a pure translation of all vertices costs
//! nothing.
//!
//! # Example
//!
//! ```
//! use meshfit::algo::rigidity::LaplacianRigidEnergy;
//! use meshfit::mesh::icosphere;
//!
//! let sphere = icosphere(1).unwrap();
//! let energy = LaplacianRigidEnergy::new(&sphere, sphere.vertices(), 2000.0).unwrap();
//! let eval = energy.eval(sphere.vertices()).unwrap();
//! assert_eq!(eval.energy, 0.0);
//! ```

use nalgebra::{DVector, Point3, Vector3};

use super::laplacian::{split_coordinates, uniform_laplacian};
use super::sparse::{conjugate_gradient, CsrMatrix};
use crate::error::{FitError, Result};
use crate::mesh::TriMesh;

/// Quadratic Laplacian-deviation energy with respect to a reference shape.
#[derive(Debug, Clone)]
pub struct LaplacianRigidEnergy {
    laplacian: CsrMatrix,
    reference: Vec<Point3<f64>>,
    cregu: f64,
    hessian: RigidityHessian,
}

/// Result of [`LaplacianRigidEnergy::eval`].
#[derive(Debug, Clone)]
pub struct RigidityEvaluation<'a> {
    /// Energy value, always `>= 0`.
    pub energy: f64,
    /// Gradient with respect to each vertex.
    pub gradient: Vec<Vector3<f64>>,
    /// Constant Hessian of the energy.
    pub hessian: &'a RigidityHessian,
}

/// Hessian of the rigidity energy, `cregu * (L^T L) (x) I_3`.
///
/// Acts on vertex arrays flattened as `[x0, y0, z0, x1, ...]`. The fitters do
/// not take second-order steps; the handle is there for callers that want to
/// precondition or solve with it.
#[derive(Debug, Clone)]
pub struct RigidityHessian {
    matrix: CsrMatrix,
}

impl RigidityHessian {
    /// The underlying `3n x 3n` sparse matrix.
    pub fn matrix(&self) -> &CsrMatrix {
        &self.matrix
    }

    /// Multiply a per-vertex displacement field by the Hessian.
    pub fn apply(&self, x: &[Vector3<f64>]) -> Result<Vec<Vector3<f64>>> {
        let y = self.matrix.mul_vec(&flatten(x))?;
        Ok(unflatten(&y))
    }

    /// Solve `(H + shift * I) x = b` with conjugate gradients.
    ///
    /// `H` alone is singular (translations are in its kernel), so a positive
    /// `shift` is usually needed.
    pub fn solve(
        &self,
        b: &[Vector3<f64>],
        shift: f64,
        max_iter: usize,
        tolerance: f64,
    ) -> Result<Vec<Vector3<f64>>> {
        let n = self.matrix.nrows();
        let shifted = if shift != 0.0 {
            let mut triplets: Vec<(usize, usize, f64)> = Vec::with_capacity(self.matrix.nnz() + n);
            for r in 0..n {
                triplets.extend(self.matrix.row(r).map(|(c, v)| (r, c, v)));
                triplets.push((r, r, shift));
            }
            CsrMatrix::from_triplets(n, n, triplets)
        } else {
            self.matrix.clone()
        };
        let x = conjugate_gradient(&shifted, &flatten(b), None, max_iter, tolerance)?;
        Ok(unflatten(&x))
    }
}

impl LaplacianRigidEnergy {
    /// Build the energy for `mesh` around `reference` with weight `cregu`.
    ///
    /// # Errors
    ///
    /// Returns [`FitError::InvalidParameter`] if `reference` does not have one
    /// point per mesh vertex or if `cregu` is negative or not finite.
    pub fn new(mesh: &TriMesh, reference: &[Point3<f64>], cregu: f64) -> Result<Self> {
        if reference.len() != mesh.nb_vertices() {
            return Err(FitError::invalid_param(
                "reference.len()",
                reference.len(),
                "must match the mesh vertex count",
            ));
        }
        if !cregu.is_finite() || cregu < 0.0 {
            return Err(FitError::invalid_param(
                "cregu",
                cregu,
                "must be finite and non-negative",
            ));
        }

        let laplacian = uniform_laplacian(mesh.topology());
        let hessian = RigidityHessian {
            matrix: laplacian.gram().kron_identity(3).scaled(cregu),
        };

        Ok(Self {
            laplacian,
            reference: reference.to_vec(),
            cregu,
            hessian,
        })
    }

    /// Regularization weight.
    #[inline]
    pub fn cregu(&self) -> f64 {
        self.cregu
    }

    /// Reference vertex positions.
    #[inline]
    pub fn reference(&self) -> &[Point3<f64>] {
        &self.reference
    }

    /// The Laplacian operator.
    #[inline]
    pub fn laplacian(&self) -> &CsrMatrix {
        &self.laplacian
    }

    /// Evaluate energy, gradient and Hessian at `vertices`.
    pub fn eval(&self, vertices: &[Point3<f64>]) -> Result<RigidityEvaluation<'_>> {
        if vertices.len() != self.reference.len() {
            return Err(FitError::invalid_param(
                "vertices.len()",
                vertices.len(),
                "must match the reference vertex count",
            ));
        }

        let diff = split_coordinates(
            vertices
                .iter()
                .zip(&self.reference)
                .map(|(v, r)| v - r),
        );

        let mut energy = 0.0;
        let mut gradient = vec![Vector3::zeros(); vertices.len()];
        for (k, column) in diff.iter().enumerate() {
            let l_diff = self.laplacian.mul_vec(column)?;
            energy += l_diff.norm_squared();
            let g = self.laplacian.mul_vec_transpose(&l_diff)?;
            for (out, value) in gradient.iter_mut().zip(g.iter()) {
                out[k] = self.cregu * value;
            }
        }

        Ok(RigidityEvaluation {
            energy: 0.5 * self.cregu * energy,
            gradient,
            hessian: &self.hessian,
        })
    }
}

fn flatten(x: &[Vector3<f64>]) -> DVector<f64> {
    DVector::from_iterator(x.len() * 3, x.iter().flat_map(|v| [v.x, v.y, v.z]))
}

fn unflatten(x: &DVector<f64>) -> Vec<Vector3<f64>> {
    x.as_slice()
        .chunks_exact(3)
        .map(|c| Vector3::new(c[0], c[1], c[2]))
        .collect()
}

//! Numerical building blocks of the fitting pipeline.
//!
//! - **Sparse**: CSR matrices and a conjugate gradient solver
//! - **Laplacian**: the uniform (umbrella) Laplacian of a mesh
//! - **Rigidity**: the Laplacian-deviation regularization energy
//! - **Progress**: per-iteration callbacks for long runs

pub mod laplacian;
pub mod progress;
pub mod rigidity;
pub mod sparse;

pub use progress::Progress;
pub use rigidity::{LaplacianRigidEnergy, RigidityEvaluation, RigidityHessian};

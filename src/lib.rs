//! # meshfit
//!
//! Analysis-by-synthesis fitting of triangle meshes to depth maps and RGB
//! images.
//!
//! A fitter repeatedly renders a mesh, measures the squared difference to a
//! target image, and moves the vertices, the rigid pose and (for color
//! images) a global color and the lights along the energy gradient. A
//! Laplacian rigidity term keeps the deformed mesh close to its initial
//! shape.
//!
//! ## Features
//!
//! - **Differentiable software renderer**: z-buffered rasterization with
//!   antialiased silhouettes and closed-form adjoints
//! - **Rigidity energy**: uniform-Laplacian deviation with a sparse Hessian
//! - **Damped-inertia optimizer**: per-group step scaling and clamping
//! - **Parallel execution**: rayon for per-vertex work, switchable per fitter
//!
//! ## Quick Start
//!
//! ```
//! use meshfit::prelude::*;
//! use nalgebra::Vector3;
//!
//! let sphere = icosphere(2).unwrap();
//! let mut fitter = MeshDepthFitter::new(
//!     sphere.vertices().to_vec(),
//!     sphere.faces().to_vec(),
//!     Vector3::zeros(),
//!     Vector3::new(0.05, 0.0, 0.0),
//!     FitterConfig::for_depth(),
//! )
//! .unwrap();
//! fitter.set_max_depth(10.0).unwrap();
//!
//! // Use the unperturbed sphere's depth as target
//! fitter.set_mesh_transform_init(Vector3::zeros(), Vector3::zeros());
//! fitter.reset();
//! fitter.set_image(&Image::zeros(48, 48, 1), None, None).unwrap();
//! let target = fitter.preview().unwrap();
//! fitter.set_image(&target, None, None).unwrap();
//!
//! // Start from the shifted pose and iterate
//! fitter.set_mesh_transform_init(Vector3::zeros(), Vector3::new(0.05, 0.0, 0.0));
//! fitter.reset();
//! let results = fitter.run(5, &Progress::none()).unwrap();
//! assert!(results.iter().all(|r| r.energy.is_finite()));
//! ```
//!
//! Logging goes through the [`log`] facade; install any logger to see the
//! per-step energy breakdown at `debug` level.

#![warn(clippy::all)]

pub mod algo;
pub mod error;
pub mod fit;
pub mod image;
pub mod mesh;
pub mod render;

pub use error::{FitError, Result};

/// Prelude module for convenient imports.
///
/// This module re-exports the most commonly used types and functions:
///
/// ```
/// use meshfit::prelude::*;
/// ```
pub mod prelude {
    pub use crate::algo::{LaplacianRigidEnergy, Progress};
    pub use crate::error::{FitError, Result};
    pub use crate::fit::{Fitter, FitterConfig, MeshDepthFitter, MeshRgbFitter, StepPolicy, StepResult};
    pub use crate::image::Image;
    pub use crate::mesh::{icosphere, TriMesh};
    pub use crate::render::{Camera, DifferentiableRenderer, LightConfig, Scene3D};
}

// Re-export nalgebra types for convenience
pub use nalgebra;

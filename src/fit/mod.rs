//! Analysis-by-synthesis fitting.
//!
//! A fitter owns a mesh, its free parameters and their speeds. Each
//! [`Fitter::step`] renders the current state, compares it to the target
//! image, pulls the squared-error gradient back through the renderer and the
//! pose, adds the rigidity gradient, and moves every parameter group by a
//! damped-inertia update.
//!
//! - [`MeshDepthFitter`]: vertices and rigid pose against a depth map
//! - [`MeshRgbFitter`]: vertices, rigid pose, global color and lights against
//!   an RGB image
//!
//! Convergence is left to the caller: [`Fitter::run`] simply repeats
//! [`Fitter::step`] and reports each energy.

mod config;
mod depth;
pub mod pose;
mod rgb;
mod state;
mod step;
mod target;
pub mod update;

pub use config::{FitterConfig, StepPolicies};
pub use depth::MeshDepthFitter;
pub use rgb::MeshRgbFitter;
pub use state::{Appearance, FitState, Speeds};
pub use step::{Fitter, StepResult};
pub use update::{DampedInertia, StepPolicy};

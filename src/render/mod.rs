//! Differentiable rendering.
//!
//! The fitters only see the [`DifferentiableRenderer`] trait: a forward pass
//! that produces an [`Image`] together with an opaque tape, and a reverse pass
//! that turns a gradient on that image into gradients on the mesh geometry,
//! per-vertex colors and lights. [`Scene3D`] is the software implementation
//! shipped with the crate.
//!
//! - [`Camera`]: pinhole projection with optional lens distortion
//! - [`LightConfig`]: directional plus ambient lighting
//! - [`Background`]: constant value or full image behind the mesh

pub mod camera;
pub mod light;
mod raster;
mod scene;

pub use camera::{Camera, Distortion, Projection};
pub use light::{Ambient, Background, LightConfig};
pub use raster::Fragments;
pub use scene::{Scene3D, SceneTape};

use nalgebra::Vector3;

use crate::error::Result;
use crate::image::Image;
use crate::mesh::TriMesh;

/// Output of a forward render.
#[derive(Debug, Clone)]
pub struct Rendering<T> {
    /// `height x width x channels` image.
    pub image: Image,
    /// State recorded for the reverse pass.
    pub tape: T,
}

/// Gradients of a scalar loss with respect to the renderer inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderGradients {
    /// Per vertex, in world coordinates.
    pub vertices: Vec<Vector3<f64>>,
    /// Per vertex color; `None` for depth renders.
    pub colors: Option<Vec<Vector3<f64>>>,
    /// Directional light vector.
    pub directional: Vector3<f64>,
    /// Ambient light, shaped like the scene's ambient term.
    pub ambient: Ambient,
}

/// A renderer whose output can be differentiated with respect to its inputs.
pub trait DifferentiableRenderer {
    /// What the forward pass records for [`DifferentiableRenderer::backward`].
    type Tape;

    /// Replace what is shown where the mesh does not cover a pixel.
    fn set_background(&mut self, background: Background);

    fn set_light(&mut self, light: LightConfig);

    fn light(&self) -> &LightConfig;

    /// Background value of depth renders, if configured.
    fn max_depth(&self) -> Option<f64>;

    fn set_max_depth(&mut self, max_depth: f64);

    /// Render the shaded per-vertex colors of `mesh` as a 3-channel image at
    /// the camera resolution.
    ///
    /// # Errors
    ///
    /// [`crate::FitError::Precondition`] if the mesh has no colors,
    /// [`crate::FitError::Configuration`] if the background does not fit.
    fn render(&self, camera: &Camera, mesh: &TriMesh) -> Result<Rendering<Self::Tape>>;

    /// Render camera-frame depth times `depth_scale` as a 1-channel image.
    /// Uncovered pixels hold the max depth.
    ///
    /// # Errors
    ///
    /// [`crate::FitError::Precondition`] if no max depth is set,
    /// [`crate::FitError::Configuration`] if `resolution` differs from the
    /// camera's.
    fn render_depth(
        &self,
        camera: &Camera,
        mesh: &TriMesh,
        resolution: (usize, usize),
        depth_scale: f64,
    ) -> Result<Rendering<Self::Tape>>;

    /// Reverse pass: `image_grad` is `dE/d(image)` for the rendered image.
    fn backward(&self, rendering: &Rendering<Self::Tape>, image_grad: &Image) -> Result<RenderGradients>;
}

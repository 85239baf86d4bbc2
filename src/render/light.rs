//! Lighting and background configuration.

use nalgebra::Vector3;

use crate::image::Image;

/// Ambient light: one intensity for all channels, or one per channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Ambient {
    /// Same intensity on every channel.
    Scalar(f64),
    /// Per-channel intensity.
    Rgb(Vector3<f64>),
}

impl Ambient {
    /// Intensity on each of the three channels.
    #[inline]
    pub fn per_channel(&self) -> Vector3<f64> {
        match self {
            Ambient::Scalar(a) => Vector3::repeat(*a),
            Ambient::Rgb(v) => *v,
        }
    }

    /// Zero of the same shape.
    pub fn zeros_like(&self) -> Self {
        match self {
            Ambient::Scalar(_) => Ambient::Scalar(0.0),
            Ambient::Rgb(_) => Ambient::Rgb(Vector3::zeros()),
        }
    }

    /// Fold a per-channel gradient into this shape (channels are summed for
    /// a scalar ambient).
    pub fn gradient_from_channels(&self, grad: &Vector3<f64>) -> Self {
        match self {
            Ambient::Scalar(_) => Ambient::Scalar(grad.sum()),
            Ambient::Rgb(_) => Ambient::Rgb(*grad),
        }
    }

    /// The free parameters as a flat slice.
    pub fn as_slice(&self) -> &[f64] {
        match self {
            Ambient::Scalar(a) => std::slice::from_ref(a),
            Ambient::Rgb(v) => v.as_slice(),
        }
    }

    /// The free parameters as a mutable flat slice.
    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        match self {
            Ambient::Scalar(a) => std::slice::from_mut(a),
            Ambient::Rgb(v) => v.as_mut_slice(),
        }
    }
}

impl Default for Ambient {
    fn default() -> Self {
        Ambient::Scalar(0.0)
    }
}

/// Directional plus ambient lighting.
///
/// A vertex with unit normal `n` receives `max(0, -n . directional) + ambient`
/// on each channel; its color is multiplied by that luminosity. The
/// directional vector points from the light into the scene and its length
/// scales the intensity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightConfig {
    /// Direction (and intensity) of the directional light.
    pub directional: Vector3<f64>,
    /// Ambient term.
    pub ambient: Ambient,
}

impl LightConfig {
    /// Directional light with a scalar ambient term.
    pub fn new(directional: Vector3<f64>, ambient: f64) -> Self {
        Self {
            directional,
            ambient: Ambient::Scalar(ambient),
        }
    }

    /// Directional light with a per-channel ambient term.
    pub fn with_rgb_ambient(directional: Vector3<f64>, ambient: Vector3<f64>) -> Self {
        Self {
            directional,
            ambient: Ambient::Rgb(ambient),
        }
    }
}

impl Default for LightConfig {
    /// Pure ambient light of intensity one.
    fn default() -> Self {
        Self::new(Vector3::zeros(), 1.0)
    }
}

/// What the renderer shows where no surface is hit.
#[derive(Debug, Clone, PartialEq)]
pub enum Background {
    /// The same value on every pixel, one entry per channel.
    Constant(Vec<f64>),
    /// A full image matching the render resolution.
    Image(Image),
}

impl Default for Background {
    fn default() -> Self {
        Background::Constant(vec![0.0, 0.0, 0.0])
    }
}

//! In-memory images.
//!
//! [`Image`] is a dense `height x width x channels` buffer of `f64` stored in
//! row-major, channel-interleaved order. Depth maps are single-channel images,
//! color images have three channels.

use nalgebra::DMatrix;

use crate::error::{FitError, Result};

/// A dense multi-channel image.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    width: usize,
    height: usize,
    channels: usize,
    data: Vec<f64>,
}

impl Image {
    /// Wrap an existing buffer. `data.len()` must equal `width * height * channels`.
    pub fn new(width: usize, height: usize, channels: usize, data: Vec<f64>) -> Result<Self> {
        if channels == 0 {
            return Err(FitError::invalid_param("channels", channels, "must be positive"));
        }
        let expected = width * height * channels;
        if data.len() != expected {
            return Err(FitError::invalid_param(
                "data.len()",
                data.len(),
                "must equal width * height * channels",
            ));
        }
        Ok(Self {
            width,
            height,
            channels,
            data,
        })
    }

    /// Image with every sample set to `value`.
    pub fn filled(width: usize, height: usize, channels: usize, value: f64) -> Self {
        Self {
            width,
            height,
            channels,
            data: vec![value; width * height * channels],
        }
    }

    /// Zero image.
    pub fn zeros(width: usize, height: usize, channels: usize) -> Self {
        Self::filled(width, height, channels, 0.0)
    }

    /// Single-channel image from a `height x width` matrix.
    pub fn from_depth(depth: &DMatrix<f64>) -> Self {
        let height = depth.nrows();
        let width = depth.ncols();
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                data.push(depth[(y, x)]);
            }
        }
        Self {
            width,
            height,
            channels: 1,
            data,
        }
    }

    /// Image with every pixel set to `color`, one channel per entry.
    pub fn tiled(width: usize, height: usize, color: &[f64]) -> Result<Self> {
        if color.is_empty() {
            return Err(FitError::invalid_param("color.len()", 0, "must be positive"));
        }
        Ok(Self {
            width,
            height,
            channels: color.len(),
            data: color.repeat(width * height),
        })
    }

    /// Width in pixels.
    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    /// Height in pixels.
    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    /// Number of channels per pixel.
    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// `(width, height)`.
    #[inline]
    pub fn resolution(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    /// Number of pixels.
    #[inline]
    pub fn num_pixels(&self) -> usize {
        self.width * self.height
    }

    /// Raw samples.
    #[inline]
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    /// Mutable raw samples.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.data
    }

    /// Samples of pixel `(x, y)`.
    #[inline]
    pub fn pixel(&self, x: usize, y: usize) -> &[f64] {
        let start = (y * self.width + x) * self.channels;
        &self.data[start..start + self.channels]
    }

    /// Mutable samples of pixel `(x, y)`.
    #[inline]
    pub fn pixel_mut(&mut self, x: usize, y: usize) -> &mut [f64] {
        let start = (y * self.width + x) * self.channels;
        &mut self.data[start..start + self.channels]
    }

    /// Samples of the pixel with linear index `index = y * width + x`.
    #[inline]
    pub fn pixel_at(&self, index: usize) -> &[f64] {
        let start = index * self.channels;
        &self.data[start..start + self.channels]
    }

    /// Single sample.
    #[inline]
    pub fn get(&self, x: usize, y: usize, channel: usize) -> f64 {
        self.data[(y * self.width + x) * self.channels + channel]
    }

    /// Extract one channel as a `height x width` matrix.
    pub fn channel(&self, channel: usize) -> DMatrix<f64> {
        DMatrix::from_fn(self.height, self.width, |y, x| self.get(x, y, channel))
    }

    /// Whether every sample is finite.
    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|v| v.is_finite())
    }
}

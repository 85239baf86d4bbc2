//! Target image binding and the squared-error data term.

use nalgebra::{DMatrix, Matrix3, Point3};

use crate::error::{FitError, Result};
use crate::image::Image;
use crate::render::{Camera, Distortion};

/// A target image with the camera it was bound with.
#[derive(Debug, Clone)]
pub(crate) struct Target {
    pub image: Image,
    pub camera: Camera,
}

impl Target {
    /// Bind `image` and build the fitting camera: principal point at the
    /// image center, focal `2 * width` unless given, axes flipped so the
    /// camera looks down `-z`, centered at `camera_center`.
    pub fn new(
        image: &Image,
        channels: usize,
        camera_center: &Point3<f64>,
        focal: Option<f64>,
        distortion: Option<Distortion>,
    ) -> Result<Self> {
        if image.channels() != channels {
            return Err(FitError::precondition(format!(
                "expected a {}-channel image, got {} channels",
                channels,
                image.channels()
            )));
        }
        if !image.is_finite() {
            return Err(FitError::precondition("target image contains non-finite values"));
        }
        let (width, height) = image.resolution();
        let focal = focal.unwrap_or(2.0 * width as f64);
        let flip = Matrix3::new(1.0, 0.0, 0.0, 0.0, -1.0, 0.0, 0.0, 0.0, -1.0);
        let camera = Camera::look_from(camera_center, &flip, focal, (width, height), distortion)?;
        log::info!(
            "bound {}x{}x{} target, focal {}, camera center {:?}",
            width,
            height,
            channels,
            focal,
            camera_center.coords.as_slice()
        );
        Ok(Self {
            image: image.clone(),
            camera,
        })
    }
}

/// Sum of squared differences between a render and its target.
#[derive(Debug, Clone)]
pub(crate) struct DataTerm {
    pub energy: f64,
    /// Per pixel, summed over channels (`height x width`).
    pub diff: DMatrix<f64>,
    /// `dE/d(rendered)`.
    pub gradient: Image,
}

impl DataTerm {
    /// `mask[i] == false` zeroes the gradient of sample `i` (clamped values).
    pub fn eval(rendered: &Image, target: &Image, mask: Option<&[bool]>) -> Result<Self> {
        if rendered.resolution() != target.resolution() || rendered.channels() != target.channels() {
            return Err(FitError::configuration(format!(
                "rendered image is {:?}x{}, target is {:?}x{}",
                rendered.resolution(),
                rendered.channels(),
                target.resolution(),
                target.channels()
            )));
        }
        let (width, height) = rendered.resolution();
        let channels = rendered.channels();
        let mut diff = DMatrix::zeros(height, width);
        let mut gradient = Image::zeros(width, height, channels);

        let residuals = rendered.as_slice().iter().zip(target.as_slice());
        for (i, (r, t)) in residuals.enumerate() {
            let residual = r - t;
            let pixel = i / channels;
            diff[(pixel / width, pixel % width)] += residual * residual;
            if mask.map_or(true, |m| m[i]) {
                gradient.as_mut_slice()[i] = 2.0 * residual;
            }
        }

        Ok(Self {
            energy: diff.sum(),
            diff,
            gradient,
        })
    }
}

/// Clamp every sample to `[0, max]`, reporting which samples were inside.
pub(crate) fn clamp_depth(image: &Image, max: f64) -> (Image, Vec<bool>) {
    let mut clamped = image.clone();
    let mut inside = Vec::with_capacity(image.as_slice().len());
    for v in clamped.as_mut_slice() {
        inside.push((0.0..=max).contains(v));
        *v = v.clamp(0.0, max);
    }
    (clamped, inside)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_term_sums_channels() {
        let rendered = Image::new(2, 1, 3, vec![1.0, 2.0, 3.0, 0.0, 0.0, 0.0]).unwrap();
        let target = Image::new(2, 1, 3, vec![0.0, 2.0, 1.0, 0.0, 0.5, 0.0]).unwrap();
        let term = DataTerm::eval(&rendered, &target, None).unwrap();
        assert_eq!(term.diff[(0, 0)], 5.0);
        assert_eq!(term.diff[(0, 1)], 0.25);
        assert_eq!(term.energy, 5.25);
        assert_eq!(term.gradient.as_slice(), &[2.0, 0.0, 4.0, 0.0, -1.0, 0.0]);
    }

    #[test]
    fn test_data_term_rejects_shape_mismatch() {
        let target = Image::zeros(4, 3, 3);
        let smaller = Image::zeros(2, 3, 3);
        let result = DataTerm::eval(&smaller, &target, None);
        assert!(matches!(result, Err(FitError::Configuration(_))));

        let depth = Image::zeros(4, 3, 1);
        let result = DataTerm::eval(&depth, &target, None);
        assert!(matches!(result, Err(FitError::Configuration(_))));
    }

    #[test]
    fn test_clamp_masks_gradient() {
        let depth = Image::new(3, 1, 1, vec![-1.0, 2.0, 12.0]).unwrap();
        let (clamped, inside) = clamp_depth(&depth, 10.0);
        assert_eq!(clamped.as_slice(), &[0.0, 2.0, 10.0]);
        assert_eq!(inside, vec![false, true, false]);

        let target = Image::zeros(3, 1, 1);
        let term = DataTerm::eval(&clamped, &target, Some(&inside)).unwrap();
        assert_eq!(term.gradient.as_slice(), &[0.0, 4.0, 0.0]);
        assert_eq!(term.energy, 104.0);
    }

    #[test]
    fn test_target_camera() {
        let image = Image::zeros(40, 30, 1);
        let target = Target::new(&image, 1, &Point3::new(0.0, 0.0, 5.0), None, None).unwrap();
        let k = target.camera.intrinsic();
        assert_eq!(k[(0, 0)], 80.0);
        assert_eq!(k[(0, 2)], 20.0);
        assert_eq!(k[(1, 2)], 15.0);
        // The mesh center lands at the principal point, in front of the camera
        let proj = target.camera.project(&Point3::origin());
        assert!((proj.pixel.x - 20.0).abs() < 1e-12);
        assert!((proj.depth - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_target_channel_mismatch() {
        let image = Image::zeros(4, 4, 3);
        let result = Target::new(&image, 1, &Point3::origin(), None, None);
        assert!(matches!(result, Err(FitError::Precondition(_))));
    }
}

//! Pinhole camera with optional lens distortion.
//!
//! Projection of a world point `p`:
//!
//! ```text
//! q       = R p + t                    (camera frame, depth = q.z)
//! (x, y)  = (q.x / q.z, q.y / q.z)
//! (x', y') = distort(x, y)             (identity without distortion)
//! (u, v)  = K[0..2] . (x', y', 1)      (pixel coordinates)
//! ```
//!
//! Pixel `(col, row)` is sampled at its integer coordinates.

use nalgebra::{DMatrix, Matrix2, Matrix3, Matrix3x4, Point2, Point3, Vector2, Vector3};
use rayon::prelude::*;

use crate::error::{FitError, Result};

/// Radial-tangential lens distortion coefficients `(k1, k2, p1, p2, k3)`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Distortion {
    /// Second-order radial coefficient.
    pub k1: f64,
    /// Fourth-order radial coefficient.
    pub k2: f64,
    /// First tangential coefficient.
    pub p1: f64,
    /// Second tangential coefficient.
    pub p2: f64,
    /// Sixth-order radial coefficient.
    pub k3: f64,
}

impl Distortion {
    /// Coefficients in `(k1, k2, p1, p2, k3)` order.
    pub fn new(k1: f64, k2: f64, p1: f64, p2: f64, k3: f64) -> Self {
        Self { k1, k2, p1, p2, k3 }
    }

    /// Distort normalized image coordinates.
    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        let r2 = x * x + y * y;
        let radial = 1.0 + r2 * (self.k1 + r2 * (self.k2 + r2 * self.k3));
        let xd = x * radial + 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
        let yd = y * radial + self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;
        (xd, yd)
    }

    /// Jacobian `d(x', y') / d(x, y)`.
    pub fn jacobian(&self, x: f64, y: f64) -> Matrix2<f64> {
        let r2 = x * x + y * y;
        let radial = 1.0 + r2 * (self.k1 + r2 * (self.k2 + r2 * self.k3));
        let dr = self.k1 + 2.0 * self.k2 * r2 + 3.0 * self.k3 * r2 * r2;
        let cross = 2.0 * x * y * dr + 2.0 * self.p1 * x + 2.0 * self.p2 * y;
        Matrix2::new(
            radial + 2.0 * x * x * dr + 2.0 * self.p1 * y + 6.0 * self.p2 * x,
            cross,
            cross,
            radial + 2.0 * y * y * dr + 6.0 * self.p1 * y + 2.0 * self.p2 * x,
        )
    }
}

/// A vertex projected into the image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    /// Pixel coordinates `(column, row)`.
    pub pixel: Point2<f64>,
    /// Camera-frame depth. Not positive for points behind the camera.
    pub depth: f64,
}

/// Calibrated camera: extrinsic `[R | t]`, intrinsic `K`, resolution and
/// optional distortion. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    extrinsic: Matrix3x4<f64>,
    intrinsic: Matrix3<f64>,
    resolution: (usize, usize),
    distortion: Option<Distortion>,
}

impl Camera {
    /// Build a camera.
    ///
    /// # Errors
    ///
    /// [`FitError::Configuration`] if the resolution is zero, any entry is
    /// not finite, the intrinsic bottom row is not `[0, 0, 1]` or a focal
    /// length is zero.
    pub fn new(
        extrinsic: Matrix3x4<f64>,
        intrinsic: Matrix3<f64>,
        resolution: (usize, usize),
        distortion: Option<Distortion>,
    ) -> Result<Self> {
        if resolution.0 == 0 || resolution.1 == 0 {
            return Err(FitError::configuration(format!(
                "resolution must be positive, got {}x{}",
                resolution.0, resolution.1
            )));
        }
        if !extrinsic.iter().all(|v| v.is_finite()) || !intrinsic.iter().all(|v| v.is_finite()) {
            return Err(FitError::configuration("camera matrices must be finite"));
        }
        if intrinsic[(2, 0)] != 0.0 || intrinsic[(2, 1)] != 0.0 || intrinsic[(2, 2)] != 1.0 {
            return Err(FitError::configuration(
                "intrinsic bottom row must be [0, 0, 1]",
            ));
        }
        if intrinsic[(0, 0)] == 0.0 || intrinsic[(1, 1)] == 0.0 {
            return Err(FitError::configuration("focal lengths must be non-zero"));
        }
        Ok(Self {
            extrinsic,
            intrinsic,
            resolution,
            distortion,
        })
    }

    /// Build a camera from dynamically sized matrices, checking their shapes.
    pub fn from_matrices(
        extrinsic: &DMatrix<f64>,
        intrinsic: &DMatrix<f64>,
        resolution: (usize, usize),
        distortion: Option<Distortion>,
    ) -> Result<Self> {
        if extrinsic.shape() != (3, 4) {
            return Err(FitError::configuration(format!(
                "extrinsic must be 3x4, got {}x{}",
                extrinsic.nrows(),
                extrinsic.ncols()
            )));
        }
        if intrinsic.shape() != (3, 3) {
            return Err(FitError::configuration(format!(
                "intrinsic must be 3x3, got {}x{}",
                intrinsic.nrows(),
                intrinsic.ncols()
            )));
        }
        let extrinsic = Matrix3x4::from_fn(|r, c| extrinsic[(r, c)]);
        let intrinsic = Matrix3::from_fn(|r, c| intrinsic[(r, c)]);
        Self::new(extrinsic, intrinsic, resolution, distortion)
    }

    /// Camera looking from `center` with world-to-camera rotation `rotation`
    /// and a centered principal point, focal length `focal` in pixels.
    pub fn look_from(
        center: &Point3<f64>,
        rotation: &Matrix3<f64>,
        focal: f64,
        resolution: (usize, usize),
        distortion: Option<Distortion>,
    ) -> Result<Self> {
        if !focal.is_finite() {
            return Err(FitError::configuration(format!("focal must be finite, got {}", focal)));
        }
        let translation = -(rotation.transpose() * center.coords);
        let mut extrinsic = Matrix3x4::zeros();
        extrinsic.fixed_view_mut::<3, 3>(0, 0).copy_from(rotation);
        extrinsic.fixed_view_mut::<3, 1>(0, 3).copy_from(&translation);
        let (width, height) = resolution;
        let intrinsic = Matrix3::new(
            focal,
            0.0,
            width as f64 / 2.0,
            0.0,
            focal,
            height as f64 / 2.0,
            0.0,
            0.0,
            1.0,
        );
        Self::new(extrinsic, intrinsic, resolution, distortion)
    }

    /// `[R | t]`.
    #[inline]
    pub fn extrinsic(&self) -> &Matrix3x4<f64> {
        &self.extrinsic
    }

    /// `K`.
    #[inline]
    pub fn intrinsic(&self) -> &Matrix3<f64> {
        &self.intrinsic
    }

    /// `(width, height)` in pixels.
    #[inline]
    pub fn resolution(&self) -> (usize, usize) {
        self.resolution
    }

    /// Lens distortion, if any.
    #[inline]
    pub fn distortion(&self) -> Option<&Distortion> {
        self.distortion.as_ref()
    }

    /// World-to-camera rotation `R`.
    pub fn rotation(&self) -> Matrix3<f64> {
        self.extrinsic.fixed_view::<3, 3>(0, 0).into_owned()
    }

    /// World-to-camera translation `t`.
    pub fn translation(&self) -> Vector3<f64> {
        self.extrinsic.fixed_view::<3, 1>(0, 3).into_owned()
    }

    /// Transform a world point into the camera frame.
    #[inline]
    pub fn world_to_camera(&self, p: &Point3<f64>) -> Vector3<f64> {
        self.rotation() * p.coords + self.translation()
    }

    fn distort(&self, x: f64, y: f64) -> (f64, f64) {
        match &self.distortion {
            Some(d) => d.apply(x, y),
            None => (x, y),
        }
    }

    /// Project a world point.
    pub fn project(&self, p: &Point3<f64>) -> Projection {
        let q = self.world_to_camera(p);
        let (xd, yd) = self.distort(q.x / q.z, q.y / q.z);
        let k = &self.intrinsic;
        Projection {
            pixel: Point2::new(
                k[(0, 0)] * xd + k[(0, 1)] * yd + k[(0, 2)],
                k[(1, 0)] * xd + k[(1, 1)] * yd + k[(1, 2)],
            ),
            depth: q.z,
        }
    }

    /// Project a point set, on the rayon pool when `parallel` is set.
    pub fn project_points(&self, points: &[Point3<f64>], parallel: bool) -> Vec<Projection> {
        if parallel {
            points.par_iter().map(|p| self.project(p)).collect()
        } else {
            points.iter().map(|p| self.project(p)).collect()
        }
    }

    /// Adjoint of [`Camera::project`]: map gradients on the pixel position
    /// and on the depth back onto the world point.
    pub fn project_backward(
        &self,
        p: &Point3<f64>,
        grad_pixel: &Vector2<f64>,
        grad_depth: f64,
    ) -> Vector3<f64> {
        let q = self.world_to_camera(p);
        let x = q.x / q.z;
        let y = q.y / q.z;
        let k = &self.intrinsic;

        let g_distorted = Vector2::new(
            k[(0, 0)] * grad_pixel.x + k[(1, 0)] * grad_pixel.y,
            k[(0, 1)] * grad_pixel.x + k[(1, 1)] * grad_pixel.y,
        );
        let g_normalized = match &self.distortion {
            Some(d) => d.jacobian(x, y).transpose() * g_distorted,
            None => g_distorted,
        };

        let g_camera = Vector3::new(
            g_normalized.x / q.z,
            g_normalized.y / q.z,
            -(g_normalized.x * x + g_normalized.y * y) / q.z + grad_depth,
        );
        self.rotation().transpose() * g_camera
    }
}

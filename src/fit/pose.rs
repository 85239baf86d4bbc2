//! Rigid pose parameterization and its adjoint.
//!
//! The fitters keep a raw quaternion `q = [x, y, z, w]` and a translation as
//! free parameters. Every step the stored vertices are centered on their
//! centroid, rotated by `q / |q|` and translated. Differentiating through the
//! normalization keeps the quaternion gradient orthogonal to `q`, i.e. tangent
//! to the unit sphere, so gradient steps do not change its norm to first
//! order.

use nalgebra::{Point3, UnitQuaternion, Vector3, Vector4};
use rayon::prelude::*;

use crate::error::{FitError, Result};
use crate::mesh::centroid;

/// Rotate `v` by the unit quaternion `q` (`[x, y, z, w]`).
///
/// Uses `v + 2 (w (u x v) + u x (u x v))` with `u = q.xyz`.
#[inline]
pub fn qrot(q: &Vector4<f64>, v: &Vector3<f64>) -> Vector3<f64> {
    let u = q.xyz();
    let uv = u.cross(v);
    v + (uv * q.w + u.cross(&uv)) * 2.0
}

/// Quaternion `[x, y, z, w]` of the extrinsic z-y-x Euler rotation: first
/// `euler[0]` about z, then `euler[1]` about y, then `euler[2]` about x, all
/// about the fixed world axes.
pub fn quaternion_from_euler_zyx(euler: &Vector3<f64>) -> Vector4<f64> {
    let rz = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), euler[0]);
    let ry = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), euler[1]);
    let rx = UnitQuaternion::from_axis_angle(&Vector3::x_axis(), euler[2]);
    (rx * ry * rz).into_inner().coords
}

/// `points` translated so that their centroid is at the origin.
pub fn centered(points: &[Point3<f64>]) -> Vec<Point3<f64>> {
    let c = centroid(points).coords;
    points.iter().map(|p| p - c).collect()
}

/// Normalize a raw quaternion.
///
/// # Errors
///
/// [`FitError::Numerical`] if the norm is zero or not finite.
pub fn normalize_quaternion(q: &Vector4<f64>) -> Result<Vector4<f64>> {
    let norm = q.norm();
    if norm == 0.0 || !norm.is_finite() {
        return Err(FitError::numerical(format!(
            "cannot normalize quaternion {:?} (norm {})",
            q.as_slice(),
            norm
        )));
    }
    Ok(q / norm)
}

/// Per-vertex copy of a global color.
pub fn broadcast_color(color: &Vector3<f64>, nb_vertices: usize) -> Vec<Vector3<f64>> {
    vec![*color; nb_vertices]
}

/// Gradients of [`RigidTransform::backward`].
#[derive(Debug, Clone, PartialEq)]
pub struct PoseGradients {
    /// With respect to the untransformed vertices.
    pub vertices: Vec<Vector3<f64>>,
    /// With respect to the raw (unnormalized) quaternion.
    pub quaternion: Vector4<f64>,
    pub translation: Vector3<f64>,
}

/// Record of one centered rotation + translation, for the adjoint.
#[derive(Debug, Clone)]
pub struct RigidTransform {
    unit: Vector4<f64>,
    norm: f64,
    centered: Vec<Vector3<f64>>,
    parallel: bool,
}

impl RigidTransform {
    /// Center `vertices`, rotate by `quaternion / |quaternion|` and add
    /// `translation`. Returns the transform record and the moved vertices.
    pub fn forward(
        vertices: &[Point3<f64>],
        quaternion: &Vector4<f64>,
        translation: &Vector3<f64>,
        parallel: bool,
    ) -> Result<(Self, Vec<Point3<f64>>)> {
        let unit = normalize_quaternion(quaternion)?;
        let mean = centroid(vertices).coords;
        let centered: Vec<Vector3<f64>> = vertices.iter().map(|p| p.coords - mean).collect();

        let rotate = |c: &Vector3<f64>| Point3::from(qrot(&unit, c) + translation);
        let transformed = if parallel {
            centered.par_iter().map(rotate).collect()
        } else {
            centered.iter().map(rotate).collect()
        };

        Ok((
            Self {
                unit,
                norm: quaternion.norm(),
                centered,
                parallel,
            },
            transformed,
        ))
    }

    /// The normalized quaternion used by the forward pass.
    pub fn unit_quaternion(&self) -> &Vector4<f64> {
        &self.unit
    }

    /// Pull gradients on the transformed vertices back onto the inputs.
    pub fn backward(&self, grad_transformed: &[Vector3<f64>]) -> PoseGradients {
        let u = self.unit.xyz();
        let w = self.unit.w;
        let conjugate = Vector4::new(-u.x, -u.y, -u.z, w);

        // Per vertex: gradient on the centered vertex, and on (u, w)
        let per_vertex = |(c, g): (&Vector3<f64>, &Vector3<f64>)| {
            let grad_c = qrot(&conjugate, g);
            let grad_w = 2.0 * g.dot(&u.cross(c));
            let grad_u = c.cross(g) * (2.0 * w)
                + (g * u.dot(c) + c * u.dot(g) - u * (2.0 * c.dot(g))) * 2.0;
            (grad_c, Vector4::new(grad_u.x, grad_u.y, grad_u.z, grad_w))
        };
        let contributions: Vec<(Vector3<f64>, Vector4<f64>)> = if self.parallel {
            self.centered
                .par_iter()
                .zip(grad_transformed.par_iter())
                .map(per_vertex)
                .collect()
        } else {
            self.centered.iter().zip(grad_transformed).map(per_vertex).collect()
        };

        let grad_unit: Vector4<f64> = contributions.iter().map(|(_, q)| q).sum();
        let quaternion = (grad_unit - self.unit * self.unit.dot(&grad_unit)) / self.norm;

        let n = contributions.len().max(1) as f64;
        let mean_grad: Vector3<f64> = contributions.iter().map(|(c, _)| c).sum::<Vector3<f64>>() / n;
        let vertices = contributions.iter().map(|(c, _)| c - mean_grad).collect();

        PoseGradients {
            vertices,
            quaternion,
            translation: grad_transformed.iter().sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_2;

    fn sample_points() -> Vec<Point3<f64>> {
        vec![
            Point3::new(0.3, -0.2, 1.1),
            Point3::new(1.2, 0.4, -0.3),
            Point3::new(-0.7, 0.9, 0.2),
            Point3::new(0.1, -1.3, -0.8),
            Point3::new(0.6, 0.2, 0.5),
        ]
    }

    #[test]
    fn test_qrot_matches_nalgebra() {
        let q = quaternion_from_euler_zyx(&Vector3::new(0.3, -0.5, 1.1));
        let unit = UnitQuaternion::from_quaternion(nalgebra::Quaternion::from(q));
        let v = Vector3::new(0.2, -1.4, 0.7);
        assert!((qrot(&q, &v) - unit.transform_vector(&v)).norm() < 1e-12);
    }

    #[test]
    fn test_euler_order() {
        // A quarter turn about z then a quarter turn about the fixed x axis
        let q = quaternion_from_euler_zyx(&Vector3::new(FRAC_PI_2, 0.0, FRAC_PI_2));
        let rotated = qrot(&q, &Vector3::x());
        // x -> y (about z) -> z (about x)
        assert!((rotated - Vector3::z()).norm() < 1e-12);
    }

    #[test]
    fn test_forward_centers_then_translates() {
        let points = sample_points();
        let q = Vector4::new(0.0, 0.0, 0.0, 2.0);
        let t = Vector3::new(1.0, 2.0, 3.0);
        let (_, out) = RigidTransform::forward(&points, &q, &t, false).unwrap();
        let c = centroid(&out);
        assert!((c.coords - t).norm() < 1e-12);
        let mean = centroid(&points).coords;
        for (p, o) in points.iter().zip(&out) {
            assert!(((p.coords - mean + t) - o.coords).norm() < 1e-12);
        }
    }

    #[test]
    fn test_zero_quaternion_is_numerical_error() {
        let result = RigidTransform::forward(&sample_points(), &Vector4::zeros(), &Vector3::zeros(), false);
        assert!(matches!(result, Err(FitError::Numerical(_))));
    }

    #[test]
    fn test_backward_matches_finite_differences() {
        let points = sample_points();
        let q = Vector4::new(0.2, -0.4, 0.3, 1.3);
        let t = Vector3::new(0.5, -0.1, 0.2);
        let weights: Vec<Vector3<f64>> = (0..points.len())
            .map(|i| Vector3::new(1.0 - 0.3 * i as f64, 0.5 * i as f64, -0.7))
            .collect();
        let energy = |p: &[Point3<f64>], q: &Vector4<f64>, t: &Vector3<f64>| -> f64 {
            let (_, out) = RigidTransform::forward(p, q, t, false).unwrap();
            out.iter()
                .zip(&weights)
                .map(|(o, w)| o.coords.dot(w) + 0.5 * o.coords.norm_squared())
                .sum()
        };

        let (tf, out) = RigidTransform::forward(&points, &q, &t, true).unwrap();
        let grad_out: Vec<Vector3<f64>> = out.iter().zip(&weights).map(|(o, w)| w + o.coords).collect();
        let grads = tf.backward(&grad_out);

        let eps = 1e-6;
        for k in 0..4 {
            let mut qp = q;
            let mut qm = q;
            qp[k] += eps;
            qm[k] -= eps;
            let fd = (energy(&points, &qp, &t) - energy(&points, &qm, &t)) / (2.0 * eps);
            assert!((fd - grads.quaternion[k]).abs() < 1e-6, "quaternion {}", k);
        }
        for k in 0..3 {
            let mut tp = t;
            let mut tm = t;
            tp[k] += eps;
            tm[k] -= eps;
            let fd = (energy(&points, &q, &tp) - energy(&points, &q, &tm)) / (2.0 * eps);
            assert!((fd - grads.translation[k]).abs() < 1e-6, "translation {}", k);
        }
        for i in 0..points.len() {
            for k in 0..3 {
                let mut pp = points.clone();
                let mut pm = points.clone();
                pp[i][k] += eps;
                pm[i][k] -= eps;
                let fd = (energy(&pp, &q, &t) - energy(&pm, &q, &t)) / (2.0 * eps);
                assert!((fd - grads.vertices[i][k]).abs() < 1e-6, "vertex {} axis {}", i, k);
            }
        }
    }

    #[test]
    fn test_quaternion_gradient_is_tangent() {
        let points = sample_points();
        let q = Vector4::new(0.1, 0.7, -0.2, 0.4);
        let (tf, _) = RigidTransform::forward(&points, &q, &Vector3::zeros(), false).unwrap();
        let grad_out = vec![Vector3::new(0.3, -1.0, 0.6); points.len()];
        let grads = tf.backward(&grad_out);
        assert!(grads.quaternion.dot(&q).abs() < 1e-12);
    }
}

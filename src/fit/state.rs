//! Fitting session state: free parameters, their speeds and the initial
//! values restored by `reset`.

use nalgebra::{Point3, Vector3, Vector4};

use crate::render::{Ambient, LightConfig};

/// Free appearance parameters of the RGB fitter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Appearance {
    pub color: Vector3<f64>,
    pub light: LightConfig,
}

/// Current value of every free parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct FitState {
    pub vertices: Vec<Point3<f64>>,
    /// Raw quaternion `[x, y, z, w]`, unit norm after every step.
    pub quaternion: Vector4<f64>,
    pub translation: Vector3<f64>,
    /// `None` for the depth fitter.
    pub appearance: Option<Appearance>,
}

/// Velocity of every parameter group.
#[derive(Debug, Clone, PartialEq)]
pub struct Speeds {
    pub vertices: Vec<Vector3<f64>>,
    pub quaternion: Vector4<f64>,
    pub translation: Vector3<f64>,
    pub color: Vector3<f64>,
    pub directional: Vector3<f64>,
    pub ambient: Ambient,
}

impl Speeds {
    /// All-zero speeds shaped like `state`.
    pub fn zeros_like(state: &FitState) -> Self {
        let ambient = match &state.appearance {
            Some(appearance) => appearance.light.ambient.zeros_like(),
            None => Ambient::Scalar(0.0),
        };
        Self {
            vertices: vec![Vector3::zeros(); state.vertices.len()],
            quaternion: Vector4::zeros(),
            translation: Vector3::zeros(),
            color: Vector3::zeros(),
            directional: Vector3::zeros(),
            ambient,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.vertices.iter().all(|v| *v == Vector3::zeros())
            && self.quaternion == Vector4::zeros()
            && self.translation == Vector3::zeros()
            && self.color == Vector3::zeros()
            && self.directional == Vector3::zeros()
            && self.ambient.as_slice().iter().all(|a| *a == 0.0)
    }
}

/// Parameters, speeds and iteration counter of one fitting session.
#[derive(Debug, Clone)]
pub(crate) struct Session {
    pub initial: FitState,
    pub current: FitState,
    pub speeds: Speeds,
    pub iteration: usize,
}

impl Session {
    pub fn new(initial: FitState) -> Self {
        let speeds = Speeds::zeros_like(&initial);
        Self {
            current: initial.clone(),
            initial,
            speeds,
            iteration: 0,
        }
    }

    /// Restore the initial parameters and zero the speeds. The iteration
    /// counter is left alone.
    pub fn reset(&mut self) {
        self.current = self.initial.clone();
        self.speeds = Speeds::zeros_like(&self.initial);
    }

    pub fn set_pose_init(&mut self, quaternion: Vector4<f64>, translation: Vector3<f64>) {
        self.initial.quaternion = quaternion;
        self.initial.translation = translation;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> FitState {
        FitState {
            vertices: vec![Point3::new(0.0, 1.0, 2.0), Point3::new(1.0, 0.0, 0.0)],
            quaternion: Vector4::new(0.0, 0.0, 0.0, 1.0),
            translation: Vector3::zeros(),
            appearance: Some(Appearance {
                color: Vector3::new(0.5, 0.5, 0.5),
                light: LightConfig::with_rgb_ambient(Vector3::zeros(), Vector3::repeat(0.4)),
            }),
        }
    }

    #[test]
    fn test_reset_restores_initial_values() {
        let mut session = Session::new(state());
        assert!(session.speeds.is_zero());
        assert_eq!(session.speeds.ambient, Ambient::Rgb(Vector3::zeros()));

        session.current.vertices[0].x = 5.0;
        session.current.translation.y = 1.0;
        session.speeds.vertices[1].z = 0.3;
        session.speeds.ambient.as_mut_slice()[2] = 0.1;
        session.iteration = 7;
        assert!(!session.speeds.is_zero());

        session.reset();
        assert_eq!(session.current, state());
        assert!(session.speeds.is_zero());
        assert_eq!(session.iteration, 7);
    }

    #[test]
    fn test_pose_init_applies_on_reset() {
        let mut session = Session::new(state());
        let q = Vector4::new(0.0, 1.0, 0.0, 0.0);
        session.set_pose_init(q, Vector3::new(1.0, 2.0, 3.0));
        assert_eq!(session.current.quaternion, Vector4::new(0.0, 0.0, 0.0, 1.0));
        session.reset();
        assert_eq!(session.current.quaternion, q);
        assert_eq!(session.current.translation, Vector3::new(1.0, 2.0, 3.0));
    }
}

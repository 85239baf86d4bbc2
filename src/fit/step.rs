//! Pieces shared by the fitters' `step`: the result type, the gradient
//! bundle, and the transactional damped-inertia update.

use nalgebra::{DMatrix, Point3, Vector3, Vector4};

use super::config::FitterConfig;
use super::pose::normalize_quaternion;
use super::state::{FitState, Session, Speeds};
use crate::algo::Progress;
use crate::error::{FitError, Result};
use crate::image::Image;
use crate::render::Ambient;

/// What one optimization step reports.
#[derive(Debug, Clone)]
pub struct StepResult {
    /// `data_energy + rigidity_energy`.
    pub energy: f64,
    pub data_energy: f64,
    pub rigidity_energy: f64,
    /// The render compared against the target (clamped for depth).
    pub rendered: Image,
    /// Per-pixel squared difference, summed over channels (`height x width`).
    pub diff: DMatrix<f64>,
}

/// Gradients of the appearance groups.
#[derive(Debug, Clone)]
pub(crate) struct AppearanceGradients {
    pub color: Vector3<f64>,
    pub directional: Vector3<f64>,
    pub ambient: Ambient,
}

/// Gradients of every parameter group for one step.
#[derive(Debug, Clone)]
pub(crate) struct GroupGradients {
    pub vertices: Vec<Vector3<f64>>,
    pub quaternion: Vector4<f64>,
    pub translation: Vector3<f64>,
    pub appearance: Option<AppearanceGradients>,
}

fn ensure_finite<'a>(name: &str, values: impl IntoIterator<Item = &'a f64>) -> Result<()> {
    if values.into_iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(FitError::numerical(format!("non-finite {}", name)))
    }
}

pub(crate) fn ensure_finite_energy(energy: f64) -> Result<()> {
    ensure_finite("energy", [&energy])
}

impl GroupGradients {
    pub fn ensure_finite(&self) -> Result<()> {
        ensure_finite("vertex gradient", self.vertices.iter().flat_map(|g| g.iter()))?;
        ensure_finite("quaternion gradient", self.quaternion.iter())?;
        ensure_finite("translation gradient", self.translation.iter())?;
        if let Some(appearance) = &self.appearance {
            ensure_finite("color gradient", appearance.color.iter())?;
            ensure_finite("directional light gradient", appearance.directional.iter())?;
            ensure_finite("ambient light gradient", appearance.ambient.as_slice())?;
        }
        Ok(())
    }
}

/// Apply one damped-inertia update to a copy of the session parameters.
///
/// `vertices` replaces the stored vertices before the update (the depth
/// fitter passes them re-centered). Nothing in `session` is touched, so a
/// failure leaves the fitter as it was; the caller commits the result.
pub(crate) fn apply_update(
    session: &Session,
    config: &FitterConfig,
    grads: &GroupGradients,
    vertices: Vec<Point3<f64>>,
) -> Result<(FitState, Speeds)> {
    let rule = config.update_rule();
    let steps = &config.steps;
    let mut state = session.current.clone();
    let mut speeds = session.speeds.clone();
    state.vertices = vertices;

    rule.apply(
        &steps.vertices,
        state.vertices.iter_mut().flat_map(|p| p.coords.iter_mut()),
        speeds.vertices.iter_mut().flat_map(|s| s.iter_mut()),
        grads.vertices.iter().flat_map(|g| g.iter().copied()),
    );
    rule.apply(
        &steps.quaternion,
        state.quaternion.iter_mut(),
        speeds.quaternion.iter_mut(),
        grads.quaternion.iter().copied(),
    );
    rule.apply(
        &steps.translation,
        state.translation.iter_mut(),
        speeds.translation.iter_mut(),
        grads.translation.iter().copied(),
    );

    if let (Some(appearance), Some(g)) = (state.appearance.as_mut(), grads.appearance.as_ref()) {
        if config.update_lights {
            rule.apply(
                &steps.directional,
                appearance.light.directional.iter_mut(),
                speeds.directional.iter_mut(),
                g.directional.iter().copied(),
            );
            rule.apply(
                &steps.ambient,
                appearance.light.ambient.as_mut_slice(),
                speeds.ambient.as_mut_slice(),
                g.ambient.as_slice().iter().copied(),
            );
        }
        if config.update_color {
            rule.apply(
                &steps.color,
                appearance.color.iter_mut(),
                speeds.color.iter_mut(),
                g.color.iter().copied(),
            );
        }
    }

    state.quaternion = normalize_quaternion(&state.quaternion)?;
    Ok((state, speeds))
}

/// Common driver interface of the fitters.
pub trait Fitter {
    /// Run one render / compare / update iteration.
    fn step(&mut self) -> Result<StepResult>;

    /// Restore the initial parameters and zero every speed.
    fn reset(&mut self);

    /// Steps taken since the target was bound.
    fn iteration(&self) -> usize;

    /// Call [`Fitter::step`] `iterations` times, reporting each energy.
    /// Stops at the first error.
    fn run(&mut self, iterations: usize, progress: &Progress) -> Result<Vec<StepResult>> {
        let mut results = Vec::with_capacity(iterations);
        for i in 0..iterations {
            let result = self.step()?;
            progress.report(i + 1, iterations, result.energy);
            results.push(result);
        }
        Ok(results)
    }
}

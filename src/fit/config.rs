//! Fitter configuration.

use super::update::{DampedInertia, StepPolicy};
use crate::error::{FitError, Result};

/// Step policies of every parameter group.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepPolicies {
    pub vertices: StepPolicy,
    pub quaternion: StepPolicy,
    pub translation: StepPolicy,
    /// Directional light (RGB fitter only).
    pub directional: StepPolicy,
    /// Ambient light (RGB fitter only).
    pub ambient: StepPolicy,
    /// Global color (RGB fitter only).
    pub color: StepPolicy,
}

impl Default for StepPolicies {
    fn default() -> Self {
        Self {
            vertices: StepPolicy::new(0.0005, 0.5),
            quaternion: StepPolicy::new(0.00006, 0.1),
            translation: StepPolicy::new(0.00005, 0.1),
            directional: StepPolicy::unclamped(0.0001),
            ambient: StepPolicy::unclamped(0.0001),
            color: StepPolicy::unclamped(0.00001),
        }
    }
}

impl StepPolicies {
    fn validate(&self) -> Result<()> {
        self.vertices.validate("steps.vertices")?;
        self.quaternion.validate("steps.quaternion")?;
        self.translation.validate("steps.translation")?;
        self.directional.validate("steps.directional")?;
        self.ambient.validate("steps.ambient")?;
        self.color.validate("steps.color")
    }
}

/// Options shared by [`MeshDepthFitter`](super::MeshDepthFitter) and
/// [`MeshRgbFitter`](super::MeshRgbFitter).
///
/// # Example
///
/// ```
/// use meshfit::fit::FitterConfig;
///
/// let config = FitterConfig::for_rgb()
///     .with_cregu(500.0)
///     .with_update_lights(false)
///     .sequential();
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitterConfig {
    /// Weight of the rigidity energy.
    pub cregu: f64,

    /// Fraction of the previous speed kept each step, in `[0, 1)`.
    pub inertia: f64,

    /// Fraction of the blended speed removed each step, in `[0, 1)`.
    pub damping: f64,

    pub steps: StepPolicies,

    /// Whether the RGB fitter optimizes the lights.
    pub update_lights: bool,

    /// Whether the RGB fitter optimizes the global color.
    pub update_color: bool,

    /// Whether to use parallel execution (default: true).
    pub parallel: bool,
}

impl Default for FitterConfig {
    fn default() -> Self {
        Self::for_depth()
    }
}

impl FitterConfig {
    /// Defaults of the depth fitter.
    pub fn for_depth() -> Self {
        Self {
            cregu: 2000.0,
            inertia: 0.96,
            damping: 0.05,
            steps: StepPolicies::default(),
            update_lights: true,
            update_color: true,
            parallel: true,
        }
    }

    /// Defaults of the RGB fitter: rotation steps are clamped tighter.
    pub fn for_rgb() -> Self {
        let mut config = Self::for_depth();
        config.steps.quaternion.max = 0.05;
        config
    }

    pub fn with_cregu(mut self, cregu: f64) -> Self {
        self.cregu = cregu;
        self
    }

    pub fn with_inertia(mut self, inertia: f64) -> Self {
        self.inertia = inertia;
        self
    }

    pub fn with_damping(mut self, damping: f64) -> Self {
        self.damping = damping;
        self
    }

    pub fn with_steps(mut self, steps: StepPolicies) -> Self {
        self.steps = steps;
        self
    }

    pub fn with_vertex_step(mut self, policy: StepPolicy) -> Self {
        self.steps.vertices = policy;
        self
    }

    pub fn with_quaternion_step(mut self, policy: StepPolicy) -> Self {
        self.steps.quaternion = policy;
        self
    }

    pub fn with_translation_step(mut self, policy: StepPolicy) -> Self {
        self.steps.translation = policy;
        self
    }

    /// Freeze or free the directional and ambient lights.
    pub fn with_update_lights(mut self, update: bool) -> Self {
        self.update_lights = update;
        self
    }

    /// Freeze or free the global color.
    pub fn with_update_color(mut self, update: bool) -> Self {
        self.update_color = update;
        self
    }

    /// Set whether to use parallel execution.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Create options for single-threaded execution.
    pub fn sequential(mut self) -> Self {
        self.parallel = false;
        self
    }

    pub(crate) fn update_rule(&self) -> DampedInertia {
        DampedInertia::new(self.inertia, self.damping)
    }

    /// Check every value.
    ///
    /// # Errors
    ///
    /// [`FitError::InvalidParameter`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if !self.cregu.is_finite() || self.cregu < 0.0 {
            return Err(FitError::invalid_param(
                "cregu",
                self.cregu,
                "must be finite and non-negative",
            ));
        }
        if !(0.0..1.0).contains(&self.inertia) {
            return Err(FitError::invalid_param("inertia", self.inertia, "must be in [0, 1)"));
        }
        if !(0.0..1.0).contains(&self.damping) {
            return Err(FitError::invalid_param("damping", self.damping, "must be in [0, 1)"));
        }
        self.steps.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let depth = FitterConfig::for_depth();
        assert_eq!(depth.cregu, 2000.0);
        assert_eq!(depth.inertia, 0.96);
        assert_eq!(depth.damping, 0.05);
        assert_eq!(depth.steps.quaternion.max, 0.1);
        assert!(depth.validate().is_ok());

        let rgb = FitterConfig::for_rgb();
        assert_eq!(rgb.steps.quaternion.max, 0.05);
        assert_eq!(rgb.steps.quaternion.factor, depth.steps.quaternion.factor);
        assert!(rgb.steps.color.max.is_infinite());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(FitterConfig::default().with_cregu(-1.0).validate().is_err());
        assert!(FitterConfig::default().with_inertia(1.0).validate().is_err());
        assert!(FitterConfig::default().with_damping(f64::NAN).validate().is_err());
        let err = FitterConfig::default()
            .with_translation_step(StepPolicy::new(-1.0, 0.1))
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("steps.translation"));
    }
}

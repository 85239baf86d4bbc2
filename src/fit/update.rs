//! Damped-inertia parameter updates.
//!
//! Each parameter group is moved by a velocity ("speed") that blends the
//! previous speed with a clamped gradient step:
//!
//! ```text
//! raw   = clamp(-gradient * factor, -max, max)
//! speed = (1 - damping) * (speed * inertia + (1 - inertia) * raw)
//! param = param + speed
//! ```

use crate::error::{FitError, Result};

/// Scale and symmetric clamp applied to a group's raw gradient step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepPolicy {
    /// Multiplier turning a gradient into a step.
    pub factor: f64,
    /// Bound on the magnitude of each raw step component.
    pub max: f64,
}

impl StepPolicy {
    pub fn new(factor: f64, max: f64) -> Self {
        Self { factor, max }
    }

    /// A policy without clamping.
    pub fn unclamped(factor: f64) -> Self {
        Self::new(factor, f64::INFINITY)
    }

    /// `clamp(-gradient * factor, -max, max)`.
    #[inline]
    pub fn raw_step(&self, gradient: f64) -> f64 {
        (-gradient * self.factor).clamp(-self.max, self.max)
    }

    pub(crate) fn validate(&self, name: &'static str) -> Result<()> {
        if !self.factor.is_finite() || self.factor < 0.0 {
            return Err(FitError::invalid_param(
                name,
                self.factor,
                "step factor must be finite and non-negative",
            ));
        }
        if self.max.is_nan() || self.max < 0.0 {
            return Err(FitError::invalid_param(
                name,
                self.max,
                "step max must be non-negative",
            ));
        }
        Ok(())
    }
}

/// Momentum blending shared by every parameter group.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DampedInertia {
    pub inertia: f64,
    pub damping: f64,
}

impl DampedInertia {
    pub fn new(inertia: f64, damping: f64) -> Self {
        Self { inertia, damping }
    }

    /// New speed of one scalar parameter.
    #[inline]
    pub fn speed(&self, policy: &StepPolicy, speed: f64, gradient: f64) -> f64 {
        (1.0 - self.damping) * (speed * self.inertia + (1.0 - self.inertia) * policy.raw_step(gradient))
    }

    /// Update a parameter group in place. The three sequences are walked in
    /// lockstep and must have the same length.
    pub fn apply<'p, 's, P, S, G>(&self, policy: &StepPolicy, params: P, speeds: S, gradient: G)
    where
        P: IntoIterator<Item = &'p mut f64>,
        S: IntoIterator<Item = &'s mut f64>,
        G: IntoIterator<Item = f64>,
    {
        for ((p, s), g) in params.into_iter().zip(speeds).zip(gradient) {
            *s = self.speed(policy, *s, g);
            *p += *s;
        }
    }
}

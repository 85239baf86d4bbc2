//! Error types for meshfit.
//!
//! Every fallible operation in the crate returns [`Result`]. Nothing is
//! retried or recovered internally: errors surface from the call that
//! triggered them.

use thiserror::Error;

/// Result type alias using [`FitError`].
pub type Result<T> = std::result::Result<T, FitError>;

/// Errors that can occur while building meshes, rendering or fitting.
#[derive(Error, Debug)]
pub enum FitError {
    /// The mesh has no faces.
    #[error("mesh has no faces")]
    EmptyMesh,

    /// A face references an invalid vertex index.
    #[error("face {face} references invalid vertex index {vertex}")]
    InvalidVertexIndex {
        /// The face index.
        face: usize,
        /// The invalid vertex index.
        vertex: usize,
    },

    /// A face has duplicate vertex indices (degenerate triangle).
    #[error("face {face} is degenerate (has duplicate vertices)")]
    DegenerateFace {
        /// The face index.
        face: usize,
    },

    /// An operation was called in the wrong state, or with an input whose
    /// layout does not match the fitter variant.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// Malformed camera or renderer configuration.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// A zero-norm quaternion or a non-finite energy/gradient.
    #[error("numerical degeneracy: {0}")]
    Numerical(String),

    /// An iterative solver failed to converge.
    #[error("solver failed to converge after {iterations} iterations")]
    ConvergenceFailed {
        /// Number of iterations attempted.
        iterations: usize,
    },

    /// Invalid parameter value.
    #[error("invalid parameter: {name} = {value} ({reason})")]
    InvalidParameter {
        /// Parameter name.
        name: &'static str,
        /// The invalid value (as string).
        value: String,
        /// Reason the value is invalid.
        reason: &'static str,
    },
}

impl FitError {
    /// Create an invalid parameter error.
    pub fn invalid_param<T: std::fmt::Display>(
        name: &'static str,
        value: T,
        reason: &'static str,
    ) -> Self {
        FitError::InvalidParameter {
            name,
            value: value.to_string(),
            reason,
        }
    }

    /// Create a precondition error.
    pub fn precondition(message: impl Into<String>) -> Self {
        FitError::Precondition(message.into())
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        FitError::Configuration(message.into())
    }

    /// Create a numerical degeneracy error.
    pub fn numerical(message: impl Into<String>) -> Self {
        FitError::Numerical(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_param_message() {
        let err = FitError::invalid_param("inertia", 1.5, "must be in [0, 1)");
        assert_eq!(
            err.to_string(),
            "invalid parameter: inertia = 1.5 (must be in [0, 1))"
        );
    }

    #[test]
    fn test_precondition_message() {
        let err = FitError::precondition("set_image must be called before step");
        assert!(err.to_string().contains("set_image"));
    }
}

//! Errors raised by the detectors.
//!
//! Every variant is unrecoverable for the detector instance that produced it:
//! callers should drop the detector (or, for CUSUM, reset it) rather than
//! keep feeding it observations.

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, DetectorError>;

/// Errors produced while constructing or driving a detector.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum DetectorError {
    /// A hyperparameter was rejected at construction time.
    #[error("invalid configuration for `{parameter}`: {reason}")]
    Configuration {
        /// Name of the offending parameter.
        parameter: &'static str,
        /// What is wrong with it.
        reason: String,
    },
    /// An observation was NaN or infinite.
    #[error("observation {0} is not a finite number")]
    InvalidObservation(f64),
    /// A density, variance or normalizing constant stopped being a usable
    /// finite positive number.
    #[error("numerical degeneracy in {context}: got {value}")]
    NumericalDegeneracy {
        /// Where the degenerate value appeared.
        context: &'static str,
        /// The offending value.
        value: f64,
    },
}

impl DetectorError {
    pub(crate) fn config(
        parameter: &'static str,
        reason: impl Into<String>,
    ) -> Self {
        Self::Configuration {
            parameter,
            reason: reason.into(),
        }
    }

    pub(crate) fn degenerate(context: &'static str, value: f64) -> Self {
        log::warn!("numerical degeneracy in {context}: {value}");
        Self::NumericalDegeneracy { context, value }
    }
}

/// Require `value` to be finite and strictly positive.
pub(crate) fn positive(parameter: &'static str, value: f64) -> Result<f64> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(DetectorError::config(
            parameter,
            format!("must be finite and greater than zero, got {value}"),
        ))
    }
}

/// Require `value` to be finite.
pub(crate) fn finite(parameter: &'static str, value: f64) -> Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(DetectorError::config(
            parameter,
            format!("must be finite, got {value}"),
        ))
    }
}

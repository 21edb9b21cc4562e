//! Hazard functions.
//!
//! A hazard function gives the prior probability that a change point occurs
//! right after a run of a given length.

use crate::error::{DetectorError, Result};

#[cfg(feature = "serde1")]
use serde::{Deserialize, Serialize};

/// Prior probability of a change point given the current run length.
pub trait Hazard {
    /// Change point probability after a run of `run_length` observations.
    /// Must lie in `[0, 1]`.
    fn hazard(&self, run_length: usize) -> f64;
}

impl<F> Hazard for F
where
    F: Fn(usize) -> f64,
{
    fn hazard(&self, run_length: usize) -> f64 {
        self(run_length)
    }
}

/// A constant hazard function.
/// This is the hazard function that corresponds to a geometric distribution
/// with timescale λ.
pub fn constant_hazard(lambda: f64) -> impl Fn(usize) -> f64 + Copy {
    let inv_lambda = 1.0 / lambda;
    move |_: usize| inv_lambda
}

/// Check an expected run length `lambda` for use with [`constant_hazard`].
///
/// # Errors
/// `lambda` must be finite and at least one, otherwise `1 / lambda` is not a
/// probability.
pub fn check_hazard_rate(lambda: f64) -> Result<f64> {
    if lambda.is_finite() && lambda >= 1.0 {
        Ok(lambda)
    } else {
        Err(DetectorError::config(
            "hazard_rate",
            format!(
                "expected run length must be finite and >= 1, got {lambda}"
            ),
        ))
    }
}

/// Logistic Hazard parameters with `compute`
///
/// LH(x, h, a, b) = logistic(h) * logistic(a * x + b)
///
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
#[must_use]
pub struct LogisticHazard {
    /// Logit of the overall scale; raising it raises the hazard at every
    /// run length.
    h: f64,
    /// Scale Term (Higher means the slope of the logistic is higher).
    a: f64,
    /// Translation term (increasing moves the logistic to the left).
    b: f64,
}

impl LogisticHazard {
    /// Create a new `LogisticHazard`
    pub fn new(h: f64, a: f64, b: f64) -> Self {
        Self { h, a, b }
    }

    /// Compute with the specified parameters
    #[must_use]
    pub fn compute(&self, i: f64) -> f64 {
        let h = logistic(self.h);
        let lp = logistic(self.a * i + self.b);
        h * lp
    }
}

impl Hazard for LogisticHazard {
    fn hazard(&self, run_length: usize) -> f64 {
        self.compute(run_length as f64)
    }
}

#[inline]
fn logistic(x: f64) -> f64 {
    (1.0 + (-x).exp()).recip()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_hazard_ignores_run_length() {
        let h = constant_hazard(250.0);
        assert::close(h.hazard(0), 1.0 / 250.0, 1E-15);
        assert::close(h.hazard(10_000), 1.0 / 250.0, 1E-15);
    }

    #[test]
    fn hazard_rate_must_be_a_timescale() {
        assert!(check_hazard_rate(2.0).is_ok());
        assert!(check_hazard_rate(1.0).is_ok());
        assert!(check_hazard_rate(0.5).is_err());
        assert!(check_hazard_rate(f64::NAN).is_err());
        assert!(check_hazard_rate(f64::INFINITY).is_err());
    }

    #[test]
    fn logistic_hazard_is_bounded_and_monotone() {
        let lh = LogisticHazard::new(0.0, 1.0, -5.0);
        let hs: Vec<f64> = (0..20).map(|r| lh.hazard(r)).collect();
        assert!(hs.iter().all(|h| (0.0..=0.5).contains(h)));
        assert!(hs.windows(2).all(|w| w[0] < w[1]));
        assert::close(lh.hazard(5), 0.25, 1E-12);
    }
}

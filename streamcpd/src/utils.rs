//! General Utilities

use crate::error::{DetectorError, Result};

/// Reject NaN and infinite observations.
///
/// # Errors
/// Returns [`DetectorError::InvalidObservation`] if `x` is not finite.
#[inline]
pub fn check_observation(x: f64) -> Result<f64> {
    if x.is_finite() {
        Ok(x)
    } else {
        Err(DetectorError::InvalidObservation(x))
    }
}

/// Numerically stable `ln(Σ exp(xs))`.
///
/// Terms equal to `-∞` (zero mass) are ignored, so a slice made only of them
/// yields `-∞` instead of `NaN`.
#[must_use]
pub fn ln_sum_exp(xs: &[f64]) -> f64 {
    let max = xs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY || max.is_nan() {
        return max;
    }
    let sum: f64 = xs
        .iter()
        .filter(|x| **x > f64::NEG_INFINITY)
        .map(|x| (x - max).exp())
        .sum();
    max + sum.ln()
}

/// Turn log-weights into probabilities summing to one, in place.
///
/// Returns the log normalizing constant.
///
/// # Errors
/// If the normalizing constant is not finite (every weight was `-∞` or some
/// weight was `NaN`/`+∞`), a [`DetectorError::NumericalDegeneracy`] is
/// returned and `ln_weights` is left untouched.
pub(crate) fn normalize_ln_weights(
    ln_weights: &mut [f64],
    context: &'static str,
) -> Result<f64> {
    let ln_z = ln_sum_exp(ln_weights);
    if !ln_z.is_finite() {
        return Err(DetectorError::degenerate(context, ln_z));
    }
    ln_weights.iter_mut().for_each(|w| *w = (*w - ln_z).exp());
    Ok(ln_z)
}

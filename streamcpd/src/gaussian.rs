//! Sufficient statistics for Normal observation models.
//!
//! [`GaussianStats`] is the plain `(mean, variance)` record used by the
//! mixture detector. [`NormalGammaStats`] is the Normal-Gamma conjugate
//! quadruple tracked per run length by the Bayesian detector.

use crate::error::{finite, positive, DetectorError, Result};
use rv::dist::{Gaussian, NormalGamma, StudentsT};
use rv::traits::Rv;

// Beyond this many scale units a squared deviation overflows or swamps
// the `1 +` of the Student-t kernel.
const LARGE_DEVIATION: f64 = 1E150;

#[cfg(feature = "serde1")]
use serde::{Deserialize, Serialize};

/// Mean and variance of a Normal distribution.
#[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GaussianStats {
    mean: f64,
    variance: f64,
}

impl GaussianStats {
    /// Create a new `GaussianStats`.
    ///
    /// # Errors
    /// The mean must be finite and the variance finite and strictly positive.
    pub fn new(mean: f64, variance: f64) -> Result<Self> {
        Ok(Self {
            mean: finite("mean", mean)?,
            variance: positive("variance", variance)?,
        })
    }

    /// Create a new `GaussianStats` from a mean and a standard deviation.
    ///
    /// # Errors
    /// The mean must be finite and the standard deviation finite and strictly
    /// positive.
    pub fn from_std_dev(mean: f64, std_dev: f64) -> Result<Self> {
        let std_dev = positive("std_dev", std_dev)?;
        Self::new(mean, std_dev * std_dev)
    }

    pub(crate) fn new_unchecked(mean: f64, variance: f64) -> Self {
        Self { mean, variance }
    }

    /// Mean
    #[must_use]
    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Variance
    #[must_use]
    pub fn variance(&self) -> f64 {
        self.variance
    }

    /// Standard deviation
    #[must_use]
    pub fn std_dev(&self) -> f64 {
        self.variance.sqrt()
    }

    /// Log density of `x` under this Normal.
    #[must_use]
    pub fn ln_pdf(&self, x: f64) -> f64 {
        Gaussian::new_unchecked(self.mean, self.std_dev()).ln_f(&x)
    }
}

/// Normal-Gamma sufficient statistics.
///
/// The mean of the observations is `N(mu, 1 / (kappa * tau))` and the
/// precision `tau` is `Gamma(alpha, beta)` (shape, rate). Stored as an
/// `rv` [`NormalGamma`] with `m = mu`, `r = kappa`, `s = 2 beta` and
/// `v = 2 alpha`.
#[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct NormalGammaStats {
    ng: NormalGamma,
}

impl Default for NormalGammaStats {
    fn default() -> Self {
        Self {
            ng: NormalGamma::new_unchecked(0.0, 1.0, 2.0, 2.0),
        }
    }
}

impl NormalGammaStats {
    /// Create a new set of Normal-Gamma statistics.
    ///
    /// # Errors
    /// `mu` must be finite; `kappa`, `alpha` and `beta` must be finite and
    /// strictly positive.
    ///
    /// # Example
    /// ```rust
    /// use streamcpd::NormalGammaStats;
    ///
    /// let prior = NormalGammaStats::new(0.0, 1.0, 1.0, 1.0).unwrap();
    /// // The predictive of an untouched unit prior is a Student-t with two
    /// // degrees of freedom and scale sqrt(2), peaking at 1/4.
    /// assert!((prior.ln_pp(0.0).exp() - 0.25).abs() < 1E-12);
    ///
    /// assert!(NormalGammaStats::new(0.0, 0.0, 1.0, 1.0).is_err());
    /// ```
    pub fn new(mu: f64, kappa: f64, alpha: f64, beta: f64) -> Result<Self> {
        let mu = finite("mu", mu)?;
        let kappa = positive("kappa", kappa)?;
        let alpha = positive("alpha", alpha)?;
        let beta = positive("beta", beta)?;
        NormalGamma::new(mu, kappa, 2.0 * beta, 2.0 * alpha)
            .map(Self::from)
            .map_err(|err| DetectorError::config("prior", err.to_string()))
    }

    /// The underlying `rv` distribution.
    #[must_use]
    pub fn normal_gamma(&self) -> &NormalGamma {
        &self.ng
    }

    /// Posterior mean of the observation mean.
    #[must_use]
    pub fn mu(&self) -> f64 {
        self.ng.m()
    }

    /// Pseudo-count on the mean.
    #[must_use]
    pub fn kappa(&self) -> f64 {
        self.ng.r()
    }

    /// Shape of the precision prior.
    #[must_use]
    pub fn alpha(&self) -> f64 {
        0.5 * self.ng.v()
    }

    /// Rate of the precision prior.
    #[must_use]
    pub fn beta(&self) -> f64 {
        0.5 * self.ng.s()
    }

    /// Conjugate update with one observation.
    ///
    /// Uses the centred form `s' = s + r (x - m)^2 / (r + 1)`, which stays
    /// accurate when the data sit far from zero. A squared deviation too
    /// large to represent saturates `s` at `f64::MAX`.
    #[must_use]
    pub fn observe(&self, x: f64) -> Self {
        let (m, r, s, v) = (self.ng.m(), self.ng.r(), self.ng.s(), self.ng.v());
        let r_n = r + 1.0;
        let dx = x - m;
        let ds = (dx * (r / r_n)) * dx;
        Self {
            ng: NormalGamma::new_unchecked(
                r.mul_add(m, x) / r_n,
                r_n,
                (s + ds).min(f64::MAX),
                v + 1.0,
            ),
        }
    }

    /// Degrees of freedom of the Student-t posterior predictive.
    #[must_use]
    pub fn degrees_of_freedom(&self) -> f64 {
        self.ng.v()
    }

    /// Squared scale of the Student-t posterior predictive.
    #[must_use]
    pub fn predictive_scale2(&self) -> f64 {
        let scale = self.predictive_scale();
        scale * scale
    }

    // sqrt(s (r + 1) / (v r)), taken factor by factor so a saturated `s`
    // still gives a finite scale.
    fn predictive_scale(&self) -> f64 {
        let (r, s, v) = (self.ng.r(), self.ng.s(), self.ng.v());
        s.sqrt() * ((r + 1.0) / (v * r)).sqrt()
    }

    /// Log posterior predictive density of `x`.
    ///
    /// \[
    ///     x \sim t_{2\alpha}\left(\mu, \frac{\beta(\kappa + 1)}{\alpha\kappa}\right)
    /// \]
    ///
    /// Deviations whose square does not fit in an `f64` use the tail
    /// asymptote `(1 + d^2) ~ d^2`, so the density stays finite for every
    /// finite `x`.
    #[must_use]
    pub fn ln_pp(&self, x: f64) -> f64 {
        let v = self.ng.v();
        let scale = self.predictive_scale();
        let t = StudentsT::new_unchecked(v);
        let z = (x - self.ng.m()) / scale;
        let d = z.abs() / v.sqrt();

        let ln_t = if d > LARGE_DEVIATION {
            t.ln_f(&0.0_f64) - (v + 1.0) * d.ln()
        } else {
            t.ln_f(&z)
        };
        ln_t - scale.ln()
    }
}

impl From<NormalGamma> for NormalGammaStats {
    fn from(ng: NormalGamma) -> Self {
        Self { ng }
    }
}

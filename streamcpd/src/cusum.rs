//! One-sided cumulative sum (CUSUM) control chart
//!
//! Page, E. S. (1954). "Continuous Inspection Schemes".
//! Biometrika 41 (1/2): 100–115.
//!
//! The statistic accumulates how far observations sit above the reference
//! mean, less a slack of `alpha` standard deviations per step, and signals
//! once it exceeds `threshold` standard deviations.

use crate::error::{finite, positive, DetectorError, Result};
use crate::gaussian::GaussianStats;
use crate::traits::Detector;
use crate::utils::check_observation;

#[cfg(feature = "serde1")]
use serde::{Deserialize, Serialize};

/// What happens to the statistic once it crosses the decision cutoff.
#[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ResetPolicy {
    /// Keep accumulating; a sustained shift signals on every observation.
    #[default]
    Accumulate,
    /// Restart from zero on the update following an alarm. The observation
    /// that crossed the cutoff is still reported.
    ResetOnAlarm,
}

/// Construction parameters for [`CusumDetector`].
#[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde1", serde(default))]
#[derive(Clone, Debug, PartialEq)]
pub struct CusumConfig {
    /// Reference mean.
    pub mean: f64,
    /// Reference variance.
    pub variance: f64,
    /// Slack, in standard deviations, discounted from every step.
    pub alpha: f64,
    /// Decision threshold, in standard deviations.
    pub threshold: f64,
    /// Behaviour after an alarm.
    pub reset_policy: ResetPolicy,
}

impl Default for CusumConfig {
    fn default() -> Self {
        Self {
            mean: 0.0,
            variance: 1.0,
            alpha: 0.5,
            threshold: 3.0,
            reset_policy: ResetPolicy::Accumulate,
        }
    }
}

impl CusumConfig {
    /// Replace the reference distribution.
    #[must_use]
    pub fn with_reference(self, mean: f64, variance: f64) -> Self {
        Self {
            mean,
            variance,
            ..self
        }
    }

    /// Change the slack.
    #[must_use]
    pub fn with_alpha(self, alpha: f64) -> Self {
        Self { alpha, ..self }
    }

    /// Change the decision threshold.
    #[must_use]
    pub fn with_threshold(self, threshold: f64) -> Self {
        Self { threshold, ..self }
    }

    /// Change the reset policy.
    #[must_use]
    pub fn with_reset_policy(self, reset_policy: ResetPolicy) -> Self {
        Self {
            reset_policy,
            ..self
        }
    }
}

/// One-sided CUSUM detector.
///
/// Not internally synchronized: one detector serves one stream.
#[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct CusumDetector {
    reference: GaussianStats,
    alpha: f64,
    threshold: f64,
    reset_policy: ResetPolicy,
    /// Cumulative statistic, never negative.
    statistic: f64,
    /// Set when the last update alarmed under `ResetOnAlarm`.
    pending_reset: bool,
    alarms: usize,
    t: usize,
}

impl CusumDetector {
    /// Create a new CUSUM detector against the reference `N(mean, variance)`.
    ///
    /// # Errors
    /// A non-finite `mean`, a non-positive `variance` or `threshold`, or a
    /// negative `alpha`.
    ///
    /// # Example
    /// ```rust
    /// use streamcpd::CusumDetector;
    ///
    /// let mut cusum = CusumDetector::new(0.0, 1.0, 0.5, 3.0).unwrap();
    /// for x in [0.2, -0.1, 0.3] {
    ///     cusum.update(x).unwrap();
    /// }
    /// assert!(cusum.statistic() <= cusum.decision_cutoff());
    ///
    /// cusum.update(10.0).unwrap();
    /// assert!(cusum.predict(10.0).unwrap() > cusum.decision_cutoff());
    /// ```
    pub fn new(
        mean: f64,
        variance: f64,
        alpha: f64,
        threshold: f64,
    ) -> Result<Self> {
        let reference = GaussianStats::new(mean, variance)?;
        let alpha = finite("alpha", alpha)?;
        if alpha < 0.0 {
            return Err(DetectorError::config(
                "alpha",
                format!("slack must not be negative, got {alpha}"),
            ));
        }
        let threshold = positive("threshold", threshold)?;
        log::debug!(
            "cusum: reference = {reference:?}, alpha = {alpha}, \
             threshold = {threshold}"
        );

        Ok(Self {
            reference,
            alpha,
            threshold,
            reset_policy: ResetPolicy::default(),
            statistic: 0.0,
            pending_reset: false,
            alarms: 0,
            t: 0,
        })
    }

    /// Create a detector from a [`CusumConfig`].
    ///
    /// # Errors
    /// See [`CusumDetector::new`].
    pub fn from_config(config: &CusumConfig) -> Result<Self> {
        Self::new(config.mean, config.variance, config.alpha, config.threshold)
            .map(|cusum| cusum.with_reset_policy(config.reset_policy))
    }

    /// Set the behaviour after an alarm.
    #[must_use]
    pub fn with_reset_policy(self, reset_policy: ResetPolicy) -> Self {
        Self {
            reset_policy,
            ..self
        }
    }

    /// Fold `x` into the cumulative statistic.
    ///
    /// # Errors
    /// A non-finite `x`, or a statistic that overflows. Either way the
    /// detector is left untouched.
    pub fn update(&mut self, x: f64) -> Result<()> {
        let x = check_observation(x)?;
        let sd = self.reference.std_dev();

        let start = if self.pending_reset { 0.0 } else { self.statistic };
        let statistic =
            (start + (x - self.reference.mean()) - self.alpha * sd).max(0.0);
        if !statistic.is_finite() {
            return Err(DetectorError::degenerate("cusum statistic", statistic));
        }

        self.statistic = statistic;
        self.pending_reset = false;
        self.t += 1;

        if self.statistic > self.decision_cutoff() {
            self.alarms += 1;
            self.pending_reset = self.reset_policy == ResetPolicy::ResetOnAlarm;
        }
        log::trace!("cusum: t = {}, x = {x}, S = {}", self.t, self.statistic);
        Ok(())
    }

    /// The current cumulative statistic.
    ///
    /// # Errors
    /// A non-finite `x`.
    pub fn predict(&self, x: f64) -> Result<f64> {
        check_observation(x)?;
        Ok(self.statistic)
    }

    /// Value the statistic must exceed to signal: `threshold * std_dev`.
    #[must_use]
    pub fn decision_cutoff(&self) -> f64 {
        self.threshold * self.reference.std_dev()
    }

    /// The current cumulative statistic.
    #[must_use]
    pub fn statistic(&self) -> f64 {
        self.statistic
    }

    /// Number of updates that ended above the decision cutoff.
    #[must_use]
    pub fn alarms(&self) -> usize {
        self.alarms
    }

    /// Number of observations consumed since construction or the last reset.
    #[must_use]
    pub fn observations(&self) -> usize {
        self.t
    }

    /// The reference distribution.
    #[must_use]
    pub fn reference(&self) -> &GaussianStats {
        &self.reference
    }

    /// Restart the detector, keeping its parameters.
    pub fn reset(&mut self) {
        log::debug!("cusum: reset after {} observations", self.t);
        self.statistic = 0.0;
        self.pending_reset = false;
        self.alarms = 0;
        self.t = 0;
    }
}

impl Detector for CusumDetector {
    fn step(&mut self, observation: f64) -> Result<()> {
        self.update(observation)
    }

    fn score(&self, observation: f64) -> Result<f64> {
        self.predict(observation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generators;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    fn run(cusum: &mut CusumDetector, data: &[f64]) -> Vec<bool> {
        data.iter()
            .map(|&x| {
                cusum.update(x).unwrap();
                cusum.predict(x).unwrap() > cusum.decision_cutoff()
            })
            .collect()
    }

    #[test]
    fn quiet_stream_never_alarms() {
        let mut rng = SmallRng::seed_from_u64(0x1234);
        let data =
            generators::normal_sequence(&mut rng, 0.0, 0.1, 1000).unwrap();

        let mut cusum = CusumDetector::new(0.0, 1.0, 0.95, 5.0).unwrap();
        assert!(run(&mut cusum, &data).iter().all(|f| !f));
        assert::close(cusum.statistic(), 0.0, 1E-12);
        assert_eq!(cusum.alarms(), 0);
    }

    #[test]
    fn sustained_shift_keeps_alarming() {
        let mut rng = SmallRng::seed_from_u64(0x1234);
        let data =
            generators::normal_sequence(&mut rng, 50.0, 1.0, 1000).unwrap();

        let mut cusum = CusumDetector::new(0.0, 1.0, 0.95, 5.0).unwrap();
        let flags = run(&mut cusum, &data);
        assert!(flags[10..].iter().all(|f| *f));
        assert_eq!(cusum.observations(), 1000);
    }

    #[test]
    fn recursion_matches_hand_computation() {
        let mut cusum = CusumDetector::new(1.0, 4.0, 0.5, 3.0).unwrap();
        // slack = alpha * sd = 1
        cusum.update(3.0).unwrap();
        assert::close(cusum.statistic(), 1.0, 1E-12);
        cusum.update(0.0).unwrap();
        assert::close(cusum.statistic(), 0.0, 1E-12);
        cusum.update(0.0).unwrap();
        assert::close(cusum.statistic(), 0.0, 1E-12);
        cusum.update(6.0).unwrap();
        assert::close(cusum.statistic(), 4.0, 1E-12);
        cusum.update(5.0).unwrap();
        assert::close(cusum.statistic(), 7.0, 1E-12);
        assert::close(cusum.decision_cutoff(), 6.0, 1E-12);
        assert_eq!(cusum.alarms(), 1);
    }

    #[test]
    fn reset_on_alarm_restarts_after_reporting() {
        let data = [10.0, 0.0, 0.0, 10.0];

        let mut accumulate = CusumDetector::new(0.0, 1.0, 0.5, 3.0).unwrap();
        assert_eq!(run(&mut accumulate, &data), vec![true, true, true, true]);

        let mut resetting = CusumDetector::new(0.0, 1.0, 0.5, 3.0)
            .unwrap()
            .with_reset_policy(ResetPolicy::ResetOnAlarm);
        assert_eq!(run(&mut resetting, &data), vec![true, false, false, true]);
        assert_eq!(resetting.alarms(), 2);
    }

    #[test]
    fn reset_restarts_the_statistic() {
        let mut cusum = CusumDetector::new(0.0, 1.0, 0.5, 3.0).unwrap();
        cusum.update(10.0).unwrap();
        cusum.reset();
        assert_eq!(cusum.statistic(), 0.0);
        assert_eq!(cusum.observations(), 0);
        assert_eq!(cusum.alarms(), 0);
    }

    #[test]
    fn invalid_parameters_are_rejected() {
        assert!(CusumDetector::new(0.0, 0.0, 0.5, 3.0).is_err());
        assert!(CusumDetector::new(0.0, -1.0, 0.5, 3.0).is_err());
        assert!(CusumDetector::new(0.0, 1.0, 0.5, 0.0).is_err());
        assert!(CusumDetector::new(0.0, 1.0, -0.1, 3.0).is_err());
        assert!(CusumDetector::new(f64::NAN, 1.0, 0.5, 3.0).is_err());
        assert!(CusumDetector::from_config(&CusumConfig::default()).is_ok());
    }

    #[test]
    fn invalid_observation_leaves_state_untouched() {
        let mut cusum = CusumDetector::new(0.0, 1.0, 0.5, 3.0).unwrap();
        cusum.update(2.0).unwrap();
        let before = cusum.clone();
        assert!(matches!(
            cusum.update(f64::NAN),
            Err(DetectorError::InvalidObservation(_))
        ));
        assert!(cusum.predict(f64::INFINITY).is_err());
        assert_eq!(cusum, before);
    }

    #[test]
    fn overflowing_statistic_is_degenerate() {
        let mut cusum = CusumDetector::new(0.0, 1.0, 0.5, 3.0).unwrap();
        cusum.update(1.7E308).unwrap();
        assert!(cusum.statistic().is_finite());
        let before = cusum.clone();

        assert!(matches!(
            cusum.update(1.7E308),
            Err(DetectorError::NumericalDegeneracy {
                context: "cusum statistic",
                ..
            })
        ));
        assert_eq!(cusum, before);
        assert_eq!(cusum.observations(), 1);

        // A reset makes the detector usable again
        cusum.reset();
        cusum.update(1.7E308).unwrap();
    }
}

//! Online Expectation-Maximization over a Gaussian mixture
//!
//! Component 0 describes the normal population, every other component an
//! abnormal one. Each observation is absorbed into running sufficient
//! statistics (pseudo-count, mean, centred sum of squares) weighted by its
//! responsibilities, so no history is kept.

use crate::error::{positive, DetectorError, Result};
use crate::gaussian::GaussianStats;
use crate::traits::Detector;
use crate::utils::{check_observation, normalize_ln_weights};
use ndarray::{Array1, ArrayView1, Zip};
use std::f64::consts::PI;

#[cfg(feature = "serde1")]
use serde::{Deserialize, Serialize};

const DEFAULT_MAX_EPOCHS: u32 = 100;
const DEFAULT_EARLY_STOP_DELTA: f64 = 1E-8;
const DEFAULT_VARIANCE_FLOOR: f64 = 1E-6;
const DEFAULT_DECISION_CUTOFF: f64 = 0.95;

fn default_max_epochs() -> u32 {
    DEFAULT_MAX_EPOCHS
}

fn default_true() -> bool {
    true
}

fn default_early_stop_delta() -> f64 {
    DEFAULT_EARLY_STOP_DELTA
}

fn default_variance_floor() -> f64 {
    DEFAULT_VARIANCE_FLOOR
}

fn default_decision_cutoff() -> f64 {
    DEFAULT_DECISION_CUTOFF
}

/// Construction parameters for [`EmMixtureDetector`].
#[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct EmConfig {
    /// Parameters of the normal population.
    pub normal: GaussianStats,
    /// Parameters of the abnormal populations.
    pub abnormal: Vec<GaussianStats>,
    /// Labelled sample size behind each component, normal first.
    pub sample_sizes: Vec<usize>,
    /// Initial mixture weights, normal first. Defaults to the normalized
    /// sample sizes.
    #[cfg_attr(feature = "serde1", serde(default))]
    pub prior_weights: Option<Vec<f64>>,
    /// Upper bound on EM iterations per observation.
    #[cfg_attr(feature = "serde1", serde(default = "default_max_epochs"))]
    pub max_epochs: u32,
    /// Stop iterating once the log-likelihood settles.
    #[cfg_attr(feature = "serde1", serde(default = "default_true"))]
    pub early_stopping: bool,
    /// Log-likelihood change under which the fit has converged.
    #[cfg_attr(feature = "serde1", serde(default = "default_early_stop_delta"))]
    pub early_stop_delta: f64,
    /// Smallest variance a component may take.
    #[cfg_attr(feature = "serde1", serde(default = "default_variance_floor"))]
    pub variance_floor: f64,
    /// Observations whose normal-membership probability falls under this
    /// value are abnormal.
    #[cfg_attr(feature = "serde1", serde(default = "default_decision_cutoff"))]
    pub decision_cutoff: f64,
}

impl EmConfig {
    /// Configuration with default iteration settings.
    #[must_use]
    pub fn new(
        normal: GaussianStats,
        abnormal: Vec<GaussianStats>,
        sample_sizes: Vec<usize>,
    ) -> Self {
        Self {
            normal,
            abnormal,
            sample_sizes,
            prior_weights: None,
            max_epochs: default_max_epochs(),
            early_stopping: default_true(),
            early_stop_delta: default_early_stop_delta(),
            variance_floor: default_variance_floor(),
            decision_cutoff: default_decision_cutoff(),
        }
    }

    /// Start from explicit mixture weights instead of the sample sizes.
    #[must_use]
    pub fn with_prior_weights(self, prior_weights: Vec<f64>) -> Self {
        Self {
            prior_weights: Some(prior_weights),
            ..self
        }
    }

    /// Change the iteration bound.
    #[must_use]
    pub fn with_max_epochs(self, max_epochs: u32) -> Self {
        Self { max_epochs, ..self }
    }

    /// Enable or disable early stopping.
    #[must_use]
    pub fn with_early_stopping(self, early_stopping: bool) -> Self {
        Self {
            early_stopping,
            ..self
        }
    }

    /// Change the convergence tolerance.
    #[must_use]
    pub fn with_early_stop_delta(self, early_stop_delta: f64) -> Self {
        Self {
            early_stop_delta,
            ..self
        }
    }

    /// Change the variance floor.
    #[must_use]
    pub fn with_variance_floor(self, variance_floor: f64) -> Self {
        Self {
            variance_floor,
            ..self
        }
    }

    /// Change the decision cutoff.
    #[must_use]
    pub fn with_decision_cutoff(self, decision_cutoff: f64) -> Self {
        Self {
            decision_cutoff,
            ..self
        }
    }
}

/// Snapshot of the fitted mixture.
#[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct MixtureState {
    /// Mixture weights, normal component first.
    pub weights: Vec<f64>,
    /// Component parameters, normal component first.
    pub components: Vec<GaussianStats>,
    /// EM iterations run for the latest observation.
    pub epoch_count: u32,
    /// Whether the latest observation reached convergence.
    pub converged: bool,
}

/// Per-component running sufficient statistics.
#[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq)]
struct RunningStats {
    counts: Array1<f64>,
    means: Array1<f64>,
    m2s: Array1<f64>,
}

impl RunningStats {
    /// Weighted Welford update with `x` split across components by `resp`.
    ///
    /// A centred sum of squares too large to represent saturates at
    /// `f64::MAX`.
    fn absorb(&self, x: f64, resp: &Array1<f64>) -> Self {
        let counts = &self.counts + resp;
        let deltas = self.means.mapv(|m| x - m);
        let means = Zip::from(&self.means)
            .and(resp)
            .and(&deltas)
            .and(&counts)
            .map_collect(|&m, &r, &d, &n| m + r * d / n);
        let m2s = Zip::from(&self.m2s)
            .and(resp)
            .and(&deltas)
            .and(&means)
            .map_collect(|&m2, &r, &d, &m| {
                (r * d).mul_add(x - m, m2).min(f64::MAX)
            });
        Self {
            counts,
            means,
            m2s,
        }
    }

    fn variances(&self, floor: f64) -> Array1<f64> {
        Zip::from(&self.m2s)
            .and(&self.counts)
            .map_collect(|&m2, &n| (m2 / n).max(floor))
    }

    fn weights(&self) -> Array1<f64> {
        &self.counts / self.counts.sum()
    }

    /// Expected complete-data log-likelihood of the pseudo-dataset.
    fn ln_likelihood(
        &self,
        weights: &Array1<f64>,
        variances: &Array1<f64>,
    ) -> f64 {
        Zip::from(&self.counts)
            .and(&self.m2s)
            .and(weights)
            .and(variances)
            .fold(0.0, |acc, &n, &m2, &w, &v| {
                acc + n * w.ln()
                    - 0.5 * n * (2.0 * PI * v).ln()
                    - m2 / (2.0 * v)
            })
    }
}

/// Streaming Gaussian mixture detector fitted by online EM.
///
/// Not internally synchronized: one detector serves one stream.
#[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct EmMixtureDetector {
    stats: RunningStats,
    weights: Array1<f64>,
    components: Vec<GaussianStats>,
    max_epochs: u32,
    early_stopping: bool,
    early_stop_delta: f64,
    variance_floor: f64,
    epoch_count: u32,
    converged: bool,
    t: usize,
}

impl EmMixtureDetector {
    /// Build a mixture from labelled population summaries.
    ///
    /// # Parameters
    /// * `normal_params` - The normal population.
    /// * `abnormal_params` - One or more abnormal populations.
    /// * `component_sample_sizes` - Sample size behind each component, normal
    ///   first. Normalized, they are the initial weights.
    /// * `max_epochs` - Upper bound on EM iterations per observation.
    ///
    /// # Errors
    /// No abnormal population, a sample size count that does not match the
    /// components, a zero sample size, or `max_epochs == 0`.
    ///
    /// # Example
    /// ```rust
    /// use streamcpd::{EmMixtureDetector, GaussianStats};
    ///
    /// let normal = GaussianStats::new(0.0, 1.0).unwrap();
    /// let abnormal = [GaussianStats::from_std_dev(100.0, 2.0).unwrap()];
    /// let sizes = [70, 30];
    /// let mut em =
    ///     EmMixtureDetector::build(normal, &abnormal, &sizes, 100).unwrap();
    ///
    /// let converged = em.update_check_convergence(0.3, 1E-8).unwrap();
    /// assert!(converged);
    /// assert!(em.predict(0.3).unwrap() > 0.99);
    /// assert!(em.predict(99.0).unwrap() < 0.01);
    /// ```
    pub fn build(
        normal_params: GaussianStats,
        abnormal_params: &[GaussianStats],
        component_sample_sizes: &[usize],
        max_epochs: u32,
    ) -> Result<Self> {
        if abnormal_params.is_empty() {
            return Err(DetectorError::config(
                "abnormal_params",
                "at least one abnormal component is required",
            ));
        }
        if component_sample_sizes.len() != abnormal_params.len() + 1 {
            return Err(DetectorError::config(
                "component_sample_sizes",
                format!(
                    "expected {} sample sizes, got {}",
                    abnormal_params.len() + 1,
                    component_sample_sizes.len()
                ),
            ));
        }
        if let Some(k) = component_sample_sizes.iter().position(|&n| n == 0) {
            return Err(DetectorError::config(
                "component_sample_sizes",
                format!("component {k} has an empty sample"),
            ));
        }
        if max_epochs == 0 {
            return Err(DetectorError::config(
                "max_epochs",
                "at least one epoch is required",
            ));
        }

        let components: Vec<GaussianStats> = std::iter::once(normal_params)
            .chain(abnormal_params.iter().copied())
            .map(|c| GaussianStats::new(c.mean(), c.variance()))
            .collect::<Result<_>>()?;
        let counts: Array1<f64> =
            component_sample_sizes.iter().map(|&n| n as f64).collect();
        let means: Array1<f64> =
            components.iter().map(GaussianStats::mean).collect();
        let m2s: Array1<f64> = counts
            .iter()
            .zip(&components)
            .map(|(&n, c)| n * c.variance())
            .collect();
        let stats = RunningStats {
            counts,
            means,
            m2s,
        };
        let weights = stats.weights();
        log::debug!(
            "em: {} components, weights = {weights}, max_epochs = {max_epochs}",
            components.len()
        );

        Ok(Self {
            stats,
            weights,
            components,
            max_epochs,
            early_stopping: true,
            early_stop_delta: DEFAULT_EARLY_STOP_DELTA,
            variance_floor: DEFAULT_VARIANCE_FLOOR,
            epoch_count: 0,
            converged: false,
            t: 0,
        })
    }

    /// Build a mixture from labelled raw samples.
    ///
    /// Each component is fitted to its own sample (mean and population
    /// variance, floored at the default variance floor) and weighted by its
    /// sample size. Use [`EmMixtureDetector::with_prior_weights`] to start
    /// from other weights.
    ///
    /// # Errors
    /// An empty or non-finite sample, no abnormal sample, or
    /// `max_epochs == 0`.
    ///
    /// # Example
    /// ```rust
    /// use streamcpd::EmMixtureDetector;
    ///
    /// let normal = [0.0, -0.2, 0.2, -1.0, 1.0, -0.5, 0.5];
    /// let abnormal: [&[f64]; 1] = [&[50.0, 49.0, 51.0]];
    /// let em = EmMixtureDetector::from_samples(&normal, &abnormal, 100)
    ///     .unwrap()
    ///     .with_prior_weights(&[0.7, 0.3])
    ///     .unwrap();
    /// assert!(em.predict(0.1).unwrap() > 0.99);
    /// assert!(em.predict(50.5).unwrap() < 0.01);
    /// ```
    pub fn from_samples(
        normal_samples: &[f64],
        abnormal_samples: &[&[f64]],
        max_epochs: u32,
    ) -> Result<Self> {
        let normal = fit_component(normal_samples)?;
        let abnormal: Vec<GaussianStats> = abnormal_samples
            .iter()
            .map(|samples| fit_component(samples))
            .collect::<Result<_>>()?;
        let sizes: Vec<usize> = std::iter::once(normal_samples.len())
            .chain(abnormal_samples.iter().map(|samples| samples.len()))
            .collect();
        Self::build(normal, &abnormal, &sizes, max_epochs)
    }

    /// Replace the mixture weights, normal component first.
    ///
    /// The total pseudo-count behind the mixture is kept and split by
    /// `probabilities` (normalized), so later updates start from these
    /// weights. Component parameters are unchanged.
    ///
    /// # Errors
    /// A length that does not match the components, or a probability that
    /// is not finite and strictly positive.
    pub fn with_prior_weights(self, probabilities: &[f64]) -> Result<Self> {
        if probabilities.len() != self.components.len() {
            return Err(DetectorError::config(
                "prior_weights",
                format!(
                    "expected {} weights, got {}",
                    self.components.len(),
                    probabilities.len()
                ),
            ));
        }
        let probabilities: Array1<f64> = probabilities
            .iter()
            .map(|&p| positive("prior_weights", p))
            .collect::<Result<_>>()?;
        let weights = &probabilities / probabilities.sum();

        let counts = &weights * self.stats.counts.sum();
        let m2s: Array1<f64> = counts
            .iter()
            .zip(&self.components)
            .map(|(&n, c)| n * c.variance())
            .collect();
        let means = self.stats.means.clone();
        log::debug!("em: prior weights set to {weights}");

        Ok(Self {
            stats: RunningStats {
                counts,
                means,
                m2s,
            },
            weights,
            ..self
        })
    }

    /// Create a detector from an [`EmConfig`].
    ///
    /// # Errors
    /// See [`EmMixtureDetector::build`] and
    /// [`EmMixtureDetector::with_prior_weights`]; additionally a negative
    /// convergence tolerance or a non-positive variance floor.
    pub fn from_config(config: &EmConfig) -> Result<Self> {
        let em = Self::build(
            config.normal,
            &config.abnormal,
            &config.sample_sizes,
            config.max_epochs,
        )?;
        let em = match &config.prior_weights {
            Some(probabilities) => em.with_prior_weights(probabilities)?,
            None => em,
        };
        em.with_early_stopping(config.early_stopping)
            .with_early_stop_delta(config.early_stop_delta)?
            .with_variance_floor(config.variance_floor)
    }

    /// Enable or disable early stopping. When disabled every update runs
    /// all `max_epochs` iterations.
    #[must_use]
    pub fn with_early_stopping(self, early_stopping: bool) -> Self {
        Self {
            early_stopping,
            ..self
        }
    }

    /// Tolerance used by [`Detector::step`].
    ///
    /// # Errors
    /// A negative or non-finite `delta`.
    pub fn with_early_stop_delta(self, delta: f64) -> Result<Self> {
        Ok(Self {
            early_stop_delta: check_delta(delta)?,
            ..self
        })
    }

    /// Smallest variance a component may take.
    ///
    /// # Errors
    /// A non-positive or non-finite `floor`.
    pub fn with_variance_floor(self, floor: f64) -> Result<Self> {
        Ok(Self {
            variance_floor: positive("variance_floor", floor)?,
            ..self
        })
    }

    /// Absorb `x` and refit the mixture.
    ///
    /// Runs up to `max_epochs` EM iterations and returns whether the
    /// expected complete-data log-likelihood changed by less than `delta`
    /// between two consecutive iterations. Convergence needs at least two
    /// iterations.
    ///
    /// # Errors
    /// A non-finite `x`, a negative or non-finite `delta`, or a fit that
    /// stops being finite. On error the detector state is unchanged.
    pub fn update_check_convergence(
        &mut self,
        x: f64,
        delta: f64,
    ) -> Result<bool> {
        let x = check_observation(x)?;
        let delta = check_delta(delta)?;

        let mut weights = self.weights.clone();
        let mut components = self.components.clone();
        let mut stats = self.stats.clone();
        let mut prev_ln_likelihood: Option<f64> = None;
        let mut converged = false;
        let mut epochs = 0;

        for epoch in 1..=self.max_epochs {
            epochs = epoch;

            // E-step
            let resp = responsibilities(&weights, &components, x)?;

            // M-step
            stats = self.stats.absorb(x, &resp);
            let variances = stats.variances(self.variance_floor);
            weights = stats.weights();
            if let Some(m) = stats.means.iter().find(|m| !m.is_finite()) {
                return Err(DetectorError::degenerate("component mean", *m));
            }
            if let Some(v) = variances.iter().find(|v| !v.is_finite()) {
                return Err(DetectorError::degenerate("component variance", *v));
            }
            components = stats
                .means
                .iter()
                .zip(&variances)
                .map(|(&m, &v)| GaussianStats::new_unchecked(m, v))
                .collect();

            let ln_likelihood = stats.ln_likelihood(&weights, &variances);
            if !ln_likelihood.is_finite() {
                return Err(DetectorError::degenerate(
                    "mixture log-likelihood",
                    ln_likelihood,
                ));
            }
            if prev_ln_likelihood
                .is_some_and(|prev| (ln_likelihood - prev).abs() < delta)
            {
                converged = true;
                if self.early_stopping {
                    break;
                }
            }
            prev_ln_likelihood = Some(ln_likelihood);
        }

        if !converged {
            log::debug!(
                "em: observation {} ({x}) did not converge in {epochs} epochs",
                self.t
            );
        }
        log::trace!("em: t = {}, x = {x}, weights = {weights}", self.t);

        self.stats = stats;
        self.weights = weights;
        self.components = components;
        self.epoch_count = epochs;
        self.converged = converged;
        self.t += 1;
        Ok(converged)
    }

    /// Posterior probability that `x` belongs to the normal component.
    ///
    /// # Errors
    /// A non-finite `x`, or densities that underflow for every component.
    pub fn predict(&self, x: f64) -> Result<f64> {
        let x = check_observation(x)?;
        let resp = responsibilities(&self.weights, &self.components, x)?;
        Ok(resp[0])
    }

    /// Mixture weights, normal component first.
    #[must_use]
    pub fn weights(&self) -> &[f64] {
        self.weights.as_slice().unwrap_or(&[])
    }

    /// Component parameters, normal component first.
    #[must_use]
    pub fn components(&self) -> &[GaussianStats] {
        &self.components
    }

    /// Snapshot of the fitted mixture.
    #[must_use]
    pub fn state(&self) -> MixtureState {
        MixtureState {
            weights: self.weights.to_vec(),
            components: self.components.clone(),
            epoch_count: self.epoch_count,
            converged: self.converged,
        }
    }

    /// EM iterations run for the latest observation.
    #[must_use]
    pub fn epoch_count(&self) -> u32 {
        self.epoch_count
    }

    /// Whether the latest observation reached convergence.
    #[must_use]
    pub fn converged(&self) -> bool {
        self.converged
    }

    /// Number of observations absorbed.
    #[must_use]
    pub fn observations(&self) -> usize {
        self.t
    }
}

fn check_delta(delta: f64) -> Result<f64> {
    if delta.is_finite() && delta >= 0.0 {
        Ok(delta)
    } else {
        Err(DetectorError::config(
            "early_stop_delta",
            format!("must be finite and non-negative, got {delta}"),
        ))
    }
}

/// Mean and population variance of a labelled sample.
fn fit_component(samples: &[f64]) -> Result<GaussianStats> {
    if let Some(&x) = samples.iter().find(|x| !x.is_finite()) {
        return Err(DetectorError::InvalidObservation(x));
    }
    let view = ArrayView1::from(samples);
    let mean = view.mean().ok_or_else(|| {
        DetectorError::config("samples", "every component needs a sample")
    })?;
    GaussianStats::new(mean, view.var(0.0).max(DEFAULT_VARIANCE_FLOOR))
}

/// Posterior component membership of `x`.
///
/// Log densities are taken relative to the component closest to `x` in
/// standard deviations: the shared `-z_min^2 / 2` cancels in the
/// normalization, so an observation far from every component still splits
/// by distance instead of underflowing everywhere.
fn responsibilities(
    weights: &Array1<f64>,
    components: &[GaussianStats],
    x: f64,
) -> Result<Array1<f64>> {
    let z: Vec<f64> = components
        .iter()
        .map(|c| ((x - c.mean()) / c.std_dev()).abs())
        .collect();
    let z_min = z.iter().copied().fold(f64::INFINITY, f64::min);

    let mut ln_resp: Vec<f64> = weights
        .iter()
        .zip(components)
        .zip(&z)
        .map(|((w, c), &z)| {
            // (z^2 - z_min^2) / 2 without squaring either
            let gap = z - z_min;
            let excess = if gap > 0.0 { 0.5 * gap * (z + z_min) } else { 0.0 };
            w.ln() - 0.5 * c.variance().ln() - excess
        })
        .collect();
    normalize_ln_weights(&mut ln_resp, "mixture responsibilities")?;
    Ok(Array1::from(ln_resp))
}

impl Detector for EmMixtureDetector {
    fn step(&mut self, observation: f64) -> Result<()> {
        self.update_check_convergence(observation, self.early_stop_delta)
            .map(|_| ())
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

    fn two_population_detector(early_stopping: bool) -> EmMixtureDetector {
        let normal = GaussianStats::new(0.0, 1.0).unwrap();
        let abnormal = [GaussianStats::from_std_dev(100.0, 2.0).unwrap()];
        EmMixtureDetector::build(normal, &abnormal, &[70, 30], 100)
            .unwrap()
            .with_early_stopping(early_stopping)
    }

    fn assert_mixture_invariants(em: &EmMixtureDetector) {
        assert::close(em.weights().iter().sum::<f64>(), 1.0, 1E-9);
        assert!(em.weights().iter().all(|w| *w >= 0.0));
        assert!(em.components().iter().all(|c| c.variance() > 0.0));
    }

    fn decisions(
        em: &mut EmMixtureDetector,
        data: &[f64],
        cutoff: f64,
    ) -> Vec<bool> {
        data.iter()
            .map(|&x| {
                em.update_check_convergence(x, 1E-8).unwrap();
                assert_mixture_invariants(em);
                em.predict(x).unwrap() < cutoff
            })
            .collect()
    }

    #[test]
    fn initial_weights_follow_sample_sizes() {
        let em = two_population_detector(true);
        approx::assert_relative_eq!(em.weights()[0], 0.7, epsilon = 1E-12);
        approx::assert_relative_eq!(em.weights()[1], 0.3, epsilon = 1E-12);
        assert_eq!(em.observations(), 0);
        assert!(!em.converged());
    }

    #[test]
    fn normal_stream_is_never_flagged() {
        let mut rng = SmallRng::seed_from_u64(0x1234);
        let data =
            generators::normal_sequence(&mut rng, 0.0, 1.0, 21_000).unwrap();

        for early_stopping in [true, false] {
            let mut em = two_population_detector(early_stopping);
            assert!(decisions(&mut em, &data, 0.01).iter().all(|f| !f));
            assert!(em.weights()[0] > 0.99);
        }
    }

    #[test]
    fn abnormal_stream_is_always_flagged() {
        let mut rng = SmallRng::seed_from_u64(0x1234);
        let data =
            generators::normal_sequence(&mut rng, 100.0, 2.0, 21_000).unwrap();

        for early_stopping in [true, false] {
            let mut em = two_population_detector(early_stopping);
            assert!(decisions(&mut em, &data, 0.01).iter().all(|f| *f));
            assert!(em.weights()[1] > 0.99);
        }
    }

    #[test]
    fn early_stopping_cuts_iterations() {
        let mut early = two_population_detector(true);
        assert!(early.update_check_convergence(0.1, 1E-8).unwrap());
        assert_eq!(early.epoch_count(), 2);

        let mut full = two_population_detector(false);
        assert!(full.update_check_convergence(0.1, 1E-8).unwrap());
        assert_eq!(full.epoch_count(), 100);

        assert_eq!(early.weights(), full.weights());
    }

    #[test]
    fn single_epoch_never_converges() {
        let normal = GaussianStats::new(0.0, 1.0).unwrap();
        let abnormal = [GaussianStats::new(5.0, 1.0).unwrap()];
        let mut em =
            EmMixtureDetector::build(normal, &abnormal, &[10, 10], 1).unwrap();
        assert!(!em.update_check_convergence(0.0, 1E-8).unwrap());
        assert_eq!(em.epoch_count(), 1);
        assert!(!em.state().converged);
    }

    #[test]
    fn overlapping_components_keep_invariants() {
        let mut rng = SmallRng::seed_from_u64(0xABCD);
        let data = generators::discontinuous_jump(
            &mut rng, 0.0, 1.0, 3.0, 1.0, 300, 600,
        )
        .unwrap();

        let normal = GaussianStats::new(0.0, 1.0).unwrap();
        let abnormal = [
            GaussianStats::new(3.0, 1.0).unwrap(),
            GaussianStats::new(-3.0, 2.0).unwrap(),
        ];
        let mut em =
            EmMixtureDetector::build(normal, &abnormal, &[50, 25, 25], 50)
                .unwrap();
        for &x in &data {
            em.update_check_convergence(x, 1E-8).unwrap();
            assert_mixture_invariants(&em);
            let p = em.predict(x).unwrap();
            assert!((0.0..=1.0).contains(&p));
        }
        assert_eq!(em.state().weights.len(), 3);
    }

    #[test]
    fn variance_floor_holds_for_a_collapsing_component() {
        let normal = GaussianStats::new(0.0, 1.0).unwrap();
        let abnormal = [GaussianStats::from_std_dev(100.0, 2.0).unwrap()];
        let mut em = EmMixtureDetector::build(normal, &abnormal, &[1, 1], 10)
            .unwrap()
            .with_variance_floor(0.5)
            .unwrap();
        for _ in 0..10 {
            em.update_check_convergence(0.0, 1E-8).unwrap();
        }
        assert::close(em.components()[0].variance(), 0.5, 1E-12);
    }

    #[test]
    fn build_rejects_malformed_populations() {
        let normal = GaussianStats::new(0.0, 1.0).unwrap();
        let abnormal = [GaussianStats::new(5.0, 1.0).unwrap()];

        assert!(EmMixtureDetector::build(normal, &[], &[1], 10).is_err());
        assert!(EmMixtureDetector::build(normal, &abnormal, &[1], 10).is_err());
        assert!(
            EmMixtureDetector::build(normal, &abnormal, &[1, 2, 3], 10).is_err()
        );
        assert!(
            EmMixtureDetector::build(normal, &abnormal, &[0, 2], 10).is_err()
        );
        assert!(matches!(
            EmMixtureDetector::build(normal, &abnormal, &[1, 2], 0),
            Err(DetectorError::Configuration { parameter: "max_epochs", .. })
        ));

        let config = EmConfig::new(normal, abnormal.to_vec(), vec![7, 3]);
        assert!(EmMixtureDetector::from_config(&config).is_ok());
        let no_floor = config.clone().with_variance_floor(0.0);
        assert!(EmMixtureDetector::from_config(&no_floor).is_err());
        let negative_delta = config.with_early_stop_delta(-1.0);
        assert!(EmMixtureDetector::from_config(&negative_delta).is_err());
    }

    #[test]
    fn invalid_inputs_leave_state_untouched() {
        let mut em = two_population_detector(true);
        em.update_check_convergence(0.5, 1E-8).unwrap();
        let before = em.clone();

        assert!(matches!(
            em.update_check_convergence(f64::NAN, 1E-8),
            Err(DetectorError::InvalidObservation(_))
        ));
        assert!(matches!(
            em.update_check_convergence(0.0, -1.0),
            Err(DetectorError::Configuration {
                parameter: "early_stop_delta",
                ..
            })
        ));
        assert!(em.predict(f64::INFINITY).is_err());
        assert_eq!(em, before);
    }

    #[test]
    fn huge_finite_observation_is_absorbed() {
        let mut rng = SmallRng::seed_from_u64(0x0DD);
        let data = generators::normal_sequence(&mut rng, 0.0, 1.0, 50).unwrap();

        let mut em = two_population_detector(true);
        for &x in &data[..25] {
            em.update_check_convergence(x, 1E-8).unwrap();
        }
        em.update_check_convergence(1E200, 1E-8).unwrap();
        assert_mixture_invariants(&em);
        assert!(em.components().iter().all(|c| c.variance().is_finite()));
        assert!(em.predict(1E200).unwrap() < 0.01);

        // The normal population is still recognized afterwards
        for &x in &data[25..] {
            em.update_check_convergence(x, 1E-8).unwrap();
            assert_mixture_invariants(&em);
            assert!(em.predict(x).unwrap() > 0.99);
        }
    }

    #[test]
    fn far_tails_split_by_distance() {
        let normal = GaussianStats::new(0.0, 4.0).unwrap();
        let abnormal = [GaussianStats::new(10.0, 1.0).unwrap()];
        let em =
            EmMixtureDetector::build(normal, &abnormal, &[1, 1], 10).unwrap();
        // Both squared distances overflow, the wider component still wins
        assert!(em.predict(-1E160).unwrap() > 0.99);
        assert!(em.predict(1E160).unwrap() > 0.99);
        // Same result as the direct formula where nothing underflows
        let direct = {
            let p0 = normal.ln_pdf(4.0).exp();
            let p1 = abnormal[0].ln_pdf(4.0).exp();
            p0 / (p0 + p1)
        };
        assert::close(em.predict(4.0).unwrap(), direct, 1E-12);
    }

    #[test]
    fn from_samples_fits_each_population() {
        let normal = [0.0, -0.2, 0.2, -1.0, 1.0, -0.5, 0.5];
        let abnormal: [&[f64]; 1] = [&[50.0, 49.0, 51.0]];
        let em = EmMixtureDetector::from_samples(&normal, &abnormal, 100)
            .unwrap();

        let fitted = em.components();
        assert::close(fitted[0].mean(), 0.0, 1E-12);
        assert::close(fitted[0].variance(), 2.58 / 7.0, 1E-12);
        assert::close(fitted[1].mean(), 50.0, 1E-12);
        assert::close(fitted[1].variance(), 2.0 / 3.0, 1E-12);
        assert::close(em.weights()[0], 0.7, 1E-12);
        assert::close(em.weights()[1], 0.3, 1E-12);

        // A single point has no spread of its own
        let single: [&[f64]; 1] = [&[50.0]];
        let em = EmMixtureDetector::from_samples(&normal, &single, 100)
            .unwrap();
        assert::close(
            em.components()[1].variance(),
            DEFAULT_VARIANCE_FLOOR,
            1E-15,
        );
    }

    #[test]
    fn from_samples_rejects_unusable_samples() {
        let normal = [0.0, 1.0];
        let empty: [&[f64]; 1] = [&[]];
        let nan: [&[f64]; 1] = [&[1.0, f64::NAN]];
        let good: [&[f64]; 1] = [&[5.0, 6.0]];

        assert!(EmMixtureDetector::from_samples(&[], &good, 10).is_err());
        assert!(EmMixtureDetector::from_samples(&normal, &empty, 10).is_err());
        assert!(matches!(
            EmMixtureDetector::from_samples(&normal, &nan, 10),
            Err(DetectorError::InvalidObservation(_))
        ));
        assert!(EmMixtureDetector::from_samples(&normal, &[], 10).is_err());
        assert!(EmMixtureDetector::from_samples(&normal, &good, 0).is_err());
    }

    #[test]
    fn prior_weights_replace_sample_sizes() {
        let normal: Vec<f64> = (0..10).map(|i| f64::from(i) * 0.1).collect();
        let abnormal: [&[f64]; 1] = [&[50.0, 49.0, 51.0, 50.5, 49.5]];
        let em = EmMixtureDetector::from_samples(&normal, &abnormal, 100)
            .unwrap();
        let components = em.components().to_vec();

        let em = em.with_prior_weights(&[7.0, 3.0]).unwrap();
        assert::close(em.weights()[0], 0.7, 1E-12);
        assert::close(em.weights()[1], 0.3, 1E-12);
        assert_eq!(em.components(), components.as_slice());

        assert!(em.clone().with_prior_weights(&[1.0]).is_err());
        assert!(em.clone().with_prior_weights(&[1.0, 0.0]).is_err());
        assert!(em.clone().with_prior_weights(&[1.0, f64::NAN]).is_err());

        let normal = GaussianStats::new(0.0, 1.0).unwrap();
        let abnormal = vec![GaussianStats::new(5.0, 1.0).unwrap()];
        let config = EmConfig::new(normal, abnormal, vec![9, 1])
            .with_prior_weights(vec![0.5, 0.5]);
        let em = EmMixtureDetector::from_config(&config).unwrap();
        assert::close(em.weights()[0], 0.5, 1E-12);
    }

    #[test]
    fn labelled_samples_drive_the_stream() {
        let mut rng = SmallRng::seed_from_u64(0x1234);
        let normal_data =
            generators::normal_sequence(&mut rng, 0.0, 1.0, 1000).unwrap();
        let abnormal_data =
            generators::normal_sequence(&mut rng, 50.0, 2.0, 1000).unwrap();

        let flagged = |data: &[f64]| {
            let normal = [0.0, -0.2, 0.2, -1.0, 1.0, -0.5, 0.5];
            let abnormal: [&[f64]; 1] = [&[50.0, 49.0, 51.0]];
            let mut em =
                EmMixtureDetector::from_samples(&normal, &abnormal, 100)
                    .unwrap()
                    .with_prior_weights(&[0.7, 0.3])
                    .unwrap();
            decisions(&mut em, data, 0.5).iter().filter(|f| **f).count()
        };

        let n = flagged(&normal_data);
        assert!(n <= normal_data.len() / 2, "flagged {n}");
        let n = flagged(&abnormal_data);
        assert!(n >= abnormal_data.len() / 2, "flagged {n}");
    }
}

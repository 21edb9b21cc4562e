//! Online Bayesian Change Point Detection
//!
//! This code is derived from
//! "Bayesian Online Changepoint Detection"; Ryan Adams, David `MacKay`; arXiv:0710.3742
//! Which can be found [here](https://arxiv.org/pdf/0710.3742.pdf).
//!
//! The observation model is a Normal with unknown mean and precision under a
//! Normal-Gamma conjugate prior, so every run length carries a
//! [`NormalGammaStats`] and is scored with its Student-t posterior predictive.

use crate::error::{DetectorError, Result};
use crate::gaussian::NormalGammaStats;
use crate::hazard::{check_hazard_rate, constant_hazard, Hazard};
use crate::traits::Detector;
use crate::utils::{check_observation, ln_sum_exp, normalize_ln_weights};

#[cfg(feature = "serde1")]
use serde::{Deserialize, Serialize};

/// Most run lengths a pruned posterior tracks unless told otherwise.
pub const DEFAULT_MAX_RUN_LENGTHS: usize = 1000;

/// Construction parameters for [`BocpdDetector`].
#[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde1", serde(default))]
#[derive(Clone, Debug, PartialEq)]
pub struct BocpdConfig {
    /// Shape of the precision prior.
    pub alpha: f64,
    /// Rate of the precision prior.
    pub beta: f64,
    /// Prior mean.
    pub mu: f64,
    /// Pseudo-count on the prior mean.
    pub kappa: f64,
    /// Expected run length; the constant hazard is `1 / lambda`.
    pub lambda: f64,
    /// Drop run lengths whose mass falls under `prune_threshold`.
    pub use_pruning: bool,
    /// Mass under which a run length is dropped.
    pub prune_threshold: f64,
    /// Most run lengths tracked while pruning. Longer runs are merged into
    /// the longest one kept.
    pub max_run_lengths: usize,
    /// Observations whose reference probability falls under this value are
    /// abnormal.
    pub decision_cutoff: f64,
}

impl Default for BocpdConfig {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            beta: 1.0,
            mu: 0.0,
            kappa: 1.0,
            lambda: 250.0,
            use_pruning: true,
            prune_threshold: 1E-10,
            max_run_lengths: DEFAULT_MAX_RUN_LENGTHS,
            decision_cutoff: 0.05,
        }
    }
}

impl BocpdConfig {
    /// Replace the Normal-Gamma prior.
    #[must_use]
    pub fn with_prior(
        self,
        alpha: f64,
        beta: f64,
        mu: f64,
        kappa: f64,
    ) -> Self {
        Self {
            alpha,
            beta,
            mu,
            kappa,
            ..self
        }
    }

    /// Change the expected run length.
    #[must_use]
    pub fn with_lambda(self, lambda: f64) -> Self {
        Self { lambda, ..self }
    }

    /// Enable pruning of run lengths with mass under `prune_threshold`.
    #[must_use]
    pub fn with_pruning(self, prune_threshold: f64) -> Self {
        Self {
            use_pruning: true,
            prune_threshold,
            ..self
        }
    }

    /// Change how many run lengths pruning keeps.
    #[must_use]
    pub fn with_max_run_lengths(self, max_run_lengths: usize) -> Self {
        Self {
            max_run_lengths,
            ..self
        }
    }

    /// Keep every run length.
    #[must_use]
    pub fn without_pruning(self) -> Self {
        Self {
            use_pruning: false,
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

/// One entry of the run-length posterior.
#[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq)]
struct RunLength {
    /// Observations since the change point that started this run.
    length: usize,
    /// Posterior probability of this run length.
    pr: f64,
    /// Statistics of the observations in this run, prior included.
    stats: NormalGammaStats,
}

/// Online Bayesian Change Point Detection state container.
///
/// Not internally synchronized: one detector serves one stream.
#[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct BocpdDetector {
    /// Statistics every new run starts from.
    prior: NormalGammaStats,
    /// Expected run length used by [`Detector::step`].
    lambda: f64,
    /// Whether negligible run lengths are dropped after each update.
    use_pruning: bool,
    /// Mass under which a run length is dropped.
    prune_threshold: f64,
    /// Most run lengths tracked while pruning.
    max_run_lengths: usize,
    /// Run-length posterior, ordered by run length.
    run_lengths: Vec<RunLength>,
    /// Number of observations consumed.
    t: usize,
}

impl BocpdDetector {
    /// Create a new Bocpd detector
    ///
    /// # Parameters
    /// * `alpha`, `beta`, `mu`, `kappa` - Normal-Gamma prior on the
    ///   observations.
    /// * `hazard_rate` - Expected run length `lambda`; `1 / lambda` is the
    ///   prior probability of any step being a change point.
    /// * `use_pruning` - Drop run lengths whose mass falls under
    ///   `prune_threshold` and track at most [`DEFAULT_MAX_RUN_LENGTHS`]
    ///   run lengths (see [`BocpdDetector::with_max_run_lengths`]).
    /// * `prune_threshold` - Mass under which a run length is dropped.
    ///
    /// # Errors
    /// Non-positive `alpha`, `beta` or `kappa`, a `hazard_rate` under one, or a
    /// `prune_threshold` outside `[0, 1)` are rejected.
    ///
    /// # Example
    /// ```rust
    /// use streamcpd::BocpdDetector;
    ///
    /// let mut cpd =
    ///     BocpdDetector::new(1.0, 1.0, 0.0, 2.0, 2.0, true, 1E-10).unwrap();
    /// for x in [0.1, -0.3, 0.2, 100.0] {
    ///     cpd.update(x, 2.0).unwrap();
    /// }
    /// // The jump to 100 is far better explained by the running segment
    /// // than by the prior.
    /// assert!(cpd.predict(100.0).unwrap() < 0.05);
    /// ```
    pub fn new(
        alpha: f64,
        beta: f64,
        mu: f64,
        kappa: f64,
        hazard_rate: f64,
        use_pruning: bool,
        prune_threshold: f64,
    ) -> Result<Self> {
        let prior = NormalGammaStats::new(mu, kappa, alpha, beta)?;
        let lambda = check_hazard_rate(hazard_rate)?;
        if !(0.0..1.0).contains(&prune_threshold) {
            return Err(DetectorError::config(
                "prune_threshold",
                format!("must lie in [0, 1), got {prune_threshold}"),
            ));
        }
        log::debug!(
            "bocpd: prior = {prior:?}, lambda = {lambda}, \
             pruning = {use_pruning} ({prune_threshold})"
        );

        let seed = Self::seed(prior.clone());
        Ok(Self {
            prior,
            lambda,
            use_pruning,
            prune_threshold,
            max_run_lengths: DEFAULT_MAX_RUN_LENGTHS,
            run_lengths: vec![seed],
            t: 0,
        })
    }

    /// Create a detector from a [`BocpdConfig`].
    ///
    /// # Errors
    /// See [`BocpdDetector::new`] and [`BocpdDetector::with_max_run_lengths`].
    pub fn from_config(config: &BocpdConfig) -> Result<Self> {
        Self::new(
            config.alpha,
            config.beta,
            config.mu,
            config.kappa,
            config.lambda,
            config.use_pruning,
            config.prune_threshold,
        )?
        .with_max_run_lengths(config.max_run_lengths)
    }

    /// Track at most `max_run_lengths` run lengths while pruning.
    ///
    /// When an update leaves more, every run longer than the
    /// `max_run_lengths`-th is merged into it: its mass is added to that
    /// slot and its statistics are dropped. Run length zero always stays.
    /// Without pruning the bound is ignored.
    ///
    /// # Errors
    /// Fewer than two run lengths.
    pub fn with_max_run_lengths(self, max_run_lengths: usize) -> Result<Self> {
        if max_run_lengths < 2 {
            return Err(DetectorError::config(
                "max_run_lengths",
                format!("must be at least 2, got {max_run_lengths}"),
            ));
        }
        Ok(Self {
            max_run_lengths,
            ..self
        })
    }

    // Before the first observation all mass sits on run length zero.
    fn seed(prior: NormalGammaStats) -> RunLength {
        RunLength {
            length: 0,
            pr: 1.0,
            stats: prior,
        }
    }

    /// Update the run-length posterior with `x` under the constant hazard
    /// `1 / hazard_rate`.
    ///
    /// # Errors
    /// A non-finite `x`, an invalid `hazard_rate`, or a posterior that cannot
    /// be normalized. On error the detector state is unchanged.
    pub fn update(&mut self, x: f64, hazard_rate: f64) -> Result<()> {
        let lambda = check_hazard_rate(hazard_rate)?;
        self.update_with_hazard(x, &constant_hazard(lambda))
    }

    /// Update the run-length posterior with `x` under an arbitrary hazard
    /// function.
    ///
    /// # Errors
    /// A non-finite `x`, a hazard outside `[0, 1]`, or a posterior that
    /// cannot be normalized. On error the detector state is unchanged.
    pub fn update_with_hazard<H>(&mut self, x: f64, hazard: &H) -> Result<()>
    where
        H: Hazard + ?Sized,
    {
        let x = check_observation(x)?;

        // weights[0] collects the change point mass, weights[i + 1] the growth
        // of run_lengths[i].
        let mut ln_cp: Vec<f64> = Vec::with_capacity(self.run_lengths.len());
        let mut weights: Vec<f64> =
            Vec::with_capacity(self.run_lengths.len() + 1);
        weights.push(f64::NEG_INFINITY);

        for slot in &self.run_lengths {
            let h = hazard.hazard(slot.length);
            if !(0.0..=1.0).contains(&h) {
                return Err(DetectorError::config(
                    "hazard",
                    format!("H({}) = {h} is not a probability", slot.length),
                ));
            }
            let ln_joint = slot.pr.ln() + slot.stats.ln_pp(x);
            ln_cp.push(ln_joint + h.ln());
            weights.push(ln_joint + (1.0 - h).ln());
        }
        weights[0] = ln_sum_exp(&ln_cp);
        normalize_ln_weights(&mut weights, "run-length posterior")?;

        let mut next: Vec<RunLength> = Vec::with_capacity(weights.len());
        next.push(RunLength {
            length: 0,
            pr: weights[0],
            stats: self.prior.clone(),
        });
        next.extend(self.run_lengths.iter().zip(&weights[1..]).map(
            |(slot, &pr)| RunLength {
                length: slot.length + 1,
                pr,
                stats: slot.stats.observe(x),
            },
        ));

        if self.use_pruning {
            prune(&mut next, self.prune_threshold)?;
            merge_tail(&mut next, self.max_run_lengths);
        }

        log::trace!(
            "bocpd: t = {}, x = {x}, {} run lengths, P(r = 0) = {}",
            self.t,
            next.len(),
            next[0].pr
        );
        self.run_lengths = next;
        self.t += 1;
        Ok(())
    }

    /// Probability that `x` is explained by run length zero.
    ///
    /// Run length zero holds the prior, i.e. a fresh segment that has not
    /// drifted from the reference model. It is weighed against the
    /// posterior-averaged predictive of the running segments with even prior
    /// odds, so the value does not depend on the hazard. Observations that
    /// the running segments explain far better than the prior get a value
    /// near zero. Before any update, or once only run length zero is left,
    /// the value is one.
    ///
    /// Does not mutate the detector.
    ///
    /// # Errors
    /// A non-finite `x`, or a predictive that underflows for every run length.
    pub fn predict(&self, x: f64) -> Result<f64> {
        let x = check_observation(x)?;

        let ln_reference = self.prior.ln_pp(x);
        let (continuing, ln_terms): (Vec<f64>, Vec<f64>) = self
            .run_lengths
            .iter()
            .filter(|slot| slot.length > 0 && slot.pr > 0.0)
            .map(|slot| (slot.pr, slot.pr.ln() + slot.stats.ln_pp(x)))
            .unzip();

        if continuing.is_empty() {
            return Ok(1.0);
        }

        let continuing_mass: f64 = continuing.iter().sum();
        let ln_continuing = ln_sum_exp(&ln_terms) - continuing_mass.ln();
        let ln_z = ln_sum_exp(&[ln_reference, ln_continuing]);
        if !ln_z.is_finite() {
            return Err(DetectorError::degenerate("posterior predictive", ln_z));
        }
        Ok((ln_reference - ln_z).exp())
    }

    /// Posterior mass on run length zero after the latest update.
    ///
    /// With a constant hazard this equals `1 / lambda` (up to pruning).
    #[must_use]
    pub fn changepoint_probability(&self) -> f64 {
        self.run_lengths
            .first()
            .filter(|slot| slot.length == 0)
            .map_or(0.0, |slot| slot.pr)
    }

    /// The run-length posterior as `(run_length, probability)` pairs in
    /// increasing run length.
    pub fn run_length_posterior(
        &self,
    ) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.run_lengths.iter().map(|slot| (slot.length, slot.pr))
    }

    /// Most probable run length.
    #[must_use]
    pub fn map_run_length(&self) -> usize {
        self.run_lengths
            .iter()
            .fold(None::<&RunLength>, |best, slot| match best {
                Some(b) if b.pr >= slot.pr => Some(b),
                _ => Some(slot),
            })
            .map_or(0, |slot| slot.length)
    }

    /// Number of run lengths currently tracked.
    #[must_use]
    pub fn run_length_count(&self) -> usize {
        self.run_lengths.len()
    }

    /// Number of observations consumed.
    #[must_use]
    pub fn observations(&self) -> usize {
        self.t
    }

    /// Statistics every new run starts from.
    #[must_use]
    pub fn prior(&self) -> &NormalGammaStats {
        &self.prior
    }

    /// Expected run length used by [`Detector::step`].
    #[must_use]
    pub fn hazard_rate(&self) -> f64 {
        self.lambda
    }

    /// Most run lengths tracked while pruning.
    #[must_use]
    pub fn max_run_lengths(&self) -> usize {
        self.max_run_lengths
    }
}

/// Drop run lengths under `threshold` and renormalize the rest.
fn prune(slots: &mut Vec<RunLength>, threshold: f64) -> Result<()> {
    let before = slots.len();
    slots.retain(|slot| slot.pr >= threshold);

    let total: f64 = slots.iter().map(|slot| slot.pr).sum();
    if slots.is_empty() || !(total.is_finite() && total > 0.0) {
        return Err(DetectorError::degenerate(
            "pruned run-length posterior",
            total,
        ));
    }
    if slots.len() < before {
        log::trace!("bocpd: pruned {} run lengths", before - slots.len());
        slots.iter_mut().for_each(|slot| slot.pr /= total);
    }
    Ok(())
}

/// Fold every slot past the first `max_len` into the last one kept.
///
/// The total mass is unchanged, so no renormalization is needed.
fn merge_tail(slots: &mut Vec<RunLength>, max_len: usize) {
    if slots.len() <= max_len {
        return;
    }
    let tail: f64 = slots.drain(max_len..).map(|slot| slot.pr).sum();
    if let Some(last) = slots.last_mut() {
        last.pr += tail;
        log::trace!(
            "bocpd: merged {tail} tail mass into run length {}",
            last.length
        );
    }
}

impl Detector for BocpdDetector {
    fn step(&mut self, observation: f64) -> Result<()> {
        self.update(observation, self.lambda)
    }

    fn score(&self, observation: f64) -> Result<f64> {
        self.predict(observation)
    }
}

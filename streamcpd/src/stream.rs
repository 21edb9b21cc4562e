//! Lazy decision streams over any [`Detector`].
//!
//! A [`Decisions`] iterator pulls one observation at a time, steps the
//! detector, scores the same observation and compares the score with a
//! [`DecisionRule`]. The `*_decisions` functions build the detector from a
//! configuration and hand back the iterator, so
//!
//! ```rust
//! use streamcpd::{
//!     cusum_decisions, CusumConfig, CusumDetector, DecisionRule, Decisions,
//! };
//!
//! let data = vec![0.1, -0.2, 9.0, 8.5];
//! let config = CusumConfig::default();
//!
//! let generated: Vec<bool> = cusum_decisions(data.clone(), &config)
//!     .unwrap()
//!     .collect::<Result<_, _>>()
//!     .unwrap();
//!
//! let mut cusum = CusumDetector::from_config(&config).unwrap();
//! let rule = DecisionRule::Above(cusum.decision_cutoff());
//! let by_hand: Vec<bool> = Decisions::new(&mut cusum, data, rule)
//!     .collect::<Result<_, _>>()
//!     .unwrap();
//!
//! assert_eq!(generated, vec![false, false, true, true]);
//! assert_eq!(generated, by_hand);
//! ```

use crate::bocpd::{BocpdConfig, BocpdDetector};
use crate::cusum::{CusumConfig, CusumDetector};
use crate::em::{EmConfig, EmMixtureDetector};
use crate::error::Result;
use crate::traits::Detector;

#[cfg(feature = "serde1")]
use serde::{Deserialize, Serialize};

/// How a detector score turns into a decision.
#[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DecisionRule {
    /// Abnormal when the score is strictly above the cutoff.
    Above(f64),
    /// Abnormal when the score is strictly below the cutoff.
    Below(f64),
}

impl DecisionRule {
    /// `true` when `score` is abnormal under this rule.
    #[must_use]
    pub fn decide(&self, score: f64) -> bool {
        match *self {
            Self::Above(cutoff) => score > cutoff,
            Self::Below(cutoff) => score < cutoff,
        }
    }

    /// The cutoff compared against.
    #[must_use]
    pub fn cutoff(&self) -> f64 {
        match *self {
            Self::Above(cutoff) | Self::Below(cutoff) => cutoff,
        }
    }
}

/// Lazy sequence of decisions, one per observation.
///
/// The first error is yielded once and ends the sequence; the detector
/// stays inspectable through [`Decisions::detector`].
#[derive(Debug)]
pub struct Decisions<D, I> {
    detector: D,
    observations: I,
    rule: DecisionRule,
    failed: bool,
}

impl<D, I> Decisions<D, I>
where
    D: Detector,
    I: Iterator<Item = f64>,
{
    /// Drive `detector` over `observations`.
    pub fn new<T>(detector: D, observations: T, rule: DecisionRule) -> Self
    where
        T: IntoIterator<IntoIter = I, Item = f64>,
    {
        Self {
            detector,
            observations: observations.into_iter(),
            rule,
            failed: false,
        }
    }

    /// The detector, reflecting every observation consumed so far.
    #[must_use]
    pub fn detector(&self) -> &D {
        &self.detector
    }

    /// Stop iterating and take the detector back.
    pub fn into_detector(self) -> D {
        self.detector
    }

    /// The rule applied to every score.
    #[must_use]
    pub fn rule(&self) -> DecisionRule {
        self.rule
    }
}

impl<D, I> Iterator for Decisions<D, I>
where
    D: Detector,
    I: Iterator<Item = f64>,
{
    type Item = Result<bool>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let x = self.observations.next()?;
        let decision = self
            .detector
            .step(x)
            .and_then(|()| self.detector.score(x))
            .map(|score| self.rule.decide(score));
        if let Err(ref err) = decision {
            log::debug!("decision stream stopped: {err}");
            self.failed = true;
        }
        Some(decision)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.failed {
            (0, Some(0))
        } else {
            self.observations.size_hint()
        }
    }
}

/// Stream BOCPD decisions: abnormal when the reference probability falls
/// under `config.decision_cutoff`.
///
/// # Errors
/// The configuration is rejected by [`BocpdDetector::from_config`].
pub fn bocpd_decisions<T>(
    observations: T,
    config: &BocpdConfig,
) -> Result<Decisions<BocpdDetector, T::IntoIter>>
where
    T: IntoIterator<Item = f64>,
{
    let cpd = BocpdDetector::from_config(config)?;
    Ok(Decisions::new(
        cpd,
        observations,
        DecisionRule::Below(config.decision_cutoff),
    ))
}

/// Stream CUSUM decisions: abnormal when the statistic exceeds
/// `threshold * std_dev`.
///
/// # Errors
/// The configuration is rejected by [`CusumDetector::from_config`].
pub fn cusum_decisions<T>(
    observations: T,
    config: &CusumConfig,
) -> Result<Decisions<CusumDetector, T::IntoIter>>
where
    T: IntoIterator<Item = f64>,
{
    let cusum = CusumDetector::from_config(config)?;
    let rule = DecisionRule::Above(cusum.decision_cutoff());
    Ok(Decisions::new(cusum, observations, rule))
}

/// Stream EM decisions: abnormal when the normal-membership probability
/// falls under `config.decision_cutoff`.
///
/// # Errors
/// The configuration is rejected by [`EmMixtureDetector::from_config`].
pub fn em_decisions<T>(
    observations: T,
    config: &EmConfig,
) -> Result<Decisions<EmMixtureDetector, T::IntoIter>>
where
    T: IntoIterator<Item = f64>,
{
    let em = EmMixtureDetector::from_config(config)?;
    Ok(Decisions::new(
        em,
        observations,
        DecisionRule::Below(config.decision_cutoff),
    ))
}

/// Configuration of any detector.
#[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
#[cfg_attr(
    feature = "serde1",
    serde(tag = "detector", rename_all = "lowercase")
)]
#[derive(Clone, Debug, PartialEq)]
pub enum DetectorConfig {
    /// Bayesian online change point detection
    Bocpd(BocpdConfig),
    /// Cumulative sum control chart
    Cusum(CusumConfig),
    /// Online EM Gaussian mixture
    Em(EmConfig),
}

impl DetectorConfig {
    /// Build the configured detector.
    ///
    /// # Errors
    /// The configuration is rejected by the detector's constructor.
    pub fn build(&self) -> Result<AnyDetector> {
        Ok(match self {
            Self::Bocpd(config) => BocpdDetector::from_config(config)?.into(),
            Self::Cusum(config) => CusumDetector::from_config(config)?.into(),
            Self::Em(config) => EmMixtureDetector::from_config(config)?.into(),
        })
    }

    /// Rule turning the configured detector's scores into decisions.
    #[must_use]
    pub fn decision_rule(&self) -> DecisionRule {
        match self {
            Self::Bocpd(config) => DecisionRule::Below(config.decision_cutoff),
            Self::Cusum(config) => {
                DecisionRule::Above(config.threshold * config.variance.sqrt())
            }
            Self::Em(config) => DecisionRule::Below(config.decision_cutoff),
        }
    }
}

impl From<BocpdConfig> for DetectorConfig {
    fn from(config: BocpdConfig) -> Self {
        Self::Bocpd(config)
    }
}

impl From<CusumConfig> for DetectorConfig {
    fn from(config: CusumConfig) -> Self {
        Self::Cusum(config)
    }
}

impl From<EmConfig> for DetectorConfig {
    fn from(config: EmConfig) -> Self {
        Self::Em(config)
    }
}

/// Any of the detectors.
#[derive(Clone, Debug, PartialEq)]
pub enum AnyDetector {
    /// Bayesian online change point detection
    Bocpd(BocpdDetector),
    /// Cumulative sum control chart
    Cusum(CusumDetector),
    /// Online EM Gaussian mixture
    Em(EmMixtureDetector),
}

impl From<BocpdDetector> for AnyDetector {
    fn from(cpd: BocpdDetector) -> Self {
        Self::Bocpd(cpd)
    }
}

impl From<CusumDetector> for AnyDetector {
    fn from(cusum: CusumDetector) -> Self {
        Self::Cusum(cusum)
    }
}

impl From<EmMixtureDetector> for AnyDetector {
    fn from(em: EmMixtureDetector) -> Self {
        Self::Em(em)
    }
}

impl Detector for AnyDetector {
    fn step(&mut self, observation: f64) -> Result<()> {
        match self {
            Self::Bocpd(cpd) => cpd.step(observation),
            Self::Cusum(cusum) => cusum.step(observation),
            Self::Em(em) => em.step(observation),
        }
    }

    fn score(&self, observation: f64) -> Result<f64> {
        match self {
            Self::Bocpd(cpd) => cpd.score(observation),
            Self::Cusum(cusum) => cusum.score(observation),
            Self::Em(em) => em.score(observation),
        }
    }
}

/// Stream decisions from whichever detector `config` selects.
///
/// # Errors
/// The configuration is rejected by the detector's constructor.
pub fn decisions<T>(
    observations: T,
    config: &DetectorConfig,
) -> Result<Decisions<AnyDetector, T::IntoIter>>
where
    T: IntoIterator<Item = f64>,
{
    let detector = config.build()?;
    Ok(Decisions::new(detector, observations, config.decision_rule()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DetectorError;
    use crate::gaussian::GaussianStats;
    use crate::generators;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    fn jump_data() -> Vec<f64> {
        let mut rng = SmallRng::seed_from_u64(0xABCD);
        generators::discontinuous_jump(&mut rng, 0.0, 1.0, 50.0, 1.0, 150, 200)
            .unwrap()
    }

    fn em_config() -> EmConfig {
        EmConfig::new(
            GaussianStats::new(0.0, 1.0).unwrap(),
            vec![GaussianStats::from_std_dev(50.0, 2.0).unwrap()],
            vec![70, 30],
        )
        .with_decision_cutoff(0.01)
    }

    fn collect<D, I>(decisions: Decisions<D, I>) -> Vec<bool>
    where
        D: Detector,
        I: Iterator<Item = f64>,
    {
        decisions.collect::<Result<Vec<bool>>>().unwrap()
    }

    #[test]
    fn bocpd_object_and_generator_forms_agree() {
        let data = jump_data();
        let config = BocpdConfig::default().with_lambda(100.0);

        let mut cpd = BocpdDetector::from_config(&config).unwrap();
        let by_hand: Vec<bool> = data
            .iter()
            .map(|&x| {
                cpd.update(x, config.lambda).unwrap();
                cpd.predict(x).unwrap() < config.decision_cutoff
            })
            .collect();

        let generated =
            collect(bocpd_decisions(data.clone(), &config).unwrap());
        assert_eq!(generated, by_hand);
        assert_eq!(generated.len(), data.len());

        let dynamic = collect(decisions(data, &config.into()).unwrap());
        assert_eq!(dynamic, by_hand);
    }

    #[test]
    fn cusum_object_and_generator_forms_agree() {
        let data = jump_data();
        let config = CusumConfig::default().with_threshold(5.0);

        let mut cusum = CusumDetector::from_config(&config).unwrap();
        let by_hand: Vec<bool> = data
            .iter()
            .map(|&x| {
                cusum.update(x).unwrap();
                cusum.predict(x).unwrap() > cusum.decision_cutoff()
            })
            .collect();

        let generated =
            collect(cusum_decisions(data.clone(), &config).unwrap());
        assert_eq!(generated, by_hand);
        assert!(generated[150..].iter().all(|f| *f));

        let dynamic = collect(decisions(data, &config.into()).unwrap());
        assert_eq!(dynamic, by_hand);
    }

    #[test]
    fn em_object_and_generator_forms_agree() {
        let data = jump_data();
        let config = em_config();

        let mut em = EmMixtureDetector::from_config(&config).unwrap();
        let by_hand: Vec<bool> = data
            .iter()
            .map(|&x| {
                em.update_check_convergence(x, config.early_stop_delta)
                    .unwrap();
                em.predict(x).unwrap() < config.decision_cutoff
            })
            .collect();

        let generated = collect(em_decisions(data.clone(), &config).unwrap());
        assert_eq!(generated, by_hand);

        let dynamic = collect(decisions(data, &config.into()).unwrap());
        assert_eq!(dynamic, by_hand);
    }

    #[test]
    fn borrowed_detector_reflects_consumed_prefix() {
        let data = jump_data();
        let mut cusum =
            CusumDetector::from_config(&CusumConfig::default()).unwrap();
        let rule = DecisionRule::Above(cusum.decision_cutoff());

        let taken = Decisions::new(&mut cusum, data, rule).take(25).count();
        assert_eq!(taken, 25);
        assert_eq!(cusum.observations(), 25);
    }

    #[test]
    fn empty_input_yields_nothing() {
        let mut stream =
            cusum_decisions(Vec::new(), &CusumConfig::default()).unwrap();
        assert!(stream.next().is_none());
        assert_eq!(stream.detector().observations(), 0);
    }

    #[test]
    fn first_error_ends_the_stream() {
        let _ = env_logger::builder().is_test(true).try_init();
        let data = vec![0.0, f64::NAN, 1.0, 2.0];
        let mut stream =
            cusum_decisions(data, &CusumConfig::default()).unwrap();

        assert_eq!(stream.size_hint(), (4, Some(4)));
        assert_eq!(stream.next(), Some(Ok(false)));
        assert!(matches!(
            stream.next(),
            Some(Err(DetectorError::InvalidObservation(_)))
        ));
        assert_eq!(stream.size_hint(), (0, Some(0)));
        assert!(stream.next().is_none());
        assert!(stream.next().is_none());
        assert_eq!(stream.into_detector().observations(), 1);
    }

    #[test]
    fn bad_configuration_fails_before_streaming() {
        let config = CusumConfig::default().with_reference(0.0, -1.0);
        assert!(cusum_decisions(vec![1.0], &config).is_err());
        assert!(decisions(vec![1.0], &config.into()).is_err());
        let bocpd = BocpdConfig::default().with_lambda(0.0);
        assert!(bocpd_decisions(vec![1.0], &bocpd).is_err());
        let em = em_config().with_max_epochs(0);
        assert!(em_decisions(vec![1.0], &em).is_err());
    }

    #[test]
    fn boxed_detectors_are_detectors() {
        let data = jump_data();
        let cusum = CusumDetector::from_config(&CusumConfig::default());
        let boxed: Box<dyn Detector> = Box::new(cusum.unwrap());
        let rule = DetectorConfig::from(CusumConfig::default()).decision_rule();
        let flags = collect(Decisions::new(boxed, data.clone(), rule));
        assert_eq!(flags.len(), data.len());
    }

    #[test]
    fn rules_compare_strictly() {
        assert!(DecisionRule::Above(1.0).decide(1.5));
        assert!(!DecisionRule::Above(1.0).decide(1.0));
        assert!(DecisionRule::Below(0.05).decide(0.01));
        assert!(!DecisionRule::Below(0.05).decide(0.05));
        assert::close(DecisionRule::Below(0.05).cutoff(), 0.05, 1E-15);
    }

    #[cfg(feature = "serde1")]
    #[test]
    fn detector_config_serde_round_trip() {
        let configs: Vec<DetectorConfig> = vec![
            BocpdConfig::default().into(),
            CusumConfig::default()
                .with_reset_policy(crate::cusum::ResetPolicy::ResetOnAlarm)
                .into(),
            em_config().into(),
        ];
        for config in configs {
            let json = serde_json::to_string(&config).unwrap();
            let back: DetectorConfig = serde_json::from_str(&json).unwrap();
            assert_eq!(back, config);
        }

        let json = r#"{"detector": "cusum", "threshold": 5.0}"#;
        let partial: DetectorConfig = serde_json::from_str(json).unwrap();
        assert_eq!(
            partial,
            DetectorConfig::Cusum(CusumConfig::default().with_threshold(5.0))
        );
    }
}

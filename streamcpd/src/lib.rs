//! This library provides streaming change point and anomaly detection tools
//! such as
//!  * Online Bayesian CPD with Normal-Gamma run lengths as `BocpdDetector`
//!  * One-sided cumulative sums as `CusumDetector`
//!  * Online EM over a Gaussian mixture as `EmMixtureDetector`
//!
//! Every detector consumes one observation at a time through `update` and
//! scores it through `predict`. The [`Decisions`] iterator turns either pair,
//! plus a [`DecisionRule`], into a lazy sequence of `true` (abnormal) /
//! `false` decisions.
//!
//! Detectors are plain owned values and are not internally synchronized:
//! use one detector per stream.
//!
//! ```rust
//! use streamcpd::{decisions, BocpdConfig, DetectorConfig};
//!
//! let bocpd = BocpdConfig::default().with_lambda(100.0);
//! let config = DetectorConfig::Bocpd(bocpd);
//! let data = [0.1, -0.4, 0.3, 0.0, 60.0, 61.0, 59.5];
//! let flags: Vec<bool> = decisions(data, &config)
//!     .unwrap()
//!     .collect::<Result<_, _>>()
//!     .unwrap();
//! assert_eq!(flags, vec![false, false, false, false, true, true, true]);
//! ```
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]

pub mod error;
pub use error::{DetectorError, Result};

pub mod generators;

mod gaussian;
pub use gaussian::*;

mod hazard;
pub use hazard::*;

mod bocpd;
pub use bocpd::*;

mod cusum;
pub use cusum::*;

mod em;
pub use em::*;

mod traits;
pub use self::traits::*;

mod stream;
pub use stream::*;

pub mod utils;

pub use rv;

use crate::error::Result;

/// Trait for streaming detectors driven one observation at a time
pub trait Detector {
    /// Fold an observation into the detector state, using the per-step
    /// inputs the detector was configured with.
    ///
    /// # Errors
    /// Invalid observations and numerical degeneracies are returned as-is;
    /// the detector should not be stepped again afterwards.
    fn step(&mut self, observation: f64) -> Result<()>;

    /// Score an observation against the current state without mutating it.
    ///
    /// # Errors
    /// Invalid observations and numerical degeneracies.
    fn score(&self, observation: f64) -> Result<f64>;
}

impl<D: Detector + ?Sized> Detector for &mut D {
    fn step(&mut self, observation: f64) -> Result<()> {
        (**self).step(observation)
    }

    fn score(&self, observation: f64) -> Result<f64> {
        (**self).score(observation)
    }
}

impl<D: Detector + ?Sized> Detector for Box<D> {
    fn step(&mut self, observation: f64) -> Result<()> {
        (**self).step(observation)
    }

    fn score(&self, observation: f64) -> Result<f64> {
        (**self).score(observation)
    }
}

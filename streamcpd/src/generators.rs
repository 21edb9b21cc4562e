//! Functions to generate random sequences
use crate::error::{positive, DetectorError, Result};
use rand::Rng;
use rv::dist::Gaussian;
use rv::traits::Rv;

fn gaussian(mu: f64, sigma: f64) -> Result<Gaussian> {
    let sigma = positive("sigma", sigma)?;
    Gaussian::new(mu, sigma)
        .map_err(|e| DetectorError::config("mu", format!("{e:?}")))
}

/// Draw `size` values from a Gaussian `N(mu, sigma^2)`.
///
/// # Errors
/// `mu` must be finite and `sigma` finite and positive.
pub fn normal_sequence<R: Rng>(
    rng: &mut R,
    mu: f64,
    sigma: f64,
    size: usize,
) -> Result<Vec<f64>> {
    Ok(gaussian(mu, sigma)?.sample(size, rng))
}

/// Generate a series of draws from two Gaussian process that switches
/// at `switch` into the sequence.
///
/// # Errors
/// Either Gaussian is malformed, or `switch` is past `size`.
///
/// # Example
/// ```rust
/// use streamcpd::generators::discontinuous_jump;
/// use rand::rngs::SmallRng;
/// use rand::SeedableRng;
/// let mut rng = SmallRng::seed_from_u64(0x12345);
/// // 1000 draws from G(0, 1) then G(10, 5), switching at step 500.
/// let seq: Vec<f64> = discontinuous_jump(
///     &mut rng,
///     0.0,
///     1.0,
///     10.0,
///     5.0,
///     500,
///     1000
/// ).unwrap();
/// assert_eq!(seq.len(), 1000);
/// ```
pub fn discontinuous_jump<R: Rng>(
    rng: &mut R,
    mu_1: f64,
    sigma_1: f64,
    mu_2: f64,
    sigma_2: f64,
    switch: usize,
    size: usize,
) -> Result<Vec<f64>> {
    if switch > size {
        return Err(DetectorError::config(
            "switch",
            format!("switch point {switch} is past the sequence end {size}"),
        ));
    }
    let g1 = gaussian(mu_1, sigma_1)?;
    let g2 = gaussian(mu_2, sigma_2)?;
    Ok([g1.sample(switch, rng), g2.sample(size - switch, rng)].concat())
}

//! Discrete densities used by the copy-number models

use crate::{PedcnvError, PedcnvResult};
use statrs::distribution::{Discrete, Poisson};
use statrs::function::factorial::ln_factorial;
use statrs::function::gamma::ln_gamma;

const MIN_MEAN: f64 = 0.1;
const MIN_CLUMPING: f64 = 2.0;
const MIN_ADJUSTED_CLUMPING: f64 = 6.0;
const MIN_VARIANCE_OVER_MEAN: f64 = 1.2;

/// Natural log floor for zero densities
pub const LOG_DENSITY_FLOOR: f64 = -708.3964185322641; // ln(f64::MIN_POSITIVE)

/// Negative binomial density over 0..max_value for the given mean and variance.
///
/// The clumping parameter is bounded below (6 with `adjust_clumping`, 2 otherwise)
/// so low-mean states keep a usable spread. Non-finite entries become 0.
pub fn negative_binomial_density(
    mean: f64,
    variance: f64,
    max_value: usize,
    adjust_clumping: bool,
) -> Vec<f64> {
    let min_clumping = if adjust_clumping {
        MIN_ADJUSTED_CLUMPING
    } else {
        MIN_CLUMPING
    };
    let floored_mean = mean.max(MIN_MEAN);
    let r = floored_mean * floored_mean / (variance.max(mean * MIN_VARIANCE_OVER_MEAN) - mean);
    let r = if r.is_nan() { min_clumping } else { r.max(min_clumping) };

    let log_p = (mean / (mean + r)).ln();
    let log_norm = -r * (1.0 + mean / r).ln() - ln_gamma(r);

    (0..max_value)
        .map(|x| {
            let success_term = if x == 0 { 0.0 } else { x as f64 * log_p };
            let log_density =
                log_norm + success_term + ln_gamma(r + x as f64) - ln_factorial(x as u64);
            finite_or_zero(log_density.exp())
        })
        .collect()
}

/// Poisson probability mass at `k`
pub fn poisson_pmf(lambda: f64, k: usize) -> PedcnvResult<f64> {
    let poisson = Poisson::new(lambda)
        .map_err(|e| PedcnvError::Numeric(format!("Poisson({}): {}", lambda, e)))?;
    Ok(finite_or_zero(poisson.pmf(k as u64)))
}

pub fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

/// Natural log of a density, floored so sums stay finite
pub fn log_density(density: f64) -> f64 {
    if density.is_finite() && density > 0.0 {
        density.ln().max(LOG_DENSITY_FLOOR)
    } else {
        LOG_DENSITY_FLOOR
    }
}

/// Replace a non-finite log-likelihood with the most negative finite value
pub fn sanitize_log_likelihood(log_likelihood: f64) -> f64 {
    if log_likelihood.is_finite() {
        log_likelihood
    } else {
        f64::MIN
    }
}

/// log(sum(exp(x))) over the finite values
pub fn log_sum_exp<I: IntoIterator<Item = f64>>(values: I) -> f64 {
    let values: Vec<f64> = values.into_iter().filter(|v| v.is_finite()).collect();
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return f64::NEG_INFINITY;
    }
    max + values.iter().map(|v| (v - max).exp()).sum::<f64>().ln()
}

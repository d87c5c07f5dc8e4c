//! MCMC schedule and chain diagnostics.

use thiserror::Error;

use crate::utils::usize_to_f64;

/// Fraction of `n_samples` below which an effective sample size is flagged.
pub const LOW_ESS_FRACTION: f64 = 0.4;

/// Errors for MCMC schedule configuration.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum InferenceError {
    #[error("number of retained samples must be positive")]
    InvalidSamples,
    #[error("thinning interval must be positive")]
    InvalidThinning,
    #[error("schedule of {burn_in} + {burn_between} x {n_samples} iterations overflows")]
    TooManyIterations {
        burn_in: usize,
        burn_between: usize,
        n_samples: usize,
    },
}

/// MCMC schedule: `burn_in` discarded iterations, then one retained state
/// every `burn_between` iterations until `n_samples` are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct McmcConfig {
    pub n_samples: usize,
    pub burn_in: usize,
    pub burn_between: usize,
}

impl Default for McmcConfig {
    fn default() -> Self {
        Self {
            n_samples: 20,
            burn_in: 200,
            burn_between: 50,
        }
    }
}

impl McmcConfig {
    /// # Errors
    ///
    /// Returns `InferenceError` if schedule values are invalid.
    pub const fn validate(self) -> Result<(), InferenceError> {
        if self.n_samples == 0 {
            return Err(InferenceError::InvalidSamples);
        }
        if self.burn_between == 0 {
            return Err(InferenceError::InvalidThinning);
        }
        if self.checked_total().is_none() {
            return Err(InferenceError::TooManyIterations {
                burn_in: self.burn_in,
                burn_between: self.burn_between,
                n_samples: self.n_samples,
            });
        }
        Ok(())
    }

    /// Total number of sampler iterations.
    #[must_use]
    pub const fn total_iterations(self) -> usize {
        match self.checked_total() {
            Some(total) => total,
            None => usize::MAX,
        }
    }

    /// Whether the state after iteration `iteration` (1-based) is retained.
    #[must_use]
    pub const fn is_retained(self, iteration: usize) -> bool {
        iteration > self.burn_in
            && self.burn_between > 0
            && (iteration - self.burn_in) % self.burn_between == 0
    }

    const fn checked_total(self) -> Option<usize> {
        match self.burn_between.checked_mul(self.n_samples) {
            Some(kept) => self.burn_in.checked_add(kept),
            None => None,
        }
    }
}

/// Sample autocorrelation of a retained chain at `lag`, normalised by the
/// lag-0 sum of squares. Constant chains and out-of-range lags give 0.
#[must_use]
pub fn autocorrelation(chain: &[f64], lag: usize) -> f64 {
    if lag >= chain.len() {
        return 0.0;
    }
    let centred = centre(chain);
    lagged_correlation(&centred, lag)
}

fn centre(chain: &[f64]) -> Vec<f64> {
    let mean = chain.iter().sum::<f64>() / usize_to_f64(chain.len());
    chain.iter().map(|value| value - mean).collect()
}

fn lagged_correlation(centred: &[f64], lag: usize) -> f64 {
    let variance: f64 = centred.iter().map(|d| d * d).sum();
    if variance <= 0.0 {
        return 0.0;
    }
    let covariance: f64 = centred
        .iter()
        .zip(&centred[lag..])
        .map(|(a, b)| a * b)
        .sum();
    covariance / variance
}

/// Effective sample size of a retained chain.
///
/// Sums autocorrelations up to the first non-positive lag and returns
/// `n / (1 + 2·Σρ)`, capped at `n`.
#[must_use]
pub fn effective_sample_size(chain: &[f64]) -> f64 {
    let n = usize_to_f64(chain.len());
    if chain.len() < 2 {
        return n;
    }
    let centred = centre(chain);
    let rho_sum: f64 = (1..chain.len())
        .map(|lag| lagged_correlation(&centred, lag))
        .take_while(|rho| *rho > 0.0)
        .sum();
    n / 2.0f64.mul_add(rho_sum, 1.0).max(1.0)
}

/// Effective sample size of each component of a chain of vectors.
#[must_use]
pub fn component_ess(draws: &[Vec<f64>]) -> Vec<f64> {
    let dim = draws.first().map_or(0, Vec::len);
    (0..dim)
        .map(|component| {
            let series: Vec<f64> = draws.iter().map(|draw| draw[component]).collect();
            effective_sample_size(&series)
        })
        .collect()
}

/// Indices of components whose ESS is below `LOW_ESS_FRACTION · n_samples`.
#[must_use]
pub fn low_ess_components(ess: &[f64], n_samples: usize) -> Vec<usize> {
    let threshold = LOW_ESS_FRACTION * usize_to_f64(n_samples);
    ess.iter()
        .enumerate()
        .filter(|(_, value)| **value < threshold)
        .map(|(idx, _)| idx)
        .collect()
}

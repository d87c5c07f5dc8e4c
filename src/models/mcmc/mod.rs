//! # Bayesian multivariate normal regression
//!
//! Posterior sampling for the MMRM mean and covariance parameters under a
//! flat prior on `beta` and an inverse-Wishart prior on each covariance
//! matrix. Data must form a complete subject-by-visit grid; missing outcomes
//! are imputed inside the sampler.

use faer::Mat;
use rand::rngs::StdRng;
use thiserror::Error;

use crate::inference::{InferenceError, McmcConfig};
use crate::input::{InputError, ModelInput};

pub mod sampler;
pub mod scaler;

pub use sampler::GibbsSampler;
pub use scaler::Scaler;

/// Errors returned by MCMC sampling.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum McmcError {
    #[error(transparent)]
    Schedule(#[from] InferenceError),
    #[error(transparent)]
    Input(#[from] InputError),
    #[error("first design column must be an intercept of ones")]
    MissingIntercept,
    #[error("expected {expected} {what}, found {found}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("{0} is not positive definite")]
    NotPositiveDefinite(&'static str),
    #[error("sampler produced non-finite values")]
    NonFiniteDraw,
    #[error("invalid MCMC fit: {0}")]
    InvalidFit(&'static str),
}

/// Everything the sampler needs, on the scaled data.
#[derive(Debug, Clone)]
pub struct McmcRequest {
    /// Full subject-by-visit grid with non-MAR outcomes already removed.
    pub input: ModelInput,
    pub config: McmcConfig,
    pub same_cov: bool,
    pub seed: u64,
    pub initial_beta: Vec<f64>,
    /// One matrix when `same_cov`, else one per group level.
    pub initial_sigma: Vec<Mat<f64>>,
    /// Prior guess for each covariance matrix.
    pub prior_sigma: Vec<Mat<f64>>,
    pub verbose: bool,
}

impl McmcRequest {
    #[must_use]
    pub fn n_cov_groups(&self) -> usize {
        if self.same_cov {
            1
        } else {
            self.input.n_groups()
        }
    }

    /// # Errors
    ///
    /// Returns `McmcError` if the schedule, input or initial values are
    /// inconsistent.
    pub fn validate(&self) -> Result<(), McmcError> {
        self.config.validate()?;
        self.input.validate_complete()?;
        let p = self.input.n_coefficients();
        if self.initial_beta.len() != p {
            return Err(McmcError::DimensionMismatch {
                what: "initial coefficients",
                expected: p,
                found: self.initial_beta.len(),
            });
        }
        let n_cov = self.n_cov_groups();
        for (what, matrices) in [
            ("initial covariance matrices", &self.initial_sigma),
            ("prior covariance matrices", &self.prior_sigma),
        ] {
            if matrices.len() != n_cov {
                return Err(McmcError::DimensionMismatch {
                    what,
                    expected: n_cov,
                    found: matrices.len(),
                });
            }
            for matrix in matrices {
                if matrix.nrows() != self.input.n_visits || matrix.ncols() != self.input.n_visits
                {
                    return Err(McmcError::DimensionMismatch {
                        what: "covariance dimension",
                        expected: self.input.n_visits,
                        found: matrix.nrows(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Sampler metadata and diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct McmcFit {
    pub config: McmcConfig,
    pub seed: u64,
    pub same_cov: bool,
    /// Effective sample size of each coefficient chain.
    pub effective_sample_size: Vec<f64>,
}

impl McmcFit {
    /// # Errors
    ///
    /// Returns `McmcError` if the schedule is invalid or the diagnostics are
    /// missing or non-finite.
    pub fn validate(&self) -> Result<(), McmcError> {
        self.config.validate()?;
        if self.effective_sample_size.is_empty() {
            return Err(McmcError::InvalidFit("no effective sample sizes"));
        }
        if self
            .effective_sample_size
            .iter()
            .any(|ess| !ess.is_finite() || *ess < 0.0)
        {
            return Err(McmcError::InvalidFit("effective sample size is not finite"));
        }
        Ok(())
    }
}

/// Retained draws of one chain.
#[derive(Debug, Clone)]
pub struct McmcOutput {
    pub fit: McmcFit,
    pub beta: Vec<Vec<f64>>,
    /// Per draw: one matrix when `same_cov`, else one per group level.
    pub sigma: Vec<Vec<Mat<f64>>>,
}

/// A posterior sampler for the MMRM parameters.
pub trait McmcBackend: Sync {
    /// # Errors
    ///
    /// Returns `McmcError` if sampling fails.
    fn sample(&self, request: &McmcRequest, rng: &mut StdRng) -> Result<McmcOutput, McmcError>;
}

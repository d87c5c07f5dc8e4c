//! Estimation method descriptors.

use thiserror::Error;

use crate::inference::{InferenceError, McmcConfig};
use crate::models::mmrm::{CovarianceStructure, MmrmOptions, OptimizerControl};

/// Errors returned by method validation and lookup.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MethodError {
    #[error("unknown method `{0}`")]
    UnknownMethod(String),
    #[error("number of samples must be positive")]
    NoSamples,
    #[error("failure threshold must lie in [0, 1], got {0}")]
    InvalidThreshold(f64),
    #[error(transparent)]
    Schedule(#[from] InferenceError),
}

/// Bayesian MCMC method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BayesMethod {
    pub burn_in: usize,
    pub burn_between: usize,
    pub n_samples: usize,
    pub same_cov: bool,
    /// Sampler seed; drawn from the caller's RNG when absent.
    pub seed: Option<u64>,
    /// Report sampler progress at info level.
    pub verbose: bool,
}

impl Default for BayesMethod {
    fn default() -> Self {
        Self {
            burn_in: 200,
            burn_between: 50,
            n_samples: 20,
            same_cov: true,
            seed: None,
            verbose: false,
        }
    }
}

impl BayesMethod {
    #[must_use]
    pub const fn schedule(&self) -> McmcConfig {
        McmcConfig {
            n_samples: self.n_samples,
            burn_in: self.burn_in,
            burn_between: self.burn_between,
        }
    }
}

/// Approximate Bayesian bootstrap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ApproxBayesMethod {
    pub covariance: CovarianceStructure,
    /// Tolerated fraction of failed bootstrap fits.
    pub threshold: f64,
    pub same_cov: bool,
    pub reml: bool,
    pub n_samples: usize,
}

impl Default for ApproxBayesMethod {
    fn default() -> Self {
        Self {
            covariance: CovarianceStructure::Us,
            threshold: 0.01,
            same_cov: true,
            reml: true,
            n_samples: 20,
        }
    }
}

/// Resampling scheme of the conditional-mean method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CondMeanType {
    Bootstrap { n_samples: usize },
    Jackknife,
}

/// Conditional-mean imputation with bootstrap or jackknife inference.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CondMeanMethod {
    pub covariance: CovarianceStructure,
    pub threshold: f64,
    pub same_cov: bool,
    pub reml: bool,
    pub resampling: CondMeanType,
}

impl Default for CondMeanMethod {
    fn default() -> Self {
        Self {
            covariance: CovarianceStructure::Us,
            threshold: 0.0,
            same_cov: true,
            reml: true,
            resampling: CondMeanType::Jackknife,
        }
    }
}

/// Estimation method of a draws run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Method {
    Bayes(BayesMethod),
    ApproxBayes(ApproxBayesMethod),
    CondMean(CondMeanMethod),
}

/// How the samples of a [`Method`] are to be pooled downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawsKind {
    /// Independent posterior or bootstrap draws combined with Rubin's rules.
    Rubin,
    Bootstrap,
    Jackknife,
}

impl Method {
    /// Default method for a name: `bayes`, `approxbayes`,
    /// `condmean_bootstrap` or `condmean_jackknife`.
    ///
    /// # Errors
    ///
    /// Returns `MethodError::UnknownMethod` for any other name.
    pub fn by_name(name: &str) -> Result<Self, MethodError> {
        match name {
            "bayes" => Ok(Self::Bayes(BayesMethod::default())),
            "approxbayes" => Ok(Self::ApproxBayes(ApproxBayesMethod::default())),
            "condmean_bootstrap" => Ok(Self::CondMean(CondMeanMethod {
                resampling: CondMeanType::Bootstrap { n_samples: 20 },
                ..CondMeanMethod::default()
            })),
            "condmean_jackknife" => Ok(Self::CondMean(CondMeanMethod::default())),
            other => Err(MethodError::UnknownMethod(other.to_string())),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> DrawsKind {
        match self {
            Self::Bayes(_) | Self::ApproxBayes(_) => DrawsKind::Rubin,
            Self::CondMean(CondMeanMethod {
                resampling: CondMeanType::Bootstrap { .. },
                ..
            }) => DrawsKind::Bootstrap,
            Self::CondMean(_) => DrawsKind::Jackknife,
        }
    }

    #[must_use]
    pub const fn same_cov(&self) -> bool {
        match self {
            Self::Bayes(method) => method.same_cov,
            Self::ApproxBayes(method) => method.same_cov,
            Self::CondMean(method) => method.same_cov,
        }
    }

    /// MMRM options implied by the method. Bayes always fits an unstructured
    /// REML model for its initial values.
    #[must_use]
    pub const fn mmrm_options(&self, control: OptimizerControl) -> MmrmOptions {
        let (covariance, reml, same_cov) = match self {
            Self::Bayes(method) => (CovarianceStructure::Us, true, method.same_cov),
            Self::ApproxBayes(method) => (method.covariance, method.reml, method.same_cov),
            Self::CondMean(method) => (method.covariance, method.reml, method.same_cov),
        };
        MmrmOptions {
            covariance,
            reml,
            same_cov,
            control,
        }
    }

    /// Number of samples a successful run returns for `n_subjects` subjects.
    #[must_use]
    pub const fn expected_samples(&self, n_subjects: usize) -> usize {
        match self {
            Self::Bayes(method) => method.n_samples,
            Self::ApproxBayes(method) => method.n_samples,
            Self::CondMean(CondMeanMethod {
                resampling: CondMeanType::Bootstrap { n_samples },
                ..
            }) => *n_samples + 1,
            Self::CondMean(_) => n_subjects + 1,
        }
    }

    /// # Errors
    ///
    /// Returns `MethodError` if a sample count, threshold or MCMC schedule
    /// is invalid.
    pub fn validate(&self) -> Result<(), MethodError> {
        match self {
            Self::Bayes(method) => method.schedule().validate().map_err(MethodError::from),
            Self::ApproxBayes(method) => {
                check_threshold(method.threshold)?;
                if method.n_samples == 0 {
                    return Err(MethodError::NoSamples);
                }
                Ok(())
            }
            Self::CondMean(method) => {
                check_threshold(method.threshold)?;
                if let CondMeanType::Bootstrap { n_samples: 0 } = method.resampling {
                    return Err(MethodError::NoSamples);
                }
                Ok(())
            }
        }
    }
}

fn check_threshold(threshold: f64) -> Result<(), MethodError> {
    if (0.0..=1.0).contains(&threshold) {
        Ok(())
    } else {
        Err(MethodError::InvalidThreshold(threshold))
    }
}

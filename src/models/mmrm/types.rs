use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use faer::Mat;
use thiserror::Error;

use crate::input::InputError;

/// Covariance structure of the within-subject residuals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CovarianceStructure {
    /// Unstructured.
    #[default]
    Us,
    /// Compound symmetry.
    Cs,
    /// Heterogeneous compound symmetry.
    Csh,
    /// First-order autoregressive.
    Ar1,
    /// Heterogeneous first-order autoregressive.
    Ar1h,
}

impl CovarianceStructure {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Us => "us",
            Self::Cs => "cs",
            Self::Csh => "csh",
            Self::Ar1 => "ar1",
            Self::Ar1h => "ar1h",
        }
    }
}

impl FromStr for CovarianceStructure {
    type Err = MmrmError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "us" => Ok(Self::Us),
            "cs" => Ok(Self::Cs),
            "csh" => Ok(Self::Csh),
            "ar1" => Ok(Self::Ar1),
            "ar1h" => Ok(Self::Ar1h),
            other => Err(MmrmError::UnknownCovariance(other.to_string())),
        }
    }
}

impl fmt::Display for CovarianceStructure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Iteration limits shared by the optimizers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptimizerControl {
    /// Maximum L-BFGS iterations. Nelder-Mead gets a proportional budget.
    pub max_iter: usize,
    /// Gradient-norm tolerance for L-BFGS. Nelder-Mead stops when the
    /// standard deviation of the simplex costs falls below its square.
    pub tolerance: f64,
}

impl Default for OptimizerControl {
    fn default() -> Self {
        Self {
            max_iter: 500,
            tolerance: 1e-5,
        }
    }
}

/// Options of one MMRM fit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MmrmOptions {
    pub covariance: CovarianceStructure,
    /// Restricted maximum likelihood when true, maximum likelihood otherwise.
    pub reml: bool,
    /// Share one covariance matrix across groups.
    pub same_cov: bool,
    pub control: OptimizerControl,
}

impl Default for MmrmOptions {
    fn default() -> Self {
        Self {
            covariance: CovarianceStructure::Us,
            reml: true,
            same_cov: true,
            control: OptimizerControl::default(),
        }
    }
}

impl MmrmOptions {
    /// # Errors
    ///
    /// Returns `MmrmError::InvalidControl` if the iteration limit or the
    /// tolerance is not positive.
    pub fn validate(&self) -> Result<(), MmrmError> {
        if self.control.max_iter == 0 {
            return Err(MmrmError::InvalidControl("max_iter must be positive"));
        }
        if !self.control.tolerance.is_finite() || self.control.tolerance <= 0.0 {
            return Err(MmrmError::InvalidControl(
                "tolerance must be positive and finite",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Optimizer {
    /// Limited-memory BFGS with a More-Thuente line search.
    Bfgs,
    NelderMead,
}

impl fmt::Display for Optimizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Bfgs => "L-BFGS",
            Self::NelderMead => "Nelder-Mead",
        })
    }
}

/// Starting values taken from an earlier fit.
#[derive(Debug, Clone, PartialEq)]
pub struct WarmStart {
    pub beta: Vec<f64>,
    pub theta: Vec<f64>,
}

impl WarmStart {
    #[must_use]
    pub fn from_fit(fit: &MmrmFit) -> Self {
        Self {
            beta: fit.beta.clone(),
            theta: fit.theta.clone(),
        }
    }
}

/// One optimizer run, optionally warm-started.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizerAttempt {
    pub optimizer: Optimizer,
    pub start: Option<WarmStart>,
}

impl OptimizerAttempt {
    #[must_use]
    pub const fn new(optimizer: Optimizer) -> Self {
        Self {
            optimizer,
            start: None,
        }
    }
}

/// Ordered fallback list of optimizer attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizerSpec {
    pub attempts: Vec<OptimizerAttempt>,
}

impl Default for OptimizerSpec {
    /// BFGS, then Nelder-Mead, both from moment-based starting values.
    fn default() -> Self {
        Self {
            attempts: vec![
                OptimizerAttempt::new(Optimizer::Bfgs),
                OptimizerAttempt::new(Optimizer::NelderMead),
            ],
        }
    }
}

impl OptimizerSpec {
    /// BFGS from `start`, then Nelder-Mead from moment-based values.
    #[must_use]
    pub fn warm(start: WarmStart) -> Self {
        Self {
            attempts: vec![
                OptimizerAttempt {
                    optimizer: Optimizer::Bfgs,
                    start: Some(start),
                },
                OptimizerAttempt::new(Optimizer::NelderMead),
            ],
        }
    }
}

/// Result of a converged MMRM fit.
#[derive(Debug, Clone)]
pub struct MmrmFit {
    pub beta: Vec<f64>,
    /// Covariance matrix for each group level.
    pub sigma: BTreeMap<String, Mat<f64>>,
    /// Distinct covariance matrices: one when shared, else one per group in
    /// level order.
    pub covariances: Vec<Mat<f64>>,
    /// Optimizer-scale covariance parameters.
    pub theta: Vec<f64>,
    pub neg_log_lik: f64,
    pub optimizer: Optimizer,
    pub iterations: usize,
}

/// Errors returned by MMRM fitting.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MmrmError {
    #[error("unknown covariance structure `{0}`")]
    UnknownCovariance(String),
    #[error("invalid optimizer control: {0}")]
    InvalidControl(&'static str),
    #[error("{observed} observed outcomes cannot identify {coefficients} coefficients")]
    TooFewObservations {
        observed: usize,
        coefficients: usize,
    },
    #[error("design matrix is rank deficient")]
    SingularDesign,
    #[error("no positive definite starting covariance could be formed")]
    InvalidStart,
    #[error("{optimizer} did not converge after {iterations} iterations")]
    NotConverged {
        optimizer: Optimizer,
        iterations: usize,
    },
    #[error("{optimizer} failed: {message}")]
    Optimizer {
        optimizer: Optimizer,
        message: String,
    },
    #[error("covariance parameters do not give a positive definite matrix")]
    InvalidCovariance,
    #[error("optimizer spec has no attempts")]
    NoAttempts,
    #[error(transparent)]
    Input(#[from] InputError),
}

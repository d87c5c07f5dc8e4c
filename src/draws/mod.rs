//! # Parameter draws
//!
//! Entry point of the crate: fits the imputation model to a longitudinal
//! dataset under one of the estimation methods and returns the parameter
//! samples that reference-based imputation later conditions on.
//!
//! * [`Method::Bayes`] samples the posterior with an [`McmcBackend`].
//! * [`Method::ApproxBayes`] refits the MMRM to bootstrap resamples.
//! * [`Method::CondMean`] keeps the full-data fit first and adds bootstrap
//!   or leave-one-subject-out refits.

use std::sync::Arc;

use rand::rngs::StdRng;
use thiserror::Error;

use crate::input::{DesignSpec, FormulaError, InputError, LongData, LongDataError, ModelFormula};
use crate::models::mcmc::{GibbsSampler, McmcBackend, McmcError};
use crate::models::mmrm::{MmrmBackend, MmrmError, OptimizerControl, OptimizerSpec, RemlMmrm};

mod bayes;
mod bootstrap;
pub mod fit;
mod jackknife;
pub mod method;
pub mod result;
pub mod sample;

#[cfg(test)]
pub(crate) mod test_support;

pub use fit::{FittedSample, fit_sample};
pub use method::{
    ApproxBayesMethod, BayesMethod, CondMeanMethod, CondMeanType, DrawsKind, Method, MethodError,
};
pub use result::Draws;
pub use sample::{Sample, SampleError, SampleFit, SampleList};

use bayes::{BayesContext, bayes_samples};
use bootstrap::{BootstrapPlan, bootstrap_samples};
use fit::FitContext;
use jackknife::jackknife_samples;

/// Errors returned by the draws drivers.
#[derive(Debug, Error)]
pub enum DrawsError {
    #[error("model fit on the original data failed ({stage})")]
    InitialFitFailed { stage: &'static str },
    #[error(
        "{failures} bootstrap fits failed, more than the {limit} allowed by threshold {threshold}"
    )]
    TooManyFailures {
        failures: usize,
        limit: usize,
        threshold: f64,
    },
    #[error("model fit failed with subject `{subject}` left out")]
    JackknifeFoldFailed { subject: String },
    #[error("jackknife needs at least 3 subjects, found {0}")]
    TooFewSubjects(usize),
    #[error("invalid draws: {0}")]
    InvalidDraws(String),
    #[error("invalid draws options: {0}")]
    InvalidOptions(&'static str),
    #[error("could not start worker threads: {0}")]
    ThreadPool(String),
    #[error(transparent)]
    Method(#[from] MethodError),
    #[error(transparent)]
    Sample(#[from] SampleError),
    #[error(transparent)]
    Data(#[from] LongDataError),
    #[error(transparent)]
    Formula(#[from] FormulaError),
    #[error(transparent)]
    Input(#[from] InputError),
    #[error(transparent)]
    Mmrm(#[from] MmrmError),
    #[error(transparent)]
    Mcmc(#[from] McmcError),
}

/// Run-level settings shared by all methods.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawsOptions {
    /// Worker threads for jackknife folds.
    pub ncores: usize,
    /// Optimizer fallback list for fits on the original data.
    pub optimizers: OptimizerSpec,
    /// Iteration limit and convergence tolerance for every MMRM fit of the run.
    pub control: OptimizerControl,
    /// Fixed-effects formula; derived from the data's variables when absent.
    pub formula: Option<ModelFormula>,
}

impl Default for DrawsOptions {
    fn default() -> Self {
        Self {
            ncores: 1,
            optimizers: OptimizerSpec::default(),
            control: OptimizerControl::default(),
            formula: None,
        }
    }
}

impl DrawsOptions {
    /// # Errors
    ///
    /// Returns `DrawsError::InvalidOptions` for zero workers or an empty
    /// optimizer list.
    pub fn validate(&self) -> Result<(), DrawsError> {
        if self.ncores == 0 {
            return Err(DrawsError::InvalidOptions("ncores must be positive"));
        }
        if self.optimizers.attempts.is_empty() {
            return Err(DrawsError::InvalidOptions("optimizer list is empty"));
        }
        Ok(())
    }
}

/// Draw parameter samples with the in-crate backends and default options.
///
/// # Errors
///
/// See [`draws_with`].
pub fn draws(data: Arc<LongData>, method: Method, rng: &mut StdRng) -> Result<Draws, DrawsError> {
    draws_with(
        data,
        method,
        rng,
        &RemlMmrm,
        &GibbsSampler,
        &DrawsOptions::default(),
    )
}

/// Draw parameter samples for `method`.
///
/// Bootstrap resampling consumes `rng`; the Bayesian method draws its
/// sampler seed from it unless the method fixes one.
///
/// # Errors
///
/// Returns `DrawsError` if the options or method are invalid, the
/// original-data fit fails, too many bootstrap fits fail, any jackknife
/// fold fails, or sampling fails.
pub fn draws_with(
    data: Arc<LongData>,
    method: Method,
    rng: &mut StdRng,
    mmrm: &dyn MmrmBackend,
    mcmc: &dyn McmcBackend,
    options: &DrawsOptions,
) -> Result<Draws, DrawsError> {
    options.validate()?;
    method.validate()?;
    let formula = options
        .formula
        .clone()
        .unwrap_or_else(|| ModelFormula::from_vars(data.vars()));
    let design = DesignSpec::new(formula.clone(), &data)?;
    let mmrm_options = method.mmrm_options(options.control);
    mmrm_options.validate()?;
    log::info!(
        "drawing parameters for {} subjects: {formula}",
        data.n_subjects()
    );

    let fit_ctx = FitContext {
        data: &data,
        design: &design,
        options: &mmrm_options,
        backend: mmrm,
    };
    let (samples, n_failures, fit) = match method {
        Method::Bayes(bayes) => {
            let ctx = BayesContext {
                data: &data,
                design: &design,
                options: mmrm_options,
                optimizers: &options.optimizers,
                mmrm,
                mcmc,
            };
            let run = bayes_samples(&ctx, &bayes, rng)?;
            (run.samples, 0, Some(run.fit))
        }
        Method::ApproxBayes(approx) => {
            let plan = BootstrapPlan {
                n_samples: approx.n_samples,
                threshold: approx.threshold,
                use_original_ids: true,
                include_initial: false,
            };
            let run = bootstrap_samples(&fit_ctx, &options.optimizers, plan, rng)?;
            (run.samples, run.n_failures, None)
        }
        Method::CondMean(CondMeanMethod {
            threshold,
            resampling: CondMeanType::Bootstrap { n_samples },
            ..
        }) => {
            let plan = BootstrapPlan {
                n_samples,
                threshold,
                use_original_ids: false,
                include_initial: true,
            };
            let run = bootstrap_samples(&fit_ctx, &options.optimizers, plan, rng)?;
            (run.samples, run.n_failures, None)
        }
        Method::CondMean(_) => {
            let samples = jackknife_samples(&fit_ctx, &options.optimizers, options.ncores)?;
            (samples, 0, None)
        }
    };

    let draws = Draws::new(
        data,
        method,
        samples.into(),
        formula,
        n_failures,
        fit,
    )?;
    log::info!(
        "collected {} samples ({} failed fits discarded)",
        draws.samples().len(),
        draws.n_failures()
    );
    Ok(draws)
}

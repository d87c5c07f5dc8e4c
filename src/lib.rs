#![forbid(unsafe_code)]

//! # `refbased_mi`
//!
//! Parameter draws for reference-based multiple imputation of longitudinal
//! clinical trial data.
//!
//! A [`LongData`] set carries the subject-by-visit outcomes, the
//! intercurrent-event strategy of each subject and the resulting MAR mask.
//! [`draws`] fits a mixed model for repeated measures to the MAR part of
//! the data and returns parameter samples under one of three methods:
//! Bayesian MCMC, approximate Bayesian bootstrap, or conditional mean with
//! bootstrap or jackknife inference.

pub mod draws;
pub mod inference;
pub mod input;
pub mod models;
pub mod utils;

pub use draws::{
    ApproxBayesMethod, BayesMethod, CondMeanMethod, CondMeanType, Draws, DrawsError, DrawsKind,
    DrawsOptions, Method, MethodError, Sample, SampleError, SampleFit, SampleList, draws,
    draws_with, fit_sample,
};
pub use inference::{InferenceError, McmcConfig};
pub use input::{
    CovariateValue, DesignSpec, IceRecord, InputError, LongData, LongDataError, ModelFormula,
    ModelInput, Strategy, SubjectVisit, Vars,
};
pub use models::mcmc::{GibbsSampler, McmcBackend, McmcError, McmcFit};
pub use models::mmrm::{
    CovarianceStructure, MmrmBackend, MmrmError, MmrmFit, MmrmOptions, Optimizer,
    OptimizerAttempt, OptimizerControl, OptimizerSpec, RemlMmrm, WarmStart,
};

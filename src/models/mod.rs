//! # Models
//!
//! Imputation model backends: the MMRM fitted by (restricted) maximum
//! likelihood and the Bayesian multivariate normal sampler.

pub mod mcmc;
pub mod mmrm;

//! # Mixed model for repeated measures
//!
//! Fits `y_i ~ N(X_i β, Σ_g)` where `Σ_g` is the visit-by-visit residual
//! covariance of the subject's group (or one shared matrix), restricted to
//! the visits at which the subject is observed.
//!
//! Model fitting is reached through [`MmrmBackend`] so that the resampling
//! drivers can run against alternative implementations. [`RemlMmrm`] is the
//! in-crate backend.

pub mod covariance;
pub mod fit;
pub mod likelihood;
pub mod optimizer;
pub mod types;

pub use covariance::{n_theta, sigma_to_theta, theta_to_sigma};
pub use fit::RemlMmrm;
pub use likelihood::{MmrmProblem, Profile};
pub use optimizer::{OptimizationResult, ProfileCost, lbfgs, nelder_mead};
pub use types::{
    CovarianceStructure, MmrmError, MmrmFit, MmrmOptions, Optimizer, OptimizerAttempt,
    OptimizerControl, OptimizerSpec, WarmStart,
};

use crate::input::ModelInput;

/// A single MMRM optimisation run.
///
/// Implementations must be shareable across the jackknife worker threads.
pub trait MmrmBackend: Sync {
    /// # Errors
    ///
    /// Returns `MmrmError` if the model cannot be fitted with this attempt.
    fn fit(
        &self,
        input: &ModelInput,
        options: &MmrmOptions,
        attempt: &OptimizerAttempt,
    ) -> Result<MmrmFit, MmrmError>;
}

/// Run the attempts of `spec` in order and return the first success.
///
/// # Errors
///
/// Returns the error of the last attempt when every attempt fails, or
/// `MmrmError::NoAttempts` for an empty spec.
pub fn fit_mmrm(
    backend: &dyn MmrmBackend,
    input: &ModelInput,
    options: &MmrmOptions,
    spec: &OptimizerSpec,
) -> Result<MmrmFit, MmrmError> {
    let mut last_error = MmrmError::NoAttempts;
    for attempt in &spec.attempts {
        match backend.fit(input, options, attempt) {
            Ok(fit) => return Ok(fit),
            Err(err) => {
                log::debug!("{} attempt failed: {err}", attempt.optimizer);
                last_error = err;
            }
        }
    }
    Err(last_error)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use faer::Mat;

    use super::*;

    struct FailFirst {
        calls: AtomicUsize,
    }

    impl MmrmBackend for FailFirst {
        fn fit(
            &self,
            _input: &ModelInput,
            _options: &MmrmOptions,
            attempt: &OptimizerAttempt,
        ) -> Result<MmrmFit, MmrmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match attempt.optimizer {
                Optimizer::Bfgs => Err(MmrmError::NotConverged {
                    optimizer: Optimizer::Bfgs,
                    iterations: 3,
                }),
                Optimizer::NelderMead => Ok(MmrmFit {
                    beta: vec![1.0],
                    sigma: BTreeMap::new(),
                    covariances: vec![Mat::from_fn(1, 1, |_, _| 1.0)],
                    theta: vec![0.0],
                    neg_log_lik: 0.0,
                    optimizer: Optimizer::NelderMead,
                    iterations: 1,
                }),
            }
        }
    }

    fn input() -> ModelInput {
        ModelInput {
            design_matrix: Mat::from_fn(2, 1, |_, _| 1.0),
            outcome: vec![Some(1.0), Some(2.0)],
            subjects: vec![0, 1],
            visits: vec![0, 0],
            groups: vec![0, 0],
            n_subjects: 2,
            n_visits: 1,
            group_levels: vec!["A".to_string()],
            column_names: vec!["(Intercept)".to_string()],
        }
    }

    #[test]
    fn falls_back_to_next_attempt() {
        let backend = FailFirst {
            calls: AtomicUsize::new(0),
        };
        let fit = fit_mmrm(
            &backend,
            &input(),
            &MmrmOptions::default(),
            &OptimizerSpec::default(),
        )
        .expect("second attempt succeeds");
        assert_eq!(fit.optimizer, Optimizer::NelderMead);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn empty_spec_is_an_error() {
        let spec = OptimizerSpec {
            attempts: Vec::new(),
        };
        let err = fit_mmrm(&RemlMmrm, &input(), &MmrmOptions::default(), &spec)
            .expect_err("nothing to run");
        assert_eq!(err, MmrmError::NoAttempts);
    }

    #[test]
    fn warm_spec_starts_bfgs_from_fit() {
        let start = WarmStart {
            beta: vec![1.0],
            theta: vec![0.0],
        };
        let spec = OptimizerSpec::warm(start.clone());
        assert_eq!(spec.attempts[0].start, Some(start));
        assert_eq!(spec.attempts[1].optimizer, Optimizer::NelderMead);
        assert_eq!(spec.attempts[1].start, None);
    }
}

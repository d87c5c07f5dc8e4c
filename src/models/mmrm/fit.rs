use std::collections::BTreeMap;

use super::MmrmBackend;
use super::likelihood::MmrmProblem;
use super::optimizer::{lbfgs, nelder_mead};
use super::types::{MmrmError, MmrmFit, MmrmOptions, Optimizer, OptimizerAttempt};
use crate::input::ModelInput;

/// Profile (RE)ML MMRM fitted with the `argmin` solvers.
#[derive(Debug, Clone, Copy, Default)]
pub struct RemlMmrm;

impl MmrmBackend for RemlMmrm {
    fn fit(
        &self,
        input: &ModelInput,
        options: &MmrmOptions,
        attempt: &OptimizerAttempt,
    ) -> Result<MmrmFit, MmrmError> {
        let problem = MmrmProblem::new(input, options)?;
        let start = match &attempt.start {
            Some(warm)
                if warm.theta.len() == problem.n_theta()
                    && warm.beta.len() == problem.n_coefficients() =>
            {
                warm.theta.clone()
            }
            Some(warm) => {
                log::debug!(
                    "ignoring warm start with {} coefficients and {} covariance parameters \
                     (expected {} and {})",
                    warm.beta.len(),
                    warm.theta.len(),
                    problem.n_coefficients(),
                    problem.n_theta()
                );
                problem.moment_start()?
            }
            None => problem.moment_start()?,
        };

        let result = match attempt.optimizer {
            Optimizer::Bfgs => lbfgs(&problem, &start, &options.control)?,
            Optimizer::NelderMead => nelder_mead(&problem, &start, &options.control)?,
        };
        if !result.converged {
            return Err(MmrmError::NotConverged {
                optimizer: attempt.optimizer,
                iterations: result.n_iter,
            });
        }

        let profile = problem
            .profile(&result.parameters)
            .ok_or(MmrmError::InvalidCovariance)?;
        let covariances = problem
            .covariances(&result.parameters)
            .ok_or(MmrmError::InvalidCovariance)?;
        let sigma: BTreeMap<String, _> = input
            .group_levels
            .iter()
            .enumerate()
            .map(|(group, level)| {
                let index = if options.same_cov { 0 } else { group };
                (level.clone(), covariances[index].clone())
            })
            .collect();

        Ok(MmrmFit {
            beta: profile.beta,
            sigma,
            covariances,
            theta: result.parameters,
            neg_log_lik: profile.neg_log_lik,
            optimizer: attempt.optimizer,
            iterations: result.n_iter,
        })
    }
}

#[cfg(test)]
mod tests {
    use faer::Mat;
    use rand::rngs::StdRng;
    use rand::{RngExt, SeedableRng};

    use super::*;
    use crate::models::mmrm::types::{CovarianceStructure, WarmStart};
    use crate::utils::{cholesky_lower, usize_to_f64};

    fn normal(rng: &mut StdRng) -> f64 {
        let u1 = (1.0_f64 - rng.random::<f64>()).max(f64::MIN_POSITIVE);
        let u2 = rng.random::<f64>();
        (-2.0_f64 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
    }

    /// Two arms, three visits, correlated residuals.
    fn simulated(n_subjects: usize, seed: u64) -> ModelInput {
        let mut rng = StdRng::seed_from_u64(seed);
        let sigma = Mat::from_fn(3, 3, |i, j| if i == j { 1.0 } else { 0.5 });
        let lower = cholesky_lower(&sigma).expect("pd");
        let n_rows = n_subjects * 3;
        let mut outcome = Vec::with_capacity(n_rows);
        for subject in 0..n_subjects {
            let z: Vec<f64> = (0..3).map(|_| normal(&mut rng)).collect();
            for visit in 0..3 {
                let noise: f64 = (0..=visit).map(|k| lower[(visit, k)] * z[k]).sum();
                let treated = usize_to_f64(subject % 2);
                outcome.push(Some(
                    1.0 + 0.5 * usize_to_f64(visit) + 0.8 * treated + noise,
                ));
            }
        }
        ModelInput {
            design_matrix: Mat::from_fn(n_rows, 4, |row, col| {
                let subject = row / 3;
                let visit = row % 3;
                match col {
                    0 => 1.0,
                    1 => usize_to_f64(subject % 2),
                    2 => usize_to_f64(usize::from(visit == 1)),
                    _ => usize_to_f64(usize::from(visit == 2)),
                }
            }),
            outcome,
            subjects: (0..n_rows).map(|row| row / 3).collect(),
            visits: (0..n_rows).map(|row| row % 3).collect(),
            groups: (0..n_rows).map(|row| (row / 3) % 2).collect(),
            n_subjects,
            n_visits: 3,
            group_levels: vec!["ctl".to_string(), "trt".to_string()],
            column_names: vec![
                "(Intercept)".to_string(),
                "grouptrt".to_string(),
                "visit2".to_string(),
                "visit3".to_string(),
            ],
        }
    }

    #[test]
    fn bfgs_and_nelder_mead_agree() {
        let input = simulated(60, 7);
        let options = MmrmOptions::default();
        let by_bfgs = RemlMmrm
            .fit(&input, &options, &OptimizerAttempt::new(Optimizer::Bfgs))
            .expect("bfgs converges");
        let by_simplex = RemlMmrm
            .fit(&input, &options, &OptimizerAttempt::new(Optimizer::NelderMead))
            .expect("nelder-mead converges");
        assert!((by_bfgs.neg_log_lik - by_simplex.neg_log_lik).abs() < 1e-2);
        for (a, b) in by_bfgs.beta.iter().zip(&by_simplex.beta) {
            assert!((a - b).abs() < 5e-2);
        }
    }

    #[test]
    fn recovers_treatment_effect() {
        let input = simulated(200, 3);
        let fit = RemlMmrm
            .fit(
                &input,
                &MmrmOptions::default(),
                &OptimizerAttempt::new(Optimizer::Bfgs),
            )
            .expect("converges");
        assert!((fit.beta[1] - 0.8).abs() < 0.3);
        assert_eq!(fit.sigma.len(), 2);
        assert_eq!(fit.covariances.len(), 1);
        assert_eq!(fit.theta.len(), 6);
    }

    #[test]
    fn separate_covariances_are_reported_per_group() {
        let input = simulated(80, 5);
        let options = MmrmOptions {
            same_cov: false,
            covariance: CovarianceStructure::Cs,
            ..MmrmOptions::default()
        };
        let fit = RemlMmrm
            .fit(&input, &options, &OptimizerAttempt::new(Optimizer::Bfgs))
            .expect("converges");
        assert_eq!(fit.covariances.len(), 2);
        assert_eq!(fit.theta.len(), 4);
        assert!(fit.sigma.contains_key("trt"));
    }

    #[test]
    fn mismatched_warm_start_falls_back_to_moments() {
        let input = simulated(40, 9);
        let attempt = OptimizerAttempt {
            optimizer: Optimizer::Bfgs,
            start: Some(WarmStart {
                beta: vec![0.0],
                theta: vec![0.0],
            }),
        };
        assert!(RemlMmrm.fit(&input, &MmrmOptions::default(), &attempt).is_ok());
    }

    #[test]
    fn warm_start_from_optimum_converges_immediately() {
        let input = simulated(40, 11);
        let options = MmrmOptions::default();
        let cold = RemlMmrm
            .fit(&input, &options, &OptimizerAttempt::new(Optimizer::Bfgs))
            .expect("converges");
        let warm = RemlMmrm
            .fit(
                &input,
                &options,
                &OptimizerAttempt {
                    optimizer: Optimizer::Bfgs,
                    start: Some(WarmStart::from_fit(&cold)),
                },
            )
            .expect("converges");
        assert!(warm.iterations <= cold.iterations);
        assert!(warm.neg_log_lik <= cold.neg_log_lik + 1e-8);
    }
}

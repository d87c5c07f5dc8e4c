//! Posterior draws from the Bayesian multivariate normal model.

use std::collections::BTreeMap;

use faer::Mat;
use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};

use super::DrawsError;
use super::method::BayesMethod;
use super::sample::{Sample, SampleFit};
use crate::inference::low_ess_components;
use crate::input::{DesignSpec, LongData};
use crate::models::mcmc::{McmcBackend, McmcError, McmcFit, McmcRequest, Scaler};
use crate::models::mmrm::{
    CovarianceStructure, MmrmBackend, MmrmOptions, OptimizerSpec, fit_mmrm, sigma_to_theta,
};

/// Unscaled posterior samples and the sampler metadata.
#[derive(Debug, Clone)]
pub(crate) struct BayesRun {
    pub samples: Vec<Sample>,
    pub fit: McmcFit,
}

/// Backends and fitting options used by [`bayes_samples`].
pub(crate) struct BayesContext<'a> {
    pub data: &'a LongData,
    pub design: &'a DesignSpec,
    pub options: MmrmOptions,
    pub optimizers: &'a OptimizerSpec,
    pub mmrm: &'a dyn MmrmBackend,
    pub mcmc: &'a dyn McmcBackend,
}

pub(crate) fn bayes_samples(
    ctx: &BayesContext<'_>,
    method: &BayesMethod,
    rng: &mut StdRng,
) -> Result<BayesRun, DrawsError> {
    let ids = ctx.data.ids();
    let subset = ctx.data.get_data(ids, false, false)?.mask_non_mar();
    let input = ctx.design.build(&subset)?;
    input.validate_complete()?;

    let scaler = Scaler::fit(&input)?;
    let scaled = scaler.scale_input(&input);
    let initial = fit_mmrm(ctx.mmrm, &scaled, &ctx.options, ctx.optimizers).map_err(|err| {
        log::debug!("initial MMRM fit for the sampler failed: {err}");
        DrawsError::InitialFitFailed { stage: "bayes" }
    })?;

    let seed = method.seed.unwrap_or_else(|| rng.random::<u64>());
    let request = McmcRequest {
        input: scaled,
        config: method.schedule(),
        same_cov: method.same_cov,
        seed,
        initial_beta: initial.beta,
        initial_sigma: initial.covariances.clone(),
        prior_sigma: initial.covariances,
        verbose: method.verbose,
    };
    log::debug!(
        "sampling {} draws after {} burn-in iterations (seed {seed})",
        method.n_samples,
        method.burn_in
    );
    let output = ctx
        .mcmc
        .sample(&request, &mut StdRng::seed_from_u64(seed))?;
    output.fit.validate()?;
    if output.beta.len() != output.sigma.len() {
        return Err(McmcError::DimensionMismatch {
            what: "covariance draws",
            expected: output.beta.len(),
            found: output.sigma.len(),
        }
        .into());
    }

    let levels = ctx.data.group_levels();
    let n_cov = request.n_cov_groups();
    let n_coefficients = request.input.n_coefficients();
    let n_visits = request.input.n_visits;
    let mut samples = Vec::with_capacity(output.beta.len());
    for (beta, sigma) in output.beta.iter().zip(&output.sigma) {
        if beta.len() != n_coefficients {
            return Err(McmcError::DimensionMismatch {
                what: "coefficients per draw",
                expected: n_coefficients,
                found: beta.len(),
            }
            .into());
        }
        if sigma.len() != n_cov {
            return Err(McmcError::DimensionMismatch {
                what: "covariance matrices per draw",
                expected: n_cov,
                found: sigma.len(),
            }
            .into());
        }
        if let Some(matrix) = sigma
            .iter()
            .find(|matrix| matrix.nrows() != n_visits || matrix.ncols() != n_visits)
        {
            let found = if matrix.nrows() == n_visits {
                matrix.ncols()
            } else {
                matrix.nrows()
            };
            return Err(McmcError::DimensionMismatch {
                what: "covariance dimension per draw",
                expected: n_visits,
                found,
            }
            .into());
        }
        let distinct: Vec<Mat<f64>> = sigma
            .iter()
            .map(|matrix| scaler.unscale_sigma(matrix))
            .collect();
        let named: BTreeMap<String, Mat<f64>> = levels
            .iter()
            .enumerate()
            .map(|(index, level)| {
                let matrix = if method.same_cov {
                    &distinct[0]
                } else {
                    &distinct[index]
                };
                (level.clone(), matrix.clone())
            })
            .collect();
        let mut theta = Vec::new();
        for matrix in &distinct {
            let parameters = sigma_to_theta(CovarianceStructure::Us, matrix)
                .ok_or(McmcError::NotPositiveDefinite("posterior covariance draw"))?;
            theta.extend(parameters);
        }
        samples.push(Sample::fitted(
            ids.to_vec(),
            ids.to_vec(),
            SampleFit {
                beta: scaler.unscale_beta(beta),
                sigma: named,
                theta,
            },
        )?);
    }

    let low = low_ess_components(&output.fit.effective_sample_size, method.n_samples);
    for index in low {
        log::warn!(
            "coefficient {index} has effective sample size {:.1} from {} draws",
            output.fit.effective_sample_size[index],
            method.n_samples
        );
    }

    Ok(BayesRun {
        samples,
        fit: output.fit,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::draws::test_support::simulated_data;
    use crate::input::ModelFormula;
    use crate::models::mcmc::{GibbsSampler, McmcOutput};
    use crate::models::mmrm::{OptimizerControl, RemlMmrm};
    use crate::utils::max_abs_diff;

    fn short_run() -> BayesMethod {
        BayesMethod {
            burn_in: 20,
            burn_between: 2,
            n_samples: 10,
            seed: Some(42),
            ..BayesMethod::default()
        }
    }

    fn sample_draws(
        data: &LongData,
        method: &BayesMethod,
        mcmc: &dyn McmcBackend,
    ) -> Result<BayesRun, DrawsError> {
        let design =
            DesignSpec::new(ModelFormula::from_vars(data.vars()), data).expect("formula");
        let spec = OptimizerSpec::default();
        let ctx = BayesContext {
            data,
            design: &design,
            options: MmrmOptions {
                covariance: CovarianceStructure::Us,
                reml: true,
                same_cov: method.same_cov,
                control: OptimizerControl::default(),
            },
            optimizers: &spec,
            mmrm: &RemlMmrm,
            mcmc,
        };
        bayes_samples(&ctx, method, &mut StdRng::seed_from_u64(1))
    }

    #[test]
    fn draws_are_named_by_group() {
        let data = simulated_data(30, 3, 41);
        let run = sample_draws(&data, &short_run(), &GibbsSampler).expect("sampler runs");
        assert_eq!(run.samples.len(), 10);
        for sample in &run.samples {
            let sigma = sample.sigma().expect("fitted");
            assert_eq!(sigma.len(), 2);
            assert!(max_abs_diff(&sigma["ctl"], &sigma["trt"]) == 0.0);
            assert_eq!(sample.ids(), data.ids());
            assert_eq!(sample.theta().map(<[f64]>::len), Some(6));
        }
        assert_eq!(run.fit.seed, 42);
    }

    #[test]
    fn fixed_seed_reproduces_draws() {
        let data = simulated_data(20, 3, 42);
        let first = sample_draws(&data, &short_run(), &GibbsSampler).expect("first");
        let second = sample_draws(&data, &short_run(), &GibbsSampler).expect("second");
        for (a, b) in first.samples.iter().zip(&second.samples) {
            assert_eq!(a.beta(), b.beta());
        }
    }

    #[test]
    fn separate_covariances_give_one_theta_block_per_group() {
        let data = simulated_data(30, 3, 43);
        let method = BayesMethod {
            same_cov: false,
            ..short_run()
        };
        let run = sample_draws(&data, &method, &GibbsSampler).expect("sampler runs");
        let sample = &run.samples[0];
        assert_eq!(sample.theta().map(<[f64]>::len), Some(12));
    }

    struct ConstantSampler;

    impl McmcBackend for ConstantSampler {
        fn sample(
            &self,
            request: &McmcRequest,
            _rng: &mut StdRng,
        ) -> Result<McmcOutput, McmcError> {
            let n = request.config.n_samples;
            let v = request.input.n_visits;
            Ok(McmcOutput {
                fit: McmcFit {
                    config: request.config,
                    seed: request.seed,
                    same_cov: request.same_cov,
                    effective_sample_size: vec![1.0; request.initial_beta.len()],
                },
                beta: vec![request.initial_beta.clone(); n],
                sigma: vec![vec![Mat::identity(v, v)]; n],
            })
        }
    }

    /// Returns one coefficient too many, or 1x1 covariances when `short_sigma`.
    struct MalformedSampler {
        short_sigma: bool,
    }

    impl McmcBackend for MalformedSampler {
        fn sample(
            &self,
            request: &McmcRequest,
            rng: &mut StdRng,
        ) -> Result<McmcOutput, McmcError> {
            let mut output = ConstantSampler.sample(request, rng)?;
            if self.short_sigma {
                for draw in &mut output.sigma {
                    *draw = vec![Mat::identity(1, 1)];
                }
            } else {
                for beta in &mut output.beta {
                    beta.push(1.0);
                }
            }
            Ok(output)
        }
    }

    #[test]
    fn long_coefficient_draws_are_rejected() {
        let data = simulated_data(20, 3, 45);
        let backend = MalformedSampler { short_sigma: false };
        let err = sample_draws(&data, &short_run(), &backend).expect_err("extra coefficient");
        match err {
            DrawsError::Mcmc(McmcError::DimensionMismatch {
                what,
                expected,
                found,
            }) => {
                assert_eq!(what, "coefficients per draw");
                assert_eq!(found, expected + 1);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn undersized_covariance_draws_are_rejected() {
        let data = simulated_data(20, 3, 46);
        let backend = MalformedSampler { short_sigma: true };
        let err = sample_draws(&data, &short_run(), &backend).expect_err("1x1 covariance");
        assert!(matches!(
            err,
            DrawsError::Mcmc(McmcError::DimensionMismatch {
                expected: 3,
                found: 1,
                ..
            })
        ));
    }

    #[test]
    fn draws_are_returned_on_the_original_scale() {
        let data = simulated_data(20, 3, 44);
        let run = sample_draws(&data, &short_run(), &ConstantSampler).expect("constant sampler");
        let sigma = run.samples[0].sigma().expect("fitted");
        // identity on the scaled outcome becomes s_y² on the original scale
        let diagonal = sigma["ctl"][(0, 0)];
        assert!(diagonal > 0.0);
        assert!(sigma["ctl"][(0, 1)].abs() < 1e-12);
        assert!((sigma["ctl"][(1, 1)] - diagonal).abs() < 1e-12);
    }
}

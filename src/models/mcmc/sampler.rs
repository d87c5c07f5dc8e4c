//! Data-augmentation Gibbs sampler.
//!
//! Each iteration imputes the missing outcomes from their conditional
//! normal given the observed visits, draws `beta ~ N(A⁻¹b, A⁻¹)` from the
//! GLS normal equations, and draws every covariance matrix from its
//! inverse-Wishart full conditional `IW(ν₀ + n_g, S₀ + Σ r rᵀ)` with
//! `ν₀ = v + 2` and `S₀ = (ν₀ - v - 1) Σ̂`.

use faer::Mat;
use rand::RngExt;
use rand::rngs::StdRng;

use super::{McmcBackend, McmcError, McmcFit, McmcOutput, McmcRequest};
use crate::inference::component_ess;
use crate::input::ModelInput;
use crate::utils::{
    add_in_place, cholesky_lower, matrix_is_finite, spd_inverse, spd_solve, sub_matrix,
    symmetrize, usize_to_f64,
};

/// Gibbs sampler for the multivariate normal regression model.
#[derive(Debug, Clone, Copy, Default)]
pub struct GibbsSampler;

struct SubjectGrid {
    start: usize,
    cov_group: usize,
    observed: Vec<usize>,
    missing: Vec<usize>,
}

struct State {
    beta: Vec<f64>,
    sigma: Vec<Mat<f64>>,
    outcome: Vec<f64>,
}

impl McmcBackend for GibbsSampler {
    fn sample(&self, request: &McmcRequest, rng: &mut StdRng) -> Result<McmcOutput, McmcError> {
        request.validate()?;
        let input = &request.input;
        let v = input.n_visits;
        let n_cov = request.n_cov_groups();
        let prior_df = usize_to_f64(v) + 2.0;
        let prior_scale: Vec<Mat<f64>> = request
            .prior_sigma
            .iter()
            .map(|sigma| {
                let factor = prior_df - usize_to_f64(v) - 1.0;
                Mat::from_fn(v, v, |i, j| factor * sigma[(i, j)])
            })
            .collect();

        let subjects: Vec<SubjectGrid> = input
            .subject_blocks()
            .into_iter()
            .map(|block| {
                let (observed, missing): (Vec<usize>, Vec<usize>) =
                    (0..v).partition(|&visit| input.outcome[block.start + visit].is_some());
                SubjectGrid {
                    start: block.start,
                    cov_group: if request.same_cov {
                        0
                    } else {
                        input.groups[block.start]
                    },
                    observed,
                    missing,
                }
            })
            .collect();
        let group_sizes: Vec<usize> = (0..n_cov)
            .map(|g| subjects.iter().filter(|s| s.cov_group == g).count())
            .collect();

        let mut state = State {
            beta: request.initial_beta.clone(),
            sigma: request.initial_sigma.clone(),
            outcome: input.outcome.iter().map(|y| y.unwrap_or(0.0)).collect(),
        };

        let config = request.config;
        let total = config.total_iterations();
        let report_every = (total / 10).max(1);
        let mut beta_draws = Vec::with_capacity(config.n_samples);
        let mut sigma_draws = Vec::with_capacity(config.n_samples);

        for iteration in 1..=total {
            impute_missing(rng, input, &subjects, &mut state)?;
            state.beta = draw_beta(rng, input, &subjects, &state)?;
            for group in 0..n_cov {
                let mut scale = prior_scale[group].clone();
                for subject in subjects.iter().filter(|s| s.cov_group == group) {
                    let residual = residuals(input, subject.start, &state);
                    for i in 0..v {
                        for j in 0..v {
                            scale[(i, j)] += residual[i] * residual[j];
                        }
                    }
                }
                let df = prior_df + usize_to_f64(group_sizes[group]);
                state.sigma[group] = sample_inverse_wishart(rng, df, &symmetrize(&scale))?;
            }

            if config.is_retained(iteration) {
                beta_draws.push(state.beta.clone());
                sigma_draws.push(state.sigma.clone());
            }
            if iteration % report_every == 0 {
                if request.verbose {
                    log::info!("MCMC iteration {iteration}/{total}");
                } else {
                    log::debug!("MCMC iteration {iteration}/{total}");
                }
            }
        }

        let effective_sample_size = component_ess(&beta_draws);
        Ok(McmcOutput {
            fit: McmcFit {
                config,
                seed: request.seed,
                same_cov: request.same_cov,
                effective_sample_size,
            },
            beta: beta_draws,
            sigma: sigma_draws,
        })
    }
}

fn linear_predictor(input: &ModelInput, row: usize, beta: &[f64]) -> f64 {
    (0..beta.len())
        .map(|col| input.design_matrix[(row, col)] * beta[col])
        .sum()
}

fn residuals(input: &ModelInput, start: usize, state: &State) -> Vec<f64> {
    (0..input.n_visits)
        .map(|visit| {
            let row = start + visit;
            state.outcome[row] - linear_predictor(input, row, &state.beta)
        })
        .collect()
}

fn impute_missing(
    rng: &mut StdRng,
    input: &ModelInput,
    subjects: &[SubjectGrid],
    state: &mut State,
) -> Result<(), McmcError> {
    for subject in subjects.iter().filter(|s| !s.missing.is_empty()) {
        let sigma = &state.sigma[subject.cov_group];
        let mean: Vec<f64> = (0..input.n_visits)
            .map(|visit| linear_predictor(input, subject.start + visit, &state.beta))
            .collect();
        let s_mm = sub_matrix(sigma, &subject.missing, &subject.missing);

        let (cond_mean, cond_cov) = if subject.observed.is_empty() {
            let cond_mean: Vec<f64> = subject.missing.iter().map(|&m| mean[m]).collect();
            (cond_mean, s_mm)
        } else {
            let s_oo = sub_matrix(sigma, &subject.observed, &subject.observed);
            let s_om = sub_matrix(sigma, &subject.observed, &subject.missing);
            let deviation = Mat::from_fn(subject.observed.len(), 1, |i, _| {
                let visit = subject.observed[i];
                state.outcome[subject.start + visit] - mean[visit]
            });
            let weights = spd_solve(&s_oo, &s_om)
                .ok_or(McmcError::NotPositiveDefinite("observed covariance block"))?;
            let shift = weights.transpose() * &deviation;
            let cond_mean: Vec<f64> = subject
                .missing
                .iter()
                .enumerate()
                .map(|(k, &m)| mean[m] + shift[(k, 0)])
                .collect();
            let reduction = s_om.transpose() * &weights;
            let cond_cov = Mat::from_fn(s_mm.nrows(), s_mm.ncols(), |i, j| {
                s_mm[(i, j)] - reduction[(i, j)]
            });
            (cond_mean, symmetrize(&cond_cov))
        };

        let lower = cholesky_lower(&cond_cov)
            .ok_or(McmcError::NotPositiveDefinite("conditional covariance"))?;
        let z: Vec<f64> = (0..cond_mean.len())
            .map(|_| sample_standard_normal(rng))
            .collect();
        for (k, &m) in subject.missing.iter().enumerate() {
            let noise: f64 = (0..=k).map(|l| lower[(k, l)] * z[l]).sum();
            let value = cond_mean[k] + noise;
            if !value.is_finite() {
                return Err(McmcError::NonFiniteDraw);
            }
            state.outcome[subject.start + m] = value;
        }
    }
    Ok(())
}

fn draw_beta(
    rng: &mut StdRng,
    input: &ModelInput,
    subjects: &[SubjectGrid],
    state: &State,
) -> Result<Vec<f64>, McmcError> {
    let p = input.n_coefficients();
    let v = input.n_visits;
    let precisions: Vec<Mat<f64>> = state
        .sigma
        .iter()
        .map(|sigma| spd_inverse(sigma).ok_or(McmcError::NotPositiveDefinite("covariance")))
        .collect::<Result<_, _>>()?;

    let mut xtx = Mat::<f64>::zeros(p, p);
    let mut xty = Mat::<f64>::zeros(p, 1);
    for subject in subjects {
        let x = Mat::from_fn(v, p, |i, j| input.design_matrix[(subject.start + i, j)]);
        let y = Mat::from_fn(v, 1, |i, _| state.outcome[subject.start + i]);
        let weighted = x.transpose() * &precisions[subject.cov_group];
        add_in_place(&mut xtx, &(&weighted * &x));
        add_in_place(&mut xty, &(&weighted * &y));
    }

    let covariance = spd_inverse(&symmetrize(&xtx))
        .ok_or(McmcError::NotPositiveDefinite("coefficient precision"))?;
    let mean = &covariance * &xty;
    let lower = cholesky_lower(&covariance)
        .ok_or(McmcError::NotPositiveDefinite("coefficient covariance"))?;
    let z = Mat::from_fn(p, 1, |_, _| sample_standard_normal(rng));
    let noise = &lower * &z;
    let beta: Vec<f64> = (0..p).map(|j| mean[(j, 0)] + noise[(j, 0)]).collect();
    if beta.iter().any(|b| !b.is_finite()) {
        return Err(McmcError::NonFiniteDraw);
    }
    Ok(beta)
}

fn sample_inverse_wishart(
    rng: &mut StdRng,
    df: f64,
    scale: &Mat<f64>,
) -> Result<Mat<f64>, McmcError> {
    let inv_scale =
        spd_inverse(scale).ok_or(McmcError::NotPositiveDefinite("inverse-Wishart scale"))?;
    let precision_sample = sample_wishart(rng, df, &inv_scale)?;
    let sigma = spd_inverse(&precision_sample)
        .ok_or(McmcError::NotPositiveDefinite("Wishart draw"))?;
    if matrix_is_finite(&sigma) {
        Ok(sigma)
    } else {
        Err(McmcError::NonFiniteDraw)
    }
}

fn sample_wishart(rng: &mut StdRng, df: f64, scale: &Mat<f64>) -> Result<Mat<f64>, McmcError> {
    let dim = scale.ncols();
    if dim == 0 || df <= usize_to_f64(dim.saturating_sub(1)) {
        return Err(McmcError::InvalidFit("Wishart degrees of freedom too small"));
    }
    let chol = cholesky_lower(scale).ok_or(McmcError::NotPositiveDefinite("Wishart scale"))?;
    let mut bartlett = Mat::<f64>::zeros(dim, dim);
    for row in 0..dim {
        let dof = df - usize_to_f64(row);
        bartlett[(row, row)] = sample_chi_square(rng, dof).sqrt();
        for col in 0..row {
            bartlett[(row, col)] = sample_standard_normal(rng);
        }
    }
    let product = &chol * &bartlett;
    Ok(&product * product.transpose())
}

fn sample_chi_square(rng: &mut StdRng, dof: f64) -> f64 {
    sample_gamma(rng, 0.5 * dof, 2.0)
}

fn sample_gamma(rng: &mut StdRng, shape: f64, scale: f64) -> f64 {
    if !(shape > 0.0 && scale > 0.0) {
        return f64::NAN;
    }

    if shape < 1.0 {
        let u = (1.0_f64 - rng.random::<f64>()).max(f64::MIN_POSITIVE);
        return sample_gamma(rng, shape + 1.0, scale) * u.powf(1.0 / shape);
    }

    // Marsaglia-Tsang squeeze
    let d = shape - (1.0 / 3.0);
    let c = (1.0 / (9.0 * d)).sqrt();
    loop {
        let z = sample_standard_normal(rng);
        let t = c.mul_add(z, 1.0);
        if t <= 0.0 {
            continue;
        }
        let cube = t * t * t;
        let u = rng.random::<f64>();
        if u < (0.0331 * z * z * z).mul_add(-z, 1.0)
            || u.ln() < (0.5 * z).mul_add(z, d * (1.0 - cube + cube.ln()))
        {
            return scale * d * cube;
        }
    }
}

fn sample_standard_normal(rng: &mut StdRng) -> f64 {
    let u1 = (1.0_f64 - rng.random::<f64>()).max(f64::MIN_POSITIVE);
    let u2 = rng.random::<f64>();
    (-2.0_f64 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use super::*;
    use crate::inference::McmcConfig;
    use crate::utils::max_abs_diff;

    fn grid(n_subjects: usize, seed: u64) -> ModelInput {
        let mut rng = StdRng::seed_from_u64(seed);
        let n_rows = n_subjects * 2;
        let outcome = (0..n_rows)
            .map(|row| {
                let y = 2.0 + usize_to_f64(row % 2) + sample_standard_normal(&mut rng);
                // drop second visit for every third subject
                if row % 2 == 1 && (row / 2) % 3 == 0 {
                    None
                } else {
                    Some(y)
                }
            })
            .collect();
        ModelInput {
            design_matrix: Mat::from_fn(n_rows, 2, |row, col| {
                if col == 0 { 1.0 } else { usize_to_f64(row % 2) }
            }),
            outcome,
            subjects: (0..n_rows).map(|row| row / 2).collect(),
            visits: (0..n_rows).map(|row| row % 2).collect(),
            groups: vec![0; n_rows],
            n_subjects,
            n_visits: 2,
            group_levels: vec!["A".to_string()],
            column_names: vec!["(Intercept)".to_string(), "visit2".to_string()],
        }
    }

    fn request(input: ModelInput) -> McmcRequest {
        McmcRequest {
            input,
            config: McmcConfig {
                n_samples: 50,
                burn_in: 50,
                burn_between: 2,
            },
            same_cov: true,
            seed: 1,
            initial_beta: vec![0.0, 0.0],
            initial_sigma: vec![Mat::identity(2, 2)],
            prior_sigma: vec![Mat::identity(2, 2)],
            verbose: false,
        }
    }

    #[test]
    fn returns_requested_number_of_draws() {
        let mut rng = StdRng::seed_from_u64(3);
        let output = GibbsSampler
            .sample(&request(grid(40, 2)), &mut rng)
            .expect("sampling succeeds");
        assert_eq!(output.beta.len(), 50);
        assert_eq!(output.sigma.len(), 50);
        assert_eq!(output.sigma[0].len(), 1);
        assert_eq!(output.fit.effective_sample_size.len(), 2);
        assert!(output.fit.validate().is_ok());
    }

    #[test]
    fn posterior_mean_tracks_data() {
        let mut rng = StdRng::seed_from_u64(5);
        let output = GibbsSampler
            .sample(&request(grid(200, 4)), &mut rng)
            .expect("sampling succeeds");
        let mean_intercept =
            output.beta.iter().map(|b| b[0]).sum::<f64>() / usize_to_f64(output.beta.len());
        let mean_visit =
            output.beta.iter().map(|b| b[1]).sum::<f64>() / usize_to_f64(output.beta.len());
        assert!((mean_intercept - 2.0).abs() < 0.3);
        assert!((mean_visit - 1.0).abs() < 0.3);
    }

    #[test]
    fn same_seed_gives_same_chain() {
        let req = request(grid(20, 6));
        let first = GibbsSampler
            .sample(&req, &mut StdRng::seed_from_u64(9))
            .expect("sampling succeeds");
        let second = GibbsSampler
            .sample(&req, &mut StdRng::seed_from_u64(9))
            .expect("sampling succeeds");
        assert_eq!(first.beta, second.beta);
        assert!(max_abs_diff(&first.sigma[10][0], &second.sigma[10][0]) < 1e-15);
    }

    #[test]
    fn rejects_mismatched_initial_values() {
        let mut req = request(grid(10, 1));
        req.initial_beta.push(0.0);
        let err = GibbsSampler
            .sample(&req, &mut StdRng::seed_from_u64(1))
            .expect_err("three coefficients for a two-column design");
        assert!(matches!(err, McmcError::DimensionMismatch { .. }));
    }

    #[test]
    fn wishart_draws_are_symmetric_positive_definite() {
        let mut rng = StdRng::seed_from_u64(13);
        let scale = Mat::from_fn(3, 3, |i, j| if i == j { 2.0 } else { 0.3 });
        for _ in 0..20 {
            let draw = sample_inverse_wishart(&mut rng, 8.0, &scale).expect("valid draw");
            assert!(cholesky_lower(&draw).is_some());
            assert!(max_abs_diff(&draw, &symmetrize(&draw)) < 1e-10);
        }
    }

    #[test]
    fn gamma_draws_have_expected_mean() {
        let mut rng = StdRng::seed_from_u64(17);
        let n = 20_000;
        let mean = (0..n).map(|_| sample_gamma(&mut rng, 0.7, 2.0)).sum::<f64>() / usize_to_f64(n);
        assert!((mean - 1.4).abs() < 0.05);
    }
}

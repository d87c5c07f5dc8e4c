//! Profile (restricted) likelihood of the MMRM.
//!
//! For fixed covariance parameters the GLS estimate of `beta` is available in
//! closed form, so the optimizers only search over `theta`. Each subject's
//! covariance sub-matrix is factorised once and the weighted cross products
//! `Xᵀ Σ⁻¹ X`, `Xᵀ Σ⁻¹ y` and `yᵀ Σ⁻¹ y` are accumulated.

use std::f64::consts::TAU;

use faer::Mat;

use super::covariance::{n_theta, sigma_to_theta, theta_to_sigma};
use super::types::{MmrmError, MmrmOptions};
use crate::input::ModelInput;
use crate::utils::{
    add_in_place, column_to_vec, factor_log_det, factor_solve, spd_factor, spd_solve,
    sub_matrix, symmetrize, usize_to_f64,
};

#[derive(Debug, Clone)]
struct SubjectBlock {
    rows: Vec<usize>,
    visits: Vec<usize>,
    cov_group: usize,
}

/// Value of the profiled objective at one `theta`.
#[derive(Debug, Clone)]
pub struct Profile {
    pub beta: Vec<f64>,
    pub neg_log_lik: f64,
}

/// Observed rows of a [`ModelInput`] arranged for likelihood evaluation.
#[derive(Debug, Clone)]
pub struct MmrmProblem<'a> {
    input: &'a ModelInput,
    options: MmrmOptions,
    blocks: Vec<SubjectBlock>,
    n_cov_groups: usize,
    n_observed: usize,
}

impl<'a> MmrmProblem<'a> {
    /// # Errors
    ///
    /// Returns `MmrmError` if the input is malformed or has fewer observed
    /// outcomes than coefficients.
    pub fn new(input: &'a ModelInput, options: &MmrmOptions) -> Result<Self, MmrmError> {
        input.validate()?;
        options.validate()?;
        let n_cov_groups = if options.same_cov {
            1
        } else {
            input.n_groups()
        };
        let mut blocks = Vec::new();
        for range in input.subject_blocks() {
            let rows: Vec<usize> = range
                .clone()
                .filter(|&row| input.outcome[row].is_some())
                .collect();
            if rows.is_empty() {
                continue;
            }
            let visits = rows.iter().map(|&row| input.visits[row]).collect();
            let cov_group = if options.same_cov {
                0
            } else {
                input.groups[range.start]
            };
            blocks.push(SubjectBlock {
                rows,
                visits,
                cov_group,
            });
        }
        let n_observed = input.n_observed();
        let coefficients = input.n_coefficients();
        if n_observed <= coefficients {
            return Err(MmrmError::TooFewObservations {
                observed: n_observed,
                coefficients,
            });
        }
        Ok(Self {
            input,
            options: *options,
            blocks,
            n_cov_groups,
            n_observed,
        })
    }

    #[must_use]
    pub const fn options(&self) -> &MmrmOptions {
        &self.options
    }

    #[must_use]
    pub const fn n_cov_groups(&self) -> usize {
        self.n_cov_groups
    }

    #[must_use]
    pub fn n_theta(&self) -> usize {
        self.n_cov_groups * n_theta(self.options.covariance, self.input.n_visits)
    }

    #[must_use]
    pub fn n_coefficients(&self) -> usize {
        self.input.n_coefficients()
    }

    /// Covariance matrices encoded by `theta`, one per covariance group.
    #[must_use]
    pub fn covariances(&self, theta: &[f64]) -> Option<Vec<Mat<f64>>> {
        if theta.len() != self.n_theta() {
            return None;
        }
        let block = n_theta(self.options.covariance, self.input.n_visits);
        theta
            .chunks(block)
            .map(|chunk| theta_to_sigma(self.options.covariance, chunk, self.input.n_visits))
            .collect()
    }

    /// GLS coefficients and negative log-likelihood, or `None` when the
    /// covariance is not positive definite or the weighted design is
    /// singular.
    #[must_use]
    pub fn profile(&self, theta: &[f64]) -> Option<Profile> {
        let covariances = self.covariances(theta)?;
        let p = self.n_coefficients();
        let design = &self.input.design_matrix;
        let mut xtx = Mat::<f64>::zeros(p, p);
        let mut xty = Mat::<f64>::zeros(p, 1);
        let mut yty = 0.0;
        let mut log_det = 0.0;

        for block in &self.blocks {
            let sigma = sub_matrix(&covariances[block.cov_group], &block.visits, &block.visits);
            let factor = spd_factor(&sigma)?;
            let x = Mat::from_fn(block.rows.len(), p, |i, j| design[(block.rows[i], j)]);
            let y = Mat::from_fn(block.rows.len(), 1, |i, _| {
                self.input.outcome[block.rows[i]].unwrap_or(0.0)
            });
            let weighted_x = factor_solve(&factor, &x);
            let weighted_y = factor_solve(&factor, &y);
            add_in_place(&mut xtx, &(x.transpose() * &weighted_x));
            add_in_place(&mut xty, &(x.transpose() * &weighted_y));
            yty += (0..y.nrows())
                .map(|i| y[(i, 0)] * weighted_y[(i, 0)])
                .sum::<f64>();
            log_det += factor_log_det(&factor);
        }

        let xtx_factor = spd_factor(&symmetrize(&xtx))?;
        let beta = factor_solve(&xtx_factor, &xty);
        if beta.nrows() != p || (0..p).any(|j| !beta[(j, 0)].is_finite()) {
            return None;
        }
        let explained: f64 = (0..p).map(|j| xty[(j, 0)] * beta[(j, 0)]).sum();
        let rss = (yty - explained).max(0.0);
        let n = usize_to_f64(self.n_observed);
        let minus_two_ll = if self.options.reml {
            log_det + factor_log_det(&xtx_factor) + rss + (n - usize_to_f64(p)) * TAU.ln()
        } else {
            log_det + rss + n * TAU.ln()
        };
        let neg_log_lik = 0.5 * minus_two_ll;
        neg_log_lik.is_finite().then(|| Profile {
            beta: column_to_vec(&beta),
            neg_log_lik,
        })
    }

    /// Moment-based starting values: OLS residuals give pairwise visit
    /// covariances per covariance group, falling back to the diagonal when
    /// that matrix is not positive definite.
    ///
    /// # Errors
    ///
    /// Returns `MmrmError` if the design is singular or no positive definite
    /// start can be formed.
    pub fn moment_start(&self) -> Result<Vec<f64>, MmrmError> {
        let p = self.n_coefficients();
        let design = &self.input.design_matrix;
        let observed: Vec<usize> = self.blocks.iter().flat_map(|b| b.rows.clone()).collect();
        let x = Mat::from_fn(observed.len(), p, |i, j| design[(observed[i], j)]);
        let y = Mat::from_fn(observed.len(), 1, |i, _| {
            self.input.outcome[observed[i]].unwrap_or(0.0)
        });
        let xtx = x.transpose() * &x;
        let xty = x.transpose() * &y;
        let beta = column_to_vec(&spd_solve(&xtx, &xty).ok_or(MmrmError::SingularDesign)?);
        let residual = |row: usize| -> f64 {
            let fitted: f64 = (0..p).map(|j| design[(row, j)] * beta[j]).sum();
            self.input.outcome[row].unwrap_or(0.0) - fitted
        };

        let pooled_var = {
            let sum: f64 = observed.iter().map(|&row| residual(row).powi(2)).sum();
            let dof = observed.len().saturating_sub(p).max(1);
            (sum / usize_to_f64(dof)).max(1e-8)
        };

        let v = self.input.n_visits;
        let mut theta = Vec::with_capacity(self.n_theta());
        for group in 0..self.n_cov_groups {
            let mut sums = Mat::<f64>::zeros(v, v);
            let mut counts = vec![vec![0usize; v]; v];
            for block in self.blocks.iter().filter(|b| b.cov_group == group) {
                let residuals: Vec<f64> = block.rows.iter().map(|&row| residual(row)).collect();
                for (a, &va) in block.visits.iter().enumerate() {
                    for (b, &vb) in block.visits.iter().enumerate() {
                        sums[(va, vb)] += residuals[a] * residuals[b];
                        counts[va][vb] += 1;
                    }
                }
            }
            let variance = |k: usize| {
                if counts[k][k] > 0 && sums[(k, k)] > 0.0 {
                    sums[(k, k)] / usize_to_f64(counts[k][k])
                } else {
                    pooled_var
                }
            };
            let pairwise = Mat::from_fn(v, v, |i, j| {
                if i == j {
                    variance(i)
                } else if counts[i][j] > 0 {
                    sums[(i, j)] / usize_to_f64(counts[i][j])
                } else {
                    0.0
                }
            });
            let block_theta = sigma_to_theta(self.options.covariance, &pairwise)
                .or_else(|| {
                    let diagonal =
                        Mat::from_fn(v, v, |i, j| if i == j { variance(i) } else { 0.0 });
                    sigma_to_theta(self.options.covariance, &diagonal)
                })
                .ok_or(MmrmError::InvalidStart)?;
            theta.extend(block_theta);
        }
        Ok(theta)
    }
}

//! Covariance parametrisations.
//!
//! Unconstrained parameter vectors map to positive definite visit-by-visit
//! matrices:
//!
//! - `us`: log-Cholesky. The first `v` entries are the logged diagonal of
//!   `L`, followed by the strictly lower entries row by row; `Σ = L Lᵀ`.
//! - `cs`, `ar1`: `[log sd, r]`.
//! - `csh`, `ar1h`: `[log sd_1, …, log sd_v, r]`.
//!
//! Compound-symmetry correlations are `lower + (1 - lower) · logistic(r)`
//! with `lower = -1 / (v - 1)`; autoregressive correlations are `tanh(r)`.

use faer::Mat;

use super::types::CovarianceStructure;
use crate::utils::{cholesky_lower, matrix_is_finite, usize_to_f64};

const CORRELATION_MARGIN: f64 = 1e-6;

/// Number of parameters of one covariance block.
#[must_use]
pub const fn n_theta(structure: CovarianceStructure, n_visits: usize) -> usize {
    match structure {
        CovarianceStructure::Us => n_visits * (n_visits + 1) / 2,
        CovarianceStructure::Cs | CovarianceStructure::Ar1 => 2,
        CovarianceStructure::Csh | CovarianceStructure::Ar1h => n_visits + 1,
    }
}

/// Covariance matrix for one parameter block, or `None` if the parameters
/// are non-finite or of the wrong length.
#[must_use]
pub fn theta_to_sigma(
    structure: CovarianceStructure,
    theta: &[f64],
    n_visits: usize,
) -> Option<Mat<f64>> {
    if theta.len() != n_theta(structure, n_visits) || theta.iter().any(|t| !t.is_finite()) {
        return None;
    }
    let sigma = match structure {
        CovarianceStructure::Us => {
            let lower = log_cholesky_factor(theta, n_visits);
            &lower * lower.transpose()
        }
        CovarianceStructure::Cs | CovarianceStructure::Csh => {
            let sds = standard_deviations(structure, theta, n_visits);
            let rho = cs_correlation(theta[theta.len() - 1], n_visits);
            Mat::from_fn(n_visits, n_visits, |i, j| {
                let corr = if i == j { 1.0 } else { rho };
                sds[i] * sds[j] * corr
            })
        }
        CovarianceStructure::Ar1 | CovarianceStructure::Ar1h => {
            let sds = standard_deviations(structure, theta, n_visits);
            let rho = theta[theta.len() - 1].tanh();
            Mat::from_fn(n_visits, n_visits, |i, j| {
                let lag = i32::try_from(i.abs_diff(j)).unwrap_or(i32::MAX);
                sds[i] * sds[j] * rho.powi(lag)
            })
        }
    };
    matrix_is_finite(&sigma).then_some(sigma)
}

/// Parameters that reproduce `sigma` under `structure`.
///
/// For structured covariances the matrix is projected: variances are kept
/// (averaged for homogeneous structures) and the correlation is averaged.
/// Returns `None` if `sigma` is not positive definite.
#[must_use]
pub fn sigma_to_theta(structure: CovarianceStructure, sigma: &Mat<f64>) -> Option<Vec<f64>> {
    let n_visits = sigma.nrows();
    let lower = cholesky_lower(sigma)?;
    let sds: Vec<f64> = (0..n_visits).map(|i| sigma[(i, i)].sqrt()).collect();
    let correlation = |i: usize, j: usize| sigma[(i, j)] / (sds[i] * sds[j]);
    let theta = match structure {
        CovarianceStructure::Us => {
            let mut theta: Vec<f64> = (0..n_visits).map(|i| lower[(i, i)].ln()).collect();
            for i in 1..n_visits {
                for j in 0..i {
                    theta.push(lower[(i, j)]);
                }
            }
            theta
        }
        CovarianceStructure::Cs | CovarianceStructure::Csh => {
            let mut pairs = Vec::new();
            for i in 1..n_visits {
                for j in 0..i {
                    pairs.push(correlation(i, j));
                }
            }
            let mut theta = log_sds(structure, &sds);
            theta.push(cs_parameter(mean(&pairs), n_visits));
            theta
        }
        CovarianceStructure::Ar1 | CovarianceStructure::Ar1h => {
            let lag_one: Vec<f64> = (1..n_visits).map(|i| correlation(i, i - 1)).collect();
            let rho = mean(&lag_one).clamp(-1.0 + CORRELATION_MARGIN, 1.0 - CORRELATION_MARGIN);
            let mut theta = log_sds(structure, &sds);
            theta.push(rho.atanh());
            theta
        }
    };
    theta.iter().all(|t| t.is_finite()).then_some(theta)
}

fn log_cholesky_factor(theta: &[f64], n_visits: usize) -> Mat<f64> {
    let mut lower = Mat::<f64>::zeros(n_visits, n_visits);
    let mut offset = n_visits;
    for i in 0..n_visits {
        lower[(i, i)] = theta[i].exp();
        for j in 0..i {
            lower[(i, j)] = theta[offset];
            offset += 1;
        }
    }
    lower
}

fn standard_deviations(structure: CovarianceStructure, theta: &[f64], n_visits: usize) -> Vec<f64> {
    match structure {
        CovarianceStructure::Cs | CovarianceStructure::Ar1 => vec![theta[0].exp(); n_visits],
        _ => theta[..n_visits].iter().map(|t| t.exp()).collect(),
    }
}

fn log_sds(structure: CovarianceStructure, sds: &[f64]) -> Vec<f64> {
    match structure {
        CovarianceStructure::Cs | CovarianceStructure::Ar1 => {
            let pooled = sds.iter().map(|sd| sd * sd).sum::<f64>() / usize_to_f64(sds.len());
            vec![0.5 * pooled.ln()]
        }
        _ => sds.iter().map(|sd| sd.ln()).collect(),
    }
}

fn cs_lower_bound(n_visits: usize) -> f64 {
    if n_visits > 1 {
        -1.0 / (usize_to_f64(n_visits) - 1.0)
    } else {
        0.0
    }
}

fn cs_correlation(r: f64, n_visits: usize) -> f64 {
    let lower = cs_lower_bound(n_visits);
    lower + (1.0 - lower) / (1.0 + (-r).exp())
}

fn cs_parameter(rho: f64, n_visits: usize) -> f64 {
    if n_visits < 2 {
        return 0.0;
    }
    let lower = cs_lower_bound(n_visits);
    let p = ((rho - lower) / (1.0 - lower)).clamp(CORRELATION_MARGIN, 1.0 - CORRELATION_MARGIN);
    (p / (1.0 - p)).ln()
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / usize_to_f64(values.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::max_abs_diff;
    use approx::assert_relative_eq;

    fn unstructured() -> Mat<f64> {
        Mat::from_fn(3, 3, |i, j| match (i, j) {
            (0, 0) => 2.0,
            (1, 1) => 3.0,
            (2, 2) => 4.0,
            (0, 1) | (1, 0) => 0.8,
            (0, 2) | (2, 0) => 0.4,
            _ => 1.2,
        })
    }

    #[test]
    fn parameter_counts() {
        assert_eq!(n_theta(CovarianceStructure::Us, 4), 10);
        assert_eq!(n_theta(CovarianceStructure::Cs, 4), 2);
        assert_eq!(n_theta(CovarianceStructure::Csh, 4), 5);
        assert_eq!(n_theta(CovarianceStructure::Ar1, 1), 2);
        assert_eq!(n_theta(CovarianceStructure::Ar1h, 3), 4);
    }

    #[test]
    fn unstructured_parameters_reproduce_matrix() {
        let sigma = unstructured();
        let theta = sigma_to_theta(CovarianceStructure::Us, &sigma).expect("pd");
        let rebuilt = theta_to_sigma(CovarianceStructure::Us, &theta, 3).expect("valid");
        assert!(max_abs_diff(&rebuilt, &sigma) < 1e-12);
    }

    #[test]
    fn compound_symmetry_has_constant_correlation() {
        let sigma = theta_to_sigma(CovarianceStructure::Csh, &[0.0, 0.5, 1.0, 0.3], 3)
            .expect("valid");
        let corr = |i: usize, j: usize| sigma[(i, j)] / (sigma[(i, i)] * sigma[(j, j)]).sqrt();
        assert_relative_eq!(corr(0, 1), corr(1, 2), epsilon = 1e-12);
        assert_relative_eq!(corr(0, 1), corr(0, 2), epsilon = 1e-12);
        assert!(cholesky_lower(&sigma).is_some());
    }

    #[test]
    fn compound_symmetry_stays_positive_definite_for_negative_parameters() {
        let sigma = theta_to_sigma(CovarianceStructure::Cs, &[0.0, -12.0], 4).expect("valid");
        assert!(cholesky_lower(&sigma).is_some());
    }

    #[test]
    fn autoregressive_correlation_decays_with_lag() {
        let sigma = theta_to_sigma(CovarianceStructure::Ar1, &[0.0, 0.5f64.atanh()], 3)
            .expect("valid");
        assert_relative_eq!(sigma[(0, 1)], 0.5, epsilon = 1e-12);
        assert_relative_eq!(sigma[(0, 2)], 0.25, epsilon = 1e-12);
        assert_relative_eq!(sigma[(2, 2)], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn structured_round_trip_recovers_structured_matrix() {
        for structure in [
            CovarianceStructure::Cs,
            CovarianceStructure::Csh,
            CovarianceStructure::Ar1,
            CovarianceStructure::Ar1h,
        ] {
            let theta: Vec<f64> = match structure {
                CovarianceStructure::Cs | CovarianceStructure::Ar1 => vec![0.3, 0.4],
                _ => vec![0.1, 0.2, 0.3, 0.4],
            };
            let sigma = theta_to_sigma(structure, &theta, 3).expect("valid");
            let back = sigma_to_theta(structure, &sigma).expect("pd");
            for (a, b) in theta.iter().zip(&back) {
                assert_relative_eq!(a, b, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn wrong_length_or_non_finite_parameters_are_rejected() {
        assert!(theta_to_sigma(CovarianceStructure::Us, &[0.0, 0.0], 2).is_none());
        assert!(theta_to_sigma(CovarianceStructure::Cs, &[f64::NAN, 0.0], 2).is_none());
    }

    #[test]
    fn single_visit_structures_are_variances() {
        let sigma = theta_to_sigma(CovarianceStructure::Cs, &[0.5, 0.0], 1).expect("valid");
        assert_relative_eq!(sigma[(0, 0)], 1.0f64.exp(), epsilon = 1e-12);
        let theta = sigma_to_theta(CovarianceStructure::Ar1h, &sigma).expect("pd");
        assert_eq!(theta.len(), 2);
    }
}

//! Centring and scaling of the design and outcome before sampling.
//!
//! Non-intercept columns become `(x - m) / s` and the outcome `(y - m_y) /
//! s_y`, so coefficients on the original scale are
//! `β_j = s_y b_j / s_j` and `β_0 = m_y + s_y (b_0 - Σ b_j m_j / s_j)`.
//! Covariances scale by `s_y²`.

use faer::Mat;

use super::McmcError;
use crate::input::ModelInput;
use crate::utils::usize_to_f64;

#[derive(Debug, Clone, PartialEq)]
pub struct Scaler {
    centers: Vec<f64>,
    scales: Vec<f64>,
    outcome_center: f64,
    outcome_scale: f64,
}

impl Scaler {
    /// Estimate centres and scales from `input`. The outcome uses observed
    /// values only; constant columns are left untouched.
    ///
    /// # Errors
    ///
    /// Returns `McmcError::MissingIntercept` unless the first column is all
    /// ones.
    pub fn fit(input: &ModelInput) -> Result<Self, McmcError> {
        let design = &input.design_matrix;
        let rows = design.nrows();
        if design.ncols() == 0 || (0..rows).any(|row| (design[(row, 0)] - 1.0).abs() > 1e-12) {
            return Err(McmcError::MissingIntercept);
        }

        let mut centers = vec![0.0; design.ncols()];
        let mut scales = vec![1.0; design.ncols()];
        for col in 1..design.ncols() {
            let column: Vec<f64> = (0..rows).map(|row| design[(row, col)]).collect();
            let (mean, sd) = mean_sd(&column);
            if sd > 0.0 {
                centers[col] = mean;
                scales[col] = sd;
            }
        }

        let observed: Vec<f64> = input.outcome.iter().flatten().copied().collect();
        let (outcome_center, sd) = mean_sd(&observed);
        let outcome_scale = if sd > 0.0 { sd } else { 1.0 };

        Ok(Self {
            centers,
            scales,
            outcome_center,
            outcome_scale,
        })
    }

    #[must_use]
    pub const fn outcome_scale(&self) -> f64 {
        self.outcome_scale
    }

    #[must_use]
    pub fn scale_input(&self, input: &ModelInput) -> ModelInput {
        let design = &input.design_matrix;
        ModelInput {
            design_matrix: Mat::from_fn(design.nrows(), design.ncols(), |row, col| {
                (design[(row, col)] - self.centers[col]) / self.scales[col]
            }),
            outcome: input
                .outcome
                .iter()
                .map(|value| value.map(|y| (y - self.outcome_center) / self.outcome_scale))
                .collect(),
            ..input.clone()
        }
    }

    #[must_use]
    pub fn unscale_beta(&self, scaled: &[f64]) -> Vec<f64> {
        let mut beta: Vec<f64> = scaled
            .iter()
            .enumerate()
            .map(|(j, b)| self.outcome_scale * b / self.scales[j])
            .collect();
        let shift: f64 = (1..scaled.len())
            .map(|j| scaled[j] * self.centers[j] / self.scales[j])
            .sum();
        beta[0] = self.outcome_center + self.outcome_scale * (scaled[0] - shift);
        beta
    }

    #[must_use]
    pub fn scale_beta(&self, beta: &[f64]) -> Vec<f64> {
        let mut scaled: Vec<f64> = beta
            .iter()
            .enumerate()
            .map(|(j, b)| b * self.scales[j] / self.outcome_scale)
            .collect();
        let shift: f64 = (1..beta.len())
            .map(|j| scaled[j] * self.centers[j] / self.scales[j])
            .sum();
        scaled[0] = (beta[0] - self.outcome_center) / self.outcome_scale + shift;
        scaled
    }

    #[must_use]
    pub fn unscale_sigma(&self, sigma: &Mat<f64>) -> Mat<f64> {
        let factor = self.outcome_scale * self.outcome_scale;
        Mat::from_fn(sigma.nrows(), sigma.ncols(), |i, j| sigma[(i, j)] * factor)
    }

    #[must_use]
    pub fn scale_sigma(&self, sigma: &Mat<f64>) -> Mat<f64> {
        let factor = self.outcome_scale * self.outcome_scale;
        Mat::from_fn(sigma.nrows(), sigma.ncols(), |i, j| sigma[(i, j)] / factor)
    }
}

fn mean_sd(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = usize_to_f64(values.len());
    let mean = values.iter().sum::<f64>() / n;
    if values.len() < 2 {
        return (mean, 0.0);
    }
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, var.sqrt())
}

//! # Utilities
//!
//! Dense linear algebra helpers shared by the MMRM and MCMC backends.
//! Factorisations and solves go through faer's Cholesky (`Llt`).

use faer::linalg::solvers::{Llt, Solve};
use faer::{Mat, Side};

#[must_use]
pub fn usize_to_f64(value: usize) -> f64 {
    f64::from(u32::try_from(value).unwrap_or(u32::MAX))
}

#[must_use]
pub fn matrix_is_finite(matrix: &Mat<f64>) -> bool {
    for i in 0..matrix.nrows() {
        for j in 0..matrix.ncols() {
            if !matrix[(i, j)].is_finite() {
                return false;
            }
        }
    }
    true
}

/// Explicit lower Cholesky factor `L` with `L Lᵀ = matrix`, used where the
/// sampler multiplies by `L`. `None` if the matrix is not square or not
/// numerically positive definite.
#[must_use]
pub fn cholesky_lower(matrix: &Mat<f64>) -> Option<Mat<f64>> {
    let dim = matrix.ncols();
    if matrix.nrows() != dim {
        return None;
    }
    let mut lower = Mat::<f64>::zeros(dim, dim);
    for row in 0..dim {
        for col in 0..=row {
            let mut sum = matrix[(row, col)];
            for k in 0..col {
                sum -= lower[(row, k)] * lower[(col, k)];
            }
            if row == col {
                if !(sum > 0.0) || !sum.is_finite() {
                    return None;
                }
                lower[(row, col)] = sum.sqrt();
            } else {
                lower[(row, col)] = sum / lower[(col, col)];
            }
        }
    }
    Some(lower)
}

/// Cholesky factorisation of a symmetric positive definite matrix, or
/// `None` if the matrix is not square, not finite or not positive definite.
#[must_use]
pub fn spd_factor(matrix: &Mat<f64>) -> Option<Llt<f64>> {
    if matrix.nrows() != matrix.ncols() || !matrix_is_finite(matrix) {
        return None;
    }
    matrix.as_ref().llt(Side::Lower).ok()
}

/// `A⁻¹ B` given the factorisation of `A`.
#[must_use]
pub fn factor_solve(factor: &Llt<f64>, rhs: &Mat<f64>) -> Mat<f64> {
    let mut solution = rhs.clone();
    factor.solve_in_place(solution.as_mut());
    solution
}

/// `log |A|` given the factorisation of `A`.
#[must_use]
pub fn factor_log_det(factor: &Llt<f64>) -> f64 {
    let lower = factor.L();
    2.0 * (0..lower.nrows())
        .map(|idx| lower[(idx, idx)].ln())
        .sum::<f64>()
}

/// Solve `A X = B` for symmetric positive definite `A`.
#[must_use]
pub fn spd_solve(matrix: &Mat<f64>, rhs: &Mat<f64>) -> Option<Mat<f64>> {
    let factor = spd_factor(matrix)?;
    let solution = factor_solve(&factor, rhs);
    matrix_is_finite(&solution).then_some(solution)
}

/// Inverse of a symmetric positive definite matrix.
#[must_use]
pub fn spd_inverse(matrix: &Mat<f64>) -> Option<Mat<f64>> {
    let dim = matrix.nrows();
    spd_solve(matrix, &Mat::identity(dim, dim)).map(|inverse| symmetrize(&inverse))
}

/// `target += other`, element-wise.
pub fn add_in_place(target: &mut Mat<f64>, other: &Mat<f64>) {
    for i in 0..target.nrows() {
        for j in 0..target.ncols() {
            target[(i, j)] += other[(i, j)];
        }
    }
}

#[must_use]
pub fn symmetrize(matrix: &Mat<f64>) -> Mat<f64> {
    Mat::from_fn(matrix.nrows(), matrix.ncols(), |row, col| {
        0.5 * (matrix[(row, col)] + matrix[(col, row)])
    })
}

#[must_use]
pub fn vec_to_column(values: &[f64]) -> Mat<f64> {
    Mat::from_fn(values.len(), 1, |row, _| values[row])
}

#[must_use]
pub fn column_to_vec(column: &Mat<f64>) -> Vec<f64> {
    (0..column.nrows()).map(|row| column[(row, 0)]).collect()
}

/// Square sub-matrix on the given row/column indices.
#[must_use]
pub fn sub_matrix(matrix: &Mat<f64>, rows: &[usize], cols: &[usize]) -> Mat<f64> {
    Mat::from_fn(rows.len(), cols.len(), |i, j| matrix[(rows[i], cols[j])])
}

#[must_use]
pub fn max_abs_diff(a: &Mat<f64>, b: &Mat<f64>) -> f64 {
    let mut max = 0.0;
    for i in 0..a.nrows() {
        for j in 0..a.ncols() {
            let diff = (a[(i, j)] - b[(i, j)]).abs();
            if diff > max {
                max = diff;
            }
        }
    }
    max
}

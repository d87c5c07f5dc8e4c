//! # Model inputs
//!
//! Longitudinal data handling and the design container passed to model
//! backends.
//!
//! # Examples
//!
//! ```
//! use faer::Mat;
//! use refbased_mi::ModelInput;
//!
//! let input = ModelInput {
//!     design_matrix: Mat::from_fn(4, 1, |_, _| 1.0),
//!     outcome: vec![Some(1.0), None, Some(0.5), Some(0.2)],
//!     subjects: vec![0, 0, 1, 1],
//!     visits: vec![0, 1, 0, 1],
//!     groups: vec![0, 0, 1, 1],
//!     n_subjects: 2,
//!     n_visits: 2,
//!     group_levels: vec!["A".to_string(), "B".to_string()],
//!     column_names: vec!["(Intercept)".to_string()],
//! };
//!
//! assert!(input.validate().is_ok());
//! assert!(input.validate_complete().is_ok());
//! ```

use faer::Mat;
use thiserror::Error;

use crate::utils::matrix_is_finite;

pub mod formula;
pub mod ice;
pub mod longitudinal;
pub mod vars;

pub use formula::{DesignSpec, FormulaError, ModelFormula, Term};
pub use ice::{IceRecord, Strategy};
pub use longitudinal::{
    CovariateKind, CovariateValue, DataRow, DataSubset, LongData, LongDataError, SubjectVisit,
};
pub use vars::Vars;

/// Errors returned when validating model inputs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InputError {
    #[error("design matrix must have at least one column")]
    EmptyDesign,
    #[error("design matrix has no rows")]
    NoRows,
    #[error("design matrix rows ({rows}) must match {field} length ({len})")]
    DimensionMismatch {
        field: &'static str,
        rows: usize,
        len: usize,
    },
    #[error("column names ({names}) must match design columns ({cols})")]
    ColumnNameMismatch { names: usize, cols: usize },
    #[error("design matrix contains non-finite values")]
    NonFiniteDesign,
    #[error("outcome contains non-finite values")]
    NonFiniteOutcome,
    #[error("outcome has no observed values")]
    NoObservedOutcome,
    #[error("{field} index {index} is out of range ({len})")]
    IndexOutOfRange {
        field: &'static str,
        index: usize,
        len: usize,
    },
    #[error("subject {subject} changes group across rows")]
    InconsistentGroup { subject: usize },
    #[error("rows do not form a complete subject-by-visit grid (subject {subject})")]
    IncompleteGrid { subject: usize },
}

/// Design matrix, response and row labels of one model fit.
///
/// Rows of one subject must be contiguous; `subjects` holds the occurrence
/// index of the subject within the fitted id list, so resampled duplicates
/// are distinct clusters.
#[derive(Debug, Clone)]
pub struct ModelInput {
    pub design_matrix: Mat<f64>,
    pub outcome: Vec<Option<f64>>,
    pub subjects: Vec<usize>,
    pub visits: Vec<usize>,
    pub groups: Vec<usize>,
    pub n_subjects: usize,
    pub n_visits: usize,
    pub group_levels: Vec<String>,
    pub column_names: Vec<String>,
}

impl ModelInput {
    #[must_use]
    pub const fn design_matrix(&self) -> &Mat<f64> {
        &self.design_matrix
    }

    #[must_use]
    pub fn n_rows(&self) -> usize {
        self.design_matrix.nrows()
    }

    #[must_use]
    pub fn n_coefficients(&self) -> usize {
        self.design_matrix.ncols()
    }

    #[must_use]
    pub fn n_groups(&self) -> usize {
        self.group_levels.len()
    }

    #[must_use]
    pub fn n_observed(&self) -> usize {
        self.outcome.iter().filter(|value| value.is_some()).count()
    }

    /// Row ranges of each subject, in row order.
    #[must_use]
    pub fn subject_blocks(&self) -> Vec<std::ops::Range<usize>> {
        let mut blocks = Vec::new();
        let mut start = 0;
        for row in 1..=self.subjects.len() {
            if row == self.subjects.len() || self.subjects[row] != self.subjects[start] {
                blocks.push(start..row);
                start = row;
            }
        }
        blocks
    }

    /// Validate shapes, labels and values.
    ///
    /// # Errors
    ///
    /// Returns `InputError` if inputs are malformed.
    pub fn validate(&self) -> Result<(), InputError> {
        let rows = self.design_matrix.nrows();
        if self.design_matrix.ncols() == 0 {
            return Err(InputError::EmptyDesign);
        }
        if rows == 0 {
            return Err(InputError::NoRows);
        }
        for (field, len) in [
            ("outcome", self.outcome.len()),
            ("subjects", self.subjects.len()),
            ("visits", self.visits.len()),
            ("groups", self.groups.len()),
        ] {
            if len != rows {
                return Err(InputError::DimensionMismatch { field, rows, len });
            }
        }
        if self.column_names.len() != self.design_matrix.ncols() {
            return Err(InputError::ColumnNameMismatch {
                names: self.column_names.len(),
                cols: self.design_matrix.ncols(),
            });
        }
        if !matrix_is_finite(&self.design_matrix) {
            return Err(InputError::NonFiniteDesign);
        }
        if self.outcome.iter().flatten().any(|value| !value.is_finite()) {
            return Err(InputError::NonFiniteOutcome);
        }
        if self.n_observed() == 0 {
            return Err(InputError::NoObservedOutcome);
        }
        check_range("subjects", &self.subjects, self.n_subjects)?;
        check_range("visits", &self.visits, self.n_visits)?;
        check_range("groups", &self.groups, self.group_levels.len())?;
        for block in self.subject_blocks() {
            let group = self.groups[block.start];
            if self.groups[block.clone()].iter().any(|g| *g != group) {
                return Err(InputError::InconsistentGroup {
                    subject: self.subjects[block.start],
                });
            }
        }
        Ok(())
    }

    /// Validate and additionally require every subject to carry every visit
    /// in visit order.
    ///
    /// # Errors
    ///
    /// Returns `InputError` if inputs are malformed or the grid is incomplete.
    pub fn validate_complete(&self) -> Result<(), InputError> {
        self.validate()?;
        let blocks = self.subject_blocks();
        if blocks.len() != self.n_subjects {
            return Err(InputError::IncompleteGrid {
                subject: blocks.len(),
            });
        }
        for block in blocks {
            let subject = self.subjects[block.start];
            if block.len() != self.n_visits
                || self.visits[block].iter().enumerate().any(|(idx, v)| idx != *v)
            {
                return Err(InputError::IncompleteGrid { subject });
            }
        }
        Ok(())
    }
}

fn check_range(field: &'static str, values: &[usize], len: usize) -> Result<(), InputError> {
    match values.iter().find(|value| **value >= len) {
        Some(index) => Err(InputError::IndexOutOfRange {
            field,
            index: *index,
            len,
        }),
        None => Ok(()),
    }
}

//! Parameter samples and ordered sample lists.

use std::collections::BTreeMap;

use faer::Mat;
use thiserror::Error;

use crate::utils::matrix_is_finite;

/// Errors returned when a sample is malformed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SampleError {
    #[error("{field} must contain more than one subject id, found {found}")]
    TooFewIds { field: &'static str, found: usize },
    #[error("coefficient vector is empty")]
    EmptyBeta,
    #[error("coefficients contain non-finite values")]
    NonFiniteBeta,
    #[error("covariance map is empty")]
    EmptySigma,
    #[error("covariance for `{0}` is not square")]
    NonSquareSigma(String),
    #[error("covariance for `{0}` contains non-finite values")]
    NonFiniteSigma(String),
    #[error("covariance matrices differ in dimension")]
    SigmaDimensionMismatch,
    #[error("covariance parameters contain non-finite values")]
    NonFiniteTheta,
}

/// Fitted parameters of one sample.
#[derive(Debug, Clone)]
pub struct SampleFit {
    pub beta: Vec<f64>,
    /// Covariance matrix for each group level.
    pub sigma: BTreeMap<String, Mat<f64>>,
    pub theta: Vec<f64>,
}

impl SampleFit {
    fn validate(&self) -> Result<(), SampleError> {
        if self.beta.is_empty() {
            return Err(SampleError::EmptyBeta);
        }
        if self.beta.iter().any(|b| !b.is_finite()) {
            return Err(SampleError::NonFiniteBeta);
        }
        let mut dim = None;
        for (group, matrix) in &self.sigma {
            if matrix.nrows() != matrix.ncols() {
                return Err(SampleError::NonSquareSigma(group.clone()));
            }
            if !matrix_is_finite(matrix) {
                return Err(SampleError::NonFiniteSigma(group.clone()));
            }
            match dim {
                None => dim = Some(matrix.nrows()),
                Some(d) if d != matrix.nrows() => {
                    return Err(SampleError::SigmaDimensionMismatch);
                }
                Some(_) => {}
            }
        }
        if dim.is_none() {
            return Err(SampleError::EmptySigma);
        }
        if self.theta.iter().any(|t| !t.is_finite()) {
            return Err(SampleError::NonFiniteTheta);
        }
        Ok(())
    }

    #[must_use]
    pub fn sigma_dim(&self) -> usize {
        self.sigma.values().next().map_or(0, Mat::nrows)
    }
}

/// One parameter draw together with the subjects it was fitted on.
///
/// `ids` are the subjects the sample stands for; `ids_samp` are the subjects
/// actually used in the fit, which differ for approximate Bayes.
#[derive(Debug, Clone)]
pub struct Sample {
    ids: Vec<String>,
    ids_samp: Vec<String>,
    fit: Option<SampleFit>,
}

impl Sample {
    /// # Errors
    ///
    /// Returns `SampleError` if an id list is too short or the fit is
    /// malformed.
    pub fn fitted(
        ids: Vec<String>,
        ids_samp: Vec<String>,
        fit: SampleFit,
    ) -> Result<Self, SampleError> {
        check_ids("ids", &ids)?;
        check_ids("ids_samp", &ids_samp)?;
        fit.validate()?;
        Ok(Self {
            ids,
            ids_samp,
            fit: Some(fit),
        })
    }

    /// A sample whose model fit failed.
    ///
    /// # Errors
    ///
    /// Returns `SampleError` if an id list is too short.
    pub fn failed(ids: Vec<String>, ids_samp: Vec<String>) -> Result<Self, SampleError> {
        check_ids("ids", &ids)?;
        check_ids("ids_samp", &ids_samp)?;
        Ok(Self {
            ids,
            ids_samp,
            fit: None,
        })
    }

    /// Copy with `ids` replaced, re-validated.
    ///
    /// # Errors
    ///
    /// Returns `SampleError` if `ids` is too short.
    pub fn with_ids(&self, ids: Vec<String>) -> Result<Self, SampleError> {
        check_ids("ids", &ids)?;
        Ok(Self {
            ids,
            ..self.clone()
        })
    }

    #[must_use]
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    #[must_use]
    pub fn ids_samp(&self) -> &[String] {
        &self.ids_samp
    }

    #[must_use]
    pub const fn fit(&self) -> Option<&SampleFit> {
        self.fit.as_ref()
    }

    #[must_use]
    pub const fn failed_fit(&self) -> bool {
        self.fit.is_none()
    }

    #[must_use]
    pub fn beta(&self) -> Option<&[f64]> {
        self.fit.as_ref().map(|fit| fit.beta.as_slice())
    }

    #[must_use]
    pub fn sigma(&self) -> Option<&BTreeMap<String, Mat<f64>>> {
        self.fit.as_ref().map(|fit| &fit.sigma)
    }

    #[must_use]
    pub fn theta(&self) -> Option<&[f64]> {
        self.fit.as_ref().map(|fit| fit.theta.as_slice())
    }
}

fn check_ids(field: &'static str, ids: &[String]) -> Result<(), SampleError> {
    if ids.len() > 1 {
        Ok(())
    } else {
        Err(SampleError::TooFewIds {
            field,
            found: ids.len(),
        })
    }
}

/// Ordered collection of samples.
#[derive(Debug, Clone, Default)]
pub struct SampleList {
    samples: Vec<Sample>,
}

impl SampleList {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            samples: Vec::new(),
        }
    }

    pub fn push(&mut self, sample: Sample) {
        self.samples.push(sample);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Sample> {
        self.samples.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Sample> {
        self.samples.iter()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[Sample] {
        &self.samples
    }

    #[must_use]
    pub fn n_failed(&self) -> usize {
        self.samples.iter().filter(|s| s.failed_fit()).count()
    }
}

impl From<Vec<Sample>> for SampleList {
    fn from(samples: Vec<Sample>) -> Self {
        Self { samples }
    }
}

impl FromIterator<Sample> for SampleList {
    fn from_iter<I: IntoIterator<Item = Sample>>(iter: I) -> Self {
        Self {
            samples: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a SampleList {
    type Item = &'a Sample;
    type IntoIter = std::slice::Iter<'a, Sample>;

    fn into_iter(self) -> Self::IntoIter {
        self.samples.iter()
    }
}

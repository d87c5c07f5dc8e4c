//! Validated result of a draws run.

use std::sync::Arc;

use super::DrawsError;
use super::method::{DrawsKind, Method};
use super::sample::SampleList;
use crate::input::{LongData, ModelFormula};
use crate::models::mcmc::McmcFit;

/// Parameter samples of one method run, ready for imputation.
///
/// The dataset is shared, not copied. `fit` is present exactly for the
/// Bayesian method.
#[derive(Debug, Clone)]
pub struct Draws {
    data: Arc<LongData>,
    method: Method,
    samples: SampleList,
    fit: Option<McmcFit>,
    n_failures: usize,
    formula: ModelFormula,
    kind: DrawsKind,
}

impl Draws {
    /// Assemble and validate a result.
    ///
    /// # Errors
    ///
    /// Returns `DrawsError` if the method, formula, samples or sampler fit
    /// are inconsistent with each other or with the data.
    pub fn new(
        data: Arc<LongData>,
        method: Method,
        samples: SampleList,
        formula: ModelFormula,
        n_failures: usize,
        fit: Option<McmcFit>,
    ) -> Result<Self, DrawsError> {
        method.validate()?;
        formula.validate(&data)?;
        check_samples(&data, &samples)?;

        match (&method, &fit) {
            (Method::Bayes(_), Some(fit)) => fit.validate()?,
            (Method::Bayes(_), None) => {
                return Err(invalid("Bayesian draws require the sampler fit"));
            }
            (_, Some(_)) => {
                return Err(invalid("only Bayesian draws carry a sampler fit"));
            }
            (_, None) => {}
        }

        let expected = method.expected_samples(data.n_subjects());
        if samples.len() != expected {
            return Err(DrawsError::InvalidDraws(format!(
                "expected {expected} samples, found {}",
                samples.len()
            )));
        }

        Ok(Self {
            kind: method.kind(),
            data,
            method,
            samples,
            fit,
            n_failures,
            formula,
        })
    }

    #[must_use]
    pub fn data(&self) -> &Arc<LongData> {
        &self.data
    }

    #[must_use]
    pub const fn method(&self) -> &Method {
        &self.method
    }

    #[must_use]
    pub const fn samples(&self) -> &SampleList {
        &self.samples
    }

    #[must_use]
    pub const fn fit(&self) -> Option<&McmcFit> {
        self.fit.as_ref()
    }

    /// Failed resampling fits that were discarded and redrawn.
    #[must_use]
    pub const fn n_failures(&self) -> usize {
        self.n_failures
    }

    #[must_use]
    pub const fn formula(&self) -> &ModelFormula {
        &self.formula
    }

    #[must_use]
    pub const fn kind(&self) -> DrawsKind {
        self.kind
    }
}

fn invalid(message: &str) -> DrawsError {
    DrawsError::InvalidDraws(message.to_string())
}

fn check_samples(data: &LongData, samples: &SampleList) -> Result<(), DrawsError> {
    let Some(first) = samples.get(0).and_then(|sample| sample.fit()) else {
        return Err(invalid("first sample is missing or failed"));
    };
    let n_beta = first.beta.len();
    let dim = first.sigma_dim();

    for (index, sample) in samples.iter().enumerate() {
        let Some(fit) = sample.fit() else {
            return Err(DrawsError::InvalidDraws(format!("sample {index} is a failed fit")));
        };
        if fit.beta.len() != n_beta {
            return Err(DrawsError::InvalidDraws(format!(
                "sample {index} has {} coefficients, expected {n_beta}",
                fit.beta.len()
            )));
        }
        if fit.sigma_dim() != dim {
            return Err(DrawsError::InvalidDraws(format!(
                "sample {index} has {}-dimensional covariances, expected {dim}",
                fit.sigma_dim()
            )));
        }
        if let Some(unknown) = sample
            .ids()
            .iter()
            .chain(sample.ids_samp())
            .find(|id| !data.contains(id))
        {
            return Err(DrawsError::InvalidDraws(format!(
                "sample {index} references unknown subject `{unknown}`"
            )));
        }
    }
    Ok(())
}

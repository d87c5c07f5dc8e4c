//! Single MMRM fit of a subject id list.

use super::DrawsError;
use super::sample::{Sample, SampleError, SampleFit};
use crate::input::{DesignSpec, LongData, ModelInput};
use crate::models::mmrm::{MmrmBackend, MmrmFit, MmrmOptions, OptimizerSpec, fit_mmrm};

/// Outcome of [`fit_sample`]: the sample plus the raw fit when one exists.
#[derive(Debug, Clone)]
pub struct FittedSample {
    pub sample: Sample,
    pub fit: Option<MmrmFit>,
}

/// Fit the MMRM to the observed MAR rows of `ids`.
///
/// Duplicated ids are treated as distinct subjects. Any failure to assemble
/// the data or fit the model yields a failed sample; only malformed id lists
/// are returned as errors.
///
/// # Errors
///
/// Returns `SampleError::TooFewIds` if `ids` has fewer than two entries.
pub fn fit_sample(
    ids: &[String],
    data: &LongData,
    design: &DesignSpec,
    options: &MmrmOptions,
    spec: &OptimizerSpec,
    backend: &dyn MmrmBackend,
) -> Result<FittedSample, SampleError> {
    let input = match observed_input(ids, data, design) {
        Ok(input) => input,
        Err(err) => {
            log::debug!("could not assemble model input for {} ids: {err}", ids.len());
            return failed(ids);
        }
    };

    let fit = match fit_mmrm(backend, &input, options, spec) {
        Ok(fit) => fit,
        Err(err) => {
            log::debug!("MMRM fit failed on {} ids: {err}", ids.len());
            return failed(ids);
        }
    };
    let parameters = SampleFit {
        beta: fit.beta.clone(),
        sigma: fit.sigma.clone(),
        theta: fit.theta.clone(),
    };
    match Sample::fitted(ids.to_vec(), ids.to_vec(), parameters) {
        Ok(sample) => Ok(FittedSample {
            sample,
            fit: Some(fit),
        }),
        Err(err @ SampleError::TooFewIds { .. }) => Err(err),
        Err(err) => {
            log::debug!("discarding malformed fit: {err}");
            failed(ids)
        }
    }
}

fn observed_input(
    ids: &[String],
    data: &LongData,
    design: &DesignSpec,
) -> Result<ModelInput, DrawsError> {
    let subset = data.get_data(ids, true, true)?;
    Ok(design.build(&subset)?)
}

fn failed(ids: &[String]) -> Result<FittedSample, SampleError> {
    Ok(FittedSample {
        sample: Sample::failed(ids.to_vec(), ids.to_vec())?,
        fit: None,
    })
}

/// Shared, read-only inputs of every fit in a resampling run.
#[derive(Clone, Copy)]
pub(crate) struct FitContext<'a> {
    pub data: &'a LongData,
    pub design: &'a DesignSpec,
    pub options: &'a MmrmOptions,
    pub backend: &'a dyn MmrmBackend,
}

impl FitContext<'_> {
    pub fn fit(&self, ids: &[String], spec: &OptimizerSpec) -> Result<FittedSample, DrawsError> {
        Ok(fit_sample(
            ids,
            self.data,
            self.design,
            self.options,
            spec,
            self.backend,
        )?)
    }

    /// Fit all subjects; failure aborts the run.
    pub fn initial_fit(
        &self,
        spec: &OptimizerSpec,
        stage: &'static str,
    ) -> Result<(Sample, MmrmFit), DrawsError> {
        let result = self.fit(self.data.ids(), spec)?;
        match result.fit {
            Some(fit) => Ok((result.sample, fit)),
            None => Err(DrawsError::InitialFitFailed { stage }),
        }
    }
}

//! Leave-one-subject-out driver.

use rayon::ThreadPoolBuilder;
use rayon::prelude::*;

use super::DrawsError;
use super::fit::FitContext;
use super::sample::Sample;
use crate::models::mmrm::{OptimizerSpec, WarmStart};

/// Full-data fit followed by one fit per left-out subject, in subject order.
///
/// Folds run on a pool of `ncores` threads and are warm-started from the
/// full-data fit. The first failed fold aborts the run and no further folds
/// are started.
pub(crate) fn jackknife_samples(
    ctx: &FitContext<'_>,
    initial_spec: &OptimizerSpec,
    ncores: usize,
) -> Result<Vec<Sample>, DrawsError> {
    let ids = ctx.data.ids();
    if ids.len() < 3 {
        return Err(DrawsError::TooFewSubjects(ids.len()));
    }
    let (initial, initial_fit) = ctx.initial_fit(initial_spec, "jackknife")?;
    let warm = OptimizerSpec::warm(WarmStart::from_fit(&initial_fit));

    let pool = ThreadPoolBuilder::new()
        .num_threads(ncores.max(1))
        .build()
        .map_err(|err| DrawsError::ThreadPool(err.to_string()))?;
    log::debug!("running {} jackknife folds on {} threads", ids.len(), pool.current_num_threads());

    let folds: Vec<Sample> = pool.install(|| {
        (0..ids.len())
            .into_par_iter()
            .map(|left_out| {
                let fold_ids: Vec<String> = ids
                    .iter()
                    .enumerate()
                    .filter(|(position, _)| *position != left_out)
                    .map(|(_, id)| id.clone())
                    .collect();
                let result = ctx.fit(&fold_ids, &warm)?;
                if result.sample.failed_fit() {
                    return Err(DrawsError::JackknifeFoldFailed {
                        subject: ids[left_out].clone(),
                    });
                }
                log::debug!("jackknife fold without `{}` fitted", ids[left_out]);
                Ok(result.sample)
            })
            .collect::<Result<Vec<Sample>, DrawsError>>()
    })?;

    let mut samples = Vec::with_capacity(ids.len() + 1);
    samples.push(initial);
    samples.extend(folds);
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::draws::test_support::{FailingBackend, simulated_data};
    use crate::input::{DesignSpec, LongData, ModelFormula};
    use crate::models::mmrm::{CovarianceStructure, MmrmOptions, RemlMmrm};

    fn design(data: &LongData) -> DesignSpec {
        DesignSpec::new(ModelFormula::from_vars(data.vars()), data).expect("formula")
    }

    fn cs_options() -> MmrmOptions {
        MmrmOptions {
            covariance: CovarianceStructure::Cs,
            ..MmrmOptions::default()
        }
    }

    #[test]
    fn folds_are_in_subject_order() {
        let data = simulated_data(8, 3, 31);
        let design = design(&data);
        let options = cs_options();
        let ctx = FitContext {
            data: &data,
            design: &design,
            options: &options,
            backend: &RemlMmrm,
        };
        let samples =
            jackknife_samples(&ctx, &OptimizerSpec::default(), 3).expect("all folds fit");
        assert_eq!(samples.len(), 9);
        assert_eq!(samples[0].ids(), data.ids());
        for (position, sample) in samples[1..].iter().enumerate() {
            assert_eq!(sample.ids().len(), 7);
            assert!(!sample.ids().contains(&data.ids()[position]));
        }
    }

    #[test]
    fn thread_count_does_not_change_results() {
        let data = simulated_data(6, 3, 32);
        let design = design(&data);
        let options = cs_options();
        let ctx = FitContext {
            data: &data,
            design: &design,
            options: &options,
            backend: &RemlMmrm,
        };
        let serial = jackknife_samples(&ctx, &OptimizerSpec::default(), 1).expect("serial");
        let parallel = jackknife_samples(&ctx, &OptimizerSpec::default(), 4).expect("parallel");
        for (a, b) in serial.iter().zip(&parallel) {
            assert_eq!(a.ids(), b.ids());
            assert_eq!(a.beta(), b.beta());
        }
    }

    #[test]
    fn failed_fold_names_the_subject() {
        let data = simulated_data(6, 3, 33);
        let design = design(&data);
        let options = cs_options();
        let backend = FailingBackend::after(1);
        let ctx = FitContext {
            data: &data,
            design: &design,
            options: &options,
            backend: &backend,
        };
        let err = jackknife_samples(&ctx, &OptimizerSpec::default(), 1).expect_err("folds fail");
        match err {
            DrawsError::JackknifeFoldFailed { subject } => assert_eq!(subject, data.ids()[0]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn failed_fold_stops_remaining_folds() {
        let data = simulated_data(6, 3, 35);
        let design = design(&data);
        let options = cs_options();
        let backend = FailingBackend::after(1);
        let ctx = FitContext {
            data: &data,
            design: &design,
            options: &options,
            backend: &backend,
        };
        let err = jackknife_samples(&ctx, &OptimizerSpec::default(), 1).expect_err("folds fail");
        assert!(matches!(err, DrawsError::JackknifeFoldFailed { .. }));
        // Initial fit plus both attempts of the first fold.
        assert_eq!(backend.calls(), 3);
    }

    #[test]
    fn needs_three_subjects() {
        let data = simulated_data(2, 3, 34);
        let design = design(&data);
        let options = cs_options();
        let ctx = FitContext {
            data: &data,
            design: &design,
            options: &options,
            backend: &RemlMmrm,
        };
        let err = jackknife_samples(&ctx, &OptimizerSpec::default(), 1).expect_err("two subjects");
        assert!(matches!(err, DrawsError::TooFewSubjects(2)));
    }
}

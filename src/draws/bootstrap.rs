//! Subject-level bootstrap driver.

use num_traits::ToPrimitive;
use rand::rngs::StdRng;

use super::DrawsError;
use super::fit::FitContext;
use super::sample::Sample;
use crate::models::mmrm::{OptimizerSpec, WarmStart};
use crate::utils::usize_to_f64;

/// Samples of a bootstrap run and the number of discarded failed fits.
#[derive(Debug, Clone)]
pub(crate) struct BootstrapRun {
    pub samples: Vec<Sample>,
    pub n_failures: usize,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct BootstrapPlan {
    pub n_samples: usize,
    pub threshold: f64,
    /// Report every sample under the original id set (approximate Bayes).
    pub use_original_ids: bool,
    /// Keep the original-data fit at index 0.
    pub include_initial: bool,
}

/// Number of failed fits tolerated before the run aborts.
pub(crate) fn failure_limit(threshold: f64, n_samples: usize) -> usize {
    (threshold * usize_to_f64(n_samples))
        .ceil()
        .to_usize()
        .unwrap_or(n_samples)
}

/// Fit the full data, then `plan.n_samples` stratified bootstrap resamples.
///
/// Failed resamples are redrawn and do not use up a slot; the run aborts
/// once the failures exceed [`failure_limit`].
pub(crate) fn bootstrap_samples(
    ctx: &FitContext<'_>,
    initial_spec: &OptimizerSpec,
    plan: BootstrapPlan,
    rng: &mut StdRng,
) -> Result<BootstrapRun, DrawsError> {
    let (initial, initial_fit) = ctx.initial_fit(initial_spec, "bootstrap")?;
    let warm = OptimizerSpec::warm(WarmStart::from_fit(&initial_fit));
    let limit = failure_limit(plan.threshold, plan.n_samples);
    let original_ids = ctx.data.ids();

    let mut samples = Vec::with_capacity(plan.n_samples + 1);
    if plan.include_initial {
        samples.push(initial);
    }
    let mut n_failures = 0;
    let mut filled = 0;
    while filled < plan.n_samples {
        let ids = ctx.data.sample_ids(rng);
        let result = ctx.fit(&ids, &warm)?;
        if result.sample.failed_fit() {
            n_failures += 1;
            if n_failures > limit {
                return Err(DrawsError::TooManyFailures {
                    failures: n_failures,
                    limit,
                    threshold: plan.threshold,
                });
            }
            log::warn!("bootstrap fit failed ({n_failures} of {limit} tolerated), redrawing");
            continue;
        }
        let sample = if plan.use_original_ids {
            result.sample.with_ids(original_ids.to_vec())?
        } else {
            result.sample
        };
        samples.push(sample);
        filled += 1;
        log::debug!("bootstrap sample {filled}/{} fitted", plan.n_samples);
    }

    Ok(BootstrapRun {
        samples,
        n_failures,
    })
}

//! Simulated trials and fault-injecting backends for the driver tests.

use std::sync::atomic::{AtomicUsize, Ordering};

use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};

use crate::input::{LongData, ModelInput, SubjectVisit, Vars};
use crate::models::mmrm::{
    MmrmBackend, MmrmError, MmrmFit, MmrmOptions, OptimizerAttempt, RemlMmrm,
};
use crate::utils::usize_to_f64;

fn standard_normal(rng: &mut StdRng) -> f64 {
    let u1: f64 = rng.random::<f64>().max(f64::MIN_POSITIVE);
    let u2: f64 = rng.random();
    (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
}

/// Two-arm trial with exchangeable correlation 0.5 and a linear visit trend.
/// Even subjects are controls.
pub(crate) fn simulated_data(n_subjects: usize, n_visits: usize, seed: u64) -> LongData {
    let mut rng = StdRng::seed_from_u64(seed);
    let shared = 0.5_f64.sqrt();
    let own = 0.5_f64.sqrt();
    let mut records = Vec::with_capacity(n_subjects * n_visits);
    for subject in 0..n_subjects {
        let treated = subject % 2 == 1;
        let subject_effect = shared * standard_normal(&mut rng);
        for visit in 0..n_visits {
            let mean = 1.0 + 0.5 * usize_to_f64(visit) + if treated { 0.8 } else { 0.0 };
            let outcome = mean + subject_effect + own * standard_normal(&mut rng);
            records.push(SubjectVisit::new(
                format!("s{subject:02}"),
                format!("v{}", visit + 1),
                if treated { "trt" } else { "ctl" },
                Some(outcome),
            ));
        }
    }
    LongData::new(
        records,
        Vars::default(),
        (1..=n_visits).map(|visit| format!("v{visit}")).collect(),
        vec!["ctl".to_string(), "trt".to_string()],
    )
    .expect("simulated grid is complete")
}

/// Delegates the first `successes` calls to [`RemlMmrm`] and fails after.
pub(crate) struct FailingBackend {
    successes: usize,
    calls: AtomicUsize,
}

impl FailingBackend {
    pub(crate) const fn after(successes: usize) -> Self {
        Self {
            successes,
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl MmrmBackend for FailingBackend {
    fn fit(
        &self,
        input: &ModelInput,
        options: &MmrmOptions,
        attempt: &OptimizerAttempt,
    ) -> Result<MmrmFit, MmrmError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.successes {
            RemlMmrm.fit(input, options, attempt)
        } else {
            Err(MmrmError::SingularDesign)
        }
    }
}

use std::sync::Arc;

use rand::SeedableRng;
use rand::rngs::StdRng;
use refbased_mi::{
    CondMeanMethod, IceRecord, LongData, Method, Strategy, SubjectVisit, Vars, draws,
};

fn main() {
    let visits = ["w4", "w8", "w12"];
    let mut records = Vec::new();
    for subject in 0..24 {
        let arm = if subject % 2 == 0 { "placebo" } else { "drug" };
        for (visit, level) in visits.iter().enumerate() {
            let wobble = idx_to_f64((subject * 5 + visit * 3) % 7) * 0.2;
            let effect = if subject % 2 == 0 { 0.0 } else { 0.6 };
            let outcome = 0.4f64.mul_add(idx_to_f64(visit), 1.0) + effect + wobble;
            records.push(SubjectVisit::new(format!("id{subject}"), *level, arm, Some(outcome)));
        }
    }
    let data = LongData::new(
        records,
        Vars::default(),
        visits.iter().map(|level| (*level).to_string()).collect(),
        vec!["placebo".to_string(), "drug".to_string()],
    )
    .and_then(|data| data.with_strategies(&[IceRecord::new("id3", "w8", Strategy::Jr)]))
    .expect("data");

    let mut rng = StdRng::seed_from_u64(1);
    let result = draws(
        Arc::new(data),
        Method::CondMean(CondMeanMethod::default()),
        &mut rng,
    )
    .expect("draws");
    let beta = result.samples().get(0).and_then(|sample| sample.beta()).expect("fit");
    println!("{} samples, full-data treatment effect {:.3}", result.samples().len(), beta[1]);
}

fn idx_to_f64(idx: usize) -> f64 {
    f64::from(u32::try_from(idx).unwrap_or(u32::MAX))
}

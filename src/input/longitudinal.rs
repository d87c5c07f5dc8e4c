//! Longitudinal data container.
//!
//! `LongData` holds one row per subject and visit, the ICE strategy of each
//! subject, and the derived MAR mask. It is built once, receives its ICE
//! strategies through the consuming [`LongData::with_strategies`], and is
//! read-only afterwards; fitting code only ever queries it.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use rand::RngExt;
use rand::rngs::StdRng;
use thiserror::Error;

use super::ice::{IceRecord, Strategy};
use super::vars::Vars;

/// Errors returned when building or querying longitudinal data.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LongDataError {
    #[error("longitudinal data must contain at least one row")]
    EmptyData,
    #[error("visit levels must be non-empty")]
    EmptyVisitLevels,
    #[error("group levels must be non-empty")]
    EmptyGroupLevels,
    #[error("visit level `{0}` is declared more than once")]
    DuplicateVisitLevel(String),
    #[error("group level `{0}` is declared more than once")]
    DuplicateGroupLevel(String),
    #[error("subject `{subject}` has undeclared visit `{visit}`")]
    UnknownVisit { subject: String, visit: String },
    #[error("subject `{subject}` has undeclared group `{group}`")]
    UnknownGroup { subject: String, group: String },
    #[error("subject `{subject}` has more than one row for visit `{visit}`")]
    DuplicateRow { subject: String, visit: String },
    #[error("subject `{subject}` has {found} visits; every subject needs all {expected}")]
    IncompleteSubject {
        subject: String,
        found: usize,
        expected: usize,
    },
    #[error("subject `{subject}` changes group across visits")]
    InconsistentGroup { subject: String },
    #[error("subject `{subject}` changes stratum variable `{name}` across visits")]
    InconsistentStrata { subject: String, name: String },
    #[error("subject `{subject}` visit `{visit}` is missing covariate `{name}`")]
    MissingCovariate {
        subject: String,
        visit: String,
        name: String,
    },
    #[error("subject `{subject}` visit `{visit}` has a non-finite value for `{name}`")]
    NonFiniteCovariate {
        subject: String,
        visit: String,
        name: String,
    },
    #[error("covariate `{0}` mixes numeric and categorical values")]
    InconsistentCovariateKind(String),
    #[error("subject `{subject}` visit `{visit}` has a non-finite outcome")]
    NonFiniteOutcome { subject: String, visit: String },
    #[error("unknown subject `{0}`")]
    UnknownSubject(String),
    #[error("ICE record refers to unknown subject `{0}`")]
    IceUnknownSubject(String),
    #[error("ICE record for subject `{subject}` refers to unknown visit `{visit}`")]
    IceUnknownVisit { subject: String, visit: String },
    #[error("subject `{0}` has more than one ICE record")]
    DuplicateIce(String),
}

/// Value of a covariate at one subject-visit.
#[derive(Debug, Clone, PartialEq)]
pub enum CovariateValue {
    Numeric(f64),
    Factor(String),
}

impl fmt::Display for CovariateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric(value) => write!(f, "{value}"),
            Self::Factor(level) => f.write_str(level),
        }
    }
}

/// Kind of a covariate column, derived from the data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CovariateKind {
    Numeric,
    /// Categorical covariate with sorted levels; the first is the reference.
    Factor { levels: Vec<String> },
}

/// One input row: a subject at a visit.
#[derive(Debug, Clone, PartialEq)]
pub struct SubjectVisit {
    pub subject: String,
    pub visit: String,
    pub group: String,
    pub outcome: Option<f64>,
    pub covariates: BTreeMap<String, CovariateValue>,
}

impl SubjectVisit {
    #[must_use]
    pub fn new(
        subject: impl Into<String>,
        visit: impl Into<String>,
        group: impl Into<String>,
        outcome: Option<f64>,
    ) -> Self {
        Self {
            subject: subject.into(),
            visit: visit.into(),
            group: group.into(),
            outcome,
            covariates: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_covariate(mut self, name: impl Into<String>, value: CovariateValue) -> Self {
        self.covariates.insert(name.into(), value);
        self
    }
}

#[derive(Debug, Clone)]
struct SubjectIce {
    visit: usize,
    strategy: Strategy,
}

#[derive(Debug, Clone)]
struct SubjectData {
    id: String,
    group: usize,
    outcomes: Vec<Option<f64>>,
    covariates: Vec<BTreeMap<String, CovariateValue>>,
    ice: Option<SubjectIce>,
    is_mar: Vec<bool>,
}

/// Validated longitudinal dataset with ICE strategies and MAR mask.
#[derive(Debug, Clone)]
pub struct LongData {
    vars: Vars,
    visits: Vec<String>,
    groups: Vec<String>,
    subjects: Vec<SubjectData>,
    ids: Vec<String>,
    index: HashMap<String, usize>,
    strata: Vec<Vec<usize>>,
    covariate_kinds: BTreeMap<String, CovariateKind>,
}

/// A row of a [`DataSubset`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DataRow {
    /// Position of the subject in the requested id list; duplicated ids get
    /// distinct positions.
    pub subject: usize,
    /// Index of the subject inside the parent [`LongData`].
    pub source: usize,
    pub visit: usize,
    pub group: usize,
    pub outcome: Option<f64>,
    pub is_mar: bool,
}

/// Subject-visit rows for a list of subject ids, borrowed from [`LongData`].
#[derive(Debug, Clone)]
pub struct DataSubset<'a> {
    data: &'a LongData,
    n_subjects: usize,
    rows: Vec<DataRow>,
}

impl<'a> DataSubset<'a> {
    #[must_use]
    pub const fn data(&self) -> &'a LongData {
        self.data
    }

    #[must_use]
    pub fn rows(&self) -> &[DataRow] {
        &self.rows
    }

    /// Number of subject occurrences requested, including duplicates.
    #[must_use]
    pub const fn n_subjects(&self) -> usize {
        self.n_subjects
    }

    #[must_use]
    pub fn n_observed(&self) -> usize {
        self.rows.iter().filter(|row| row.outcome.is_some()).count()
    }

    /// Null the outcome of every row outside the MAR mask. Rows are kept.
    #[must_use]
    pub fn mask_non_mar(mut self) -> Self {
        for row in &mut self.rows {
            if !row.is_mar {
                row.outcome = None;
            }
        }
        self
    }
}

impl LongData {
    /// Build and validate a dataset. `visits` and `groups` fix the level
    /// order; the first group is the reference level of the design.
    ///
    /// # Errors
    ///
    /// Returns `LongDataError` if the rows do not form a complete,
    /// consistent subject-by-visit grid.
    pub fn new(
        records: Vec<SubjectVisit>,
        vars: Vars,
        visits: Vec<String>,
        groups: Vec<String>,
    ) -> Result<Self, LongDataError> {
        if records.is_empty() {
            return Err(LongDataError::EmptyData);
        }
        let visit_index = level_index(&visits, LongDataError::EmptyVisitLevels, |level| {
            LongDataError::DuplicateVisitLevel(level.to_string())
        })?;
        let group_index = level_index(&groups, LongDataError::EmptyGroupLevels, |level| {
            LongDataError::DuplicateGroupLevel(level.to_string())
        })?;

        let required = required_covariates(&vars);
        let mut covariate_kinds = BTreeMap::new();
        for name in &required {
            covariate_kinds.insert(name.clone(), covariate_kind(&records, name)?);
        }

        let n_visits = visits.len();
        let mut subjects: Vec<SubjectData> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut seen: Vec<Vec<bool>> = Vec::new();

        for record in records {
            let visit = *visit_index
                .get(record.visit.as_str())
                .ok_or_else(|| LongDataError::UnknownVisit {
                    subject: record.subject.clone(),
                    visit: record.visit.clone(),
                })?;
            let group = *group_index
                .get(record.group.as_str())
                .ok_or_else(|| LongDataError::UnknownGroup {
                    subject: record.subject.clone(),
                    group: record.group.clone(),
                })?;
            if let Some(outcome) = record.outcome
                && !outcome.is_finite()
            {
                return Err(LongDataError::NonFiniteOutcome {
                    subject: record.subject,
                    visit: record.visit,
                });
            }
            for name in &required {
                match record.covariates.get(name) {
                    None => {
                        return Err(LongDataError::MissingCovariate {
                            subject: record.subject,
                            visit: record.visit,
                            name: name.clone(),
                        });
                    }
                    Some(CovariateValue::Numeric(value)) if !value.is_finite() => {
                        return Err(LongDataError::NonFiniteCovariate {
                            subject: record.subject,
                            visit: record.visit,
                            name: name.clone(),
                        });
                    }
                    Some(_) => {}
                }
            }

            let position = match index.get(&record.subject) {
                Some(&position) => position,
                None => {
                    let position = subjects.len();
                    index.insert(record.subject.clone(), position);
                    subjects.push(SubjectData {
                        id: record.subject.clone(),
                        group,
                        outcomes: vec![None; n_visits],
                        covariates: vec![BTreeMap::new(); n_visits],
                        ice: None,
                        is_mar: vec![true; n_visits],
                    });
                    seen.push(vec![false; n_visits]);
                    position
                }
            };

            if seen[position][visit] {
                return Err(LongDataError::DuplicateRow {
                    subject: record.subject,
                    visit: record.visit,
                });
            }
            let subject = &mut subjects[position];
            if subject.group != group {
                return Err(LongDataError::InconsistentGroup {
                    subject: record.subject,
                });
            }
            seen[position][visit] = true;
            subject.outcomes[visit] = record.outcome;
            subject.covariates[visit] = record.covariates;
        }

        for (subject, flags) in subjects.iter().zip(&seen) {
            let found = flags.iter().filter(|flag| **flag).count();
            if found != n_visits {
                return Err(LongDataError::IncompleteSubject {
                    subject: subject.id.clone(),
                    found,
                    expected: n_visits,
                });
            }
        }

        let strata = build_strata(&subjects, &vars, &groups)?;
        let ids = subjects.iter().map(|subject| subject.id.clone()).collect();

        Ok(Self {
            vars,
            visits,
            groups,
            subjects,
            ids,
            index,
            strata,
            covariate_kinds,
        })
    }

    /// Register the ICE specification and derive the MAR mask.
    ///
    /// Any previously registered strategies are replaced. Observed outcomes
    /// that fall outside the mask are kept in storage but excluded from
    /// model fitting.
    ///
    /// # Errors
    ///
    /// Returns `LongDataError` for unknown subjects or visits and for
    /// subjects with more than one ICE record.
    pub fn with_strategies(mut self, ice: &[IceRecord]) -> Result<Self, LongDataError> {
        let mut assigned: Vec<Option<SubjectIce>> = vec![None; self.subjects.len()];
        for record in ice {
            let position = *self
                .index
                .get(&record.subject)
                .ok_or_else(|| LongDataError::IceUnknownSubject(record.subject.clone()))?;
            let visit = self
                .visits
                .iter()
                .position(|level| *level == record.visit)
                .ok_or_else(|| LongDataError::IceUnknownVisit {
                    subject: record.subject.clone(),
                    visit: record.visit.clone(),
                })?;
            if assigned[position].is_some() {
                return Err(LongDataError::DuplicateIce(record.subject.clone()));
            }
            assigned[position] = Some(SubjectIce {
                visit,
                strategy: record.strategy.clone(),
            });
        }

        let mut excluded_observed = 0usize;
        for (subject, ice) in self.subjects.iter_mut().zip(assigned) {
            subject.is_mar = (0..subject.outcomes.len())
                .map(|visit| {
                    ice.as_ref()
                        .is_none_or(|ice| ice.strategy.is_mar() || visit < ice.visit)
                })
                .collect();
            excluded_observed += subject
                .is_mar
                .iter()
                .zip(&subject.outcomes)
                .filter(|(mar, outcome)| !**mar && outcome.is_some())
                .count();
            subject.ice = ice;
        }

        if excluded_observed > 0 {
            log::warn!(
                "{excluded_observed} observed outcome(s) occur after a non-MAR intercurrent event \
                 and will be excluded from model fitting"
            );
        }
        Ok(self)
    }

    #[must_use]
    pub const fn vars(&self) -> &Vars {
        &self.vars
    }

    #[must_use]
    pub fn visit_levels(&self) -> &[String] {
        &self.visits
    }

    #[must_use]
    pub fn group_levels(&self) -> &[String] {
        &self.groups
    }

    /// Subject ids in order of first appearance.
    #[must_use]
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    #[must_use]
    pub fn n_subjects(&self) -> usize {
        self.subjects.len()
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    #[must_use]
    pub fn covariate_kind(&self, name: &str) -> Option<&CovariateKind> {
        self.covariate_kinds.get(name)
    }

    /// Stratified with-replacement resample of whole subjects.
    ///
    /// Each stratum keeps its size; strata are emitted in order of first
    /// appearance.
    #[must_use]
    pub fn sample_ids(&self, rng: &mut StdRng) -> Vec<String> {
        let mut sampled = Vec::with_capacity(self.subjects.len());
        for stratum in &self.strata {
            for _ in 0..stratum.len() {
                let pick = stratum[rng.random_range(0..stratum.len())];
                sampled.push(self.subjects[pick].id.clone());
            }
        }
        sampled
    }

    /// Rows for the requested ids, in id order then visit order.
    ///
    /// `nmar_remove` drops rows outside the MAR mask and `na_remove` drops
    /// rows with a missing outcome.
    ///
    /// # Errors
    ///
    /// Returns `LongDataError::UnknownSubject` if an id is not in the data.
    pub fn get_data(
        &self,
        ids: &[String],
        nmar_remove: bool,
        na_remove: bool,
    ) -> Result<DataSubset<'_>, LongDataError> {
        let mut rows = Vec::with_capacity(ids.len() * self.visits.len());
        for (occurrence, id) in ids.iter().enumerate() {
            let source = *self
                .index
                .get(id)
                .ok_or_else(|| LongDataError::UnknownSubject(id.clone()))?;
            let subject = &self.subjects[source];
            for visit in 0..self.visits.len() {
                let is_mar = subject.is_mar[visit];
                let outcome = subject.outcomes[visit];
                if (nmar_remove && !is_mar) || (na_remove && outcome.is_none()) {
                    continue;
                }
                rows.push(DataRow {
                    subject: occurrence,
                    source,
                    visit,
                    group: subject.group,
                    outcome,
                    is_mar,
                });
            }
        }
        Ok(DataSubset {
            data: self,
            n_subjects: ids.len(),
            rows,
        })
    }

    /// Per-visit MAR mask of one subject.
    #[must_use]
    pub fn is_mar(&self, id: &str) -> Option<&[bool]> {
        self.subject(id).map(|subject| subject.is_mar.as_slice())
    }

    /// Per-visit flag for visits at or after the subject's ICE, whatever
    /// its strategy.
    #[must_use]
    pub fn is_post_ice(&self, id: &str) -> Option<Vec<bool>> {
        self.subject(id).map(|subject| {
            (0..self.visits.len())
                .map(|visit| subject.ice.as_ref().is_some_and(|ice| visit >= ice.visit))
                .collect()
        })
    }

    #[must_use]
    pub fn strategy(&self, id: &str) -> Option<&Strategy> {
        self.subject(id)
            .and_then(|subject| subject.ice.as_ref())
            .map(|ice| &ice.strategy)
    }

    #[must_use]
    pub fn ice_visit(&self, id: &str) -> Option<&str> {
        self.subject(id)
            .and_then(|subject| subject.ice.as_ref())
            .map(|ice| self.visits[ice.visit].as_str())
    }

    pub(crate) fn covariate(
        &self,
        source: usize,
        visit: usize,
        name: &str,
    ) -> Option<&CovariateValue> {
        self.subjects
            .get(source)
            .and_then(|subject| subject.covariates.get(visit))
            .and_then(|covariates| covariates.get(name))
    }

    fn subject(&self, id: &str) -> Option<&SubjectData> {
        self.index.get(id).map(|&position| &self.subjects[position])
    }
}

fn level_index<'a>(
    levels: &'a [String],
    empty: LongDataError,
    duplicate: impl Fn(&str) -> LongDataError,
) -> Result<HashMap<&'a str, usize>, LongDataError> {
    if levels.is_empty() {
        return Err(empty);
    }
    let mut index = HashMap::with_capacity(levels.len());
    for (position, level) in levels.iter().enumerate() {
        if index.insert(level.as_str(), position).is_some() {
            return Err(duplicate(level));
        }
    }
    Ok(index)
}

fn required_covariates(vars: &Vars) -> Vec<String> {
    let mut names = vars.covariate_names();
    for name in &vars.strata {
        if !names.contains(name) {
            names.push(name.clone());
        }
    }
    names.retain(|name| !vars.is_design_variable(name));
    names
}

fn covariate_kind(records: &[SubjectVisit], name: &str) -> Result<CovariateKind, LongDataError> {
    let mut numeric = false;
    let mut levels: Vec<String> = Vec::new();
    for record in records {
        match record.covariates.get(name) {
            Some(CovariateValue::Numeric(_)) => numeric = true,
            Some(CovariateValue::Factor(level)) => {
                if !levels.contains(level) {
                    levels.push(level.clone());
                }
            }
            None => {}
        }
    }
    match (numeric, levels.is_empty()) {
        (true, false) => Err(LongDataError::InconsistentCovariateKind(name.to_string())),
        (false, false) => {
            levels.sort();
            Ok(CovariateKind::Factor { levels })
        }
        _ => Ok(CovariateKind::Numeric),
    }
}

fn build_strata(
    subjects: &[SubjectData],
    vars: &Vars,
    groups: &[String],
) -> Result<Vec<Vec<usize>>, LongDataError> {
    let mut strata: Vec<Vec<usize>> = Vec::new();
    let mut keys: HashMap<String, usize> = HashMap::new();
    for (position, subject) in subjects.iter().enumerate() {
        let mut key = String::new();
        for name in &vars.strata {
            let value = if *name == vars.group {
                groups[subject.group].clone()
            } else {
                let first = subject.covariates[0].get(name).map(ToString::to_string);
                if subject
                    .covariates
                    .iter()
                    .any(|covariates| covariates.get(name).map(ToString::to_string) != first)
                {
                    return Err(LongDataError::InconsistentStrata {
                        subject: subject.id.clone(),
                        name: name.clone(),
                    });
                }
                first.unwrap_or_default()
            };
            key.push_str(&value);
            key.push('\u{1f}');
        }
        let next = strata.len();
        let slot = *keys.entry(key).or_insert(next);
        if slot == next {
            strata.push(Vec::new());
        }
        strata[slot].push(position);
    }
    Ok(strata)
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use super::*;

    fn levels(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| (*name).to_string()).collect()
    }

    fn grid(n_subjects: usize, n_visits: usize) -> Vec<SubjectVisit> {
        let mut rows = Vec::new();
        for subject in 0..n_subjects {
            for visit in 0..n_visits {
                let group = if subject % 2 == 0 { "A" } else { "B" };
                rows.push(
                    SubjectVisit::new(
                        format!("s{subject}"),
                        format!("v{}", visit + 1),
                        group,
                        Some(f64::from(u32::try_from(visit).unwrap_or(0))),
                    )
                    .with_covariate("age", CovariateValue::Numeric(40.0)),
                );
            }
        }
        rows
    }

    fn dataset(n_subjects: usize) -> LongData {
        LongData::new(
            grid(n_subjects, 4),
            Vars::default().with_covariates(["age"]),
            levels(&["v1", "v2", "v3", "v4"]),
            levels(&["A", "B"]),
        )
        .expect("valid data")
    }

    #[test]
    fn ids_follow_first_appearance() {
        let data = dataset(3);
        assert_eq!(data.ids(), levels(&["s0", "s1", "s2"]).as_slice());
    }

    #[test]
    fn duplicate_rows_are_rejected() {
        let mut rows = grid(2, 2);
        rows.push(rows[0].clone());
        let err = LongData::new(
            rows,
            Vars::default().with_covariates(["age"]),
            levels(&["v1", "v2"]),
            levels(&["A", "B"]),
        )
        .expect_err("duplicate row");
        assert!(matches!(err, LongDataError::DuplicateRow { .. }));
    }

    #[test]
    fn incomplete_subject_is_rejected() {
        let mut rows = grid(2, 3);
        rows.pop();
        let err = LongData::new(
            rows,
            Vars::default().with_covariates(["age"]),
            levels(&["v1", "v2", "v3"]),
            levels(&["A", "B"]),
        )
        .expect_err("missing visit row");
        assert!(matches!(
            err,
            LongDataError::IncompleteSubject {
                found: 2,
                expected: 3,
                ..
            }
        ));
    }

    #[test]
    fn missing_covariate_is_rejected() {
        let rows = grid(2, 2);
        let err = LongData::new(
            rows,
            Vars::default().with_covariates(["age", "sex"]),
            levels(&["v1", "v2"]),
            levels(&["A", "B"]),
        )
        .expect_err("sex is absent");
        assert!(matches!(err, LongDataError::MissingCovariate { .. }));
    }

    #[test]
    fn non_mar_strategy_masks_from_ice_visit() {
        let data = dataset(4)
            .with_strategies(&[IceRecord::new("s1", "v3", Strategy::Jr)])
            .expect("valid ice");
        assert_eq!(data.is_mar("s1"), Some([true, true, false, false].as_slice()));
        assert_eq!(data.is_mar("s0"), Some([true; 4].as_slice()));
        assert_eq!(data.strategy("s1"), Some(&Strategy::Jr));
        assert_eq!(data.ice_visit("s1"), Some("v3"));
    }

    #[test]
    fn mar_strategy_keeps_post_ice_rows() {
        let data = dataset(4)
            .with_strategies(&[IceRecord::new("s2", "v2", Strategy::Mar)])
            .expect("valid ice");
        assert_eq!(data.is_mar("s2"), Some([true; 4].as_slice()));
        assert_eq!(
            data.is_post_ice("s2"),
            Some(vec![false, true, true, true])
        );
    }

    #[test]
    fn duplicate_ice_records_are_rejected() {
        let err = dataset(3)
            .with_strategies(&[
                IceRecord::new("s1", "v2", Strategy::Jr),
                IceRecord::new("s1", "v3", Strategy::Cr),
            ])
            .expect_err("two records");
        assert_eq!(err, LongDataError::DuplicateIce("s1".to_string()));
    }

    #[test]
    fn ice_with_unknown_visit_is_rejected() {
        let err = dataset(3)
            .with_strategies(&[IceRecord::new("s1", "v9", Strategy::Jr)])
            .expect_err("unknown visit");
        assert!(matches!(err, LongDataError::IceUnknownVisit { .. }));
    }

    #[test]
    fn get_data_removes_masked_and_missing_rows() {
        let mut rows = grid(3, 4);
        rows[0].outcome = None;
        let data = LongData::new(
            rows,
            Vars::default().with_covariates(["age"]),
            levels(&["v1", "v2", "v3", "v4"]),
            levels(&["A", "B"]),
        )
        .expect("valid")
        .with_strategies(&[IceRecord::new("s1", "v3", Strategy::Cir)])
        .expect("valid ice");

        let ids = levels(&["s0", "s1"]);
        let all = data.get_data(&ids, false, false).expect("known ids");
        assert_eq!(all.rows().len(), 8);
        let fitted = data.get_data(&ids, true, true).expect("known ids");
        assert_eq!(fitted.rows().len(), 5);
        assert!(fitted.rows().iter().all(|row| row.is_mar && row.outcome.is_some()));
    }

    #[test]
    fn duplicated_ids_become_distinct_subjects() {
        let data = dataset(3);
        let ids = levels(&["s1", "s1", "s2"]);
        let subset = data.get_data(&ids, true, true).expect("known ids");
        assert_eq!(subset.n_subjects(), 3);
        assert_eq!(subset.rows()[0].subject, 0);
        assert_eq!(subset.rows()[4].subject, 1);
        assert_eq!(subset.rows()[4].source, 1);
    }

    #[test]
    fn unknown_id_in_get_data_is_an_error() {
        let data = dataset(2);
        let err = data
            .get_data(&levels(&["zz"]), true, true)
            .expect_err("unknown subject");
        assert_eq!(err, LongDataError::UnknownSubject("zz".to_string()));
    }

    #[test]
    fn masking_twice_nulls_the_same_cells() {
        let data = dataset(4)
            .with_strategies(&[IceRecord::new("s3", "v2", Strategy::Cr)])
            .expect("valid ice");
        let once = data
            .get_data(data.ids(), false, false)
            .expect("known ids")
            .mask_non_mar();
        let nulled_once: Vec<bool> = once.rows().iter().map(|row| row.outcome.is_none()).collect();
        let twice = once.mask_non_mar();
        let nulled_twice: Vec<bool> =
            twice.rows().iter().map(|row| row.outcome.is_none()).collect();
        assert_eq!(nulled_once, nulled_twice);
        assert_eq!(nulled_once.iter().filter(|flag| **flag).count(), 3);
    }

    #[test]
    fn sample_ids_preserves_stratum_sizes() {
        let data = dataset(10);
        let mut rng = StdRng::seed_from_u64(11);
        let sampled = data.sample_ids(&mut rng);
        assert_eq!(sampled.len(), 10);
        let in_a = sampled
            .iter()
            .filter(|id| data.get_data(std::slice::from_ref(id), false, false).expect("known").rows()[0].group == 0)
            .count();
        assert_eq!(in_a, 5);
    }
}

//! Model formula and design-matrix construction.
//!
//! The formula is always `outcome ~ 1 + group + visit + <covariate terms>`.
//! Categorical variables use treatment coding against their first level;
//! interaction columns are products of the columns of their variables.

use std::fmt;

use faer::Mat;
use thiserror::Error;

use super::longitudinal::{CovariateKind, CovariateValue, DataSubset, LongData};
use super::vars::{Vars, split_term};
use super::{InputError, ModelInput};

/// Errors returned when validating a formula or building a design.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FormulaError {
    #[error("formula outcome `{found}` does not match the data outcome `{expected}`")]
    OutcomeMismatch { expected: String, found: String },
    #[error("formula references unknown variable `{0}`")]
    UnknownVariable(String),
    #[error("formula term must reference at least one variable")]
    EmptyTerm,
    #[error("subject row is missing covariate `{0}`")]
    MissingValue(String),
    #[error("covariate `{0}` has a value of the wrong kind")]
    KindMismatch(String),
    #[error(transparent)]
    Input(#[from] InputError),
}

/// A main effect (one variable) or an interaction (several).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Term {
    variables: Vec<String>,
}

impl Term {
    #[must_use]
    pub fn new<I, S>(variables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            variables: variables.into_iter().map(Into::into).collect(),
        }
    }

    #[must_use]
    pub fn variables(&self) -> &[String] {
        &self.variables
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.variables.join(":"))
    }
}

/// Fixed-effects formula of the analysis model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelFormula {
    pub outcome: String,
    pub terms: Vec<Term>,
}

impl ModelFormula {
    /// Formula implied by the variable mapping. `a*b` expands to
    /// `a + b + a:b`; repeated terms are dropped.
    #[must_use]
    pub fn from_vars(vars: &Vars) -> Self {
        let mut terms: Vec<Term> = vec![
            Term::new([vars.group.as_str()]),
            Term::new([vars.visit.as_str()]),
        ];
        let mut push = |term: Term| {
            if !terms.contains(&term) {
                terms.push(term);
            }
        };
        for covariate in &vars.covariates {
            let names: Vec<&str> = split_term(covariate).collect();
            if covariate.contains('*') {
                for name in &names {
                    push(Term::new([*name]));
                }
            }
            if !names.is_empty() {
                push(Term::new(names));
            }
        }
        Self {
            outcome: vars.outcome.clone(),
            terms,
        }
    }

    /// Check the formula against a dataset.
    ///
    /// # Errors
    ///
    /// Returns `FormulaError` if the outcome does not match or a term names
    /// a variable the data does not carry.
    pub fn validate(&self, data: &LongData) -> Result<(), FormulaError> {
        let vars = data.vars();
        if self.outcome != vars.outcome {
            return Err(FormulaError::OutcomeMismatch {
                expected: vars.outcome.clone(),
                found: self.outcome.clone(),
            });
        }
        for term in &self.terms {
            if term.variables.is_empty() {
                return Err(FormulaError::EmptyTerm);
            }
            for name in &term.variables {
                if !vars.is_design_variable(name) && data.covariate_kind(name).is_none() {
                    return Err(FormulaError::UnknownVariable(name.clone()));
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for ModelFormula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ~ 1", self.outcome)?;
        for term in &self.terms {
            write!(f, " + {term}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Part {
    Group(usize),
    Visit(usize),
    Numeric(String),
    Level { name: String, level: String },
}

#[derive(Debug, Clone, PartialEq)]
struct Column {
    name: String,
    parts: Vec<Part>,
}

/// Column layout of the design matrix, fixed once from the full dataset so
/// that every resample shares the same coefficients.
#[derive(Debug, Clone)]
pub struct DesignSpec {
    formula: ModelFormula,
    columns: Vec<Column>,
}

impl DesignSpec {
    /// # Errors
    ///
    /// Returns `FormulaError` if the formula does not fit the data.
    pub fn new(formula: ModelFormula, data: &LongData) -> Result<Self, FormulaError> {
        formula.validate(data)?;
        let vars = data.vars();
        let mut columns = Vec::new();
        for term in &formula.terms {
            let mut expanded = vec![Column {
                name: String::new(),
                parts: Vec::new(),
            }];
            for name in &term.variables {
                let parts = variable_parts(name, vars, data)?;
                expanded = expanded
                    .iter()
                    .flat_map(|column| {
                        parts.iter().map(move |(label, part)| {
                            let mut parts = column.parts.clone();
                            parts.push(part.clone());
                            let name = if column.name.is_empty() {
                                label.clone()
                            } else {
                                format!("{}:{label}", column.name)
                            };
                            Column { name, parts }
                        })
                    })
                    .collect();
            }
            columns.extend(expanded);
        }
        Ok(Self { formula, columns })
    }

    #[must_use]
    pub const fn formula(&self) -> &ModelFormula {
        &self.formula
    }

    /// Number of coefficients, intercept included.
    #[must_use]
    pub fn n_coefficients(&self) -> usize {
        self.columns.len() + 1
    }

    #[must_use]
    pub fn column_names(&self) -> Vec<String> {
        std::iter::once("(Intercept)".to_string())
            .chain(self.columns.iter().map(|column| column.name.clone()))
            .collect()
    }

    /// Design matrix and response for a subset of rows.
    ///
    /// # Errors
    ///
    /// Returns `FormulaError` if a covariate value is missing or of the
    /// wrong kind, or if the assembled input fails validation.
    pub fn build(&self, subset: &DataSubset<'_>) -> Result<ModelInput, FormulaError> {
        let data = subset.data();
        let rows = subset.rows();
        let mut values = Vec::with_capacity(rows.len() * self.columns.len());
        for row in rows {
            for column in &self.columns {
                let mut value = 1.0;
                for part in &column.parts {
                    value *= match part {
                        Part::Group(level) => indicator(row.group == *level),
                        Part::Visit(level) => indicator(row.visit == *level),
                        Part::Numeric(name) => match data.covariate(row.source, row.visit, name) {
                            Some(CovariateValue::Numeric(x)) => *x,
                            Some(CovariateValue::Factor(_)) => {
                                return Err(FormulaError::KindMismatch(name.clone()));
                            }
                            None => return Err(FormulaError::MissingValue(name.clone())),
                        },
                        Part::Level { name, level } => {
                            match data.covariate(row.source, row.visit, name) {
                                Some(CovariateValue::Factor(found)) => indicator(found == level),
                                Some(CovariateValue::Numeric(_)) => {
                                    return Err(FormulaError::KindMismatch(name.clone()));
                                }
                                None => return Err(FormulaError::MissingValue(name.clone())),
                            }
                        }
                    };
                }
                values.push(value);
            }
        }

        let width = self.columns.len();
        let design_matrix = Mat::from_fn(rows.len(), width + 1, |i, j| {
            if j == 0 { 1.0 } else { values[i * width + j - 1] }
        });
        let input = ModelInput {
            design_matrix,
            outcome: rows.iter().map(|row| row.outcome).collect(),
            subjects: rows.iter().map(|row| row.subject).collect(),
            visits: rows.iter().map(|row| row.visit).collect(),
            groups: rows.iter().map(|row| row.group).collect(),
            n_subjects: subset.n_subjects(),
            n_visits: data.visit_levels().len(),
            group_levels: data.group_levels().to_vec(),
            column_names: self.column_names(),
        };
        input.validate()?;
        Ok(input)
    }
}

const fn indicator(flag: bool) -> f64 {
    if flag { 1.0 } else { 0.0 }
}

fn variable_parts(
    name: &str,
    vars: &Vars,
    data: &LongData,
) -> Result<Vec<(String, Part)>, FormulaError> {
    if *name == vars.group {
        return Ok(data
            .group_levels()
            .iter()
            .enumerate()
            .skip(1)
            .map(|(idx, level)| (format!("{name}{level}"), Part::Group(idx)))
            .collect());
    }
    if *name == vars.visit {
        return Ok(data
            .visit_levels()
            .iter()
            .enumerate()
            .skip(1)
            .map(|(idx, level)| (format!("{name}{level}"), Part::Visit(idx)))
            .collect());
    }
    match data.covariate_kind(name) {
        Some(CovariateKind::Numeric) => Ok(vec![(name.to_string(), Part::Numeric(name.to_string()))]),
        Some(CovariateKind::Factor { levels }) => Ok(levels
            .iter()
            .skip(1)
            .map(|level| {
                (
                    format!("{name}{level}"),
                    Part::Level {
                        name: name.to_string(),
                        level: level.clone(),
                    },
                )
            })
            .collect()),
        None => Err(FormulaError::UnknownVariable(name.to_string())),
    }
}

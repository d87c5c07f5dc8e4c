//! Column-name mapping for longitudinal trial data.

/// Names of the key variables of a longitudinal dataset.
///
/// `covariates` holds formula terms rather than bare names: `"age"`,
/// `"sex*visit"` (main effects plus interaction) and `"group:visit"`
/// (interaction only) are all accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vars {
    pub subjid: String,
    pub visit: String,
    pub group: String,
    pub outcome: String,
    pub covariates: Vec<String>,
    pub strategy: String,
    /// Variables defining the bootstrap resampling strata.
    pub strata: Vec<String>,
}

impl Default for Vars {
    fn default() -> Self {
        Self {
            subjid: "subjid".to_string(),
            visit: "visit".to_string(),
            group: "group".to_string(),
            outcome: "outcome".to_string(),
            covariates: Vec::new(),
            strategy: "strategy".to_string(),
            strata: vec!["group".to_string()],
        }
    }
}

impl Vars {
    #[must_use]
    pub fn with_covariates<I, S>(mut self, covariates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.covariates = covariates.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_strata<I, S>(mut self, strata: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.strata = strata.into_iter().map(Into::into).collect();
        self
    }

    /// Distinct variable names referenced by the covariate terms, in order of
    /// first mention.
    #[must_use]
    pub fn covariate_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for term in &self.covariates {
            for name in split_term(term) {
                if !names.iter().any(|existing| existing == name) {
                    names.push(name.to_string());
                }
            }
        }
        names
    }

    /// Whether `name` is one of the design variables handled natively by the
    /// data container (group or visit) rather than a covariate column.
    #[must_use]
    pub fn is_design_variable(&self, name: &str) -> bool {
        name == self.group || name == self.visit
    }
}

/// Split a term such as `"a*b:c"` into its variable names.
pub(crate) fn split_term(term: &str) -> impl Iterator<Item = &str> {
    term.split(['*', ':'])
        .map(str::trim)
        .filter(|name| !name.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_strata_is_group() {
        let vars = Vars::default();
        assert_eq!(vars.strata, vec!["group".to_string()]);
    }

    #[test]
    fn covariate_names_are_deduplicated() {
        let vars = Vars::default().with_covariates(["age", "sex*visit", "age:sex"]);
        assert_eq!(vars.covariate_names(), vec!["age", "sex", "visit"]);
    }
}

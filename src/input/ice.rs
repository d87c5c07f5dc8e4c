//! Intercurrent-event (ICE) specification.

use std::fmt;
use std::str::FromStr;

/// Imputation strategy assigned to a subject from its first ICE onwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// Missing at random: post-ICE data stay in the model fit.
    Mar,
    /// Jump to reference.
    Jr,
    /// Copy reference.
    Cr,
    /// Copy increments in reference.
    Cir,
    /// Last mean carried forward.
    Lmcf,
    /// User-defined reference-based strategy.
    Custom(String),
}

impl Strategy {
    /// Whether post-ICE outcomes under this strategy are usable for fitting.
    #[must_use]
    pub const fn is_mar(&self) -> bool {
        matches!(self, Self::Mar)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Mar => "MAR",
            Self::Jr => "JR",
            Self::Cr => "CR",
            Self::Cir => "CIR",
            Self::Lmcf => "LMCF",
            Self::Custom(name) => name,
        }
    }
}

impl FromStr for Strategy {
    type Err = std::convert::Infallible;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value {
            "MAR" => Self::Mar,
            "JR" => Self::Jr,
            "CR" => Self::Cr,
            "CIR" => Self::Cir,
            "LMCF" => Self::Lmcf,
            other => Self::Custom(other.to_string()),
        })
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// First ICE of one subject: the first affected visit and the strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceRecord {
    pub subject: String,
    pub visit: String,
    pub strategy: Strategy,
}

impl IceRecord {
    #[must_use]
    pub fn new(subject: impl Into<String>, visit: impl Into<String>, strategy: Strategy) -> Self {
        Self {
            subject: subject.into(),
            visit: visit.into(),
            strategy,
        }
    }
}

//! Tracking expression compiler
//!
//! Supported expressions:
//! - `stable` - any release version, pre-releases excluded
//! - `latest` - any version, pre-releases included
//! - `^1.2.3` - same major (>=1.2.3 <2.0.0)
//! - `~1.2.3` - same minor (>=1.2.3 <1.3.0)
//!
//! Anything shorter than two characters or otherwise unrecognized compiles
//! to a permissive pattern that matches every version.

use std::cmp::Ordering;

use crate::version::error::PatternError;
use crate::version::parser::{DEFAULT_SUFFIX_RANKING, Suffix, SuffixRanking, Version};

pub const STABLE: &str = "stable";
pub const LATEST: &str = "latest";

/// A single boundary over versions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    GreaterOrEqual(Version),
    LowerThan(Version),
}

impl Constraint {
    pub fn boundary(&self) -> &Version {
        match self {
            Constraint::GreaterOrEqual(boundary) | Constraint::LowerThan(boundary) => boundary,
        }
    }

    fn accepts(&self, version: &Version, ranking: &SuffixRanking) -> bool {
        // A release boundary never admits a pre-release candidate
        if self.boundary().suffix == Suffix::None && version.suffix != Suffix::None {
            return false;
        }

        let ordering = version.compare(self.boundary(), ranking);
        match self {
            Constraint::GreaterOrEqual(_) => ordering != Ordering::Less,
            Constraint::LowerThan(_) => ordering == Ordering::Less,
        }
    }
}

/// A compiled tracking expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    name: String,
    constraints: Vec<Constraint>,
    ranking: SuffixRanking,
}

impl Pattern {
    pub fn compile(expression: &str) -> Result<Self, PatternError> {
        Self::compile_with(expression, DEFAULT_SUFFIX_RANKING)
    }

    pub fn compile_with(expression: &str, ranking: SuffixRanking) -> Result<Self, PatternError> {
        let constraints = Self::constraints_for(expression)?;

        Ok(Self {
            name: expression.to_string(),
            constraints,
            ranking,
        })
    }

    fn constraints_for(expression: &str) -> Result<Vec<Constraint>, PatternError> {
        let trimmed = expression.trim();
        if trimmed.len() < 2 {
            return Ok(Vec::new());
        }

        match trimmed {
            STABLE => {
                return Ok(vec![Constraint::GreaterOrEqual(Version::boundary(
                    0,
                    0,
                    0,
                    Suffix::None,
                ))]);
            }
            LATEST => {
                return Ok(vec![Constraint::GreaterOrEqual(Version::boundary(
                    0,
                    0,
                    0,
                    Suffix::Floor,
                ))]);
            }
            _ => {}
        }

        let parse_lower = |rest: &str| {
            Version::parse(rest).map_err(|source| PatternError::InvalidBoundary {
                pattern: expression.to_string(),
                source,
            })
        };

        if let Some(rest) = trimmed.strip_prefix('^') {
            let lower = parse_lower(rest)?;
            let major = lower
                .major
                .checked_add(1)
                .ok_or_else(|| PatternError::BoundaryOverflow(expression.to_string()))?;
            let upper = Version::boundary(major, 0, 0, Self::upper_suffix(&lower));
            Ok(vec![
                Constraint::GreaterOrEqual(lower),
                Constraint::LowerThan(upper),
            ])
        } else if let Some(rest) = trimmed.strip_prefix('~') {
            let lower = parse_lower(rest)?;
            let minor = lower
                .minor
                .checked_add(1)
                .ok_or_else(|| PatternError::BoundaryOverflow(expression.to_string()))?;
            let upper = Version::boundary(lower.major, minor, 0, Self::upper_suffix(&lower));
            Ok(vec![
                Constraint::GreaterOrEqual(lower),
                Constraint::LowerThan(upper),
            ])
        } else {
            Ok(Vec::new())
        }
    }

    /// A pre-release lower bound opens the range to pre-releases, but the
    /// upper bound must still exclude pre-releases of the next major/minor.
    fn upper_suffix(lower: &Version) -> Suffix {
        match lower.suffix {
            Suffix::None => Suffix::None,
            _ => Suffix::Floor,
        }
    }

    /// The literal expression this pattern was compiled from
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn ranking(&self) -> &SuffixRanking {
        &self.ranking
    }

    /// Whether this pattern matches everything (no constraint at all)
    pub fn is_permissive(&self) -> bool {
        self.constraints.is_empty()
    }

    pub fn check(&self, version: &Version) -> bool {
        self.constraints
            .iter()
            .all(|constraint| constraint.accepts(version, &self.ranking))
    }
}

//! Tag string parsing into comparable versions
//!
//! Registries publish tags in many shapes (`v1.2.3`, `release-1.4`,
//! `2.0.0-rc1+build.5`, `1.0.0b2`). Only the first dotted numeric triplet
//! and an optional pre-release qualifier matter for ordering.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use crate::version::error::ParseError;

/// Optional non-digit prefix, then `major[.minor[.patch]]`, then anything.
/// The prefix may not contain dots or digits, so `release.r60.1` is rejected.
static VERSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_-]*(\d+)(?:\.(\d+))?(?:\.(\d+))?(.*)$")
        .expect("version regex is valid")
});

/// Classification of a trailing pre-release qualifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Suffix {
    /// Synthetic lowest rank, never produced by [`Version::parse`].
    /// Used for boundaries that must sit below every real version.
    Floor,
    /// No qualifier, or one outside the known vocabulary
    None,
    Alpha,
    Beta,
    Canary,
    Rc,
    Test,
}

impl Suffix {
    fn classify(qualifier: &str) -> Self {
        let token: String = qualifier
            .chars()
            .take_while(|c| c.is_ascii_alphabetic())
            .collect::<String>()
            .to_ascii_lowercase();

        match token.as_str() {
            "a" | "alpha" => Suffix::Alpha,
            "b" | "beta" => Suffix::Beta,
            "rc" => Suffix::Rc,
            "canary" => Suffix::Canary,
            "test" => Suffix::Test,
            _ => Suffix::None,
        }
    }
}

/// Precedence of pre-release kinds, lowest first.
///
/// `Floor` always ranks below every entry and `None` above every entry,
/// whatever values are configured here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SuffixRanking {
    pub test: u8,
    pub alpha: u8,
    pub beta: u8,
    pub canary: u8,
    pub rc: u8,
}

/// Observed ordering: test < alpha < beta < canary < rc < release
pub const DEFAULT_SUFFIX_RANKING: SuffixRanking = SuffixRanking {
    test: 1,
    alpha: 2,
    beta: 3,
    canary: 4,
    rc: 5,
};

impl Default for SuffixRanking {
    fn default() -> Self {
        DEFAULT_SUFFIX_RANKING
    }
}

impl SuffixRanking {
    pub fn rank(&self, suffix: Suffix) -> u8 {
        let configured = match suffix {
            Suffix::Floor => return u8::MIN,
            Suffix::None => return u8::MAX,
            Suffix::Test => self.test,
            Suffix::Alpha => self.alpha,
            Suffix::Beta => self.beta,
            Suffix::Canary => self.canary,
            Suffix::Rc => self.rc,
        };
        configured.clamp(1, u8::MAX - 1)
    }
}

/// A parsed tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    /// The tag exactly as published
    pub raw: String,
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub suffix: Suffix,
}

impl Version {
    /// Parse a raw tag string.
    ///
    /// Missing minor/patch default to 0. Build metadata after `+` is ignored.
    pub fn parse(raw: &str) -> Result<Self, ParseError> {
        let captures = VERSION_RE
            .captures(raw.trim())
            .ok_or_else(|| ParseError::NoVersion(raw.to_string()))?;

        let component = |index: usize| -> Result<u64, ParseError> {
            match captures.get(index) {
                Some(m) => m
                    .as_str()
                    .parse()
                    .map_err(|_| ParseError::OutOfRange(raw.to_string())),
                None => Ok(0),
            }
        };

        let major = component(1)?;
        let minor = component(2)?;
        let patch = component(3)?;

        let rest = captures.get(4).map_or("", |m| m.as_str());
        let rest = rest.split('+').next().unwrap_or_default();
        let qualifier = match rest.split_once('-') {
            Some((_, after)) => after,
            None => rest.trim_start_matches(['.', '_']),
        };

        Ok(Self {
            raw: raw.to_string(),
            major,
            minor,
            patch,
            suffix: Suffix::classify(qualifier),
        })
    }

    /// Sentinel used to seed reductions: lower than every parsed version
    pub fn none() -> Self {
        Self {
            raw: String::new(),
            major: 0,
            minor: 0,
            patch: 0,
            suffix: Suffix::Floor,
        }
    }

    pub fn is_none(&self) -> bool {
        self.raw.is_empty() && self.suffix == Suffix::Floor
    }

    /// Synthetic version used as a pattern boundary
    pub fn boundary(major: u64, minor: u64, patch: u64, suffix: Suffix) -> Self {
        Self {
            raw: format!("{}.{}.{}", major, minor, patch),
            major,
            minor,
            patch,
            suffix,
        }
    }

    pub fn compare(&self, other: &Version, ranking: &SuffixRanking) -> Ordering {
        (self.major, self.minor, self.patch, ranking.rank(self.suffix)).cmp(&(
            other.major,
            other.minor,
            other.patch,
            ranking.rank(other.suffix),
        ))
    }

    pub fn is_greater(&self, other: &Version) -> bool {
        self.is_greater_by(other, &DEFAULT_SUFFIX_RANKING)
    }

    pub fn is_greater_by(&self, other: &Version, ranking: &SuffixRanking) -> bool {
        self.compare(other, ranking) == Ordering::Greater
    }
}

impl FromStr for Version {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Version::parse(s)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

//! Detection of new releases from freshly resolved versions

use std::collections::HashMap;

use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::model::{Release, Repository};
use crate::version::{Pattern, SuffixRanking, Version};

/// Result of diffing one repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffOutcome {
    /// New releases, in tracked pattern order
    pub releases: Vec<Release>,
    /// Complete versions map to persist in a single write
    pub versions: IndexMap<String, String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReleaseDiffEngine {
    ranking: SuffixRanking,
}

impl ReleaseDiffEngine {
    pub fn new(ranking: SuffixRanking) -> Self {
        Self { ranking }
    }

    /// Compare `fresh` against the versions stored on `repository`.
    ///
    /// A release is emitted for a pattern when the fresh tag differs from
    /// the stored one, satisfies the pattern, and is greater than the
    /// stored version. A stored value that does not parse counts as no
    /// previous version. The sentinel [`Version::none`] never produces a
    /// release.
    pub fn diff(&self, repository: &Repository, fresh: &HashMap<String, Version>) -> DiffOutcome {
        let mut versions = repository.versions.clone();
        let mut releases = Vec::new();

        for pattern in self.ordered_patterns(repository, fresh) {
            let Some(candidate) = fresh.get(pattern) else {
                continue;
            };
            if candidate.is_none() {
                continue;
            }

            let stored = repository.versions.get(pattern).map_or("", String::as_str);
            if candidate.raw == stored {
                continue;
            }

            let compiled = match Pattern::compile_with(pattern, self.ranking) {
                Ok(compiled) => compiled,
                Err(e) => {
                    warn!("{}: skipping pattern: {}", repository.display_name(), e);
                    continue;
                }
            };
            if !compiled.check(candidate) {
                continue;
            }

            let previous = Version::parse(stored).ok();
            if let Some(previous) = &previous {
                if !candidate.is_greater_by(previous, &self.ranking) {
                    debug!(
                        "{} {}: ignoring {} not greater than {}",
                        repository.display_name(),
                        pattern,
                        candidate.raw,
                        previous.raw
                    );
                    continue;
                }
            }

            versions.insert(pattern.to_string(), candidate.raw.clone());
            releases.push(Release {
                repository: repository.clone(),
                pattern: pattern.to_string(),
                version: candidate.clone(),
            });
        }

        DiffOutcome { releases, versions }
    }

    /// Stored patterns first, in their stored order, then any extra
    /// resolved pattern sorted by name
    fn ordered_patterns<'a>(
        &self,
        repository: &'a Repository,
        fresh: &'a HashMap<String, Version>,
    ) -> Vec<&'a str> {
        let mut extra: Vec<&str> = fresh
            .keys()
            .map(String::as_str)
            .filter(|pattern| !repository.versions.contains_key(*pattern))
            .collect();
        extra.sort_unstable();

        repository
            .versions
            .keys()
            .map(String::as_str)
            .chain(extra)
            .collect()
    }
}

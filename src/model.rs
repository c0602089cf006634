//! Domain types shared by the store, the providers and the notifier

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::version::Version;

/// Kind of registry a repository lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepositoryKind {
    /// GitHub tags (owner/repo)
    Github,
    /// Helm chart repository (index URL + chart name)
    Helm,
    /// Docker registry image (namespace/image)
    Docker,
    /// npm package
    Npm,
    /// PyPI package
    Pypi,
}

impl RepositoryKind {
    pub const ALL: [RepositoryKind; 5] = [
        RepositoryKind::Github,
        RepositoryKind::Helm,
        RepositoryKind::Docker,
        RepositoryKind::Npm,
        RepositoryKind::Pypi,
    ];

    /// Returns the string representation of the repository kind
    pub fn as_str(&self) -> &'static str {
        match self {
            RepositoryKind::Github => "github",
            RepositoryKind::Helm => "helm",
            RepositoryKind::Docker => "docker",
            RepositoryKind::Npm => "npm",
            RepositoryKind::Pypi => "pypi",
        }
    }
}

impl std::str::FromStr for RepositoryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "github" => Ok(RepositoryKind::Github),
            "helm" => Ok(RepositoryKind::Helm),
            "docker" => Ok(RepositoryKind::Docker),
            "npm" => Ok(RepositoryKind::Npm),
            "pypi" => Ok(RepositoryKind::Pypi),
            other => Err(format!("unknown repository kind: {}", other)),
        }
    }
}

impl fmt::Display for RepositoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A watched repository and the last version resolved per tracked pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    pub id: u64,
    pub kind: RepositoryKind,
    pub name: String,
    /// Sub-identifier inside the repository (chart name for Helm)
    pub part: String,
    pub versions: IndexMap<String, String>,
}

impl Repository {
    /// Patterns currently tracked for this repository
    pub fn patterns(&self) -> Vec<String> {
        self.versions.keys().cloned().collect()
    }

    /// Human readable identifier, including the part when present
    pub fn display_name(&self) -> String {
        if self.part.is_empty() {
            self.name.clone()
        } else {
            format!("{}#{}", self.name, self.part)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct User {
    pub id: u64,
    pub email: String,
}

/// How often a subscription wants to hear about releases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    None,
    #[default]
    Daily,
    Weekly,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::None => "none",
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
        }
    }
}

impl std::str::FromStr for Frequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Frequency::None),
            "daily" => Ok(Frequency::Daily),
            "weekly" => Ok(Frequency::Weekly),
            other => Err(format!("unknown frequency: {}", other)),
        }
    }
}

/// One user's binding to a repository pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ketchup {
    pub user: User,
    pub repository_id: u64,
    pub pattern: String,
    /// Last version the user has acknowledged
    pub version: String,
    pub frequency: Frequency,
    pub update_when_notify: bool,
}

impl Ketchup {
    /// Sort and join key shared with [`Release::key`]
    pub fn key(&self) -> (u64, &str) {
        (self.repository_id, self.pattern.as_str())
    }
}

/// A pattern that now resolves to a new greatest version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    pub repository: Repository,
    pub pattern: String,
    pub version: Version,
}

impl Release {
    pub fn key(&self) -> (u64, &str) {
        (self.repository.id, self.pattern.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(RepositoryKind::Github)]
    #[case(RepositoryKind::Helm)]
    #[case(RepositoryKind::Docker)]
    #[case(RepositoryKind::Npm)]
    #[case(RepositoryKind::Pypi)]
    fn repository_kind_string_form_parses_back(#[case] kind: RepositoryKind) {
        assert_eq!(kind.as_str().parse::<RepositoryKind>(), Ok(kind));
    }

    #[test]
    fn repository_kind_rejects_unknown_name() {
        assert!("maven".parse::<RepositoryKind>().is_err());
    }

    #[test]
    fn display_name_includes_part_only_when_present() {
        let mut repository = Repository {
            id: 1,
            kind: RepositoryKind::Helm,
            name: "https://charts.example.com".to_string(),
            part: "app".to_string(),
            versions: IndexMap::new(),
        };
        assert_eq!(repository.display_name(), "https://charts.example.com#app");

        repository.part.clear();
        assert_eq!(repository.display_name(), "https://charts.example.com");
    }
}

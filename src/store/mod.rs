//! Persistence of users, repositories and their subscriptions

pub mod sqlite;
pub mod suggestion;

use indexmap::IndexMap;
#[cfg(test)]
use mockall::automock;
use thiserror::Error;

use crate::model::{Ketchup, Repository};

pub use sqlite::SqliteStore;
pub use suggestion::{CacheKey, Suggester, TypedCache};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Database lock poisoned")]
    LockPoisoned,

    #[error("Failed to serialize versions: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid stored value: {0}")]
    InvalidValue(String),
}

/// One row of a repository page
///
/// A row that does not decode keeps its id, so paging moves past it and
/// the rest of the page is still usable.
#[derive(Debug)]
pub enum RepositoryEntry {
    Valid(Repository),
    Invalid { id: u64, error: StoreError },
}

impl RepositoryEntry {
    pub fn id(&self) -> u64 {
        match self {
            RepositoryEntry::Valid(repository) => repository.id,
            RepositoryEntry::Invalid { id, .. } => *id,
        }
    }

    pub fn repository(&self) -> Option<&Repository> {
        match self {
            RepositoryEntry::Valid(repository) => Some(repository),
            RepositoryEntry::Invalid { .. } => None,
        }
    }
}

/// Storage the notify cycle reads from and writes to
#[cfg_attr(test, automock)]
pub trait Store: Send + Sync + 'static {
    /// Repositories with an id greater than `after_id`, ordered by id
    fn list_repositories(
        &self,
        after_id: u64,
        limit: usize,
    ) -> Result<Vec<RepositoryEntry>, StoreError>;

    /// Write the versions map of one repository in a single atomic step.
    ///
    /// `versions` is merged into the stored map: its entries overwrite,
    /// stored patterns it does not mention are kept. A pattern started
    /// while the caller was working with an older copy is never lost.
    fn update_versions(
        &self,
        repository_id: u64,
        versions: &IndexMap<String, String>,
    ) -> Result<(), StoreError>;

    /// Subscriptions on the given repositories, sorted by `(repository_id, pattern)`
    fn ketchups_for_repositories(&self, repository_ids: &[u64])
    -> Result<Vec<Ketchup>, StoreError>;

    fn update_ketchup_version(
        &self,
        user_id: u64,
        repository_id: u64,
        pattern: &str,
        version: &str,
    ) -> Result<(), StoreError>;

    /// Most followed repositories, excluding the ones `user_id` already follows
    fn suggest_repositories(
        &self,
        user_id: Option<u64>,
        count: usize,
    ) -> Result<Vec<Repository>, StoreError>;
}

//! Registry test utilities

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use ketchup::model::{Frequency, Ketchup, Repository, RepositoryKind, User};
use ketchup::provider::{Provider, ProviderError};
use ketchup::store::SqliteStore;
use ketchup::version::{PatternSet, Version, reduce_tags};

/// In-memory registry whose tags can be published between cycles
pub struct StaticProvider {
    kind: RepositoryKind,
    tags: Mutex<HashMap<String, Vec<String>>>,
}

impl StaticProvider {
    pub fn new(kind: RepositoryKind) -> Self {
        Self {
            kind,
            tags: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_tags(self, name: &str, tags: &[&str]) -> Self {
        self.publish(name, tags);
        self
    }

    pub fn publish(&self, name: &str, tags: &[&str]) {
        self.tags
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default()
            .extend(tags.iter().map(|t| t.to_string()));
    }
}

#[async_trait]
impl Provider for StaticProvider {
    fn kind(&self) -> RepositoryKind {
        self.kind
    }

    async fn latest_versions(
        &self,
        name: &str,
        _part: &str,
        patterns: &[String],
    ) -> Result<HashMap<String, Version>, ProviderError> {
        let tags = match self.tags.lock().unwrap().get(name) {
            Some(tags) => tags.clone(),
            None => return Err(ProviderError::NotFound(name.to_string())),
        };

        let patterns = Arc::new(PatternSet::compile(patterns));
        Ok(reduce_tags(patterns, 2, tags).await?)
    }
}

/// Create a store in a temporary directory
pub fn create_test_store() -> (TempDir, Arc<SqliteStore>) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");
    let store = SqliteStore::new(&db_path).unwrap();
    (temp_dir, Arc::new(store))
}

/// Subscribe `email` to `pattern` of a repository, acknowledging `version`
pub fn follow(
    store: &SqliteStore,
    email: &str,
    kind: RepositoryKind,
    name: &str,
    pattern: &str,
    version: &str,
    frequency: Frequency,
) -> (User, Repository) {
    let user = store.upsert_user(email).unwrap();
    let mut repository = store.upsert_repository(kind, name, "").unwrap();

    let tracked = store
        .track_pattern(repository.id, pattern, version)
        .unwrap();
    repository.versions.insert(pattern.to_string(), tracked);

    store
        .upsert_ketchup(&Ketchup {
            user: user.clone(),
            repository_id: repository.id,
            pattern: pattern.to_string(),
            version: version.to_string(),
            frequency,
            update_when_notify: false,
        })
        .unwrap();

    (user, repository)
}

//! Lock store living inside one process

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::lock::{LockError, LockStore};

struct Entry {
    owner: String,
    expires_at: Instant,
}

/// Expiring lock entries kept in a map; only suitable for a single instance
#[derive(Default)]
pub struct MemoryLockStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl LockStore for MemoryLockStore {
    async fn set_if_absent(
        &self,
        name: &str,
        owner: &str,
        ttl: Duration,
    ) -> Result<bool, LockError> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();

        if entries.get(name).is_some_and(|entry| entry.expires_at > now) {
            return Ok(false);
        }

        entries.insert(
            name.to_string(),
            Entry {
                owner: owner.to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    async fn release(&self, name: &str, owner: &str) -> Result<(), LockError> {
        let mut entries = self.entries.lock().await;
        if entries.get(name).is_some_and(|entry| entry.owner == owner) {
            entries.remove(name);
        }
        Ok(())
    }
}

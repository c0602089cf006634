//! Lock store shared by every instance opening the same database file

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{Connection, params};
use tracing::debug;

use crate::lock::{LockError, LockStore};

/// How long a writer waits for another connection's transaction
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct SqliteLockStore {
    conn: Mutex<Connection>,
}

impl SqliteLockStore {
    pub fn new(db_path: &Path) -> Result<Self, LockError> {
        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS locks (
                name TEXT PRIMARY KEY,
                owner TEXT NOT NULL,
                expires_at INTEGER NOT NULL
            )
            "#,
            [],
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>, LockError> {
        self.conn.lock().map_err(|_| LockError::LockPoisoned)
    }
}

#[async_trait::async_trait]
impl LockStore for SqliteLockStore {
    async fn set_if_absent(
        &self,
        name: &str,
        owner: &str,
        ttl: Duration,
    ) -> Result<bool, LockError> {
        let now = chrono::Utc::now().timestamp_millis();
        let expires_at = now.saturating_add(ttl.as_millis().try_into().unwrap_or(i64::MAX));

        let conn = self.lock_conn()?;

        // Take over an entry whose TTL has passed
        let rows_affected = conn.execute(
            r#"
            UPDATE locks
            SET owner = ?1, expires_at = ?2
            WHERE name = ?3 AND expires_at <= ?4
            "#,
            params![owner, expires_at, name, now],
        )?;

        if rows_affected > 0 {
            debug!("Took over expired lock {}", name);
            return Ok(true);
        }

        // Only the first inserter wins; the primary key rejects the rest
        let rows_inserted = conn.execute(
            "INSERT OR IGNORE INTO locks (name, owner, expires_at) VALUES (?1, ?2, ?3)",
            params![name, owner, expires_at],
        )?;

        Ok(rows_inserted > 0)
    }

    async fn release(&self, name: &str, owner: &str) -> Result<(), LockError> {
        let conn = self.lock_conn()?;
        conn.execute(
            "DELETE FROM locks WHERE name = ?1 AND owner = ?2",
            params![name, owner],
        )?;
        Ok(())
    }
}

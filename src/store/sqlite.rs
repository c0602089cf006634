use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use indexmap::IndexMap;
use rusqlite::{
    Connection, OptionalExtension, Row, Transaction, TransactionBehavior, params,
    params_from_iter,
};
use tracing::{debug, info, warn};

use crate::model::{Frequency, Ketchup, Repository, RepositoryKind, User};
use crate::store::{RepositoryEntry, Store, StoreError};

/// How long a writer waits for another process holding the database
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Schema migrations
/// Each version contains a list of SQL statements to execute
const MIGRATIONS: &[&[&str]] = &[
    // v1: frequency column
    &["ALTER TABLE ketchups ADD COLUMN frequency TEXT NOT NULL DEFAULT 'daily'"],
    // v2: update_when_notify column
    &["ALTER TABLE ketchups ADD COLUMN update_when_notify INTEGER NOT NULL DEFAULT 0"],
];

/// Repository row before its kind and versions are decoded
struct RepositoryRow {
    id: i64,
    kind: String,
    name: String,
    part: String,
    versions: String,
}

impl RepositoryRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            kind: row.get(1)?,
            name: row.get(2)?,
            part: row.get(3)?,
            versions: row.get(4)?,
        })
    }

    fn decode(self) -> Result<Repository, StoreError> {
        Ok(Repository {
            id: self.id as u64,
            kind: self.kind.parse().map_err(StoreError::InvalidValue)?,
            name: self.name,
            part: self.part,
            versions: serde_json::from_str(&self.versions)?,
        })
    }
}

struct KetchupRow {
    user_id: i64,
    email: String,
    repository_id: i64,
    pattern: String,
    version: String,
    frequency: String,
    update_when_notify: bool,
}

impl KetchupRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            user_id: row.get(0)?,
            email: row.get(1)?,
            repository_id: row.get(2)?,
            pattern: row.get(3)?,
            version: row.get(4)?,
            frequency: row.get(5)?,
            update_when_notify: row.get(6)?,
        })
    }

    fn decode(self) -> Result<Ketchup, StoreError> {
        Ok(Ketchup {
            user: User {
                id: self.user_id as u64,
                email: self.email,
            },
            repository_id: self.repository_id as u64,
            pattern: self.pattern,
            version: self.version,
            frequency: self.frequency.parse().map_err(StoreError::InvalidValue)?,
            update_when_notify: self.update_when_notify,
        })
    }
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new(db_path: &Path) -> Result<Self, StoreError> {
        info!("Initializing database at {:?}", db_path);

        let conn = Connection::open(db_path)?;

        // Enable WAL mode for better concurrency
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        debug!("Database connection established");

        let store = Self {
            conn: Mutex::new(conn),
        };

        store.create_schema()?;
        info!("Database initialized successfully");

        Ok(store)
    }

    /// Acquire database connection lock with proper error handling
    fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    fn current_timestamp_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    fn create_schema(&self) -> Result<(), StoreError> {
        debug!("Creating database schema");

        let conn = self.lock_conn()?;

        // Create base tables (without migration columns)
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email TEXT NOT NULL UNIQUE,
                created_at INTEGER NOT NULL
            )
            "#,
            [],
        )?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS repositories (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL,
                name TEXT NOT NULL,
                part TEXT NOT NULL DEFAULT '',
                versions TEXT NOT NULL DEFAULT '{}',
                updated_at INTEGER NOT NULL,
                UNIQUE(kind, name, part)
            )
            "#,
            [],
        )?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS ketchups (
                user_id INTEGER NOT NULL,
                repository_id INTEGER NOT NULL,
                pattern TEXT NOT NULL,
                version TEXT NOT NULL DEFAULT '',
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
                FOREIGN KEY (repository_id) REFERENCES repositories(id) ON DELETE CASCADE,
                PRIMARY KEY (user_id, repository_id, pattern)
            )
            "#,
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_ketchups_repository ON ketchups(repository_id, pattern)",
            [],
        )?;

        // Apply migrations
        Self::apply_migrations(&conn)?;

        debug!("Database schema created successfully");
        Ok(())
    }

    /// Apply pending migrations based on user_version pragma
    fn apply_migrations(conn: &Connection) -> Result<(), StoreError> {
        let current_version: i32 =
            conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

        for (i, statements) in MIGRATIONS.iter().enumerate() {
            let version = (i + 1) as i32;
            if version > current_version {
                for sql in *statements {
                    // Tolerate databases that gained the column before the
                    // version counter was recorded
                    match conn.execute(sql, []) {
                        Ok(_) => {}
                        Err(rusqlite::Error::SqliteFailure(_, Some(ref msg)))
                            if msg.contains("duplicate column name") =>
                        {
                            debug!("Column already exists, skipping: {}", sql);
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                debug!("Applied migration v{}", version);
            }
        }

        let target_version = MIGRATIONS.len() as i32;
        if target_version > current_version {
            conn.pragma_update(None, "user_version", target_version)?;
            debug!("Updated schema version to v{}", target_version);
        }

        Ok(())
    }

    /// Stored versions map of one repository, `None` if the row is gone
    fn read_versions(
        tx: &Transaction<'_>,
        repository_id: u64,
    ) -> Result<Option<IndexMap<String, String>>, StoreError> {
        let encoded: Option<String> = tx
            .query_row(
                "SELECT versions FROM repositories WHERE id = ?1",
                params![repository_id as i64],
                |row| row.get(0),
            )
            .optional()?;

        encoded
            .map(|encoded| serde_json::from_str(&encoded))
            .transpose()
            .map_err(StoreError::from)
    }

    fn write_versions(
        tx: &Transaction<'_>,
        repository_id: u64,
        versions: &IndexMap<String, String>,
    ) -> Result<(), StoreError> {
        tx.execute(
            "UPDATE repositories SET versions = ?1, updated_at = ?2 WHERE id = ?3",
            params![
                serde_json::to_string(versions)?,
                Self::current_timestamp_ms(),
                repository_id as i64
            ],
        )?;
        Ok(())
    }

    /// Start tracking `pattern` on a repository at `version` unless it is
    /// already tracked. Returns the version stored for the pattern, which
    /// is the existing one when another caller got there first.
    pub fn track_pattern(
        &self,
        repository_id: u64,
        pattern: &str,
        version: &str,
    ) -> Result<String, StoreError> {
        let mut conn = self.lock_conn()?;
        // IMMEDIATE takes the write lock before reading, so a cycle in
        // another process cannot interleave its own write
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut versions = Self::read_versions(&tx, repository_id)?.ok_or_else(|| {
            StoreError::InvalidValue(format!("unknown repository id: {}", repository_id))
        })?;

        if let Some(stored) = versions.get(pattern) {
            return Ok(stored.clone());
        }

        versions.insert(pattern.to_string(), version.to_string());
        Self::write_versions(&tx, repository_id, &versions)?;
        tx.commit()?;

        Ok(version.to_string())
    }

    /// Insert the user unless the email is already known
    pub fn upsert_user(&self, email: &str) -> Result<User, StoreError> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO users (email, created_at) VALUES (?1, ?2) ON CONFLICT(email) DO NOTHING",
            params![email, Self::current_timestamp_ms()],
        )?;

        let id: i64 = conn.query_row(
            "SELECT id FROM users WHERE email = ?1",
            params![email],
            |row| row.get(0),
        )?;

        Ok(User {
            id: id as u64,
            email: email.to_string(),
        })
    }

    pub fn find_user(&self, email: &str) -> Result<Option<User>, StoreError> {
        let conn = self.lock_conn()?;
        let id: Option<i64> = conn
            .query_row(
                "SELECT id FROM users WHERE email = ?1",
                params![email],
                |row| row.get(0),
            )
            .optional()?;

        Ok(id.map(|id| User {
            id: id as u64,
            email: email.to_string(),
        }))
    }

    /// Insert the repository unless it is already known, returning its stored state
    pub fn upsert_repository(
        &self,
        kind: RepositoryKind,
        name: &str,
        part: &str,
    ) -> Result<Repository, StoreError> {
        let conn = self.lock_conn()?;
        conn.execute(
            r#"
            INSERT INTO repositories (kind, name, part, versions, updated_at)
            VALUES (?1, ?2, ?3, '{}', ?4)
            ON CONFLICT(kind, name, part) DO NOTHING
            "#,
            params![kind.as_str(), name, part, Self::current_timestamp_ms()],
        )?;

        let row = conn.query_row(
            r#"
            SELECT id, kind, name, part, versions FROM repositories
            WHERE kind = ?1 AND name = ?2 AND part = ?3
            "#,
            params![kind.as_str(), name, part],
            RepositoryRow::read,
        )?;

        row.decode()
    }

    /// Create or update a subscription; the acknowledged version of an
    /// existing subscription is left untouched
    pub fn upsert_ketchup(&self, ketchup: &Ketchup) -> Result<(), StoreError> {
        let conn = self.lock_conn()?;
        conn.execute(
            r#"
            INSERT INTO ketchups (user_id, repository_id, pattern, version, frequency, update_when_notify)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(user_id, repository_id, pattern) DO UPDATE SET
                frequency = excluded.frequency,
                update_when_notify = excluded.update_when_notify
            "#,
            params![
                ketchup.user.id as i64,
                ketchup.repository_id as i64,
                ketchup.pattern,
                ketchup.version,
                ketchup.frequency.as_str(),
                ketchup.update_when_notify,
            ],
        )?;
        Ok(())
    }
}

impl Store for SqliteStore {
    fn list_repositories(
        &self,
        after_id: u64,
        limit: usize,
    ) -> Result<Vec<RepositoryEntry>, StoreError> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, kind, name, part, versions FROM repositories
            WHERE id > ?1
            ORDER BY id
            LIMIT ?2
            "#,
        )?;

        let rows = stmt
            .query_map(params![after_id as i64, limit as i64], RepositoryRow::read)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let id = row.id as u64;
                match row.decode() {
                    Ok(repository) => RepositoryEntry::Valid(repository),
                    Err(error) => RepositoryEntry::Invalid { id, error },
                }
            })
            .collect())
    }

    fn update_versions(
        &self,
        repository_id: u64,
        versions: &IndexMap<String, String>,
    ) -> Result<(), StoreError> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let Some(mut merged) = Self::read_versions(&tx, repository_id)? else {
            debug!("Repository {} was removed, dropping its versions", repository_id);
            return Ok(());
        };
        merged.extend(versions.iter().map(|(p, v)| (p.clone(), v.clone())));

        Self::write_versions(&tx, repository_id, &merged)?;
        tx.commit()?;
        Ok(())
    }

    fn ketchups_for_repositories(
        &self,
        repository_ids: &[u64],
    ) -> Result<Vec<Ketchup>, StoreError> {
        if repository_ids.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.lock_conn()?;

        // Build WHERE IN clause with placeholders
        let placeholders: Vec<_> = (0..repository_ids.len())
            .map(|i| format!("?{}", i + 1))
            .collect();

        // BINARY collation orders patterns the same way `str` does
        let query = format!(
            r#"
            SELECT k.user_id, u.email, k.repository_id, k.pattern, k.version,
                   k.frequency, k.update_when_notify
            FROM ketchups k
            JOIN users u ON u.id = k.user_id
            WHERE k.repository_id IN ({})
            ORDER BY k.repository_id, k.pattern, k.user_id
            "#,
            placeholders.join(", ")
        );

        let mut stmt = conn.prepare(&query)?;
        let rows = stmt
            .query_map(
                params_from_iter(repository_ids.iter().map(|id| *id as i64)),
                KetchupRow::read,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        // One broken subscription must not hide the others
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let (user_id, repository_id) = (row.user_id, row.repository_id);
                row.decode()
                    .inspect_err(|e| {
                        warn!(
                            "Skipping subscription of user {} on repository {}: {}",
                            user_id, repository_id, e
                        )
                    })
                    .ok()
            })
            .collect())
    }

    fn update_ketchup_version(
        &self,
        user_id: u64,
        repository_id: u64,
        pattern: &str,
        version: &str,
    ) -> Result<(), StoreError> {
        let conn = self.lock_conn()?;
        conn.execute(
            r#"
            UPDATE ketchups SET version = ?1
            WHERE user_id = ?2 AND repository_id = ?3 AND pattern = ?4
            "#,
            params![version, user_id as i64, repository_id as i64, pattern],
        )?;
        Ok(())
    }

    fn suggest_repositories(
        &self,
        user_id: Option<u64>,
        count: usize,
    ) -> Result<Vec<Repository>, StoreError> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT r.id, r.kind, r.name, r.part, r.versions
            FROM repositories r
            JOIN ketchups k ON k.repository_id = r.id
            WHERE ?1 IS NULL
               OR r.id NOT IN (SELECT repository_id FROM ketchups WHERE user_id = ?1)
            GROUP BY r.id
            ORDER BY COUNT(DISTINCT k.user_id) DESC, r.id
            LIMIT ?2
            "#,
        )?;

        let rows = stmt
            .query_map(
                params![user_id.map(|id| id as i64), count as i64],
                RepositoryRow::read,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(RepositoryRow::decode).collect()
    }
}

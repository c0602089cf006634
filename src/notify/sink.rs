//! Destinations for per-user release digests

use std::path::{Path, PathBuf};

#[cfg(test)]
use mockall::automock;
use serde::Serialize;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::model::{Release, RepositoryKind, User};

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Failed to write notification: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize notification: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Receives one digest per user; formatting and delivery happen elsewhere
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, user: &User, releases: &[Release]) -> Result<(), SinkError>;
}

/// Emits one log event per release
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait::async_trait]
impl NotificationSink for LogSink {
    async fn send(&self, user: &User, releases: &[Release]) -> Result<(), SinkError> {
        for release in releases {
            info!(
                user = %user.email,
                kind = %release.repository.kind,
                repository = %release.repository.display_name(),
                pattern = %release.pattern,
                version = %release.version,
                "New release"
            );
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct OutboxRelease<'a> {
    kind: RepositoryKind,
    name: &'a str,
    part: &'a str,
    pattern: &'a str,
    version: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OutboxEntry<'a> {
    user: &'a User,
    releases: Vec<OutboxRelease<'a>>,
    created_at: String,
}

/// Appends one JSON line per digest for an external mailer to pick up
pub struct OutboxSink {
    path: PathBuf,
}

impl OutboxSink {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }
}

#[async_trait::async_trait]
impl NotificationSink for OutboxSink {
    async fn send(&self, user: &User, releases: &[Release]) -> Result<(), SinkError> {
        let entry = OutboxEntry {
            user,
            releases: releases
                .iter()
                .map(|release| OutboxRelease {
                    kind: release.repository.kind,
                    name: &release.repository.name,
                    part: &release.repository.part,
                    pattern: &release.pattern,
                    version: &release.version.raw,
                })
                .collect(),
            created_at: chrono::Utc::now().to_rfc3339(),
        };

        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Repository;
    use crate::version::Version;
    use indexmap::IndexMap;
    use serde_json::{Value, json};
    use tempfile::TempDir;

    fn release(name: &str, pattern: &str, version: &str) -> Release {
        Release {
            repository: Repository {
                id: 1,
                kind: RepositoryKind::Helm,
                name: name.to_string(),
                part: "app".to_string(),
                versions: IndexMap::new(),
            },
            pattern: pattern.to_string(),
            version: Version::parse(version).unwrap(),
        }
    }

    #[tokio::test]
    async fn outbox_sink_appends_one_line_per_digest() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("outbox.jsonl");
        let sink = OutboxSink::new(&path);
        let alice = User {
            id: 1,
            email: "alice@example.com".to_string(),
        };
        let bob = User {
            id: 2,
            email: "bob@example.com".to_string(),
        };

        sink.send(
            &alice,
            &[
                release("https://charts.example.com", "stable", "1.2.0"),
                release("https://charts.example.com", "latest", "2.0.0-rc.1"),
            ],
        )
        .await
        .unwrap();
        sink.send(&bob, &[release("https://charts.example.com", "stable", "1.2.0")])
            .await
            .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<Value> = content
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["user"], json!({"id": 1, "email": "alice@example.com"}));
        assert_eq!(
            lines[0]["releases"],
            json!([
                {"kind": "helm", "name": "https://charts.example.com", "part": "app", "pattern": "stable", "version": "1.2.0"},
                {"kind": "helm", "name": "https://charts.example.com", "part": "app", "pattern": "latest", "version": "2.0.0-rc.1"}
            ])
        );
        assert_eq!(lines[1]["user"]["email"], "bob@example.com");
        assert!(lines[1]["createdAt"].is_string());
    }

    #[tokio::test]
    async fn log_sink_accepts_any_digest() {
        let user = User {
            id: 1,
            email: "alice@example.com".to_string(),
        };

        assert!(LogSink.send(&user, &[]).await.is_ok());
        assert!(
            LogSink
                .send(&user, &[release("https://charts.example.com", "stable", "1.0.0")])
                .await
                .is_ok()
        );
    }
}

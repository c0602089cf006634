use std::path::{Path, PathBuf};

use chrono::{NaiveTime, Weekday};
use serde::Deserialize;
use thiserror::Error;

use crate::provider::{docker, github, npm, pypi};
use crate::version::SuffixRanking;

// =============================================================================
// Notify cycle constants
// =============================================================================

/// Default local time of the daily notify cycle
pub const DEFAULT_NOTIFY_AT: &str = "08:00";

/// Default lock TTL in seconds, also the deadline of one cycle (10 minutes)
pub const DEFAULT_LOCK_TTL_SECS: u64 = 10 * 60;

/// Name of the cluster-wide lock guarding the notify cycle
pub const NOTIFY_LOCK_NAME: &str = "ketchup_notify";

/// Default number of tag parser workers per repository
pub const DEFAULT_PARSE_WORKERS: usize = 4;

/// Default number of repositories read per store page
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Day on which weekly subscriptions are notified
pub const DEFAULT_WEEKLY_DAY: &str = "monday";

/// Default suggestion cache TTL in seconds (1 hour)
pub const DEFAULT_SUGGESTION_TTL_SECS: u64 = 60 * 60;

/// Default number of suggested repositories
pub const DEFAULT_SUGGESTION_COUNT: usize = 3;

/// Environment variable overriding the GitHub token
pub const GITHUB_TOKEN_ENV: &str = "KETCHUP_GITHUB_TOKEN";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid notify time {0:?}, expected HH:MM")]
    InvalidTime(String),

    #[error("Invalid weekday {0:?}")]
    InvalidWeekday(String),
}

/// Application configuration structure
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct AppConfig {
    pub notify: NotifyConfig,
    pub providers: ProvidersConfig,
    pub suffix_ranking: SuffixRanking,
    pub suggestion: SuggestionConfig,
}

/// Notify cycle configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct NotifyConfig {
    /// Local time of the daily cycle, `HH:MM`
    pub at: String,
    /// Lock TTL in seconds
    pub lock_ttl: u64,
    pub workers: usize,
    pub page_size: usize,
    pub weekly_day: String,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            at: DEFAULT_NOTIFY_AT.to_string(),
            lock_ttl: DEFAULT_LOCK_TTL_SECS,
            workers: DEFAULT_PARSE_WORKERS,
            page_size: DEFAULT_PAGE_SIZE,
            weekly_day: DEFAULT_WEEKLY_DAY.to_string(),
        }
    }
}

impl NotifyConfig {
    pub fn time(&self) -> Result<NaiveTime, ConfigError> {
        NaiveTime::parse_from_str(&self.at, "%H:%M")
            .map_err(|_| ConfigError::InvalidTime(self.at.clone()))
    }

    pub fn weekday(&self) -> Result<Weekday, ConfigError> {
        self.weekly_day
            .parse()
            .map_err(|_| ConfigError::InvalidWeekday(self.weekly_day.clone()))
    }
}

/// Provider-specific configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProvidersConfig {
    pub github: GithubConfig,
    pub docker: DockerConfig,
    pub helm: ProviderConfig,
    pub npm: ProviderConfig,
    pub pypi: ProviderConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct GithubConfig {
    pub enabled: bool,
    pub base_url: String,
    pub token: Option<String>,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: github::DEFAULT_BASE_URL.to_string(),
            token: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct DockerConfig {
    pub enabled: bool,
    pub base_url: String,
    pub auth_url: String,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: docker::DEFAULT_BASE_URL.to_string(),
            auth_url: docker::DEFAULT_AUTH_URL.to_string(),
        }
    }
}

/// Individual provider configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ProviderConfig {
    pub enabled: bool,
    pub base_url: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: String::new(),
        }
    }
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            github: GithubConfig::default(),
            docker: DockerConfig::default(),
            helm: ProviderConfig::default(),
            npm: ProviderConfig {
                base_url: npm::DEFAULT_BASE_URL.to_string(),
                ..ProviderConfig::default()
            },
            pypi: ProviderConfig {
                base_url: pypi::DEFAULT_BASE_URL.to_string(),
                ..ProviderConfig::default()
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct SuggestionConfig {
    /// Cache TTL in seconds
    pub ttl: u64,
    pub count: usize,
}

impl Default for SuggestionConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_SUGGESTION_TTL_SECS,
            count: DEFAULT_SUGGESTION_COUNT,
        }
    }
}

impl AppConfig {
    /// Load configuration from `path`, falling back to defaults when absent,
    /// then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            serde_json::from_str(&content)?
        } else {
            AppConfig::default()
        };

        config.apply_env_with(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(token) = lookup(GITHUB_TOKEN_ENV).filter(|t| !t.is_empty()) {
            self.providers.github.token = Some(token);
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.notify.time()?;
        self.notify.weekday()?;
        Ok(())
    }
}

/// Returns the path to the data directory for ketchup.
/// Uses $XDG_DATA_HOME/ketchup if XDG_DATA_HOME is set,
/// otherwise falls back to ~/.local/share/ketchup,
/// or ./ketchup if neither is available.
pub fn data_dir() -> PathBuf {
    data_dir_with_env(std::env::var("XDG_DATA_HOME").ok(), dirs::home_dir())
}

/// Returns the path to the database file.
pub fn db_path() -> PathBuf {
    data_dir().join("ketchup.db")
}

/// Returns the path to the log file.
pub fn log_path() -> PathBuf {
    data_dir().join("ketchup.log")
}

/// Returns the default path to the config file.
pub fn config_path() -> PathBuf {
    data_dir().join("config.json")
}

/// Returns the path to the notification outbox.
pub fn outbox_path() -> PathBuf {
    data_dir().join("outbox.jsonl")
}

fn data_dir_with_env(xdg_data_home: Option<String>, home_dir: Option<PathBuf>) -> PathBuf {
    let data_dir = xdg_data_home
        .map(PathBuf::from)
        .or_else(|| home_dir.map(|home| home.join(".local/share")))
        .unwrap_or_else(|| PathBuf::from("."));

    data_dir.join("ketchup")
}

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::warn;

use ketchup::config::{self, AppConfig};
use ketchup::lock::{ExclusiveRunLock, SqliteLockStore};
use ketchup::logging::{self, LogOptions};
use ketchup::model::{Frequency, Ketchup, RepositoryKind};
use ketchup::notify::{Notifier, OutboxSink, ReleaseDiffEngine};
use ketchup::provider::{Provider, ReduceOptions, create_providers};
use ketchup::scheduler::Scheduler;
use ketchup::store::{CacheKey, SqliteStore, Store, Suggester};
use ketchup::version::Pattern;

#[derive(Parser)]
#[command(name = "ketchup")]
#[command(version, about = "Watches package registries and notifies subscribers of new releases")]
struct Cli {
    /// Path to the JSON config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Write the log file as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one notify cycle now
    Notify,
    /// Run a notify cycle every day at the configured time (SIGUSR1 runs one immediately)
    Schedule,
    /// Subscribe a user to a repository pattern
    Follow {
        /// Subscriber email
        #[arg(long)]
        email: String,
        /// Registry kind: github, helm, docker, npm, pypi
        #[arg(long)]
        kind: RepositoryKind,
        /// Repository identifier (owner/repo, image, package, or Helm index URL)
        name: String,
        /// Chart name for Helm repositories
        #[arg(long, default_value = "")]
        part: String,
        #[arg(long, default_value = "stable")]
        pattern: String,
        /// none, daily or weekly
        #[arg(long, default_value = "daily")]
        frequency: Frequency,
        /// Mark releases as seen once they have been sent
        #[arg(long)]
        update_when_notify: bool,
    },
    /// List the most followed repositories
    Suggest {
        /// Exclude repositories this user already follows
        #[arg(long)]
        email: Option<String>,
    },
}

struct Follow {
    email: String,
    kind: RepositoryKind,
    name: String,
    part: String,
    pattern: String,
    frequency: Frequency,
    update_when_notify: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.unwrap_or_else(config::config_path);
    let config = AppConfig::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let interactive = !matches!(cli.command, Command::Schedule);
    let _guard = logging::init(
        &config::log_path(),
        LogOptions {
            json: cli.log_json,
            stderr: interactive,
        },
    )?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    match cli.command {
        Command::Notify => runtime.block_on(notify(&config)),
        Command::Schedule => runtime.block_on(schedule(&config)),
        Command::Follow {
            email,
            kind,
            name,
            part,
            pattern,
            frequency,
            update_when_notify,
        } => runtime.block_on(follow(
            &config,
            Follow {
                email,
                kind,
                name,
                part,
                pattern,
                frequency,
                update_when_notify,
            },
        )),
        Command::Suggest { email } => suggest(&config, email.as_deref()),
    }
}

fn open_store() -> anyhow::Result<Arc<SqliteStore>> {
    let db_path = config::db_path();
    if let Some(dir) = db_path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    Ok(Arc::new(SqliteStore::new(&db_path)?))
}

fn reduce_options(config: &AppConfig) -> ReduceOptions {
    ReduceOptions {
        workers: config.notify.workers,
        ranking: config.suffix_ranking,
    }
}

fn build_scheduler(config: &AppConfig) -> anyhow::Result<Scheduler> {
    let store = open_store()?;
    let providers = create_providers(&config.providers, reduce_options(config));
    let sink = Arc::new(OutboxSink::new(&config::outbox_path()));

    let notifier = Notifier::new(
        store,
        providers,
        sink,
        ReleaseDiffEngine::new(config.suffix_ranking),
    )
    .with_page_size(config.notify.page_size)
    .with_weekly_day(config.notify.weekday()?);

    let lock = ExclusiveRunLock::new(Arc::new(SqliteLockStore::new(&config::db_path())?));

    Ok(Scheduler::new(
        Arc::new(notifier),
        lock,
        config.notify.time()?,
        Duration::from_secs(config.notify.lock_ttl),
    ))
}

async fn notify(config: &AppConfig) -> anyhow::Result<()> {
    let scheduler = build_scheduler(config)?;

    match scheduler.run_once().await? {
        Some(report) => println!(
            "{} repositories scanned ({} skipped, {} failed), {} releases, {} users notified",
            report.repositories,
            report.skipped,
            report.failures,
            report.releases,
            report.users_notified
        ),
        None => println!("Another instance is running the notify cycle"),
    }
    Ok(())
}

async fn schedule(config: &AppConfig) -> anyhow::Result<()> {
    build_scheduler(config)?.run().await?;
    Ok(())
}

async fn follow(config: &AppConfig, request: Follow) -> anyhow::Result<()> {
    Pattern::compile_with(&request.pattern, config.suffix_ranking)?;

    let store = open_store()?;
    let user = store.upsert_user(&request.email)?;
    let repository = store.upsert_repository(request.kind, &request.name, &request.part)?;

    let version = match repository.versions.get(&request.pattern) {
        Some(version) => version.clone(),
        None => {
            // Start from the current best so the first cycle does not report it as new
            let current = current_version(config, &request).await;
            store.track_pattern(repository.id, &request.pattern, &current)?
        }
    };

    store.upsert_ketchup(&Ketchup {
        user: user.clone(),
        repository_id: repository.id,
        pattern: request.pattern.clone(),
        version: version.clone(),
        frequency: request.frequency,
        update_when_notify: request.update_when_notify,
    })?;

    println!(
        "{} follows {} {} ({}) at {}",
        user.email,
        repository.kind,
        repository.display_name(),
        request.pattern,
        if version.is_empty() { "-" } else { &version }
    );
    Ok(())
}

/// Best version the registry currently offers for the pattern, empty if unknown
async fn current_version(config: &AppConfig, request: &Follow) -> String {
    let providers = create_providers(&config.providers, reduce_options(config));
    let Some(provider) = providers.get(&request.kind) else {
        return String::new();
    };

    provider
        .latest_versions(&request.name, &request.part, &[request.pattern.clone()])
        .await
        .inspect_err(|e| warn!("Failed to resolve {}: {}", request.name, e))
        .ok()
        .and_then(|mut resolved| resolved.remove(&request.pattern))
        .filter(|version| !version.is_none())
        .map(|version| version.raw)
        .unwrap_or_default()
}

fn suggest(config: &AppConfig, email: Option<&str>) -> anyhow::Result<()> {
    let store = open_store()?;
    let user = match email {
        Some(email) => store.find_user(email)?,
        None => None,
    };

    let suggester = Suggester::new(
        store.clone() as Arc<dyn Store>,
        Duration::from_secs(config.suggestion.ttl),
        config.suggestion.count,
    );

    for repository in suggester.suggest(CacheKey::for_user(user.map(|u| u.id)))? {
        println!("{} {}", repository.kind, repository.display_name());
    }
    Ok(())
}

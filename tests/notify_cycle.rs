//! Notify cycle integration tests

mod helper;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Weekday;
use serde_json::Value;
use tempfile::TempDir;

use helper::{StaticProvider, create_test_store, follow};
use ketchup::lock::{ExclusiveRunLock, MemoryLockStore};
use ketchup::model::{Frequency, RepositoryKind};
use ketchup::notify::{CycleError, Notifier, OutboxSink, ReleaseDiffEngine};
use ketchup::provider::Provider;
use ketchup::store::{RepositoryEntry, SqliteStore, Store};

fn create_notifier(
    store: &Arc<SqliteStore>,
    provider: Arc<StaticProvider>,
    outbox: &Path,
) -> Notifier {
    let providers: HashMap<RepositoryKind, Arc<dyn Provider>> =
        HashMap::from([(provider.kind(), provider as Arc<dyn Provider>)]);

    Notifier::new(
        store.clone(),
        providers,
        Arc::new(OutboxSink::new(outbox)),
        ReleaseDiffEngine::default(),
    )
}

fn read_outbox(path: &Path) -> Vec<Value> {
    if !path.exists() {
        return Vec::new();
    }
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

fn stored_version(store: &SqliteStore, name: &str, pattern: &str) -> String {
    store
        .list_repositories(0, 100)
        .unwrap()
        .iter()
        .filter_map(RepositoryEntry::repository)
        .find(|repository| repository.name == name)
        .and_then(|repository| repository.versions.get(pattern).cloned())
        .unwrap()
}

#[tokio::test]
async fn cycle_writes_one_digest_per_user_and_persists_versions() {
    let (temp_dir, store) = create_test_store();
    let outbox = temp_dir.path().join("outbox.jsonl");

    follow(
        &store,
        "alice@example.com",
        RepositoryKind::Github,
        "acme/widget",
        "stable",
        "v1.0.0",
        Frequency::Daily,
    );
    follow(
        &store,
        "bob@example.com",
        RepositoryKind::Github,
        "acme/widget",
        "latest",
        "v1.0.0",
        Frequency::Daily,
    );

    let provider = Arc::new(
        StaticProvider::new(RepositoryKind::Github)
            .with_tags("acme/widget", &["v1.0.0", "v1.1.0", "v2.0.0-rc1"]),
    );
    let notifier = create_notifier(&store, provider, &outbox);

    let report = notifier.run(Weekday::Mon).await.unwrap();

    assert_eq!(report.repositories, 1);
    assert_eq!(report.releases, 2);
    assert_eq!(report.users_notified, 2);
    assert_eq!(report.failures, 0);

    let digests = read_outbox(&outbox);
    assert_eq!(digests.len(), 2);

    assert_eq!(digests[0]["user"]["email"], "alice@example.com");
    assert_eq!(digests[0]["releases"].as_array().unwrap().len(), 1);
    assert_eq!(digests[0]["releases"][0]["kind"], "github");
    assert_eq!(digests[0]["releases"][0]["name"], "acme/widget");
    assert_eq!(digests[0]["releases"][0]["pattern"], "stable");
    assert_eq!(digests[0]["releases"][0]["version"], "v1.1.0");

    assert_eq!(digests[1]["user"]["email"], "bob@example.com");
    assert_eq!(digests[1]["releases"][0]["pattern"], "latest");
    assert_eq!(digests[1]["releases"][0]["version"], "v2.0.0-rc1");

    assert_eq!(stored_version(&store, "acme/widget", "stable"), "v1.1.0");
    assert_eq!(stored_version(&store, "acme/widget", "latest"), "v2.0.0-rc1");
}

#[tokio::test]
async fn later_cycles_report_only_newly_published_tags() {
    let (temp_dir, store) = create_test_store();
    let outbox = temp_dir.path().join("outbox.jsonl");

    follow(
        &store,
        "alice@example.com",
        RepositoryKind::Npm,
        "left-pad",
        "^1.0.0",
        "1.0.0",
        Frequency::Daily,
    );

    let provider = Arc::new(
        StaticProvider::new(RepositoryKind::Npm).with_tags("left-pad", &["1.0.0", "1.0.1"]),
    );
    let notifier = create_notifier(&store, provider.clone(), &outbox);

    let first = notifier.run(Weekday::Mon).await.unwrap();
    assert_eq!(first.releases, 1);

    // Nothing new published
    let second = notifier.run(Weekday::Tue).await.unwrap();
    assert_eq!(second.releases, 0);
    assert_eq!(second.users_notified, 0);

    // Out of range for ^1.0.0
    provider.publish("left-pad", &["2.0.0", "1.1.0"]);
    let third = notifier.run(Weekday::Wed).await.unwrap();
    assert_eq!(third.releases, 1);

    let digests = read_outbox(&outbox);
    assert_eq!(digests.len(), 2);
    assert_eq!(digests[0]["releases"][0]["version"], "1.0.1");
    assert_eq!(digests[1]["releases"][0]["version"], "1.1.0");
    assert_eq!(stored_version(&store, "left-pad", "^1.0.0"), "1.1.0");
}

#[tokio::test]
async fn unreachable_repository_does_not_block_the_others() {
    let (temp_dir, store) = create_test_store();
    let outbox = temp_dir.path().join("outbox.jsonl");

    follow(
        &store,
        "alice@example.com",
        RepositoryKind::Github,
        "acme/gone",
        "stable",
        "v1.0.0",
        Frequency::Daily,
    );
    follow(
        &store,
        "alice@example.com",
        RepositoryKind::Github,
        "acme/widget",
        "stable",
        "v1.0.0",
        Frequency::Daily,
    );
    // No provider configured for PyPI
    follow(
        &store,
        "alice@example.com",
        RepositoryKind::Pypi,
        "requests",
        "stable",
        "2.0.0",
        Frequency::Daily,
    );

    let provider = Arc::new(
        StaticProvider::new(RepositoryKind::Github).with_tags("acme/widget", &["v1.0.0", "v1.2.0"]),
    );
    let notifier = create_notifier(&store, provider, &outbox);

    let report = notifier.run(Weekday::Mon).await.unwrap();

    assert_eq!(report.repositories, 3);
    assert_eq!(report.failures, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.releases, 1);
    assert_eq!(report.users_notified, 1);

    assert_eq!(stored_version(&store, "acme/gone", "stable"), "v1.0.0");
    assert_eq!(stored_version(&store, "requests", "stable"), "2.0.0");
}

#[tokio::test]
async fn weekly_subscribers_are_only_notified_on_their_day() {
    let (temp_dir, store) = create_test_store();
    let outbox = temp_dir.path().join("outbox.jsonl");

    follow(
        &store,
        "weekly@example.com",
        RepositoryKind::Docker,
        "library/nginx",
        "stable",
        "1.25.0",
        Frequency::Weekly,
    );
    follow(
        &store,
        "muted@example.com",
        RepositoryKind::Docker,
        "library/nginx",
        "stable",
        "1.25.0",
        Frequency::None,
    );

    let provider = Arc::new(
        StaticProvider::new(RepositoryKind::Docker)
            .with_tags("library/nginx", &["1.25.0", "1.27.0"]),
    );
    let notifier = create_notifier(&store, provider, &outbox).with_weekly_day(Weekday::Fri);

    let report = notifier.run(Weekday::Tue).await.unwrap();

    assert_eq!(report.releases, 1);
    assert_eq!(report.users_notified, 0);
    assert!(read_outbox(&outbox).is_empty());
    assert_eq!(stored_version(&store, "library/nginx", "stable"), "1.27.0");
}

#[tokio::test]
async fn exclusive_lock_runs_the_cycle_in_one_instance_only() {
    let (temp_dir, store) = create_test_store();
    let outbox = temp_dir.path().join("outbox.jsonl");

    follow(
        &store,
        "alice@example.com",
        RepositoryKind::Github,
        "acme/widget",
        "stable",
        "v1.0.0",
        Frequency::Daily,
    );

    let provider = Arc::new(
        StaticProvider::new(RepositoryKind::Github).with_tags("acme/widget", &["v1.3.0"]),
    );
    let notifier = create_notifier(&store, provider, &outbox);

    // Two instances sharing one lock store
    let locks = Arc::new(MemoryLockStore::new());
    let first = ExclusiveRunLock::new(locks.clone());
    let second = ExclusiveRunLock::new(locks);
    let ttl = Duration::from_secs(30);
    let (notifier, second) = (&notifier, &second);

    let ran = first
        .try_run("notify", ttl, || async move {
            let skipped = second
                .try_run("notify", ttl, || notifier.run(Weekday::Mon))
                .await
                .unwrap();
            assert!(skipped.is_none());

            notifier.run(Weekday::Mon).await
        })
        .await
        .unwrap();

    assert_eq!(ran.map(|report| report.releases), Some(1));
    assert_eq!(read_outbox(&outbox).len(), 1);

    // Released afterwards
    let again = second
        .try_run("notify", ttl, || async { Ok::<_, CycleError>(()) })
        .await
        .unwrap();
    assert_eq!(again, Some(()));
}

#[test]
fn outbox_is_not_created_without_releases() {
    let temp_dir = TempDir::new().unwrap();
    assert!(read_outbox(&temp_dir.path().join("missing.jsonl")).is_empty());
}

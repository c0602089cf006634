//! At-most-one execution of an action across every running instance
//!
//! [`ExclusiveRunLock`] takes a named lock with a TTL from a shared
//! [`LockStore`]. If another instance holds it the call returns at once
//! without running anything. The TTL is also the action's deadline, so
//! the action can never outlive its exclusivity window. Nothing extends
//! the TTL, which means a cycle that legitimately needs longer is cut
//! off with [`RunError::Deadline`].

pub mod memory;
pub mod sqlite;

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::FutureExt;
#[cfg(test)]
use mockall::automock;
use thiserror::Error;
use tracing::{debug, info, warn};

pub use memory::MemoryLockStore;
pub use sqlite::SqliteLockStore;

static NEXT_OWNER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Error)]
pub enum LockError {
    #[error("Lock database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Lock database connection poisoned")]
    LockPoisoned,
}

#[derive(Debug, Error)]
pub enum RunError<E> {
    #[error("Lock store unavailable: {0}")]
    Lock(#[source] LockError),

    #[error(transparent)]
    Action(E),

    #[error("Action did not finish within the lock TTL of {0:?}")]
    Deadline(Duration),
}

/// Shared key-value store offering atomic set-if-absent with expiry
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait LockStore: Send + Sync {
    /// Take `name` for `owner` unless a live entry exists.
    /// Returns whether the lock was taken.
    async fn set_if_absent(&self, name: &str, owner: &str, ttl: Duration)
    -> Result<bool, LockError>;

    /// Remove `name` if it is still held by `owner`
    async fn release(&self, name: &str, owner: &str) -> Result<(), LockError>;
}

pub struct ExclusiveRunLock {
    store: Arc<dyn LockStore>,
}

impl ExclusiveRunLock {
    pub fn new(store: Arc<dyn LockStore>) -> Self {
        Self { store }
    }

    /// Run `action` if the lock `name` can be taken.
    ///
    /// # Returns
    /// * `Ok(Some(value))` - The action ran to completion
    /// * `Ok(None)` - Another owner holds the lock; nothing ran
    /// * `Err(RunError)` - The lock store failed, the action failed, or
    ///   the action overran `ttl`
    ///
    /// The lock is released on every exit path, including a panic inside
    /// `action`, which is resumed after the release. A failed release is
    /// only logged since the entry expires on its own.
    pub async fn try_run<F, Fut, T, E>(
        &self,
        name: &str,
        ttl: Duration,
        action: F,
    ) -> Result<Option<T>, RunError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let owner = owner_token();

        let acquired = self
            .store
            .set_if_absent(name, &owner, ttl)
            .await
            .map_err(RunError::Lock)?;
        if !acquired {
            info!("Lock {} is held by another instance, skipping", name);
            return Ok(None);
        }
        debug!("Acquired lock {} as {}", name, owner);

        let outcome = AssertUnwindSafe(tokio::time::timeout(ttl, action()))
            .catch_unwind()
            .await;

        if let Err(e) = self.store.release(name, &owner).await {
            warn!("Failed to release lock {}, it expires in {:?}: {}", name, ttl, e);
        }

        match outcome {
            Err(panic) => std::panic::resume_unwind(panic),
            Ok(Err(_)) => Err(RunError::Deadline(ttl)),
            Ok(Ok(Err(e))) => Err(RunError::Action(e)),
            Ok(Ok(Ok(value))) => Ok(Some(value)),
        }
    }
}

/// Unique per acquisition, so a late release never frees someone else's lock
fn owner_token() -> String {
    format!(
        "{}-{}-{}",
        std::process::id(),
        chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default(),
        NEXT_OWNER.fetch_add(1, Ordering::Relaxed)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[derive(Debug, Error)]
    #[error("action failed")]
    struct ActionFailed;

    fn memory_lock() -> (Arc<MemoryLockStore>, ExclusiveRunLock) {
        let store = Arc::new(MemoryLockStore::new());
        (store.clone(), ExclusiveRunLock::new(store))
    }

    async fn run_timed(lock: &ExclusiveRunLock, ttl: Duration) -> (bool, Duration) {
        let started = Instant::now();
        let result = lock
            .try_run("cycle", ttl, || async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok::<_, ActionFailed>(())
            })
            .await
            .unwrap();
        (result.is_some(), started.elapsed())
    }

    #[tokio::test]
    async fn try_run_lets_exactly_one_of_two_concurrent_callers_run() {
        let (_, lock) = memory_lock();
        let ttl = Duration::from_secs(5);

        let (first, second) = tokio::join!(run_timed(&lock, ttl), run_timed(&lock, ttl));

        assert_eq!([first, second].iter().filter(|(ran, _)| *ran).count(), 1);

        let skipped = if first.0 { second } else { first };
        assert!(skipped.1 < Duration::from_millis(200));
    }

    #[tokio::test]
    async fn try_run_releases_lock_after_action() {
        let (store, lock) = memory_lock();

        let result = lock
            .try_run("cycle", Duration::from_secs(5), || async {
                Ok::<_, ActionFailed>(42)
            })
            .await
            .unwrap();

        assert_eq!(result, Some(42));
        assert!(
            store
                .set_if_absent("cycle", "next", Duration::from_secs(5))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn try_run_releases_lock_after_action_error() {
        let (store, lock) = memory_lock();

        let result = lock
            .try_run("cycle", Duration::from_secs(5), || async {
                Err::<(), _>(ActionFailed)
            })
            .await;

        assert!(matches!(result, Err(RunError::Action(ActionFailed))));
        assert!(
            store
                .set_if_absent("cycle", "next", Duration::from_secs(5))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn try_run_stops_action_at_ttl() {
        let (store, lock) = memory_lock();
        let ttl = Duration::from_millis(20);

        let result = lock
            .try_run("cycle", ttl, || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, ActionFailed>(())
            })
            .await;

        assert!(matches!(result, Err(RunError::Deadline(d)) if d == ttl));
        assert!(
            store
                .set_if_absent("cycle", "next", Duration::from_secs(5))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn try_run_releases_lock_when_action_panics() {
        let (store, lock) = memory_lock();

        let result = AssertUnwindSafe(lock.try_run("cycle", Duration::from_secs(5), || async {
            if true {
                panic!("boom");
            }
            Ok::<_, ActionFailed>(())
        }))
        .catch_unwind()
        .await;

        assert!(result.is_err());
        assert!(
            store
                .set_if_absent("cycle", "next", Duration::from_secs(5))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn try_run_skips_without_running_when_lock_is_taken() {
        let mut store = MockLockStore::new();
        store
            .expect_set_if_absent()
            .times(1)
            .returning(|_, _, _| Ok(false));
        store.expect_release().never();

        let lock = ExclusiveRunLock::new(Arc::new(store));
        let result = lock
            .try_run("cycle", Duration::from_secs(5), || async {
                if true {
                    panic!("must not run");
                }
                Ok::<_, ActionFailed>(())
            })
            .await
            .unwrap();

        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn try_run_ignores_release_failure() {
        let mut store = MockLockStore::new();
        store
            .expect_set_if_absent()
            .times(1)
            .returning(|_, _, _| Ok(true));
        store
            .expect_release()
            .times(1)
            .returning(|_, _| Err(LockError::LockPoisoned));

        let lock = ExclusiveRunLock::new(Arc::new(store));
        let result = lock
            .try_run("cycle", Duration::from_secs(5), || async {
                Ok::<_, ActionFailed>("done")
            })
            .await
            .unwrap();

        assert_eq!(result, Some("done"));
    }

    #[tokio::test]
    async fn try_run_surfaces_unreachable_lock_store() {
        let mut store = MockLockStore::new();
        store
            .expect_set_if_absent()
            .times(1)
            .returning(|_, _, _| Err(LockError::LockPoisoned));

        let lock = ExclusiveRunLock::new(Arc::new(store));
        let result = lock
            .try_run("cycle", Duration::from_secs(5), || async {
                Ok::<_, ActionFailed>(())
            })
            .await;

        assert!(matches!(
            result,
            Err(RunError::Lock(LockError::LockPoisoned))
        ));
    }

    #[test]
    fn owner_token_is_unique_per_call() {
        assert_ne!(owner_token(), owner_token());
    }
}

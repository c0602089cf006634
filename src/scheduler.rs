//! Periodic trigger of the notify cycle
//!
//! Fires once a day at a fixed local time. On unix, `SIGUSR1` fires a cycle
//! immediately. Every cycle runs under [`ExclusiveRunLock`], so a trigger
//! that fires while another instance is busy is dropped, not queued.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, Days, Local, NaiveTime, TimeDelta, TimeZone};
use tracing::{error, info};

use crate::config::NOTIFY_LOCK_NAME;
use crate::lock::{ExclusiveRunLock, RunError};
use crate::notify::{CycleError, CycleReport, Notifier};

/// The first occurrence of `at` strictly after `now`, in `now`'s time zone
pub fn next_run<Tz: TimeZone>(now: &DateTime<Tz>, at: NaiveTime) -> DateTime<Tz> {
    let tz = now.timezone();
    let today = now.date_naive();

    // A local time skipped by a DST change has no mapping, so look one
    // more day ahead
    (0..=2)
        .filter_map(|offset| today.checked_add_days(Days::new(offset)))
        .filter_map(|date| tz.from_local_datetime(&date.and_time(at)).earliest())
        .find(|candidate| candidate > now)
        .unwrap_or_else(|| now.clone() + TimeDelta::days(1))
}

pub struct Scheduler {
    notifier: Arc<Notifier>,
    lock: ExclusiveRunLock,
    at: NaiveTime,
    ttl: Duration,
}

impl Scheduler {
    pub fn new(
        notifier: Arc<Notifier>,
        lock: ExclusiveRunLock,
        at: NaiveTime,
        ttl: Duration,
    ) -> Self {
        Self {
            notifier,
            lock,
            at,
            ttl,
        }
    }

    /// Run one cycle now if no other instance is running one.
    /// `Ok(None)` means the cycle was skipped.
    pub async fn run_once(&self) -> Result<Option<CycleReport>, RunError<CycleError>> {
        let today = Local::now().weekday();
        self.lock
            .try_run(NOTIFY_LOCK_NAME, self.ttl, || self.notifier.run(today))
            .await
    }

    /// Trigger cycles until Ctrl-C
    pub async fn run(&self) -> std::io::Result<()> {
        let mut manual = ManualTrigger::new()?;

        loop {
            let now = Local::now();
            let next = next_run(&now, self.at);
            let wait = (next - now).to_std().unwrap_or_default();
            info!("Next notify cycle at {}", next.format("%Y-%m-%d %H:%M:%S %Z"));

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = manual.recv() => info!("Manual trigger received"),
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutting down scheduler");
                    return Ok(());
                }
            }

            self.trigger().await;
        }
    }

    async fn trigger(&self) {
        match self.run_once().await {
            Ok(Some(report)) => info!(
                "Cycle done: {} repositories, {} releases, {} users notified",
                report.repositories, report.releases, report.users_notified
            ),
            Ok(None) => info!("Cycle skipped: another instance holds the lock"),
            Err(e) => error!("Notify cycle failed: {}", e),
        }
    }
}

#[cfg(unix)]
struct ManualTrigger(tokio::signal::unix::Signal);

#[cfg(unix)]
impl ManualTrigger {
    fn new() -> std::io::Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};
        Ok(Self(signal(SignalKind::user_defined1())?))
    }

    async fn recv(&mut self) {
        if self.0.recv().await.is_none() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
struct ManualTrigger;

#[cfg(not(unix))]
impl ManualTrigger {
    fn new() -> std::io::Result<Self> {
        Ok(Self)
    }

    async fn recv(&mut self) {
        std::future::pending::<()>().await;
    }
}

//! One notify cycle: refresh every repository, diff, group and notify

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Weekday;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::DEFAULT_PAGE_SIZE;
use crate::model::{Frequency, Ketchup, Release, Repository, RepositoryKind};
use crate::notify::diff::ReleaseDiffEngine;
use crate::notify::grouper::group;
use crate::notify::sink::NotificationSink;
use crate::provider::Provider;
use crate::store::{RepositoryEntry, Store, StoreError};

/// Failures that abort the whole cycle
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("Store unavailable: {0}")]
    Store(#[from] StoreError),
}

/// What one cycle did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub repositories: usize,
    /// Repositories without patterns or without an enabled provider
    pub skipped: usize,
    /// Repositories whose row or registry could not be read
    pub failures: usize,
    pub releases: usize,
    pub users_notified: usize,
    pub sink_failures: usize,
}

pub struct Notifier {
    store: Arc<dyn Store>,
    providers: HashMap<RepositoryKind, Arc<dyn Provider>>,
    sink: Arc<dyn NotificationSink>,
    engine: ReleaseDiffEngine,
    page_size: usize,
    weekly_day: Weekday,
}

impl Notifier {
    pub fn new(
        store: Arc<dyn Store>,
        providers: HashMap<RepositoryKind, Arc<dyn Provider>>,
        sink: Arc<dyn NotificationSink>,
        engine: ReleaseDiffEngine,
    ) -> Self {
        Self {
            store,
            providers,
            sink,
            engine,
            page_size: DEFAULT_PAGE_SIZE,
            weekly_day: Weekday::Mon,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_weekly_day(mut self, weekly_day: Weekday) -> Self {
        self.weekly_day = weekly_day;
        self
    }

    /// Run a full cycle. `today` decides whether weekly subscriptions are due.
    ///
    /// Unreadable rows and registry failures are logged and counted; only
    /// an unavailable store aborts.
    pub async fn run(&self, today: Weekday) -> Result<CycleReport, CycleError> {
        info!("Starting notify cycle");
        let mut report = CycleReport::default();
        let mut releases = Vec::new();
        let mut after_id = 0;

        loop {
            let page = self.store.list_repositories(after_id, self.page_size)?;
            let Some(last) = page.last() else {
                break;
            };
            after_id = last.id();

            for entry in &page {
                report.repositories += 1;
                match entry {
                    RepositoryEntry::Valid(repository) => {
                        releases.extend(self.refresh(repository, &mut report).await?);
                    }
                    RepositoryEntry::Invalid { id, error } => {
                        error!("Skipping unreadable repository {}: {}", id, error);
                        report.failures += 1;
                    }
                }
            }

            if page.len() < self.page_size {
                break;
            }
        }

        releases.sort_by(|a, b| a.key().cmp(&b.key()));
        report.releases = releases.len();
        info!(
            "Refreshed {} repositories, found {} releases",
            report.repositories, report.releases
        );

        if !releases.is_empty() {
            self.notify(&releases, today, &mut report).await?;
        }

        info!("Notify cycle finished: {:?}", report);
        Ok(report)
    }

    /// Resolve, diff and persist one repository, returning its releases
    async fn refresh(
        &self,
        repository: &Repository,
        report: &mut CycleReport,
    ) -> Result<Vec<Release>, CycleError> {
        let name = repository.display_name();
        let patterns = repository.patterns();
        if patterns.is_empty() {
            debug!("Skipping {}: no tracked pattern", name);
            report.skipped += 1;
            return Ok(Vec::new());
        }

        let Some(provider) = self.providers.get(&repository.kind) else {
            warn!("Skipping {}: no provider enabled for {}", name, repository.kind);
            report.skipped += 1;
            return Ok(Vec::new());
        };

        let fresh = match provider
            .latest_versions(&repository.name, &repository.part, &patterns)
            .await
        {
            Ok(fresh) => fresh,
            Err(e) => {
                error!("Failed to refresh {}/{}: {}", repository.kind, name, e);
                report.failures += 1;
                return Ok(Vec::new());
            }
        };

        let outcome = self.engine.diff(repository, &fresh);
        self.store.update_versions(repository.id, &outcome.versions)?;

        for release in &outcome.releases {
            info!(
                "New release of {} for {}: {}",
                name, release.pattern, release.version
            );
        }
        Ok(outcome.releases)
    }

    async fn notify(
        &self,
        releases: &[Release],
        today: Weekday,
        report: &mut CycleReport,
    ) -> Result<(), CycleError> {
        let mut repository_ids: Vec<u64> = releases.iter().map(|r| r.repository.id).collect();
        repository_ids.dedup();

        let ketchups: Vec<Ketchup> = self
            .store
            .ketchups_for_repositories(&repository_ids)?
            .into_iter()
            .filter(|ketchup| self.is_due(ketchup.frequency, today))
            .collect();

        let acknowledge_on_send: HashSet<(u64, u64, &str)> = ketchups
            .iter()
            .filter(|ketchup| ketchup.update_when_notify)
            .map(|ketchup| (ketchup.user.id, ketchup.repository_id, ketchup.pattern.as_str()))
            .collect();

        let mut digests: Vec<_> = group(releases, &ketchups).into_iter().collect();
        digests.sort_by(|(a, _), (b, _)| a.cmp(b));

        for (user, digest) in digests {
            if let Err(e) = self.sink.send(&user, &digest).await {
                error!("Failed to notify {}: {}", user.email, e);
                report.sink_failures += 1;
                continue;
            }
            report.users_notified += 1;
            debug!("Notified {} of {} releases", user.email, digest.len());

            for release in &digest {
                let (repository_id, pattern) = release.key();
                if acknowledge_on_send.contains(&(user.id, repository_id, pattern)) {
                    self.store.update_ketchup_version(
                        user.id,
                        repository_id,
                        pattern,
                        &release.version.raw,
                    )?;
                }
            }
        }

        Ok(())
    }

    fn is_due(&self, frequency: Frequency, today: Weekday) -> bool {
        match frequency {
            Frequency::None => false,
            Frequency::Daily => true,
            Frequency::Weekly => today == self.weekly_day,
        }
    }
}

//! Reduction of a tag stream into the best version per pattern
//!
//! ```text
//!            ┌──────────┐
//!  tags ───▶ │ worker 1 │──┐
//!      │     └──────────┘  │   bounded    ┌──────┐
//!      │         ...       ├──────────▶ │ fold │──▶ best per pattern
//!      │     ┌──────────┐  │   versions   └──────┘
//!      └───▶ │ worker N │──┘
//!            └──────────┘
//! ```
//!
//! Workers only parse. The single fold task owns the result map, so it
//! needs no locking, and both queues are bounded so a long tag history
//! applies backpressure to the producer instead of piling up in memory.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{trace, warn};

use crate::version::error::ReduceError;
use crate::version::parser::{DEFAULT_SUFFIX_RANKING, SuffixRanking, Version};
use crate::version::pattern::Pattern;

/// The compiled patterns tracked for one repository
#[derive(Debug, Clone)]
pub struct PatternSet {
    patterns: Vec<Pattern>,
    ranking: SuffixRanking,
}

impl PatternSet {
    /// Compile every expression, dropping (and logging) the ones that fail
    pub fn compile<I, S>(expressions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::compile_with(expressions, DEFAULT_SUFFIX_RANKING)
    }

    pub fn compile_with<I, S>(expressions: I, ranking: SuffixRanking) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = expressions
            .into_iter()
            .filter_map(|expression| {
                Pattern::compile_with(expression.as_ref(), ranking)
                    .inspect_err(|e| warn!("Skipping pattern: {}", e))
                    .ok()
            })
            .collect();

        Self { patterns, ranking }
    }

    pub fn patterns(&self) -> &[Pattern] {
        &self.patterns
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// A complete map with the sentinel for every pattern
    pub fn seed(&self) -> HashMap<String, Version> {
        self.patterns
            .iter()
            .map(|pattern| (pattern.name().to_string(), Version::none()))
            .collect()
    }

    /// One fold step: record `version` wherever it beats the current best
    pub fn fold(&self, best: &mut HashMap<String, Version>, version: &Version) {
        for pattern in &self.patterns {
            if !pattern.check(version) {
                continue;
            }

            match best.get_mut(pattern.name()) {
                Some(current) if self.beats(version, current) => {
                    *current = version.clone();
                }
                Some(_) => {}
                None => {
                    best.insert(pattern.name().to_string(), version.clone());
                }
            }
        }
    }

    /// Greater wins; between equal versions spelled differently
    /// (`v1.2.0`, `1.2.0`) the smaller raw tag wins, so the result does not
    /// depend on arrival order
    fn beats(&self, version: &Version, current: &Version) -> bool {
        match version.compare(current, &self.ranking) {
            Ordering::Greater => true,
            Ordering::Equal => version.raw < current.raw,
            Ordering::Less => false,
        }
    }

    /// Sequential reduction, for tag lists already in memory
    pub fn reduce<I, S>(&self, tags: I) -> HashMap<String, Version>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut best = self.seed();
        for tag in tags {
            if let Ok(version) = Version::parse(tag.as_ref()) {
                self.fold(&mut best, &version);
            }
        }
        best
    }
}

/// Concurrent reducer fed one tag at a time, typically page by page
pub struct TagReducer {
    tags: mpsc::Sender<String>,
    workers: Vec<JoinHandle<()>>,
    fold: JoinHandle<HashMap<String, Version>>,
}

impl TagReducer {
    /// Spawn `workers` parser tasks and the single fold task
    pub fn spawn(patterns: Arc<PatternSet>, workers: usize) -> Self {
        let workers = workers.max(1);
        let (tags_tx, tags_rx) = mpsc::channel::<String>(workers);
        let (versions_tx, mut versions_rx) = mpsc::channel::<Version>(workers);
        let tags_rx = Arc::new(Mutex::new(tags_rx));

        let handles = (0..workers)
            .map(|_| {
                let tags_rx = Arc::clone(&tags_rx);
                let versions_tx = versions_tx.clone();
                tokio::spawn(async move {
                    loop {
                        let Some(tag) = tags_rx.lock().await.recv().await else {
                            break;
                        };

                        match Version::parse(&tag) {
                            Ok(version) => {
                                if versions_tx.send(version).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => trace!("Ignoring tag: {}", e),
                        }
                    }
                })
            })
            .collect();

        // Only the workers hold senders, so the fold ends once they all exit
        drop(versions_tx);

        let fold = tokio::spawn(async move {
            let mut best = patterns.seed();
            while let Some(version) = versions_rx.recv().await {
                patterns.fold(&mut best, &version);
            }
            best
        });

        Self {
            tags: tags_tx,
            workers: handles,
            fold,
        }
    }

    /// Queue a raw tag, waiting while the queue is full
    pub async fn push(&self, tag: String) -> Result<(), ReduceError> {
        self.tags.send(tag).await.map_err(|_| ReduceError::Closed)
    }

    pub async fn push_all<I>(&self, tags: I) -> Result<(), ReduceError>
    where
        I: IntoIterator<Item = String>,
    {
        for tag in tags {
            self.push(tag).await?;
        }
        Ok(())
    }

    /// Close the queue and wait for the best version per pattern
    pub async fn finish(self) -> Result<HashMap<String, Version>, ReduceError> {
        drop(self.tags);

        for worker in self.workers {
            worker.await?;
        }

        Ok(self.fold.await?)
    }
}

/// Reduce an in-memory tag list with a worker pool
pub async fn reduce_tags<I>(
    patterns: Arc<PatternSet>,
    workers: usize,
    tags: I,
) -> Result<HashMap<String, Version>, ReduceError>
where
    I: IntoIterator<Item = String>,
{
    let reducer = TagReducer::spawn(patterns, workers);
    reducer.push_all(tags).await?;
    reducer.finish().await
}

//! Release detection and notification
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐    ┌──────────┐    ┌──────────┐    ┌──────────┐
//! │ Provider │───▶│   Diff   │───▶│  Group   │───▶│   Sink   │
//! │ (best)   │    │(releases)│    │(per user)│    │ (digest) │
//! └──────────┘    └──────────┘    └──────────┘    └──────────┘
//! ```
//!
//! # Modules
//!
//! - [`diff`]: New releases from freshly resolved versions
//! - [`grouper`]: Merge-join of releases against subscriptions
//! - [`sink`]: Digest destinations
//! - [`cycle`]: The notify cycle tying everything together

pub mod cycle;
pub mod diff;
pub mod grouper;
pub mod sink;

pub use cycle::{CycleError, CycleReport, Notifier};
pub use diff::{DiffOutcome, ReleaseDiffEngine};
pub use grouper::group;
pub use sink::{LogSink, NotificationSink, OutboxSink, SinkError};

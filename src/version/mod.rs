//! Version vocabulary shared by every registry
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Parser    │────▶│   Pattern   │────▶│   Reducer   │
//! │ (tag → ver) │     │ (ranges)    │     │ (best/pat)  │
//! └─────────────┘     └─────────────┘     └─────────────┘
//! ```
//!
//! # Modules
//!
//! - [`parser`]: Tag parsing into [`Version`] and pre-release ranking
//! - [`pattern`]: Tracking expression compilation and checks
//! - [`reducer`]: Worker pool folding tag streams into best versions
//! - [`error`]: Error types for parsing, compiling and reducing

pub mod error;
pub mod parser;
pub mod pattern;
pub mod reducer;

pub use error::{ParseError, PatternError, ReduceError};
pub use parser::{DEFAULT_SUFFIX_RANKING, Suffix, SuffixRanking, Version};
pub use pattern::{Constraint, LATEST, Pattern, STABLE};
pub use reducer::{PatternSet, TagReducer, reduce_tags};

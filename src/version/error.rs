use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("No version found in {0:?}")]
    NoVersion(String),

    #[error("Version component out of range in {0:?}")]
    OutOfRange(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    #[error("Invalid boundary in pattern {pattern:?}: {source}")]
    InvalidBoundary {
        pattern: String,
        #[source]
        source: ParseError,
    },

    #[error("Upper bound of pattern {0:?} is out of range")]
    BoundaryOverflow(String),
}

#[derive(Debug, Error)]
pub enum ReduceError {
    #[error("Tag queue closed before all tags were pushed")]
    Closed,

    #[error("Reducer task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

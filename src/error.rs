use crate::partition::RowRange;
use thiserror::Error;

/// Errors surfaced by the bulk-loading pipeline.
///
/// Configuration problems fail fast before any network I/O and are never
/// retried. Pool and copy failures are retried internally and only escalate
/// here after the retry policy is exhausted.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("connection pool error: {0}")]
    Pool(#[source] sqlx::Error),

    #[error("copy failed for rows [{}, {}): {source}", .range.start, .range.end)]
    Copy {
        range: RowRange,
        #[source]
        source: sqlx::Error,
    },

    #[error("index maintenance error: {0}")]
    Index(#[source] sqlx::Error),

    #[error("worker process failed: {0}")]
    Worker(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("task join error: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

impl LoadError {
    /// True when the error is a fail-fast configuration problem.
    pub fn is_config(&self) -> bool {
        matches!(self, LoadError::Config(_))
    }
}

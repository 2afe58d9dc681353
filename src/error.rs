//! Error types for co-occurrence computation.
//!
//! Every failure is raised eagerly where it is detected and propagated to the
//! caller; nothing in the crate retries. The one condition callers are expected
//! to recover from is [`CoOccurrenceError::ZeroCompute`].

use thiserror::Error;

/// Result type alias for co-occurrence operations.
pub type Result<T> = std::result::Result<T, CoOccurrenceError>;

#[derive(Error, Debug)]
pub enum CoOccurrenceError {
    /// Invalid options, detected when the options are built.
    #[error("config error: {0}")]
    Config(String),

    /// The computation ended up with no co-occurrence records.
    #[error("Computation ended up in ZERO records. Check settings!")]
    ZeroCompute,

    /// More than one partition key given where exactly one is supported.
    #[error("partition key not unique: expected a single key, got {}", .0.join(", "))]
    PartitionKeyNotUnique(Vec<String>),

    /// API misuse: unsupported metric, missing marginals, unknown column.
    #[error("co-occurrence error: {0}")]
    Usage(String),

    /// Operation not allowed in the current state (closed vocabulary, grouped helper).
    #[error("state error: {0}")]
    State(String),

    #[error("document index error: {0}")]
    DocumentIndex(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

impl CoOccurrenceError {
    /// True for the "no results" outcome that workflows report instead of failing.
    #[inline]
    pub fn is_zero_compute(&self) -> bool {
        matches!(self, CoOccurrenceError::ZeroCompute)
    }

    pub(crate) fn usage(msg: impl Into<String>) -> Self {
        CoOccurrenceError::Usage(msg.into())
    }

    pub(crate) fn state(msg: impl Into<String>) -> Self {
        CoOccurrenceError::State(msg.into())
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        CoOccurrenceError::Config(msg.into())
    }
}

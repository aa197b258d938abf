//! Error types for colscan operations.

use thiserror::Error;

/// Result type alias using [`ScanError`].
pub type Result<T> = std::result::Result<T, ScanError>;

/// Error types for scanning, filtering and projecting columnar batches.
#[derive(Debug, Error)]
pub enum ScanError {
    /// The batch stream could not be opened, read or decoded.
    #[error("I/O error: {0}")]
    Io(String),

    /// Malformed batch or schema, out-of-range ordinal, or a source with no batches.
    #[error("Format error: {0}")]
    Format(String),

    /// Invalid predicate or projector expression.
    #[error("Compile error: {0}")]
    Compile(String),

    /// Cursor API used outside the state that permits it.
    #[error("State error: {0}")]
    State(String),

    /// The operation is not supported by the underlying source.
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Selection buffer request exceeded the configured memory budget.
    #[error("Memory limit exceeded: {used} bytes requested, limit is {limit} bytes")]
    MemoryLimitExceeded { used: usize, limit: usize },

    /// Arrow compute kernel failure while evaluating an expression.
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),
}

impl From<std::io::Error> for ScanError {
    fn from(err: std::io::Error) -> Self {
        ScanError::Io(err.to_string())
    }
}

impl ScanError {
    /// Returns true for failures of the underlying stream.
    #[must_use]
    pub fn is_io(&self) -> bool {
        matches!(self, ScanError::Io(_))
    }
}

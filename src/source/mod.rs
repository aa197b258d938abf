//! Batch sources: sequential readers producing one Arrow `RecordBatch` at a time.
//!
//! A source owns the batch it last loaded. Loading the next batch (or closing
//! the source) retires it, so any borrow taken from [`BatchSource::batch`] or
//! [`BatchSource::vector`] ends before the source can move on.

mod ipc;
mod memory;

use arrow::array::ArrayRef;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;

use crate::error::{Result, ScanError};

pub use ipc::{IpcFileSource, StreamSource};
pub use memory::MemorySource;

/// Sequential reader over a columnar batch stream.
pub trait BatchSource {
    /// Returns the schema every batch of this source conforms to.
    fn schema(&self) -> SchemaRef;

    /// Advances to the next batch.
    ///
    /// Returns `false` once the stream is exhausted.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the batch encoding is truncated or corrupt, and `State`
    /// if the source has been closed.
    fn load_next(&mut self) -> Result<bool>;

    /// Returns the currently loaded batch, if any.
    fn batch(&self) -> Option<&RecordBatch>;

    /// Returns the number of rows in the current batch (0 when none is loaded).
    fn row_count(&self) -> usize {
        self.batch().map_or(0, RecordBatch::num_rows)
    }

    /// Returns the column at `ordinal` of the current batch.
    ///
    /// # Errors
    ///
    /// Returns `State` if no batch is loaded and `Format` if the ordinal is
    /// out of range.
    fn vector(&self, ordinal: usize) -> Result<&ArrayRef> {
        let batch = self
            .batch()
            .ok_or_else(|| ScanError::State("no batch is loaded".into()))?;
        if ordinal >= batch.num_columns() {
            return Err(ScanError::Format(format!(
                "column ordinal {ordinal} out of range for batch with {} columns",
                batch.num_columns()
            )));
        }
        Ok(batch.column(ordinal))
    }

    /// Returns true if [`BatchSource::rewind`] is supported.
    fn is_rewindable(&self) -> bool {
        false
    }

    /// Repositions the source before its first batch.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedOperation` for forward-only sources, or `Io` if the
    /// underlying stream cannot be reopened.
    fn rewind(&mut self) -> Result<()> {
        Err(ScanError::UnsupportedOperation(
            "source cannot be rewound".into(),
        ))
    }

    /// Releases the underlying stream and the current batch. Idempotent.
    fn close(&mut self);
}

impl<S: BatchSource + ?Sized> BatchSource for Box<S> {
    fn schema(&self) -> SchemaRef {
        (**self).schema()
    }

    fn load_next(&mut self) -> Result<bool> {
        (**self).load_next()
    }

    fn batch(&self) -> Option<&RecordBatch> {
        (**self).batch()
    }

    fn is_rewindable(&self) -> bool {
        (**self).is_rewindable()
    }

    fn rewind(&mut self) -> Result<()> {
        (**self).rewind()
    }

    fn close(&mut self) {
        (**self).close();
    }
}

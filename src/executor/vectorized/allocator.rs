//! Reusable scratch buffer backing selection vectors.
//!
//! A cursor owns one `SelectionAllocator`. Each batch borrows the allocator's
//! single buffer for its selection vector and hands it back when the batch is
//! retired, so a scan of any length allocates roughly once and holds at most
//! one batch's worth of selection data.

use tracing::trace;

use crate::error::{Result, ScanError};

use super::batch::SelectionVector;

const INDEX_BYTES: usize = std::mem::size_of::<u32>();

/// Scoped arena lending out one selection buffer at a time.
#[derive(Debug)]
pub struct SelectionAllocator {
    /// The scratch buffer, `None` while lent out.
    scratch: Option<Vec<u32>>,
    /// Maximum bytes a single selection may reserve (0 = unlimited).
    memory_limit: usize,
    /// Number of times the buffer had to grow.
    grow_count: usize,
}

impl SelectionAllocator {
    /// Creates an allocator with room for `initial_rows` indices.
    #[must_use]
    pub fn new(initial_rows: usize, memory_limit: usize) -> Self {
        let initial_rows = if memory_limit > 0 {
            initial_rows.min(memory_limit / INDEX_BYTES)
        } else {
            initial_rows
        };
        SelectionAllocator {
            scratch: Some(Vec::with_capacity(initial_rows)),
            memory_limit,
            grow_count: 0,
        }
    }

    /// Lends out the scratch buffer, empty and sized for `row_count` indices.
    ///
    /// # Errors
    ///
    /// Returns `MemoryLimitExceeded` if `row_count` indices exceed the memory
    /// limit, `Format` if `row_count` cannot be addressed by a `u32` index,
    /// and `State` if the buffer is still held by an unreleased selection.
    pub fn acquire(&mut self, row_count: usize) -> Result<SelectionVector> {
        if u32::try_from(row_count).is_err() {
            return Err(ScanError::Format(format!(
                "batch of {row_count} rows exceeds the addressable selection range"
            )));
        }
        let requested = row_count * INDEX_BYTES;
        if self.memory_limit > 0 && requested > self.memory_limit {
            return Err(ScanError::MemoryLimitExceeded {
                used: requested,
                limit: self.memory_limit,
            });
        }

        let mut buffer = self.scratch.take().ok_or_else(|| {
            ScanError::State("selection buffer is still held by the previous batch".into())
        })?;
        buffer.clear();
        if buffer.capacity() < row_count {
            trace!(
                from = buffer.capacity(),
                to = row_count,
                "growing selection buffer"
            );
            buffer.reserve_exact(row_count);
            self.grow_count += 1;
        }
        Ok(SelectionVector::from_buffer(buffer))
    }

    /// Takes a selection's buffer back for reuse.
    pub fn release(&mut self, selection: SelectionVector) {
        if self.scratch.is_some() {
            trace!("releasing a selection into an allocator that already holds its buffer");
        }
        self.scratch = Some(selection.into_buffer());
    }

    /// Returns the number of buffers currently lent out (0 or 1).
    #[must_use]
    pub fn live(&self) -> usize {
        usize::from(self.scratch.is_none())
    }

    /// Returns the bytes reserved by the idle scratch buffer.
    #[must_use]
    pub fn capacity_bytes(&self) -> usize {
        self.scratch
            .as_ref()
            .map_or(0, |buffer| buffer.capacity() * INDEX_BYTES)
    }

    /// Returns the number of times the buffer had to grow.
    #[must_use]
    pub fn grow_count(&self) -> usize {
        self.grow_count
    }

    /// Returns the configured memory limit in bytes (0 = unlimited).
    #[must_use]
    pub fn memory_limit(&self) -> usize {
        self.memory_limit
    }
}

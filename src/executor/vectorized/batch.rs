//! Selection vectors and the projected, filtered view of one batch.

use arrow::array::{Array, ArrayRef};

use crate::error::{Result, ScanError};
use crate::types::Value;

/// Default batch size for vectorized execution (rows per batch).
pub const DEFAULT_BATCH_SIZE: usize = 2048;

/// Row positions within a batch that satisfy a predicate.
///
/// Indices are strictly increasing and each is below the row count of the
/// batch the vector was computed for. The backing buffer is lent out by a
/// [`SelectionAllocator`](super::SelectionAllocator) and must be handed back
/// when the batch is retired.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionVector {
    /// Indices of selected rows.
    indices: Vec<u32>,
}

impl SelectionVector {
    /// Creates a new selection vector with the given indices.
    #[must_use]
    pub fn new(indices: Vec<u32>) -> Self {
        SelectionVector { indices }
    }

    /// Returns the number of selected rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// Returns true if no rows are selected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Returns the row index at the given position.
    #[must_use]
    pub fn get(&self, pos: usize) -> Option<u32> {
        self.indices.get(pos).copied()
    }

    /// Returns the selected row indices.
    #[must_use]
    pub fn as_slice(&self) -> &[u32] {
        &self.indices
    }

    /// Returns an iterator over the selected row indices.
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.indices.iter().copied()
    }

    /// Checks the ordering invariant against a batch of `num_rows` rows.
    #[must_use]
    pub fn is_strictly_increasing_within(&self, num_rows: usize) -> bool {
        self.indices.windows(2).all(|w| w[0] < w[1])
            && self.indices.last().map_or(true, |&last| (last as usize) < num_rows)
    }

    /// Wraps a scratch buffer; its contents are discarded.
    pub(crate) fn from_buffer(mut buffer: Vec<u32>) -> Self {
        buffer.clear();
        SelectionVector { indices: buffer }
    }

    /// Appends a row index. Callers push in ascending order.
    pub(crate) fn push(&mut self, row: u32) {
        debug_assert!(self.indices.last().map_or(true, |&last| last < row));
        self.indices.push(row);
    }

    /// Returns the backing buffer for reuse.
    pub(crate) fn into_buffer(self) -> Vec<u32> {
        self.indices
    }

    pub(crate) fn capacity(&self) -> usize {
        self.indices.capacity()
    }
}

/// Projected columns of one loaded batch together with its selection.
///
/// The columns alias the source batch's buffers (reference-counted, never
/// copied) and are dropped when the batch is retired.
#[derive(Debug)]
pub struct SelectedBatch {
    /// Output columns: projected fields followed by computed columns.
    columns: Vec<ArrayRef>,
    /// Rows of the batch accepted by the predicate.
    selection: SelectionVector,
    /// Row count of the underlying batch.
    num_rows: usize,
}

impl SelectedBatch {
    /// Creates a selected batch.
    ///
    /// # Errors
    ///
    /// Returns `Format` if a column's length differs from `num_rows` or the
    /// selection violates its ordering invariant.
    pub fn try_new(
        columns: Vec<ArrayRef>,
        selection: SelectionVector,
        num_rows: usize,
    ) -> Result<Self> {
        Self::validate(&columns, &selection, num_rows)?;
        Ok(Self::new(columns, selection, num_rows))
    }

    /// Checks the parts of a selected batch without taking ownership, so a
    /// rejected selection can still be released to its allocator.
    ///
    /// # Errors
    ///
    /// Same as [`SelectedBatch::try_new`].
    pub fn validate(
        columns: &[ArrayRef],
        selection: &SelectionVector,
        num_rows: usize,
    ) -> Result<()> {
        if let Some(col) = columns.iter().find(|c| c.len() != num_rows) {
            return Err(ScanError::Format(format!(
                "column of length {} in batch of {num_rows} rows",
                col.len()
            )));
        }
        if !selection.is_strictly_increasing_within(num_rows) {
            return Err(ScanError::Format(
                "selection vector is not strictly increasing within the batch".into(),
            ));
        }
        Ok(())
    }

    /// Assembles already validated parts.
    pub(crate) fn new(columns: Vec<ArrayRef>, selection: SelectionVector, num_rows: usize) -> Self {
        SelectedBatch {
            columns,
            selection,
            num_rows,
        }
    }

    /// Returns the selection vector.
    #[must_use]
    pub fn selection(&self) -> &SelectionVector {
        &self.selection
    }

    /// Returns the number of selected rows.
    #[must_use]
    pub fn selected_rows(&self) -> usize {
        self.selection.len()
    }

    /// Returns the row count of the underlying batch.
    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    /// Returns the output columns.
    #[must_use]
    pub fn columns(&self) -> &[ArrayRef] {
        &self.columns
    }

    /// Reads the output values of the selected row at `pos`.
    ///
    /// # Errors
    ///
    /// Returns `State` if `pos` is past the selection, or `Format` if a value
    /// cannot be read.
    pub fn values_at(&self, pos: usize) -> Result<Vec<Value>> {
        let row = self.selection.get(pos).ok_or_else(|| {
            ScanError::State(format!(
                "selection position {pos} out of range ({} selected)",
                self.selection.len()
            ))
        })? as usize;
        self.columns
            .iter()
            .map(|col| Value::from_array(col.as_ref(), row))
            .collect()
    }

    /// Drops the column aliases and returns the selection for release.
    #[must_use]
    pub fn into_selection(self) -> SelectionVector {
        self.selection
    }
}

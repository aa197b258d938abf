//! Column projection by field ordinal.

use arrow::array::ArrayRef;
use arrow::datatypes::{FieldRef, Schema};
use arrow::record_batch::RecordBatch;

use crate::error::{Result, ScanError};

/// Selects an ordered list of columns out of each batch.
///
/// Ordinals may repeat and appear in any order. Projection never copies
/// column data: the returned references borrow from the batch.
#[derive(Debug, Clone)]
pub struct ColumnProjector {
    ordinals: Vec<usize>,
    fields: Vec<FieldRef>,
}

impl ColumnProjector {
    /// Creates a projector, validating every ordinal against `schema`.
    ///
    /// # Errors
    ///
    /// Returns `Format` if an ordinal is out of range.
    pub fn try_new(ordinals: Vec<usize>, schema: &Schema) -> Result<Self> {
        let fields = ordinals
            .iter()
            .map(|&ordinal| {
                schema.fields().get(ordinal).cloned().ok_or_else(|| {
                    ScanError::Format(format!(
                        "field ordinal {ordinal} out of range for schema with {} fields",
                        schema.fields().len()
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(ColumnProjector { ordinals, fields })
    }

    /// Returns the ordinals `[0, 1, .., n-1]`.
    #[must_use]
    pub fn identity(n: usize) -> Vec<usize> {
        (0..n).collect()
    }

    /// Returns the projected ordinals in output order.
    #[must_use]
    pub fn ordinals(&self) -> &[usize] {
        &self.ordinals
    }

    /// Returns the projected fields in output order.
    #[must_use]
    pub fn output_fields(&self) -> &[FieldRef] {
        &self.fields
    }

    /// Returns the projected columns of `batch` in output order.
    ///
    /// # Errors
    ///
    /// Returns `Format` if an ordinal is out of range for this batch.
    pub fn project<'a>(&self, batch: &'a RecordBatch) -> Result<Vec<&'a ArrayRef>> {
        let columns = batch.columns();
        self.ordinals
            .iter()
            .map(|&ordinal| {
                columns.get(ordinal).ok_or_else(|| {
                    ScanError::Format(format!(
                        "field ordinal {ordinal} out of range for batch with {} columns",
                        columns.len()
                    ))
                })
            })
            .collect()
    }
}

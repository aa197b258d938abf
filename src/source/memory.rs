//! In-memory batch source.

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use tracing::debug;

use crate::error::{Result, ScanError};
use crate::source::BatchSource;

/// Rewindable batch source over batches already held in memory.
#[derive(Debug, Clone)]
pub struct MemorySource {
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
    /// Index of the next batch to load.
    next: usize,
    current: Option<RecordBatch>,
    closed: bool,
}

impl MemorySource {
    /// Creates a source over `batches`, all of which must match `schema`.
    ///
    /// # Errors
    ///
    /// Returns `Format` if a batch's fields differ from `schema`.
    pub fn new(schema: SchemaRef, batches: Vec<RecordBatch>) -> Result<Self> {
        for (i, batch) in batches.iter().enumerate() {
            if batch.schema().fields() != schema.fields() {
                return Err(ScanError::Format(format!(
                    "batch {i} does not match the source schema"
                )));
            }
        }
        Ok(Self {
            schema,
            batches,
            next: 0,
            current: None,
            closed: false,
        })
    }

    /// Creates a source taking its schema from the first batch.
    ///
    /// # Errors
    ///
    /// Returns `Format` if `batches` is empty or the batches disagree on schema.
    pub fn from_batches(batches: Vec<RecordBatch>) -> Result<Self> {
        let schema = batches
            .first()
            .map(RecordBatch::schema)
            .ok_or_else(|| ScanError::Format("cannot infer schema from zero batches".into()))?;
        Self::new(schema, batches)
    }

    /// Returns the total number of batches.
    #[must_use]
    pub fn num_batches(&self) -> usize {
        self.batches.len()
    }
}

impl BatchSource for MemorySource {
    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn load_next(&mut self) -> Result<bool> {
        if self.closed {
            return Err(ScanError::State("memory source is closed".into()));
        }
        self.current = self.batches.get(self.next).cloned();
        if self.current.is_none() {
            return Ok(false);
        }
        self.next += 1;
        debug!(batch = self.next, rows = self.row_count(), "loaded in-memory batch");
        Ok(true)
    }

    fn batch(&self) -> Option<&RecordBatch> {
        self.current.as_ref()
    }

    fn is_rewindable(&self) -> bool {
        true
    }

    fn rewind(&mut self) -> Result<()> {
        self.next = 0;
        self.current = None;
        self.closed = false;
        Ok(())
    }

    fn close(&mut self) {
        self.current = None;
        self.closed = true;
    }
}

//! Row cursor: the pull-based scan/filter operator over a batch source.

use std::fmt;
use std::sync::Arc;

use arrow::array::ArrayRef;
use arrow::datatypes::{Schema, SchemaRef};
use tracing::{debug, warn};

use crate::error::{Result, ScanError};
use crate::executor::vectorized::{
    ColumnProjector, CompiledPredicate, CompiledProjection, SelectedBatch, SelectionAllocator,
};
use crate::executor::{Enumerator, ScanConfig};
use crate::source::BatchSource;
use crate::types::RowValue;

/// Lifecycle state of a [`RowCursor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    /// Opened; `move_next` has not returned `true` yet.
    Uninitialized,
    /// On a row; `current` is valid.
    Positioned,
    /// The source has no more matching rows.
    Exhausted,
    /// A read or evaluation error was returned by `move_next` or `reset`.
    /// Only `close` is meaningful from here.
    Failed,
    /// Closed; terminal.
    Closed,
}

impl fmt::Display for CursorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CursorState::Uninitialized => "uninitialized",
            CursorState::Positioned => "positioned",
            CursorState::Exhausted => "exhausted",
            CursorState::Failed => "failed",
            CursorState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Construction parameters of a [`RowCursor`].
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Pushed-down filter; the sole acceptance decision for rows.
    pub predicate: CompiledPredicate,
    /// Computed output columns, appended after `fields`.
    pub projection: Option<CompiledProjection>,
    /// Ordinals of the source columns to expose, in output order.
    pub fields: Vec<usize>,
    /// Buffer sizing and limits.
    pub config: ScanConfig,
}

impl ScanOptions {
    /// Creates options exposing `fields` of every row accepted by `predicate`.
    #[must_use]
    pub fn new(predicate: CompiledPredicate, fields: Vec<usize>) -> Self {
        Self {
            predicate,
            projection: None,
            fields,
            config: ScanConfig::default(),
        }
    }

    /// Adds computed output columns.
    #[must_use]
    pub fn with_projection(mut self, projection: CompiledProjection) -> Self {
        self.projection = Some(projection);
        self
    }

    /// Sets the scan configuration.
    #[must_use]
    pub fn with_config(mut self, config: ScanConfig) -> Self {
        self.config = config;
        self
    }
}

/// Lazy cursor exposing the filtered, projected rows of a batch source one
/// row at a time.
///
/// Each loaded batch is projected and filtered as a whole; the cursor then
/// walks the batch's selection vector. Batches without matching rows are
/// skipped. A cursor is driven from one thread at a time and owns its source
/// and selection buffer exclusively.
pub struct RowCursor<S: BatchSource> {
    source: S,
    predicate: CompiledPredicate,
    projection: Option<CompiledProjection>,
    projector: ColumnProjector,
    allocator: SelectionAllocator,
    output_schema: SchemaRef,
    /// The current batch's output columns and selection.
    active: Option<SelectedBatch>,
    /// Position within the active selection vector.
    position: Option<usize>,
    state: CursorState,
    batches_loaded: usize,
    rows_scanned: usize,
    rows_emitted: usize,
}

impl<S: BatchSource> RowCursor<S> {
    /// Opens a cursor and loads the first batch.
    ///
    /// Leading batches without matching rows are skipped. The cursor starts
    /// before its first row; call [`RowCursor::move_next`] to position it.
    ///
    /// # Errors
    ///
    /// Returns `Format` if a field ordinal is out of range or the source
    /// yields no batches at all, and any error raised while loading,
    /// projecting or filtering the first batch. No cursor is produced on
    /// error and the source is closed.
    pub fn open(source: S, options: ScanOptions) -> Result<Self> {
        let ScanOptions {
            predicate,
            projection,
            fields,
            config,
        } = options;

        let schema = source.schema();
        let projector = ColumnProjector::try_new(fields, &schema)?;

        let mut output_fields = projector.output_fields().to_vec();
        if let Some(projection) = &projection {
            output_fields.extend(projection.fields().iter().cloned());
        }
        let output_schema = Arc::new(Schema::new(output_fields));

        let mut cursor = RowCursor {
            source,
            predicate,
            projection,
            projector,
            allocator: SelectionAllocator::new(config.batch_size, config.memory_limit),
            output_schema,
            active: None,
            position: None,
            state: CursorState::Uninitialized,
            batches_loaded: 0,
            rows_scanned: 0,
            rows_emitted: 0,
        };
        cursor.initialize()?;

        debug!(
            fields = ?cursor.projector.ordinals(),
            predicate = ?cursor.predicate.expr().map(ToString::to_string),
            "opened row cursor"
        );
        Ok(cursor)
    }

    /// Returns the lifecycle state.
    #[must_use]
    pub fn state(&self) -> CursorState {
        self.state
    }

    /// Returns the schema of the values exposed by [`RowCursor::current`].
    #[must_use]
    pub fn output_schema(&self) -> &SchemaRef {
        &self.output_schema
    }

    /// Returns the number of batches loaded since open or the last reset.
    #[must_use]
    pub fn batches_loaded(&self) -> usize {
        self.batches_loaded
    }

    /// Returns the number of source rows filtered since open or the last reset.
    #[must_use]
    pub fn rows_scanned(&self) -> usize {
        self.rows_scanned
    }

    /// Returns the number of rows the cursor has been positioned on.
    #[must_use]
    pub fn rows_emitted(&self) -> usize {
        self.rows_emitted
    }

    /// Returns the selection allocator, for inspecting buffer usage.
    #[must_use]
    pub fn allocator(&self) -> &SelectionAllocator {
        &self.allocator
    }

    /// Advances to the next matching row.
    ///
    /// Returns `false` once every batch has been consumed; further calls keep
    /// returning `false`.
    ///
    /// # Errors
    ///
    /// Returns the source's `Io` error for truncated or corrupt input, and
    /// any projection or evaluation error; the cursor is then `Failed`.
    /// Returns `State` if the cursor is closed or has failed.
    pub fn move_next(&mut self) -> Result<bool> {
        match self.state {
            CursorState::Closed => return Err(ScanError::State("cursor is closed".into())),
            CursorState::Failed => {
                return Err(ScanError::State(
                    "cursor failed on an earlier call and must be closed".into(),
                ))
            }
            CursorState::Exhausted => return Ok(false),
            CursorState::Uninitialized | CursorState::Positioned => {}
        }

        loop {
            if let Some(active) = &self.active {
                let next = self.position.map_or(0, |pos| pos + 1);
                if next < active.selected_rows() {
                    self.position = Some(next);
                    self.state = CursorState::Positioned;
                    self.rows_emitted += 1;
                    return Ok(true);
                }
            }

            match self.load_batch() {
                Ok(true) => {}
                Ok(false) => {
                    self.state = CursorState::Exhausted;
                    debug!(
                        batches = self.batches_loaded,
                        rows_scanned = self.rows_scanned,
                        rows_emitted = self.rows_emitted,
                        "row cursor exhausted"
                    );
                    return Ok(false);
                }
                Err(e) => {
                    self.retire_batch();
                    self.state = CursorState::Failed;
                    return Err(e);
                }
            }
        }
    }

    /// Returns the values of the current row.
    ///
    /// A single output column yields [`RowValue::Scalar`]; otherwise the
    /// values come back as a [`RowValue::Tuple`] in output column order.
    ///
    /// # Errors
    ///
    /// Returns `State` unless the cursor is positioned on a row.
    pub fn current(&self) -> Result<RowValue> {
        if self.state != CursorState::Positioned {
            return Err(ScanError::State(format!(
                "current() requires a positioned cursor, cursor is {}",
                self.state
            )));
        }
        let (Some(active), Some(pos)) = (&self.active, self.position) else {
            return Err(ScanError::State("cursor has no current row".into()));
        };
        active.values_at(pos).map(RowValue::from_values)
    }

    /// Advances and returns the next row, or `None` when exhausted.
    ///
    /// # Errors
    ///
    /// Same as [`RowCursor::move_next`].
    pub fn next_row(&mut self) -> Result<Option<RowValue>> {
        if self.move_next()? {
            self.current().map(Some)
        } else {
            Ok(None)
        }
    }

    /// Returns an iterator draining the remaining rows.
    ///
    /// The iterator ends after the first error.
    pub fn rows(&mut self) -> Rows<'_, S> {
        Rows {
            cursor: self,
            done: false,
        }
    }

    /// Rewinds the source and restarts the scan as if freshly opened.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedOperation` for forward-only sources, leaving the
    /// cursor untouched; `State` if the cursor is closed; otherwise any error
    /// from reloading the first batch, after which the cursor is `Failed`.
    pub fn reset(&mut self) -> Result<()> {
        if self.state == CursorState::Closed {
            return Err(ScanError::State("cannot reset a closed cursor".into()));
        }
        if !self.source.is_rewindable() {
            return Err(ScanError::UnsupportedOperation(
                "reset() requires a rewindable batch source".into(),
            ));
        }

        let result = self.source.rewind().and_then(|()| {
            self.retire_batch();
            self.batches_loaded = 0;
            self.rows_scanned = 0;
            self.rows_emitted = 0;
            self.initialize()
        });
        if result.is_err() {
            self.retire_batch();
            self.state = CursorState::Failed;
        }
        result
    }

    /// Releases the selection buffer, the column aliases and the source.
    ///
    /// Idempotent and safe in any state, including after an error.
    pub fn close(&mut self) {
        if self.state == CursorState::Closed {
            return;
        }
        if self.state == CursorState::Failed {
            warn!("closing row cursor after a failed read");
        }
        self.retire_batch();
        self.source.close();
        self.state = CursorState::Closed;
        debug!(
            batches = self.batches_loaded,
            rows_emitted = self.rows_emitted,
            "closed row cursor"
        );
    }

    /// Loads the first batch and skips leading batches without matches.
    fn initialize(&mut self) -> Result<()> {
        self.state = CursorState::Uninitialized;
        if !self.load_batch()? {
            return Err(ScanError::Format(
                "batch source produced no batches".into(),
            ));
        }
        while self.active.as_ref().is_some_and(|b| b.selected_rows() == 0) {
            if !self.load_batch()? {
                self.state = CursorState::Exhausted;
                break;
            }
        }
        Ok(())
    }

    /// Retires the current batch and loads, projects and filters the next.
    ///
    /// Returns `false` when the source is exhausted.
    fn load_batch(&mut self) -> Result<bool> {
        self.retire_batch();
        if !self.source.load_next()? {
            return Ok(false);
        }
        let batch = self.source.batch().ok_or_else(|| {
            ScanError::Format("source reported a batch but none is loaded".into())
        })?;
        let num_rows = batch.num_rows();

        let mut columns: Vec<ArrayRef> = self
            .projector
            .project(batch)?
            .into_iter()
            .cloned()
            .collect();
        if let Some(projection) = &self.projection {
            columns.extend(projection.evaluate(batch)?);
        }

        let selection = self.predicate.evaluate(batch, &mut self.allocator)?;
        if let Err(e) = SelectedBatch::validate(&columns, &selection, num_rows) {
            self.allocator.release(selection);
            return Err(e);
        }

        self.batches_loaded += 1;
        self.rows_scanned += num_rows;
        if selection.is_empty() {
            debug!(
                batch = self.batches_loaded,
                rows = num_rows,
                "no rows matched, skipping batch"
            );
        }
        self.active = Some(SelectedBatch::new(columns, selection, num_rows));
        Ok(true)
    }

    /// Returns the current batch's selection buffer and drops its column aliases.
    fn retire_batch(&mut self) {
        if let Some(active) = self.active.take() {
            self.allocator.release(active.into_selection());
        }
        self.position = None;
    }
}

impl<S: BatchSource> Enumerator for RowCursor<S> {
    type Item = RowValue;

    fn current(&self) -> Result<RowValue> {
        RowCursor::current(self)
    }

    fn move_next(&mut self) -> Result<bool> {
        RowCursor::move_next(self)
    }

    fn reset(&mut self) -> Result<()> {
        RowCursor::reset(self)
    }

    fn close(&mut self) {
        RowCursor::close(self);
    }
}

impl<S: BatchSource> Drop for RowCursor<S> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<S: BatchSource> fmt::Debug for RowCursor<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowCursor")
            .field("state", &self.state)
            .field("fields", &self.projector.ordinals())
            .field("position", &self.position)
            .field("batches_loaded", &self.batches_loaded)
            .finish_non_exhaustive()
    }
}

/// Iterator over the remaining rows of a [`RowCursor`].
pub struct Rows<'a, S: BatchSource> {
    cursor: &'a mut RowCursor<S>,
    done: bool,
}

impl<S: BatchSource> Iterator for Rows<'_, S> {
    type Item = Result<RowValue>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.cursor.next_row() {
            Ok(Some(row)) => Some(Ok(row)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Array, DictionaryArray, Int32Array, Int64Array, StringArray};
    use arrow::datatypes::{DataType, Field, Int32Type};
    use arrow::record_batch::RecordBatch;

    use crate::source::MemorySource;
    use crate::types::Value;

    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("k", DataType::Utf8, false),
            Field::new("v", DataType::Int64, false),
        ]))
    }

    fn batch(keys: &[&str], values: &[i64]) -> RecordBatch {
        RecordBatch::try_new(
            schema(),
            vec![
                Arc::new(StringArray::from(keys.to_vec())) as ArrayRef,
                Arc::new(Int64Array::from(values.to_vec())) as ArrayRef,
            ],
        )
        .unwrap()
    }

    fn key_equals(key: &str) -> CompiledPredicate {
        CompiledPredicate::field_equals(0, Value::String(key.into()), &schema()).unwrap()
    }

    /// Memory source whose `fail_on`-th load fails once with `Io`.
    struct FlakySource {
        inner: MemorySource,
        loads: usize,
        fail_on: Option<usize>,
    }

    impl BatchSource for FlakySource {
        fn schema(&self) -> SchemaRef {
            self.inner.schema()
        }

        fn load_next(&mut self) -> Result<bool> {
            self.loads += 1;
            if self.fail_on == Some(self.loads) {
                self.fail_on = None;
                return Err(ScanError::Io("short read".into()));
            }
            self.inner.load_next()
        }

        fn batch(&self) -> Option<&RecordBatch> {
            self.inner.batch()
        }

        fn is_rewindable(&self) -> bool {
            self.inner.is_rewindable()
        }

        fn rewind(&mut self) -> Result<()> {
            self.inner.rewind()
        }

        fn close(&mut self) {
            self.inner.close();
        }
    }

    #[test]
    fn test_state_transitions() {
        let source = MemorySource::from_batches(vec![batch(&["A", "B"], &[1, 2])]).unwrap();
        let mut cursor = RowCursor::open(source, ScanOptions::new(key_equals("A"), vec![1])).unwrap();
        assert_eq!(cursor.state(), CursorState::Uninitialized);
        assert!(cursor.move_next().unwrap());
        assert_eq!(cursor.state(), CursorState::Positioned);
        assert_eq!(cursor.current().unwrap(), RowValue::Scalar(Value::Int64(1)));
        assert!(!cursor.move_next().unwrap());
        assert_eq!(cursor.state(), CursorState::Exhausted);
        assert!(!cursor.move_next().unwrap());
        cursor.close();
        assert_eq!(cursor.state(), CursorState::Closed);
    }

    #[test]
    fn test_buffer_released_between_batches() {
        let source = MemorySource::from_batches(vec![
            batch(&["A", "A"], &[1, 2]),
            batch(&["A"], &[3]),
        ])
        .unwrap();
        let mut cursor =
            RowCursor::open(source, ScanOptions::new(key_equals("A"), vec![0, 1])).unwrap();
        while cursor.move_next().unwrap() {
            assert_eq!(cursor.allocator().live(), 1);
        }
        assert_eq!(cursor.allocator().live(), 0);
        cursor.close();
        assert_eq!(cursor.allocator().live(), 0);
    }

    #[test]
    fn test_close_while_positioned_releases_buffer() {
        let source = MemorySource::from_batches(vec![batch(&["A", "A"], &[1, 2])]).unwrap();
        let mut cursor =
            RowCursor::open(source, ScanOptions::new(key_equals("A"), vec![1])).unwrap();
        assert!(cursor.move_next().unwrap());
        assert_eq!(cursor.state(), CursorState::Positioned);
        assert_eq!(cursor.allocator().live(), 1);

        cursor.close();
        assert_eq!(cursor.state(), CursorState::Closed);
        assert_eq!(cursor.allocator().live(), 0);
    }

    #[test]
    fn test_reset_recovers_failed_cursor() {
        let inner = MemorySource::from_batches(vec![
            batch(&["A", "B"], &[1, 2]),
            batch(&["A"], &[3]),
        ])
        .unwrap();
        let source = FlakySource {
            inner,
            loads: 0,
            fail_on: Some(2),
        };
        let mut cursor =
            RowCursor::open(source, ScanOptions::new(key_equals("A"), vec![1])).unwrap();
        assert!(cursor.move_next().unwrap());

        let err = cursor.move_next().unwrap_err();
        assert!(err.is_io());
        assert_eq!(cursor.state(), CursorState::Failed);
        assert_eq!(cursor.allocator().live(), 0);
        assert!(matches!(cursor.move_next(), Err(ScanError::State(_))));

        cursor.reset().unwrap();
        assert_eq!(cursor.state(), CursorState::Uninitialized);
        let values: Vec<RowValue> = cursor.rows().collect::<Result<_>>().unwrap();
        assert_eq!(
            values,
            vec![
                RowValue::Scalar(Value::Int64(1)),
                RowValue::Scalar(Value::Int64(3)),
            ]
        );
        assert_eq!(cursor.batches_loaded(), 2);
    }

    #[test]
    fn test_dictionary_column_scan() {
        let keys = Int32Array::from(vec![Some(0), Some(1), None, Some(0)]);
        let values = Arc::new(StringArray::from(vec!["A", "B"])) as ArrayRef;
        let dict = DictionaryArray::<Int32Type>::try_new(keys, values).unwrap();
        let schema = Arc::new(Schema::new(vec![
            Field::new("k", dict.data_type().clone(), true),
            Field::new("v", DataType::Int64, false),
        ]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(dict) as ArrayRef,
                Arc::new(Int64Array::from(vec![1, 2, 3, 4])) as ArrayRef,
            ],
        )
        .unwrap();

        let predicate =
            CompiledPredicate::field_equals(0, Value::String("A".into()), &schema).unwrap();
        let source = MemorySource::new(schema, vec![batch]).unwrap();
        let mut cursor = RowCursor::open(source, ScanOptions::new(predicate, vec![0, 1])).unwrap();
        let rows: Vec<RowValue> = cursor.rows().collect::<Result<_>>().unwrap();
        assert_eq!(
            rows,
            vec![
                RowValue::Tuple(vec![Value::String("A".into()), Value::Int64(1)]),
                RowValue::Tuple(vec![Value::String("A".into()), Value::Int64(4)]),
            ]
        );
    }

    #[test]
    fn test_null_literal_projection() {
        let projection = CompiledProjection::compile(
            vec![(
                "nothing".to_string(),
                crate::executor::vectorized::Expr::literal(Value::Null),
            )],
            &schema(),
        )
        .unwrap();
        let source = MemorySource::from_batches(vec![batch(&["A", "B"], &[1, 2])]).unwrap();
        let options = ScanOptions::new(key_equals("B"), vec![1]).with_projection(projection);
        let mut cursor = RowCursor::open(source, options).unwrap();
        assert!(cursor.move_next().unwrap());
        assert_eq!(
            cursor.current().unwrap(),
            RowValue::Tuple(vec![Value::Int64(2), Value::Null])
        );
        assert!(!cursor.move_next().unwrap());
    }

    #[test]
    fn test_all_batches_empty_after_first_is_exhausted_not_error() {
        let source = MemorySource::from_batches(vec![
            batch(&["B"], &[1]),
            batch(&["C"], &[2]),
        ])
        .unwrap();
        let mut cursor =
            RowCursor::open(source, ScanOptions::new(key_equals("A"), vec![0])).unwrap();
        assert_eq!(cursor.state(), CursorState::Exhausted);
        assert!(!cursor.move_next().unwrap());
        assert_eq!(cursor.rows_scanned(), 2);
    }

    #[test]
    fn test_evaluation_error_on_first_batch_prevents_open() {
        let wide = Arc::new(Schema::new(vec![
            Field::new("k", DataType::Utf8, false),
            Field::new("v", DataType::Int64, false),
            Field::new("w", DataType::Int64, false),
        ]));
        let predicate = CompiledPredicate::field_equals(2, Value::Int64(0), &wide).unwrap();
        let source = MemorySource::from_batches(vec![batch(&["A"], &[1])]).unwrap();
        let err = RowCursor::open(source, ScanOptions::new(predicate, vec![0])).unwrap_err();
        assert!(matches!(err, ScanError::Format(_)));
    }

    #[test]
    fn test_rows_iterator() {
        let source = MemorySource::from_batches(vec![
            batch(&["A", "B", "A"], &[1, 2, 3]),
            batch(&["A"], &[4]),
        ])
        .unwrap();
        let mut cursor =
            RowCursor::open(source, ScanOptions::new(key_equals("A"), vec![1])).unwrap();
        let values: Vec<RowValue> = cursor.rows().collect::<Result<_>>().unwrap();
        assert_eq!(
            values,
            vec![
                RowValue::Scalar(Value::Int64(1)),
                RowValue::Scalar(Value::Int64(3)),
                RowValue::Scalar(Value::Int64(4)),
            ]
        );
    }

    #[test]
    fn test_output_schema_includes_computed_columns() {
        let projection = CompiledProjection::compile(
            vec![(
                "double_v".to_string(),
                crate::executor::vectorized::Expr::column(1).arithmetic(
                    crate::executor::vectorized::ArithmeticOp::Mul,
                    crate::executor::vectorized::Expr::literal(Value::Int64(2)),
                ),
            )],
            &schema(),
        )
        .unwrap();
        let source = MemorySource::from_batches(vec![batch(&["A", "B"], &[5, 6])]).unwrap();
        let options = ScanOptions::new(CompiledPredicate::accept_all(), vec![0])
            .with_projection(projection);
        let mut cursor = RowCursor::open(source, options).unwrap();

        let names: Vec<_> = cursor
            .output_schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect();
        assert_eq!(names, vec!["k", "double_v"]);

        assert!(cursor.move_next().unwrap());
        assert_eq!(
            cursor.current().unwrap(),
            RowValue::Tuple(vec![Value::String("A".into()), Value::Int64(10)])
        );
    }
}

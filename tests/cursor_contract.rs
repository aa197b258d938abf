//! Contract tests for the row cursor.
//!
//! These tests verify the cursor contracts:
//! - Rows come out in batch order, then selection order
//! - Batches without matches are skipped transparently
//! - Read failures propagate instead of ending the scan
//! - Lifecycle misuse fails with a state error

use std::fs::File;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{ArrayRef, Int64Array, StringArray};
use arrow::datatypes::{DataType as ArrowDataType, Field, Schema, SchemaRef};
use arrow::ipc::writer::{FileWriter, StreamWriter};
use arrow::record_batch::RecordBatch;

use colscan::executor::vectorized::{
    ColumnProjector, CompiledPredicate, ComparisonOp, Expr, SelectionAllocator,
};
use colscan::executor::{CursorState, RowCursor, ScanConfig, ScanOptions};
use colscan::source::{BatchSource, IpcFileSource, MemorySource, StreamSource};
use colscan::types::{RowValue, Value};
use colscan::ScanError;

/// Creates the schema `(key: Utf8, amount: Int64)`.
fn create_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("key", ArrowDataType::Utf8, false),
        Field::new("amount", ArrowDataType::Int64, true),
    ]))
}

fn create_batch(keys: &[&str], amounts: &[i64]) -> RecordBatch {
    RecordBatch::try_new(
        create_schema(),
        vec![
            Arc::new(StringArray::from(keys.to_vec())) as ArrayRef,
            Arc::new(Int64Array::from(amounts.to_vec())) as ArrayRef,
        ],
    )
    .unwrap()
}

fn key_is(key: &str) -> CompiledPredicate {
    CompiledPredicate::compile(
        Expr::column(0).equals(Expr::literal(Value::String(key.into()))),
        &create_schema(),
    )
    .unwrap()
}

fn row(key: &str, amount: i64) -> RowValue {
    RowValue::Tuple(vec![Value::String(key.into()), Value::Int64(amount)])
}

fn drain<S: BatchSource>(cursor: &mut RowCursor<S>) -> Vec<RowValue> {
    let mut rows = Vec::new();
    while cursor.move_next().unwrap() {
        rows.push(cursor.current().unwrap());
    }
    rows
}

fn write_ipc_file(path: &Path, batches: &[RecordBatch]) {
    let file = File::create(path).unwrap();
    let mut writer = FileWriter::try_new(file, &create_schema()).unwrap();
    for batch in batches {
        writer.write(batch).unwrap();
    }
    writer.finish().unwrap();
}

fn ipc_stream_bytes(batches: &[RecordBatch]) -> Vec<u8> {
    let mut buf = Vec::new();
    {
        let mut writer = StreamWriter::try_new(&mut buf, &create_schema()).unwrap();
        for batch in batches {
            writer.write(batch).unwrap();
        }
        writer.finish().unwrap();
    }
    buf
}

// =============================================================================
// Scenarios
// =============================================================================

#[test]
fn test_single_batch_yields_matches_in_order() {
    let source =
        MemorySource::from_batches(vec![create_batch(&["A", "B", "A", "C", "A"], &[10, 11, 12, 13, 14])])
            .unwrap();
    let mut cursor = RowCursor::open(source, ScanOptions::new(key_is("A"), vec![0, 1])).unwrap();

    let mut seen = Vec::new();
    while cursor.move_next().unwrap() {
        seen.push(cursor.current().unwrap());
    }
    assert_eq!(seen, vec![row("A", 10), row("A", 12), row("A", 14)]);
    assert!(!cursor.move_next().unwrap());
}

#[test]
fn test_zero_batches_produces_no_cursor() {
    let source = MemorySource::new(create_schema(), Vec::new()).unwrap();
    let err = RowCursor::open(source, ScanOptions::new(key_is("A"), vec![0])).unwrap_err();
    assert!(matches!(err, ScanError::Format(_)));

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty.arrow");
    write_ipc_file(&path, &[]);
    let source = IpcFileSource::open(&path).unwrap();
    let err = RowCursor::open(source, ScanOptions::new(key_is("A"), vec![0])).unwrap_err();
    assert!(matches!(err, ScanError::Format(_) | ScanError::Io(_)));
}

#[test]
fn test_batch_without_matches_is_skipped() {
    let source = MemorySource::from_batches(vec![
        create_batch(&["B", "C"], &[1, 2]),
        create_batch(&["A", "A"], &[3, 4]),
    ])
    .unwrap();
    let mut cursor = RowCursor::open(source, ScanOptions::new(key_is("A"), vec![0, 1])).unwrap();

    assert!(cursor.move_next().unwrap());
    assert_eq!(cursor.current().unwrap(), row("A", 3));
    assert!(cursor.move_next().unwrap());
    assert_eq!(cursor.current().unwrap(), row("A", 4));
    assert!(!cursor.move_next().unwrap());
}

#[test]
fn test_closed_cursor_rejects_access() {
    let source = MemorySource::from_batches(vec![create_batch(&["A"], &[1])]).unwrap();
    let mut cursor = RowCursor::open(source, ScanOptions::new(key_is("A"), vec![0])).unwrap();
    assert!(cursor.move_next().unwrap());

    cursor.close();
    assert!(matches!(cursor.current(), Err(ScanError::State(_))));
    assert!(matches!(cursor.move_next(), Err(ScanError::State(_))));
    assert!(matches!(cursor.reset(), Err(ScanError::State(_))));
    cursor.close();
    assert_eq!(cursor.state(), CursorState::Closed);
}

// =============================================================================
// Lifecycle
// =============================================================================

#[test]
fn test_current_before_move_next_is_state_error() {
    let source = MemorySource::from_batches(vec![create_batch(&["A"], &[1])]).unwrap();
    let cursor = RowCursor::open(source, ScanOptions::new(key_is("A"), vec![0])).unwrap();
    assert!(matches!(cursor.current(), Err(ScanError::State(_))));
}

#[test]
fn test_current_after_exhaustion_is_state_error() {
    let source = MemorySource::from_batches(vec![create_batch(&["A"], &[1])]).unwrap();
    let mut cursor = RowCursor::open(source, ScanOptions::new(key_is("A"), vec![0])).unwrap();
    assert!(cursor.move_next().unwrap());
    assert!(!cursor.move_next().unwrap());
    assert!(matches!(cursor.current(), Err(ScanError::State(_))));
}

#[test]
fn test_single_field_yields_scalar() {
    let source = MemorySource::from_batches(vec![create_batch(&["A", "B"], &[7, 8])]).unwrap();
    let mut cursor = RowCursor::open(source, ScanOptions::new(key_is("B"), vec![1])).unwrap();
    assert!(cursor.move_next().unwrap());
    assert_eq!(cursor.current().unwrap(), RowValue::Scalar(Value::Int64(8)));
}

#[test]
fn test_out_of_range_ordinal_rejected_at_open() {
    let source = MemorySource::from_batches(vec![create_batch(&["A"], &[1])]).unwrap();
    let err = RowCursor::open(source, ScanOptions::new(key_is("A"), vec![0, 2])).unwrap_err();
    assert!(matches!(err, ScanError::Format(_)));
}

#[test]
fn test_reset_replays_memory_source() {
    let source = MemorySource::from_batches(vec![
        create_batch(&["A", "B"], &[1, 2]),
        create_batch(&["A"], &[3]),
    ])
    .unwrap();
    let mut cursor = RowCursor::open(source, ScanOptions::new(key_is("A"), vec![0, 1])).unwrap();
    let first = drain(&mut cursor);
    assert_eq!(cursor.state(), CursorState::Exhausted);

    cursor.reset().unwrap();
    assert_eq!(cursor.state(), CursorState::Uninitialized);
    assert_eq!(drain(&mut cursor), first);
    assert_eq!(cursor.batches_loaded(), 2);
    assert_eq!(cursor.rows_scanned(), 3);
    assert_eq!(cursor.rows_emitted(), 2);
}

#[test]
fn test_nulls_never_match() {
    let batch = RecordBatch::try_new(
        create_schema(),
        vec![
            Arc::new(StringArray::from(vec!["A", "A", "A"])) as ArrayRef,
            Arc::new(Int64Array::from(vec![Some(5), None, Some(50)])) as ArrayRef,
        ],
    )
    .unwrap();
    let predicate = CompiledPredicate::compile(
        Expr::column(1).compare(ComparisonOp::Gt, Expr::literal(Value::Int64(1))),
        &create_schema(),
    )
    .unwrap();
    let source = MemorySource::from_batches(vec![batch]).unwrap();
    let mut cursor = RowCursor::open(source, ScanOptions::new(predicate, vec![1])).unwrap();
    assert_eq!(
        drain(&mut cursor),
        vec![
            RowValue::Scalar(Value::Int64(5)),
            RowValue::Scalar(Value::Int64(50))
        ]
    );
}

#[test]
fn test_memory_limit_surfaces_from_open() {
    let source = MemorySource::from_batches(vec![create_batch(&["A"; 32], &[0; 32])]).unwrap();
    let options = ScanOptions::new(key_is("A"), vec![0])
        .with_config(ScanConfig::new().with_memory_limit(64));
    let err = RowCursor::open(source, options).unwrap_err();
    assert!(matches!(
        err,
        ScanError::MemoryLimitExceeded { used: 128, limit: 64 }
    ));
}

// =============================================================================
// Arrow IPC sources
// =============================================================================

#[test]
fn test_ipc_file_scan_and_reset() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("orders.arrow");
    write_ipc_file(
        &path,
        &[
            create_batch(&["A", "B", "A"], &[1, 2, 3]),
            create_batch(&["C"], &[4]),
            create_batch(&["A"], &[5]),
        ],
    );

    let source = IpcFileSource::open(&path).unwrap();
    let mut cursor = RowCursor::open(source, ScanOptions::new(key_is("A"), vec![1, 0])).unwrap();
    let expected = vec![
        RowValue::Tuple(vec![Value::Int64(1), Value::String("A".into())]),
        RowValue::Tuple(vec![Value::Int64(3), Value::String("A".into())]),
        RowValue::Tuple(vec![Value::Int64(5), Value::String("A".into())]),
    ];
    assert_eq!(drain(&mut cursor), expected);

    cursor.reset().unwrap();
    assert_eq!(drain(&mut cursor), expected);
}

#[test]
fn test_reset_on_stream_is_unsupported() {
    let bytes = ipc_stream_bytes(&[create_batch(&["A"], &[1])]);
    let source = StreamSource::ipc(Cursor::new(bytes)).unwrap();
    let mut cursor = RowCursor::open(source, ScanOptions::new(key_is("A"), vec![0])).unwrap();
    assert!(cursor.move_next().unwrap());

    assert!(matches!(
        cursor.reset(),
        Err(ScanError::UnsupportedOperation(_))
    ));
    // The cursor is untouched by the refused reset.
    assert_eq!(cursor.state(), CursorState::Positioned);
    assert_eq!(cursor.current().unwrap(), RowValue::Scalar(Value::String("A".into())));
}

#[test]
fn test_truncated_stream_is_io_error_not_end_of_scan() {
    let keys: Vec<&str> = vec!["A"; 64];
    let amounts: Vec<i64> = (0..64).collect();
    let mut bytes = ipc_stream_bytes(&[create_batch(&keys, &amounts), create_batch(&keys, &amounts)]);
    // Cut into the body of the second batch.
    bytes.truncate(bytes.len() - 200);

    let source = StreamSource::ipc(Cursor::new(bytes)).unwrap();
    let mut cursor = RowCursor::open(source, ScanOptions::new(key_is("A"), vec![1])).unwrap();
    for _ in 0..64 {
        assert!(cursor.move_next().unwrap());
    }
    let err = cursor.move_next().unwrap_err();
    assert!(err.is_io(), "expected Io, got {err:?}");
    assert_eq!(cursor.state(), CursorState::Failed);
    assert!(matches!(cursor.move_next(), Err(ScanError::State(_))));

    cursor.close();
    assert_eq!(cursor.state(), CursorState::Closed);
}

// =============================================================================
// Properties
// =============================================================================

mod properties {
    use super::*;
    use proptest::prelude::*;

    fn rows_strategy() -> impl Strategy<Value = Vec<(u8, i64)>> {
        proptest::collection::vec((0u8..3, -100i64..100), 1..120)
    }

    fn key_name(k: u8) -> &'static str {
        ["A", "B", "C"][k as usize]
    }

    fn chunked(rows: &[(u8, i64)], chunk: usize) -> Vec<RecordBatch> {
        rows.chunks(chunk)
            .map(|part| {
                let keys: Vec<&str> = part.iter().map(|(k, _)| key_name(*k)).collect();
                let amounts: Vec<i64> = part.iter().map(|(_, a)| *a).collect();
                create_batch(&keys, &amounts)
            })
            .collect()
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        /// Property: batch boundaries never change which rows come out, or their order.
        #[test]
        fn test_batch_boundaries_are_invisible(rows in rows_strategy(), chunk in 1usize..40) {
            let expected: Vec<RowValue> = rows
                .iter()
                .filter(|(_, a)| *a >= 0)
                .map(|(k, a)| row(key_name(*k), *a))
                .collect();

            let predicate = CompiledPredicate::compile(
                Expr::column(1).compare(ComparisonOp::Gte, Expr::literal(Value::Int64(0))),
                &create_schema(),
            ).unwrap();
            let source = MemorySource::from_batches(chunked(&rows, chunk)).unwrap();
            let mut cursor = RowCursor::open(source, ScanOptions::new(predicate, vec![0, 1])).unwrap();
            prop_assert_eq!(drain(&mut cursor), expected);
            prop_assert_eq!(cursor.allocator().live(), 0);
        }

        /// Property: values come out in the order the ordinals were requested.
        #[test]
        fn test_values_follow_ordinal_order(rows in rows_strategy(), ordinals in proptest::collection::vec(0usize..2, 1..5)) {
            let source = MemorySource::from_batches(chunked(&rows, 16)).unwrap();
            let mut cursor = RowCursor::open(
                source,
                ScanOptions::new(CompiledPredicate::accept_all(), ordinals.clone()),
            ).unwrap();

            for (k, a) in &rows {
                prop_assert!(cursor.move_next().unwrap());
                let raw = [Value::String(key_name(*k).into()), Value::Int64(*a)];
                let expected: Vec<Value> = ordinals.iter().map(|&o| raw[o].clone()).collect();
                prop_assert_eq!(cursor.current().unwrap().into_values(), expected);
            }
            prop_assert!(!cursor.move_next().unwrap());
        }

        /// Property: every selection is strictly increasing and within its batch.
        #[test]
        fn test_selection_is_monotonic(rows in rows_strategy(), key in 0u8..3) {
            let batch = chunked(&rows, rows.len()).remove(0);
            let mut allocator = SelectionAllocator::new(8, 0);
            let selection = key_is(key_name(key)).evaluate(&batch, &mut allocator).unwrap();
            prop_assert!(selection.is_strictly_increasing_within(batch.num_rows()));

            let expected: Vec<u32> = rows
                .iter()
                .enumerate()
                .filter(|(_, (k, _))| *k == key)
                .map(|(i, _)| i as u32)
                .collect();
            prop_assert_eq!(selection.as_slice(), expected.as_slice());
            allocator.release(selection);
        }

        /// Property: projecting every column reads the raw batch values back.
        #[test]
        fn test_identity_projection_round_trips(rows in rows_strategy()) {
            let batch = chunked(&rows, rows.len()).remove(0);
            let projector = ColumnProjector::try_new(
                ColumnProjector::identity(batch.num_columns()),
                &batch.schema(),
            ).unwrap();
            let columns = projector.project(&batch).unwrap();
            for (i, column) in columns.iter().enumerate() {
                prop_assert!(Arc::ptr_eq(column, batch.column(i)));
            }
        }
    }
}

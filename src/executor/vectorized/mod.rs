//! Vectorized execution module.
//!
//! This module provides the batch-oriented primitives the row cursor is built
//! from: column projection, predicate compilation and evaluation over Arrow
//! arrays, and the selection vectors that record which rows passed.

pub mod allocator;
pub mod batch;
pub mod evaluator;
pub mod predicate;
pub mod projector;

pub use allocator::SelectionAllocator;
pub use batch::{SelectedBatch, SelectionVector, DEFAULT_BATCH_SIZE};
pub use evaluator::VectorizedEvaluator;
pub use predicate::{
    ArithmeticOp, CompiledPredicate, CompiledProjection, ComparisonOp, Expr, LogicalOp,
};
pub use projector::ColumnProjector;

//! Vectorized expression evaluator.

use std::sync::Arc;

use arrow::array::{Array, ArrayRef, BooleanArray, Datum, Scalar, UInt32Array};
use arrow::compute::kernels::boolean::{and_kleene, not, or_kleene};
use arrow::compute::kernels::cmp::{eq, gt, gt_eq, lt, lt_eq, neq};
use arrow::compute::kernels::numeric::{add, div, mul, rem, sub};
use arrow::compute::{cast, is_not_null, is_null, prep_null_mask_filter, take};
use arrow::datatypes::DataType as ArrowDataType;
use arrow::record_batch::RecordBatch;

use crate::error::{Result, ScanError};

use super::batch::SelectionVector;
use super::predicate::{ArithmeticOp, ComparisonOp, LogicalOp};

/// Type-checked expression tree ready for evaluation.
///
/// Literals are pre-built as single-element arrays of the type of the
/// operand they are compared or combined with.
#[derive(Debug, Clone)]
pub(crate) enum CompiledExpr {
    Column {
        ordinal: usize,
    },
    Literal {
        value: Scalar<ArrayRef>,
    },
    Comparison {
        left: Box<CompiledExpr>,
        op: ComparisonOp,
        right: Box<CompiledExpr>,
    },
    Arithmetic {
        left: Box<CompiledExpr>,
        op: ArithmeticOp,
        right: Box<CompiledExpr>,
    },
    Logical {
        op: LogicalOp,
        operands: Vec<CompiledExpr>,
    },
    IsNull {
        operand: Box<CompiledExpr>,
        negated: bool,
    },
    /// Widens an operand so it can meet a literal without losing the literal's value.
    Cast {
        operand: Box<CompiledExpr>,
        to: ArrowDataType,
    },
}

/// Result of evaluating an expression over a batch.
pub(crate) enum Evaluated {
    /// One value per row.
    Array(ArrayRef),
    /// A single value standing for every row.
    Scalar(Scalar<ArrayRef>),
}

impl Evaluated {
    fn is_scalar(&self) -> bool {
        matches!(self, Evaluated::Scalar(_))
    }

    fn datum(&self) -> &dyn Datum {
        match self {
            Evaluated::Array(array) => array,
            Evaluated::Scalar(scalar) => scalar,
        }
    }

    /// Expands to an array of `len` rows.
    pub(crate) fn into_array(self, len: usize) -> Result<ArrayRef> {
        match self {
            Evaluated::Array(array) => Ok(array),
            Evaluated::Scalar(scalar) => {
                let (value, _) = scalar.get();
                let indices = UInt32Array::from(vec![0_u32; len]);
                Ok(take(value, &indices, None)?)
            }
        }
    }

    /// Wraps a kernel result, keeping scalar-ness when both inputs were scalars.
    fn from_kernel(result: ArrayRef, scalar_inputs: bool) -> Self {
        if scalar_inputs {
            Evaluated::Scalar(Scalar::new(result))
        } else {
            Evaluated::Array(result)
        }
    }
}

/// Vectorized expression evaluator.
///
/// Evaluates compiled expressions over whole Arrow batches using the Arrow
/// compute kernels.
pub struct VectorizedEvaluator;

impl VectorizedEvaluator {
    /// Evaluates a compiled expression against a batch.
    pub(crate) fn evaluate(expr: &CompiledExpr, batch: &RecordBatch) -> Result<Evaluated> {
        match expr {
            CompiledExpr::Column { ordinal } => batch
                .columns()
                .get(*ordinal)
                .cloned()
                .map(Evaluated::Array)
                .ok_or_else(|| {
                    ScanError::Format(format!(
                        "column ordinal {ordinal} out of range for batch with {} columns",
                        batch.num_columns()
                    ))
                }),
            CompiledExpr::Literal { value } => Ok(Evaluated::Scalar(value.clone())),
            CompiledExpr::Comparison { left, op, right } => {
                let left = Self::evaluate(left, batch)?;
                let right = Self::evaluate(right, batch)?;
                let result = Self::compare(&left, *op, &right)?;
                Ok(Evaluated::from_kernel(
                    Arc::new(result),
                    left.is_scalar() && right.is_scalar(),
                ))
            }
            CompiledExpr::Arithmetic { left, op, right } => {
                let left = Self::evaluate(left, batch)?;
                let right = Self::evaluate(right, batch)?;
                let result = Self::arithmetic(&left, *op, &right)?;
                Ok(Evaluated::from_kernel(
                    result,
                    left.is_scalar() && right.is_scalar(),
                ))
            }
            CompiledExpr::Logical { op, operands } => {
                Self::evaluate_logical(*op, operands, batch).map(|r| Evaluated::Array(Arc::new(r)))
            }
            CompiledExpr::IsNull { operand, negated } => {
                let arr = Self::evaluate(operand, batch)?.into_array(batch.num_rows())?;
                let result = if *negated {
                    is_not_null(arr.as_ref())?
                } else {
                    is_null(arr.as_ref())?
                };
                Ok(Evaluated::Array(Arc::new(result)))
            }
            CompiledExpr::Cast { operand, to } => match Self::evaluate(operand, batch)? {
                Evaluated::Array(array) => Ok(Evaluated::Array(cast(array.as_ref(), to)?)),
                Evaluated::Scalar(scalar) => {
                    let (value, _) = scalar.get();
                    Ok(Evaluated::Scalar(Scalar::new(cast(value, to)?)))
                }
            },
        }
    }

    /// Evaluates a boolean expression to one value per row.
    pub(crate) fn evaluate_boolean(
        expr: &CompiledExpr,
        batch: &RecordBatch,
    ) -> Result<BooleanArray> {
        let arr = Self::evaluate(expr, batch)?.into_array(batch.num_rows())?;
        arr.as_any()
            .downcast_ref::<BooleanArray>()
            .cloned()
            .ok_or_else(|| {
                ScanError::Format(format!(
                    "predicate produced {} instead of Boolean",
                    arr.data_type()
                ))
            })
    }

    /// Appends the positions of `true` slots in `mask` to `selection`.
    ///
    /// Null slots are treated as not selected.
    pub(crate) fn select(mask: &BooleanArray, selection: &mut SelectionVector) {
        let prepared;
        let mask = if mask.null_count() > 0 {
            prepared = prep_null_mask_filter(mask);
            &prepared
        } else {
            mask
        };
        for row in mask.values().set_indices() {
            selection.push(row as u32);
        }
    }

    /// Compares two operands using the given operator.
    fn compare(left: &Evaluated, op: ComparisonOp, right: &Evaluated) -> Result<BooleanArray> {
        let (l, r) = (left.datum(), right.datum());
        let result = match op {
            ComparisonOp::Eq => eq(l, r)?,
            ComparisonOp::Neq => neq(l, r)?,
            ComparisonOp::Lt => lt(l, r)?,
            ComparisonOp::Lte => lt_eq(l, r)?,
            ComparisonOp::Gt => gt(l, r)?,
            ComparisonOp::Gte => gt_eq(l, r)?,
        };
        Ok(result)
    }

    /// Performs arithmetic on two operands.
    fn arithmetic(left: &Evaluated, op: ArithmeticOp, right: &Evaluated) -> Result<ArrayRef> {
        let (l, r) = (left.datum(), right.datum());
        let result = match op {
            ArithmeticOp::Add => add(l, r)?,
            ArithmeticOp::Sub => sub(l, r)?,
            ArithmeticOp::Mul => mul(l, r)?,
            ArithmeticOp::Div => div(l, r)?,
            ArithmeticOp::Mod => rem(l, r)?,
        };
        Ok(result)
    }

    /// Evaluates a logical operation with SQL three-valued semantics.
    fn evaluate_logical(
        op: LogicalOp,
        operands: &[CompiledExpr],
        batch: &RecordBatch,
    ) -> Result<BooleanArray> {
        match op {
            LogicalOp::And | LogicalOp::Or => {
                let mut result: Option<BooleanArray> = None;
                for operand in operands {
                    let arr = Self::evaluate_boolean(operand, batch)?;
                    result = Some(match result {
                        Some(prev) if op == LogicalOp::And => and_kleene(&prev, &arr)?,
                        Some(prev) => or_kleene(&prev, &arr)?,
                        None => arr,
                    });
                }
                Ok(result.unwrap_or_else(|| {
                    BooleanArray::from(vec![op == LogicalOp::And; batch.num_rows()])
                }))
            }
            LogicalOp::Not => {
                let first = operands.first().ok_or_else(|| {
                    ScanError::Format("NOT requires an operand".to_string())
                })?;
                let arr = Self::evaluate_boolean(first, batch)?;
                Ok(not(&arr)?)
            }
        }
    }
}

//! Filter and projection expressions, and their compilation against a schema.
//!
//! Expressions address columns by ordinal. Compilation type-checks the tree
//! once, coerces literals to the type of the operand they meet, and yields a
//! reusable [`CompiledPredicate`] or [`CompiledProjection`] that is evaluated
//! batch after batch without further checks.

use std::fmt;
use std::sync::Arc;

use arrow::array::{new_null_array, Array, ArrayRef, Scalar};
use arrow::datatypes::{DataType as ArrowDataType, Field, FieldRef, Schema};
use arrow::record_batch::RecordBatch;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, ScanError};
use crate::types::Value;

use super::allocator::SelectionAllocator;
use super::batch::SelectionVector;
use super::evaluator::{CompiledExpr, VectorizedEvaluator};

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComparisonOp {
    /// Equal (=).
    Eq,
    /// Not equal (<>).
    Neq,
    /// Less than (<).
    Lt,
    /// Less than or equal (<=).
    Lte,
    /// Greater than (>).
    Gt,
    /// Greater than or equal (>=).
    Gte,
}

impl ComparisonOp {
    /// Returns the SQL symbol for this operator.
    #[must_use]
    pub fn symbol(&self) -> &'static str {
        match self {
            ComparisonOp::Eq => "=",
            ComparisonOp::Neq => "<>",
            ComparisonOp::Lt => "<",
            ComparisonOp::Lte => "<=",
            ComparisonOp::Gt => ">",
            ComparisonOp::Gte => ">=",
        }
    }
}

/// Arithmetic operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArithmeticOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl ArithmeticOp {
    /// Returns the SQL symbol for this operator.
    #[must_use]
    pub fn symbol(&self) -> &'static str {
        match self {
            ArithmeticOp::Add => "+",
            ArithmeticOp::Sub => "-",
            ArithmeticOp::Mul => "*",
            ArithmeticOp::Div => "/",
            ArithmeticOp::Mod => "%",
        }
    }
}

/// Logical operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogicalOp {
    And,
    Or,
    Not,
}

/// Uncompiled expression over the columns of a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// Column at the given ordinal of the source schema.
    Column(usize),
    /// Constant value.
    Literal(Value),
    /// Binary comparison.
    Comparison {
        left: Box<Expr>,
        op: ComparisonOp,
        right: Box<Expr>,
    },
    /// Numeric arithmetic.
    Arithmetic {
        left: Box<Expr>,
        op: ArithmeticOp,
        right: Box<Expr>,
    },
    /// Logical AND/OR/NOT.
    Logical { op: LogicalOp, operands: Vec<Expr> },
    /// IS NULL / IS NOT NULL.
    IsNull { operand: Box<Expr>, negated: bool },
}

impl Expr {
    /// Creates a column reference.
    #[must_use]
    pub fn column(ordinal: usize) -> Self {
        Expr::Column(ordinal)
    }

    /// Creates a literal.
    #[must_use]
    pub fn literal(value: Value) -> Self {
        Expr::Literal(value)
    }

    /// Creates a comparison `self op right`.
    #[must_use]
    pub fn compare(self, op: ComparisonOp, right: Expr) -> Self {
        Expr::Comparison {
            left: Box::new(self),
            op,
            right: Box::new(right),
        }
    }

    /// Creates `self = right`.
    #[must_use]
    pub fn equals(self, right: Expr) -> Self {
        self.compare(ComparisonOp::Eq, right)
    }

    /// Creates arithmetic `self op right`.
    #[must_use]
    pub fn arithmetic(self, op: ArithmeticOp, right: Expr) -> Self {
        Expr::Arithmetic {
            left: Box::new(self),
            op,
            right: Box::new(right),
        }
    }

    /// Creates `self AND right`.
    #[must_use]
    pub fn and(self, right: Expr) -> Self {
        Expr::Logical {
            op: LogicalOp::And,
            operands: vec![self, right],
        }
    }

    /// Creates `self OR right`.
    #[must_use]
    pub fn or(self, right: Expr) -> Self {
        Expr::Logical {
            op: LogicalOp::Or,
            operands: vec![self, right],
        }
    }

    /// Creates `NOT self`.
    #[must_use]
    pub fn negate(self) -> Self {
        Expr::Logical {
            op: LogicalOp::Not,
            operands: vec![self],
        }
    }

    /// Creates `self IS NULL`, or `IS NOT NULL` when `negated`.
    #[must_use]
    pub fn is_null(self, negated: bool) -> Self {
        Expr::IsNull {
            operand: Box::new(self),
            negated,
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Column(ordinal) => write!(f, "${ordinal}"),
            Expr::Literal(value) => write!(f, "{value}"),
            Expr::Comparison { left, op, right } => {
                write!(f, "({left} {} {right})", op.symbol())
            }
            Expr::Arithmetic { left, op, right } => {
                write!(f, "({left} {} {right})", op.symbol())
            }
            Expr::Logical {
                op: LogicalOp::Not,
                operands,
            } => match operands.first() {
                Some(operand) => write!(f, "NOT {operand}"),
                None => f.write_str("NOT"),
            },
            Expr::Logical { op, operands } => {
                let sep = if *op == LogicalOp::And { " AND " } else { " OR " };
                f.write_str("(")?;
                for (i, operand) in operands.iter().enumerate() {
                    if i > 0 {
                        f.write_str(sep)?;
                    }
                    write!(f, "{operand}")?;
                }
                f.write_str(")")
            }
            Expr::IsNull { operand, negated } => {
                let not = if *negated { " NOT" } else { "" };
                write!(f, "{operand} IS{not} NULL")
            }
        }
    }
}

/// Compiles expressions against one schema.
struct Compiler<'a> {
    schema: &'a Schema,
}

impl Compiler<'_> {
    fn compile(&self, expr: &Expr) -> Result<(CompiledExpr, ArrowDataType)> {
        match expr {
            Expr::Column(ordinal) => {
                let field = self.schema.fields().get(*ordinal).ok_or_else(|| {
                    ScanError::Compile(format!(
                        "column ordinal {ordinal} out of range for schema with {} fields",
                        self.schema.fields().len()
                    ))
                })?;
                Ok((
                    CompiledExpr::Column { ordinal: *ordinal },
                    field.data_type().clone(),
                ))
            }
            Expr::Literal(value) => {
                let array = if value.is_null() {
                    new_null_array(&ArrowDataType::Null, 1)
                } else {
                    value.to_array(1)
                };
                let data_type = array.data_type().clone();
                Ok((
                    CompiledExpr::Literal {
                        value: Scalar::new(array),
                    },
                    data_type,
                ))
            }
            Expr::Comparison { left, op, right } => {
                let (left, right, operand_type) = self.compile_operands(left, right)?;
                if !is_comparable(&operand_type) {
                    return Err(ScanError::Compile(format!(
                        "values of type {operand_type} cannot be compared"
                    )));
                }
                Ok((
                    CompiledExpr::Comparison {
                        left: Box::new(left),
                        op: *op,
                        right: Box::new(right),
                    },
                    ArrowDataType::Boolean,
                ))
            }
            Expr::Arithmetic { left, op, right } => {
                let (left, right, operand_type) = self.compile_operands(left, right)?;
                if !operand_type.is_numeric() {
                    return Err(ScanError::Compile(format!(
                        "arithmetic {} is not defined for {operand_type}",
                        op.symbol()
                    )));
                }
                Ok((
                    CompiledExpr::Arithmetic {
                        left: Box::new(left),
                        op: *op,
                        right: Box::new(right),
                    },
                    operand_type,
                ))
            }
            Expr::Logical { op, operands } => {
                let arity_ok = match op {
                    LogicalOp::Not => operands.len() == 1,
                    LogicalOp::And | LogicalOp::Or => !operands.is_empty(),
                };
                if !arity_ok {
                    return Err(ScanError::Compile(format!(
                        "{op:?} with {} operands",
                        operands.len()
                    )));
                }
                let operands = operands
                    .iter()
                    .map(|operand| self.compile_boolean(operand))
                    .collect::<Result<Vec<_>>>()?;
                Ok((
                    CompiledExpr::Logical { op: *op, operands },
                    ArrowDataType::Boolean,
                ))
            }
            Expr::IsNull { operand, negated } => {
                let (operand, _) = self.compile(operand)?;
                Ok((
                    CompiledExpr::IsNull {
                        operand: Box::new(operand),
                        negated: *negated,
                    },
                    ArrowDataType::Boolean,
                ))
            }
        }
    }

    /// Compiles an expression that must produce booleans.
    fn compile_boolean(&self, expr: &Expr) -> Result<CompiledExpr> {
        let (compiled, data_type) = match expr {
            // An untyped NULL is acceptable wherever a boolean is.
            Expr::Literal(Value::Null) => (
                self.literal(&Value::Null, &ArrowDataType::Boolean)?,
                ArrowDataType::Boolean,
            ),
            _ => self.compile(expr)?,
        };
        if data_type != ArrowDataType::Boolean {
            return Err(ScanError::Compile(format!(
                "expected a boolean expression, got {data_type}: {expr}"
            )));
        }
        Ok(compiled)
    }

    /// Compiles both sides of a binary operator to a common type.
    ///
    /// A literal takes the type of the other operand, unless that type cannot
    /// hold the literal exactly, in which case the other operand is widened.
    /// Two non-literal operands must already agree.
    fn compile_operands(
        &self,
        left: &Expr,
        right: &Expr,
    ) -> Result<(CompiledExpr, CompiledExpr, ArrowDataType)> {
        match (left, right) {
            (Expr::Literal(l), Expr::Literal(r)) => {
                let target = match (l.data_type(), r.data_type()) {
                    (Some(t), _) | (None, Some(t)) => t.to_arrow(),
                    (None, None) => {
                        return Err(ScanError::Compile(
                            "cannot infer a type for two NULL operands".into(),
                        ))
                    }
                };
                Ok((self.literal(l, &target)?, self.literal(r, &target)?, target))
            }
            (Expr::Literal(value), other) => {
                let (other, literal, target) = self.compile_against_literal(other, value)?;
                Ok((literal, other, target))
            }
            (other, Expr::Literal(value)) => self.compile_against_literal(other, value),
            (l, r) => {
                let (left, left_type) = self.compile(l)?;
                let (right, right_type) = self.compile(r)?;
                if left_type != right_type {
                    return Err(ScanError::Compile(format!(
                        "type mismatch: {l} is {left_type}, {r} is {right_type}"
                    )));
                }
                Ok((left, right, left_type))
            }
        }
    }

    /// Compiles `expr` and the literal it meets, returning `(expr, literal, type)`.
    fn compile_against_literal(
        &self,
        expr: &Expr,
        value: &Value,
    ) -> Result<(CompiledExpr, CompiledExpr, ArrowDataType)> {
        let (compiled, data_type) = self.compile(expr)?;
        let (compiled, target) = match widened_type(&data_type, value) {
            Some(wide) => (
                CompiledExpr::Cast {
                    operand: Box::new(compiled),
                    to: wide.clone(),
                },
                wide,
            ),
            None => (compiled, data_type),
        };
        let literal = self.literal(value, &target)?;
        Ok((compiled, literal, target))
    }

    #[allow(clippy::unused_self)]
    fn literal(&self, value: &Value, target: &ArrowDataType) -> Result<CompiledExpr> {
        Ok(CompiledExpr::Literal {
            value: Scalar::new(value.to_typed_array(target)?),
        })
    }
}

/// The type an operand of `data_type` must be widened to before it meets
/// `literal`, or `None` when the literal can take `data_type` as is.
///
/// Integers meeting a fractional literal and `REAL` meeting a `BIGINT`
/// literal both widen to `DOUBLE`.
fn widened_type(data_type: &ArrowDataType, literal: &Value) -> Option<ArrowDataType> {
    let widen = match literal {
        Value::Float32(_) | Value::Float64(_) => data_type.is_integer(),
        Value::Int64(_) => matches!(data_type, ArrowDataType::Float16 | ArrowDataType::Float32),
        _ => false,
    };
    widen.then_some(ArrowDataType::Float64)
}

fn is_comparable(data_type: &ArrowDataType) -> bool {
    match data_type {
        ArrowDataType::Dictionary(_, value_type) => is_comparable(value_type),
        t => {
            t.is_primitive()
                || matches!(
                    t,
                    ArrowDataType::Boolean
                        | ArrowDataType::Utf8
                        | ArrowDataType::LargeUtf8
                        | ArrowDataType::Utf8View
                        | ArrowDataType::Binary
                        | ArrowDataType::LargeBinary
                )
        }
    }
}

/// A filter compiled once and evaluated over every batch of a scan.
///
/// The selection vector it produces is the only acceptance decision for a
/// row; nothing downstream re-tests rows against the filter.
#[derive(Debug, Clone)]
pub struct CompiledPredicate {
    /// `None` accepts every row.
    root: Option<CompiledExpr>,
    /// The source expression, kept for diagnostics.
    expr: Option<Expr>,
}

impl CompiledPredicate {
    /// Compiles a boolean expression against `schema`.
    ///
    /// # Errors
    ///
    /// Returns `Compile` on unknown column ordinals, operand type mismatches,
    /// literals that don't fit the column type, or a non-boolean result.
    pub fn compile(expr: Expr, schema: &Schema) -> Result<Self> {
        let root = Compiler { schema }.compile_boolean(&expr)?;
        debug!(predicate = %expr, "compiled predicate");
        Ok(CompiledPredicate {
            root: Some(root),
            expr: Some(expr),
        })
    }

    /// Compiles the single-field equality `column[ordinal] = literal`.
    ///
    /// # Errors
    ///
    /// Same as [`CompiledPredicate::compile`].
    pub fn field_equals(ordinal: usize, literal: Value, schema: &Schema) -> Result<Self> {
        Self::compile(Expr::column(ordinal).equals(Expr::literal(literal)), schema)
    }

    /// A predicate accepting every row.
    #[must_use]
    pub fn accept_all() -> Self {
        CompiledPredicate {
            root: None,
            expr: None,
        }
    }

    /// Returns the source expression, or `None` for [`CompiledPredicate::accept_all`].
    #[must_use]
    pub fn expr(&self) -> Option<&Expr> {
        self.expr.as_ref()
    }

    /// Computes the selection vector of `batch`.
    ///
    /// The returned vector is backed by `allocator`'s buffer and must be
    /// released back to it when the batch is retired. An empty selection is
    /// a normal result.
    ///
    /// # Errors
    ///
    /// Returns `Format` if the batch doesn't fit the compiled column
    /// ordinals, `Arrow` on kernel failures, or the allocator's error if the
    /// buffer cannot be acquired. On error no buffer is held.
    pub fn evaluate(
        &self,
        batch: &RecordBatch,
        allocator: &mut SelectionAllocator,
    ) -> Result<SelectionVector> {
        let num_rows = batch.num_rows();
        let mask = match &self.root {
            Some(root) => {
                let mask = VectorizedEvaluator::evaluate_boolean(root, batch)?;
                if mask.len() != num_rows {
                    return Err(ScanError::Format(format!(
                        "predicate produced {} values for a batch of {num_rows} rows",
                        mask.len()
                    )));
                }
                Some(mask)
            }
            None => None,
        };

        let mut selection = allocator.acquire(num_rows)?;
        match mask {
            Some(mask) => VectorizedEvaluator::select(&mask, &mut selection),
            None => {
                for row in 0..num_rows as u32 {
                    selection.push(row);
                }
            }
        }
        debug!(rows = num_rows, selected = selection.len(), "evaluated predicate");
        Ok(selection)
    }
}

/// Computed output columns appended after the projected fields.
#[derive(Debug, Clone)]
pub struct CompiledProjection {
    exprs: Vec<CompiledExpr>,
    fields: Vec<FieldRef>,
}

impl CompiledProjection {
    /// Compiles named expressions against `schema`.
    ///
    /// # Errors
    ///
    /// Returns `Compile` if any expression fails to compile.
    pub fn compile(exprs: Vec<(String, Expr)>, schema: &Schema) -> Result<Self> {
        let compiler = Compiler { schema };
        let mut compiled = Vec::with_capacity(exprs.len());
        let mut fields = Vec::with_capacity(exprs.len());
        for (name, expr) in exprs {
            let (node, data_type) = compiler.compile(&expr)?;
            compiled.push(node);
            fields.push(Arc::new(Field::new(name, data_type, true)));
        }
        Ok(CompiledProjection {
            exprs: compiled,
            fields,
        })
    }

    /// Returns the computed output fields.
    #[must_use]
    pub fn fields(&self) -> &[FieldRef] {
        &self.fields
    }

    /// Returns the number of computed columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.exprs.len()
    }

    /// Returns true if no columns are computed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.exprs.is_empty()
    }

    /// Evaluates every computed column over the whole batch.
    ///
    /// # Errors
    ///
    /// Returns `Format` or `Arrow` errors from evaluation.
    pub fn evaluate(&self, batch: &RecordBatch) -> Result<Vec<ArrayRef>> {
        self.exprs
            .iter()
            .map(|expr| VectorizedEvaluator::evaluate(expr, batch)?.into_array(batch.num_rows()))
            .collect()
    }
}

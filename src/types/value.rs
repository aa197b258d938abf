//! Value and `DataType` definitions for colscan.

use std::fmt;
use std::sync::Arc;

use arrow::array::{
    new_null_array, Array, ArrayRef, AsArray, BooleanArray, Date32Array, Float32Array,
    Float64Array, Int64Array, StringArray, TimestampMicrosecondArray,
};
use arrow::datatypes::{
    DataType as ArrowDataType, Date32Type, Date64Type, Float32Type, Float64Type, Int16Type,
    Int32Type, Int64Type, Int8Type, TimeUnit, TimestampMicrosecondType,
    TimestampMillisecondType, TimestampNanosecondType, TimestampSecondType, UInt16Type,
    UInt32Type, UInt64Type, UInt8Type,
};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScanError};

const MILLIS_PER_DAY: i64 = 86_400_000;
/// Days between 0001-01-01 (CE day 1) and 1970-01-01.
const UNIX_EPOCH_FROM_CE: i32 = 719_163;

/// Supported logical data types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// 64-bit signed integer.
    Int64,
    /// 32-bit floating point.
    Float32,
    /// 64-bit floating point.
    Float64,
    /// Boolean.
    Bool,
    /// UTF-8 string.
    String,
    /// Date (stored as days since epoch).
    Date,
    /// Timestamp (stored as microseconds since epoch).
    Timestamp,
}

impl DataType {
    /// Returns the SQL name of the data type.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            DataType::Int64 => "BIGINT",
            DataType::Float32 => "REAL",
            DataType::Float64 => "DOUBLE",
            DataType::Bool => "BOOLEAN",
            DataType::String => "VARCHAR",
            DataType::Date => "DATE",
            DataType::Timestamp => "TIMESTAMP",
        }
    }

    /// Returns whether this type is numeric.
    #[must_use]
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            DataType::Int64 | DataType::Float32 | DataType::Float64
        )
    }

    /// Converts to an Arrow data type.
    #[must_use]
    pub fn to_arrow(&self) -> ArrowDataType {
        match self {
            DataType::Int64 => ArrowDataType::Int64,
            DataType::Float32 => ArrowDataType::Float32,
            DataType::Float64 => ArrowDataType::Float64,
            DataType::Bool => ArrowDataType::Boolean,
            DataType::String => ArrowDataType::Utf8,
            DataType::Date => ArrowDataType::Date32,
            DataType::Timestamp => ArrowDataType::Timestamp(TimeUnit::Microsecond, None),
        }
    }

    /// Converts from an Arrow data type.
    ///
    /// Integer widths all map to `Int64`. Returns None for unsupported Arrow types.
    #[must_use]
    pub fn from_arrow(arrow_type: &ArrowDataType) -> Option<Self> {
        match arrow_type {
            ArrowDataType::Int8
            | ArrowDataType::Int16
            | ArrowDataType::Int32
            | ArrowDataType::Int64
            | ArrowDataType::UInt8
            | ArrowDataType::UInt16
            | ArrowDataType::UInt32
            | ArrowDataType::UInt64 => Some(DataType::Int64),
            ArrowDataType::Float32 => Some(DataType::Float32),
            ArrowDataType::Float64 => Some(DataType::Float64),
            ArrowDataType::Boolean => Some(DataType::Bool),
            ArrowDataType::Utf8 | ArrowDataType::LargeUtf8 | ArrowDataType::Utf8View => {
                Some(DataType::String)
            }
            ArrowDataType::Date32 | ArrowDataType::Date64 => Some(DataType::Date),
            ArrowDataType::Timestamp(_, _) => Some(DataType::Timestamp),
            _ => None,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Runtime value read out of a column slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// 64-bit signed integer value.
    Int64(i64),
    /// 32-bit floating point value.
    Float32(f32),
    /// 64-bit floating point value.
    Float64(f64),
    /// Boolean value.
    Bool(bool),
    /// String value.
    String(String),
    /// Date value (days since Unix epoch).
    Date(i32),
    /// Timestamp value (microseconds since Unix epoch).
    Timestamp(i64),
    /// Null value.
    Null,
}

// Manual Hash implementation because f32/f64 doesn't implement Hash
impl std::hash::Hash for Value {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Int64(v) | Value::Timestamp(v) => v.hash(state),
            Value::Float32(v) => v.to_bits().hash(state),
            Value::Float64(v) => v.to_bits().hash(state),
            Value::Bool(v) => v.hash(state),
            Value::String(v) => v.hash(state),
            Value::Date(v) => v.hash(state),
            Value::Null => {}
        }
    }
}

// Manual Eq implementation because f64 doesn't implement Eq
impl Eq for Value {}

impl Value {
    /// Returns true if this value is null.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the data type of this value, or None for Null.
    #[must_use]
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Value::Int64(_) => Some(DataType::Int64),
            Value::Float32(_) => Some(DataType::Float32),
            Value::Float64(_) => Some(DataType::Float64),
            Value::Bool(_) => Some(DataType::Bool),
            Value::String(_) => Some(DataType::String),
            Value::Date(_) => Some(DataType::Date),
            Value::Timestamp(_) => Some(DataType::Timestamp),
            Value::Null => None,
        }
    }

    /// Builds an array repeating this value `len` times.
    ///
    /// `Null` becomes a null `Int64` array; use [`Value::to_typed_array`] when
    /// the target type is known.
    #[must_use]
    pub fn to_array(&self, len: usize) -> ArrayRef {
        match self {
            Value::Int64(v) => Arc::new(Int64Array::from(vec![*v; len])),
            Value::Float32(v) => Arc::new(Float32Array::from(vec![*v; len])),
            Value::Float64(v) => Arc::new(Float64Array::from(vec![*v; len])),
            Value::Bool(v) => Arc::new(BooleanArray::from(vec![*v; len])),
            Value::String(v) => Arc::new(StringArray::from(vec![v.as_str(); len])),
            Value::Date(v) => Arc::new(Date32Array::from(vec![*v; len])),
            Value::Timestamp(v) => Arc::new(TimestampMicrosecondArray::from(vec![*v; len])),
            Value::Null => Arc::new(Int64Array::from(vec![None::<i64>; len])),
        }
    }

    /// Builds a single-element array of exactly `target` type holding this value.
    ///
    /// A dictionary target yields an array of its value type, which the
    /// comparison kernels match against the dictionary's values.
    ///
    /// # Errors
    ///
    /// Returns `Compile` if the value cannot be represented in `target`
    /// without loss (e.g. an integer literal out of range for an `Int8` column,
    /// or `3.5` for a `BIGINT` column).
    pub fn to_typed_array(&self, target: &ArrowDataType) -> Result<ArrayRef> {
        if let ArrowDataType::Dictionary(_, value_type) = target {
            return self.to_typed_array(value_type);
        }
        if self.is_null() {
            return Ok(new_null_array(target, 1));
        }
        let natural = self.to_array(1);
        if natural.data_type() == target {
            return Ok(natural);
        }
        let (from, to) = (type_family(natural.data_type()), type_family(target));
        if from != to && !(from == TypeFamily::Text && to == TypeFamily::Temporal) {
            return Err(ScanError::Compile(format!(
                "cannot convert literal {self} to {target}"
            )));
        }
        let cast = arrow::compute::cast(&natural, target).map_err(|e| {
            ScanError::Compile(format!("cannot convert literal {self} to {target}: {e}"))
        })?;
        if cast.null_count() > 0 {
            return Err(ScanError::Compile(format!(
                "literal {self} is out of range for {target}"
            )));
        }
        // Float to float keeps the nearest value; any other numeric narrowing must be exact.
        if from == TypeFamily::Numeric
            && !(natural.data_type().is_floating() && target.is_floating())
        {
            let back = arrow::compute::cast(&cast, natural.data_type()).map_err(|e| {
                ScanError::Compile(format!("cannot convert literal {self} to {target}: {e}"))
            })?;
            if back.to_data() != natural.to_data() {
                return Err(ScanError::Compile(format!(
                    "literal {self} is not exactly representable as {target}"
                )));
            }
        }
        Ok(cast)
    }

    /// Reads the value stored at `row` in an Arrow column.
    ///
    /// Integer widths widen to `Int64`; all timestamp units are normalised to
    /// microseconds and `Date64` to days. Dictionary columns read through to
    /// their values, and a `Null`-typed column reads as `Null`.
    ///
    /// # Errors
    ///
    /// Returns `Format` if `row` is out of bounds, the column type is not
    /// supported, or an unsigned value does not fit in `i64`.
    pub fn from_array(array: &dyn Array, row: usize) -> Result<Value> {
        if row >= array.len() {
            return Err(ScanError::Format(format!(
                "row {row} out of bounds for column of length {}",
                array.len()
            )));
        }
        if array.is_null(row) {
            return Ok(Value::Null);
        }

        let value = match array.data_type() {
            ArrowDataType::Null => Value::Null,
            ArrowDataType::Dictionary(_, _) => {
                let dict = array.as_any_dictionary();
                let key = match Value::from_array(dict.keys(), row)? {
                    Value::Int64(key) => usize::try_from(key).ok(),
                    _ => None,
                }
                .ok_or_else(|| {
                    ScanError::Format(format!("invalid dictionary key at row {row}"))
                })?;
                return Value::from_array(dict.values().as_ref(), key);
            }
            ArrowDataType::Int8 => {
                Value::Int64(i64::from(array.as_primitive::<Int8Type>().value(row)))
            }
            ArrowDataType::Int16 => {
                Value::Int64(i64::from(array.as_primitive::<Int16Type>().value(row)))
            }
            ArrowDataType::Int32 => {
                Value::Int64(i64::from(array.as_primitive::<Int32Type>().value(row)))
            }
            ArrowDataType::Int64 => Value::Int64(array.as_primitive::<Int64Type>().value(row)),
            ArrowDataType::UInt8 => {
                Value::Int64(i64::from(array.as_primitive::<UInt8Type>().value(row)))
            }
            ArrowDataType::UInt16 => {
                Value::Int64(i64::from(array.as_primitive::<UInt16Type>().value(row)))
            }
            ArrowDataType::UInt32 => {
                Value::Int64(i64::from(array.as_primitive::<UInt32Type>().value(row)))
            }
            ArrowDataType::UInt64 => {
                let raw = array.as_primitive::<UInt64Type>().value(row);
                Value::Int64(i64::try_from(raw).map_err(|_| {
                    ScanError::Format(format!("UInt64 value {raw} does not fit in BIGINT"))
                })?)
            }
            ArrowDataType::Float32 => Value::Float32(array.as_primitive::<Float32Type>().value(row)),
            ArrowDataType::Float64 => Value::Float64(array.as_primitive::<Float64Type>().value(row)),
            ArrowDataType::Boolean => Value::Bool(array.as_boolean().value(row)),
            ArrowDataType::Utf8 => Value::String(array.as_string::<i32>().value(row).to_string()),
            ArrowDataType::LargeUtf8 => {
                Value::String(array.as_string::<i64>().value(row).to_string())
            }
            ArrowDataType::Utf8View => {
                Value::String(array.as_string_view().value(row).to_string())
            }
            ArrowDataType::Date32 => Value::Date(array.as_primitive::<Date32Type>().value(row)),
            ArrowDataType::Date64 => {
                let millis = array.as_primitive::<Date64Type>().value(row);
                Value::Date(millis.div_euclid(MILLIS_PER_DAY) as i32)
            }
            ArrowDataType::Timestamp(unit, _) => {
                let micros = match unit {
                    TimeUnit::Second => array
                        .as_primitive::<TimestampSecondType>()
                        .value(row)
                        .saturating_mul(1_000_000),
                    TimeUnit::Millisecond => array
                        .as_primitive::<TimestampMillisecondType>()
                        .value(row)
                        .saturating_mul(1_000),
                    TimeUnit::Microsecond => {
                        array.as_primitive::<TimestampMicrosecondType>().value(row)
                    }
                    TimeUnit::Nanosecond => {
                        array.as_primitive::<TimestampNanosecondType>().value(row) / 1_000
                    }
                };
                Value::Timestamp(micros)
            }
            other => {
                return Err(ScanError::Format(format!(
                    "unsupported column type {other}"
                )))
            }
        };
        Ok(value)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int64(v) => write!(f, "{v}"),
            Value::Float32(v) => write!(f, "{v:?}"),
            Value::Float64(v) => write!(f, "{v:?}"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::String(v) => write!(f, "'{v}'"),
            Value::Date(days) => match days
                .checked_add(UNIX_EPOCH_FROM_CE)
                .and_then(chrono::NaiveDate::from_num_days_from_ce_opt)
            {
                Some(date) => write!(f, "{date}"),
                None => write!(f, "DATE({days})"),
            },
            Value::Timestamp(micros) => match chrono::DateTime::from_timestamp_micros(*micros) {
                Some(ts) => write!(f, "{}", ts.naive_utc()),
                None => write!(f, "TIMESTAMP({micros})"),
            },
            Value::Null => f.write_str("NULL"),
        }
    }
}

/// Coarse grouping of Arrow types between which literals may be coerced.
#[derive(PartialEq, Eq)]
enum TypeFamily {
    Numeric,
    Text,
    Boolean,
    Temporal,
    Other,
}

fn type_family(data_type: &ArrowDataType) -> TypeFamily {
    match data_type {
        t if t.is_numeric() => TypeFamily::Numeric,
        ArrowDataType::Utf8 | ArrowDataType::LargeUtf8 | ArrowDataType::Utf8View => {
            TypeFamily::Text
        }
        ArrowDataType::Boolean => TypeFamily::Boolean,
        t if t.is_temporal() => TypeFamily::Temporal,
        _ => TypeFamily::Other,
    }
}

/// The value a cursor exposes for its current row.
///
/// A cursor with exactly one output column yields the bare value; otherwise
/// the values are returned in output column order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RowValue {
    /// Single output column.
    Scalar(Value),
    /// Two or more output columns.
    Tuple(Vec<Value>),
}

impl RowValue {
    /// Wraps extracted values, collapsing a single value to `Scalar`.
    #[must_use]
    pub fn from_values(mut values: Vec<Value>) -> Self {
        if values.len() == 1 {
            RowValue::Scalar(values.remove(0))
        } else {
            RowValue::Tuple(values)
        }
    }

    /// Returns the number of output columns.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            RowValue::Scalar(_) => 1,
            RowValue::Tuple(values) => values.len(),
        }
    }

    /// Returns true if there are no output columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Gets the value of the output column at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Value> {
        match self {
            RowValue::Scalar(value) => (index == 0).then_some(value),
            RowValue::Tuple(values) => values.get(index),
        }
    }

    /// Flattens into the ordered output values.
    #[must_use]
    pub fn into_values(self) -> Vec<Value> {
        match self {
            RowValue::Scalar(value) => vec![value],
            RowValue::Tuple(values) => values,
        }
    }
}

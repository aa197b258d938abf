//! Logical types, scalar values and cursor row values.

mod value;

pub use value::{DataType, RowValue, Value};

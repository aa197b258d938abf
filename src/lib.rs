//! colscan - row cursor over Arrow record batches
//!
//! Reads batches from a [`source::BatchSource`], keeps only the requested
//! columns, filters rows with a compiled vectorized predicate and hands the
//! surviving rows out one at a time through a pull-based
//! [`executor::RowCursor`].
//!
//! ```no_run
//! use colscan::executor::vectorized::{CompiledPredicate, Expr};
//! use colscan::executor::{RowCursor, ScanOptions};
//! use colscan::source::{BatchSource, IpcFileSource};
//! use colscan::types::Value;
//!
//! # fn main() -> colscan::Result<()> {
//! let source = IpcFileSource::open("orders.arrow")?;
//! let predicate = CompiledPredicate::compile(
//!     Expr::column(0).equals(Expr::literal(Value::String("A".into()))),
//!     &source.schema(),
//! )?;
//! let mut cursor = RowCursor::open(source, ScanOptions::new(predicate, vec![1, 2]))?;
//! while cursor.move_next()? {
//!     println!("{:?}", cursor.current()?);
//! }
//! cursor.close();
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod error;
pub mod executor;
pub mod source;
pub mod types;

pub use error::{Result, ScanError};
pub use executor::{CursorState, Enumerator, RowCursor, ScanConfig, ScanOptions};
pub use types::{DataType, RowValue, Value};

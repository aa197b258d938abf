//! Catalog of table column specifications.

mod json_table;

pub use json_table::{JsonTable, JsonTableColumn, RowTypeBuilder};

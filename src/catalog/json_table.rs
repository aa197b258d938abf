//! Column specifications of a `JSON_TABLE` source.
//!
//! A `JSON_TABLE` exposes rows extracted from a JSON document through a list of
//! column specifications. This module resolves those specifications to the
//! Arrow schema a cursor scans, and maps output column names to the field
//! ordinals a [`ColumnProjector`](crate::executor::vectorized::ColumnProjector)
//! takes. Path expressions are carried as opaque strings.

use std::collections::HashSet;
use std::fmt;

use arrow::datatypes::{DataType as ArrowDataType, Field, Schema};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScanError};
use crate::types::DataType;

/// One entry of a `JSON_TABLE` `COLUMNS` clause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JsonTableColumn {
    /// `name TYPE [PATH 'path'] [behaviors]`
    Regular {
        name: String,
        data_type: DataType,
        path: Option<String>,
        /// `ON EMPTY` / `ON ERROR` clauses, rendered verbatim.
        behaviors: Vec<String>,
    },
    /// `name TYPE FORMAT JSON [ENCODING enc] [PATH 'path'] [wrapper] [behaviors]`
    Formatted {
        name: String,
        data_type: DataType,
        encoding: Option<String>,
        path: Option<String>,
        wrapper: Option<String>,
        behaviors: Vec<String>,
    },
    /// `name FOR ORDINALITY`
    Ordinality { name: String },
    /// `NESTED PATH 'path' [AS name] COLUMNS (...)`
    Nested {
        name: Option<String>,
        path: String,
        children: Vec<JsonTableColumn>,
    },
}

impl JsonTableColumn {
    /// Creates a regular column without a path or behaviors.
    #[must_use]
    pub fn regular(name: impl Into<String>, data_type: DataType) -> Self {
        JsonTableColumn::Regular {
            name: name.into(),
            data_type,
            path: None,
            behaviors: Vec::new(),
        }
    }

    /// Creates an ordinality column.
    #[must_use]
    pub fn ordinality(name: impl Into<String>) -> Self {
        JsonTableColumn::Ordinality { name: name.into() }
    }

    /// Creates a nested column group.
    #[must_use]
    pub fn nested(path: impl Into<String>, children: Vec<JsonTableColumn>) -> Self {
        JsonTableColumn::Nested {
            name: None,
            path: path.into(),
            children,
        }
    }

    /// Sets the path of a regular, formatted or nested column.
    #[must_use]
    pub fn with_path(mut self, new_path: impl Into<String>) -> Self {
        match &mut self {
            JsonTableColumn::Regular { path, .. } | JsonTableColumn::Formatted { path, .. } => {
                *path = Some(new_path.into());
            }
            JsonTableColumn::Nested { path, .. } => *path = new_path.into(),
            JsonTableColumn::Ordinality { .. } => {}
        }
        self
    }

    /// Returns the column's name; nested groups may be anonymous.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match self {
            JsonTableColumn::Regular { name, .. }
            | JsonTableColumn::Formatted { name, .. }
            | JsonTableColumn::Ordinality { name } => Some(name),
            JsonTableColumn::Nested { name, .. } => name.as_deref(),
        }
    }

    /// Adds the output fields of this column to `builder`.
    ///
    /// Nested groups contribute their children's fields, flattened in order.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedOperation` for formatted columns.
    pub fn derive_type(&self, builder: &mut RowTypeBuilder) -> Result<()> {
        match self {
            JsonTableColumn::Regular {
                name, data_type, ..
            } => {
                builder.add(name, data_type.to_arrow(), true);
                Ok(())
            }
            JsonTableColumn::Formatted { name, .. } => Err(ScanError::UnsupportedOperation(
                format!("type derivation for formatted JSON_TABLE column '{name}'"),
            )),
            JsonTableColumn::Ordinality { name } => {
                builder.add(name, ArrowDataType::Int32, false);
                Ok(())
            }
            JsonTableColumn::Nested { children, .. } => children
                .iter()
                .try_for_each(|child| child.derive_type(builder)),
        }
    }
}

fn write_path(f: &mut fmt::Formatter<'_>, path: &str) -> fmt::Result {
    write!(f, "PATH '{}'", path.replace('\'', "''"))
}

impl fmt::Display for JsonTableColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JsonTableColumn::Regular {
                name,
                data_type,
                path,
                behaviors,
            } => {
                write!(f, "{name} {data_type}")?;
                if let Some(path) = path {
                    f.write_str(" ")?;
                    write_path(f, path)?;
                }
                for behavior in behaviors {
                    write!(f, " {behavior}")?;
                }
                Ok(())
            }
            JsonTableColumn::Formatted {
                name,
                data_type,
                encoding,
                path,
                wrapper,
                behaviors,
            } => {
                write!(f, "{name} {data_type} FORMAT JSON")?;
                if let Some(encoding) = encoding {
                    write!(f, " ENCODING {encoding}")?;
                }
                if let Some(path) = path {
                    f.write_str(" ")?;
                    write_path(f, path)?;
                }
                if let Some(wrapper) = wrapper {
                    write!(f, " {wrapper}")?;
                }
                for behavior in behaviors {
                    write!(f, " {behavior}")?;
                }
                Ok(())
            }
            JsonTableColumn::Ordinality { name } => write!(f, "{name} FOR ORDINALITY"),
            JsonTableColumn::Nested {
                name,
                path,
                children,
            } => {
                f.write_str("NESTED ")?;
                write_path(f, path)?;
                if let Some(name) = name {
                    write!(f, " AS {name}")?;
                }
                f.write_str(" COLUMNS (")?;
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{child}")?;
                }
                f.write_str(")")
            }
        }
    }
}

/// Accumulates output fields in declaration order.
#[derive(Debug, Default)]
pub struct RowTypeBuilder {
    fields: Vec<Field>,
}

impl RowTypeBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a field.
    pub fn add(&mut self, name: &str, data_type: ArrowDataType, nullable: bool) -> &mut Self {
        self.fields.push(Field::new(name, data_type, nullable));
        self
    }

    /// Returns the number of fields added so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if no field has been added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Builds the schema.
    ///
    /// # Errors
    ///
    /// Returns `Format` if two fields share a name.
    pub fn build(self) -> Result<Schema> {
        let mut seen = HashSet::new();
        for field in &self.fields {
            if !seen.insert(field.name().as_str()) {
                return Err(ScanError::Format(format!(
                    "duplicate JSON_TABLE column '{}'",
                    field.name()
                )));
            }
        }
        Ok(Schema::new(self.fields))
    }
}

/// Resolution helpers for a `JSON_TABLE` column list.
pub struct JsonTable;

impl JsonTable {
    /// Derives the output schema of `columns`.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedOperation` if any column is formatted, and `Format`
    /// on duplicate column names.
    pub fn row_type(columns: &[JsonTableColumn]) -> Result<Schema> {
        let mut builder = RowTypeBuilder::new();
        for column in columns {
            column.derive_type(&mut builder)?;
        }
        builder.build()
    }

    /// Resolves output column names to field ordinals of `schema`, in the
    /// order given.
    ///
    /// # Errors
    ///
    /// Returns `Format` if a name is not in the schema.
    pub fn ordinals(schema: &Schema, names: &[&str]) -> Result<Vec<usize>> {
        names
            .iter()
            .map(|name| {
                schema
                    .index_of(name)
                    .map_err(|_| ScanError::Format(format!("unknown JSON_TABLE column '{name}'")))
            })
            .collect()
    }

    /// Renders a full `COLUMNS (...)` clause.
    #[must_use]
    pub fn columns_clause(columns: &[JsonTableColumn]) -> String {
        let rendered: Vec<String> = columns.iter().map(ToString::to_string).collect();
        format!("COLUMNS ({})", rendered.join(", "))
    }
}

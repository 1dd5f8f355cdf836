//! Table schema lookup and the shared raw-text-to-typed-value coercion used
//! by both value-list parsing and predicate parsing.

use std::collections::HashMap;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{TableId, Value};

/// The declared type of a column, as reported by the source catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Integer,
    Float,
    String,
    Timestamp,
    Date,
}

/// One column of a table definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub ty: ColumnType,
}

impl Column {
    pub fn new(name: &str, ty: ColumnType) -> Self {
        Self {
            name: name.to_uppercase(),
            ty,
        }
    }
}

/// An ordered column list for one table. Column order matters: before/after
/// images are emitted in this order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub id: TableId,
    pub columns: Vec<Column>,
}

impl TableSchema {
    pub fn new(id: TableId, columns: Vec<Column>) -> Self {
        Self { id, columns }
    }

    /// Look up a column by its normalized (uppercase) name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// Lookup of table definitions by owner and table name. The implementation is
/// an external collaborator; the mining core only reads from it.
pub trait SchemaCatalog: Send + Sync {
    fn lookup(&self, owner: &str, table: &str) -> Result<&TableSchema>;
}

/// A catalog backed by a plain map, populated up front by the host.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    tables: HashMap<TableId, TableSchema>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, schema: TableSchema) {
        self.tables.insert(schema.id.clone(), schema);
    }
}

impl SchemaCatalog for MemoryCatalog {
    fn lookup(&self, owner: &str, table: &str) -> Result<&TableSchema> {
        let id = TableId::new(owner, table);
        self.tables
            .get(&id)
            .ok_or_else(|| Error::UnknownTable(id.to_string()))
    }
}

const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%d-%b-%y %I.%M.%S%.f %p",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d-%b-%y"];

/// Coerce raw captured text into a typed value according to the column's
/// declared type. The caller strips enclosing quote characters first; `raw`
/// is the bare literal text.
pub fn coerce(raw: &str, ty: ColumnType) -> Result<Value> {
    let fail = |reason: &str| Error::Coercion {
        raw: raw.to_string(),
        ty,
        reason: reason.to_string(),
    };

    match ty {
        ColumnType::Integer => raw
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|e| fail(&e.to_string())),
        ColumnType::Float => raw
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|e| fail(&e.to_string())),
        ColumnType::String => Ok(Value::String(raw.to_string())),
        ColumnType::Timestamp => {
            for fmt in TIMESTAMP_FORMATS {
                if let Ok(ts) = NaiveDateTime::parse_from_str(raw, fmt) {
                    return Ok(Value::Timestamp(ts));
                }
            }
            Err(fail("unrecognized timestamp format"))
        }
        ColumnType::Date => {
            for fmt in DATE_FORMATS {
                if let Ok(d) = NaiveDate::parse_from_str(raw, fmt) {
                    return Ok(Value::Date(d));
                }
            }
            Err(fail("unrecognized date format"))
        }
    }
}

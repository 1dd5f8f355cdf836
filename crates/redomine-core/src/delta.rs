//! Structured row-level change reconstructed from one captured DML statement.

use serde::{Deserialize, Serialize};

use crate::schema::ColumnType;
use crate::types::{Operation, TableId, Value};

/// One column of a before/after image. Owned exclusively by the delta that
/// holds it; never mutated after the delta is finalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnValue {
    pub name: String,
    pub ty: ColumnType,
    pub value: Value,
}

/// One row-level change: the operation, the table it touched, and the column
/// images the captured statement allows us to reconstruct.
///
/// Invariants: inserts carry an empty before image, deletes an empty after
/// image; updates may carry partial images (only the columns that appeared in
/// the SET list or WHERE predicate).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowChangeDelta {
    pub op: Operation,
    pub table: TableId,
    pub before: Vec<ColumnValue>,
    pub after: Vec<ColumnValue>,
}

impl RowChangeDelta {
    pub fn before_value(&self, column: &str) -> Option<&Value> {
        self.before
            .iter()
            .find(|cv| cv.name == column)
            .map(|cv| &cv.value)
    }

    pub fn after_value(&self, column: &str) -> Option<&Value> {
        self.after
            .iter()
            .find(|cv| cv.name == column)
            .map(|cv| &cv.value)
    }
}

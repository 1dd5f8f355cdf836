use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// A system change number: the monotonic position the source database assigns
/// to every change in its transaction log. Used both as a mining-window bound
/// and as the persisted resume offset.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Scn(pub u64);

impl Scn {
    pub const ZERO: Scn = Scn(0);
    pub const MAX: Scn = Scn(u64::MAX);

    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Advance by `span`, saturating at the maximum representable position.
    pub fn saturating_add(self, span: u64) -> Scn {
        Scn(self.0.saturating_add(span))
    }
}

impl From<u64> for Scn {
    fn from(v: u64) -> Self {
        Scn(v)
    }
}

impl fmt::Display for Scn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The type of database operation that produced a row change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

/// A table identity: owner (schema) plus table name, normalized to uppercase
/// the way identifiers come out of the mining view.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableId {
    pub owner: String,
    pub name: String,
}

impl TableId {
    pub fn new(owner: &str, name: &str) -> Self {
        Self {
            owner: owner.to_uppercase(),
            name: name.to_uppercase(),
        }
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.owner, self.name)
    }
}

/// A schema-coerced column value captured from the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    String(String),
    Timestamp(NaiveDateTime),
    Date(NaiveDate),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

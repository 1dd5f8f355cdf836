use thiserror::Error;

/// Errors that can occur in redomine-core.
#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown table: {0}")]
    UnknownTable(String),

    #[error("unknown column '{column}' in table {table}")]
    UnknownColumn { table: String, column: String },

    #[error("statement has {values} values but {columns} target columns")]
    ColumnCountMismatch { values: usize, columns: usize },

    #[error("unsupported statement shape: {0}")]
    Unsupported(String),

    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("cannot coerce {raw:?} to {ty:?}: {reason}")]
    Coercion {
        raw: String,
        ty: crate::schema::ColumnType,
        reason: String,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

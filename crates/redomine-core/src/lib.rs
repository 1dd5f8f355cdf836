pub mod buffer;
pub mod delta;
pub mod dml;
pub mod error;
pub mod schema;
pub mod types;

pub use buffer::{BufferStats, TransactionBuffer};
pub use delta::{ColumnValue, RowChangeDelta};
pub use error::{Error, Result};
pub use schema::{coerce, Column, ColumnType, MemoryCatalog, SchemaCatalog, TableSchema};
pub use types::{Operation, Scn, TableId, Value};

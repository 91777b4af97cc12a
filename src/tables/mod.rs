// Table naming, schema model, filters and the per-node table lifecycle

pub mod filters;
pub mod manager;
pub mod naming;
pub mod schema;

pub use filters::{build_filter_clause, FilterNode};
pub use manager::TableManager;
pub use naming::{TableName, TableType};
pub use schema::{ColumnInfo, DType, TableData, TableInfo, TableSchema};

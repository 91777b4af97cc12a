// Database Facade Module
// Narrow execute / fetch abstraction over the database each worker node owns

pub mod drivers;
pub mod error;
pub mod traits;
pub mod types;

pub use drivers::sqlite::SqliteDatabase;
pub use error::{EngineError, EngineResult};
pub use traits::NodeDatabase;
pub use types::*;

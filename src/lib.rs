//! FractalDB - schema-governed document collections over SQLite
//!
//! ```no_run
//! use fractaldb::{condition, Database, Field, Fields, Schema};
//!
//! # fn main() -> fractaldb::Result<()> {
//! let db = Database::in_memory()?;
//! let people = db.collection(
//!     "people",
//!     Schema::build(vec![Field::text("name").not_null(), Field::integer("age").not_null()])?,
//! )?;
//! people.insert(Fields::new().with("name", "Alice").with("age", 25))?;
//!
//! let found = people
//!     .query()
//!     .filter(condition("name").any_of(["Alice", "Bob"]) & condition("age").between(20, 40))
//!     .exec()?;
//! assert_eq!(found.len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod engine;

pub use engine::adapter::{Executor, Rows, SqliteEngine, StorageEngine, StorageError};
pub use engine::config::{Config, ConfigError, DatabaseConfig, LoggingConfig};
pub use engine::database::Database;
pub use engine::docstore::{
    compile, condition, Collection, CompiledFilter, Condition, DeleteMode, Field, FieldArg,
    FieldType, Fields, FractalError, Key, Query, Record, Reference, Result, Schema,
    SortDirection, Value, Violation,
};
pub use engine::logging;

//! Storage Adapter Layer
//!
//! The document store only needs one capability from the backing engine:
//! run a parameterized statement and hand back rows. Statement text uses
//! `?` placeholders and parameters are passed separately, in order.

pub mod sqlite;

pub use sqlite::SqliteEngine;

use thiserror::Error;

use crate::engine::docstore::error::Result;
use crate::engine::docstore::value::Value;

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Failures raised by the backing engine
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Unsupported {kind} value in column '{column}'")]
    UnsupportedValue { column: String, kind: &'static str },

    #[error("Cannot decode column '{column}': {reason}")]
    Decode { column: String, reason: String },

    #[error("Encoding error: {0}")]
    Encoding(String),
}

/// Result rows of a read statement
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Rows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Rows {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// First column of the first row
    pub fn scalar(&self) -> Option<&Value> {
        self.rows.first().and_then(|row| row.first())
    }
}

/// Runs statements against one connection or transaction
pub trait Executor {
    /// Run a statement that returns rows
    fn query(&self, sql: &str, params: &[Value]) -> StorageResult<Rows>;

    /// Run a statement that modifies data, returning affected rows
    fn execute(&self, sql: &str, params: &[Value]) -> StorageResult<u64>;
}

/// Backing engine. Plain `query` / `execute` calls autocommit.
pub trait StorageEngine: Executor + Send + Sync {
    /// Run `work` inside one storage transaction. Commits when `work`
    /// returns `Ok`, rolls back otherwise.
    fn transaction(&self, work: &mut dyn FnMut(&dyn Executor) -> Result<()>) -> Result<()>;

    /// Run several parameterless statements (DDL)
    fn execute_batch(&self, sql: &str) -> StorageResult<()>;
}

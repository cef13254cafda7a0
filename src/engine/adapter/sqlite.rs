//! SQLite Adapter
//!
//! Implements StorageEngine for SQLite using rusqlite + r2d2 connection pooling.

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::{ToSql, ToSqlOutput, Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use super::{Executor, Rows, StorageEngine, StorageError, StorageResult};
use crate::engine::docstore::error::Result;
use crate::engine::docstore::value::Value;

type DbPool = Pool<SqliteConnectionManager>;
type DbConn = PooledConnection<SqliteConnectionManager>;

pub struct SqliteEngine {
    pool: DbPool,
    db_path: PathBuf,
}

impl SqliteEngine {
    pub fn open(db_path: &Path, pool_size: u32, busy_timeout: Duration) -> StorageResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let manager = SqliteConnectionManager::file(db_path).with_init(move |conn| {
            conn.busy_timeout(busy_timeout)?;
            conn.execute_batch("PRAGMA foreign_keys=ON")
        });
        let pool = Pool::builder().max_size(pool_size.max(1)).build(manager)?;

        let conn = pool.get()?;
        let _: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        drop(conn);

        debug!(path = %db_path.display(), pool_size, "opened sqlite engine");
        Ok(Self {
            pool,
            db_path: db_path.to_path_buf(),
        })
    }

    /// Every pooled connection to `:memory:` is a separate database, so the
    /// pool holds exactly one connection that is never recycled.
    pub fn in_memory() -> StorageResult<Self> {
        let manager = SqliteConnectionManager::memory()
            .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys=ON"));
        let pool = Pool::builder()
            .max_size(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .build(manager)?;

        Ok(Self {
            pool,
            db_path: PathBuf::from(":memory:"),
        })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn get_conn(&self) -> StorageResult<DbConn> {
        Ok(self.pool.get()?)
    }
}

impl Executor for SqliteEngine {
    fn query(&self, sql: &str, params: &[Value]) -> StorageResult<Rows> {
        let conn = self.get_conn()?;
        ConnExecutor { conn: &conn }.query(sql, params)
    }

    fn execute(&self, sql: &str, params: &[Value]) -> StorageResult<u64> {
        let conn = self.get_conn()?;
        ConnExecutor { conn: &conn }.execute(sql, params)
    }
}

impl StorageEngine for SqliteEngine {
    fn transaction(&self, work: &mut dyn FnMut(&dyn Executor) -> Result<()>) -> Result<()> {
        let mut conn = self.get_conn()?;
        // Immediate: take the write lock up front so concurrent writers
        // wait on busy_timeout instead of failing mid-batch
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        work(&ConnExecutor { conn: &tx })?;
        tx.commit()?;
        Ok(())
    }

    fn execute_batch(&self, sql: &str) -> StorageResult<()> {
        let conn = self.get_conn()?;
        conn.execute_batch(sql)?;
        Ok(())
    }
}

/// Executor over a borrowed connection or open transaction
struct ConnExecutor<'a> {
    conn: &'a rusqlite::Connection,
}

impl Executor for ConnExecutor<'_> {
    fn query(&self, sql: &str, params: &[Value]) -> StorageResult<Rows> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();

        let mut cursor = stmt.query(params_from_iter(params.iter()))?;
        let mut rows = Vec::new();
        while let Some(row) = cursor.next()? {
            let mut values = Vec::with_capacity(columns.len());
            for (i, column) in columns.iter().enumerate() {
                values.push(value_from_ref(column, row.get_ref(i)?)?);
            }
            rows.push(values);
        }

        Ok(Rows { columns, rows })
    }

    fn execute(&self, sql: &str, params: &[Value]) -> StorageResult<u64> {
        let affected = self.conn.execute(sql, params_from_iter(params.iter()))?;
        Ok(affected as u64)
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(SqlValue::Null),
            Value::Boolean(b) => ToSqlOutput::Owned(SqlValue::Integer(*b as i64)),
            Value::Integer(i) => ToSqlOutput::Owned(SqlValue::Integer(*i)),
            Value::Float(f) => ToSqlOutput::Owned(SqlValue::Real(*f)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}

/// Convert a raw SQLite value. Booleans come back as integers and are
/// retagged by the caller, which knows the declared field type.
fn value_from_ref(column: &str, val: ValueRef<'_>) -> StorageResult<Value> {
    match val {
        ValueRef::Null => Ok(Value::Null),
        ValueRef::Integer(i) => Ok(Value::Integer(i)),
        ValueRef::Real(f) => Ok(Value::Float(f)),
        ValueRef::Text(t) => Ok(Value::Text(String::from_utf8_lossy(t).to_string())),
        ValueRef::Blob(_) => Err(StorageError::UnsupportedValue {
            column: column.to_string(),
            kind: "blob",
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::docstore::error::FractalError;

    #[test]
    fn test_parameterized_roundtrip() {
        let engine = SqliteEngine::in_memory().unwrap();
        engine
            .execute_batch("CREATE TABLE t (a INTEGER, b TEXT, c REAL, d BOOLEAN)")
            .unwrap();
        engine
            .execute(
                "INSERT INTO t (a, b, c, d) VALUES (?, ?, ?, ?)",
                &[Value::Integer(7), Value::from("x"), Value::Float(1.5), Value::Boolean(true)],
            )
            .unwrap();

        let rows = engine.query("SELECT a, b, c, d FROM t WHERE a = ?", &[Value::Integer(7)]).unwrap();
        assert_eq!(rows.columns, vec!["a", "b", "c", "d"]);
        assert_eq!(
            rows.rows,
            vec![vec![Value::Integer(7), Value::from("x"), Value::Float(1.5), Value::Integer(1)]]
        );
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let engine = SqliteEngine::in_memory().unwrap();
        engine.execute_batch("CREATE TABLE t (a INTEGER)").unwrap();

        let result = engine.transaction(&mut |exec| {
            exec.execute("INSERT INTO t (a) VALUES (?)", &[Value::Integer(1)])?;
            Err(FractalError::NotFound("abort".to_string()))
        });
        assert!(result.is_err());

        let rows = engine.query("SELECT COUNT(*) FROM t", &[]).unwrap();
        assert_eq!(rows.scalar(), Some(&Value::Integer(0)));
    }

    #[test]
    fn test_file_engine_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("test.db");
        {
            let engine = SqliteEngine::open(&path, 2, Duration::from_secs(1)).unwrap();
            engine.execute_batch("CREATE TABLE t (a INTEGER)").unwrap();
            engine.execute("INSERT INTO t (a) VALUES (?)", &[Value::Integer(3)]).unwrap();
        }
        let engine = SqliteEngine::open(&path, 2, Duration::from_secs(1)).unwrap();
        let rows = engine.query("SELECT a FROM t", &[]).unwrap();
        assert_eq!(rows.scalar(), Some(&Value::Integer(3)));
    }
}

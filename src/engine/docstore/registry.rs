//! Collection registry
//!
//! Maps collection names to their bound schemas. The map is shared by every
//! handle of a database and mirrored into the `_fractal_collections` table,
//! so a reopened file database can verify shapes declared by an earlier
//! process.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

use crate::engine::adapter::{Executor, StorageEngine, StorageError};

use super::error::Result;
use super::record::encode_timestamp;
use super::schema::{Field, Schema};
use super::value::Value;

/// Table holding one row per collection: name and schema JSON
pub const REGISTRY_TABLE: &str = "_fractal_collections";

#[derive(Debug, Default)]
pub struct CollectionRegistry {
    schemas: RwLock<BTreeMap<String, Arc<Schema>>>,
}

impl CollectionRegistry {
    /// Create the registry table if needed and load every persisted entry
    pub(crate) fn load(engine: &dyn StorageEngine) -> Result<Self> {
        engine.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                name TEXT PRIMARY KEY NOT NULL,
                schema TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            REGISTRY_TABLE
        ))?;

        let rows = engine.query(
            &format!("SELECT name, schema FROM {} ORDER BY name", REGISTRY_TABLE),
            &[],
        )?;

        let mut schemas = BTreeMap::new();
        for row in rows.rows {
            match (row.first(), row.get(1)) {
                (Some(Value::Text(name)), Some(Value::Text(raw))) => {
                    let schema: Schema = serde_json::from_str(raw)?;
                    schemas.insert(name.clone(), Arc::new(schema));
                }
                _ => {
                    return Err(StorageError::Decode {
                        column: "schema".to_string(),
                        reason: format!("malformed row in {}", REGISTRY_TABLE),
                    }
                    .into())
                }
            }
        }

        debug!(collections = schemas.len(), "loaded collection registry");
        Ok(Self {
            schemas: RwLock::new(schemas),
        })
    }

    pub fn get(&self, name: &str) -> Option<Arc<Schema>> {
        self.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    /// Registered names in sorted order
    pub fn names(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    /// Every `(collection, field)` whose reference points into `target`,
    /// including self-references
    pub fn referrers(&self, target: &str) -> Vec<(String, Field)> {
        self.read()
            .iter()
            .flat_map(|(name, schema)| {
                schema
                    .fields()
                    .iter()
                    .filter(|f| {
                        f.reference
                            .as_ref()
                            .map(|r| r.collection == target)
                            .unwrap_or(false)
                    })
                    .map(|f| (name.clone(), f.clone()))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Write the registry row for `name` through an open transaction
    pub(crate) fn persist(&self, exec: &dyn Executor, name: &str, schema: &Schema) -> Result<()> {
        let encoded = serde_json::to_string(schema)?;
        exec.execute(
            &format!(
                "INSERT INTO {} (name, schema, created_at) VALUES (?, ?, ?)",
                REGISTRY_TABLE
            ),
            &[
                Value::from(name),
                Value::Text(encoded),
                Value::Text(encode_timestamp(&chrono::Utc::now())),
            ],
        )?;
        Ok(())
    }

    pub(crate) fn unpersist(&self, exec: &dyn Executor, name: &str) -> Result<()> {
        exec.execute(
            &format!("DELETE FROM {} WHERE name = ?", REGISTRY_TABLE),
            &[Value::from(name)],
        )?;
        Ok(())
    }

    pub(crate) fn insert(&self, name: &str, schema: Arc<Schema>) {
        self.write().insert(name.to_string(), schema);
    }

    pub(crate) fn remove(&self, name: &str) -> Option<Arc<Schema>> {
        self.write().remove(name)
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, Arc<Schema>>> {
        self.schemas.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Arc<Schema>>> {
        self.schemas.write().unwrap_or_else(PoisonError::into_inner)
    }
}

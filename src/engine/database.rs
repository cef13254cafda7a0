//! FractalDB Database Module
//! Owns the storage engine and the collection registry

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::adapter::{SqliteEngine, StorageEngine};
use super::config::{Config, DatabaseConfig};
use super::docstore::collection::Collection;
use super::docstore::compiler::quote_ident;
use super::docstore::error::{FractalError, Result};
use super::docstore::registry::CollectionRegistry;
use super::docstore::resolver::{DeleteMode, ReferenceResolver};
use super::docstore::schema::Schema;

struct Inner {
    engine: Box<dyn StorageEngine>,
    registry: CollectionRegistry,
    scan_batch_size: usize,
}

/// Cheap-to-clone handle to one database. Collections hold a clone.
#[derive(Clone)]
pub struct Database {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("collections", &self.inner.registry.names())
            .field("scan_batch_size", &self.inner.scan_batch_size)
            .finish()
    }
}

impl Database {
    /// Open (or create) a database file with default settings
    pub fn open(db_path: &Path) -> Result<Self> {
        Self::open_with(db_path, &DatabaseConfig::default())
    }

    pub fn open_with(db_path: &Path, config: &DatabaseConfig) -> Result<Self> {
        let engine = SqliteEngine::open(
            db_path,
            config.pool_size,
            Duration::from_millis(config.busy_timeout_ms),
        )?;
        let db = Self::with_engine(Box::new(engine), config.scan_batch_size)?;
        info!(path = %db_path.display(), collections = db.collections().len(), "opened database");
        Ok(db)
    }

    /// Private database that lives as long as the handle
    pub fn in_memory() -> Result<Self> {
        Self::with_engine(
            Box::new(SqliteEngine::in_memory()?),
            DatabaseConfig::default().scan_batch_size,
        )
    }

    /// Open the database a project config describes. Relative paths
    /// resolve against `project_dir`.
    pub fn from_config(config: &Config, project_dir: &Path) -> Result<Self> {
        if config.is_in_memory() {
            return Self::with_engine(
                Box::new(SqliteEngine::in_memory()?),
                config.database.scan_batch_size,
            );
        }
        Self::open_with(&config.database_path(project_dir), &config.database)
    }

    /// Wrap an engine, loading any persisted collection registry
    pub fn with_engine(engine: Box<dyn StorageEngine>, scan_batch_size: usize) -> Result<Self> {
        let registry = CollectionRegistry::load(engine.as_ref())?;
        Ok(Self {
            inner: Arc::new(Inner {
                engine,
                registry,
                scan_batch_size: scan_batch_size.max(1),
            }),
        })
    }

    /// Bind `schema` to `name`. Creates the collection on first call;
    /// later calls must pass an identical schema and get the same
    /// collection back.
    pub fn collection(&self, name: &str, schema: Schema) -> Result<Collection> {
        Collection::create(self, name, schema)
    }

    /// Open a collection registered earlier, possibly by another process
    pub fn open_collection(&self, name: &str) -> Result<Collection> {
        Collection::open(self, name)
    }

    /// Registered collection names, sorted
    pub fn collections(&self) -> Vec<String> {
        self.inner.registry.names()
    }

    pub fn has_collection(&self, name: &str) -> bool {
        self.inner.registry.contains(name)
    }

    /// Drop a collection and its records. Under `Restrict` this fails while
    /// another collection declares a reference to it; under `Cascade` the
    /// referencing collections are dropped too, transitively. Returns the
    /// dropped names.
    pub fn drop_collection(&self, name: &str, mode: DeleteMode) -> Result<Vec<String>> {
        if !self.has_collection(name) {
            return Err(FractalError::NotFound(format!("collection '{}'", name)));
        }

        let resolver = self.resolver();
        let mut dropped: Vec<String> = Vec::new();
        self.engine().transaction(&mut |exec| {
            dropped.clear();
            let mut pending = vec![name.to_string()];
            while let Some(current) = pending.pop() {
                if dropped.contains(&current) {
                    continue;
                }
                for (referrer, field) in self.inner.registry.referrers(&current) {
                    if referrer == current || dropped.contains(&referrer) {
                        continue;
                    }
                    if mode == DeleteMode::Restrict {
                        let target_field = field
                            .reference
                            .as_ref()
                            .map(|r| r.field.clone())
                            .unwrap_or_default();
                        let dependents = resolver.count_inbound(
                            exec,
                            &current,
                            &referrer,
                            &field.name,
                            &target_field,
                        )?;
                        return Err(FractalError::ReferentialIntegrity {
                            target: current,
                            referrer,
                            dependents,
                        });
                    }
                    pending.push(referrer);
                }

                exec.execute(&format!("DROP TABLE IF EXISTS {}", quote_ident(&current)), &[])?;
                self.inner.registry.unpersist(exec, &current)?;
                dropped.push(current);
            }
            Ok(())
        })?;

        for victim in &dropped {
            self.inner.registry.remove(victim);
            info!(collection = %victim, "dropped collection");
        }
        Ok(dropped)
    }

    pub(crate) fn engine(&self) -> &dyn StorageEngine {
        self.inner.engine.as_ref()
    }

    pub(crate) fn registry(&self) -> &CollectionRegistry {
        &self.inner.registry
    }

    pub(crate) fn resolver(&self) -> ReferenceResolver<'_> {
        ReferenceResolver::new(&self.inner.registry)
    }

    pub(crate) fn scan_batch_size(&self) -> usize {
        self.inner.scan_batch_size
    }
}

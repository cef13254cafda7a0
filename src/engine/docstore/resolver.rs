//! Reference resolution between collections
//!
//! A reference field must point at the system key, the primary field or a
//! unique field of its target collection, with the same declared type.
//! Targets are checked when a schema is bound to a name, values are checked
//! on insert and update, and dependents are looked up on delete.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::engine::adapter::Executor;

use super::collection::load_record;
use super::compiler::quote_ident;
use super::error::{FractalError, Result};
use super::record::{Fields, Key, Record};
use super::registry::CollectionRegistry;
use super::schema::{Schema, KEY_FIELD};
use super::value::Value;

/// What to do with records that still reference a deleted target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteMode {
    /// Refuse the delete while dependents exist
    #[default]
    Restrict,
    /// Delete dependents too, transitively
    Cascade,
}

/// Records of one collection holding references to a given record
#[derive(Debug, Clone, PartialEq)]
pub struct Dependents {
    pub collection: String,
    pub field: String,
    pub keys: Vec<Key>,
}

pub struct ReferenceResolver<'a> {
    registry: &'a CollectionRegistry,
}

impl<'a> ReferenceResolver<'a> {
    pub fn new(registry: &'a CollectionRegistry) -> Self {
        Self { registry }
    }

    /// Resolve every reference declared by `schema`, about to be bound as
    /// `name`. A collection may reference itself.
    pub fn check_schema(&self, name: &str, schema: &Schema) -> Result<()> {
        for field in schema.fields() {
            let Some(reference) = &field.reference else {
                continue;
            };

            let registered: Arc<Schema>;
            let target: &Schema = if reference.collection == name {
                schema
            } else {
                registered = self.registry.get(&reference.collection).ok_or_else(|| {
                    FractalError::Schema(format!(
                        "field '{}': referenced collection '{}' does not exist",
                        field.name, reference.collection
                    ))
                })?;
                &registered
            };

            let target_type = target.field_type(&reference.field).ok_or_else(|| {
                FractalError::Schema(format!(
                    "field '{}': reference target {} does not exist",
                    field.name, reference
                ))
            })?;

            let keyed = reference.field == KEY_FIELD
                || target
                    .field(&reference.field)
                    .map(|f| f.unique)
                    .unwrap_or(false);
            if !keyed {
                return Err(FractalError::Schema(format!(
                    "field '{}': reference target {} is neither a key nor unique",
                    field.name, reference
                )));
            }

            if target_type != field.field_type {
                return Err(FractalError::Schema(format!(
                    "field '{}' is {} but reference target {} is {}",
                    field.name, field.field_type, reference, target_type
                )));
            }
        }
        Ok(())
    }

    /// Every non-null reference value in `row` must exist in its target
    pub(crate) fn verify_targets(
        &self,
        exec: &dyn Executor,
        record: usize,
        schema: &Schema,
        row: &Fields,
    ) -> Result<()> {
        for field in schema.fields() {
            let Some(reference) = &field.reference else {
                continue;
            };
            let value = match row.get(&field.name) {
                Some(value) if !value.is_null() => value,
                _ => continue,
            };

            let sql = format!(
                "SELECT 1 FROM {} WHERE {} = ? LIMIT 1",
                quote_ident(&reference.collection),
                quote_ident(&reference.field)
            );
            if exec.query(&sql, std::slice::from_ref(value))?.is_empty() {
                return Err(FractalError::Reference {
                    record,
                    field: field.name.clone(),
                    target_collection: reference.collection.clone(),
                    target_field: reference.field.clone(),
                    value: value.clone(),
                });
            }
        }
        Ok(())
    }

    /// Records that reference `record` of `collection`, grouped by
    /// referring collection and field. The record itself is excluded.
    pub fn dependents(
        &self,
        exec: &dyn Executor,
        collection: &str,
        record: &Record,
    ) -> Result<Vec<Dependents>> {
        let mut found = Vec::new();
        for (referrer, field) in self.registry.referrers(collection) {
            let Some(reference) = &field.reference else {
                continue;
            };
            let value = match record.value_of(&reference.field) {
                Some(value) if !value.is_null() => value,
                _ => continue,
            };

            let sql = format!(
                "SELECT {} FROM {} WHERE {} = ?",
                quote_ident(KEY_FIELD),
                quote_ident(&referrer),
                quote_ident(&field.name)
            );
            let keys: Vec<Key> = exec
                .query(&sql, &[value])?
                .rows
                .into_iter()
                .filter_map(|row| row.first().and_then(Key::from_value))
                .filter(|key| !(referrer == collection && *key == record.key))
                .collect();

            if !keys.is_empty() {
                found.push(Dependents {
                    collection: referrer,
                    field: field.name.clone(),
                    keys,
                });
            }
        }
        Ok(found)
    }

    /// Whether changing `field` of `record` would orphan dependents
    pub(crate) fn check_retarget(
        &self,
        exec: &dyn Executor,
        collection: &str,
        record: &Record,
        field: &str,
    ) -> Result<()> {
        for dependents in self.dependents(exec, collection, record)? {
            let targets_field = self
                .registry
                .get(&dependents.collection)
                .and_then(|schema| schema.field(&dependents.field).cloned())
                .and_then(|f| f.reference)
                .map(|r| r.field == field)
                .unwrap_or(false);
            if targets_field {
                warn!(collection, key = %record.key, field, "update blocked by dependents");
                return Err(FractalError::ReferentialIntegrity {
                    target: format!("{}/{}.{}", collection, record.key, field),
                    referrer: dependents.collection,
                    dependents: dependents.keys.len(),
                });
            }
        }
        Ok(())
    }

    /// Delete `record` from `collection`. Under `Cascade` every transitive
    /// dependent is collected first with a worklist, then all are deleted;
    /// the visited set breaks reference cycles. Returns the number of rows
    /// removed.
    pub(crate) fn remove(
        &self,
        exec: &dyn Executor,
        collection: &str,
        record: &Record,
        mode: DeleteMode,
    ) -> Result<usize> {
        let root = (collection.to_string(), record.key.clone());
        let mut visited: HashSet<(String, Key)> = HashSet::from([root.clone()]);
        let mut doomed = vec![root];
        let mut pending = vec![(collection.to_string(), record.clone())];

        while let Some((owner, current)) = pending.pop() {
            for dependents in self.dependents(exec, &owner, &current)? {
                if mode == DeleteMode::Restrict {
                    warn!(
                        collection = %owner,
                        key = %current.key,
                        referrer = %dependents.collection,
                        count = dependents.keys.len(),
                        "delete blocked by dependents"
                    );
                    return Err(FractalError::ReferentialIntegrity {
                        target: format!("{}/{}", owner, current.key),
                        referrer: dependents.collection,
                        dependents: dependents.keys.len(),
                    });
                }

                let schema = self.registry.get(&dependents.collection).ok_or_else(|| {
                    FractalError::NotFound(format!("collection '{}'", dependents.collection))
                })?;
                for key in dependents.keys {
                    let entry = (dependents.collection.clone(), key);
                    if !visited.insert(entry.clone()) {
                        continue;
                    }
                    if let Some(dependent) =
                        load_record(exec, &dependents.collection, &schema, &entry.1)?
                    {
                        pending.push((dependents.collection.clone(), dependent));
                        doomed.push(entry);
                    }
                }
            }
        }

        let mut removed = 0;
        for (owner, key) in doomed.iter().rev() {
            removed += exec.execute(
                &format!(
                    "DELETE FROM {} WHERE {} = ?",
                    quote_ident(owner),
                    quote_ident(KEY_FIELD)
                ),
                &[Value::Text(key.to_string())],
            )? as usize;
        }
        if removed > 1 {
            debug!(collection, key = %record.key, cascaded = removed - 1, "cascade delete");
        }
        Ok(removed)
    }

    /// Count of non-null references from `referrer.field` into rows of
    /// `collection`, used when clearing or dropping a whole collection
    pub(crate) fn count_inbound(
        &self,
        exec: &dyn Executor,
        collection: &str,
        referrer: &str,
        field: &str,
        target_field: &str,
    ) -> Result<usize> {
        let sql = format!(
            "SELECT COUNT(*) FROM {r} WHERE {f} IS NOT NULL AND {f} IN (SELECT {t} FROM {c})",
            r = quote_ident(referrer),
            f = quote_ident(field),
            t = quote_ident(target_field),
            c = quote_ident(collection)
        );
        let rows = exec.query(&sql, &[])?;
        Ok(rows.scalar().and_then(Value::as_i64).unwrap_or(0) as usize)
    }
}

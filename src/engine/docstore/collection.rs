//! Schema-bound collections over storage tables

use chrono::Utc;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::engine::adapter::{Executor, StorageEngine, StorageError};
use crate::engine::database::Database;

use super::compiler::quote_ident;
use super::error::{FractalError, Result, Violation};
use super::query::Query;
use super::record::{decode_timestamp, encode_timestamp, Fields, Key, Record};
use super::resolver::DeleteMode;
use super::schema::{validate_name, FieldType, Schema, CREATED_AT_FIELD, KEY_FIELD};
use super::value::Value;

/// A named, schema-typed storage container
#[derive(Clone)]
pub struct Collection {
    name: String,
    schema: Arc<Schema>,
    db: Database,
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.name)
            .field("schema", &self.schema)
            .finish()
    }
}

impl Collection {
    /// Bind `schema` to `name`, creating the table on first use. A name
    /// that is already registered must carry an identical schema.
    pub(crate) fn create(db: &Database, name: &str, schema: Schema) -> Result<Self> {
        validate_name("collection", name).map_err(FractalError::Schema)?;

        if let Some(existing) = db.registry().get(name) {
            if *existing != schema {
                warn!(collection = name, "collection reopened with a different schema");
                return Err(FractalError::Schema(format!(
                    "collection '{}' already exists with a different schema",
                    name
                )));
            }
            debug!(collection = name, "reusing registered collection");
            return Ok(Self {
                name: name.to_string(),
                schema: existing,
                db: db.clone(),
            });
        }

        db.resolver().check_schema(name, &schema)?;

        let ddl = create_table_sql(name, &schema);
        db.engine().transaction(&mut |exec| {
            for statement in &ddl {
                exec.execute(statement, &[])?;
            }
            db.registry().persist(exec, name, &schema)
        })?;

        let schema = Arc::new(schema);
        db.registry().insert(name, schema.clone());
        info!(collection = name, fields = schema.fields().len(), "created collection");

        Ok(Self {
            name: name.to_string(),
            schema,
            db: db.clone(),
        })
    }

    /// Open a registered collection
    pub(crate) fn open(db: &Database, name: &str) -> Result<Self> {
        let schema = db
            .registry()
            .get(name)
            .ok_or_else(|| FractalError::NotFound(format!("collection '{}'", name)))?;
        Ok(Self {
            name: name.to_string(),
            schema,
            db: db.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub(crate) fn engine(&self) -> &dyn StorageEngine {
        self.db.engine()
    }

    /// Insert one record, returning its key
    pub fn insert(&self, fields: Fields) -> Result<Key> {
        self.insert_many(std::iter::once(fields))?
            .into_iter()
            .next()
            .ok_or_else(|| FractalError::Internal("insert produced no key".to_string()))
    }

    /// Insert records atomically: either every record is stored or none is.
    /// Errors carry the zero-based index of the first offending record.
    pub fn insert_many<I>(&self, records: I) -> Result<Vec<Key>>
    where
        I: IntoIterator<Item = Fields>,
    {
        let rows = records
            .into_iter()
            .enumerate()
            .map(|(i, input)| self.schema.validate(i, &input))
            .collect::<Result<Vec<_>>>()?;
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let created_at = Value::Text(encode_timestamp(&Utc::now()));
        let sql = self.insert_sql();
        let resolver = self.db.resolver();
        let mut keys = Vec::with_capacity(rows.len());

        self.engine().transaction(&mut |exec| {
            keys.clear();
            for (i, row) in rows.iter().enumerate() {
                let key = self.key_for(i, row)?;
                self.check_unique(exec, i, row, None)?;

                let mut params = Vec::with_capacity(row.len() + 2);
                params.push(Value::Text(key.to_string()));
                params.push(created_at.clone());
                params.extend(row.iter().map(|(_, v)| v.clone()));
                exec.execute(&sql, &params)?;

                // After the row is written so a record may reference itself
                resolver.verify_targets(exec, i, &self.schema, row)?;
                keys.push(key.clone());
            }
            Ok(())
        })?;

        debug!(collection = %self.name, count = keys.len(), "inserted records");
        Ok(keys)
    }

    /// Insert a JSON object or an array of objects
    pub fn insert_json(&self, data: &serde_json::Value) -> Result<Vec<Key>> {
        match data {
            serde_json::Value::Array(items) => {
                let mut records = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    records.push(Fields::from_json(item).map_err(|e| reindex(e, i))?);
                }
                self.insert_many(records)
            }
            other => Ok(vec![self.insert(Fields::from_json(other)?)?]),
        }
    }

    /// Get a record by key
    pub fn get(&self, key: impl Into<Key>) -> Result<Record> {
        let key = key.into();
        load_record(self.engine(), &self.name, &self.schema, &key)?
            .ok_or_else(|| FractalError::NotFound(format!("{}/{}", self.name, key)))
    }

    /// Delete a record, refusing while other records reference it.
    /// Returns false when the key does not exist.
    pub fn delete(&self, key: impl Into<Key>) -> Result<bool> {
        self.delete_with(key, DeleteMode::Restrict)
    }

    /// Delete a record with an explicit policy for dependents
    pub fn delete_with(&self, key: impl Into<Key>, mode: DeleteMode) -> Result<bool> {
        let key = key.into();
        let resolver = self.db.resolver();
        let mut removed = 0;

        self.engine().transaction(&mut |exec| {
            removed = 0;
            let Some(record) = load_record(exec, &self.name, &self.schema, &key)? else {
                return Ok(());
            };
            removed = resolver.remove(exec, &self.name, &record, mode)?;
            Ok(())
        })?;

        debug!(collection = %self.name, key = %key, removed, "delete");
        Ok(removed > 0)
    }

    /// Apply a partial update and return the updated record.
    /// Key and system fields are immutable.
    pub fn update(&self, key: impl Into<Key>, patch: Fields) -> Result<Record> {
        let key = key.into();
        let checked = self.schema.validate_patch(&patch)?;
        let resolver = self.db.resolver();
        let mut updated = None;

        self.engine().transaction(&mut |exec| {
            let current = load_record(exec, &self.name, &self.schema, &key)?
                .ok_or_else(|| FractalError::NotFound(format!("{}/{}", self.name, key)))?;

            let mut fields = current.fields.clone();
            for (name, value) in checked.iter() {
                if current.get(name) != Some(value) {
                    resolver.check_retarget(exec, &self.name, &current, name)?;
                }
                fields.insert(name, value.clone());
            }
            self.check_unique(exec, 0, &checked, Some(&key))?;
            resolver.verify_targets(exec, 0, &self.schema, &checked)?;

            if !checked.is_empty() {
                let assignments = checked
                    .names()
                    .map(|n| format!("{} = ?", quote_ident(n)))
                    .collect::<Vec<_>>()
                    .join(", ");
                let mut params: Vec<Value> = checked.iter().map(|(_, v)| v.clone()).collect();
                params.push(Value::Text(key.to_string()));
                exec.execute(
                    &format!(
                        "UPDATE {} SET {} WHERE {} = ?",
                        quote_ident(&self.name),
                        assignments,
                        quote_ident(KEY_FIELD)
                    ),
                    &params,
                )?;
            }

            updated = Some(Record {
                key: current.key.clone(),
                created_at: current.created_at,
                fields,
            });
            Ok(())
        })?;

        debug!(collection = %self.name, key = %key, fields = checked.len(), "updated record");
        updated.ok_or_else(|| FractalError::NotFound(format!("{}/{}", self.name, key)))
    }

    /// Every record in insertion order, read lazily in pages.
    /// Each call starts a fresh scan.
    pub fn all(&self) -> Records {
        Records {
            collection: self.clone(),
            after: 0,
            page: VecDeque::new(),
            exhausted: false,
        }
    }

    pub fn count(&self) -> Result<u64> {
        self.query().count()
    }

    /// Remove every record. Fails while another collection references
    /// any of them.
    pub fn clear(&self) -> Result<u64> {
        let resolver = self.db.resolver();
        let referrers = self.db.registry().referrers(&self.name);
        let mut removed = 0;

        self.engine().transaction(&mut |exec| {
            for (referrer, field) in &referrers {
                if *referrer == self.name {
                    continue;
                }
                let Some(reference) = &field.reference else {
                    continue;
                };
                let inbound =
                    resolver.count_inbound(exec, &self.name, referrer, &field.name, &reference.field)?;
                if inbound > 0 {
                    warn!(collection = %self.name, referrer = %referrer, inbound, "clear blocked by dependents");
                    return Err(FractalError::ReferentialIntegrity {
                        target: self.name.clone(),
                        referrer: referrer.clone(),
                        dependents: inbound,
                    });
                }
            }
            removed = exec.execute(&format!("DELETE FROM {}", quote_ident(&self.name)), &[])?;
            Ok(())
        })?;

        info!(collection = %self.name, removed, "cleared collection");
        Ok(removed)
    }

    /// Distinct values of a field, in ascending order
    pub fn distinct(&self, field: &str) -> Result<Vec<Value>> {
        self.query().distinct(field)
    }

    pub fn sum(&self, field: &str) -> Result<Value> {
        self.query().sum(field)
    }

    pub fn avg(&self, field: &str) -> Result<Value> {
        self.query().avg(field)
    }

    pub fn min(&self, field: &str) -> Result<Value> {
        self.query().min(field)
    }

    pub fn max(&self, field: &str) -> Result<Value> {
        self.query().max(field)
    }

    /// Start a query over this collection
    pub fn query(&self) -> Query<'_> {
        Query::new(self, None)
    }

    /// Start a query whose fluent calls default to `field`
    pub fn query_on(&self, field: &str) -> Query<'_> {
        Query::new(self, Some(field.to_string()))
    }

    fn insert_sql(&self) -> String {
        let columns = self.schema.columns();
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(&self.name),
            columns.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", "),
            vec!["?"; columns.len()].join(", ")
        )
    }

    fn key_for(&self, record: usize, row: &Fields) -> Result<Key> {
        match self.schema.primary() {
            Some(primary) => row
                .get(&primary.name)
                .and_then(Key::from_value)
                .ok_or_else(|| FractalError::constraint(record, &primary.name, Violation::NotNullable)),
            None => Ok(Key::generate()),
        }
    }

    /// Unique fields must not collide with any other stored record
    fn check_unique(
        &self,
        exec: &dyn Executor,
        record: usize,
        row: &Fields,
        current: Option<&Key>,
    ) -> Result<()> {
        for field in self.schema.fields().iter().filter(|f| f.unique) {
            let value = match row.get(&field.name) {
                Some(value) if !value.is_null() => value,
                _ => continue,
            };
            let sql = format!(
                "SELECT {} FROM {} WHERE {} = ? LIMIT 1",
                quote_ident(KEY_FIELD),
                quote_ident(&self.name),
                quote_ident(&field.name)
            );
            let holder = exec
                .query(&sql, std::slice::from_ref(value))?
                .scalar()
                .and_then(Key::from_value);
            if let Some(holder) = holder {
                if current != Some(&holder) {
                    return Err(FractalError::constraint(
                        record,
                        &field.name,
                        Violation::Duplicate(value.clone()),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Lazy scan over a collection in insertion order
pub struct Records {
    collection: Collection,
    after: i64,
    page: VecDeque<Record>,
    exhausted: bool,
}

impl Records {
    fn fill(&mut self) -> Result<()> {
        let batch = self.collection.db.scan_batch_size().max(1);
        let schema = &self.collection.schema;
        let sql = format!(
            "SELECT rowid, {} FROM {} WHERE rowid > ? ORDER BY rowid LIMIT ?",
            select_list(schema),
            quote_ident(&self.collection.name)
        );
        let rows = self
            .collection
            .engine()
            .query(&sql, &[Value::Integer(self.after), Value::Integer(batch as i64)])?;

        if rows.len() < batch {
            self.exhausted = true;
        }
        for mut row in rows.rows {
            if row.is_empty() {
                continue;
            }
            if let Some(rowid) = row.remove(0).as_i64() {
                self.after = rowid;
            }
            self.page.push_back(decode_row(schema, row)?);
        }
        Ok(())
    }
}

impl Iterator for Records {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.page.is_empty() && !self.exhausted {
            if let Err(e) = self.fill() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }
        self.page.pop_front().map(Ok)
    }
}

/// Table DDL followed by one index per non-unique reference column
fn create_table_sql(name: &str, schema: &Schema) -> Vec<String> {
    let mut columns = vec![
        format!("{} TEXT PRIMARY KEY NOT NULL", quote_ident(KEY_FIELD)),
        format!("{} TEXT NOT NULL", quote_ident(CREATED_AT_FIELD)),
    ];
    for field in schema.fields() {
        let mut column = format!("{} {}", quote_ident(&field.name), field.field_type.sql_type());
        if !field.nullable {
            column.push_str(" NOT NULL");
        }
        if field.unique {
            column.push_str(" UNIQUE");
        }
        columns.push(column);
    }

    let mut ddl = vec![format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote_ident(name),
        columns.join(", ")
    )];
    for field in schema.fields() {
        if field.reference.is_some() && !field.unique {
            ddl.push(format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
                quote_ident(&reference_index_name(name, &field.name)),
                quote_ident(name),
                quote_ident(&field.name)
            ));
        }
    }
    ddl
}

/// Collection and field names never contain '.', so this cannot collide
fn reference_index_name(collection: &str, field: &str) -> String {
    format!("_ref_{}.{}", collection, field)
}

/// Quoted column list in table order
pub(crate) fn select_list(schema: &Schema) -> String {
    schema
        .columns()
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load one record by key through `exec`
pub(crate) fn load_record<E>(exec: &E, name: &str, schema: &Schema, key: &Key) -> Result<Option<Record>>
where
    E: Executor + ?Sized,
{
    let sql = format!(
        "SELECT {} FROM {} WHERE {} = ?",
        select_list(schema),
        quote_ident(name),
        quote_ident(KEY_FIELD)
    );
    let rows = exec.query(&sql, &[Value::Text(key.to_string())])?;
    match rows.rows.into_iter().next() {
        Some(row) => Ok(Some(decode_row(schema, row)?)),
        None => Ok(None),
    }
}

/// Decode a row selected with `select_list`, retagging values by the
/// declared field types
pub(crate) fn decode_row(schema: &Schema, row: Vec<Value>) -> Result<Record> {
    let mut values = row.into_iter();

    let key = values
        .next()
        .as_ref()
        .and_then(Key::from_value)
        .ok_or_else(|| decode_error(KEY_FIELD, "missing key".to_string()))?;

    let created_at = match values.next() {
        Some(Value::Text(raw)) => decode_timestamp(&raw)
            .ok_or_else(|| decode_error(CREATED_AT_FIELD, format!("bad timestamp '{}'", raw)))?,
        _ => return Err(decode_error(CREATED_AT_FIELD, "missing timestamp".to_string())),
    };

    let mut fields = Fields::new();
    for field in schema.fields() {
        let raw = values.next().unwrap_or(Value::Null);
        fields.insert(&field.name, retag(field.field_type, raw));
    }

    Ok(Record {
        key,
        created_at,
        fields,
    })
}

/// Booleans are stored as 0/1; float columns may hand back integers
pub(crate) fn retag(field_type: FieldType, value: Value) -> Value {
    match (field_type, value) {
        (FieldType::Boolean, Value::Integer(i)) => Value::Boolean(i != 0),
        (FieldType::Float, Value::Integer(i)) => Value::Float(i as f64),
        (_, value) => value,
    }
}

fn decode_error(column: &str, reason: String) -> FractalError {
    StorageError::Decode {
        column: column.to_string(),
        reason,
    }
    .into()
}

/// Point a single-record JSON error at its position in a batch
fn reindex(error: FractalError, index: usize) -> FractalError {
    match error {
        FractalError::Constraint {
            field, violation, ..
        } => FractalError::Constraint {
            record: index,
            field,
            violation,
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::adapter::SqliteEngine;
    use crate::engine::docstore::condition::condition;
    use crate::engine::docstore::schema::{Field, Reference};

    fn people(db: &Database) -> Collection {
        db.collection(
            "people",
            Schema::build(vec![
                Field::text("name").not_null(),
                Field::integer("age").not_null(),
                Field::boolean("active").default_value(true),
                Field::float("score"),
            ])
            .unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_insert_and_get() {
        let db = Database::in_memory().unwrap();
        let people = people(&db);

        let before = Utc::now();
        let key = people
            .insert(Fields::new().with("name", "Alice").with("age", 25).with("score", 4))
            .unwrap();
        assert_eq!(key.as_str().len(), 32);

        let record = people.get(&key).unwrap();
        assert_eq!(record.get("name"), Some(&Value::from("Alice")));
        assert_eq!(record.get("active"), Some(&Value::Boolean(true)));
        assert_eq!(record.get("score"), Some(&Value::Float(4.0)));
        assert!(record.created_at >= before);

        assert!(matches!(people.get("missing"), Err(FractalError::NotFound(_))));
    }

    #[test]
    fn test_batch_is_atomic() {
        let db = Database::in_memory().unwrap();
        let people = people(&db);

        let err = people
            .insert_many(vec![
                Fields::new().with("name", "Alice").with("age", 25),
                Fields::new().with("name", "Bob"),
            ])
            .unwrap_err();
        assert!(matches!(
            err,
            FractalError::Constraint { record: 1, violation: Violation::Missing, .. }
        ));
        assert_eq!(people.count().unwrap(), 0);
    }

    #[test]
    fn test_unique_rolls_back_batch() {
        let db = Database::in_memory().unwrap();
        let users = db
            .collection(
                "users",
                Schema::build(vec![Field::text("email").unique().not_null()]).unwrap(),
            )
            .unwrap();

        users.insert(Fields::new().with("email", "a@x")).unwrap();
        let err = users
            .insert_many(vec![
                Fields::new().with("email", "b@x"),
                Fields::new().with("email", "b@x"),
            ])
            .unwrap_err();
        assert!(matches!(
            err,
            FractalError::Constraint { record: 1, violation: Violation::Duplicate(_), .. }
        ));
        assert_eq!(users.count().unwrap(), 1);
    }

    #[test]
    fn test_primary_field_is_key() {
        let db = Database::in_memory().unwrap();
        let tags = db
            .collection(
                "tags",
                Schema::build(vec![Field::text("slug").primary(), Field::text("label")]).unwrap(),
            )
            .unwrap();

        let key = tags.insert(Fields::new().with("slug", "rust").with("label", "Rust")).unwrap();
        assert_eq!(key.as_str(), "rust");
        assert!(tags.insert(Fields::new().with("slug", "rust")).is_err());
        assert!(tags.update("rust", Fields::new().with("slug", "go")).is_err());
    }

    #[test]
    fn test_all_pages_in_insertion_order() {
        let db = Database::with_engine(Box::new(SqliteEngine::in_memory().unwrap()), 2).unwrap();
        let people = people(&db);
        let names = ["a", "b", "c", "d", "e"];
        for (i, name) in names.iter().enumerate() {
            people
                .insert(Fields::new().with("name", *name).with("age", i as i64))
                .unwrap();
        }

        let scanned: Vec<String> = people
            .all()
            .map(|r| r.unwrap().get("name").and_then(Value::as_str).unwrap().to_string())
            .collect();
        assert_eq!(scanned, names);

        // Fresh read each call
        people.insert(Fields::new().with("name", "f").with("age", 9)).unwrap();
        assert_eq!(people.all().count(), 6);
    }

    #[test]
    fn test_delete() {
        let db = Database::in_memory().unwrap();
        let people = people(&db);
        let key = people.insert(Fields::new().with("name", "A").with("age", 1)).unwrap();

        assert!(people.delete(&key).unwrap());
        assert!(!people.delete(&key).unwrap());
        assert_eq!(people.count().unwrap(), 0);
    }

    #[test]
    fn test_update() {
        let db = Database::in_memory().unwrap();
        let people = people(&db);
        let key = people.insert(Fields::new().with("name", "A").with("age", 1)).unwrap();

        let updated = people.update(&key, Fields::new().with("age", 2)).unwrap();
        assert_eq!(updated.get("age"), Some(&Value::Integer(2)));
        assert_eq!(people.get(&key).unwrap(), updated);

        assert!(people.update(&key, Fields::new().with("age", "two")).is_err());
        assert!(people.update(&key, Fields::new().with("_created_at", "x")).is_err());
        assert!(matches!(
            people.update("nope", Fields::new().with("age", 3)),
            Err(FractalError::NotFound(_))
        ));
    }

    #[test]
    fn test_references() {
        let db = Database::in_memory().unwrap();
        let users = db
            .collection("users", Schema::build(vec![Field::text("name")]).unwrap())
            .unwrap();
        let posts = db
            .collection(
                "posts",
                Schema::build(vec![
                    Field::text("author").not_null().references(Reference::to("users")),
                    Field::text("title"),
                ])
                .unwrap(),
            )
            .unwrap();

        let alice = users.insert(Fields::new().with("name", "Alice")).unwrap();
        let post = posts
            .insert(Fields::new().with("author", alice.as_str()).with("title", "Hi"))
            .unwrap();

        let err = posts
            .insert(Fields::new().with("author", "ghost"))
            .unwrap_err();
        assert!(matches!(err, FractalError::Reference { record: 0, .. }));

        assert!(matches!(
            users.delete(&alice),
            Err(FractalError::ReferentialIntegrity { dependents: 1, .. })
        ));
        assert!(matches!(
            users.clear(),
            Err(FractalError::ReferentialIntegrity { .. })
        ));

        assert!(users.delete_with(&alice, DeleteMode::Cascade).unwrap());
        assert!(matches!(posts.get(&post), Err(FractalError::NotFound(_))));
        assert_eq!(users.count().unwrap(), 0);
    }

    #[test]
    fn test_unresolved_reference_fails_at_bind() {
        let field = Field::define(
            "owner",
            FieldType::Text,
            true,
            None,
            false,
            Some(Reference::to("accounts")),
        )
        .unwrap();
        let schema = Schema::build(vec![field]).unwrap();

        let db = Database::in_memory().unwrap();
        assert!(matches!(
            db.collection("items", schema),
            Err(FractalError::Schema(_))
        ));
        assert!(!db.has_collection("items"));
    }

    #[test]
    fn test_reference_columns_are_indexed() {
        let db = Database::in_memory().unwrap();
        db.collection("users", Schema::build(vec![Field::text("name")]).unwrap())
            .unwrap();
        db.collection(
            "posts",
            Schema::build(vec![
                Field::text("author").references(Reference::to("users")),
                Field::text("title"),
            ])
            .unwrap(),
        )
        .unwrap();

        let rows = db
            .engine()
            .query(
                "SELECT name FROM sqlite_master WHERE type = 'index' AND tbl_name = ? AND sql IS NOT NULL",
                &[Value::from("posts")],
            )
            .unwrap();
        assert_eq!(rows.rows, vec![vec![Value::from("_ref_posts.author")]]);
    }

    #[test]
    fn test_deep_cascade_chain() {
        let db = Database::in_memory().unwrap();
        let nodes = db
            .collection(
                "nodes",
                Schema::build(vec![
                    Field::integer("depth").not_null(),
                    Field::text("parent").references(Reference::to("nodes")),
                ])
                .unwrap(),
            )
            .unwrap();

        let root = nodes.insert(Fields::new().with("depth", 0)).unwrap();
        let mut parent = root.clone();
        for depth in 1..5_000 {
            parent = nodes
                .insert(Fields::new().with("depth", depth).with("parent", parent.as_str()))
                .unwrap();
        }
        assert_eq!(nodes.count().unwrap(), 5_000);

        assert!(matches!(
            nodes.delete(&root),
            Err(FractalError::ReferentialIntegrity { dependents: 1, .. })
        ));
        assert_eq!(nodes.count().unwrap(), 5_000);

        assert!(nodes.delete_with(&root, DeleteMode::Cascade).unwrap());
        assert_eq!(nodes.count().unwrap(), 0);
    }

    #[test]
    fn test_self_reference_cascade() {
        let db = Database::in_memory().unwrap();
        let nodes = db
            .collection(
                "nodes",
                Schema::build(vec![
                    Field::text("label"),
                    Field::text("parent").references(Reference::to("nodes")),
                ])
                .unwrap(),
            )
            .unwrap();

        let root = nodes.insert(Fields::new().with("label", "root")).unwrap();
        let child = nodes
            .insert(Fields::new().with("label", "child").with("parent", root.as_str()))
            .unwrap();
        nodes
            .insert(Fields::new().with("label", "leaf").with("parent", child.as_str()))
            .unwrap();

        assert!(nodes.delete(&root).is_err());
        assert!(nodes.delete_with(&root, DeleteMode::Cascade).unwrap());
        assert_eq!(nodes.count().unwrap(), 0);
    }

    #[test]
    fn test_insert_json() {
        let db = Database::in_memory().unwrap();
        let people = people(&db);
        let keys = people
            .insert_json(&serde_json::json!([
                {"name": "Alice", "age": 25},
                {"name": "Bob", "age": 30, "active": false}
            ]))
            .unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(people.get(&keys[1]).unwrap().get("active"), Some(&Value::Boolean(false)));

        let err = people
            .insert_json(&serde_json::json!([{"name": "C", "age": 1}, {"name": ["x"]}]))
            .unwrap_err();
        assert!(matches!(err, FractalError::Constraint { record: 1, .. }));
    }

    #[test]
    fn test_aggregates_and_distinct() {
        let db = Database::in_memory().unwrap();
        let people = people(&db);
        for (name, age) in [("A", 20), ("B", 30), ("C", 30)] {
            people.insert(Fields::new().with("name", name).with("age", age)).unwrap();
        }

        assert_eq!(people.sum("age").unwrap(), Value::Integer(80));
        assert_eq!(people.min("age").unwrap(), Value::Integer(20));
        assert_eq!(people.max("name").unwrap(), Value::from("C"));
        assert_eq!(people.distinct("age").unwrap(), vec![Value::Integer(20), Value::Integer(30)]);
        assert_eq!(
            people.query().filter(condition("age").gt(25)).count().unwrap(),
            2
        );
        assert_eq!(people.clear().unwrap(), 3);
        assert_eq!(people.avg("age").unwrap(), Value::Null);
    }
}

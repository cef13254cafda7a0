//! Typed field and schema definitions for collections
//!
//! Schemas are immutable once built. Every stored row also carries the
//! two system columns `_key` and `_created_at`, which are not part of the
//! declared field list but can be filtered and sorted on.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use super::error::{FractalError, Result, Violation};
use super::record::Fields;
use super::value::Value;

/// System column holding the record key
pub const KEY_FIELD: &str = "_key";

/// System column holding the creation timestamp
pub const CREATED_AT_FIELD: &str = "_created_at";

/// Declared field types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum FieldType {
    Integer,
    Float,
    Text,
    Boolean,
}

impl FieldType {
    /// Column type used in the storage table
    pub fn sql_type(&self) -> &'static str {
        match self {
            FieldType::Integer => "INTEGER",
            FieldType::Float => "REAL",
            FieldType::Text => "TEXT",
            FieldType::Boolean => "BOOLEAN",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FieldType::Integer => "integer",
            FieldType::Float => "float",
            FieldType::Text => "text",
            FieldType::Boolean => "boolean",
        }
    }

    /// Whether a non-null value may be stored in a field of this type.
    /// Integers widen into float fields.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (FieldType::Integer, Value::Integer(_)) => true,
            (FieldType::Float, Value::Float(f)) => f.is_finite(),
            (FieldType::Float, Value::Integer(_)) => true,
            (FieldType::Text, Value::Text(_)) => true,
            (FieldType::Boolean, Value::Boolean(_)) => true,
            _ => false,
        }
    }

    /// Normalize an accepted value to this type's tag
    pub(crate) fn coerce(&self, value: Value) -> Value {
        match (self, value) {
            (FieldType::Float, Value::Integer(i)) => Value::Float(i as f64),
            (_, v) => v,
        }
    }

    pub(crate) fn of(value: &Value) -> Option<Self> {
        match value {
            Value::Integer(_) => Some(FieldType::Integer),
            Value::Float(_) => Some(FieldType::Float),
            Value::Text(_) => Some(FieldType::Text),
            Value::Boolean(_) => Some(FieldType::Boolean),
            Value::Null => None,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Foreign-key style reference to a field of another collection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reference {
    pub collection: String,
    pub field: String,
}

impl Reference {
    /// Reference the system key of `collection`
    pub fn to(collection: &str) -> Self {
        Self {
            collection: collection.to_string(),
            field: KEY_FIELD.to_string(),
        }
    }

    /// Reference a specific (unique) field of `collection`
    pub fn to_field(collection: &str, field: &str) -> Self {
        Self {
            collection: collection.to_string(),
            field: field.to_string(),
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.collection, self.field)
    }
}

fn default_true() -> bool {
    true
}

/// Field definition in a schema
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Field {
    pub name: String,

    #[serde(rename = "type")]
    pub field_type: FieldType,

    #[serde(default = "default_true")]
    pub nullable: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    #[serde(default)]
    pub unique: bool,

    #[serde(default)]
    pub primary: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<Reference>,
}

impl Field {
    /// Nullable field with no default, constraint or reference
    pub fn new(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            nullable: true,
            default: None,
            unique: false,
            primary: false,
            reference: None,
        }
    }

    pub fn integer(name: &str) -> Self {
        Self::new(name, FieldType::Integer)
    }

    pub fn float(name: &str) -> Self {
        Self::new(name, FieldType::Float)
    }

    pub fn text(name: &str) -> Self {
        Self::new(name, FieldType::Text)
    }

    pub fn boolean(name: &str) -> Self {
        Self::new(name, FieldType::Boolean)
    }

    /// Define a field with every attribute at once, validating it.
    ///
    /// A reference is only checked for shape here. Whether its target
    /// collection and field exist is resolved when the schema is bound to
    /// a name with `Database::collection`, which fails with
    /// `FractalError::Schema` for an unresolved target.
    pub fn define(
        name: &str,
        field_type: FieldType,
        nullable: bool,
        default: Option<Value>,
        unique: bool,
        reference: Option<Reference>,
    ) -> Result<Self> {
        let field = Self {
            name: name.to_string(),
            field_type,
            nullable,
            default,
            unique,
            primary: false,
            reference,
        };
        field.check()?;
        Ok(field)
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Mark as the collection's key field. Implies unique and not null.
    pub fn primary(mut self) -> Self {
        self.primary = true;
        self.unique = true;
        self.nullable = false;
        self
    }

    pub fn references(mut self, reference: Reference) -> Self {
        self.reference = Some(reference);
        self
    }

    /// Validate everything that can be checked without other collections
    fn check(&self) -> Result<()> {
        validate_field_name(&self.name)?;

        if let Some(default) = &self.default {
            if default.is_null() {
                return Err(FractalError::Schema(format!(
                    "field '{}': null is not a valid default, leave the default unset",
                    self.name
                )));
            }
            if !self.field_type.accepts(default) {
                return Err(FractalError::Schema(format!(
                    "field '{}': default {} does not match type {}",
                    self.name, default, self.field_type
                )));
            }
        }

        if self.primary {
            if !matches!(self.field_type, FieldType::Integer | FieldType::Text) {
                return Err(FractalError::Schema(format!(
                    "field '{}': primary field must be integer or text",
                    self.name
                )));
            }
            if self.nullable || self.default.is_some() {
                return Err(FractalError::Schema(format!(
                    "field '{}': primary field must be non-nullable without a default",
                    self.name
                )));
            }
        }

        if let Some(reference) = &self.reference {
            if reference.collection.is_empty() || reference.field.is_empty() {
                return Err(FractalError::Schema(format!(
                    "field '{}': reference must name a collection and a field",
                    self.name
                )));
            }
        }

        Ok(())
    }
}

/// Ordered, immutable set of fields
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    /// Build a schema, checking names, defaults and the primary field
    pub fn build(fields: impl IntoIterator<Item = Field>) -> Result<Self> {
        let fields: Vec<Field> = fields.into_iter().collect();
        let mut seen = HashSet::new();
        let mut primaries = 0;

        for field in &fields {
            field.check()?;
            if !seen.insert(field.name.as_str()) {
                return Err(FractalError::Schema(format!(
                    "duplicate field name '{}'",
                    field.name
                )));
            }
            if field.primary {
                primaries += 1;
            }
        }

        if primaries > 1 {
            return Err(FractalError::Schema(
                "at most one field may be marked primary".to_string(),
            ));
        }

        Ok(Self { fields })
    }

    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    /// Infer a schema from a sample record. Every field is nullable.
    pub fn from_sample(sample: &Fields) -> Result<Self> {
        let mut fields = Vec::with_capacity(sample.len());
        for (name, value) in sample.iter() {
            let field_type = FieldType::of(value).ok_or_else(|| {
                FractalError::Schema(format!("cannot infer a type for null field '{}'", name))
            })?;
            fields.push(Field::new(name, field_type));
        }
        Self::build(fields)
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// The explicitly declared key field, if any
    pub fn primary(&self) -> Option<&Field> {
        self.fields.iter().find(|f| f.primary)
    }

    /// Type of a declared field or system column
    pub fn field_type(&self, name: &str) -> Option<FieldType> {
        match name {
            KEY_FIELD | CREATED_AT_FIELD => Some(FieldType::Text),
            _ => self.field(name).map(|f| f.field_type),
        }
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field_type(name).is_some()
    }

    /// Stored columns in table order: system columns first
    pub fn columns(&self) -> Vec<&str> {
        let mut columns = vec![KEY_FIELD, CREATED_AT_FIELD];
        columns.extend(self.fields.iter().map(|f| f.name.as_str()));
        columns
    }

    /// Validate an insert input and produce the full row in schema order,
    /// with defaults applied and values normalized to their field types
    pub fn validate(&self, record: usize, input: &Fields) -> Result<Fields> {
        for name in input.names() {
            if self.field(name).is_none() {
                return Err(FractalError::constraint(record, name, Violation::UnknownField));
            }
        }

        let mut row = Fields::new();
        for field in &self.fields {
            let value = match input.get(&field.name) {
                Some(value) => value.clone(),
                None => match &field.default {
                    Some(default) => default.clone(),
                    None if field.nullable => Value::Null,
                    None => {
                        return Err(FractalError::constraint(
                            record,
                            &field.name,
                            Violation::Missing,
                        ))
                    }
                },
            };
            row.insert(&field.name, check_value(record, field, value)?);
        }
        Ok(row)
    }

    /// Validate a partial update. Only the supplied fields are checked.
    pub fn validate_patch(&self, patch: &Fields) -> Result<Fields> {
        let mut checked = Fields::new();
        for (name, value) in patch.iter() {
            if name == KEY_FIELD || name == CREATED_AT_FIELD {
                return Err(FractalError::constraint(0, name, Violation::Immutable));
            }
            let field = self
                .field(name)
                .ok_or_else(|| FractalError::constraint(0, name, Violation::UnknownField))?;
            if field.primary {
                return Err(FractalError::constraint(0, name, Violation::Immutable));
            }
            checked.insert(name, check_value(0, field, value.clone())?);
        }
        Ok(checked)
    }
}

/// Tag check of one value against its field
fn check_value(record: usize, field: &Field, value: Value) -> Result<Value> {
    if value.is_null() {
        if field.nullable {
            return Ok(value);
        }
        return Err(FractalError::constraint(record, &field.name, Violation::NotNullable));
    }
    if !field.field_type.accepts(&value) {
        return Err(FractalError::constraint(
            record,
            &field.name,
            Violation::TypeMismatch {
                expected: field.field_type.name().to_string(),
                found: match value {
                    Value::Float(f) if !f.is_finite() => format!("non-finite float {}", f),
                    _ => value.type_name().to_string(),
                },
            },
        ));
    }
    Ok(field.field_type.coerce(value))
}

/// Incremental schema construction
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    fields: Vec<Field>,
}

impl SchemaBuilder {
    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    pub fn build(self) -> Result<Schema> {
        Schema::build(self.fields)
    }
}

/// Field and collection names: ASCII letters, digits and underscores,
/// starting with a letter. Leading underscores are reserved.
pub(crate) fn validate_name(kind: &str, name: &str) -> std::result::Result<(), String> {
    if name.is_empty() {
        return Err(format!("{} name cannot be empty", kind));
    }
    if name.starts_with('_') {
        return Err(format!("{} name '{}' cannot start with underscore", kind, name));
    }
    let mut chars = name.chars();
    if !chars.next().map(|c| c.is_ascii_alphabetic()).unwrap_or(false) {
        return Err(format!("{} name '{}' must start with a letter", kind, name));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(format!("{} name '{}' must be alphanumeric", kind, name));
    }
    // Implicit rowid aliases; scans page on rowid
    if ["rowid", "oid"].iter().any(|r| name.eq_ignore_ascii_case(r)) {
        return Err(format!("{} name '{}' is reserved", kind, name));
    }
    Ok(())
}

fn validate_field_name(name: &str) -> Result<()> {
    validate_name("field", name).map_err(FractalError::Schema)
}

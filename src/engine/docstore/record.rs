//! Records and their field containers

use chrono::{DateTime, Utc};
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde::Deserialize;
use std::fmt;
use uuid::Uuid;

use super::error::{FractalError, Result, Violation};
use super::schema::{CREATED_AT_FIELD, KEY_FIELD};
use super::value::Value;

/// Unique record key.
///
/// Generated keys are 32 lowercase hex characters (UUID v4). Collections
/// with a declared primary field use that field's value instead.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, Deserialize)]
#[serde(transparent)]
pub struct Key(String);

impl Key {
    pub fn generate() -> Self {
        Key(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key derived from a primary field value
    pub(crate) fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Text(s) => Some(Key(s.clone())),
            Value::Integer(i) => Some(Key(i.to_string())),
            _ => None,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Key {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key(s)
    }
}

impl From<&Key> for Key {
    fn from(k: &Key) -> Self {
        k.clone()
    }
}

impl From<i64> for Key {
    fn from(i: i64) -> Self {
        Key(i.to_string())
    }
}

/// Ordered field-name to value container.
///
/// Insertion order is preserved; setting an existing name replaces its
/// value in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fields(Vec<(String, Value)>);

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: &str, value: impl Into<Value>) {
        let value = value.into();
        match self.0.iter_mut().find(|(n, _)| n == name) {
            Some(slot) => slot.1 = value,
            None => self.0.push((name.to_string(), value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        let pos = self.0.iter().position(|(n, _)| n == name)?;
        Some(self.0.remove(pos).1)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Build from a JSON object of scalar values
    pub fn from_json(data: &serde_json::Value) -> Result<Self> {
        let obj = data.as_object().ok_or_else(|| {
            FractalError::constraint(
                0,
                "$",
                Violation::TypeMismatch {
                    expected: "object".to_string(),
                    found: json_kind(data).to_string(),
                },
            )
        })?;

        let mut fields = Fields::new();
        for (name, raw) in obj {
            let value = Value::from_json(raw).ok_or_else(|| {
                FractalError::constraint(
                    0,
                    name,
                    Violation::TypeMismatch {
                        expected: "scalar".to_string(),
                        found: json_kind(raw).to_string(),
                    },
                )
            })?;
            fields.insert(name, value);
        }
        Ok(fields)
    }

    pub fn to_json(&self) -> serde_json::Value {
        let map = self
            .0
            .iter()
            .map(|(n, v)| (n.clone(), v.to_json()))
            .collect::<serde_json::Map<_, _>>();
        serde_json::Value::Object(map)
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Fields {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut fields = Fields::new();
        for (k, v) in iter {
            fields.insert(&k.into(), v);
        }
        fields
    }
}

impl IntoIterator for Fields {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl Serialize for Fields {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, value) in &self.0 {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// A stored record: system-managed key and creation time plus the
/// schema-declared fields in schema order
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub key: Key,
    pub created_at: DateTime<Utc>,
    pub fields: Fields,
}

impl Record {
    /// Get a declared field value
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Value of a declared field or one of the system columns
    pub fn value_of(&self, field: &str) -> Option<Value> {
        match field {
            KEY_FIELD => Some(Value::Text(self.key.to_string())),
            CREATED_AT_FIELD => Some(Value::Text(encode_timestamp(&self.created_at))),
            _ => self.fields.get(field).cloned(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        let mut json = self.fields.to_json();
        if let serde_json::Value::Object(ref mut map) = json {
            map.insert(KEY_FIELD.to_string(), serde_json::Value::String(self.key.to_string()));
            map.insert(
                CREATED_AT_FIELD.to_string(),
                serde_json::Value::String(encode_timestamp(&self.created_at)),
            );
        }
        json
    }
}

/// Fixed-width RFC 3339 with nanoseconds, so text order equals time order
pub(crate) fn encode_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Nanos, true)
}

pub(crate) fn decode_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

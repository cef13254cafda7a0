//! Document store error types

use std::fmt;
use thiserror::Error;

use crate::engine::adapter::StorageError;
use crate::engine::config::ConfigError;

use super::value::Value;

/// The constraint a record broke during insert or update
#[derive(Debug, Clone, PartialEq)]
pub enum Violation {
    /// Non-nullable field without a default was absent from the input
    Missing,
    /// Null supplied for a non-nullable field
    NotNullable,
    /// Value tag does not match the declared field type
    TypeMismatch { expected: String, found: String },
    /// Unique field already holds this value
    Duplicate(Value),
    /// Input names a field the schema does not declare
    UnknownField,
    /// System-managed or key field cannot be changed
    Immutable,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::Missing => write!(f, "required field is missing"),
            Violation::NotNullable => write!(f, "field is not nullable"),
            Violation::TypeMismatch { expected, found } => {
                write!(f, "expected {}, found {}", expected, found)
            }
            Violation::Duplicate(value) => write!(f, "duplicate value {} for unique field", value),
            Violation::UnknownField => write!(f, "field is not declared in the schema"),
            Violation::Immutable => write!(f, "field cannot be modified"),
        }
    }
}

#[derive(Error, Debug)]
pub enum FractalError {
    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Condition error: {0}")]
    Condition(String),

    #[error("Unknown field: {0}")]
    UnknownField(String),

    #[error("Constraint violation in record {record}, field '{field}': {violation}")]
    Constraint {
        record: usize,
        field: String,
        violation: Violation,
    },

    #[error(
        "Reference error in record {record}: field '{field}' points at missing {target_collection}.{target_field} = {value}"
    )]
    Reference {
        record: usize,
        field: String,
        target_collection: String,
        target_field: String,
        value: Value,
    },

    /// `target` is `collection/key` for records, the bare name for collections
    #[error("Cannot remove {target}: still referenced from '{referrer}' ({dependents} dependent record(s))")]
    ReferentialIntegrity {
        target: String,
        referrer: String,
        dependents: usize,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl FractalError {
    pub(crate) fn constraint(record: usize, field: &str, violation: Violation) -> Self {
        FractalError::Constraint {
            record,
            field: field.to_string(),
            violation,
        }
    }
}

impl From<rusqlite::Error> for FractalError {
    fn from(e: rusqlite::Error) -> Self {
        FractalError::Storage(StorageError::Sqlite(e))
    }
}

impl From<r2d2::Error> for FractalError {
    fn from(e: r2d2::Error) -> Self {
        FractalError::Storage(StorageError::Pool(e))
    }
}

impl From<serde_json::Error> for FractalError {
    fn from(e: serde_json::Error) -> Self {
        FractalError::Storage(StorageError::Encoding(e.to_string()))
    }
}

pub type Result<T> = std::result::Result<T, FractalError>;

//! FractalDB Document Store
//!
//! Schema-governed collections over a relational engine:
//! - Typed fields with nullable, default, unique, primary and reference rules
//! - Composable condition trees with conventional AND/OR precedence
//! - Compilation to parameterized filter expressions
//! - Atomic batch inserts and referential integrity on delete

pub mod value;
pub mod record;
pub mod schema;
pub mod condition;
pub mod compiler;
pub mod collection;
pub mod query;
pub mod registry;
pub mod resolver;
pub mod error;

pub use value::Value;
pub use record::{Fields, Key, Record};
pub use schema::{Field, FieldType, Reference, Schema, SchemaBuilder, CREATED_AT_FIELD, KEY_FIELD};
pub use condition::{condition, Combinator, Condition, ConditionBuilder, Operator, Predicate};
pub use compiler::{compile, CompiledFilter};
pub use collection::{Collection, Records};
pub use query::{FieldArg, Query, SortDirection};
pub use registry::CollectionRegistry;
pub use resolver::{DeleteMode, Dependents, ReferenceResolver};
pub use error::{FractalError, Result, Violation};

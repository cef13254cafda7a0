//! Fluent queries over one collection
//!
//! Every operator call ANDs a leaf onto the accumulated condition.
//! `filter` ANDs a precomposed tree as one unit; `set_filter` replaces
//! whatever was accumulated. Nothing touches storage until a terminal call
//! (`exec`, `count`, `first`, an aggregate), and each terminal call reads
//! current data.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use super::collection::{decode_row, retag, select_list, Collection};
use super::compiler::{compile, quote_ident};
use super::condition::{condition, Condition};
use super::error::{FractalError, Result};
use super::record::Record;
use super::schema::FieldType;
use super::value::Value;

/// Sort direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortDirection::Asc => write!(f, "ASC"),
            SortDirection::Desc => write!(f, "DESC"),
        }
    }
}

/// Field argument of a fluent call: a name, or the query's default field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldArg<'f> {
    Named(&'f str),
    Default,
}

impl<'f> From<&'f str> for FieldArg<'f> {
    fn from(name: &'f str) -> Self {
        FieldArg::Named(name)
    }
}

impl<'f> From<&'f String> for FieldArg<'f> {
    fn from(name: &'f String) -> Self {
        FieldArg::Named(name)
    }
}

#[derive(Debug, Clone, Copy)]
enum Aggregate {
    Sum,
    Avg,
    Min,
    Max,
}

impl Aggregate {
    fn function(&self) -> &'static str {
        match self {
            Aggregate::Sum => "SUM",
            Aggregate::Avg => "AVG",
            Aggregate::Min => "MIN",
            Aggregate::Max => "MAX",
        }
    }

    fn numeric_only(&self) -> bool {
        matches!(self, Aggregate::Sum | Aggregate::Avg)
    }
}

/// Query builder bound to one collection
#[derive(Debug, Clone)]
pub struct Query<'c> {
    collection: &'c Collection,
    default_field: Option<String>,
    condition: Option<Condition>,
    order: Vec<(String, SortDirection)>,
    limit: Option<u64>,
    offset: u64,
    /// First builder error, reported by the terminal call
    error: Option<String>,
}

impl<'c> Query<'c> {
    pub(crate) fn new(collection: &'c Collection, default_field: Option<String>) -> Self {
        Self {
            collection,
            default_field,
            condition: None,
            order: Vec::new(),
            limit: None,
            offset: 0,
            error: None,
        }
    }

    /// The accumulated condition, if any
    pub fn condition(&self) -> Option<&Condition> {
        self.condition.as_ref()
    }

    pub fn equals<'f>(self, field: impl Into<FieldArg<'f>>, value: impl Into<Value>) -> Self {
        self.push(field.into(), |f| condition(f).equals(value))
    }

    pub fn not_equals<'f>(self, field: impl Into<FieldArg<'f>>, value: impl Into<Value>) -> Self {
        self.push(field.into(), |f| condition(f).not_equals(value))
    }

    pub fn lt<'f>(self, field: impl Into<FieldArg<'f>>, value: impl Into<Value>) -> Self {
        self.push(field.into(), |f| condition(f).lt(value))
    }

    pub fn lte<'f>(self, field: impl Into<FieldArg<'f>>, value: impl Into<Value>) -> Self {
        self.push(field.into(), |f| condition(f).lte(value))
    }

    pub fn gt<'f>(self, field: impl Into<FieldArg<'f>>, value: impl Into<Value>) -> Self {
        self.push(field.into(), |f| condition(f).gt(value))
    }

    pub fn gte<'f>(self, field: impl Into<FieldArg<'f>>, value: impl Into<Value>) -> Self {
        self.push(field.into(), |f| condition(f).gte(value))
    }

    /// Inclusive on both bounds
    pub fn between<'f>(
        self,
        field: impl Into<FieldArg<'f>>,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Self {
        self.push(field.into(), |f| condition(f).between(low, high))
    }

    pub fn any_of<'f, I, V>(self, field: impl Into<FieldArg<'f>>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.push(field.into(), |f| condition(f).any_of(values))
    }

    pub fn none_of<'f, I, V>(self, field: impl Into<FieldArg<'f>>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.push(field.into(), |f| condition(f).none_of(values))
    }

    pub fn substring<'f>(self, field: impl Into<FieldArg<'f>>, text: &str) -> Self {
        self.push(field.into(), |f| condition(f).substring(text))
    }

    pub fn starts_with<'f>(self, field: impl Into<FieldArg<'f>>, prefix: &str) -> Self {
        self.push(field.into(), |f| condition(f).starts_with(prefix))
    }

    pub fn ends_with<'f>(self, field: impl Into<FieldArg<'f>>, suffix: &str) -> Self {
        self.push(field.into(), |f| condition(f).ends_with(suffix))
    }

    pub fn is_null<'f>(self, field: impl Into<FieldArg<'f>>) -> Self {
        self.push(field.into(), |f| condition(f).is_null())
    }

    pub fn not_null<'f>(self, field: impl Into<FieldArg<'f>>) -> Self {
        self.push(field.into(), |f| condition(f).not_null())
    }

    /// AND a precomposed tree onto the accumulated condition
    pub fn filter(mut self, cond: Condition) -> Self {
        self.condition = Some(match self.condition.take() {
            Some(current) => current.group().and(cond),
            None => cond.group(),
        });
        self
    }

    /// Replace the accumulated condition
    pub fn set_filter(mut self, cond: Condition) -> Self {
        self.condition = Some(cond.group());
        self
    }

    /// Add a sort key. Later keys break ties of earlier ones.
    pub fn order_by(mut self, field: &str, direction: SortDirection) -> Self {
        self.order.push((field.to_string(), direction));
        self
    }

    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn offset(mut self, n: u64) -> Self {
        self.offset = n;
        self
    }

    /// Run the query and collect matching records
    pub fn exec(&self) -> Result<Vec<Record>> {
        let (filter, mut params) = self.where_clause()?;
        let order = self.order_clause()?;
        let schema = self.collection.schema();

        let sql = format!(
            "SELECT {} FROM {}{}{} LIMIT ? OFFSET ?",
            select_list(schema),
            quote_ident(self.collection.name()),
            filter,
            order
        );
        params.push(Value::Integer(self.limit.map(clamp).unwrap_or(-1)));
        params.push(Value::Integer(clamp(self.offset)));

        debug!(
            collection = self.collection.name(),
            params = params.len(),
            "executing query"
        );
        let rows = self.collection.engine().query(&sql, &params)?;
        rows.rows
            .into_iter()
            .map(|row| decode_row(schema, row))
            .collect()
    }

    /// Number of matching records, honouring limit and offset
    pub fn count(&self) -> Result<u64> {
        let (filter, mut params) = self.where_clause()?;
        let sql = format!(
            "SELECT COUNT(*) FROM (SELECT 1 FROM {}{} LIMIT ? OFFSET ?)",
            quote_ident(self.collection.name()),
            filter
        );
        params.push(Value::Integer(self.limit.map(clamp).unwrap_or(-1)));
        params.push(Value::Integer(clamp(self.offset)));

        let rows = self.collection.engine().query(&sql, &params)?;
        Ok(rows.scalar().and_then(Value::as_i64).unwrap_or(0) as u64)
    }

    /// First matching record in query order
    pub fn first(&self) -> Result<Option<Record>> {
        let mut single = self.clone();
        single.limit = Some(1);
        Ok(single.exec()?.into_iter().next())
    }

    /// Distinct values of `field` among matching records, ascending
    pub fn distinct(&self, field: &str) -> Result<Vec<Value>> {
        let field_type = self.field_type(field)?;
        let (filter, params) = self.where_clause()?;
        let column = quote_ident(field);
        let sql = format!(
            "SELECT DISTINCT {c} FROM {t}{w} ORDER BY {c}",
            c = column,
            t = quote_ident(self.collection.name()),
            w = filter
        );
        let rows = self.collection.engine().query(&sql, &params)?;
        Ok(rows
            .rows
            .into_iter()
            .filter_map(|row| row.into_iter().next())
            .map(|v| retag(field_type, v))
            .collect())
    }

    pub fn sum(&self, field: &str) -> Result<Value> {
        self.aggregate(Aggregate::Sum, field)
    }

    /// Float average, or null when nothing matches
    pub fn avg(&self, field: &str) -> Result<Value> {
        self.aggregate(Aggregate::Avg, field)
    }

    pub fn min(&self, field: &str) -> Result<Value> {
        self.aggregate(Aggregate::Min, field)
    }

    pub fn max(&self, field: &str) -> Result<Value> {
        self.aggregate(Aggregate::Max, field)
    }

    fn aggregate(&self, aggregate: Aggregate, field: &str) -> Result<Value> {
        let field_type = self.field_type(field)?;
        if aggregate.numeric_only() && !matches!(field_type, FieldType::Integer | FieldType::Float) {
            return Err(FractalError::Condition(format!(
                "{} requires a numeric field, '{}' is {}",
                aggregate.function(),
                field,
                field_type
            )));
        }

        let (filter, params) = self.where_clause()?;
        let sql = format!(
            "SELECT {}({}) FROM {}{}",
            aggregate.function(),
            quote_ident(field),
            quote_ident(self.collection.name()),
            filter
        );
        let rows = self.collection.engine().query(&sql, &params)?;
        let value = rows.scalar().cloned().unwrap_or(Value::Null);
        Ok(match aggregate {
            Aggregate::Avg => value,
            _ => retag(field_type, value),
        })
    }

    fn push<F>(mut self, field: FieldArg<'_>, make: F) -> Self
    where
        F: FnOnce(&str) -> Condition,
    {
        let name = match field {
            FieldArg::Named(name) => name.to_string(),
            FieldArg::Default => match self.default_field.clone() {
                Some(name) => name,
                None => {
                    if self.error.is_none() {
                        self.error = Some(
                            "fluent call omitted the field but the query has no default field"
                                .to_string(),
                        );
                    }
                    return self;
                }
            },
        };

        let leaf = make(&name);
        self.condition = Some(match self.condition.take() {
            Some(current) => current.group().and(leaf),
            None => leaf,
        });
        self
    }

    fn field_type(&self, field: &str) -> Result<FieldType> {
        self.collection
            .schema()
            .field_type(field)
            .ok_or_else(|| FractalError::UnknownField(field.to_string()))
    }

    fn where_clause(&self) -> Result<(String, Vec<Value>)> {
        if let Some(error) = &self.error {
            return Err(FractalError::Condition(error.clone()));
        }
        match &self.condition {
            Some(cond) => {
                let compiled = compile(cond, self.collection.schema())?;
                Ok((format!(" WHERE {}", compiled.expression), compiled.params))
            }
            None => Ok((String::new(), Vec::new())),
        }
    }

    /// Explicit sort keys, then insertion order
    fn order_clause(&self) -> Result<String> {
        let mut keys = Vec::with_capacity(self.order.len() + 1);
        for (field, direction) in &self.order {
            self.field_type(field)?;
            keys.push(format!("{} {}", quote_ident(field), direction));
        }
        keys.push("rowid".to_string());
        Ok(format!(" ORDER BY {}", keys.join(", ")))
    }
}

impl<'q, 'c> IntoIterator for &'q Query<'c> {
    type Item = Result<Record>;
    type IntoIter = std::vec::IntoIter<Result<Record>>;

    /// Executes the query; a failure is yielded as the only item
    fn into_iter(self) -> Self::IntoIter {
        match self.exec() {
            Ok(records) => records.into_iter().map(Ok).collect::<Vec<_>>().into_iter(),
            Err(e) => vec![Err(e)].into_iter(),
        }
    }
}

fn clamp(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

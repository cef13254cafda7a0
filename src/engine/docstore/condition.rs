//! Boolean predicate trees over field names
//!
//! Conditions are schema-agnostic: field names are only checked when a
//! tree is compiled against a concrete schema, so one tree can be reused
//! across collections.
//!
//! Composition follows conventional precedence, AND binding tighter than
//! OR. With the named methods, `a.and(b).or(c)` is `(a AND b) OR c` and
//! `a.or(b).and(c)` is `a OR (b AND c)`. A tree passed as an argument is
//! always treated as one parenthesized unit; call [`Condition::group`] to
//! seal a receiver the same way. The `&` and `|` operators get their
//! precedence from Rust itself; they seal both operands and their result,
//! so `(a | b).and(c)` is `(a OR b) AND c`.
//!
//! Pattern operators (`substring`, `starts_with`, `ends_with`) are
//! case-sensitive and match the operand literally. No locale folding is
//! applied on any storage engine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitAnd, BitOr, Not};

use super::error::{FractalError, Result};
use super::value::Value;

/// Leaf operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equals,
    NotEquals,
    Lt,
    Lte,
    Gt,
    Gte,
    Between,
    AnyOf,
    NoneOf,
    Substring,
    StartsWith,
    EndsWith,
    IsNull,
    NotNull,
}

/// Number of operands an operator takes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exactly(usize),
    Any,
}

impl Operator {
    pub fn arity(&self) -> Arity {
        match self {
            Operator::IsNull | Operator::NotNull => Arity::Exactly(0),
            Operator::Between => Arity::Exactly(2),
            Operator::AnyOf | Operator::NoneOf => Arity::Any,
            _ => Arity::Exactly(1),
        }
    }

    /// Whether the operand is a literal text pattern
    pub fn is_pattern(&self) -> bool {
        matches!(
            self,
            Operator::Substring | Operator::StartsWith | Operator::EndsWith
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operator::Equals => "equals",
            Operator::NotEquals => "not_equals",
            Operator::Lt => "lt",
            Operator::Lte => "lte",
            Operator::Gt => "gt",
            Operator::Gte => "gte",
            Operator::Between => "between",
            Operator::AnyOf => "any_of",
            Operator::NoneOf => "none_of",
            Operator::Substring => "substring",
            Operator::StartsWith => "starts_with",
            Operator::EndsWith => "ends_with",
            Operator::IsNull => "is_null",
            Operator::NotNull => "not_null",
        }
    }
}

/// A single field/operator/operands comparison
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub field: String,
    pub operator: Operator,
    pub operands: Vec<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combinator {
    And,
    Or,
}

impl Combinator {
    pub fn keyword(&self) -> &'static str {
        match self {
            Combinator::And => "AND",
            Combinator::Or => "OR",
        }
    }
}

/// Node of a predicate tree
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Leaf(Predicate),
    Node {
        left: Box<Condition>,
        combinator: Combinator,
        right: Box<Condition>,
        /// Sealed nodes are never regrouped by later method calls
        grouped: bool,
    },
    Not(Box<Condition>),
}

impl Condition {
    /// Build a leaf from an operator and a dynamic operand list,
    /// checking arity and operand shape
    pub fn leaf(field: &str, operator: Operator, operands: Vec<Value>) -> Result<Self> {
        if field.is_empty() {
            return Err(FractalError::Condition(format!(
                "{}: field name cannot be empty",
                operator.name()
            )));
        }

        if let Arity::Exactly(n) = operator.arity() {
            if operands.len() != n {
                return Err(FractalError::Condition(format!(
                    "{} on '{}' takes {} operand(s), got {}",
                    operator.name(),
                    field,
                    n,
                    operands.len()
                )));
            }
        }

        if operator.is_pattern() && operands.iter().any(|v| v.as_str().is_none()) {
            return Err(FractalError::Condition(format!(
                "{} on '{}' requires a text operand",
                operator.name(),
                field
            )));
        }

        Ok(Condition::Leaf(Predicate {
            field: field.to_string(),
            operator,
            operands,
        }))
    }

    /// AND-combine. Binds tighter than a preceding ungrouped OR.
    pub fn and(self, other: Condition) -> Condition {
        let other = other.group();
        match self {
            Condition::Node {
                left,
                combinator: Combinator::Or,
                right,
                grouped: false,
            } => Condition::Node {
                left,
                combinator: Combinator::Or,
                right: Box::new(right.and(other)),
                grouped: false,
            },
            this => Condition::Node {
                left: Box::new(this),
                combinator: Combinator::And,
                right: Box::new(other),
                grouped: false,
            },
        }
    }

    /// OR-combine, left-associative
    pub fn or(self, other: Condition) -> Condition {
        Condition::Node {
            left: Box::new(self),
            combinator: Combinator::Or,
            right: Box::new(other.group()),
            grouped: false,
        }
    }

    pub fn negate(self) -> Condition {
        Condition::Not(Box::new(self.group()))
    }

    /// Seal this tree so later chained calls treat it as one unit
    pub fn group(self) -> Condition {
        match self {
            Condition::Node {
                left,
                combinator,
                right,
                ..
            } => Condition::Node {
                left,
                combinator,
                right,
                grouped: true,
            },
            other => other,
        }
    }

    /// Every field name referenced by the tree, in traversal order
    pub fn fields(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Condition::Leaf(p) => out.push(&p.field),
            Condition::Node { left, right, .. } => {
                left.collect_fields(out);
                right.collect_fields(out);
            }
            Condition::Not(inner) => inner.collect_fields(out),
        }
    }
}

impl BitAnd for Condition {
    type Output = Condition;

    fn bitand(self, rhs: Self) -> Self::Output {
        self.group().and(rhs).group()
    }
}

impl BitOr for Condition {
    type Output = Condition;

    fn bitor(self, rhs: Self) -> Self::Output {
        self.group().or(rhs).group()
    }
}

impl Not for Condition {
    type Output = Condition;

    fn not(self) -> Self::Output {
        self.negate()
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Leaf(p) => {
                write!(f, "{} {}", p.field, p.operator.name())?;
                for (i, v) in p.operands.iter().enumerate() {
                    write!(f, "{}{}", if i == 0 { " " } else { ", " }, v)?;
                }
                Ok(())
            }
            Condition::Node {
                left,
                combinator,
                right,
                ..
            } => write!(f, "({} {} {})", left, combinator.keyword(), right),
            Condition::Not(inner) => write!(f, "NOT {}", inner),
        }
    }
}

/// Open a builder for leaf predicates on `field`
pub fn condition(field: &str) -> ConditionBuilder {
    ConditionBuilder {
        field: field.to_string(),
    }
}

/// Produces leaf conditions for one field
#[derive(Debug, Clone)]
pub struct ConditionBuilder {
    field: String,
}

impl ConditionBuilder {
    fn make(self, operator: Operator, operands: Vec<Value>) -> Condition {
        Condition::Leaf(Predicate {
            field: self.field,
            operator,
            operands,
        })
    }

    /// Equality. A null operand matches null fields.
    pub fn equals(self, value: impl Into<Value>) -> Condition {
        self.make(Operator::Equals, vec![value.into()])
    }

    pub fn not_equals(self, value: impl Into<Value>) -> Condition {
        self.make(Operator::NotEquals, vec![value.into()])
    }

    pub fn lt(self, value: impl Into<Value>) -> Condition {
        self.make(Operator::Lt, vec![value.into()])
    }

    pub fn lte(self, value: impl Into<Value>) -> Condition {
        self.make(Operator::Lte, vec![value.into()])
    }

    pub fn gt(self, value: impl Into<Value>) -> Condition {
        self.make(Operator::Gt, vec![value.into()])
    }

    pub fn gte(self, value: impl Into<Value>) -> Condition {
        self.make(Operator::Gte, vec![value.into()])
    }

    /// Inclusive on both bounds
    pub fn between(self, low: impl Into<Value>, high: impl Into<Value>) -> Condition {
        self.make(Operator::Between, vec![low.into(), high.into()])
    }

    /// Matches any listed value. An empty list matches nothing.
    pub fn any_of<I, V>(self, values: I) -> Condition
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.make(Operator::AnyOf, values.into_iter().map(Into::into).collect())
    }

    /// Matches none of the listed values. An empty list matches everything.
    pub fn none_of<I, V>(self, values: I) -> Condition
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.make(Operator::NoneOf, values.into_iter().map(Into::into).collect())
    }

    pub fn substring(self, text: &str) -> Condition {
        self.make(Operator::Substring, vec![Value::from(text)])
    }

    pub fn starts_with(self, prefix: &str) -> Condition {
        self.make(Operator::StartsWith, vec![Value::from(prefix)])
    }

    pub fn ends_with(self, suffix: &str) -> Condition {
        self.make(Operator::EndsWith, vec![Value::from(suffix)])
    }

    pub fn is_null(self) -> Condition {
        self.make(Operator::IsNull, Vec::new())
    }

    pub fn not_null(self) -> Condition {
        self.make(Operator::NotNull, Vec::new())
    }
}

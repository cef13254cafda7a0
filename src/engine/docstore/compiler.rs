//! Predicate compiler
//!
//! Binds a condition tree to a schema and lowers it to a SQL filter
//! expression with `?` placeholders plus the ordered parameter list.
//! Operand values never appear in the expression text. Pattern operators
//! compile to `GLOB`, which is case-sensitive, with the glob
//! metacharacters in the operand escaped so they match literally.

use super::condition::{Condition, Operator, Predicate};
use super::error::{FractalError, Result};
use super::schema::{FieldType, Schema};
use super::value::Value;

/// A compiled filter: expression text and its positional parameters
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledFilter {
    pub expression: String,
    pub params: Vec<Value>,
}

/// Compile `condition` against `schema`.
///
/// Pure and deterministic: the same tree over the same schema always
/// yields the same expression and parameters.
pub fn compile(condition: &Condition, schema: &Schema) -> Result<CompiledFilter> {
    let mut expression = String::new();
    let mut params = Vec::new();
    emit(condition, schema, &mut expression, &mut params)?;
    Ok(CompiledFilter { expression, params })
}

fn emit(
    condition: &Condition,
    schema: &Schema,
    out: &mut String,
    params: &mut Vec<Value>,
) -> Result<()> {
    match condition {
        Condition::Leaf(predicate) => emit_leaf(predicate, schema, out, params),
        Condition::Node {
            left,
            combinator,
            right,
            ..
        } => {
            out.push('(');
            emit(left, schema, out, params)?;
            out.push_str(") ");
            out.push_str(combinator.keyword());
            out.push_str(" (");
            emit(right, schema, out, params)?;
            out.push(')');
            Ok(())
        }
        Condition::Not(inner) => {
            out.push_str("NOT (");
            emit(inner, schema, out, params)?;
            out.push(')');
            Ok(())
        }
    }
}

fn emit_leaf(
    predicate: &Predicate,
    schema: &Schema,
    out: &mut String,
    params: &mut Vec<Value>,
) -> Result<()> {
    let field_type = schema
        .field_type(&predicate.field)
        .ok_or_else(|| FractalError::UnknownField(predicate.field.clone()))?;
    check_operands(predicate, field_type)?;

    let column = quote_ident(&predicate.field);
    let operands = &predicate.operands;

    match predicate.operator {
        Operator::Equals if operands[0].is_null() => {
            out.push_str(&format!("{} IS NULL", column));
        }
        Operator::NotEquals if operands[0].is_null() => {
            out.push_str(&format!("{} IS NOT NULL", column));
        }
        Operator::Equals
        | Operator::NotEquals
        | Operator::Lt
        | Operator::Lte
        | Operator::Gt
        | Operator::Gte => {
            out.push_str(&format!("{} {} ?", column, comparison(predicate.operator)));
            params.push(operands[0].clone());
        }
        Operator::Between => {
            out.push_str(&format!("{} BETWEEN ? AND ?", column));
            params.extend(operands.iter().cloned());
        }
        Operator::AnyOf | Operator::NoneOf if operands.is_empty() => {
            // IN () is not portable; an empty list is a constant
            let constant = if predicate.operator == Operator::AnyOf {
                "1 = 0"
            } else {
                "1 = 1"
            };
            out.push_str(constant);
        }
        Operator::AnyOf | Operator::NoneOf => {
            let keyword = if predicate.operator == Operator::AnyOf {
                "IN"
            } else {
                "NOT IN"
            };
            let placeholders = vec!["?"; operands.len()].join(", ");
            out.push_str(&format!("{} {} ({})", column, keyword, placeholders));
            params.extend(operands.iter().cloned());
        }
        Operator::Substring | Operator::StartsWith | Operator::EndsWith => {
            let literal = escape_glob(operands[0].as_str().unwrap_or_default());
            let pattern = match predicate.operator {
                Operator::Substring => format!("*{}*", literal),
                Operator::StartsWith => format!("{}*", literal),
                _ => format!("*{}", literal),
            };
            out.push_str(&format!("{} GLOB ?", column));
            params.push(Value::Text(pattern));
        }
        Operator::IsNull => out.push_str(&format!("{} IS NULL", column)),
        Operator::NotNull => out.push_str(&format!("{} IS NOT NULL", column)),
    }
    Ok(())
}

fn comparison(operator: Operator) -> &'static str {
    match operator {
        Operator::Equals => "=",
        Operator::NotEquals => "!=",
        Operator::Lt => "<",
        Operator::Lte => "<=",
        Operator::Gt => ">",
        _ => ">=",
    }
}

/// Arity and operand types against the bound field type
fn check_operands(predicate: &Predicate, field_type: FieldType) -> Result<()> {
    // Trees built through `Condition::leaf` are already checked; trees
    // built by hand are not.
    Condition::leaf(
        &predicate.field,
        predicate.operator,
        predicate.operands.clone(),
    )?;

    if predicate.operator.is_pattern() && field_type != FieldType::Text {
        return Err(FractalError::Condition(format!(
            "{} requires a text field, '{}' is {}",
            predicate.operator.name(),
            predicate.field,
            field_type
        )));
    }

    let null_allowed = matches!(predicate.operator, Operator::Equals | Operator::NotEquals);
    for operand in &predicate.operands {
        if operand.is_null() {
            if null_allowed {
                continue;
            }
            return Err(FractalError::Condition(format!(
                "{} on '{}' does not accept null operands",
                predicate.operator.name(),
                predicate.field
            )));
        }
        if !comparable(field_type, operand) {
            return Err(FractalError::Condition(format!(
                "{} on {} field '{}' got a {} operand",
                predicate.operator.name(),
                field_type,
                predicate.field,
                operand.type_name()
            )));
        }
    }
    Ok(())
}

/// Numeric fields compare against either numeric tag
fn comparable(field_type: FieldType, operand: &Value) -> bool {
    match (field_type, operand) {
        (FieldType::Integer, Value::Float(_)) => true,
        _ => field_type.accepts(operand),
    }
}

pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Escape GLOB metacharacters with single-character classes
pub(crate) fn escape_glob(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '*' | '?' | '[' => {
                escaped.push('[');
                escaped.push(c);
                escaped.push(']');
            }
            _ => escaped.push(c),
        }
    }
    escaped
}

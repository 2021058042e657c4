//! Rule predicate evaluation — pure comparison of one customer field.

use pulse_core::types::{Customer, Rule, RuleOperator};
use serde_json::Value;
use std::cmp::Ordering;

/// Known customer fields, parsed from a rule's string field name. Names not
/// listed here fall through to the customer's custom field map, so the
/// operator set stays generic without giving up typed access to the
/// first-class fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CustomerField {
    Name,
    Email,
    Phone,
    TotalSpent,
    VisitCount,
    LastVisit,
    Tags,
    Custom(String),
}

impl CustomerField {
    pub fn parse(name: &str) -> Self {
        match name {
            "name" => CustomerField::Name,
            "email" => CustomerField::Email,
            "phone" => CustomerField::Phone,
            "totalSpent" | "total_spent" => CustomerField::TotalSpent,
            "visitCount" | "visit_count" => CustomerField::VisitCount,
            "lastVisit" | "last_visit" => CustomerField::LastVisit,
            "tags" => CustomerField::Tags,
            other => CustomerField::Custom(other.to_string()),
        }
    }

    /// Resolve the field's current value on a customer; `None` when absent.
    pub fn resolve(&self, customer: &Customer) -> Option<Value> {
        match self {
            CustomerField::Name => Some(Value::String(customer.name.clone())),
            CustomerField::Email => Some(Value::String(customer.email.clone())),
            CustomerField::Phone => customer.phone.clone().map(Value::String),
            CustomerField::TotalSpent => {
                serde_json::Number::from_f64(customer.total_spent).map(Value::Number)
            }
            CustomerField::VisitCount => Some(Value::Number(customer.visit_count.into())),
            CustomerField::LastVisit => customer
                .last_visit
                .map(|t| Value::String(t.to_rfc3339())),
            CustomerField::Tags => Some(Value::Array(
                customer.tags.iter().cloned().map(Value::String).collect(),
            )),
            CustomerField::Custom(key) => customer
                .custom_fields
                .get(key)
                .filter(|v| !v.is_null())
                .cloned(),
        }
    }
}

/// Evaluate one rule against one customer.
///
/// Closed-world policy: an absent field never matches. Coercion failures
/// (non-numeric values under numeric operators, malformed `between` bounds)
/// and unknown operators also evaluate false rather than erroring.
pub fn evaluate(rule: &Rule, customer: &Customer) -> bool {
    let field = CustomerField::parse(&rule.field);
    let Some(actual) = field.resolve(customer) else {
        return false;
    };

    match rule.operator {
        RuleOperator::Equals => value_eq(&actual, &rule.value),
        RuleOperator::NotEquals => !value_eq(&actual, &rule.value),
        RuleOperator::Contains => contains(&actual, &rule.value),
        RuleOperator::NotContains => !contains(&actual, &rule.value),
        RuleOperator::GreaterThan => {
            numeric_cmp(&actual, &rule.value).map_or(false, |o| o == Ordering::Greater)
        }
        RuleOperator::LessThan => {
            numeric_cmp(&actual, &rule.value).map_or(false, |o| o == Ordering::Less)
        }
        RuleOperator::Between => between(&actual, &rule.value),
        RuleOperator::In => in_list(&actual, &rule.value),
        RuleOperator::NotIn => !in_list(&actual, &rule.value),
        RuleOperator::Unknown => false,
    }
}

/// Strict equality, except numbers compare numerically so integer and float
/// encodings of the same quantity are equal.
fn value_eq(a: &Value, b: &Value) -> bool {
    match (number_of(a), number_of(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn contains(actual: &Value, expected: &Value) -> bool {
    string_of(actual)
        .to_lowercase()
        .contains(&string_of(expected).to_lowercase())
}

fn numeric_cmp(a: &Value, b: &Value) -> Option<Ordering> {
    let a = number_of(a)?;
    let b = number_of(b)?;
    a.partial_cmp(&b)
}

/// `expected` holds inclusive "min,max" bounds; malformed bounds never match.
fn between(actual: &Value, expected: &Value) -> bool {
    let Some(n) = number_of(actual) else {
        return false;
    };
    let bounds = string_of(expected);
    let mut parts = bounds.splitn(2, ',');
    let (Some(min), Some(max)) = (parts.next(), parts.next()) else {
        return false;
    };
    let (Ok(min), Ok(max)) = (min.trim().parse::<f64>(), max.trim().parse::<f64>()) else {
        return false;
    };
    n >= min && n <= max
}

/// Membership in a comma-separated, trimmed list. A JSON array is accepted
/// as the list form too (rule builders and LLM-suggested rules emit both).
fn in_list(actual: &Value, expected: &Value) -> bool {
    if let Some(items) = expected.as_array() {
        return items.iter().any(|item| value_eq(actual, item));
    }
    let needle = string_of(actual);
    string_of(expected)
        .split(',')
        .map(str::trim)
        .any(|item| item == needle)
}

/// Numeric coercion: numbers pass through, numeric strings parse, booleans
/// map to 0/1. Everything else is not a number.
fn number_of(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// String coercion; whole-valued floats render without the trailing ".0" so
/// numeric fields compare cleanly against operator value lists.
fn string_of(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
            _ => n.to_string(),
        },
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

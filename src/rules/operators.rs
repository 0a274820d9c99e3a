use fancy_regex::Regex;
use serde_json::Value;

use crate::rules::path::{get_ignore_case, Resolved};

/// The primitive predicates a rule leaf can apply at a path. Exactly one
/// operator per leaf; the operand is fixed at catalog load time.
#[derive(Debug, Clone)]
pub(crate) enum LeafOperator {
    Equals(Value),
    NotEquals(Value),
    /// `hasValue: true` requires a present, non-null, non-empty value.
    /// Empty string, empty array and empty object all count as "no value".
    HasValue(bool),
    Exists(bool),
    In(Vec<Value>),
    Regex { pattern: String, regex: Regex },
    Greater(f64),
    GreaterOrEquals(f64),
    Less(f64),
    LessOrEquals(f64),
}

impl PartialEq for LeafOperator {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (LeafOperator::Equals(a), LeafOperator::Equals(b)) => a == b,
            (LeafOperator::NotEquals(a), LeafOperator::NotEquals(b)) => a == b,
            (LeafOperator::HasValue(a), LeafOperator::HasValue(b)) => a == b,
            (LeafOperator::Exists(a), LeafOperator::Exists(b)) => a == b,
            (LeafOperator::In(a), LeafOperator::In(b)) => a == b,
            (LeafOperator::Regex { pattern: a, .. }, LeafOperator::Regex { pattern: b, .. }) => {
                a == b
            }
            (LeafOperator::Greater(a), LeafOperator::Greater(b)) => a == b,
            (LeafOperator::GreaterOrEquals(a), LeafOperator::GreaterOrEquals(b)) => a == b,
            (LeafOperator::Less(a), LeafOperator::Less(b)) => a == b,
            (LeafOperator::LessOrEquals(a), LeafOperator::LessOrEquals(b)) => a == b,
            (_, _) => false,
        }
    }
}

impl LeafOperator {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            LeafOperator::Equals(_) => "equals",
            LeafOperator::NotEquals(_) => "notEquals",
            LeafOperator::HasValue(_) => "hasValue",
            LeafOperator::Exists(_) => "exists",
            LeafOperator::In(_) => "in",
            LeafOperator::Regex { .. } => "regex",
            LeafOperator::Greater(_) => "greater",
            LeafOperator::GreaterOrEquals(_) => "greaterOrEquals",
            LeafOperator::Less(_) => "less",
            LeafOperator::LessOrEquals(_) => "lessOrEquals",
        }
    }

    pub(crate) fn operand(&self) -> Value {
        match self {
            LeafOperator::Equals(v) | LeafOperator::NotEquals(v) => v.clone(),
            LeafOperator::HasValue(b) | LeafOperator::Exists(b) => Value::Bool(*b),
            LeafOperator::In(list) => Value::Array(list.clone()),
            LeafOperator::Regex { pattern, .. } => Value::String(pattern.clone()),
            LeafOperator::Greater(n)
            | LeafOperator::GreaterOrEquals(n)
            | LeafOperator::Less(n)
            | LeafOperator::LessOrEquals(n) => {
                serde_json::Number::from_f64(*n).map_or(Value::Null, Value::Number)
            }
        }
    }

    pub(crate) fn evaluate(&self, actual: &Resolved<'_>) -> bool {
        match self {
            LeafOperator::Equals(operand) => match actual.value() {
                Some(value) => json_eq(value, operand),
                None => false,
            },

            LeafOperator::NotEquals(operand) => match actual.value() {
                Some(value) => !json_eq(value, operand),
                None => true,
            },

            LeafOperator::HasValue(expected) => {
                let has = actual.value().map_or(false, has_value);
                has == *expected
            }

            LeafOperator::Exists(expected) => !actual.is_missing() == *expected,

            LeafOperator::In(operand) => match actual.value() {
                Some(value) => operand.iter().any(|each| json_eq(value, each)),
                None => false,
            },

            LeafOperator::Regex { regex, .. } => match actual.value().and_then(stringify) {
                Some(text) => regex.is_match(&text).unwrap_or(false),
                None => false,
            },

            LeafOperator::Greater(operand) => compare(actual, |n| n > *operand),
            LeafOperator::GreaterOrEquals(operand) => compare(actual, |n| n >= *operand),
            LeafOperator::Less(operand) => compare(actual, |n| n < *operand),
            LeafOperator::LessOrEquals(operand) => compare(actual, |n| n <= *operand),
        }
    }
}

fn compare<F>(actual: &Resolved<'_>, check: F) -> bool
where
    F: Fn(f64) -> bool,
{
    actual
        .value()
        .and_then(as_number)
        .map_or(false, check)
}

fn as_number(value: &Value) -> Option<f64> {
    value.as_f64()
}

/// Scalars stringify for regex matching; arrays and objects never match.
fn stringify(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn has_value(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        Value::Array(list) => !list.is_empty(),
        Value::Object(map) => !map.is_empty(),
        Value::Bool(_) | Value::Number(_) => true,
    }
}

/// Deep structural equality with case-insensitive string comparison, both
/// for scalar strings and for object member names.
pub(crate) fn json_eq(first: &Value, second: &Value) -> bool {
    match (first, second) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::String(a), Value::String(b)) => a.eq_ignore_ascii_case(b),
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            },
        },
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| json_eq(x, y))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a.iter().all(|(key, value)| {
                    get_ignore_case(b, key).map_or(false, |other| json_eq(value, other))
                })
        }
        (_, _) => false,
    }
}

#[cfg(test)]
#[path = "operators_tests.rs"]
mod operators_tests;

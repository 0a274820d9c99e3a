use fancy_regex::Regex;
use serde_json::{Map, Value};

use crate::rules::errors::Error;
use crate::rules::operators::LeafOperator;
use crate::rules::path::JsonPath;
use crate::rules::Result;

const OPERATOR_KEYS: [&str; 10] = [
    "equals",
    "notEquals",
    "hasValue",
    "exists",
    "in",
    "regex",
    "greater",
    "greaterOrEquals",
    "less",
    "lessOrEquals",
];

const COMBINATOR_KEYS: [&str; 3] = ["allOf", "anyOf", "not"];

/// A rule's evaluation expression. A closed sum so evaluation and
/// serialization can handle every variant exhaustively.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Leaf(LeafExpr),
    AllOf(Vec<Expr>),
    AnyOf(Vec<Expr>),
    Not(Box<Expr>),
    Scoped(ScopedExpr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LeafExpr {
    pub(crate) path: String,
    pub(crate) query: JsonPath,
    pub(crate) operator: LeafOperator,
}

/// Redirects evaluation to every resource of `resource_type` (or stays in
/// the current scope when absent), with an optional `where` pre-filter.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopedExpr {
    pub(crate) resource_type: Option<String>,
    pub(crate) where_clause: Option<Box<Expr>>,
    pub(crate) body: Box<Expr>,
}

impl Expr {
    /// Compiles a rule-DSL JSON node. Any node carrying `resourceType` or
    /// `where` becomes a `Scoped` wrapper around its inner expression.
    pub(crate) fn from_json(node: &Value) -> Result<Expr> {
        let object = node
            .as_object()
            .ok_or_else(|| Error::ParseError("evaluation node is not an object".to_string()))?;

        let resource_type = match object.get("resourceType") {
            None => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => {
                return Err(Error::ParseError(
                    "resourceType must be a string".to_string(),
                ))
            }
        };
        let where_clause = match object.get("where") {
            None => None,
            Some(inner) => Some(Box::new(Expr::from_json(inner)?)),
        };

        let body = Expr::body_from_object(object)?;
        if resource_type.is_none() && where_clause.is_none() {
            return Ok(body);
        }
        Ok(Expr::Scoped(ScopedExpr {
            resource_type,
            where_clause,
            body: Box::new(body),
        }))
    }

    fn body_from_object(object: &Map<String, Value>) -> Result<Expr> {
        let combinators: Vec<&str> = COMBINATOR_KEYS
            .iter()
            .copied()
            .filter(|key| object.contains_key(*key))
            .collect();
        let has_path = object.contains_key("path");

        match (combinators.as_slice(), has_path) {
            (&[], false) => Err(Error::ParseError(
                "expected one of `allOf`, `anyOf`, `not` or a `path` leaf".to_string(),
            )),
            (&[], true) => Expr::leaf_from_object(object),
            (&[combinator], false) => match combinator {
                "allOf" => Ok(Expr::AllOf(Expr::children(object, "allOf")?)),
                "anyOf" => Ok(Expr::AnyOf(Expr::children(object, "anyOf")?)),
                _ => Ok(Expr::Not(Box::new(Expr::from_json(&object["not"])?))),
            },
            (_, _) => Err(Error::ParseError(format!(
                "expression mixes `path` and combinators, or has more than one combinator: {}",
                combinators.join(", ")
            ))),
        }
    }

    fn children(object: &Map<String, Value>, key: &str) -> Result<Vec<Expr>> {
        let list = object[key]
            .as_array()
            .ok_or_else(|| Error::ParseError(format!("`{}` must be an array", key)))?;
        if list.is_empty() {
            return Err(Error::ParseError(format!("`{}` must not be empty", key)));
        }
        list.iter().map(Expr::from_json).collect()
    }

    fn leaf_from_object(object: &Map<String, Value>) -> Result<Expr> {
        let path = object["path"]
            .as_str()
            .ok_or_else(|| Error::ParseError("`path` must be a string".to_string()))?
            .to_string();
        let query = JsonPath::parse(&path)?;

        let mut found: Vec<&str> = OPERATOR_KEYS
            .iter()
            .copied()
            .filter(|key| object.contains_key(*key))
            .collect();
        let operator_key = match (found.pop(), found.pop()) {
            (Some(key), None) => key,
            (None, _) => {
                return Err(Error::ParseError(format!(
                    "leaf at path `{}` has no operator",
                    path
                )))
            }
            (Some(_), Some(_)) => {
                return Err(Error::ParseError(format!(
                    "leaf at path `{}` has more than one operator",
                    path
                )))
            }
        };

        let operand = &object[operator_key];
        let operator = match operator_key {
            "equals" => LeafOperator::Equals(operand.clone()),
            "notEquals" => LeafOperator::NotEquals(operand.clone()),
            "hasValue" => LeafOperator::HasValue(expect_bool(operand, "hasValue")?),
            "exists" => LeafOperator::Exists(expect_bool(operand, "exists")?),
            "in" => LeafOperator::In(
                operand
                    .as_array()
                    .ok_or_else(|| Error::ParseError("`in` operand must be an array".to_string()))?
                    .clone(),
            ),
            "regex" => {
                let pattern = operand
                    .as_str()
                    .ok_or_else(|| {
                        Error::ParseError("`regex` operand must be a string".to_string())
                    })?
                    .to_string();
                let regex = Regex::new(&pattern)?;
                LeafOperator::Regex { pattern, regex }
            }
            "greater" => LeafOperator::Greater(expect_number(operand, "greater")?),
            "greaterOrEquals" => {
                LeafOperator::GreaterOrEquals(expect_number(operand, "greaterOrEquals")?)
            }
            "less" => LeafOperator::Less(expect_number(operand, "less")?),
            _ => LeafOperator::LessOrEquals(expect_number(operand, "lessOrEquals")?),
        };

        Ok(Expr::Leaf(LeafExpr {
            path,
            query,
            operator,
        }))
    }

    /// Serializes back to the rule-DSL JSON shape. Compiling the output
    /// yields an equivalent expression tree.
    pub(crate) fn to_json(&self) -> Value {
        match self {
            Expr::Leaf(leaf) => {
                let mut object = Map::new();
                object.insert("path".to_string(), Value::String(leaf.path.clone()));
                object.insert(leaf.operator.name().to_string(), leaf.operator.operand());
                Value::Object(object)
            }
            Expr::AllOf(children) => {
                let mut object = Map::new();
                object.insert(
                    "allOf".to_string(),
                    Value::Array(children.iter().map(Expr::to_json).collect()),
                );
                Value::Object(object)
            }
            Expr::AnyOf(children) => {
                let mut object = Map::new();
                object.insert(
                    "anyOf".to_string(),
                    Value::Array(children.iter().map(Expr::to_json).collect()),
                );
                Value::Object(object)
            }
            Expr::Not(inner) => {
                let mut object = Map::new();
                object.insert("not".to_string(), inner.to_json());
                Value::Object(object)
            }
            Expr::Scoped(scoped) => {
                let mut object = match scoped.body.to_json() {
                    Value::Object(map) => map,
                    _ => unreachable!(),
                };
                if let Some(resource_type) = &scoped.resource_type {
                    object.insert(
                        "resourceType".to_string(),
                        Value::String(resource_type.clone()),
                    );
                }
                if let Some(where_clause) = &scoped.where_clause {
                    object.insert("where".to_string(), where_clause.to_json());
                }
                Value::Object(object)
            }
        }
    }
}

fn expect_bool(value: &Value, key: &str) -> Result<bool> {
    value
        .as_bool()
        .ok_or_else(|| Error::ParseError(format!("`{}` operand must be a boolean", key)))
}

fn expect_number(value: &Value, key: &str) -> Result<f64> {
    value
        .as_f64()
        .ok_or_else(|| Error::ParseError(format!("`{}` operand must be a number", key)))
}

#[cfg(test)]
#[path = "exprs_tests.rs"]
mod exprs_tests;

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

use serde_json::{Map, Value};
use tracing::warn;

use crate::rules::errors::Error;
use crate::rules::path::get_ignore_case;
use crate::rules::Result;
use crate::template::functions::FunctionLibrary;
use crate::template::parser::{
    is_expression, parse_expression, unescape_literal, FunctionCall, PropertyAccess,
    TemplateExpression,
};

/// Sentinel substituted for a value whose expression could not be
/// evaluated in lenient mode. Analysis continues around it.
pub(crate) const NOT_PARSED: &str = "NOT_PARSED";

/// Copy-loop iteration state, in effect while a copied resource's
/// subtree is being evaluated.
#[derive(Debug, Clone)]
pub(crate) struct CopyContext {
    pub(crate) name: String,
    pub(crate) index: usize,
}

/// Lookup of a named resource's raw `properties` for `reference()`.
pub(crate) trait ReferenceResolver {
    fn reference_properties(&self, name: &str) -> Option<Value>;
}

pub(crate) struct NoReferences;

impl ReferenceResolver for NoReferences {
    fn reference_properties(&self, _name: &str) -> Option<Value> {
        None
    }
}

/// Recursive evaluator for template-language expressions over a JSON
/// tree. Strings matching `[...]` are parsed and evaluated, everything
/// else passes through. Parameter and variable values may themselves be
/// expressions; they are resolved lazily, memoized, and guarded against
/// self-reference.
pub(crate) struct ExpressionEvaluator<'t> {
    parameters: &'t Map<String, Value>,
    variables: Option<&'t Map<String, Value>>,
    functions: &'t dyn FunctionLibrary,
    references: &'t dyn ReferenceResolver,
    memo_parameters: RefCell<HashMap<String, Value>>,
    memo_variables: RefCell<HashMap<String, Value>>,
    in_flight: RefCell<HashSet<String>>,
}

impl<'t> ExpressionEvaluator<'t> {
    pub(crate) fn new(
        parameters: &'t Map<String, Value>,
        variables: Option<&'t Map<String, Value>>,
        functions: &'t dyn FunctionLibrary,
        references: &'t dyn ReferenceResolver,
    ) -> Self {
        ExpressionEvaluator {
            parameters,
            variables,
            functions,
            references,
            memo_parameters: RefCell::new(HashMap::new()),
            memo_variables: RefCell::new(HashMap::new()),
            in_flight: RefCell::new(HashSet::new()),
        }
    }

    /// Strict recursive evaluation: the first failure aborts the subtree.
    pub(crate) fn evaluate_value(
        &self,
        value: &Value,
        copy: Option<&CopyContext>,
    ) -> Result<Value> {
        match value {
            Value::String(text) => self.evaluate_string(text, copy),
            Value::Array(list) => {
                let mut out = Vec::with_capacity(list.len());
                for each in list {
                    out.push(self.evaluate_value(each, copy)?);
                }
                Ok(Value::Array(out))
            }
            Value::Object(map) => {
                let mut out = Map::new();
                for (key, each) in map {
                    out.insert(key.clone(), self.evaluate_value(each, copy)?);
                }
                Ok(Value::Object(out))
            }
            other => Ok(other.clone()),
        }
    }

    /// Lenient recursive evaluation: a failing expression is logged and
    /// replaced with the `NOT_PARSED` sentinel at the offending node.
    pub(crate) fn evaluate_value_lenient(&self, value: &Value, copy: Option<&CopyContext>) -> Value {
        match value {
            Value::String(text) => match self.evaluate_string(text, copy) {
                Ok(evaluated) => evaluated,
                Err(err) => {
                    warn!(expression = %text, error = %err, "expression evaluation failed");
                    Value::String(NOT_PARSED.to_string())
                }
            },
            Value::Array(list) => Value::Array(
                list.iter()
                    .map(|each| self.evaluate_value_lenient(each, copy))
                    .collect(),
            ),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(key, each)| (key.clone(), self.evaluate_value_lenient(each, copy)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    pub(crate) fn evaluate_string(&self, text: &str, copy: Option<&CopyContext>) -> Result<Value> {
        if !is_expression(text) {
            return Ok(Value::String(unescape_literal(text)));
        }
        let parsed = parse_expression(text)?;
        self.eval_expression(&parsed, copy)
    }

    fn eval_expression(
        &self,
        expression: &TemplateExpression,
        copy: Option<&CopyContext>,
    ) -> Result<Value> {
        match expression {
            TemplateExpression::String(literal) => Ok(Value::String(literal.clone())),
            TemplateExpression::Integer(number) => Ok(Value::Number((*number).into())),
            TemplateExpression::Function(function) => self.eval_function(function, copy),
        }
    }

    fn eval_function(&self, function: &FunctionCall, copy: Option<&CopyContext>) -> Result<Value> {
        let base = match function.name.to_ascii_lowercase().as_str() {
            "parameters" => {
                let name = self.single_string_arg(function, copy)?;
                self.scoped_lookup(&name, ScopeKind::Parameter)?
            }
            "variables" => {
                let name = self.single_string_arg(function, copy)?;
                self.scoped_lookup(&name, ScopeKind::Variable)?
            }
            "reference" => self.eval_reference(function, copy)?,
            "copyindex" => self.eval_copy_index(function, copy)?,
            "if" => {
                let condition = self.nth_arg(function, 0, copy)?;
                let condition = condition.as_bool().ok_or_else(|| {
                    Error::ExpressionEvaluation(
                        function.name.clone(),
                        "condition must be a boolean".to_string(),
                    )
                })?;
                if condition {
                    self.nth_arg(function, 1, copy)?
                } else {
                    self.nth_arg(function, 2, copy)?
                }
            }
            _ => {
                let mut args = Vec::with_capacity(function.args.len());
                for each in &function.args {
                    args.push(self.eval_expression(each, copy)?);
                }
                self.functions.evaluate(&function.name, &args)?
            }
        };
        self.apply_accesses(base, &function.properties, copy)
    }

    fn apply_accesses(
        &self,
        base: Value,
        accesses: &[PropertyAccess],
        copy: Option<&CopyContext>,
    ) -> Result<Value> {
        let mut current = base;
        for access in accesses {
            current = match access {
                PropertyAccess::Field(field) => current
                    .as_object()
                    .and_then(|map| get_ignore_case(map, field))
                    .cloned()
                    .ok_or_else(|| {
                        Error::ExpressionEvaluation(
                            field.clone(),
                            "no such property on expression result".to_string(),
                        )
                    })?,
                PropertyAccess::Index(index_expression) => {
                    let index = self.eval_expression(index_expression, copy)?;
                    match (&current, &index) {
                        (Value::Array(list), Value::Number(n)) => n
                            .as_u64()
                            .and_then(|i| list.get(i as usize))
                            .cloned()
                            .ok_or_else(|| {
                                Error::ExpressionEvaluation(
                                    n.to_string(),
                                    "array index out of bounds".to_string(),
                                )
                            })?,
                        (Value::Object(map), Value::String(key)) => get_ignore_case(map, key)
                            .cloned()
                            .ok_or_else(|| {
                                Error::ExpressionEvaluation(
                                    key.clone(),
                                    "no such member on expression result".to_string(),
                                )
                            })?,
                        (_, _) => {
                            return Err(Error::ExpressionEvaluation(
                                "[]".to_string(),
                                "indexing requires an array and integer or object and string"
                                    .to_string(),
                            ))
                        }
                    }
                }
            };
        }
        Ok(current)
    }

    fn single_string_arg(
        &self,
        function: &FunctionCall,
        copy: Option<&CopyContext>,
    ) -> Result<String> {
        let value = self.nth_arg(function, 0, copy)?;
        value.as_str().map(String::from).ok_or_else(|| {
            Error::ExpressionEvaluation(
                function.name.clone(),
                "argument must be a string".to_string(),
            )
        })
    }

    fn nth_arg(
        &self,
        function: &FunctionCall,
        index: usize,
        copy: Option<&CopyContext>,
    ) -> Result<Value> {
        let arg = function.args.get(index).ok_or_else(|| {
            Error::ExpressionEvaluation(
                function.name.clone(),
                format!("missing argument {}", index),
            )
        })?;
        self.eval_expression(arg, copy)
    }

    fn scoped_lookup(&self, name: &str, kind: ScopeKind) -> Result<Value> {
        let memo = match kind {
            ScopeKind::Parameter => &self.memo_parameters,
            ScopeKind::Variable => &self.memo_variables,
        };
        let key = name.to_ascii_lowercase();
        if let Some(hit) = memo.borrow().get(&key) {
            return Ok(hit.clone());
        }

        let raw = match kind {
            ScopeKind::Parameter => get_ignore_case(self.parameters, name).cloned(),
            ScopeKind::Variable => self
                .variables
                .and_then(|map| get_ignore_case(map, name))
                .cloned(),
        }
        .ok_or_else(|| {
            Error::ExpressionEvaluation(
                name.to_string(),
                format!("undefined {}", kind.describe()),
            )
        })?;

        let evaluated = self.with_cycle_guard(&format!("{}:{}", kind.describe(), key), || {
            // copy context never crosses into parameter or variable bodies
            self.evaluate_value(&raw, None)
        })?;
        memo.borrow_mut().insert(key, evaluated.clone());
        Ok(evaluated)
    }

    fn eval_reference(
        &self,
        function: &FunctionCall,
        copy: Option<&CopyContext>,
    ) -> Result<Value> {
        let target = self.single_string_arg(function, copy)?;
        // accepts a bare name or a full resource id
        let simple = target.rsplit('/').next().unwrap_or(&target).to_string();
        let raw = match self.references.reference_properties(&simple) {
            Some(properties) => properties,
            None => {
                warn!(reference = %target, "reference() target not found, skipping");
                return Err(Error::ExpressionEvaluation(
                    function.name.clone(),
                    format!("unknown reference target `{}`", target),
                ));
            }
        };
        self.with_cycle_guard(&format!("reference:{}", simple.to_ascii_lowercase()), || {
            self.evaluate_value(&raw, None)
        })
    }

    fn eval_copy_index(
        &self,
        function: &FunctionCall,
        copy: Option<&CopyContext>,
    ) -> Result<Value> {
        let context = copy.ok_or_else(|| {
            Error::ExpressionEvaluation(
                function.name.clone(),
                "copyIndex used outside of a copy loop".to_string(),
            )
        })?;
        let mut offset: i64 = 0;
        match function.args.len() {
            0 => {}
            1 => match self.nth_arg(function, 0, copy)? {
                Value::Number(n) => offset = n.as_i64().unwrap_or(0),
                Value::String(name) => self.check_loop_name(&name, context)?,
                _ => {
                    return Err(Error::ExpressionEvaluation(
                        function.name.clone(),
                        "argument must be a loop name or offset".to_string(),
                    ))
                }
            },
            _ => {
                let name = self.single_string_arg(function, copy)?;
                self.check_loop_name(&name, context)?;
                offset = self
                    .nth_arg(function, 1, copy)?
                    .as_i64()
                    .ok_or_else(|| {
                        Error::ExpressionEvaluation(
                            function.name.clone(),
                            "offset must be an integer".to_string(),
                        )
                    })?;
            }
        }
        Ok(Value::Number((context.index as i64 + offset).into()))
    }

    fn check_loop_name(&self, name: &str, context: &CopyContext) -> Result<()> {
        if name.eq_ignore_ascii_case(&context.name) {
            Ok(())
        } else {
            Err(Error::ExpressionEvaluation(
                "copyIndex".to_string(),
                format!("unknown copy loop `{}`", name),
            ))
        }
    }

    fn with_cycle_guard<F>(&self, key: &str, body: F) -> Result<Value>
    where
        F: FnOnce() -> Result<Value>,
    {
        if !self.in_flight.borrow_mut().insert(key.to_string()) {
            return Err(Error::ExpressionEvaluation(
                key.to_string(),
                "cyclic expression reference".to_string(),
            ));
        }
        let outcome = body();
        self.in_flight.borrow_mut().remove(key);
        outcome
    }
}

enum ScopeKind {
    Parameter,
    Variable,
}

impl ScopeKind {
    fn describe(&self) -> &'static str {
        match self {
            ScopeKind::Parameter => "parameter",
            ScopeKind::Variable => "variable",
        }
    }
}

#[cfg(test)]
#[path = "expressions_tests.rs"]
mod expressions_tests;

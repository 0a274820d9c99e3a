use std::collections::{HashMap, HashSet};

use serde::Deserialize;
use serde_json::Value;

use crate::rules::errors::Error;
use crate::rules::eval::evaluate;
use crate::rules::exprs::Expr;
use crate::rules::path::Path;
use crate::rules::{EvaluationContext, ResourceScope, Result, RuleResult};

const DEFAULT_SEVERITY: u8 = 3;

#[derive(Debug, Clone)]
pub struct RuleDefinition {
    pub id: String,
    pub description: String,
    pub recommendation: String,
    pub help_uri: Option<String>,
    /// 1..=4, smaller is more severe. Mutable post-load via overrides.
    pub severity: u8,
    pub(crate) evaluation: Expr,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzerConfig {
    pub inclusions: Option<FilterSpec>,
    pub exclusions: Option<FilterSpec>,
    #[serde(default)]
    pub severity_overrides: HashMap<String, u8>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterSpec {
    #[serde(default)]
    pub severity: Vec<u8>,
    #[serde(default)]
    pub ids: Vec<String>,
}

impl FilterSpec {
    fn matches(&self, rule: &RuleDefinition) -> bool {
        self.severity.contains(&rule.severity)
            || self.ids.iter().any(|id| id.eq_ignore_ascii_case(&rule.id))
    }
}

impl AnalyzerConfig {
    pub fn from_json(raw: &str) -> Result<AnalyzerConfig> {
        Ok(serde_json::from_str(raw)?)
    }
}

#[derive(Debug, Clone)]
pub struct RuleCatalog {
    rules: Vec<RuleDefinition>,
}

impl RuleCatalog {
    /// Parses a JSON array of rule definitions, eagerly compiling every
    /// rule's evaluation expression. The first malformed rule aborts the
    /// load, naming the offending rule id.
    pub fn from_json(raw: &str) -> Result<RuleCatalog> {
        let document: Value = serde_json::from_str(raw)?;
        let entries = document
            .as_array()
            .ok_or_else(|| Error::ParseError("rule catalog is not a JSON array".to_string()))?;

        let mut rules = Vec::with_capacity(entries.len());
        let mut seen = HashSet::new();
        for (index, entry) in entries.iter().enumerate() {
            let rule = RuleCatalog::load_rule(entry)
                .map_err(|err| match err {
                    already @ Error::CatalogParse { .. } => already,
                    other => Error::CatalogParse {
                        rule_id: rule_id_of(entry)
                            .unwrap_or_else(|| format!("<rule at index {}>", index)),
                        reason: other.to_string(),
                    },
                })?;
            if !seen.insert(rule.id.to_ascii_lowercase()) {
                return Err(Error::CatalogParse {
                    rule_id: rule.id,
                    reason: "duplicate rule id".to_string(),
                });
            }
            rules.push(rule);
        }
        Ok(RuleCatalog { rules })
    }

    fn load_rule(entry: &Value) -> Result<RuleDefinition> {
        let object = entry
            .as_object()
            .ok_or_else(|| Error::ParseError("rule definition is not an object".to_string()))?;
        let id = object
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::ParseError("rule has no `id`".to_string()))?
            .to_string();

        let severity = match object.get("severity") {
            None => DEFAULT_SEVERITY,
            Some(value) => value
                .as_u64()
                .filter(|n| (1..=4).contains(n))
                .ok_or_else(|| Error::CatalogParse {
                    rule_id: id.clone(),
                    reason: "severity must be an integer in 1..=4".to_string(),
                })? as u8,
        };

        let evaluation_node = object.get("evaluation").ok_or_else(|| Error::CatalogParse {
            rule_id: id.clone(),
            reason: "rule has no `evaluation`".to_string(),
        })?;
        let evaluation = Expr::from_json(evaluation_node).map_err(|err| Error::CatalogParse {
            rule_id: id.clone(),
            reason: err.to_string(),
        })?;

        Ok(RuleDefinition {
            description: string_field(object, "description"),
            recommendation: string_field(object, "recommendation"),
            help_uri: object
                .get("helpUri")
                .and_then(Value::as_str)
                .map(String::from),
            id,
            severity,
            evaluation,
        })
    }

    pub fn rules(&self) -> &[RuleDefinition] {
        &self.rules
    }

    /// Applies inclusion XOR exclusion filtering, then severity overrides
    /// on the survivors. Idempotent for a fixed configuration.
    pub fn filter(&mut self, config: &AnalyzerConfig) -> Result<()> {
        match (&config.inclusions, &config.exclusions) {
            (Some(_), Some(_)) => {
                return Err(Error::IllegalArguments(
                    "inclusions and exclusions are mutually exclusive".to_string(),
                ))
            }
            (Some(inclusions), None) => self.rules.retain(|rule| inclusions.matches(rule)),
            (None, Some(exclusions)) => self.rules.retain(|rule| !exclusions.matches(rule)),
            (None, None) => {}
        }

        for rule in &mut self.rules {
            if let Some(severity) = lookup_override(&config.severity_overrides, &rule.id) {
                if !(1..=4).contains(&severity) {
                    return Err(Error::IllegalArguments(format!(
                        "severity override for `{}` must be in 1..=4",
                        rule.id
                    )));
                }
                rule.severity = severity;
            }
        }
        Ok(())
    }

    /// Runs every rule against the expanded template, emitting one record
    /// per rule outcome in (rule index, resource discovery) order.
    pub(crate) fn analyze(
        &self,
        context: &dyn EvaluationContext,
        root: &Value,
        file_identifier: &str,
    ) -> Vec<RuleResult> {
        let root_scope = ResourceScope {
            value: root,
            path: Path::root(),
        };
        let mut results = Vec::new();
        for rule in &self.rules {
            for outcome in evaluate(&rule.evaluation, &root_scope, context) {
                results.push(RuleResult {
                    rule_id: rule.id.clone(),
                    description: rule.description.clone(),
                    recommendation: rule.recommendation.clone(),
                    help_uri: rule.help_uri.clone(),
                    severity: rule.severity,
                    passed: outcome.passed,
                    file_identifier: file_identifier.to_string(),
                    result: outcome.result,
                    sub_evaluations: outcome.sub_evaluations,
                });
            }
        }
        results
    }
}

fn string_field(object: &serde_json::Map<String, Value>, key: &str) -> String {
    object
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn rule_id_of(entry: &Value) -> Option<String> {
    entry
        .as_object()
        .and_then(|object| object.get("id"))
        .and_then(Value::as_str)
        .map(String::from)
}

fn lookup_override(overrides: &HashMap<String, u8>, id: &str) -> Option<u8> {
    if let Some(severity) = overrides.get(id) {
        return Some(*severity);
    }
    overrides
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(id))
        .map(|(_, severity)| *severity)
}

#[cfg(test)]
#[path = "catalog_tests.rs"]
mod catalog_tests;

pub mod catalog;
pub mod errors;
pub(crate) mod eval;
pub(crate) mod exprs;
pub(crate) mod operators;
pub(crate) mod path;

use serde::Serialize;

use crate::rules::path::Path;

pub type Result<R> = std::result::Result<R, errors::Error>;

/// Concrete outcome of a single leaf predicate at a resolved path. The
/// path is the absolute location inside the expanded template; the line
/// number points back into the original source text (0 when unknown).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeafResult {
    pub path: String,
    pub line_number: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Evaluation {
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<LeafResult>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sub_evaluations: Vec<Evaluation>,
}

impl Evaluation {
    pub(crate) fn leaf(passed: bool, result: LeafResult) -> Self {
        Evaluation {
            passed,
            result: Some(result),
            sub_evaluations: vec![],
        }
    }

    pub(crate) fn aggregate(passed: bool, sub_evaluations: Vec<Evaluation>) -> Self {
        Evaluation {
            passed,
            result: None,
            sub_evaluations,
        }
    }

    /// Leaf results to report for a failed evaluation. Failing branches
    /// contribute their own failing leaves; a failed negation whose inner
    /// clauses all passed contributes every leaf underneath it, since those
    /// are the locations that satisfied the negated condition.
    pub fn failed_results(&self) -> Vec<&LeafResult> {
        if self.passed {
            return vec![];
        }
        if let Some(result) = &self.result {
            if self.sub_evaluations.is_empty() {
                return vec![result];
            }
        }
        let from_failed: Vec<&LeafResult> = self
            .sub_evaluations
            .iter()
            .filter(|each| !each.passed)
            .flat_map(|each| each.failed_results())
            .collect();
        if !from_failed.is_empty() {
            return from_failed;
        }
        self.sub_evaluations
            .iter()
            .flat_map(|each| each.all_results())
            .collect()
    }

    fn all_results(&self) -> Vec<&LeafResult> {
        let mut acc = Vec::new();
        if let Some(result) = &self.result {
            acc.push(result);
        }
        for each in &self.sub_evaluations {
            acc.extend(each.all_results());
        }
        acc
    }
}

pub(crate) fn all_passed(evaluations: &[Evaluation]) -> bool {
    evaluations.iter().all(|each| each.passed)
}

/// One emitted record per rule outcome, tagged with the rule metadata and
/// the identifier of the analyzed file.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleResult {
    pub rule_id: String,
    pub description: String,
    pub recommendation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub help_uri: Option<String>,
    pub severity: u8,
    pub passed: bool,
    pub file_identifier: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<LeafResult>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sub_evaluations: Vec<Evaluation>,
}

impl RuleResult {
    pub fn failed_results(&self) -> Vec<LeafResult> {
        if self.passed {
            return vec![];
        }
        let as_evaluation = Evaluation {
            passed: self.passed,
            result: self.result.clone(),
            sub_evaluations: self.sub_evaluations.clone(),
        };
        as_evaluation
            .failed_results()
            .into_iter()
            .cloned()
            .collect()
    }
}

/// Seam between the rule engine and the template subsystem. The expanded
/// template implements this to hand resources to scope shifts and to
/// translate expanded paths back to source line numbers.
pub(crate) trait EvaluationContext {
    fn resources_of_type(&self, resource_type: &str) -> Vec<ResourceScope<'_>>;
    fn resolve_line(&self, expanded_path: &str) -> u32;
}

#[derive(Debug, Clone)]
pub(crate) struct ResourceScope<'t> {
    pub(crate) value: &'t serde_json::Value,
    pub(crate) path: Path,
}

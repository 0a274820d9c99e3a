use crate::rules::exprs::{Expr, LeafExpr, ScopedExpr};
use crate::rules::path::resolve;
use crate::rules::{all_passed, Evaluation, EvaluationContext, LeafResult, ResourceScope};

/// Evaluates an expression against a scope (a resource subtree, or the
/// whole template at the root). Ordering is deterministic: children keep
/// input order, scope shifts follow resource discovery order.
pub(crate) fn evaluate(
    expr: &Expr,
    scope: &ResourceScope<'_>,
    context: &dyn EvaluationContext,
) -> Vec<Evaluation> {
    match expr {
        Expr::Leaf(leaf) => evaluate_leaf(leaf, scope, context),
        Expr::AllOf(children) => {
            let sub_evaluations: Vec<Evaluation> = children
                .iter()
                .flat_map(|child| evaluate(child, scope, context))
                .collect();
            let passed = all_passed(&sub_evaluations);
            vec![Evaluation::aggregate(passed, sub_evaluations)]
        }
        Expr::AnyOf(children) => {
            // a child whose paths resolve to nothing is vacuous: it neither
            // satisfies the disjunction nor fails it on its own
            let mut any_concrete_pass = false;
            let mut all_vacuous = true;
            let mut sub_evaluations = Vec::with_capacity(children.len());
            for child in children {
                let child_evaluations = evaluate(child, scope, context);
                if !child_evaluations.is_empty() {
                    all_vacuous = false;
                    any_concrete_pass = any_concrete_pass || all_passed(&child_evaluations);
                }
                sub_evaluations.extend(child_evaluations);
            }
            let passed = any_concrete_pass || all_vacuous;
            vec![Evaluation::aggregate(passed, sub_evaluations)]
        }
        Expr::Not(inner) => {
            let sub_evaluations = evaluate(inner, scope, context);
            let passed = !all_passed(&sub_evaluations);
            vec![Evaluation::aggregate(passed, sub_evaluations)]
        }
        Expr::Scoped(scoped) => evaluate_scoped(scoped, scope, context),
    }
}

fn evaluate_leaf(
    leaf: &LeafExpr,
    scope: &ResourceScope<'_>,
    context: &dyn EvaluationContext,
) -> Vec<Evaluation> {
    resolve(scope.value, &leaf.query, &scope.path)
        .into_iter()
        .map(|(resolved, path)| {
            let passed = leaf.operator.evaluate(&resolved);
            let line_number = context.resolve_line(path.as_str());
            Evaluation::leaf(
                passed,
                LeafResult {
                    path: path.as_str().to_string(),
                    line_number,
                },
            )
        })
        .collect()
}

fn evaluate_scoped(
    scoped: &ScopedExpr,
    scope: &ResourceScope<'_>,
    context: &dyn EvaluationContext,
) -> Vec<Evaluation> {
    let candidates: Vec<ResourceScope<'_>> = match &scoped.resource_type {
        Some(resource_type) => context.resources_of_type(resource_type),
        None => vec![scope.clone()],
    };

    let mut outcomes = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        if let Some(where_clause) = &scoped.where_clause {
            let filter = evaluate(where_clause, &candidate, context);
            if !where_admits(&filter) {
                continue;
            }
        }
        let body_evaluations = evaluate(&scoped.body, &candidate, context);
        let passed = all_passed(&body_evaluations);
        outcomes.push(Evaluation::aggregate(passed, body_evaluations));
    }
    outcomes
}

/// A candidate survives a `where` filter only when the filter passed AND
/// actually inspected something. Resources it rejects are dropped
/// silently, never reported.
fn where_admits(evaluations: &[Evaluation]) -> bool {
    !evaluations.is_empty() && all_passed(evaluations) && has_concrete_result(evaluations)
}

fn has_concrete_result(evaluations: &[Evaluation]) -> bool {
    evaluations
        .iter()
        .any(|each| each.result.is_some() || has_concrete_result(&each.sub_evaluations))
}

#[cfg(test)]
#[path = "eval_tests.rs"]
mod eval_tests;

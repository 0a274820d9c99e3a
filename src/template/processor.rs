use std::collections::{HashMap, HashSet};

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::rules::errors::Error;
use crate::rules::path::{get_ignore_case, Path};
use crate::rules::Result;
use crate::template::expressions::{CopyContext, ExpressionEvaluator, ReferenceResolver};
use crate::template::functions::FunctionLibrary;
use crate::template::parser::is_expression;
use crate::template::placeholders::{materialize_parameters, parse_parameters_file};
use crate::template::{value_at_path, value_at_path_mut, ResourceMappings};

#[derive(Debug, Clone, Default)]
pub struct ProcessorOptions {
    /// Surface expression evaluation errors instead of substituting the
    /// NOT_PARSED sentinel and continuing.
    pub strict_expressions: bool,
}

/// Simulates deployment-time expansion: placeholder parameters, copy
/// loops, language expressions, resource flattening, dependsOn child
/// attachment, and the expanded-to-original path mappings.
pub(crate) struct TemplateProcessor<'f> {
    functions: &'f dyn FunctionLibrary,
    options: ProcessorOptions,
}

/// One resource in the flattened set, keyed by
/// `"<name-chain> <type-chain>"` with `/`-joined chains from the root.
#[derive(Debug, Clone)]
pub(crate) struct FlattenedResource {
    pub(crate) key: String,
    pub(crate) type_chain: String,
    pub(crate) path: Path,
    pub(crate) original_name: Option<String>,
}

#[derive(Debug)]
pub(crate) struct ProcessedTemplate {
    pub(crate) template: Value,
    pub(crate) mappings: ResourceMappings,
    pub(crate) flattened: Vec<FlattenedResource>,
}

struct CopyNote {
    copy: Option<CopyContext>,
    original_index: usize,
}

/// `reference()` lookup over the raw resources, matched on literal
/// (pre-evaluation) names.
struct ResourceReferences {
    properties_by_name: HashMap<String, Value>,
}

impl ResourceReferences {
    fn collect(resources: &[Value]) -> Self {
        let mut properties_by_name = HashMap::new();
        let mut pending: Vec<&Value> = resources.iter().collect();
        while let Some(resource) = pending.pop() {
            let object = match resource.as_object() {
                Some(object) => object,
                None => continue,
            };
            if let Some(name) = get_ignore_case(object, "name").and_then(Value::as_str) {
                if !is_expression(name) {
                    let properties = get_ignore_case(object, "properties")
                        .cloned()
                        .unwrap_or(Value::Object(Map::new()));
                    properties_by_name.insert(name.to_ascii_lowercase(), properties);
                }
            }
            if let Some(children) = get_ignore_case(object, "resources").and_then(Value::as_array) {
                pending.extend(children.iter());
            }
        }
        ResourceReferences { properties_by_name }
    }
}

impl ReferenceResolver for ResourceReferences {
    fn reference_properties(&self, name: &str) -> Option<Value> {
        self.properties_by_name
            .get(&name.to_ascii_lowercase())
            .cloned()
    }
}

impl<'f> TemplateProcessor<'f> {
    pub(crate) fn new(functions: &'f dyn FunctionLibrary, options: ProcessorOptions) -> Self {
        TemplateProcessor { functions, options }
    }

    pub(crate) fn process(
        &self,
        template_text: &str,
        parameters_text: Option<&str>,
    ) -> Result<ProcessedTemplate> {
        let template: Value = serde_json::from_str(template_text)
            .map_err(|err| Error::TemplateParse(err.to_string()))?;
        let root = template
            .as_object()
            .ok_or_else(|| Error::TemplateParse("template is not a JSON object".to_string()))?;
        validate_top_level(root)?;

        let supplied = match parameters_text {
            Some(raw) => Some(parse_parameters_file(raw)?),
            None => None,
        };
        let declared = get_ignore_case(root, "parameters").and_then(Value::as_object);
        let parameters = materialize_parameters(declared, supplied.as_ref())?;
        let variables = get_ignore_case(root, "variables")
            .and_then(Value::as_object)
            .cloned();

        let original_resources: Vec<Value> = get_ignore_case(root, "resources")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let references = ResourceReferences::collect(&original_resources);
        let evaluator = ExpressionEvaluator::new(
            &parameters,
            variables.as_ref(),
            self.functions,
            &references,
        );

        let mut mappings = ResourceMappings::default();
        let (mut resources, notes) =
            self.expand_copies(&original_resources, &evaluator, &mut mappings)?;

        // literal names, snapshotted before expression evaluation rewrites them
        let mut original_names: HashMap<String, String> = HashMap::new();
        for (index, resource) in resources.iter().enumerate() {
            snapshot_original_names(
                resource,
                &Path::root().extend_key("resources").extend_index(index),
                &mut original_names,
            );
        }

        for (index, resource) in resources.iter_mut().enumerate() {
            let copy = notes[index].copy.as_ref();
            if self.options.strict_expressions {
                *resource = evaluator.evaluate_value(resource, copy)?;
            } else {
                *resource = evaluator.evaluate_value_lenient(resource, copy);
            }
        }

        let mut expanded = template.clone();
        set_member(&mut expanded, "resources", Value::Array(resources));
        self.evaluate_outputs(&mut expanded, &evaluator)?;

        validate_processed(&expanded)?;

        let flattened = flatten_resources(&expanded, &original_names)?;
        self.attach_dependencies(&mut expanded, &flattened, &mut mappings)?;

        Ok(ProcessedTemplate {
            template: expanded,
            mappings,
            flattened,
        })
    }

    /// Replaces every resource carrying a `copy` block with `count`
    /// instances and records the mappings back to the prototype, plus
    /// shift mappings for the resources displaced behind the copies.
    fn expand_copies(
        &self,
        original_resources: &[Value],
        evaluator: &ExpressionEvaluator<'_>,
        mappings: &mut ResourceMappings,
    ) -> Result<(Vec<Value>, Vec<CopyNote>)> {
        let mut resources = Vec::with_capacity(original_resources.len());
        let mut notes = Vec::with_capacity(original_resources.len());

        for (original_index, resource) in original_resources.iter().enumerate() {
            let descriptor = resource
                .as_object()
                .and_then(|object| get_ignore_case(object, "copy"));
            match descriptor {
                Some(Value::Object(descriptor)) => {
                    let loop_name = get_ignore_case(descriptor, "name")
                        .and_then(Value::as_str)
                        .ok_or_else(|| {
                            Error::TemplateParse("copy block without a `name`".to_string())
                        })?
                        .to_string();
                    let count = self.copy_count(descriptor, evaluator)?;
                    debug!(loop_name = %loop_name, count, "expanding copy loop");
                    for index in 0..count {
                        let mut instance = resource.clone();
                        if let Some(object) = instance.as_object_mut() {
                            remove_ignore_case(object, "copy");
                        }
                        notes.push(CopyNote {
                            copy: Some(CopyContext {
                                name: loop_name.clone(),
                                index,
                            }),
                            original_index,
                        });
                        resources.push(instance);
                    }
                }
                Some(_) => {
                    return Err(Error::TemplateParse(
                        "`copy` must be an object".to_string(),
                    ))
                }
                None => {
                    notes.push(CopyNote {
                        copy: None,
                        original_index,
                    });
                    resources.push(resource.clone());
                }
            }
        }

        for (new_index, note) in notes.iter().enumerate() {
            if note.copy.is_some() || new_index != note.original_index {
                mappings.add(
                    &format!("resources[{}]", new_index),
                    &format!("resources[{}]", note.original_index),
                )?;
            }
        }
        Ok((resources, notes))
    }

    fn copy_count(
        &self,
        descriptor: &Map<String, Value>,
        evaluator: &ExpressionEvaluator<'_>,
    ) -> Result<usize> {
        let raw = get_ignore_case(descriptor, "count")
            .ok_or_else(|| Error::TemplateParse("copy block without a `count`".to_string()))?;
        let resolved = match raw {
            Value::Number(_) => raw.clone(),
            Value::String(text) => evaluator.evaluate_string(text, None).map_err(|err| {
                Error::TemplateParse(format!("unresolvable copy count: {}", err))
            })?,
            _ => {
                return Err(Error::TemplateParse(
                    "copy `count` must be an integer or expression".to_string(),
                ))
            }
        };
        let count = match &resolved {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.parse::<i64>().ok(),
            _ => None,
        };
        count
            .filter(|n| *n >= 0)
            .map(|n| n as usize)
            .ok_or_else(|| {
                Error::TemplateParse(format!(
                    "copy `count` did not resolve to a non-negative integer: {}",
                    resolved
                ))
            })
    }

    fn evaluate_outputs(
        &self,
        expanded: &mut Value,
        evaluator: &ExpressionEvaluator<'_>,
    ) -> Result<()> {
        let outputs = expanded
            .as_object_mut()
            .and_then(|object| {
                let key = object
                    .keys()
                    .find(|k| k.eq_ignore_ascii_case("outputs"))
                    .cloned()?;
                object.get_mut(&key)
            })
            .and_then(Value::as_object_mut);
        if let Some(outputs) = outputs {
            for (_, output) in outputs.iter_mut() {
                if self.options.strict_expressions {
                    *output = evaluator.evaluate_value(output, None)?;
                } else {
                    *output = evaluator.evaluate_value_lenient(output, None);
                }
            }
        }
        Ok(())
    }

    /// For every flattened resource with `dependsOn`, appends the
    /// dependent as a child of the resource it depends on and records the
    /// mapping from the new child path to the dependent's original path.
    fn attach_dependencies(
        &self,
        expanded: &mut Value,
        flattened: &[FlattenedResource],
        mappings: &mut ResourceMappings,
    ) -> Result<()> {
        let snapshot = expanded.clone();
        for resource in flattened {
            let value = match value_at_path(&snapshot, &resource.path) {
                Some(value) => value,
                None => continue,
            };
            let dependencies = value
                .as_object()
                .and_then(|object| get_ignore_case(object, "dependsOn"))
                .and_then(Value::as_array);
            let dependencies = match dependencies {
                Some(list) => list,
                None => continue,
            };

            for dependency in dependencies.iter().filter_map(Value::as_str) {
                let target = match resolve_dependency(dependency, flattened) {
                    Some(target) => target,
                    None => continue,
                };
                if target.path == resource.path {
                    warn!(dependency, "resource depends on itself, skipping");
                    continue;
                }

                let child = value.clone();
                let parent = match value_at_path_mut(expanded, &target.path)
                    .and_then(Value::as_object_mut)
                {
                    Some(parent) => parent,
                    None => {
                        warn!(dependency, "dependsOn parent not addressable, skipping");
                        continue;
                    }
                };
                let children = parent
                    .keys()
                    .find(|k| k.eq_ignore_ascii_case("resources"))
                    .cloned();
                let children = match children {
                    Some(key) => parent
                        .get_mut(&key)
                        .and_then(Value::as_array_mut),
                    None => {
                        parent.insert("resources".to_string(), Value::Array(vec![]));
                        parent
                            .get_mut("resources")
                            .and_then(Value::as_array_mut)
                    }
                };
                let children = match children {
                    Some(children) => children,
                    None => {
                        warn!(dependency, "dependsOn parent `resources` is not an array, skipping");
                        continue;
                    }
                };

                let attach_index = children.len();
                children.push(child);
                let child_original = mappings.to_original(resource.path.as_str());
                mappings.add(
                    &format!("{}.resources[{}]", target.path, attach_index),
                    &child_original,
                )?;
            }
        }
        Ok(())
    }
}

fn validate_top_level(object: &Map<String, Value>) -> Result<()> {
    let schema = get_ignore_case(object, "$schema")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::TemplateParse("missing `$schema`".to_string()))?;
    if !schema.to_ascii_lowercase().contains("deploymenttemplate") {
        return Err(Error::TemplateParse(format!(
            "`$schema` is not a deployment template schema: {}",
            schema
        )));
    }
    match get_ignore_case(object, "resources") {
        Some(Value::Array(_)) => Ok(()),
        Some(_) => Err(Error::TemplateParse(
            "`resources` is not an array".to_string(),
        )),
        None => Err(Error::TemplateParse("missing `resources`".to_string())),
    }
}

fn validate_processed(expanded: &Value) -> Result<()> {
    let resources = expanded
        .as_object()
        .and_then(|object| get_ignore_case(object, "resources"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let mut pending: Vec<&Value> = resources.iter().collect();
    while let Some(resource) = pending.pop() {
        let object = resource
            .as_object()
            .ok_or_else(|| Error::TemplateParse("resource is not an object".to_string()))?;
        for field in ["type", "name"] {
            let present = get_ignore_case(object, field)
                .and_then(Value::as_str)
                .map_or(false, |s| !s.is_empty());
            if !present {
                return Err(Error::TemplateParse(format!(
                    "resource is missing `{}`",
                    field
                )));
            }
        }
        if get_ignore_case(object, "apiVersion").is_none() {
            let name = get_ignore_case(object, "name").and_then(Value::as_str);
            warn!(resource = ?name, "resource has no apiVersion");
        }
        if let Some(children) = get_ignore_case(object, "resources").and_then(Value::as_array) {
            pending.extend(children.iter());
        }
    }
    Ok(())
}

/// Depth-first walk assigning each resource its expanded path and its
/// cascaded `"<name-chain> <type-chain>"` key. Keys are globally unique;
/// duplicates fail fast.
fn flatten_resources(
    expanded: &Value,
    original_names: &HashMap<String, String>,
) -> Result<Vec<FlattenedResource>> {
    let resources = expanded
        .as_object()
        .and_then(|object| get_ignore_case(object, "resources"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut out = Vec::new();
    let mut seen = HashSet::new();
    flatten_level(
        &resources,
        &Path::root(),
        None,
        original_names,
        &mut out,
        &mut seen,
    )?;
    Ok(out)
}

fn flatten_level(
    resources: &[Value],
    parent_path: &Path,
    parent_chains: Option<(&str, &str)>,
    original_names: &HashMap<String, String>,
    out: &mut Vec<FlattenedResource>,
    seen: &mut HashSet<String>,
) -> Result<()> {
    for (index, resource) in resources.iter().enumerate() {
        let path = parent_path.extend_key("resources").extend_index(index);
        let object = match resource.as_object() {
            Some(object) => object,
            None => continue,
        };
        let name = get_ignore_case(object, "name")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let resource_type = get_ignore_case(object, "type")
            .and_then(Value::as_str)
            .unwrap_or_default();

        // children may declare relative or fully qualified names/types
        let (name_chain, type_chain) = match parent_chains {
            Some((parent_names, parent_types)) => (
                cascade(parent_names, name),
                cascade(parent_types, resource_type),
            ),
            None => (name.to_string(), resource_type.to_string()),
        };
        let key = format!("{} {}", name_chain, type_chain);
        if !seen.insert(key.to_ascii_lowercase()) {
            return Err(Error::TemplateParse(format!(
                "duplicate resource key `{}`",
                key
            )));
        }
        out.push(FlattenedResource {
            key,
            type_chain: type_chain.clone(),
            path: path.clone(),
            original_name: original_names.get(path.as_str()).cloned(),
        });

        if let Some(children) = get_ignore_case(object, "resources").and_then(Value::as_array) {
            flatten_level(
                children,
                &path,
                Some((&name_chain, &type_chain)),
                original_names,
                out,
                seen,
            )?;
        }
    }
    Ok(())
}

fn cascade(parent: &str, child: &str) -> String {
    if child.contains('/') {
        child.to_string()
    } else {
        format!("{}/{}", parent, child)
    }
}

/// A dependency is either a fully qualified resource id (resolved through
/// `/providers/`) or a bare name matched against the head of the flat
/// keys. Ambiguous bare names and unknown parents are skipped with a
/// warning rather than guessed at.
fn resolve_dependency<'a>(
    dependency: &str,
    flattened: &'a [FlattenedResource],
) -> Option<&'a FlattenedResource> {
    if let Some(position) = dependency.to_ascii_lowercase().find("/providers/") {
        let tail = &dependency[position + "/providers/".len()..];
        let segments: Vec<&str> = tail.split('/').filter(|s| !s.is_empty()).collect();
        if segments.len() < 3 || segments.len() % 2 == 0 {
            warn!(dependency, "malformed resource id in dependsOn, skipping");
            return None;
        }
        let namespace = segments[0];
        let mut types = vec![namespace.to_string()];
        let mut names = Vec::new();
        for pair in segments[1..].chunks(2) {
            types.push(pair[0].to_string());
            names.push(pair[1].to_string());
        }
        let key = format!("{} {}", names.join("/"), types.join("/"));
        let found = flattened
            .iter()
            .find(|resource| resource.key.eq_ignore_ascii_case(&key));
        if found.is_none() {
            warn!(dependency, "dependsOn parent not found, skipping");
        }
        return found;
    }

    let prefix = format!("{} ", dependency.to_ascii_lowercase());
    let matches: Vec<&FlattenedResource> = flattened
        .iter()
        .filter(|resource| {
            resource.key.to_ascii_lowercase().starts_with(&prefix)
                || resource
                    .original_name
                    .as_deref()
                    .map_or(false, |name| name.eq_ignore_ascii_case(dependency))
        })
        .collect();
    match matches.as_slice() {
        [single] => Some(single),
        [] => {
            warn!(dependency, "dependsOn parent not found, skipping");
            None
        }
        _ => {
            warn!(dependency, "dependsOn name is ambiguous, skipping");
            None
        }
    }
}

fn snapshot_original_names(
    resource: &Value,
    path: &Path,
    original_names: &mut HashMap<String, String>,
) {
    let object = match resource.as_object() {
        Some(object) => object,
        None => return,
    };
    if let Some(name) = get_ignore_case(object, "name").and_then(Value::as_str) {
        if !is_expression(name) {
            original_names.insert(path.as_str().to_string(), name.to_string());
        }
    }
    if let Some(children) = get_ignore_case(object, "resources").and_then(Value::as_array) {
        for (index, child) in children.iter().enumerate() {
            snapshot_original_names(
                child,
                &path.extend_key("resources").extend_index(index),
                original_names,
            );
        }
    }
}

fn set_member(document: &mut Value, member: &str, value: Value) {
    if let Some(object) = document.as_object_mut() {
        let key = object
            .keys()
            .find(|k| k.eq_ignore_ascii_case(member))
            .cloned()
            .unwrap_or_else(|| member.to_string());
        object.insert(key, value);
    }
}

fn remove_ignore_case(object: &mut Map<String, Value>, member: &str) {
    let key = object
        .keys()
        .find(|k| k.eq_ignore_ascii_case(member))
        .cloned();
    if let Some(key) = key {
        object.remove(&key);
    }
}

#[cfg(test)]
#[path = "processor_tests.rs"]
mod processor_tests;

pub(crate) mod expressions;
pub(crate) mod functions;
pub mod locator;
pub(crate) mod parser;
pub(crate) mod placeholders;
pub mod processor;

use std::collections::BTreeMap;

use serde_json::Value;

pub use crate::template::locator::{LineLocator, SourceMap};
pub use crate::template::processor::ProcessorOptions;

use crate::rules::errors::Error;
use crate::rules::path::{JsonPath, Path, PathSegment};
use crate::rules::{EvaluationContext, ResourceScope, Result};
use crate::template::functions::StandardFunctions;
use crate::template::processor::{FlattenedResource, TemplateProcessor};

/// Map from every path in the expanded template back to the originating
/// path in the source template. Many-to-one: every instance stamped out
/// of a copy loop maps to the prototype. Build-only during processing,
/// frozen afterwards.
#[derive(Debug, Default, Clone)]
pub struct ResourceMappings {
    expanded_to_original: BTreeMap<String, String>,
}

impl ResourceMappings {
    /// Records `expanded -> original`. Remapping an expanded path to a
    /// different original is a processor bug and fails fast. The new
    /// mapping is also routed through every copy whose original side is a
    /// prefix of `expanded`, so that grandchildren of copied resources
    /// stay discoverable.
    pub(crate) fn add(&mut self, expanded: &str, original: &str) -> Result<()> {
        if let Some(existing) = self.expanded_to_original.get(expanded) {
            if existing != original {
                return Err(Error::ResourceMappingConflict {
                    expanded: expanded.to_string(),
                    existing: existing.clone(),
                    conflicting: original.to_string(),
                });
            }
            return Ok(());
        }

        let aliases: Vec<String> = self
            .expanded_to_original
            .iter()
            .filter(|(alias, target)| {
                alias.as_str() != *target && is_segment_prefix(target, expanded)
            })
            .map(|(alias, target)| format!("{}{}", alias, &expanded[target.len()..]))
            .collect();

        self.expanded_to_original
            .insert(expanded.to_string(), original.to_string());
        for alias in aliases {
            if let Some(existing) = self.expanded_to_original.get(&alias) {
                if existing != original {
                    return Err(Error::ResourceMappingConflict {
                        expanded: alias,
                        existing: existing.clone(),
                        conflicting: original.to_string(),
                    });
                }
                continue;
            }
            self.expanded_to_original
                .insert(alias, original.to_string());
        }
        Ok(())
    }

    /// Translates an expanded path to its original path by substituting
    /// the longest mapped prefix. Paths untouched by expansion map to
    /// themselves.
    pub fn to_original(&self, expanded_path: &str) -> String {
        let mut best: Option<(&str, &str)> = None;
        for (expanded, original) in &self.expanded_to_original {
            if expanded_path == expanded || is_segment_prefix(expanded, expanded_path) {
                let better = best.map_or(true, |(previous, _)| expanded.len() > previous.len());
                if better {
                    best = Some((expanded, original));
                }
            }
        }
        match best {
            Some((expanded, original)) => {
                format!("{}{}", original, &expanded_path[expanded.len()..])
            }
            None => expanded_path.to_string(),
        }
    }

    pub fn len(&self) -> usize {
        self.expanded_to_original.len()
    }

    pub fn is_empty(&self) -> bool {
        self.expanded_to_original.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.expanded_to_original
            .iter()
            .map(|(expanded, original)| (expanded.as_str(), original.as_str()))
    }
}

/// True when `prefix` covers whole path segments of `path`, i.e. the
/// remainder starts at a `.` or `[` boundary.
fn is_segment_prefix(prefix: &str, path: &str) -> bool {
    if prefix.is_empty() || !path.starts_with(prefix) || path.len() == prefix.len() {
        return false;
    }
    matches!(path.as_bytes()[prefix.len()], b'.' | b'[')
}

/// Navigates a canonical dot-and-bracket path inside a JSON tree.
pub(crate) fn value_at_path<'a>(root: &'a Value, path: &Path) -> Option<&'a Value> {
    let parsed = JsonPath::parse(path.as_str()).ok()?;
    let mut current = root;
    for segment in &parsed.0 {
        current = match segment {
            PathSegment::Key(key) => current
                .as_object()
                .and_then(|map| crate::rules::path::get_ignore_case(map, key))?,
            PathSegment::Index(index) => current.as_array()?.get(*index)?,
            PathSegment::AllIndices => return None,
        };
    }
    Some(current)
}

pub(crate) fn value_at_path_mut<'a>(root: &'a mut Value, path: &Path) -> Option<&'a mut Value> {
    let parsed = JsonPath::parse(path.as_str()).ok()?;
    let mut current = root;
    for segment in &parsed.0 {
        current = match segment {
            PathSegment::Key(key) => {
                let map = current.as_object_mut()?;
                let actual: String = map
                    .keys()
                    .find(|k| k.eq_ignore_ascii_case(key))
                    .cloned()?;
                map.get_mut(&actual)?
            }
            PathSegment::Index(index) => current.as_array_mut()?.get_mut(*index)?,
            PathSegment::AllIndices => return None,
        };
    }
    Some(current)
}

/// Everything rule evaluation needs about one processed template: the
/// expanded document, the flattened resource set in discovery order, the
/// path mappings and the line-number index over the original text.
pub struct TemplateContext {
    pub(crate) expanded: Value,
    pub(crate) mappings: ResourceMappings,
    pub(crate) flattened: Vec<FlattenedResource>,
    locator: LineLocator,
    source_map: Option<SourceMap>,
    pub identifier: String,
}

impl TemplateContext {
    /// Runs the template processor over the raw texts and indexes the
    /// original source for line lookups.
    pub fn build(
        template_text: &str,
        parameters_text: Option<&str>,
        identifier: &str,
        source_map: Option<SourceMap>,
        options: &ProcessorOptions,
    ) -> Result<TemplateContext> {
        let functions = StandardFunctions;
        let processor = TemplateProcessor::new(&functions, options.clone());
        let processed = processor.process(template_text, parameters_text)?;
        let locator = LineLocator::scan(template_text)?;
        Ok(TemplateContext {
            expanded: processed.template,
            mappings: processed.mappings,
            flattened: processed.flattened,
            locator,
            source_map,
            identifier: identifier.to_string(),
        })
    }

    pub fn expanded(&self) -> &Value {
        &self.expanded
    }

    pub fn mappings(&self) -> &ResourceMappings {
        &self.mappings
    }
}

impl EvaluationContext for TemplateContext {
    fn resources_of_type(&self, resource_type: &str) -> Vec<ResourceScope<'_>> {
        self.flattened
            .iter()
            .filter(|resource| resource.type_chain.eq_ignore_ascii_case(resource_type))
            .filter_map(|resource| {
                value_at_path(&self.expanded, &resource.path).map(|value| ResourceScope {
                    value,
                    path: resource.path.clone(),
                })
            })
            .collect()
    }

    fn resolve_line(&self, expanded_path: &str) -> u32 {
        let original = self.mappings.to_original(expanded_path);
        let line = self.locator.line(&original);
        match &self.source_map {
            Some(source_map) if line > 0 => source_map.source_line_for(line).unwrap_or(0),
            _ => line,
        }
    }
}

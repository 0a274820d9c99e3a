use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::rules::errors::Error;
use crate::rules::path::get_ignore_case;
use crate::rules::Result;
use crate::template::functions::PLACEHOLDER_LOCATION;

/// Parses a parameters file. The top-level `parameters` member is
/// mandatory; its entries supply deployment values by parameter name.
pub(crate) fn parse_parameters_file(raw: &str) -> Result<Map<String, Value>> {
    let document: Value = serde_json::from_str(raw)
        .map_err(|err| Error::ParameterParse(err.to_string()))?;
    let object = document
        .as_object()
        .ok_or_else(|| Error::ParameterParse("parameters file is not an object".to_string()))?;
    let parameters = get_ignore_case(object, "parameters")
        .ok_or_else(|| Error::ParameterParse("missing `parameters` key".to_string()))?;
    parameters
        .as_object()
        .cloned()
        .ok_or_else(|| Error::ParameterParse("`parameters` is not an object".to_string()))
}

/// Produces the value for every parameter the template declares: the
/// supplied value wins, then the declared default, then a deterministic
/// placeholder satisfying the declared constraints. A supplied entry
/// must carry `value` or `reference`; key-vault references become the
/// `REF_NOT_AVAIL_<name>` stand-in.
pub(crate) fn materialize_parameters(
    declared: Option<&Map<String, Value>>,
    supplied: Option<&Map<String, Value>>,
) -> Result<Map<String, Value>> {
    let mut materialized = Map::new();
    let declared = match declared {
        Some(map) => map,
        None => return Ok(materialized),
    };

    if let Some(supplied) = supplied {
        for name in supplied.keys() {
            if get_ignore_case(declared, name).is_none() {
                warn!(parameter = %name, "supplied parameter is not declared by the template");
            }
        }
    }

    for (name, definition) in declared {
        let supplied_entry = supplied.and_then(|map| get_ignore_case(map, name));
        let value = match supplied_entry {
            Some(entry) => bound_value(name, entry)?,
            None => match definition.get("defaultValue") {
                Some(default) => default.clone(),
                None => {
                    let placeholder = placeholder_value(name, definition);
                    debug!(parameter = %name, value = %placeholder, "generated placeholder");
                    placeholder
                }
            },
        };
        materialized.insert(name.clone(), value);
    }
    Ok(materialized)
}

fn bound_value(name: &str, entry: &Value) -> Result<Value> {
    let object = entry.as_object().ok_or_else(|| {
        Error::ParameterParse(format!("supplied parameter `{}` is not an object", name))
    })?;
    if let Some(value) = get_ignore_case(object, "value") {
        return Ok(value.clone());
    }
    if get_ignore_case(object, "reference").is_some() {
        return Ok(Value::String(format!("REF_NOT_AVAIL_{}", name)));
    }
    Err(Error::ParameterParse(format!(
        "supplied parameter `{}` has neither `value` nor `reference`",
        name
    )))
}

/// Deterministic per parameter name, and shaped to satisfy the declared
/// type, allowedValues, minLength/maxLength and minValue/maxValue.
pub(crate) fn placeholder_value(name: &str, definition: &Value) -> Value {
    let object = match definition.as_object() {
        Some(object) => object,
        None => return Value::Null,
    };

    if let Some(allowed) = get_ignore_case(object, "allowedValues").and_then(Value::as_array) {
        if let Some(first) = allowed.first() {
            return first.clone();
        }
    }

    let parameter_type = get_ignore_case(object, "type")
        .and_then(Value::as_str)
        .unwrap_or("string")
        .to_ascii_lowercase();
    match parameter_type.as_str() {
        "string" | "securestring" => Value::String(placeholder_string(name, object)),
        "int" => {
            let min = get_ignore_case(object, "minValue").and_then(Value::as_i64);
            let max = get_ignore_case(object, "maxValue").and_then(Value::as_i64);
            let mut value = 1i64;
            if let Some(min) = min {
                value = value.max(min);
            }
            if let Some(max) = max {
                value = value.min(max);
            }
            Value::Number(value.into())
        }
        "bool" => Value::Bool(true),
        "array" => Value::Array(vec![]),
        "object" | "secureobject" => Value::Object(Map::new()),
        _ => Value::Null,
    }
}

fn placeholder_string(name: &str, definition: &Map<String, Value>) -> String {
    // commonly named parameters get values in the shape rules expect
    if name.to_ascii_lowercase().contains("location") {
        return PLACEHOLDER_LOCATION.to_string();
    }

    let mut base: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase();
    base.push_str("placeholder");

    let min_length = get_ignore_case(definition, "minLength")
        .and_then(Value::as_u64)
        .unwrap_or(0) as usize;
    let max_length = get_ignore_case(definition, "maxLength")
        .and_then(Value::as_u64)
        .map(|n| n as usize);

    while base.chars().count() < min_length {
        base.push('p');
    }
    if let Some(max_length) = max_length {
        if base.chars().count() > max_length {
            base = base.chars().take(max_length).collect();
        }
    }
    base
}

#[cfg(test)]
#[path = "placeholders_tests.rs"]
mod placeholders_tests;

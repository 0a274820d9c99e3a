use serde_json::{json, Map, Value};

use crate::rules::errors::Error;
use crate::rules::Result;

pub(crate) const PLACEHOLDER_SUBSCRIPTION_ID: &str = "00000000-0000-0000-0000-000000000000";
pub(crate) const PLACEHOLDER_TENANT_ID: &str = "11111111-1111-1111-1111-111111111111";
pub(crate) const PLACEHOLDER_RESOURCE_GROUP: &str = "placeholderResourceGroup";
pub(crate) const PLACEHOLDER_LOCATION: &str = "westus";
pub(crate) const PLACEHOLDER_DEPLOYMENT: &str = "placeholderDeployment";

/// The host-provided ARM function set. Scope-sensitive functions
/// (`parameters`, `variables`, `reference`, `copyIndex`, `if`) are
/// dispatched by the expression evaluator and never reach the library.
pub(crate) trait FunctionLibrary {
    fn evaluate(&self, name: &str, args: &[Value]) -> Result<Value>;
}

/// Deterministic implementation of the standard deployment-time functions.
/// Ambient deployment metadata is fixed placeholder data, since analysis
/// never contacts Azure.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct StandardFunctions;

fn error(name: &str, reason: impl Into<String>) -> Error {
    Error::ExpressionEvaluation(name.to_string(), reason.into())
}

impl FunctionLibrary for StandardFunctions {
    fn evaluate(&self, name: &str, args: &[Value]) -> Result<Value> {
        match name.to_ascii_lowercase().as_str() {
            "concat" => concat(name, args),
            "format" => format_string(name, args),
            "tolower" => Ok(Value::String(string_arg(name, args, 0)?.to_lowercase())),
            "toupper" => Ok(Value::String(string_arg(name, args, 0)?.to_uppercase())),
            "trim" => Ok(Value::String(string_arg(name, args, 0)?.trim().to_string())),
            "replace" => {
                let haystack = string_arg(name, args, 0)?;
                let from = string_arg(name, args, 1)?;
                let to = string_arg(name, args, 2)?;
                Ok(Value::String(haystack.replace(from, to)))
            }
            "split" => split(name, args),
            "substring" => substring(name, args),
            "startswith" => Ok(Value::Bool(
                string_arg(name, args, 0)?.starts_with(string_arg(name, args, 1)?),
            )),
            "endswith" => Ok(Value::Bool(
                string_arg(name, args, 0)?.ends_with(string_arg(name, args, 1)?),
            )),
            "contains" => contains(name, args),
            "indexof" => index_of(name, args),
            "length" => length(name, args),
            "empty" => empty(name, args),
            "string" => Ok(Value::String(to_string_value(name, &arg(name, args, 0)?)?)),
            "int" => int(name, args),
            "bool" => bool_fn(name, args),
            "first" => first(name, args),
            "last" => last(name, args),
            "skip" => skip(name, args),
            "take" => take(name, args),
            "join" => join(name, args),
            "add" => arithmetic(name, args, |a, b| a.checked_add(b)),
            "sub" => arithmetic(name, args, |a, b| a.checked_sub(b)),
            "mul" => arithmetic(name, args, |a, b| a.checked_mul(b)),
            "div" => arithmetic(name, args, |a, b| a.checked_div(b)),
            "mod" => arithmetic(name, args, |a, b| a.checked_rem(b)),
            "min" => fold_ints(name, args, i64::min),
            "max" => fold_ints(name, args, i64::max),
            "equals" => Ok(Value::Bool(arg(name, args, 0)? == arg(name, args, 1)?)),
            "not" => Ok(Value::Bool(!bool_value(name, &arg(name, args, 0)?)?)),
            "and" => logical(name, args, true, |acc, b| acc && b),
            "or" => logical(name, args, false, |acc, b| acc || b),
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            "coalesce" => Ok(args
                .iter()
                .find(|each| !each.is_null())
                .cloned()
                .unwrap_or(Value::Null)),
            "array" => match args {
                [list @ Value::Array(_)] => Ok(list.clone()),
                [other] => Ok(Value::Array(vec![other.clone()])),
                _ => Err(error(name, "expects exactly one argument")),
            },
            "createarray" => Ok(Value::Array(args.to_vec())),
            "createobject" => create_object(name, args),
            "union" => union(name, args),
            "range" => range(name, args),
            "json" => Ok(serde_json::from_str(string_arg(name, args, 0)?)
                .map_err(|e| error(name, e.to_string()))?),
            "resourceid" => resource_id(name, args, IdScope::ResourceGroup),
            "subscriptionresourceid" => resource_id(name, args, IdScope::Subscription),
            "tenantresourceid" => resource_id(name, args, IdScope::Tenant),
            "uniquestring" => unique_string(name, args),
            "guid" | "newguid" => guid(name, args),
            "utcnow" => Ok(Value::String("2020-01-01T00:00:00Z".to_string())),
            "resourcegroup" => Ok(json!({
                "id": format!(
                    "/subscriptions/{}/resourceGroups/{}",
                    PLACEHOLDER_SUBSCRIPTION_ID, PLACEHOLDER_RESOURCE_GROUP
                ),
                "name": PLACEHOLDER_RESOURCE_GROUP,
                "location": PLACEHOLDER_LOCATION,
                "properties": { "provisioningState": "Succeeded" }
            })),
            "subscription" => Ok(json!({
                "id": format!("/subscriptions/{}", PLACEHOLDER_SUBSCRIPTION_ID),
                "subscriptionId": PLACEHOLDER_SUBSCRIPTION_ID,
                "tenantId": PLACEHOLDER_TENANT_ID,
                "displayName": "placeholderSubscription"
            })),
            "tenant" => Ok(json!({
                "tenantId": PLACEHOLDER_TENANT_ID,
                "displayName": "placeholderTenant"
            })),
            "deployment" => Ok(json!({
                "name": PLACEHOLDER_DEPLOYMENT,
                "properties": { "mode": "Incremental", "provisioningState": "Accepted" }
            })),
            "environment" => Ok(json!({
                "name": "AzureCloud",
                "portal": "https://portal.azure.com",
                "suffixes": { "storage": "core.windows.net" }
            })),
            other => Err(error(other, "unknown function")),
        }
    }
}

fn arg(name: &str, args: &[Value], index: usize) -> Result<Value> {
    args.get(index)
        .cloned()
        .ok_or_else(|| error(name, format!("missing argument {}", index)))
}

fn string_arg<'a>(name: &str, args: &'a [Value], index: usize) -> Result<&'a str> {
    args.get(index)
        .and_then(Value::as_str)
        .ok_or_else(|| error(name, format!("argument {} must be a string", index)))
}

fn int_arg(name: &str, args: &[Value], index: usize) -> Result<i64> {
    args.get(index)
        .and_then(Value::as_i64)
        .ok_or_else(|| error(name, format!("argument {} must be an integer", index)))
}

fn bool_value(name: &str, value: &Value) -> Result<bool> {
    value
        .as_bool()
        .ok_or_else(|| error(name, "expected a boolean"))
}

fn to_string_value(name: &str, value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Array(_) | Value::Object(_) => {
            serde_json::to_string(value).map_err(|e| error(name, e.to_string()))
        }
        Value::Null => Err(error(name, "cannot stringify null")),
    }
}

fn concat(name: &str, args: &[Value]) -> Result<Value> {
    if args.iter().all(|each| each.is_array()) && !args.is_empty() {
        let mut list = Vec::new();
        for each in args {
            list.extend(each.as_array().into_iter().flatten().cloned());
        }
        return Ok(Value::Array(list));
    }
    let mut out = String::new();
    for each in args {
        out.push_str(&to_string_value(name, each)?);
    }
    Ok(Value::String(out))
}

/// Positional `{n}` substitution; `{{` and `}}` escape literal braces.
fn format_string(name: &str, args: &[Value]) -> Result<Value> {
    let pattern = string_arg(name, args, 0)?;
    let mut out = String::new();
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut digits = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(d) if d.is_ascii_digit() => digits.push(d),
                        _ => return Err(error(name, "malformed format placeholder")),
                    }
                }
                let index: usize = digits
                    .parse()
                    .map_err(|_| error(name, "malformed format placeholder"))?;
                let value = arg(name, args, index + 1)?;
                out.push_str(&to_string_value(name, &value)?);
            }
            other => out.push(other),
        }
    }
    Ok(Value::String(out))
}

fn split(name: &str, args: &[Value]) -> Result<Value> {
    let input = string_arg(name, args, 0)?;
    let pieces: Vec<Value> = match arg(name, args, 1)? {
        Value::String(delimiter) => input
            .split(delimiter.as_str())
            .map(|piece| Value::String(piece.to_string()))
            .collect(),
        Value::Array(delimiters) => {
            let delimiters: Vec<char> = delimiters
                .iter()
                .filter_map(Value::as_str)
                .filter_map(|s| s.chars().next())
                .collect();
            input
                .split(|c| delimiters.contains(&c))
                .map(|piece| Value::String(piece.to_string()))
                .collect()
        }
        _ => return Err(error(name, "delimiter must be a string or array")),
    };
    Ok(Value::Array(pieces))
}

fn substring(name: &str, args: &[Value]) -> Result<Value> {
    let input = string_arg(name, args, 0)?;
    let start = int_arg(name, args, 1)? as usize;
    let chars: Vec<char> = input.chars().collect();
    if start > chars.len() {
        return Err(error(name, "start index past end of string"));
    }
    let length = match args.get(2) {
        Some(_) => int_arg(name, args, 2)? as usize,
        None => chars.len() - start,
    };
    if start + length > chars.len() {
        return Err(error(name, "substring extends past end of string"));
    }
    Ok(Value::String(chars[start..start + length].iter().collect()))
}

fn contains(name: &str, args: &[Value]) -> Result<Value> {
    let found = match (&arg(name, args, 0)?, &arg(name, args, 1)?) {
        (Value::String(haystack), Value::String(needle)) => {
            haystack.to_lowercase().contains(&needle.to_lowercase())
        }
        (Value::Array(list), needle) => list.iter().any(|each| each == needle),
        (Value::Object(map), Value::String(key)) => {
            crate::rules::path::get_ignore_case(map, key).is_some()
        }
        (_, _) => return Err(error(name, "unsupported container type")),
    };
    Ok(Value::Bool(found))
}

fn index_of(name: &str, args: &[Value]) -> Result<Value> {
    let haystack = string_arg(name, args, 0)?.to_lowercase();
    let needle = string_arg(name, args, 1)?.to_lowercase();
    let index = haystack
        .find(&needle)
        .map(|byte| haystack[..byte].chars().count() as i64)
        .unwrap_or(-1);
    Ok(Value::Number(index.into()))
}

fn length(name: &str, args: &[Value]) -> Result<Value> {
    let count = match arg(name, args, 0)? {
        Value::String(s) => s.chars().count(),
        Value::Array(list) => list.len(),
        Value::Object(map) => map.len(),
        _ => return Err(error(name, "length expects a string, array or object")),
    };
    Ok(Value::Number((count as i64).into()))
}

fn empty(name: &str, args: &[Value]) -> Result<Value> {
    let is_empty = match arg(name, args, 0)? {
        Value::String(s) => s.is_empty(),
        Value::Array(list) => list.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Null => true,
        _ => return Err(error(name, "empty expects a string, array or object")),
    };
    Ok(Value::Bool(is_empty))
}

fn int(name: &str, args: &[Value]) -> Result<Value> {
    match arg(name, args, 0)? {
        Value::Number(n) => Ok(Value::Number(n)),
        Value::String(s) => s
            .parse::<i64>()
            .map(|n| Value::Number(n.into()))
            .map_err(|_| error(name, format!("`{}` is not an integer", s))),
        _ => Err(error(name, "int expects a number or numeric string")),
    }
}

fn bool_fn(name: &str, args: &[Value]) -> Result<Value> {
    match arg(name, args, 0)? {
        Value::Bool(b) => Ok(Value::Bool(b)),
        Value::String(s) => match s.to_ascii_lowercase().as_str() {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => Err(error(name, format!("`{}` is not a boolean", s))),
        },
        Value::Number(n) => Ok(Value::Bool(n.as_i64() != Some(0))),
        _ => Err(error(name, "bool expects a boolean, string or number")),
    }
}

fn first(name: &str, args: &[Value]) -> Result<Value> {
    match arg(name, args, 0)? {
        Value::String(s) => Ok(Value::String(
            s.chars().next().map(String::from).unwrap_or_default(),
        )),
        Value::Array(list) => Ok(list.first().cloned().unwrap_or(Value::Null)),
        _ => Err(error(name, "first expects a string or array")),
    }
}

fn last(name: &str, args: &[Value]) -> Result<Value> {
    match arg(name, args, 0)? {
        Value::String(s) => Ok(Value::String(
            s.chars().last().map(String::from).unwrap_or_default(),
        )),
        Value::Array(list) => Ok(list.last().cloned().unwrap_or(Value::Null)),
        _ => Err(error(name, "last expects a string or array")),
    }
}

fn skip(name: &str, args: &[Value]) -> Result<Value> {
    let count = int_arg(name, args, 1)?.max(0) as usize;
    match arg(name, args, 0)? {
        Value::String(s) => Ok(Value::String(s.chars().skip(count).collect())),
        Value::Array(list) => Ok(Value::Array(list.into_iter().skip(count).collect())),
        _ => Err(error(name, "skip expects a string or array")),
    }
}

fn take(name: &str, args: &[Value]) -> Result<Value> {
    let count = int_arg(name, args, 1)?.max(0) as usize;
    match arg(name, args, 0)? {
        Value::String(s) => Ok(Value::String(s.chars().take(count).collect())),
        Value::Array(list) => Ok(Value::Array(list.into_iter().take(count).collect())),
        _ => Err(error(name, "take expects a string or array")),
    }
}

fn join(name: &str, args: &[Value]) -> Result<Value> {
    let delimiter = string_arg(name, args, 1)?;
    let list = args
        .first()
        .and_then(Value::as_array)
        .ok_or_else(|| error(name, "join expects an array"))?;
    let pieces: Result<Vec<String>> = list
        .iter()
        .map(|each| to_string_value(name, each))
        .collect();
    Ok(Value::String(pieces?.join(delimiter)))
}

fn arithmetic<F>(name: &str, args: &[Value], op: F) -> Result<Value>
where
    F: Fn(i64, i64) -> Option<i64>,
{
    let lhs = int_arg(name, args, 0)?;
    let rhs = int_arg(name, args, 1)?;
    op(lhs, rhs)
        .map(|n| Value::Number(n.into()))
        .ok_or_else(|| error(name, "arithmetic overflow or division by zero"))
}

fn fold_ints(name: &str, args: &[Value], op: fn(i64, i64) -> i64) -> Result<Value> {
    let values: Vec<i64> = if args.len() == 1 {
        args[0]
            .as_array()
            .map(|list| list.iter().filter_map(Value::as_i64).collect())
            .ok_or_else(|| error(name, "single argument must be an array of integers"))?
    } else {
        args.iter().filter_map(Value::as_i64).collect()
    };
    values
        .into_iter()
        .reduce(op)
        .map(|n| Value::Number(n.into()))
        .ok_or_else(|| error(name, "expects at least one integer"))
}

fn logical<F>(name: &str, args: &[Value], start: bool, fold: F) -> Result<Value>
where
    F: Fn(bool, bool) -> bool,
{
    if args.is_empty() {
        return Err(error(name, "expects at least one argument"));
    }
    let mut acc = start;
    for each in args {
        acc = fold(acc, bool_value(name, each)?);
    }
    Ok(Value::Bool(acc))
}

fn create_object(name: &str, args: &[Value]) -> Result<Value> {
    if args.len() % 2 != 0 {
        return Err(error(name, "expects key/value argument pairs"));
    }
    let mut map = Map::new();
    for pair in args.chunks(2) {
        let key = pair[0]
            .as_str()
            .ok_or_else(|| error(name, "object keys must be strings"))?;
        map.insert(key.to_string(), pair[1].clone());
    }
    Ok(Value::Object(map))
}

fn union(name: &str, args: &[Value]) -> Result<Value> {
    if args.iter().all(|each| each.is_object()) && !args.is_empty() {
        let mut merged = Map::new();
        for each in args {
            for (key, value) in each.as_object().into_iter().flatten() {
                merged.insert(key.clone(), value.clone());
            }
        }
        return Ok(Value::Object(merged));
    }
    if args.iter().all(|each| each.is_array()) && !args.is_empty() {
        let mut list: Vec<Value> = Vec::new();
        for each in args {
            for item in each.as_array().into_iter().flatten() {
                if !list.contains(item) {
                    list.push(item.clone());
                }
            }
        }
        return Ok(Value::Array(list));
    }
    Err(error(name, "expects all objects or all arrays"))
}

fn range(name: &str, args: &[Value]) -> Result<Value> {
    let start = int_arg(name, args, 0)?;
    let count = int_arg(name, args, 1)?;
    if !(0..=10_000).contains(&count) {
        return Err(error(name, "count out of range"));
    }
    Ok(Value::Array(
        (start..start + count)
            .map(|n| Value::Number(n.into()))
            .collect(),
    ))
}

enum IdScope {
    ResourceGroup,
    Subscription,
    Tenant,
}

/// Builds a fully qualified resource id. The first argument containing a
/// `/` is the resource type; anything before it is subscription id and/or
/// resource group, anything after it is the name segments interleaved
/// with the child type segments.
fn resource_id(name: &str, args: &[Value], scope: IdScope) -> Result<Value> {
    let type_position = args
        .iter()
        .position(|each| each.as_str().map_or(false, |s| s.contains('/')))
        .ok_or_else(|| error(name, "no resource type argument"))?;
    let resource_type = string_arg(name, args, type_position)?;
    let names: Result<Vec<&str>> = (type_position + 1..args.len())
        .map(|index| string_arg(name, args, index))
        .collect();
    let names = names?;

    let mut type_segments = resource_type.split('/');
    let namespace = type_segments.next().unwrap_or_default();
    let types: Vec<&str> = type_segments.collect();
    if types.is_empty() || types.len() != names.len() {
        return Err(error(
            name,
            "name segments do not match resource type segments",
        ));
    }

    let mut id = match scope {
        IdScope::ResourceGroup => format!(
            "/subscriptions/{}/resourceGroups/{}",
            PLACEHOLDER_SUBSCRIPTION_ID, PLACEHOLDER_RESOURCE_GROUP
        ),
        IdScope::Subscription => format!("/subscriptions/{}", PLACEHOLDER_SUBSCRIPTION_ID),
        IdScope::Tenant => String::new(),
    };
    id.push_str("/providers/");
    id.push_str(namespace);
    for (each_type, each_name) in types.iter().zip(names.iter()) {
        id.push('/');
        id.push_str(each_type);
        id.push('/');
        id.push_str(each_name);
    }
    Ok(Value::String(id))
}

fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

/// Deterministic 13-character hash, stable across runs so placeholder
/// expansion is reproducible. Not the service's own hash.
fn unique_string(name: &str, args: &[Value]) -> Result<Value> {
    let joined: Result<Vec<String>> = args
        .iter()
        .map(|each| to_string_value(name, each))
        .collect();
    let mut state = fnv1a64(joined?.join("\n").as_bytes());
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz234567";
    let mut out = String::with_capacity(13);
    for _ in 0..13 {
        out.push(ALPHABET[(state & 31) as usize] as char);
        state = state.rotate_right(5);
    }
    Ok(Value::String(out))
}

fn guid(name: &str, args: &[Value]) -> Result<Value> {
    let seed = if args.is_empty() {
        vec![Value::String(name.to_string())]
    } else {
        args.to_vec()
    };
    let joined: Result<Vec<String>> = seed
        .iter()
        .map(|each| to_string_value(name, each))
        .collect();
    let hash = fnv1a64(joined?.join("\n").as_bytes());
    let high = (hash >> 32) as u32;
    let low = hash as u32;
    Ok(Value::String(format!(
        "{:08x}-{:04x}-{:04x}-{:04x}-{:08x}{:04x}",
        high,
        (low >> 16) as u16,
        low as u16,
        (hash >> 48) as u16,
        low,
        high as u16
    )))
}

#[cfg(test)]
#[path = "functions_tests.rs"]
mod functions_tests;

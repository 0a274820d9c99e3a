use serde::Serialize;
use serde_json::Value;

use crate::rules::errors::Error;
use crate::rules::Result;

/// Canonical location of a node inside a template document, in
/// dot-and-bracket notation, e.g. `resources[3].properties.httpsOnly`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct Path(pub(crate) String);

impl std::fmt::Display for Path {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl Path {
    pub fn root() -> Self {
        Path(String::new())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub(crate) fn extend_key(&self, key: &str) -> Path {
        if self.0.is_empty() {
            return Path(key.to_string());
        }
        let mut copy = self.0.clone();
        copy.push('.');
        copy.push_str(key);
        Path(copy)
    }

    pub(crate) fn extend_index(&self, index: usize) -> Path {
        let mut copy = self.0.clone();
        copy.push('[');
        copy.push_str(&index.to_string());
        copy.push(']');
        Path(copy)
    }
}

impl From<&str> for Path {
    fn from(value: &str) -> Self {
        Path(value.to_string())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum PathSegment {
    Key(String),
    Index(usize),
    AllIndices,
}

/// A parsed dot-and-bracket query, resolvable against a JSON document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct JsonPath(pub(crate) Vec<PathSegment>);

impl JsonPath {
    pub(crate) fn parse(input: &str) -> Result<JsonPath> {
        let mut segments = Vec::new();
        let mut chars = input.char_indices().peekable();
        let mut expect_key = true;
        while let Some((at, ch)) = chars.peek().copied() {
            match ch {
                '[' => {
                    chars.next();
                    let mut inner = String::new();
                    loop {
                        match chars.next() {
                            Some((_, ']')) => break,
                            Some((_, c)) => inner.push(c),
                            None => {
                                return Err(Error::ParseError(format!(
                                    "Unterminated index in path `{}`",
                                    input
                                )))
                            }
                        }
                    }
                    if inner == "*" {
                        segments.push(PathSegment::AllIndices);
                    } else {
                        let index = inner.parse::<usize>().map_err(|_| {
                            Error::ParseError(format!(
                                "Invalid array index `{}` in path `{}`",
                                inner, input
                            ))
                        })?;
                        segments.push(PathSegment::Index(index));
                    }
                    expect_key = false;
                }
                '.' => {
                    if expect_key {
                        return Err(Error::ParseError(format!(
                            "Empty key segment at offset {} in path `{}`",
                            at, input
                        )));
                    }
                    chars.next();
                    expect_key = true;
                }
                _ => {
                    if !expect_key {
                        return Err(Error::ParseError(format!(
                            "Expected `.` or `[` at offset {} in path `{}`",
                            at, input
                        )));
                    }
                    let mut key = String::new();
                    while let Some((_, c)) = chars.peek().copied() {
                        if c == '.' || c == '[' {
                            break;
                        }
                        key.push(c);
                        chars.next();
                    }
                    if key.is_empty() {
                        return Err(Error::ParseError(format!(
                            "Empty key segment at offset {} in path `{}`",
                            at, input
                        )));
                    }
                    segments.push(PathSegment::Key(key));
                    expect_key = false;
                }
            }
        }
        if expect_key && !segments.is_empty() {
            return Err(Error::ParseError(format!(
                "Trailing `.` in path `{}`",
                input
            )));
        }
        Ok(JsonPath(segments))
    }
}

/// Outcome of resolving a path: either a value in the document or the
/// missing sentinel for an absent terminal key. Distinct from JSON null.
#[derive(Clone, Copy, Debug)]
pub(crate) enum Resolved<'a> {
    Value(&'a Value),
    Missing,
}

impl<'a> Resolved<'a> {
    pub(crate) fn is_missing(&self) -> bool {
        matches!(self, Resolved::Missing)
    }

    pub(crate) fn value(&self) -> Option<&'a Value> {
        match self {
            Resolved::Value(v) => Some(v),
            Resolved::Missing => None,
        }
    }
}

/// Case-insensitive member lookup. Exact matches win over folded ones.
pub(crate) fn get_ignore_case<'a>(
    map: &'a serde_json::Map<String, Value>,
    key: &str,
) -> Option<&'a Value> {
    if let Some(value) = map.get(key) {
        return Some(value);
    }
    map.iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v)
}

/// Resolve `path` inside `doc`, yielding every matching sub-document with
/// its absolute path. `[*]` fans out across array elements. A miss on an
/// intermediate segment yields nothing; a miss on the terminal segment
/// yields exactly one `Missing` result so existence operators can see it.
pub(crate) fn resolve<'a>(
    doc: &'a Value,
    path: &JsonPath,
    base: &Path,
) -> Vec<(Resolved<'a>, Path)> {
    let mut out = Vec::new();
    walk(doc, &path.0, base.clone(), &mut out);
    out
}

fn walk<'a>(
    current: &'a Value,
    segments: &[PathSegment],
    at: Path,
    out: &mut Vec<(Resolved<'a>, Path)>,
) {
    let segment = match segments.first() {
        Some(segment) => segment,
        None => {
            out.push((Resolved::Value(current), at));
            return;
        }
    };
    let terminal = segments.len() == 1;
    match segment {
        PathSegment::Key(key) => match current {
            Value::Object(map) => match get_ignore_case(map, key) {
                Some(next) => walk(next, &segments[1..], at.extend_key(key), out),
                None => {
                    if terminal {
                        out.push((Resolved::Missing, at.extend_key(key)));
                    }
                }
            },
            _ => {
                if terminal {
                    out.push((Resolved::Missing, at.extend_key(key)));
                }
            }
        },

        PathSegment::Index(index) => match current {
            Value::Array(list) if *index < list.len() => {
                walk(&list[*index], &segments[1..], at.extend_index(*index), out)
            }
            _ => {
                if terminal {
                    out.push((Resolved::Missing, at.extend_index(*index)));
                }
            }
        },

        PathSegment::AllIndices => {
            if let Value::Array(list) = current {
                for (index, each) in list.iter().enumerate() {
                    walk(each, &segments[1..], at.extend_index(index), out);
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "path_tests.rs"]
mod path_tests;

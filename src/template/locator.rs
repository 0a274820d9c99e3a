use std::collections::HashMap;

use nom::character::complete::multispace0;
use nom::InputTake;
use nom_locate::LocatedSpan;
use serde::Deserialize;

use crate::rules::errors::Error;
use crate::rules::path::Path;
use crate::rules::Result;

pub(crate) type Span<'a> = LocatedSpan<&'a str>;

/// Scans the raw template text once and records the (line, column) at
/// which every value begins, keyed by its canonical path. Lines are
/// 1-based; a lookup miss is reported as line 0 by callers.
#[derive(Debug, Clone)]
pub struct LineLocator {
    positions: HashMap<String, (u32, u32)>,
}

impl LineLocator {
    pub fn scan(source: &str) -> Result<LineLocator> {
        let mut positions = HashMap::new();
        let input = Span::new(source);
        let _rest = scan_value(input, &Path::root(), &mut positions)?;
        Ok(LineLocator { positions })
    }

    pub fn position(&self, original_path: &str) -> Option<(u32, u32)> {
        self.positions
            .get(&original_path.to_ascii_lowercase())
            .copied()
    }

    /// Line of the value at `original_path`, or 0 when unknown.
    pub fn line(&self, original_path: &str) -> u32 {
        self.position(original_path).map_or(0, |(line, _)| line)
    }
}

/// Line translation for Bicep-derived templates: the Bicep compiler's
/// source map relates lines of the generated JSON back to lines of the
/// Bicep source.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceMap {
    pub entries: Vec<SourceMapEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceMapEntry {
    #[serde(default)]
    pub file_path: Option<String>,
    pub source_line: u32,
    pub target_line: u32,
}

impl SourceMap {
    pub fn from_json(raw: &str) -> Result<SourceMap> {
        Ok(serde_json::from_str(raw)?)
    }

    pub(crate) fn source_line_for(&self, json_line: u32) -> Option<u32> {
        self.entries
            .iter()
            .find(|entry| entry.target_line == json_line)
            .map(|entry| entry.source_line)
    }
}

fn skip_ws(input: Span) -> Span {
    match multispace0::<Span, nom::error::Error<Span>>(input) {
        Ok((rest, _)) => rest,
        Err(_) => input,
    }
}

fn parse_failure(input: Span<'_>, what: &str) -> Error {
    Error::TemplateParse(format!(
        "unexpected input at line {} column {}: expected {}",
        input.location_line(),
        input.get_utf8_column(),
        what
    ))
}

fn advance(input: Span, by: usize) -> Span {
    input.take_split(by).0
}

fn scan_value<'a>(
    input: Span<'a>,
    at: &Path,
    positions: &mut HashMap<String, (u32, u32)>,
) -> Result<Span<'a>> {
    let input = skip_ws(input);
    positions.insert(
        at.as_str().to_ascii_lowercase(),
        (input.location_line(), input.get_utf8_column() as u32),
    );
    match input.fragment().chars().next() {
        Some('{') => scan_object(input, at, positions),
        Some('[') => scan_array(input, at, positions),
        Some('"') => scan_string(input).map(|(rest, _)| rest),
        Some('t') => expect_keyword(input, "true"),
        Some('f') => expect_keyword(input, "false"),
        Some('n') => expect_keyword(input, "null"),
        Some(c) if c == '-' || c.is_ascii_digit() => Ok(scan_number(input)),
        _ => Err(parse_failure(input, "a JSON value")),
    }
}

fn scan_object<'a>(
    input: Span<'a>,
    at: &Path,
    positions: &mut HashMap<String, (u32, u32)>,
) -> Result<Span<'a>> {
    let mut rest = skip_ws(advance(input, 1));
    if rest.fragment().starts_with('}') {
        return Ok(advance(rest, 1));
    }
    loop {
        rest = skip_ws(rest);
        let (after_key, key) = scan_string(rest)?;
        rest = skip_ws(after_key);
        if !rest.fragment().starts_with(':') {
            return Err(parse_failure(rest, "`:`"));
        }
        rest = advance(rest, 1);
        rest = scan_value(rest, &at.extend_key(&key.to_ascii_lowercase()), positions)?;
        rest = skip_ws(rest);
        match rest.fragment().chars().next() {
            Some(',') => rest = advance(rest, 1),
            Some('}') => return Ok(advance(rest, 1)),
            _ => return Err(parse_failure(rest, "`,` or `}`")),
        }
    }
}

fn scan_array<'a>(
    input: Span<'a>,
    at: &Path,
    positions: &mut HashMap<String, (u32, u32)>,
) -> Result<Span<'a>> {
    let mut rest = skip_ws(advance(input, 1));
    if rest.fragment().starts_with(']') {
        return Ok(advance(rest, 1));
    }
    let mut index = 0usize;
    loop {
        rest = scan_value(rest, &at.extend_index(index), positions)?;
        index += 1;
        rest = skip_ws(rest);
        match rest.fragment().chars().next() {
            Some(',') => rest = advance(rest, 1),
            Some(']') => return Ok(advance(rest, 1)),
            _ => return Err(parse_failure(rest, "`,` or `]`")),
        }
    }
}

fn scan_string(input: Span<'_>) -> Result<(Span<'_>, String)> {
    if !input.fragment().starts_with('"') {
        return Err(parse_failure(input, "`\"`"));
    }
    let mut contents = String::new();
    let mut chars = input.fragment().char_indices().skip(1);
    while let Some((offset, c)) = chars.next() {
        match c {
            '"' => return Ok((advance(input, offset + 1), contents)),
            '\\' => match chars.next() {
                Some((_, escaped)) => match escaped {
                    '"' => contents.push('"'),
                    '\\' => contents.push('\\'),
                    '/' => contents.push('/'),
                    other => {
                        contents.push('\\');
                        contents.push(other);
                    }
                },
                None => break,
            },
            other => contents.push(other),
        }
    }
    Err(parse_failure(input, "a terminated string"))
}

fn scan_number(input: Span) -> Span {
    let extent = input
        .fragment()
        .find(|c: char| !(c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E')))
        .unwrap_or(input.fragment().len());
    advance(input, extent)
}

fn expect_keyword<'a>(input: Span<'a>, keyword: &str) -> Result<Span<'a>> {
    if input.fragment().starts_with(keyword) {
        Ok(advance(input, keyword.len()))
    } else {
        Err(parse_failure(input, keyword))
    }
}

#[cfg(test)]
#[path = "locator_tests.rs"]
mod locator_tests;

use std::fmt::Formatter;

use nom::branch::alt;
use nom::bytes::complete::{take_while, take_while1};
use nom::character::complete::{char, digit1, multispace0};
use nom::combinator::{all_consuming, map, map_res, opt, recognize};
use nom::error::ErrorKind;
use nom::multi::{many0, separated_list0};
use nom::sequence::{delimited, pair, preceded};
use nom::InputTake;
use nom_locate::LocatedSpan;

use crate::rules::errors::Error;

pub(crate) type Span<'a> = LocatedSpan<&'a str>;

#[derive(Clone, PartialEq, Debug)]
pub(crate) struct ParserError<'a> {
    pub(crate) context: String,
    pub(crate) span: Span<'a>,
    pub(crate) kind: ErrorKind,
}

pub(crate) type IResult<'a, I, O> = nom::IResult<I, O, ParserError<'a>>;

impl<'a> nom::error::ParseError<Span<'a>> for ParserError<'a> {
    fn from_error_kind(input: Span<'a>, kind: ErrorKind) -> Self {
        ParserError {
            context: "".to_string(),
            span: input,
            kind,
        }
    }

    fn append(_input: Span<'a>, _kind: ErrorKind, other: Self) -> Self {
        other
    }
}

impl<'a, E> nom::error::FromExternalError<Span<'a>, E> for ParserError<'a> {
    fn from_external_error(input: Span<'a>, kind: ErrorKind, _err: E) -> Self {
        ParserError {
            context: "".to_string(),
            span: input,
            kind,
        }
    }
}

impl<'a> nom::error::ContextError<Span<'a>> for ParserError<'a> {
    fn add_context(input: Span<'a>, ctx: &'static str, other: Self) -> Self {
        let context = if other.context.is_empty() {
            ctx.to_string()
        } else {
            format!("{}/{}", ctx, other.context)
        };
        ParserError {
            context,
            span: input,
            kind: other.kind,
        }
    }
}

impl<'a> std::fmt::Display for ParserError<'a> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let message = format!(
            "Error parsing expression at column {}, when handling {}, fragment {}",
            self.span.get_utf8_column(),
            self.context,
            *self.span.fragment()
        );
        f.write_str(&message)?;
        Ok(())
    }
}

/// Parsed form of an ARM template-language expression, the inside of a
/// `[...]` string.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TemplateExpression {
    String(String),
    Integer(i64),
    Function(FunctionCall),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct FunctionCall {
    pub(crate) name: String,
    pub(crate) args: Vec<TemplateExpression>,
    pub(crate) properties: Vec<PropertyAccess>,
}

/// Postfix access on a function result: `.field` or `[index]`.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PropertyAccess {
    Field(String),
    Index(TemplateExpression),
}

/// A string is a template expression when it is bracketed and not
/// `[[`-escaped. Everything else passes through as a literal.
pub(crate) fn is_expression(value: &str) -> bool {
    value.len() >= 2
        && value.starts_with('[')
        && !value.starts_with("[[")
        && value.ends_with(']')
}

/// Strips the `[[` escape, yielding the literal the author wrote.
pub(crate) fn unescape_literal(value: &str) -> String {
    match value.strip_prefix("[[") {
        Some(rest) => format!("[{}", rest),
        None => value.to_string(),
    }
}

/// Parses the inside of a `[...]` expression string. The caller is
/// expected to have checked `is_expression` first.
pub(crate) fn parse_expression(value: &str) -> Result<TemplateExpression, Error> {
    let inner = &value[1..value.len() - 1];
    let span = Span::new(inner);
    match all_consuming(delimited(multispace0, expression, multispace0))(span) {
        Ok((_, parsed)) => Ok(parsed),
        Err(nom::Err::Failure(e)) | Err(nom::Err::Error(e)) => Err(Error::ExpressionEvaluation(
            value.to_string(),
            e.to_string(),
        )),
        Err(nom::Err::Incomplete(_)) => Err(Error::ExpressionEvaluation(
            value.to_string(),
            "more bytes required for parsing".to_string(),
        )),
    }
}

fn expression(input: Span) -> IResult<Span, TemplateExpression> {
    alt((
        map(string_literal, TemplateExpression::String),
        map(integer_literal, TemplateExpression::Integer),
        map(function_call, TemplateExpression::Function),
    ))(input)
}

/// Single-quoted string with the doubled-quote escape, per the template
/// language: 'it''s' reads as `it's`.
fn string_literal(input: Span) -> IResult<Span, String> {
    let (input, _) = char('\'')(input)?;
    let mut completed = String::new();
    let mut rest = input;
    loop {
        let (after, upto) = take_while(|c| c != '\'')(rest)?;
        completed.push_str(upto.fragment());
        let (after_quote, _) = char('\'')(after)?;
        if after_quote.fragment().starts_with('\'') {
            completed.push('\'');
            rest = after_quote.take_split(1).0;
        } else {
            return Ok((after_quote, completed));
        }
    }
}

fn integer_literal(input: Span) -> IResult<Span, i64> {
    map_res(
        recognize(pair(opt(char('-')), digit1)),
        |digits: Span| digits.fragment().parse::<i64>(),
    )(input)
}

/// `name(arg, ...)` with optional namespace-qualified names for
/// user-defined functions, followed by any number of `.field` / `[index]`
/// accesses.
fn function_call(input: Span) -> IResult<Span, FunctionCall> {
    let (input, name) = function_name(input)?;
    let (input, args) = delimited(
        preceded(multispace0, char('(')),
        separated_list0(
            preceded(multispace0, char(',')),
            delimited(multispace0, expression, multispace0),
        ),
        char(')'),
    )(input)?;
    let (input, properties) = many0(property_access)(input)?;
    Ok((
        input,
        FunctionCall {
            name: name.fragment().to_string(),
            args,
            properties,
        },
    ))
}

fn function_name(input: Span) -> IResult<Span, Span> {
    recognize(pair(identifier, opt(pair(char('.'), identifier))))(input)
}

fn identifier(input: Span) -> IResult<Span, Span> {
    recognize(pair(
        take_while1(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_'),
    ))(input)
}

fn property_access(input: Span) -> IResult<Span, PropertyAccess> {
    alt((
        map(
            preceded(preceded(multispace0, char('.')), identifier),
            |field: Span| PropertyAccess::Field(field.fragment().to_string()),
        ),
        map(
            delimited(
                preceded(multispace0, char('[')),
                delimited(multispace0, expression, multispace0),
                char(']'),
            ),
            PropertyAccess::Index,
        ),
    ))(input)
}

#[cfg(test)]
#[path = "parser_tests.rs"]
mod parser_tests;

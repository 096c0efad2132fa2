//! `CYPHER name=value ...` parameter headers.
//!
//! Values are JSON literals (numbers, booleans, `null`, double-quoted strings,
//! arrays, objects) or single-quoted strings. The header ends at the first
//! token that is not `name=value`; what follows is the query body used as the
//! plan cache key.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::errors::{GraphError, GraphResult};

const HEADER: &str = "CYPHER";

#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryParams {
    values: BTreeMap<String, Value>,
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.values.insert(name.into(), value)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> + '_ {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Split `query` into its parameter header and its body. The body comes
    /// back trimmed.
    pub fn parse(query: &str) -> GraphResult<(QueryParams, &str)> {
        let mut params = QueryParams::new();
        let trimmed = query.trim_start();
        let Some(mut rest) = strip_header(trimmed) else {
            return Ok((params, query.trim()));
        };

        loop {
            rest = rest.trim_start();
            let Some((name, after_eq)) = split_assignment(rest) else {
                break;
            };
            let (value, remaining) = parse_value(after_eq)
                .map_err(|msg| GraphError::invalid_input(format!("parameter {name:?}: {msg}")))?;
            if params.insert(name, value).is_some() {
                return Err(GraphError::invalid_input(format!(
                    "parameter {name:?} given twice"
                )));
            }
            rest = remaining;
        }
        Ok((params, rest.trim()))
    }
}

fn strip_header(query: &str) -> Option<&str> {
    let head = query.get(..HEADER.len())?;
    if !head.eq_ignore_ascii_case(HEADER) {
        return None;
    }
    let rest = &query[HEADER.len()..];
    rest.starts_with(char::is_whitespace).then_some(rest)
}

/// `name=` prefix of `input`, returning the name and the text after `=`.
fn split_assignment(input: &str) -> Option<(&str, &str)> {
    let end = input
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(input.len());
    if end == 0 || input[..end].starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }
    let after = input[end..].strip_prefix('=')?;
    Some((&input[..end], after))
}

fn parse_value(input: &str) -> Result<(Value, &str), String> {
    if let Some(body) = input.strip_prefix('\'') {
        return parse_single_quoted(body);
    }
    let mut stream = serde_json::Deserializer::from_str(input).into_iter::<Value>();
    match stream.next() {
        Some(Ok(value)) => Ok((value, &input[stream.byte_offset()..])),
        Some(Err(err)) => Err(err.to_string()),
        None => Err("missing value".to_string()),
    }
}

fn parse_single_quoted(body: &str) -> Result<(Value, &str), String> {
    let mut out = String::new();
    let mut chars = body.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some((_, escaped)) => out.push(escaped),
                None => break,
            },
            '\'' => return Ok((Value::String(out), &body[i + 1..])),
            _ => out.push(c),
        }
    }
    Err("unterminated string".to_string())
}

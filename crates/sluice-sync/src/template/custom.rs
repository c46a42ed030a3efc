//! Mapping-specific filters: type casts, JSON helpers, regexes and datetime
//! reformatting

use super::{is_blank, to_liquid_string};
use crate::error::{TransformError, TransformResult};
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat};
use parking_lot::Mutex;
use regex::{Regex, RegexBuilder};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::LazyLock;

static LEADING_FLOAT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*[-+]?(?:\d+(?:\.\d+)?|\.\d+)(?:[eE][-+]?\d+)?").expect("valid regex")
});

const REGEX_CACHE_LIMIT: usize = 256;

static REGEX_CACHE: LazyLock<Mutex<HashMap<(String, String), Regex>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

pub(super) fn apply(name: &str, input: Value, args: &[Value]) -> TransformResult<Value> {
    match name {
        "cast" => cast(input, &arg(args, 0)),
        "parse_json" => Ok(parse_json(input)),
        "to_json_array" => {
            let delimiter = args.first().map_or_else(|| ",".to_string(), to_liquid_string);
            Ok(Value::String(to_json_array(&input, &delimiter)))
        }
        "regex_replace" => {
            let re = build_regex(&required(name, args, 0)?, &arg(args, 2))?;
            let replacement = ruby_replacement(&arg(args, 1));
            Ok(Value::String(
                re.replace_all(&to_liquid_string(&input), replacement.as_str())
                    .into_owned(),
            ))
        }
        "match_regex" => {
            let re = build_regex(&required(name, args, 0)?, &arg(args, 1))?;
            if re.is_match(&to_liquid_string(&input)) {
                Ok(input)
            } else {
                Err(TransformError::filter(
                    name,
                    "input does not match regex pattern",
                ))
            }
        }
        "to_datetime" => to_datetime(input, &required(name, args, 0)?),
        other => Err(TransformError::filter(other, "not a custom filter")),
    }
}

fn arg(args: &[Value], i: usize) -> String {
    args.get(i).map(to_liquid_string).unwrap_or_default()
}

fn required(filter: &str, args: &[Value], i: usize) -> TransformResult<String> {
    args.get(i)
        .map(to_liquid_string)
        .ok_or_else(|| TransformError::filter(filter, format!("missing argument {}", i + 1)))
}

// ============================================================================
// cast
// ============================================================================

fn cast(input: Value, target: &str) -> TransformResult<Value> {
    match target {
        "string" => Ok(Value::String(to_liquid_string(&input))),
        "number" => {
            let f = match &input {
                Value::Null => 0.0,
                Value::Number(n) => n.as_f64().unwrap_or(0.0),
                Value::String(s) => LEADING_FLOAT
                    .find(s)
                    .and_then(|m| m.as_str().trim().parse::<f64>().ok())
                    .unwrap_or(0.0),
                other => {
                    return Err(TransformError::filter(
                        "cast",
                        format!("cannot cast {} to number", kind(other)),
                    ))
                }
            };
            Ok(serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number))
        }
        "boolean" => Ok(cast_boolean(&input)),
        _ => Ok(input),
    }
}

fn cast_boolean(input: &Value) -> Value {
    match input {
        Value::Null => Value::Null,
        Value::Bool(b) => Value::Bool(*b),
        Value::String(s) if s.is_empty() => Value::Null,
        Value::String(s) => Value::Bool(!matches!(
            s.as_str(),
            "0" | "f" | "F" | "false" | "FALSE" | "off" | "OFF"
        )),
        Value::Number(n) => Value::Bool(n.as_f64() != Some(0.0)),
        _ => Value::Bool(true),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "nil",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ============================================================================
// JSON helpers
// ============================================================================

fn parse_json(input: Value) -> Value {
    match &input {
        Value::String(s) if !s.trim().is_empty() => serde_json::from_str(s).unwrap_or(input),
        _ => input,
    }
}

fn to_json_array(input: &Value, delimiter: &str) -> String {
    if is_blank(input) {
        return "[]".to_string();
    }
    match input {
        Value::Array(_) => input.to_string(),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.starts_with('[') || trimmed.starts_with('{') {
                match serde_json::from_str::<Value>(trimmed) {
                    Ok(parsed @ Value::Array(_)) => return parsed.to_string(),
                    Ok(parsed @ Value::Object(_)) => return Value::Array(vec![parsed]).to_string(),
                    _ => {}
                }
            }
            let parts: Vec<Value> = s
                .split(delimiter)
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(|p| Value::String(p.to_string()))
                .collect();
            Value::Array(parts).to_string()
        }
        other => Value::Array(vec![other.clone()]).to_string(),
    }
}

// ============================================================================
// Regexes
// ============================================================================

/// Compile `pattern` with single-letter flags: `i` case-insensitive, `m`
/// multi-line anchors, `x` ignore whitespace. Other letters are accepted and
/// ignored.
pub fn build_regex(pattern: &str, flags: &str) -> TransformResult<Regex> {
    let key = (pattern.to_string(), flags.to_string());
    if let Some(re) = REGEX_CACHE.lock().get(&key) {
        return Ok(re.clone());
    }

    let mut builder = RegexBuilder::new(pattern);
    for flag in flags.chars() {
        match flag {
            'i' => builder.case_insensitive(true),
            'm' => builder.multi_line(true),
            'x' => builder.ignore_whitespace(true),
            _ => &mut builder,
        };
    }
    let re = builder
        .build()
        .map_err(|e| TransformError::filter("regex", e.to_string()))?;

    let mut cache = REGEX_CACHE.lock();
    if cache.len() >= REGEX_CACHE_LIMIT {
        cache.clear();
    }
    cache.insert(key, re.clone());
    Ok(re)
}

/// Translate `\1`-style backreferences into the regex crate's `${1}` syntax
fn ruby_replacement(replacement: &str) -> String {
    let mut out = String::with_capacity(replacement.len());
    let mut chars = replacement.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.peek().copied() {
                Some(d) if d.is_ascii_digit() => {
                    chars.next();
                    out.push_str(&format!("${{{d}}}"));
                }
                Some('\\') => {
                    chars.next();
                    out.push('\\');
                }
                _ => out.push('\\'),
            },
            '$' => out.push_str("$$"),
            _ => out.push(c),
        }
    }
    out
}

// ============================================================================
// Dates
// ============================================================================

fn to_datetime(input: Value, format: &str) -> TransformResult<Value> {
    if is_blank(&input) {
        return Ok(input);
    }
    let text = to_liquid_string(&input);
    let text = text.trim();

    let parsed = DateTime::parse_and_remainder(text, format)
        .map(|(dt, _)| dt)
        .or_else(|_| {
            NaiveDateTime::parse_and_remainder(text, format)
                .map(|(dt, _)| dt.and_utc().fixed_offset())
        })
        .or_else(|_| {
            NaiveDate::parse_and_remainder(text, format).map(|(d, _)| {
                d.and_time(chrono::NaiveTime::MIN).and_utc().fixed_offset()
            })
        })
        .map_err(|e| {
            TransformError::filter(
                "to_datetime",
                format!("'{text}' does not match '{format}': {e}"),
            )
        })?;

    Ok(Value::String(
        parsed.to_rfc3339_opts(SecondsFormat::Secs, false),
    ))
}

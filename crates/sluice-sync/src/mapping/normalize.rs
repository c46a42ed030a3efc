//! Interpretation of rendered template text as a JSON value

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

static NUMERIC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[-+]?(?:\d+\.?\d*|\.\d+)(?:[eE][-+]?\d+)?$").expect("valid regex")
});

/// Turn rendered template output into the value written to the destination
///
/// Tried in order on the stripped text: JSON object/array, quoted JSON
/// string, `true`/`false`, `null`, numeric literal. Anything else (and
/// whitespace-only output) is kept as the original, unstripped string.
pub fn normalize_template_output(rendered: String) -> Value {
    let stripped = rendered.trim();
    if stripped.is_empty() {
        return Value::String(rendered);
    }

    if stripped.starts_with('{') || stripped.starts_with('[') {
        if let Ok(value) = serde_json::from_str::<Value>(stripped) {
            return value;
        }
    }

    if stripped.len() >= 2 && stripped.starts_with('"') && stripped.ends_with('"') {
        if let Ok(value) = serde_json::from_str::<Value>(stripped) {
            return value;
        }
    }

    if stripped.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if stripped.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }
    if stripped.eq_ignore_ascii_case("null") {
        return Value::Null;
    }

    if let Some(number) = parse_numeric(stripped) {
        return number;
    }

    Value::String(rendered)
}

fn parse_numeric(text: &str) -> Option<Value> {
    if !NUMERIC.is_match(text) {
        return None;
    }
    if text.contains(['.', 'e', 'E']) {
        let f = text.parse::<f64>().ok()?;
        return serde_json::Number::from_f64(f).map(Value::Number);
    }
    let digits = text.strip_prefix('+').unwrap_or(text);
    digits
        .parse::<i64>()
        .map(Value::from)
        .or_else(|_| digits.parse::<u64>().map(Value::from))
        .ok()
        .or_else(|| {
            digits
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
        })
}

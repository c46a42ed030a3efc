//! Standard filters
//!
//! String, collection and math filters follow Liquid's semantics: math keeps
//! integers integral unless a float is involved, numeric strings are coerced,
//! and a filter that cannot make sense of its input usually passes it through.

use super::{custom, is_empty, to_liquid_string, truthy, RenderContext};
use crate::error::{TransformError, TransformResult};
use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};
use serde_json::Value;
use tracing::debug;

/// Apply the named filter to `input`
pub(crate) fn apply(
    name: &str,
    input: Value,
    args: &[Value],
    ctx: &RenderContext,
) -> TransformResult<Value> {
    let value = match name {
        // strings
        "upcase" => Value::String(text(&input).to_uppercase()),
        "downcase" => Value::String(text(&input).to_lowercase()),
        "capitalize" => Value::String(capitalize(&text(&input))),
        "strip" => Value::String(text(&input).trim().to_string()),
        "lstrip" => Value::String(text(&input).trim_start().to_string()),
        "rstrip" => Value::String(text(&input).trim_end().to_string()),
        "append" => Value::String(text(&input) + &required(name, args, 0)?),
        "prepend" => Value::String(required(name, args, 0)? + &text(&input)),
        "replace" => {
            let from = required(name, args, 0)?;
            let to = optional(args, 1);
            Value::String(text(&input).replace(&from, &to))
        }
        "replace_first" => {
            let from = required(name, args, 0)?;
            let to = optional(args, 1);
            Value::String(text(&input).replacen(&from, &to, 1))
        }
        "remove" => Value::String(text(&input).replace(&required(name, args, 0)?, "")),
        "remove_first" => Value::String(text(&input).replacen(&required(name, args, 0)?, "", 1)),
        "truncate" => truncate(&text(&input), args)?,
        "url_encode" => Value::String(urlencoding::encode(&text(&input)).replace("%20", "+")),
        "escape" => Value::String(escape_html(&text(&input))),

        // collections
        "split" => split(&text(&input), &required(name, args, 0)?),
        "join" => match input {
            Value::Array(items) => {
                let sep = args.first().map_or_else(|| " ".to_string(), to_liquid_string);
                Value::String(
                    items
                        .iter()
                        .map(to_liquid_string)
                        .collect::<Vec<_>>()
                        .join(&sep),
                )
            }
            other => other,
        },
        "first" => match &input {
            Value::Array(items) => items.first().cloned().unwrap_or(Value::Null),
            _ => Value::Null,
        },
        "last" => match &input {
            Value::Array(items) => items.last().cloned().unwrap_or(Value::Null),
            _ => Value::Null,
        },
        "size" => Value::from(match &input {
            Value::String(s) => s.chars().count(),
            Value::Array(a) => a.len(),
            Value::Object(o) => o.len(),
            _ => 0,
        }),
        "default" => {
            if !truthy(&input) || is_empty(&input) {
                args.first().cloned().unwrap_or(Value::Null)
            } else {
                input
            }
        }

        // math
        "plus" => arithmetic(name, &input, args, |a, b| a.checked_add(b), |a, b| a + b)?,
        "minus" => arithmetic(name, &input, args, |a, b| a.checked_sub(b), |a, b| a - b)?,
        "times" => arithmetic(name, &input, args, |a, b| a.checked_mul(b), |a, b| a * b)?,
        "divided_by" => {
            if number(args.first().unwrap_or(&Value::Null)).is_zero() {
                return Err(TransformError::filter(name, "divided by 0"));
            }
            arithmetic(
                name,
                &input,
                args,
                floored_div,
                |a, b| a / b,
            )?
        }
        "modulo" => {
            if number(args.first().unwrap_or(&Value::Null)).is_zero() {
                return Err(TransformError::filter(name, "divided by 0"));
            }
            arithmetic(
                name,
                &input,
                args,
                floored_rem,
                |a, b| a - b * (a / b).floor(),
            )?
        }
        "abs" => match number(&input) {
            Num::Int(i) => Value::from(i.saturating_abs()),
            Num::Float(f) => float(f.abs()),
        },
        "ceil" => Value::from(number(&input).as_f64().ceil() as i64),
        "floor" => Value::from(number(&input).as_f64().floor() as i64),
        "round" => {
            let f = number(&input).as_f64();
            match args.first().map(|a| number(a).as_f64() as i32) {
                Some(digits) if digits > 0 => {
                    let scale = 10f64.powi(digits);
                    float((f * scale).round() / scale)
                }
                _ => Value::from(f.round() as i64),
            }
        }

        "date" => date(&input, args, ctx)?,

        "cast" | "parse_json" | "to_json_array" | "regex_replace" | "match_regex"
        | "to_datetime" => custom::apply(name, input, args)?,

        unknown => {
            debug!(filter = unknown, "Unknown template filter; passing input through");
            input
        }
    };
    Ok(value)
}

fn text(value: &Value) -> String {
    to_liquid_string(value)
}

fn required(filter: &str, args: &[Value], i: usize) -> TransformResult<String> {
    args.get(i)
        .map(to_liquid_string)
        .ok_or_else(|| TransformError::filter(filter, format!("missing argument {}", i + 1)))
}

fn optional(args: &[Value], i: usize) -> String {
    args.get(i).map(to_liquid_string).unwrap_or_default()
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

fn truncate(s: &str, args: &[Value]) -> TransformResult<Value> {
    let length = args.first().map_or(50, |a| number(a).as_f64().max(0.0) as usize);
    let ellipsis = args.get(1).map_or_else(|| "...".to_string(), to_liquid_string);
    if s.chars().count() <= length {
        return Ok(Value::String(s.to_string()));
    }
    let keep = length.saturating_sub(ellipsis.chars().count());
    let mut out: String = s.chars().take(keep).collect();
    out.push_str(&ellipsis);
    Ok(Value::String(out))
}

fn split(s: &str, sep: &str) -> Value {
    let parts: Vec<Value> = if sep.is_empty() {
        s.chars().map(|c| Value::String(c.to_string())).collect()
    } else {
        s.split(sep)
            .map(|p| Value::String(p.to_string()))
            .collect()
    };
    Value::Array(parts)
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

// ============================================================================
// Numbers
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }

    fn is_zero(self) -> bool {
        self.as_f64() == 0.0
    }
}

/// Numeric view of a value; anything non-numeric counts as zero
fn number(value: &Value) -> Num {
    match value {
        Value::Number(n) => match n.as_i64() {
            Some(i) => Num::Int(i),
            None => Num::Float(n.as_f64().unwrap_or(0.0)),
        },
        Value::String(s) => {
            let s = s.trim();
            if let Ok(i) = s.parse::<i64>() {
                Num::Int(i)
            } else {
                Num::Float(s.parse::<f64>().unwrap_or(0.0))
            }
        }
        _ => Num::Int(0),
    }
}

fn float(f: f64) -> Value {
    serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number)
}

fn arithmetic(
    filter: &str,
    input: &Value,
    args: &[Value],
    int_op: impl Fn(i64, i64) -> Option<i64>,
    float_op: impl Fn(f64, f64) -> f64,
) -> TransformResult<Value> {
    let rhs = args
        .first()
        .ok_or_else(|| TransformError::filter(filter, "missing argument 1"))?;
    match (number(input), number(rhs)) {
        (Num::Int(a), Num::Int(b)) => int_op(a, b)
            .map(Value::from)
            .ok_or_else(|| TransformError::filter(filter, "integer overflow")),
        (a, b) => Ok(float(float_op(a.as_f64(), b.as_f64()))),
    }
}

/// Integer division rounding toward negative infinity; `None` on overflow
fn floored_div(a: i64, b: i64) -> Option<i64> {
    let q = a.checked_div(b)?;
    if a % b != 0 && (a < 0) != (b < 0) {
        q.checked_sub(1)
    } else {
        Some(q)
    }
}

/// Remainder taking the divisor's sign; `None` on overflow
fn floored_rem(a: i64, b: i64) -> Option<i64> {
    let r = a.checked_rem(b)?;
    if r != 0 && (r < 0) != (b < 0) {
        Some(r + b)
    } else {
        Some(r)
    }
}

// ============================================================================
// Dates
// ============================================================================

const NAIVE_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];

fn date(input: &Value, args: &[Value], ctx: &RenderContext) -> TransformResult<Value> {
    let Some(format) = args.first().map(to_liquid_string) else {
        return Ok(input.clone());
    };
    if format.is_empty() {
        return Ok(input.clone());
    }
    let Some(datetime) = parse_date_input(input, ctx) else {
        return Ok(input.clone());
    };

    let format = format.replace("%L", "%3f").replace("%N", "%9f");
    let items: Vec<Item<'_>> = StrftimeItems::new(&format).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return Err(TransformError::filter(
            "date",
            format!("invalid format '{format}'"),
        ));
    }
    Ok(Value::String(
        datetime.format_with_items(items.into_iter()).to_string(),
    ))
}

fn parse_date_input(input: &Value, ctx: &RenderContext) -> Option<DateTime<FixedOffset>> {
    match input {
        Value::Number(n) => DateTime::from_timestamp(n.as_i64()?, 0).map(|d| d.fixed_offset()),
        Value::String(s) => {
            let s = s.trim();
            match s {
                "now" | "today" => return Some(ctx.now.fixed_offset()),
                _ => {}
            }
            if let Ok(d) = DateTime::parse_from_rfc3339(s) {
                return Some(d);
            }
            for fmt in NAIVE_FORMATS {
                if let Ok(d) = NaiveDateTime::parse_from_str(s, fmt) {
                    return Some(d.and_utc().fixed_offset());
                }
            }
            if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
                return Some(d.and_hms_opt(0, 0, 0)?.and_utc().fixed_offset());
            }
            let secs = s.parse::<i64>().ok()?;
            DateTime::from_timestamp(secs, 0).map(|d| d.fixed_offset())
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn ctx() -> RenderContext {
        RenderContext {
            now: Utc.with_ymd_and_hms(2024, 2, 24, 8, 5, 0).unwrap(),
        }
    }

    fn run(name: &str, input: Value, args: &[Value]) -> Value {
        apply(name, input, args, &ctx()).unwrap()
    }

    #[test]
    fn test_string_filters() {
        assert_eq!(run("upcase", json!("abc"), &[]), json!("ABC"));
        assert_eq!(run("capitalize", json!("hELLO world"), &[]), json!("Hello world"));
        assert_eq!(run("strip", json!("  x "), &[]), json!("x"));
        assert_eq!(run("append", json!("a"), &[json!("b")]), json!("ab"));
        assert_eq!(run("prepend", json!("a"), &[json!(1)]), json!("1a"));
        assert_eq!(
            run("replace", json!("a-b-c"), &[json!("-"), json!("+")]),
            json!("a+b+c")
        );
        assert_eq!(
            run("replace_first", json!("a-b-c"), &[json!("-"), json!("+")]),
            json!("a+b-c")
        );
        assert_eq!(run("remove", json!("a-b-c"), &[json!("-")]), json!("abc"));
        assert_eq!(run("url_encode", json!("a b&c"), &[]), json!("a+b%26c"));
        assert_eq!(
            run("escape", json!("<b>'x'</b>"), &[]),
            json!("&lt;b&gt;&#39;x&#39;&lt;/b&gt;")
        );
    }

    #[test]
    fn test_truncate() {
        assert_eq!(
            run("truncate", json!("Ground control to Major Tom."), &[json!(20)]),
            json!("Ground control to...")
        );
        assert_eq!(run("truncate", json!("short"), &[json!(20)]), json!("short"));
        assert_eq!(
            run("truncate", json!("abcdef"), &[json!(3), json!("")]),
            json!("abc")
        );
    }

    #[test]
    fn test_collection_filters() {
        let parts = run("split", json!("a,b,c"), &[json!(",")]);
        assert_eq!(parts, json!(["a", "b", "c"]));
        assert_eq!(run("join", parts.clone(), &[json!("|")]), json!("a|b|c"));
        assert_eq!(run("first", parts.clone(), &[]), json!("a"));
        assert_eq!(run("last", parts.clone(), &[]), json!("c"));
        assert_eq!(run("size", parts, &[]), json!(3));
        assert_eq!(run("size", json!("héllo"), &[]), json!(5));
    }

    #[test]
    fn test_default() {
        assert_eq!(run("default", Value::Null, &[json!("n/a")]), json!("n/a"));
        assert_eq!(run("default", json!(""), &[json!("n/a")]), json!("n/a"));
        assert_eq!(run("default", json!(false), &[json!("n/a")]), json!("n/a"));
        assert_eq!(run("default", json!(0), &[json!("n/a")]), json!(0));
    }

    #[test]
    fn test_math() {
        assert_eq!(run("plus", json!(4), &[json!(2)]), json!(6));
        assert_eq!(run("plus", json!("4"), &[json!(2.5)]), json!(6.5));
        assert_eq!(run("minus", json!(4), &[json!(6)]), json!(-2));
        assert_eq!(run("times", json!(3), &[json!(1.5)]), json!(4.5));
        assert_eq!(run("divided_by", json!(7), &[json!(2)]), json!(3));
        assert_eq!(run("divided_by", json!(7), &[json!(2.0)]), json!(3.5));
        assert_eq!(run("modulo", json!(7), &[json!(3)]), json!(1));
        assert_eq!(run("round", json!(2.567), &[json!(2)]), json!(2.57));
        assert_eq!(run("round", json!(2.5), &[]), json!(3));
        assert_eq!(run("ceil", json!("1.2"), &[]), json!(2));
        assert_eq!(run("floor", json!(1.8), &[]), json!(1));
        assert_eq!(run("abs", json!(-5), &[]), json!(5));
    }

    #[test]
    fn test_division_floors_toward_negative_infinity() {
        assert_eq!(run("divided_by", json!(7), &[json!(-2)]), json!(-4));
        assert_eq!(run("divided_by", json!(-7), &[json!(2)]), json!(-4));
        assert_eq!(run("divided_by", json!(-8), &[json!(-2)]), json!(4));
        assert_eq!(run("modulo", json!(7), &[json!(-3)]), json!(-2));
        assert_eq!(run("modulo", json!(-7), &[json!(3)]), json!(2));
        assert_eq!(run("modulo", json!(-6), &[json!(3)]), json!(0));
        assert_eq!(run("modulo", json!(7.5), &[json!(-2)]), json!(-0.5));
    }

    #[test]
    fn test_integer_overflow_is_an_error() {
        for name in ["divided_by", "modulo"] {
            let err = apply(name, json!(i64::MIN), &[json!(-1)], &ctx()).unwrap_err();
            assert!(err.to_string().contains("integer overflow"), "{name}: {err}");
        }
    }

    #[test]
    fn test_divide_by_zero_fails() {
        let err = apply("divided_by", json!(1), &[json!(0)], &ctx()).unwrap_err();
        assert!(err.to_string().contains("divided_by"));
    }

    #[test]
    fn test_date() {
        assert_eq!(
            run("date", json!("2024-01-26T09:20:00Z"), &[json!("%Y/%m/%d %H:%M")]),
            json!("2024/01/26 09:20")
        );
        assert_eq!(
            run("date", json!("2024-01-26"), &[json!("%b %d, %Y")]),
            json!("Jan 26, 2024")
        );
        assert_eq!(run("date", json!("today"), &[json!("%Y-%m-%d")]), json!("2024-02-24"));
        assert_eq!(run("date", json!(0), &[json!("%Y")]), json!("1970"));
        assert_eq!(run("date", json!("not a date"), &[json!("%Y")]), json!("not a date"));
    }

    #[test]
    fn test_unknown_filter_passes_through() {
        assert_eq!(run("shout", json!("x"), &[]), json!("x"));
    }
}

//! Embedded template language for `template` mappings
//!
//! A Liquid-compatible subset: `{{ expr | filter: arg }}` outputs,
//! `if`/`elsif`/`else`, `unless`, `assign`, `raw` and `comment` tags, and
//! whitespace control with `{{-`/`-}}`. Variables resolve against the source
//! row. Besides the usual string, math and `date` filters it provides the
//! mapping filters `cast`, `parse_json`, `to_json_array`, `regex_replace`,
//! `match_regex` and `to_datetime`.
//!
//! Output conventions: nil renders empty, floats render Ruby style (`40.0`),
//! arrays and objects render as JSON so that output normalization can turn
//! them back into structured values.

mod custom;
mod filters;
mod parser;

use crate::error::TransformResult;
use crate::types::Row;
use chrono::{DateTime, Utc};
use parser::{CompareOp, Condition, Expression, Node, Operand, Segment};
use serde_json::Value;

pub use custom::build_regex;

/// Values fixed for the duration of one render
#[derive(Debug, Clone)]
pub struct RenderContext {
    /// Resolves `'now'` and `'today'` in the `date` filter
    pub now: DateTime<Utc>,
}

impl Default for RenderContext {
    fn default() -> Self {
        Self { now: Utc::now() }
    }
}

/// A parsed template
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    nodes: Vec<Node>,
}

impl Template {
    pub fn parse(source: &str) -> TransformResult<Self> {
        Ok(Self {
            nodes: parser::parse(source)?,
        })
    }

    /// Render against a source row
    pub fn render(&self, row: &Row, ctx: &RenderContext) -> TransformResult<String> {
        let mut scope = Scope {
            row,
            locals: Row::new(),
            ctx,
        };
        let mut out = String::new();
        scope.render_nodes(&self.nodes, &mut out)?;
        Ok(out)
    }
}

struct Scope<'a> {
    row: &'a Row,
    locals: Row,
    ctx: &'a RenderContext,
}

impl Scope<'_> {
    fn render_nodes(&mut self, nodes: &[Node], out: &mut String) -> TransformResult<()> {
        for node in nodes {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Output(expr) => {
                    let value = self.eval(expr)?;
                    out.push_str(&to_liquid_string(&value));
                }
                Node::Assign { name, value } => {
                    let value = self.eval(value)?;
                    self.locals.insert(name.clone(), value);
                }
                Node::If {
                    branches,
                    otherwise,
                } => {
                    let mut taken = false;
                    for (condition, body) in branches {
                        if self.test(condition) {
                            self.render_nodes(body, out)?;
                            taken = true;
                            break;
                        }
                    }
                    if !taken {
                        self.render_nodes(otherwise, out)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn eval(&self, expr: &Expression) -> TransformResult<Value> {
        let mut value = self.operand(&expr.operand);
        for call in &expr.filters {
            let args: Vec<Value> = call.args.iter().map(|a| self.operand(a)).collect();
            value = filters::apply(&call.name, value, &args, self.ctx)?;
        }
        Ok(value)
    }

    fn operand(&self, operand: &Operand) -> Value {
        match operand {
            Operand::Literal(v) => v.clone(),
            Operand::Variable(segments) => self.resolve(segments),
            Operand::Empty | Operand::Blank => Value::String(String::new()),
        }
    }

    fn resolve(&self, segments: &[Segment]) -> Value {
        let Some((Segment::Key(head), rest)) = segments.split_first() else {
            return Value::Null;
        };
        let Some(root) = self.locals.get(head).or_else(|| self.row.get(head)) else {
            return Value::Null;
        };

        let mut current = root.clone();
        for segment in rest {
            current = match segment {
                Segment::Key(key) => property(&current, key),
                Segment::Index(i) => index(&current, *i),
                Segment::Lookup(op) => match self.operand(op) {
                    Value::String(key) => property(&current, &key),
                    Value::Number(n) => n.as_i64().map_or(Value::Null, |i| index(&current, i)),
                    _ => Value::Null,
                },
            };
            if current.is_null() {
                return Value::Null;
            }
        }
        current
    }

    fn test(&self, condition: &Condition) -> bool {
        match condition {
            Condition::Test(op) => truthy(&self.operand(op)),
            Condition::Not(inner) => !self.test(inner),
            Condition::And(a, b) => self.test(a) && self.test(b),
            Condition::Or(a, b) => self.test(a) || self.test(b),
            Condition::Compare(left, op, right) => self.compare(left, *op, right),
        }
    }

    fn compare(&self, left: &Operand, op: CompareOp, right: &Operand) -> bool {
        match (left, right) {
            (Operand::Empty, other) | (other, Operand::Empty) => {
                let is_empty = is_empty(&self.operand(other));
                return match op {
                    CompareOp::Eq => is_empty,
                    CompareOp::Ne => !is_empty,
                    _ => false,
                };
            }
            (Operand::Blank, other) | (other, Operand::Blank) => {
                let blank = is_blank(&self.operand(other));
                return match op {
                    CompareOp::Eq => blank,
                    CompareOp::Ne => !blank,
                    _ => false,
                };
            }
            _ => {}
        }

        let (l, r) = (self.operand(left), self.operand(right));
        match op {
            CompareOp::Eq => loose_eq(&l, &r),
            CompareOp::Ne => !loose_eq(&l, &r),
            CompareOp::Contains => match &l {
                Value::String(s) => s.contains(&to_liquid_string(&r)),
                Value::Array(items) => items.iter().any(|item| loose_eq(item, &r)),
                Value::Object(map) => r.as_str().is_some_and(|k| map.contains_key(k)),
                _ => false,
            },
            CompareOp::Lt | CompareOp::Gt | CompareOp::Le | CompareOp::Ge => {
                let ordering = match (&l, &r) {
                    (Value::Number(a), Value::Number(b)) => {
                        a.as_f64().zip(b.as_f64()).and_then(|(a, b)| a.partial_cmp(&b))
                    }
                    (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                    _ => None,
                };
                match ordering {
                    Some(o) => match op {
                        CompareOp::Lt => o.is_lt(),
                        CompareOp::Gt => o.is_gt(),
                        CompareOp::Le => o.is_le(),
                        _ => o.is_ge(),
                    },
                    None => false,
                }
            }
        }
    }
}

fn property(value: &Value, key: &str) -> Value {
    match value {
        Value::Object(map) => match map.get(key) {
            Some(v) => v.clone(),
            None if key == "size" => Value::from(map.len()),
            None => Value::Null,
        },
        Value::Array(items) => match key {
            "size" => Value::from(items.len()),
            "first" => items.first().cloned().unwrap_or(Value::Null),
            "last" => items.last().cloned().unwrap_or(Value::Null),
            _ => Value::Null,
        },
        Value::String(s) if key == "size" => Value::from(s.chars().count()),
        _ => Value::Null,
    }
}

fn index(value: &Value, i: i64) -> Value {
    let Value::Array(items) = value else {
        return Value::Null;
    };
    let len = items.len() as i64;
    let idx = if i < 0 { len + i } else { i };
    if (0..len).contains(&idx) {
        items[idx as usize].clone()
    } else {
        Value::Null
    }
}

// ============================================================================
// Value conventions shared with the filters
// ============================================================================

/// Liquid truthiness: only nil and false are falsy
pub(crate) fn truthy(value: &Value) -> bool {
    !matches!(value, Value::Null | Value::Bool(false))
}

pub(crate) fn is_empty(value: &Value) -> bool {
    match value {
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

/// nil, false, whitespace-only strings and empty collections
pub(crate) fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null | Value::Bool(false) => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

/// Equality that treats `1` and `1.0` as equal
pub(crate) fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// The text a value renders as
pub(crate) fn to_liquid_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::String(s) => s.clone(),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.to_string()
            } else if let Some(u) = n.as_u64() {
                u.to_string()
            } else {
                format_float(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

/// Float formatting with a mandatory fractional part (`40.0`, `1.0e+20`)
pub(crate) fn format_float(f: f64) -> String {
    if f.is_nan() {
        return "NaN".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    let abs = f.abs();
    if abs != 0.0 && !(1e-4..1e16).contains(&abs) {
        let sci = format!("{f:e}");
        let (mantissa, exp) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
        let mantissa = if mantissa.contains('.') {
            mantissa.to_string()
        } else {
            format!("{mantissa}.0")
        };
        let (sign, digits) = match exp.strip_prefix('-') {
            Some(d) => ('-', d),
            None => ('+', exp),
        };
        return format!("{mantissa}e{sign}{digits:0>2}");
    }
    if f.fract() == 0.0 {
        format!("{f:.1}")
    } else {
        f.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn row(value: Value) -> Row {
        match value {
            Value::Object(map) => map,
            _ => panic!("row must be an object"),
        }
    }

    fn render(source: &str, data: Value) -> String {
        let ctx = RenderContext {
            now: Utc.with_ymd_and_hms(2024, 2, 24, 12, 0, 0).unwrap(),
        };
        Template::parse(source)
            .unwrap()
            .render(&row(data), &ctx)
            .unwrap()
    }

    #[test]
    fn test_render_variables() {
        let out = render(
            "{{ name }} has {{ items.size }} items, first {{ items[0].sku }}",
            json!({"name": "Ada", "items": [{"sku": "A1"}, {"sku": "B2"}]}),
        );
        assert_eq!(out, "Ada has 2 items, first A1");
    }

    #[test]
    fn test_missing_variable_renders_empty() {
        assert_eq!(render("[{{ nope }}]", json!({})), "[]");
        assert_eq!(render("[{{ a.b.c }}]", json!({"a": 1})), "[]");
    }

    #[test]
    fn test_cast_number_renders_ruby_float() {
        let out = render(
            "Transformed {{cr_reason_sk  | cast: 'number' }}",
            json!({"cr_reason_sk": "40"}),
        );
        assert_eq!(out, "Transformed 40.0");
    }

    #[test]
    fn test_regex_replace_in_template() {
        let out = render(
            "Transformed {{cr_reason_sk | regex_replace: '[0-9]+', 'Numbers'}}",
            json!({"cr_reason_sk": "40"}),
        );
        assert_eq!(out, "Transformed Numbers");
    }

    #[test]
    fn test_structured_values_render_as_json() {
        let out = render(
            "{{ levels | parse_json }}",
            json!({"levels": "[\"a\", \"b\"]"}),
        );
        assert_eq!(out, r#"["a","b"]"#);
    }

    #[test]
    fn test_if_and_unless() {
        let tpl = "{% if score >= 50 %}pass{% elsif score > 0 %}low{% else %}none{% endif %}";
        assert_eq!(render(tpl, json!({"score": 75})), "pass");
        assert_eq!(render(tpl, json!({"score": 10})), "low");
        assert_eq!(render(tpl, json!({"score": 0})), "none");
        assert_eq!(
            render("{% unless vip %}regular{% endunless %}", json!({"vip": false})),
            "regular"
        );
    }

    #[test]
    fn test_contains_and_empty() {
        let tpl = "{% if tags contains 'b' %}yes{% endif %}{% if note == empty %}-{% endif %}";
        assert_eq!(render(tpl, json!({"tags": ["a", "b"], "note": ""})), "yes-");
        assert_eq!(
            render("{% if title contains 'Mr' %}m{% endif %}", json!({"title": "Mrs"})),
            "m"
        );
    }

    #[test]
    fn test_assign() {
        let out = render(
            "{% assign full = first | append: ' ' | append: last %}{{ full | upcase }}",
            json!({"first": "ada", "last": "lovelace"}),
        );
        assert_eq!(out, "ADA LOVELACE");
    }

    #[test]
    fn test_date_now() {
        let out = render("{{ 'now' | date: '%Y-%m-%dT%H:%M:%S.%L%z' }}", json!({}));
        assert_eq!(out, "2024-02-24T12:00:00.000+0000");
    }

    #[test]
    fn test_format_float() {
        assert_eq!(format_float(40.0), "40.0");
        assert_eq!(format_float(19.5), "19.5");
        assert_eq!(format_float(-0.25), "-0.25");
        assert_eq!(format_float(1e20), "1.0e+20");
        assert_eq!(format_float(1.5e-7), "1.5e-07");
        assert_eq!(format_float(0.0), "0.0");
    }

    #[test]
    fn test_truthiness() {
        assert!(truthy(&json!("")));
        assert!(truthy(&json!(0)));
        assert!(!truthy(&json!(false)));
        assert!(!truthy(&Value::Null));
        assert!(is_blank(&json!("  ")));
        assert!(!is_blank(&json!(0)));
    }
}

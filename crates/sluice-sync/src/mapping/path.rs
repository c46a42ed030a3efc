//! Destination paths: `a.b.c` nests objects, `items[].sku` builds arrays of
//! objects, a trailing `tags[]` appends

use crate::error::{TransformError, TransformResult};
use serde_json::{Map, Value};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
enum PathSegment {
    Field(String),
    Append(String),
}

/// A parsed dot-delimited destination path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationPath {
    raw: String,
    segments: Vec<PathSegment>,
}

impl DestinationPath {
    pub fn parse(raw: &str) -> TransformResult<Self> {
        let mut segments = Vec::new();
        for part in raw.split('.') {
            if part.is_empty() {
                return Err(TransformError::Path(format!(
                    "empty segment in destination path '{raw}'"
                )));
            }
            let segment = if part.contains("[]") {
                let key = part.replace("[]", "");
                if key.is_empty() {
                    return Err(TransformError::Path(format!(
                        "array segment without a name in destination path '{raw}'"
                    )));
                }
                PathSegment::Append(key)
            } else {
                PathSegment::Field(part.to_string())
            };
            segments.push(segment);
        }
        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Write `value` into `target` at this path
    pub fn write(&self, target: &mut Map<String, Value>, value: Value) {
        write_segments(target, &self.segments, value);
    }
}

impl fmt::Display for DestinationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn write_segments(target: &mut Map<String, Value>, segments: &[PathSegment], value: Value) {
    let Some((head, rest)) = segments.split_first() else {
        return;
    };

    if rest.is_empty() {
        match head {
            PathSegment::Field(key) => {
                target.insert(key.clone(), value);
            }
            PathSegment::Append(key) => {
                if let Some(items) = array_at(target, key) {
                    items.push(value);
                }
            }
        }
        return;
    }

    let next = match head {
        PathSegment::Field(key) => object_at(target, key),
        PathSegment::Append(key) => array_at(target, key).and_then(|items| {
            let reuse =
                matches!(items.last(), Some(Value::Object(last)) if !occupied(last, rest));
            if !reuse {
                items.push(Value::Object(Map::new()));
            }
            items.last_mut().and_then(Value::as_object_mut)
        }),
    };
    if let Some(next) = next {
        write_segments(next, rest, value);
    }
}

/// The object at `target[key]`, replacing anything that is not an object
fn object_at<'a>(
    target: &'a mut Map<String, Value>,
    key: &str,
) -> Option<&'a mut Map<String, Value>> {
    let slot = target.entry(key.to_string()).or_insert(Value::Null);
    if !slot.is_object() {
        *slot = Value::Object(Map::new());
    }
    slot.as_object_mut()
}

/// The array at `target[key]`, replacing anything that is not an array
fn array_at<'a>(target: &'a mut Map<String, Value>, key: &str) -> Option<&'a mut Vec<Value>> {
    let slot = target.entry(key.to_string()).or_insert(Value::Null);
    if !slot.is_array() {
        *slot = Value::Array(Vec::new());
    }
    slot.as_array_mut()
}

/// Whether writing `rest` into `obj` would overwrite an existing value
fn occupied(obj: &Map<String, Value>, rest: &[PathSegment]) -> bool {
    let Some((head, tail)) = rest.split_first() else {
        return false;
    };
    match head {
        PathSegment::Append(_) => false,
        PathSegment::Field(key) if tail.is_empty() => obj.contains_key(key),
        PathSegment::Field(key) => match obj.get(key) {
            Some(Value::Object(inner)) => occupied(inner, tail),
            Some(_) => true,
            None => false,
        },
    }
}

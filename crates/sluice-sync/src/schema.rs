//! Model schema inference
//!
//! Reads the first row of a model query and derives a column type from each
//! value. Used to show what a model exposes before mappings are written.

use crate::error::{Result, SyncError};
use crate::model::{Model, PagingStrategy};
use crate::traits::{ReadRequest, SourceConnector};
use crate::types::Row;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

const DATETIME_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Integer,
    Number,
    Boolean,
    Datetime,
    String,
    /// The sampled value was null
    Unknown,
}

impl ColumnType {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => ColumnType::Unknown,
            Value::Bool(_) => ColumnType::Boolean,
            Value::Number(n) if n.is_f64() => ColumnType::Number,
            Value::Number(_) => ColumnType::Integer,
            Value::String(s) if is_datetime(s) => ColumnType::Datetime,
            _ => ColumnType::String,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::Integer => "integer",
            ColumnType::Number => "number",
            ColumnType::Boolean => "boolean",
            ColumnType::Datetime => "datetime",
            ColumnType::String => "string",
            ColumnType::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Column name → inferred type, in column name order
pub type ModelSchema = BTreeMap<String, ColumnType>;

fn is_datetime(s: &str) -> bool {
    let s = s.trim();
    DateTime::parse_from_rfc3339(s).is_ok()
        || DATETIME_FORMATS
            .iter()
            .any(|f| NaiveDateTime::parse_from_str(s, f).is_ok())
        || NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
}

pub fn infer_from_row(row: &Row) -> ModelSchema {
    row.iter()
        .map(|(column, value)| (column.clone(), ColumnType::of(value)))
        .collect()
}

/// Infer the schema of `model` from its first row
///
/// An empty result yields an empty schema.
pub async fn infer_model_schema(
    source: &dyn SourceConnector,
    model: &Model,
) -> Result<ModelSchema> {
    if model.query.trim().is_empty() {
        return Err(SyncError::validation("model query must not be empty"));
    }
    let request = ReadRequest {
        query: model.query.clone(),
        primary_key: model.primary_key.clone(),
        offset: 0,
        limit: 1,
        strategy: PagingStrategy::Offset,
        offset_param: None,
        limit_param: None,
        cursor_field: None,
        cursor_value: None,
    };
    let rows = source.read(&request).await?;
    let schema = rows.first().map(infer_from_row).unwrap_or_default();
    debug!(model = %model.name, columns = schema.len(), "Inferred model schema");
    Ok(schema)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{row, MemorySource};
    use serde_json::json;

    fn model(query: &str) -> Model {
        Model {
            name: "customers".into(),
            query: query.into(),
            primary_key: Some("id".into()),
        }
    }

    #[test]
    fn test_column_types() {
        assert_eq!(ColumnType::of(&json!(7)), ColumnType::Integer);
        assert_eq!(ColumnType::of(&json!(7.5)), ColumnType::Number);
        assert_eq!(ColumnType::of(&json!(false)), ColumnType::Boolean);
        assert_eq!(ColumnType::of(&json!("2024-01-26")), ColumnType::Datetime);
        assert_eq!(ColumnType::of(&json!("2024-01-26T09:20:00")), ColumnType::Datetime);
        assert_eq!(ColumnType::of(&json!("2024-01-26T09:20:00Z")), ColumnType::Datetime);
        assert_eq!(ColumnType::of(&json!("2024-01-26 09:20:00.5")), ColumnType::Datetime);
        assert_eq!(ColumnType::of(&json!("ada")), ColumnType::String);
        assert_eq!(ColumnType::of(&json!({"a": 1})), ColumnType::String);
        assert_eq!(ColumnType::of(&Value::Null), ColumnType::Unknown);
    }

    #[tokio::test]
    async fn test_infers_from_first_row_only() {
        let source = MemorySource::new(vec![
            row(json!({"id": 1, "name": "ada", "score": null, "joined": "2024-01-26"})),
            row(json!({"id": 2, "name": "bo", "score": 4.5, "joined": "2024-01-27"})),
        ]);
        let schema = infer_model_schema(&source, &model("SELECT * FROM customers"))
            .await
            .unwrap();

        assert_eq!(schema["id"], ColumnType::Integer);
        assert_eq!(schema["name"], ColumnType::String);
        assert_eq!(schema["score"], ColumnType::Unknown);
        assert_eq!(schema["joined"], ColumnType::Datetime);

        let request = source.requests().pop().unwrap();
        assert_eq!(request.limit, 1);
        assert_eq!(request.cursor_field, None);
    }

    #[tokio::test]
    async fn test_empty_result_gives_empty_schema() {
        let source = MemorySource::new(vec![]);
        let schema = infer_model_schema(&source, &model("SELECT * FROM customers"))
            .await
            .unwrap();
        assert!(schema.is_empty());
    }

    #[tokio::test]
    async fn test_blank_query_is_rejected() {
        let source = MemorySource::new(vec![]);
        let err = infer_model_schema(&source, &model("  ")).await.unwrap_err();
        assert_eq!(err.kind(), "validation");
        assert!(source.requests().is_empty());
    }
}

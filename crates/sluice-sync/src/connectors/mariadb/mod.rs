//! MariaDB / MySQL source
//!
//! Reads wrap the sync's model query in a subquery so the cursor filter,
//! ordering and paging apply to whatever the model selects:
//!
//! ```sql
//! SELECT * FROM (<model query>) AS subquery
//!   WHERE `cursor` >= ? ORDER BY `cursor` ASC
//!   LIMIT <limit> OFFSET <row offset>
//! ```
//!
//! The query building and value conversion here are driver independent; the
//! connector itself needs the `mysql` feature.

#[cfg(feature = "mysql")]
mod client;

#[cfg(feature = "mysql")]
pub use client::MariaDbSource;

use crate::model::{Catalog, Stream, SyncMode};
use crate::traits::ReadRequest;
use crate::types::SensitiveString;
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use validator::Validate;

/// Connection settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct MariaDbConfig {
    #[validate(length(min = 1))]
    pub host: String,

    #[serde(default = "default_port")]
    #[validate(range(min = 1))]
    pub port: u16,

    #[validate(length(min = 1))]
    pub username: String,

    pub password: SensitiveString,

    #[validate(length(min = 1))]
    pub database: String,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_port() -> u16 {
    3306
}

fn default_connect_timeout_secs() -> u64 {
    10
}

// ============================================================================
// Query building
// ============================================================================

/// Quote an identifier with backticks
pub fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// The paged SQL for one read and its bind parameter, if any
pub fn build_read_query(request: &ReadRequest) -> (String, Option<Value>) {
    let inner = request.query.trim().trim_end_matches(';').trim_end();
    let mut sql = format!("SELECT * FROM ({inner}) AS subquery");
    let mut param = None;

    if let Some(cursor) = &request.cursor_field {
        let column = quote_ident(cursor);
        if let Some(value) = request.cursor_value.as_ref().filter(|v| !v.is_null()) {
            sql.push_str(&format!(" WHERE {column} >= ?"));
            param = Some(value.clone());
        }
        sql.push_str(&format!(" ORDER BY {column} ASC"));
    }

    sql.push_str(&format!(
        " LIMIT {} OFFSET {}",
        request.limit,
        request.row_offset()
    ));
    (sql, param)
}

// ============================================================================
// Schema discovery
// ============================================================================

/// One row of `information_schema.columns`
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    pub table: String,
    pub column: String,
    pub data_type: String,
    pub nullable: bool,
}

/// JSON Schema type of a SQL column type
pub fn json_type(data_type: &str) -> &'static str {
    match data_type.to_ascii_lowercase().as_str() {
        "tinyint" | "smallint" | "mediumint" | "int" | "integer" | "bigint" | "year" => "integer",
        "decimal" | "numeric" | "float" | "double" | "real" => "number",
        "bool" | "boolean" => "boolean",
        "json" => "object",
        _ => "string",
    }
}

/// Group columns (ordered by table) into one stream per table
pub fn build_catalog(database: &str, columns: &[ColumnInfo]) -> Catalog {
    let mut catalog = Catalog::new();
    let mut current: Option<(String, serde_json::Map<String, Value>)> = None;

    for col in columns {
        if current.as_ref().map(|(t, _)| t.as_str()) != Some(col.table.as_str()) {
            if let Some((table, props)) = current.take() {
                catalog = catalog.add_stream(table_stream(database, table, props));
            }
            current = Some((col.table.clone(), serde_json::Map::new()));
        }
        if let Some((_, props)) = current.as_mut() {
            let ty = json_type(&col.data_type);
            let schema = if col.nullable {
                json!({"type": [ty, "null"]})
            } else {
                json!({"type": ty})
            };
            props.insert(col.column.clone(), schema);
        }
    }
    if let Some((table, props)) = current {
        catalog = catalog.add_stream(table_stream(database, table, props));
    }
    catalog
}

fn table_stream(database: &str, table: String, props: serde_json::Map<String, Value>) -> Stream {
    Stream::new(
        table.clone(),
        json!({"type": "object", "properties": props}),
    )
    .sync_modes(vec![SyncMode::FullRefresh, SyncMode::Incremental])
    .metadata("database", json!(database))
    .metadata("table", json!(table))
}

// ============================================================================
// Value conversion
// ============================================================================

/// A DATE/DATETIME/TIMESTAMP value as an ISO 8601 string
///
/// Midnight values render as a plain date.
pub fn date_to_json(
    year: u16,
    month: u8,
    day: u8,
    hour: u8,
    minute: u8,
    second: u8,
    micros: u32,
) -> Value {
    let Some(date) = NaiveDate::from_ymd_opt(year.into(), month.into(), day.into()) else {
        return Value::Null;
    };
    if hour == 0 && minute == 0 && second == 0 && micros == 0 {
        return Value::String(date.format("%Y-%m-%d").to_string());
    }
    match NaiveTime::from_hms_micro_opt(hour.into(), minute.into(), second.into(), micros) {
        Some(time) => {
            let fmt = if micros == 0 {
                "%Y-%m-%dT%H:%M:%S"
            } else {
                "%Y-%m-%dT%H:%M:%S%.6f"
            };
            Value::String(date.and_time(time).format(fmt).to_string())
        }
        None => Value::Null,
    }
}

/// A TIME value (which may exceed 24h or be negative) as `[-]HHH:MM:SS[.ffffff]`
pub fn time_to_json(
    negative: bool,
    days: u32,
    hours: u8,
    minutes: u8,
    seconds: u8,
    micros: u32,
) -> Value {
    let total_hours = u64::from(days) * 24 + u64::from(hours);
    let sign = if negative { "-" } else { "" };
    let mut out = format!("{sign}{total_hours:02}:{minutes:02}:{seconds:02}");
    if micros > 0 {
        out.push_str(&format!(".{micros:06}"));
    }
    Value::String(out)
}

/// Text columns arrive as bytes; non-UTF-8 data is hex encoded
pub fn bytes_to_json(bytes: Vec<u8>) -> Value {
    match String::from_utf8(bytes) {
        Ok(s) => Value::String(s),
        Err(e) => Value::String(hex::encode(e.into_bytes())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PagingStrategy;

    fn request(query: &str) -> ReadRequest {
        ReadRequest {
            query: query.into(),
            primary_key: Some("id".into()),
            offset: 0,
            limit: 100,
            strategy: PagingStrategy::Offset,
            offset_param: None,
            limit_param: None,
            cursor_field: None,
            cursor_value: None,
        }
    }

    #[test]
    fn test_plain_read_pages_by_offset() {
        let mut req = request("SELECT * FROM users;  ");
        req.offset = 200;
        let (sql, param) = build_read_query(&req);
        assert_eq!(
            sql,
            "SELECT * FROM (SELECT * FROM users) AS subquery LIMIT 100 OFFSET 200"
        );
        assert!(param.is_none());
    }

    #[test]
    fn test_cursor_read_filters_and_orders() {
        let mut req = request("SELECT id, updated_at FROM users");
        req.cursor_field = Some("updated_at".into());
        req.cursor_value = Some(json!("2026-01-01 00:00:00"));
        let (sql, param) = build_read_query(&req);
        assert_eq!(
            sql,
            "SELECT * FROM (SELECT id, updated_at FROM users) AS subquery \
             WHERE `updated_at` >= ? ORDER BY `updated_at` ASC LIMIT 100 OFFSET 0"
        );
        assert_eq!(param, Some(json!("2026-01-01 00:00:00")));
    }

    #[test]
    fn test_cursor_without_value_only_orders() {
        let mut req = request("SELECT * FROM t");
        req.cursor_field = Some("seq".into());
        req.strategy = PagingStrategy::Page;
        req.offset = 3;
        req.limit = 10;
        let (sql, param) = build_read_query(&req);
        assert!(sql.ends_with("ORDER BY `seq` ASC LIMIT 10 OFFSET 20"), "{sql}");
        assert!(param.is_none());
    }

    #[test]
    fn test_quote_ident_escapes_backticks() {
        assert_eq!(quote_ident("we`ird"), "`we``ird`");
    }

    #[test]
    fn test_catalog_groups_columns_by_table() {
        let col = |t: &str, c: &str, ty: &str, n: bool| ColumnInfo {
            table: t.into(),
            column: c.into(),
            data_type: ty.into(),
            nullable: n,
        };
        let catalog = build_catalog(
            "shop",
            &[
                col("orders", "id", "bigint", false),
                col("orders", "total", "decimal", true),
                col("users", "email", "varchar", false),
                col("users", "active", "BOOLEAN", false),
            ],
        );
        assert_eq!(catalog.streams.len(), 2);

        let orders = catalog.find_stream("orders").unwrap();
        assert_eq!(orders.json_schema["properties"]["id"], json!({"type": "integer"}));
        assert_eq!(
            orders.json_schema["properties"]["total"],
            json!({"type": ["number", "null"]})
        );
        assert_eq!(orders.metadata["database"], json!("shop"));

        let users = catalog.find_stream("users").unwrap();
        assert_eq!(users.json_schema["properties"]["active"], json!({"type": "boolean"}));
        assert!(users.supported_sync_modes.contains(&SyncMode::Incremental));
    }

    #[test]
    fn test_date_values() {
        assert_eq!(date_to_json(2026, 3, 9, 0, 0, 0, 0), json!("2026-03-09"));
        assert_eq!(
            date_to_json(2026, 3, 9, 14, 5, 7, 0),
            json!("2026-03-09T14:05:07")
        );
        assert_eq!(
            date_to_json(2026, 3, 9, 14, 5, 7, 250),
            json!("2026-03-09T14:05:07.000250")
        );
        // zero dates are legal in MariaDB
        assert_eq!(date_to_json(0, 0, 0, 0, 0, 0, 0), Value::Null);
    }

    #[test]
    fn test_time_values() {
        assert_eq!(time_to_json(false, 0, 9, 30, 0, 0), json!("09:30:00"));
        assert_eq!(time_to_json(true, 1, 2, 0, 0, 5), json!("-26:00:00.000005"));
    }

    #[test]
    fn test_bytes_values() {
        assert_eq!(bytes_to_json(b"hello".to_vec()), json!("hello"));
        assert_eq!(bytes_to_json(vec![0xff, 0x00]), json!("ff00"));
    }

    #[test]
    fn test_config_defaults() {
        let config: MariaDbConfig = serde_yaml::from_str(
            "host: db.local\nusername: etl\npassword: secret\ndatabase: shop\n",
        )
        .unwrap();
        assert_eq!(config.port, 3306);
        assert_eq!(config.password.expose_secret(), "secret");
        assert!(config.validate().is_ok());

        let bad = MariaDbConfig {
            host: String::new(),
            ..config
        };
        assert!(bad.validate().is_err());
    }
}

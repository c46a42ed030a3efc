use super::{build_catalog, build_read_query, bytes_to_json, date_to_json, time_to_json};
use super::{ColumnInfo, MariaDbConfig};
use crate::error::{Result, SyncError};
use crate::model::{Catalog, CheckDetail, CheckResult};
use crate::traits::{ReadRequest, SourceConnector};
use crate::types::Row;
use async_trait::async_trait;
use metrics::histogram;
use mysql_async::prelude::Queryable;
use mysql_async::{Conn, OptsBuilder};
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use validator::Validate;

const COLUMNS_QUERY: &str = "SELECT table_name, column_name, data_type, is_nullable \
     FROM information_schema.columns WHERE table_schema = ? \
     ORDER BY table_name, ordinal_position";

/// Reads sync models from a MariaDB or MySQL database
///
/// Holds no connection: every call opens one and disconnects before
/// returning, whether or not the call succeeded.
pub struct MariaDbSource {
    config: MariaDbConfig,
}

impl MariaDbSource {
    pub fn new(config: MariaDbConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| SyncError::config(format!("invalid mariadb config: {e}")))?;
        Ok(Self { config })
    }

    async fn connect(&self) -> Result<Conn> {
        let opts = OptsBuilder::default()
            .ip_or_hostname(self.config.host.clone())
            .tcp_port(self.config.port)
            .user(Some(self.config.username.clone()))
            .pass(Some(self.config.password.expose_secret().to_string()))
            .db_name(Some(self.config.database.clone()));

        let timeout = Duration::from_secs(self.config.connect_timeout_secs);
        match tokio::time::timeout(timeout, Conn::new(opts)).await {
            Ok(conn) => conn.map_err(db_error),
            Err(_) => Err(SyncError::connection(format!(
                "timed out connecting to {}:{}",
                self.config.host, self.config.port
            ))),
        }
    }

    async fn release(conn: Conn) {
        if let Err(e) = conn.disconnect().await {
            warn!(error = %e, "Failed to close database connection");
        }
    }

    async fn fetch(conn: &mut Conn, request: &ReadRequest) -> Result<Vec<Row>> {
        let (sql, param) = build_read_query(request);
        let params: Vec<mysql_async::Value> = param.iter().map(json_to_mysql).collect();
        debug!(sql = %sql, "Reading batch");

        let rows: Vec<mysql_async::Row> = conn.exec(sql, params).await.map_err(db_error)?;
        Ok(rows.into_iter().map(row_to_json).collect())
    }
}

#[async_trait]
impl SourceConnector for MariaDbSource {
    fn name(&self) -> &str {
        "mariadb"
    }

    async fn check_connection(&self) -> CheckResult {
        let mut conn = match self.connect().await {
            Ok(conn) => conn,
            Err(e) => {
                return CheckResult::from_checks(vec![CheckDetail::failed(
                    "connect",
                    e.to_string(),
                )])
            }
        };
        let ping: std::result::Result<Option<i64>, _> = conn.query_first("SELECT 1").await;
        Self::release(conn).await;

        let query = match ping {
            Ok(_) => CheckDetail::passed("query"),
            Err(e) => CheckDetail::failed("query", e.to_string()),
        };
        CheckResult::from_checks(vec![CheckDetail::passed("connect"), query])
    }

    async fn discover_schema(&self) -> Result<Catalog> {
        let mut conn = self.connect().await?;
        let result: std::result::Result<Vec<(String, String, String, String)>, _> = conn
            .exec(COLUMNS_QUERY, (self.config.database.clone(),))
            .await;
        Self::release(conn).await;

        let columns: Vec<ColumnInfo> = result
            .map_err(db_error)?
            .into_iter()
            .map(|(table, column, data_type, nullable)| ColumnInfo {
                table,
                column,
                data_type,
                nullable: nullable.eq_ignore_ascii_case("YES"),
            })
            .collect();
        Ok(build_catalog(&self.config.database, &columns))
    }

    async fn read(&self, request: &ReadRequest) -> Result<Vec<Row>> {
        let start = Instant::now();
        let mut conn = self.connect().await?;
        let result = Self::fetch(&mut conn, request).await;
        Self::release(conn).await;

        histogram!("sluice_source_query_duration_seconds", "source" => "mariadb")
            .record(start.elapsed().as_secs_f64());
        result
    }
}

fn db_error(err: mysql_async::Error) -> SyncError {
    match err {
        mysql_async::Error::Io(e) => SyncError::connection(e.to_string()),
        mysql_async::Error::Driver(e) => SyncError::connection(e.to_string()),
        mysql_async::Error::Url(e) => SyncError::config(e.to_string()),
        other => SyncError::batch_io("query", other.to_string()),
    }
}

fn json_to_mysql(value: &Value) -> mysql_async::Value {
    match value {
        Value::Null => mysql_async::Value::NULL,
        Value::Bool(b) => mysql_async::Value::Int(i64::from(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                mysql_async::Value::Int(i)
            } else if let Some(u) = n.as_u64() {
                mysql_async::Value::UInt(u)
            } else {
                mysql_async::Value::Double(n.as_f64().unwrap_or_default())
            }
        }
        Value::String(s) => mysql_async::Value::Bytes(s.clone().into_bytes()),
        other => mysql_async::Value::Bytes(other.to_string().into_bytes()),
    }
}

fn value_to_json(value: mysql_async::Value) -> Value {
    match value {
        mysql_async::Value::NULL => Value::Null,
        mysql_async::Value::Bytes(b) => bytes_to_json(b),
        mysql_async::Value::Int(n) => Value::from(n),
        mysql_async::Value::UInt(n) => Value::from(n),
        mysql_async::Value::Float(f) => Value::from(f64::from(f)),
        mysql_async::Value::Double(d) => Value::from(d),
        mysql_async::Value::Date(y, m, d, h, i, s, us) => date_to_json(y, m, d, h, i, s, us),
        mysql_async::Value::Time(neg, d, h, i, s, us) => time_to_json(neg, d, h, i, s, us),
    }
}

fn row_to_json(mut row: mysql_async::Row) -> Row {
    let names: Vec<String> = row
        .columns_ref()
        .iter()
        .map(|c| c.name_str().into_owned())
        .collect();
    let mut out = Row::new();
    for (i, name) in names.into_iter().enumerate() {
        let value = row
            .take::<mysql_async::Value, _>(i)
            .map(value_to_json)
            .unwrap_or(Value::Null);
        out.insert(name, value);
    }
    out
}

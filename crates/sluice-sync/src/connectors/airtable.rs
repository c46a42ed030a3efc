//! Airtable destination
//!
//! Writes are upserts on the destination primary key. Before any write the
//! remote ids of all keys in the request are resolved with `filterByFormula`
//! lookups (`OR({pk}='a', {pk}='b', ...)`, at most `lookup_batch_size` keys
//! per lookup). Records are then sent in chunks of `chunk_size`: known keys
//! are PATCHed with their record id, the rest are POSTed. A failed call marks
//! only that call's records as failed; later chunks continue.

use crate::error::{Result, SyncError};
use crate::model::{
    Catalog, CheckDetail, CheckResult, LogLevel, RecordAction, RequestLog, Stream, SyncMode,
};
use crate::rate_limiter::{RateLimitConfig, TokenBucket};
use crate::retry::{status_error, with_retry, RetryConfig};
use crate::traits::{
    DestinationCapabilities, DestinationConnector, ErrorReporter, ReportContext,
    TracingReporter, WriteOutcome, WriteRecord, WriteRequest,
};
use crate::types::SensitiveString;
use async_trait::async_trait;
use metrics::counter;
use regex::Regex;
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::{debug, info, warn};
use validator::Validate;

pub const DEFAULT_API_BASE: &str = "https://api.airtable.com/v0/";

/// Records per write call accepted by the API
pub const MAX_CHUNK_SIZE: usize = 10;

static NAME_JUNK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\s-]").expect("valid regex"));

/// Airtable connection settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AirtableConfig {
    /// Personal access token
    pub api_key: SensitiveString,

    #[validate(length(min = 1))]
    pub base_id: String,

    #[serde(default = "default_api_base")]
    #[validate(url)]
    pub api_base: String,

    /// Keys per `filterByFormula` lookup
    #[serde(default = "default_lookup_batch_size")]
    #[validate(range(min = 1, max = 100))]
    pub lookup_batch_size: usize,

    /// Records per PATCH/POST/DELETE call
    #[serde(default = "default_chunk_size")]
    #[validate(range(min = 1, max = 10))]
    pub chunk_size: usize,

    #[serde(default = "default_timeout_secs")]
    #[validate(range(min = 1, max = 300))]
    pub timeout_secs: u64,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

fn default_lookup_batch_size() -> usize {
    100
}

fn default_chunk_size() -> usize {
    MAX_CHUNK_SIZE
}

fn default_timeout_secs() -> u64 {
    30
}

pub struct AirtableDestination {
    config: AirtableConfig,
    client: Client,
    limiter: TokenBucket,
    reporter: Arc<dyn ErrorReporter>,
}

impl AirtableDestination {
    pub fn new(config: AirtableConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| SyncError::config(format!("airtable: {e}")))?;
        if config.api_key.is_empty() {
            return Err(SyncError::config("airtable: api_key must not be empty"));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            limiter: TokenBucket::new(config.rate_limit),
            client,
            config,
            reporter: Arc::new(TracingReporter),
        })
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.api_base.trim_end_matches('/'), path)
    }

    /// One rate-limited, retried API call; returns the parsed body
    async fn call(
        &self,
        method: Method,
        url: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Value> {
        let what = format!("{method} {url}");
        let method = &method;
        with_retry(&self.config.retry, &what, move || async move {
            self.limiter.acquire().await;
            let mut request = self
                .client
                .request(method.clone(), url)
                .bearer_auth(self.config.api_key.expose_secret())
                .query(query);
            if let Some(body) = body {
                request = request.json(body);
            }
            let response = request.send().await?;
            let status = response.status();
            let text = response.text().await?;
            if !status.is_success() {
                counter!("sluice_airtable_requests_total", "outcome" => "error").increment(1);
                return Err(status_error(status.as_u16(), &text));
            }
            counter!("sluice_airtable_requests_total", "outcome" => "ok").increment(1);
            if text.trim().is_empty() {
                Ok(Value::Null)
            } else {
                Ok(serde_json::from_str(&text)?)
            }
        })
        .await
    }

    async fn list_bases(&self) -> Result<Vec<Value>> {
        let body = self
            .call(Method::GET, &self.endpoint("meta/bases"), &[], None)
            .await?;
        Ok(array_at(&body, "bases").to_vec())
    }

    /// Remote record ids by primary-key value
    ///
    /// A failed lookup is logged and reported; its keys count as not found.
    async fn find_existing(
        &self,
        url: &str,
        primary_key: &str,
        records: &[WriteRecord],
        outcome: &mut WriteOutcome,
    ) -> HashMap<String, String> {
        let formulas: Vec<String> = records
            .iter()
            .filter_map(|r| r.fields.get(primary_key).and_then(value_key))
            .map(|key| format!("{{{primary_key}}}='{}'", key.replace('\'', "\\'")))
            .collect();

        let mut existing = HashMap::new();
        for batch in formulas.chunks(self.config.lookup_batch_size) {
            let formula = format!("OR({})", batch.join(", "));
            if let Err(err) = self
                .lookup(url, primary_key, &formula, &mut existing)
                .await
            {
                warn!(url, error = %err, "Record lookup failed, treating keys as new");
                self.reporter
                    .report(&err, &ReportContext::new().stage("lookup"));
                outcome.log(RequestLog::new(
                    LogLevel::Error,
                    json!({"method": "GET", "url": url, "filterByFormula": formula}),
                    json!({"error": err.to_string()}),
                ));
            }
        }
        debug!(url, found = existing.len(), "Resolved existing records");
        existing
    }

    async fn lookup(
        &self,
        url: &str,
        primary_key: &str,
        formula: &str,
        existing: &mut HashMap<String, String>,
    ) -> Result<()> {
        let mut offset: Option<String> = None;
        loop {
            let mut query = vec![("filterByFormula", formula.to_string())];
            if let Some(offset) = &offset {
                query.push(("offset", offset.clone()));
            }
            let body = self.call(Method::GET, url, &query, None).await?;
            for record in array_at(&body, "records") {
                let id = record.get("id").and_then(Value::as_str);
                let key = record
                    .get("fields")
                    .and_then(|f| f.get(primary_key))
                    .and_then(value_key);
                if let (Some(id), Some(key)) = (id, key) {
                    existing.insert(key, id.to_string());
                }
            }
            match body.get("offset").and_then(Value::as_str) {
                Some(next) => offset = Some(next.to_string()),
                None => return Ok(()),
            }
        }
    }

    async fn upsert_chunk(
        &self,
        url: &str,
        primary_key: &str,
        chunk: &[WriteRecord],
        existing: &HashMap<String, String>,
        outcome: &mut WriteOutcome,
    ) {
        let mut updates = Vec::new();
        let mut update_keys = Vec::new();
        let mut inserts = Vec::new();
        let mut insert_keys = Vec::new();
        for record in chunk {
            let remote_id = record
                .fields
                .get(primary_key)
                .and_then(value_key)
                .and_then(|key| existing.get(&key));
            match remote_id {
                Some(id) => {
                    updates.push(json!({"id": id, "fields": record.fields}));
                    update_keys.push(record.key.as_str());
                }
                None => {
                    inserts.push(json!({"fields": record.fields}));
                    insert_keys.push(record.key.as_str());
                }
            }
        }

        if !updates.is_empty() {
            let payload = json!({"records": updates});
            self.send(Method::PATCH, url, &[], Some(payload), update_keys, outcome)
                .await;
        }
        if !inserts.is_empty() {
            let payload = json!({"records": inserts});
            self.send(Method::POST, url, &[], Some(payload), insert_keys, outcome)
                .await;
        }
    }

    async fn delete_chunk(
        &self,
        url: &str,
        primary_key: &str,
        chunk: &[WriteRecord],
        existing: &HashMap<String, String>,
        outcome: &mut WriteOutcome,
    ) {
        let mut query = Vec::new();
        let mut keys = Vec::new();
        for record in chunk {
            let remote_id = record
                .fields
                .get(primary_key)
                .and_then(value_key)
                .and_then(|key| existing.get(&key));
            match remote_id {
                Some(id) => {
                    query.push(("records[]", id.clone()));
                    keys.push(record.key.as_str());
                }
                // already gone
                None => outcome.add_success(1),
            }
        }
        if !keys.is_empty() {
            self.send(Method::DELETE, url, &query, None, keys, outcome)
                .await;
        }
    }

    /// Send one write call and account for its records
    async fn send(
        &self,
        method: Method,
        url: &str,
        query: &[(&str, String)],
        body: Option<Value>,
        keys: Vec<&str>,
        outcome: &mut WriteOutcome,
    ) {
        let request_log = json!({
            "method": method.as_str(),
            "url": url,
            "query": query.iter().map(|(k, v)| json!([k, v])).collect::<Vec<_>>(),
            "body": body,
        });
        match self.call(method.clone(), url, query, body.as_ref()).await {
            Ok(response) => {
                outcome.add_success(keys.len() as u64);
                outcome.log(RequestLog::new(LogLevel::Info, request_log, response));
            }
            Err(err) => {
                warn!(%method, url, records = keys.len(), error = %err, "Write call failed");
                self.reporter
                    .report(&err, &ReportContext::new().stage("write"));
                outcome.add_failures(keys);
                outcome.log(RequestLog::new(
                    LogLevel::Error,
                    request_log,
                    json!({"error": err.to_string()}),
                ));
            }
        }
    }

    fn table_stream(&self, table: &Value, base_name: &str) -> Option<Stream> {
        let id = table.get("id")?.as_str()?;
        let name = table.get("name")?.as_str()?;
        Some(
            Stream::new(format!("{base_name}/{}", clean_name(name)), table_schema(table))
                .url(self.endpoint(&format!("{}/{id}", self.config.base_id)))
                .sync_modes(vec![SyncMode::Incremental])
                .batch_size(MAX_CHUNK_SIZE)
                .metadata("table_id", json!(id)),
        )
    }
}

#[async_trait]
impl DestinationConnector for AirtableDestination {
    fn name(&self) -> &str {
        "airtable"
    }

    fn capabilities(&self) -> DestinationCapabilities {
        DestinationCapabilities {
            requires_upsert_identity: true,
        }
    }

    async fn check_connection(&self) -> CheckResult {
        match self.list_bases().await {
            Ok(bases) => {
                let base_id = Some(self.config.base_id.as_str());
                let visible = bases
                    .iter()
                    .any(|b| b.get("id").and_then(Value::as_str) == base_id);
                let base = if visible {
                    CheckDetail::passed("base")
                } else {
                    CheckDetail::failed(
                        "base",
                        format!("base {} is not accessible", self.config.base_id),
                    )
                };
                CheckResult::from_checks(vec![CheckDetail::passed("credentials"), base])
            }
            Err(err) => {
                CheckResult::from_checks(vec![CheckDetail::failed("credentials", err.to_string())])
            }
        }
    }

    async fn discover_schema(&self) -> Result<Catalog> {
        let bases = self.list_bases().await?;
        let base = bases
            .iter()
            .find(|b| b.get("id").and_then(Value::as_str) == Some(self.config.base_id.as_str()))
            .ok_or_else(|| {
                SyncError::validation(format!(
                    "base {} is not accessible with this token",
                    self.config.base_id
                ))
            })?;
        let base_name = base
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or(&self.config.base_id);

        let path = format!("meta/bases/{}/tables", self.config.base_id);
        let body = self
            .call(Method::GET, &self.endpoint(&path), &[], None)
            .await?;
        let catalog = array_at(&body, "tables")
            .iter()
            .filter_map(|table| self.table_stream(table, base_name))
            .fold(Catalog::new(), Catalog::add_stream);
        info!(base = base_name, streams = catalog.streams.len(), "Discovered Airtable tables");
        Ok(catalog)
    }

    async fn write(&self, request: WriteRequest) -> Result<WriteOutcome> {
        let url = request.stream.url.clone().ok_or_else(|| {
            SyncError::config(format!("stream '{}' has no url", request.stream.name))
        })?;
        let primary_key = request.primary_key.trim();
        if primary_key.is_empty() {
            return Err(SyncError::validation(
                "destination primary key is required for Airtable writes",
            ));
        }

        let mut outcome = WriteOutcome::new();
        let existing = self
            .find_existing(&url, primary_key, &request.records, &mut outcome)
            .await;

        for chunk in request.records.chunks(self.config.chunk_size) {
            match request.action {
                RecordAction::Delete => {
                    self.delete_chunk(&url, primary_key, chunk, &existing, &mut outcome)
                        .await
                }
                RecordAction::Insert | RecordAction::Update => {
                    self.upsert_chunk(&url, primary_key, chunk, &existing, &mut outcome)
                        .await
                }
            }
        }

        info!(
            stream = %request.stream.name,
            action = %request.action,
            success = outcome.success,
            failure = outcome.failure,
            "Airtable write finished"
        );
        Ok(outcome)
    }
}

/// String form of a key value; `None` for null
fn value_key(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn array_at<'a>(body: &'a Value, key: &str) -> &'a [Value] {
    body.get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn clean_name(name: &str) -> String {
    NAME_JUNK.replace_all(name, "").trim().to_string()
}

/// JSON schema of a table's writable fields
fn table_schema(table: &Value) -> Value {
    let mut properties = Map::new();
    for field in array_at(table, "fields") {
        let (Some(name), Some(kind)) = (
            field.get("name").and_then(Value::as_str),
            field.get("type").and_then(Value::as_str),
        ) else {
            continue;
        };
        let schema = match kind {
            "formula" | "rollup" | "count" | "lookup" | "multipleLookupValues" | "autoNumber"
            | "createdTime" | "lastModifiedTime" | "createdBy" | "lastModifiedBy" | "button" => {
                continue
            }
            "number" | "percent" | "currency" | "rating" | "duration" => {
                json!({"type": ["number", "null"]})
            }
            "checkbox" => json!({"type": ["boolean", "null"]}),
            "multipleSelects" | "multipleRecordLinks" | "multipleAttachments"
            | "multipleCollaborators" => json!({"type": ["array", "null"]}),
            _ => json!({"type": ["string", "null"]}),
        };
        properties.insert(name.to_string(), schema);
    }
    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "type": "object",
        "additionalProperties": true,
        "properties": properties,
    })
}

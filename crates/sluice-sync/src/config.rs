//! Job configuration for the `sluice` binary
//!
//! A job file describes one sync end to end:
//!
//! ```yaml
//! engine:
//!   workers: 8
//!   batch_size: 500
//! logging:
//!   level: info
//!   format: json
//! source:
//!   type: mariadb
//!   host: db.internal
//!   username: etl
//!   password: ${DB_PASSWORD}
//!   database: shop
//! destination:
//!   type: airtable
//!   api_key: ${AIRTABLE_TOKEN}
//!   base_id: appXXXXXXXX
//! sync:
//!   model: { name: customers, query: "SELECT * FROM customers", primary_key: id }
//!   stream_name: CRM/Customers
//!   mapping: { id: customer_id, email: contact.email }
//! ```
//!
//! `${VAR}` and `${VAR:-default}` are expanded from the environment before
//! the YAML is parsed.

use crate::connectors::{AirtableConfig, MariaDbConfig};
use crate::error::{Result, SyncError};
use crate::extractor::ExtractorConfig;
use crate::mapping::{EmbeddingConfig, MappingConfig, MappingEntry};
use crate::model::SyncDefinition;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::LazyLock;
use validator::Validate;

static ENV_VAR_REGEX: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*)(?::-([^}]*))?\}").expect("valid regex")
});

/// Root of a job file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    pub sync: SyncDefinition,

    pub source: SourceSpec,

    pub destination: DestinationSpec,

    /// Used by `vector` mappings that carry no `embedding_config` of their own
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<EmbeddingConfig>,
}

/// Engine tuning
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct EngineConfig {
    #[serde(flatten)]
    pub extractor: ExtractorConfig,

    /// Overrides the destination's lookup sub-batch size
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 1, max = 100))]
    pub lookup_batch_size: Option<usize>,

    /// Overrides the destination's write chunk size
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 1, max = 10))]
    pub chunk_size: Option<usize>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SourceSpec {
    Mariadb(MariaDbConfig),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DestinationSpec {
    Airtable(AirtableConfig),
}

impl JobConfig {
    /// Read, expand, parse and validate a job file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            SyncError::config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        let mut config: Self = serde_yaml::from_str(&expanded)
            .map_err(|e| SyncError::config(format!("failed to parse job config: {e}")))?;
        config.apply_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Push engine-level overrides and embedding defaults into their sections
    fn apply_overrides(&mut self) {
        let DestinationSpec::Airtable(airtable) = &mut self.destination;
        if let Some(n) = self.engine.lookup_batch_size {
            airtable.lookup_batch_size = n;
        }
        if let Some(n) = self.engine.chunk_size {
            airtable.chunk_size = n;
        }

        if let (Some(defaults), MappingConfig::Entries(entries)) =
            (&self.embedding, &mut self.sync.mapping)
        {
            for entry in entries.iter_mut() {
                if let MappingEntry::Vector {
                    embedding_config: config @ None,
                    ..
                } = entry
                {
                    *config = Some(defaults.clone());
                }
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.engine
            .validate()
            .map_err(|e| SyncError::config(format!("engine: {e}")))?;
        if self.engine.extractor.workers == 0 {
            return Err(SyncError::config("engine: workers must be greater than 0"));
        }
        if self.engine.extractor.batch_size == 0 {
            return Err(SyncError::config("engine: batch_size must be greater than 0"));
        }

        match &self.source {
            SourceSpec::Mariadb(c) => c
                .validate()
                .map_err(|e| SyncError::config(format!("source: {e}")))?,
        }
        match &self.destination {
            DestinationSpec::Airtable(c) => c
                .validate()
                .map_err(|e| SyncError::config(format!("destination: {e}")))?,
        }

        self.sync.mapping.validate()?;
        Ok(())
    }
}

/// Expand `${VAR}` and `${VAR:-default}`; unset variables without a default
/// become empty
pub fn expand_env_vars(content: &str) -> String {
    ENV_VAR_REGEX
        .replace_all(content, |caps: &regex::Captures| {
            let default = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
            std::env::var(&caps[1]).unwrap_or_else(|_| default.to_string())
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SyncMode;

    const JOB: &str = r#"
engine:
  workers: 8
  chunk_size: 5
logging:
  format: json
source:
  type: mariadb
  host: db.internal
  username: etl
  password: ${SLUICE_TEST_DB_PASSWORD:-changeme}
  database: shop
destination:
  type: airtable
  api_key: pat_test
  base_id: appBase1
embedding:
  model: text-embedding-3-small
  api_key: sk-test
sync:
  model:
    name: customers
    query: SELECT * FROM customers
    primary_key: id
  stream_name: CRM/Customers
  cursor_field: updated_at
  mapping:
    - mapping_type: standard
      from: email
      to: Email
    - mapping_type: vector
      from: bio
      to: Bio Vector
"#;

    #[test]
    fn test_env_var_expansion() {
        std::env::set_var("SLUICE_TEST_TOKEN", "tok");
        std::env::remove_var("SLUICE_TEST_MISSING");
        assert_eq!(
            expand_env_vars("a: ${SLUICE_TEST_TOKEN}, b: ${SLUICE_TEST_MISSING:-x}, c: ${SLUICE_TEST_MISSING}"),
            "a: tok, b: x, c: "
        );
    }

    #[test]
    fn test_parse_job() {
        let job = JobConfig::from_yaml(JOB).unwrap();
        assert_eq!(job.engine.extractor.workers, 8);
        assert_eq!(job.engine.extractor.batch_size, 1000);
        assert_eq!(job.logging.format, LogFormat::Json);
        assert_eq!(job.logging.level, "info");
        assert_eq!(job.sync.sync_mode, SyncMode::Incremental);

        let SourceSpec::Mariadb(db) = &job.source;
        assert_eq!(db.port, 3306);

        let DestinationSpec::Airtable(at) = &job.destination;
        assert_eq!(at.chunk_size, 5);
        assert_eq!(at.lookup_batch_size, 100);
    }

    #[test]
    fn test_embedding_defaults_fill_vector_entries() {
        let job = JobConfig::from_yaml(JOB).unwrap();
        let MappingConfig::Entries(entries) = &job.sync.mapping else {
            panic!("expected list mapping");
        };
        match &entries[1] {
            MappingEntry::Vector {
                embedding_config: Some(cfg),
                ..
            } => assert_eq!(cfg.model, "text-embedding-3-small"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_rejects_out_of_range_chunk_size() {
        let yaml = JOB.replace("chunk_size: 5", "chunk_size: 50");
        let err = JobConfig::from_yaml(&yaml).unwrap_err();
        assert!(err.to_string().contains("engine"), "{err}");
    }

    #[test]
    fn test_rejects_unknown_source_type() {
        let yaml = JOB.replace("type: mariadb", "type: oracle");
        assert!(matches!(
            JobConfig::from_yaml(&yaml),
            Err(SyncError::Config(_))
        ));
    }

    #[test]
    fn test_rejects_zero_workers() {
        let yaml = JOB.replace("workers: 8", "workers: 0");
        assert!(JobConfig::from_yaml(&yaml).is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.yaml");
        std::fs::write(&path, JOB).unwrap();
        let job = JobConfig::from_file(&path).unwrap();
        assert_eq!(job.sync.stream_name, "CRM/Customers");

        let missing = JobConfig::from_file(dir.path().join("nope.yaml")).unwrap_err();
        assert!(matches!(missing, SyncError::Config(_)));
    }
}

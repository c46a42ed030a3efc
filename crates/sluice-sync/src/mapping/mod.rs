//! Field mapping: source row → destination payload
//!
//! A mapping is either the legacy flat form, `{source_column: "dest.path"}`,
//! or an ordered list of entries tagged by `mapping_type`:
//!
//! ```yaml
//! mapping:
//!   - mapping_type: standard
//!     from: cr_item_sk
//!     to: id
//!   - mapping_type: static
//!     from: web
//!     to: attributes.channel
//!   - mapping_type: template
//!     from: "{{ first_name | capitalize }} {{ last_name }}"
//!     to: attributes.name
//!   - mapping_type: vector
//!     from: description
//!     to: embedding
//!     embedding_config:
//!       mode: open_ai
//!       model: text-embedding-3-small
//!       api_key: ${OPENAI_API_KEY}
//! ```
//!
//! Entries apply in order; a later entry overwrites an earlier one at the
//! same path.

mod normalize;
mod path;

pub use normalize::normalize_template_output;
pub use path::DestinationPath;

use crate::error::{Result, SyncError, TransformError, TransformResult};
use crate::template::{RenderContext, Template};
use crate::traits::EmbeddingGenerator;
use crate::types::{Row, SensitiveString};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

// ============================================================================
// Configuration
// ============================================================================

/// Embedding service used by a `vector` mapping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub mode: EmbeddingMode,
    pub model: String,
    pub api_key: SensitiveString,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EmbeddingMode {
    #[default]
    #[serde(rename = "open_ai")]
    OpenAi,
}

/// One entry of a list mapping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mapping_type", rename_all = "snake_case")]
pub enum MappingEntry {
    /// Copy a source column
    Standard { from: String, to: String },
    /// Write a literal value
    Static { from: Value, to: String },
    /// Render a template against the row
    Template { from: String, to: String },
    /// Embed a source column; passes it through without a config
    Vector {
        from: String,
        to: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        embedding_config: Option<EmbeddingConfig>,
    },
}

impl MappingEntry {
    pub fn to(&self) -> &str {
        match self {
            MappingEntry::Standard { to, .. }
            | MappingEntry::Static { to, .. }
            | MappingEntry::Template { to, .. }
            | MappingEntry::Vector { to, .. } => to,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            MappingEntry::Standard { .. } => "standard",
            MappingEntry::Static { .. } => "static",
            MappingEntry::Template { .. } => "template",
            MappingEntry::Vector { .. } => "vector",
        }
    }
}

/// `source_column → dest.path` pair of the legacy form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyField {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MappingConfig {
    /// Flat map, applied in declaration order as standard copies
    Legacy(Vec<LegacyField>),
    Entries(Vec<MappingEntry>),
}

impl Default for MappingConfig {
    fn default() -> Self {
        MappingConfig::Entries(Vec::new())
    }
}

impl MappingConfig {
    pub fn len(&self) -> usize {
        match self {
            MappingConfig::Legacy(fields) => fields.len(),
            MappingConfig::Entries(entries) => entries.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check every destination path and template
    pub fn validate(&self) -> Result<()> {
        let invalid = |i: usize, e: TransformError| {
            SyncError::validation(format!("mapping entry {}: {}", i + 1, e.user_message()))
        };
        match self {
            MappingConfig::Legacy(fields) => {
                for (i, field) in fields.iter().enumerate() {
                    if field.from.trim().is_empty() {
                        return Err(SyncError::validation(format!(
                            "mapping entry {}: source column is empty",
                            i + 1
                        )));
                    }
                    DestinationPath::parse(&field.to).map_err(|e| invalid(i, e))?;
                }
            }
            MappingConfig::Entries(entries) => {
                for (i, entry) in entries.iter().enumerate() {
                    DestinationPath::parse(entry.to()).map_err(|e| invalid(i, e))?;
                    match entry {
                        MappingEntry::Template { from, .. } => {
                            Template::parse(from).map_err(|e| invalid(i, e))?;
                        }
                        MappingEntry::Vector {
                            embedding_config: Some(config),
                            ..
                        } => {
                            if config.model.trim().is_empty() {
                                return Err(SyncError::validation(format!(
                                    "mapping entry {}: embedding model is empty",
                                    i + 1
                                )));
                            }
                            if config.api_key.is_empty() {
                                return Err(SyncError::validation(format!(
                                    "mapping entry {}: embedding api_key is empty",
                                    i + 1
                                )));
                            }
                        }
                        _ => {}
                    }
                }
            }
        }
        Ok(())
    }
}

impl Serialize for MappingConfig {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            MappingConfig::Entries(entries) => entries.serialize(serializer),
            MappingConfig::Legacy(fields) => {
                let mut map = serializer.serialize_map(Some(fields.len()))?;
                for field in fields {
                    map.serialize_entry(&field.from, &field.to)?;
                }
                map.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for MappingConfig {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        match Value::deserialize(deserializer)? {
            value @ Value::Array(_) => serde_json::from_value(value)
                .map(MappingConfig::Entries)
                .map_err(D::Error::custom),
            Value::Object(map) => map
                .into_iter()
                .map(|(from, to)| match to {
                    Value::String(to) => Ok(LegacyField { from, to }),
                    other => Err(D::Error::custom(format!(
                        "legacy mapping for '{from}' must be a destination path, got {other}"
                    ))),
                })
                .collect::<std::result::Result<Vec<_>, _>>()
                .map(MappingConfig::Legacy),
            Value::Null => Ok(MappingConfig::default()),
            other => Err(D::Error::custom(format!(
                "mapping must be a list of entries or a map, got {other}"
            ))),
        }
    }
}

// ============================================================================
// Transformer
// ============================================================================

/// Applies a mapping to source rows
///
/// Parsed templates are cached by source text for the transformer's
/// lifetime.
pub struct RecordTransformer {
    embedder: Option<Arc<dyn EmbeddingGenerator>>,
    templates: RwLock<HashMap<String, Arc<Template>>>,
    fixed_now: Option<DateTime<Utc>>,
}

impl Default for RecordTransformer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RecordTransformer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordTransformer")
            .field("embedder", &self.embedder.is_some())
            .field("cached_templates", &self.templates.read().len())
            .finish()
    }
}

impl RecordTransformer {
    pub fn new() -> Self {
        Self {
            embedder: None,
            templates: RwLock::new(HashMap::new()),
            fixed_now: None,
        }
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingGenerator>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Pin the clock seen by `date` filters
    pub fn with_fixed_now(mut self, now: DateTime<Utc>) -> Self {
        self.fixed_now = Some(now);
        self
    }

    /// Transform one source row into a destination object
    pub async fn transform(&self, mapping: &MappingConfig, row: &Row) -> TransformResult<Value> {
        let mut out = Map::new();
        match mapping {
            MappingConfig::Legacy(fields) => {
                for field in fields {
                    DestinationPath::parse(&field.to)?
                        .write(&mut out, standard_value(row, &field.from));
                }
            }
            MappingConfig::Entries(entries) => {
                let ctx = RenderContext {
                    now: self.fixed_now.unwrap_or_else(Utc::now),
                };
                for entry in entries {
                    let path = DestinationPath::parse(entry.to())?;
                    let value = self.entry_value(entry, row, &ctx).await?;
                    path.write(&mut out, value);
                }
            }
        }
        Ok(Value::Object(out))
    }

    async fn entry_value(
        &self,
        entry: &MappingEntry,
        row: &Row,
        ctx: &RenderContext,
    ) -> TransformResult<Value> {
        match entry {
            MappingEntry::Standard { from, .. } => Ok(standard_value(row, from)),
            MappingEntry::Static { from, .. } => Ok(from.clone()),
            MappingEntry::Template { from, .. } => {
                let rendered = self.template(from)?.render(row, ctx)?;
                Ok(normalize_template_output(rendered))
            }
            MappingEntry::Vector {
                from,
                embedding_config,
                ..
            } => {
                let raw = row.get(from).cloned().unwrap_or(Value::Null);
                let Some(config) = embedding_config else {
                    return Ok(raw);
                };
                let text = match raw {
                    Value::Null => return Ok(Value::Null),
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                let embedder = self.embedder.as_ref().ok_or_else(|| {
                    TransformError::Embedding("no embedding generator configured".to_string())
                })?;
                let vector = embedder.generate_embedding(&text, config).await?;
                Ok(Value::Array(
                    vector
                        .into_iter()
                        .map(|v| {
                            serde_json::Number::from_f64(f64::from(v))
                                .map_or(Value::Null, Value::Number)
                        })
                        .collect(),
                ))
            }
        }
    }

    fn template(&self, source: &str) -> TransformResult<Arc<Template>> {
        if let Some(template) = self.templates.read().get(source) {
            return Ok(Arc::clone(template));
        }
        let template = Arc::new(Template::parse(source)?);
        self.templates
            .write()
            .insert(source.to_string(), Arc::clone(&template));
        Ok(template)
    }
}

/// Source value with single quotes doubled; missing columns are null
fn standard_value(row: &Row, column: &str) -> Value {
    match row.get(column) {
        Some(Value::String(s)) => Value::String(s.replace('\'', "''")),
        Some(other) => other.clone(),
        None => Value::Null,
    }
}

//! Sync definitions and their status machine

use super::catalog::Catalog;
use super::record::RecordAction;
use super::SyncId;
use crate::error::{Entity, Result, SyncError};
use crate::mapping::MappingConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Status machine
// ============================================================================

/// Health of a sync definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    #[default]
    Pending,
    Healthy,
    Failed,
    Disabled,
}

/// Events accepted by [`SyncStatus`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncEvent {
    Complete,
    Fail,
    Disable,
    Enable,
}

impl SyncEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SyncEvent::Complete => "complete",
            SyncEvent::Fail => "fail",
            SyncEvent::Disable => "disable",
            SyncEvent::Enable => "enable",
        }
    }
}

impl SyncStatus {
    /// Target status for `event`, or `None` if the transition is illegal
    pub fn next(self, event: SyncEvent) -> Option<SyncStatus> {
        use SyncStatus::*;
        match (event, self) {
            (SyncEvent::Complete, Pending | Healthy | Failed) => Some(Healthy),
            (SyncEvent::Fail, Pending | Healthy) => Some(Failed),
            (SyncEvent::Disable, Pending | Healthy | Failed) => Some(Disabled),
            (SyncEvent::Enable, Disabled) => Some(Pending),
            _ => None,
        }
    }

    pub fn may(self, event: SyncEvent) -> bool {
        self.next(event).is_some()
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncStatus::Pending => write!(f, "pending"),
            SyncStatus::Healthy => write!(f, "healthy"),
            SyncStatus::Failed => write!(f, "failed"),
            SyncStatus::Disabled => write!(f, "disabled"),
        }
    }
}

// ============================================================================
// Schedule
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalUnit {
    Minutes,
    Hours,
    Days,
    Weeks,
}

/// When a sync is triggered
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Schedule {
    /// Only on explicit request
    #[default]
    Manual,
    /// Every `every` units
    Interval { every: u32, unit: IntervalUnit },
    /// Five-field cron expression
    Cron { expression: String },
}

impl Schedule {
    pub fn is_manual(&self) -> bool {
        matches!(self, Schedule::Manual)
    }

    /// Cron expression registered with the orchestrator
    pub fn cron_expression(&self) -> Option<String> {
        match self {
            Schedule::Manual => None,
            Schedule::Cron { expression } => Some(expression.clone()),
            Schedule::Interval { every, unit } => Some(match unit {
                IntervalUnit::Minutes => format!("*/{every} * * * *"),
                IntervalUnit::Hours => format!("0 */{every} * * *"),
                IntervalUnit::Days => format!("0 0 */{every} * *"),
                IntervalUnit::Weeks => format!("0 0 */{} * *", every.saturating_mul(7)),
            }),
        }
    }

    fn validate(&self) -> Result<()> {
        match self {
            Schedule::Manual => Ok(()),
            Schedule::Interval { every, .. } if *every == 0 => Err(SyncError::validation(
                "schedule interval must be greater than 0",
            )),
            Schedule::Interval { .. } => Ok(()),
            Schedule::Cron { expression } => {
                if expression.split_whitespace().count() == 5 {
                    Ok(())
                } else {
                    Err(SyncError::validation(format!(
                        "cron expression '{expression}' must have five fields"
                    )))
                }
            }
        }
    }
}

// ============================================================================
// Definition
// ============================================================================

/// The source query a sync reads from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub name: String,
    pub query: String,
    #[serde(default)]
    pub primary_key: Option<String>,
}

/// Source column ↔ destination field used as upsert identity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimaryKeyMapping {
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub destination: Option<String>,
}

/// Which change events reach the destination and in what batch size
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationSettings {
    #[serde(default = "default_events")]
    pub events: Vec<RecordAction>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_events() -> Vec<RecordAction> {
    vec![
        RecordAction::Insert,
        RecordAction::Update,
        RecordAction::Delete,
    ]
}

fn default_batch_size() -> usize {
    1000
}

impl Default for DestinationSettings {
    fn default() -> Self {
        Self {
            events: default_events(),
            batch_size: default_batch_size(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Re-read the full model every run; the cursor is ignored
    FullRefresh,
    /// Resume from the last committed cursor value
    #[default]
    Incremental,
}

/// How successive source reads are paged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PagingStrategy {
    /// `offset` counts rows and advances by `limit`
    #[default]
    Offset,
    /// `offset` is a page number and advances by one
    Page,
}

/// Source-side paging parameters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncrementStrategyConfig {
    #[serde(default)]
    pub strategy: PagingStrategy,
    #[serde(default)]
    pub offset: Option<u64>,
    #[serde(default)]
    pub limit: Option<u64>,
    /// Request parameter name carrying the offset, for API sources
    #[serde(default)]
    pub offset_param: Option<String>,
    /// Request parameter name carrying the limit, for API sources
    #[serde(default)]
    pub limit_param: Option<String>,
}

impl IncrementStrategyConfig {
    /// First offset of a fresh run
    pub fn start_offset(&self) -> u64 {
        match self.strategy {
            PagingStrategy::Page => self.offset.filter(|o| *o > 0).unwrap_or(1),
            PagingStrategy::Offset => self.offset.unwrap_or(0),
        }
    }

    /// Rows per read, falling back to `default_limit`
    pub fn limit_or(&self, default_limit: u64) -> u64 {
        match self.strategy {
            PagingStrategy::Page => self.limit.filter(|l| *l > 0).unwrap_or(10),
            PagingStrategy::Offset => self.limit.filter(|l| *l > 0).unwrap_or(default_limit),
        }
    }
}

/// A durable source→destination data-movement job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncDefinition {
    #[serde(default)]
    pub id: SyncId,
    #[serde(default)]
    pub name: String,
    pub model: Model,
    /// Destination stream, must exist in the destination catalog
    pub stream_name: String,
    pub mapping: MappingConfig,
    #[serde(default)]
    pub primary_key_mapping: PrimaryKeyMapping,
    #[serde(default)]
    pub destination_settings: DestinationSettings,
    #[serde(default)]
    pub schedule: Schedule,
    #[serde(default)]
    pub sync_mode: SyncMode,
    #[serde(default)]
    pub cursor_field: Option<String>,
    /// Last committed cursor value
    #[serde(default)]
    pub current_cursor_field: Option<serde_json::Value>,
    #[serde(default)]
    pub increment_strategy: Option<IncrementStrategyConfig>,
    #[serde(default)]
    pub status: SyncStatus,
    #[serde(default)]
    pub discarded_at: Option<DateTime<Utc>>,
}

impl SyncDefinition {
    /// Orchestrator workflow identifier
    pub fn workflow_id(&self) -> String {
        crate::traits::sync_workflow_id(self.id)
    }

    /// Source column identifying a row
    pub fn source_primary_key(&self) -> Option<&str> {
        non_blank(self.primary_key_mapping.source.as_deref())
            .or_else(|| non_blank(self.model.primary_key.as_deref()))
    }

    /// Destination field used for upsert lookups
    pub fn destination_primary_key(&self) -> Option<&str> {
        non_blank(self.primary_key_mapping.destination.as_deref())
            .or_else(|| self.source_primary_key())
    }

    /// Cursor column, if this sync resumes by cursor
    pub fn active_cursor_field(&self) -> Option<&str> {
        match self.sync_mode {
            SyncMode::Incremental => non_blank(self.cursor_field.as_deref()),
            SyncMode::FullRefresh => None,
        }
    }

    /// Whether `action` events are forwarded to the destination
    pub fn emits(&self, action: RecordAction) -> bool {
        self.destination_settings.events.contains(&action)
    }

    pub fn is_discarded(&self) -> bool {
        self.discarded_at.is_some()
    }

    /// Apply a status event; the status is untouched on error
    pub fn apply(&mut self, event: SyncEvent) -> Result<SyncStatus> {
        let next = self
            .status
            .next(event)
            .ok_or_else(|| SyncError::transition(Entity::Sync, self.status, event.name()))?;
        self.status = next;
        Ok(next)
    }

    /// Check the definition against the destination catalog
    pub fn validate(&self, catalog: &Catalog, requires_upsert_identity: bool) -> Result<()> {
        if self.model.query.trim().is_empty() {
            return Err(SyncError::validation("model query must not be empty"));
        }
        if catalog.find_stream(&self.stream_name).is_none() {
            return Err(SyncError::validation(format!(
                "stream '{}' does not exist in the destination catalog",
                self.stream_name
            )));
        }
        if requires_upsert_identity {
            if self.source_primary_key().is_none() {
                return Err(SyncError::validation(
                    "source primary key is required for this destination",
                ));
            }
            if self.destination_primary_key().is_none() {
                return Err(SyncError::validation(
                    "destination primary key is required for this destination",
                ));
            }
        }
        if self.destination_settings.events.is_empty() {
            return Err(SyncError::validation(
                "at least one change event must be selected",
            ));
        }
        if self.destination_settings.batch_size == 0 {
            return Err(SyncError::validation("batch size must be greater than 0"));
        }
        self.schedule.validate()?;
        self.mapping.validate()?;
        Ok(())
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

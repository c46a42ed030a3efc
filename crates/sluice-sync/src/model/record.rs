//! Per-row lineage

use super::{RunId, SyncId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Change event carried by a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordAction {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for RecordAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordAction::Insert => write!(f, "insert"),
            RecordAction::Update => write!(f, "update"),
            RecordAction::Delete => write!(f, "delete"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    #[default]
    Pending,
    Success,
    Failed,
}

/// One source row's transformed payload and delivery state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRecord {
    pub sync_id: SyncId,
    /// Last run that touched this record
    pub sync_run_id: RunId,
    pub primary_key: String,
    pub fingerprint: String,
    pub record: serde_json::Value,
    pub action: RecordAction,
    pub status: RecordStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<serde_json::Value>,
}

impl SyncRecord {
    pub fn new(
        sync_id: SyncId,
        sync_run_id: RunId,
        primary_key: impl Into<String>,
        fingerprint: impl Into<String>,
        record: serde_json::Value,
        action: RecordAction,
    ) -> Self {
        Self {
            sync_id,
            sync_run_id,
            primary_key: primary_key.into(),
            fingerprint: fingerprint.into(),
            record,
            action,
            status: RecordStatus::Pending,
            logs: None,
        }
    }

    /// Still present at the destination as far as the engine knows
    pub fn is_live(&self) -> bool {
        self.action != RecordAction::Delete
    }

    /// Delivered with this exact content and not since deleted
    pub fn is_unchanged(&self, fingerprint: &str) -> bool {
        self.is_live() && self.status == RecordStatus::Success && self.fingerprint == fingerprint
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_is_unchanged() {
        let mut rec = SyncRecord::new(1, 1, "42", "abc", json!({}), RecordAction::Insert);
        assert!(!rec.is_unchanged("abc"));

        rec.status = RecordStatus::Success;
        assert!(rec.is_unchanged("abc"));
        assert!(!rec.is_unchanged("def"));

        rec.action = RecordAction::Delete;
        assert!(!rec.is_unchanged("abc"));
        assert!(!rec.is_live());
    }

    #[test]
    fn test_action_serde() {
        assert_eq!(serde_json::to_value(RecordAction::Update).unwrap(), json!("update"));
        let action: RecordAction = serde_yaml::from_str("delete").unwrap();
        assert_eq!(action, RecordAction::Delete);
    }
}

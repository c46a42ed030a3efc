//! Source connector interface

use crate::error::Result;
use crate::model::{Catalog, CheckResult, PagingStrategy};
use crate::types::Row;
use async_trait::async_trait;
use serde_json::Value;

/// One bounded read against the model query
#[derive(Debug, Clone, PartialEq)]
pub struct ReadRequest {
    pub query: String,
    pub primary_key: Option<String>,
    /// Row offset or page number, depending on `strategy`
    pub offset: u64,
    pub limit: u64,
    pub strategy: PagingStrategy,
    /// Request parameter names for API-style sources
    pub offset_param: Option<String>,
    pub limit_param: Option<String>,
    /// Only rows with `cursor_field >= cursor_value`, ascending
    pub cursor_field: Option<String>,
    pub cursor_value: Option<Value>,
}

impl ReadRequest {
    /// Row offset of the first row in this read
    pub fn row_offset(&self) -> u64 {
        match self.strategy {
            PagingStrategy::Offset => self.offset,
            PagingStrategy::Page => self.offset.saturating_sub(1) * self.limit,
        }
    }
}

/// A queryable data source
///
/// Implementations hold no connection between calls: each `read` acquires
/// and releases its own.
#[async_trait]
pub trait SourceConnector: Send + Sync {
    fn name(&self) -> &str;

    /// Never fails; problems are reported in the result
    async fn check_connection(&self) -> CheckResult;

    async fn discover_schema(&self) -> Result<Catalog>;

    async fn read(&self, request: &ReadRequest) -> Result<Vec<Row>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_offset() {
        let mut req = ReadRequest {
            query: "SELECT 1".into(),
            primary_key: None,
            offset: 3,
            limit: 10,
            strategy: PagingStrategy::Page,
            offset_param: None,
            limit_param: None,
            cursor_field: None,
            cursor_value: None,
        };
        assert_eq!(req.row_offset(), 20);
        req.strategy = PagingStrategy::Offset;
        assert_eq!(req.row_offset(), 3);
    }
}

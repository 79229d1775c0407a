//! Ledger query interface for inspection and reporting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::LotId;
use stockledger_inventory::{LedgerEntry, MovementKind};

use super::StoreError;

/// Pagination parameters for ledger queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub limit: u32,
    pub offset: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
        }
    }
}

impl Pagination {
    pub fn new(limit: Option<u32>, offset: Option<u32>) -> Self {
        Self {
            limit: limit.unwrap_or(50).min(1000),
            offset: offset.unwrap_or(0),
        }
    }
}

/// Filter criteria; every field narrows the result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerFilter {
    pub lot_id: Option<LotId>,
    pub product_code: Option<String>,
    pub kind: Option<MovementKind>,
    pub occurred_after: Option<DateTime<Utc>>,
    pub occurred_before: Option<DateTime<Utc>>,
}

impl LedgerFilter {
    pub fn matches(&self, entry: &LedgerEntry) -> bool {
        self.lot_id.is_none_or(|id| entry.lot_id == id)
            && self
                .product_code
                .as_deref()
                .is_none_or(|code| entry.product_code == code)
            && self.kind.is_none_or(|kind| entry.kind == kind)
            && self.occurred_after.is_none_or(|t| entry.timestamp >= t)
            && self.occurred_before.is_none_or(|t| entry.timestamp <= t)
    }
}

/// One page of ledger entries, newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerPage {
    pub entries: Vec<LedgerEntry>,
    pub total: u64,
    pub pagination: Pagination,
    pub has_more: bool,
}

/// Async, read-only ledger queries.
#[async_trait::async_trait]
pub trait LedgerQuery: Send + Sync {
    async fn query_entries(
        &self,
        filter: LedgerFilter,
        pagination: Pagination,
    ) -> Result<LedgerPage, StoreError>;

    /// Movements of one lot.
    async fn lot_history(
        &self,
        lot_id: LotId,
        pagination: Option<Pagination>,
    ) -> Result<LedgerPage, StoreError> {
        let filter = LedgerFilter {
            lot_id: Some(lot_id),
            ..Default::default()
        };
        self.query_entries(filter, pagination.unwrap_or_default()).await
    }
}

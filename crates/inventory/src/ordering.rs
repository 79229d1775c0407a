//! Candidate ordering for allocation.

use core::cmp::Ordering;
use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use stockledger_core::DomainError;

use crate::lot::InventoryLot;

/// Which lots the planner drains first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocationOrder {
    /// First in, first out: oldest `created_at` first.
    #[default]
    Fifo,
    /// First expired, first out: earliest expiry first, lots without an
    /// expiry date last, then FIFO.
    Fefo,
}

impl AllocationOrder {
    /// Total order over lots; ties always fall back to `lot_id`.
    pub fn compare(self, a: &InventoryLot, b: &InventoryLot) -> Ordering {
        let fifo = |a: &InventoryLot, b: &InventoryLot| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.lot_id.cmp(&b.lot_id))
        };
        match self {
            AllocationOrder::Fifo => fifo(a, b),
            AllocationOrder::Fefo => {
                let by_expiry = match (a.attributes.expiry_date, b.attributes.expiry_date) {
                    (Some(x), Some(y)) => x.cmp(&y),
                    (Some(_), None) => Ordering::Less,
                    (None, Some(_)) => Ordering::Greater,
                    (None, None) => Ordering::Equal,
                };
                by_expiry.then_with(|| fifo(a, b))
            }
        }
    }

    pub fn sort(self, lots: &mut [InventoryLot]) {
        lots.sort_by(|a, b| self.compare(a, b));
    }
}

impl fmt::Display for AllocationOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocationOrder::Fifo => f.write_str("fifo"),
            AllocationOrder::Fefo => f.write_str("fefo"),
        }
    }
}

impl FromStr for AllocationOrder {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fifo" => Ok(AllocationOrder::Fifo),
            "fefo" => Ok(AllocationOrder::Fefo),
            other => Err(DomainError::validation(format!("unknown allocation order: {other}"))),
        }
    }
}

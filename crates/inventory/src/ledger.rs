//! Append-only stock movement records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, DomainResult, Entity, LedgerEntryId, LotId};

use crate::lot::InventoryLot;
use crate::precision::Amount;

/// Kind of stock movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementKind {
    Inbound,
    Outbound,
    /// Administrative soft delete; never changes quantity.
    Archive,
}

impl MovementKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MovementKind::Inbound => "inbound",
            MovementKind::Outbound => "outbound",
            MovementKind::Archive => "archive",
        }
    }

    pub fn parse(s: &str) -> DomainResult<Self> {
        match s {
            "inbound" => Ok(MovementKind::Inbound),
            "outbound" => Ok(MovementKind::Outbound),
            "archive" => Ok(MovementKind::Archive),
            other => Err(DomainError::validation(format!("unknown movement kind: {other}"))),
        }
    }
}

/// One immutable ledger line. The engine only ever appends these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub entry_id: LedgerEntryId,
    pub lot_id: LotId,
    pub product_code: String,
    pub unique_code: String,
    pub kind: MovementKind,
    /// Signed: positive for inbound, negative for outbound, zero for archive.
    pub quantity_change: Amount,
    pub unit: String,
    pub operator: String,
    pub timestamp: DateTime<Utc>,
    pub description: String,
}

impl Entity for LedgerEntry {
    type Id = LedgerEntryId;

    fn id(&self) -> &Self::Id {
        &self.entry_id
    }
}

impl LedgerEntry {
    fn for_lot(
        lot: &InventoryLot,
        kind: MovementKind,
        quantity_change: Amount,
        operator: &str,
        description: String,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            entry_id: LedgerEntryId::new(),
            lot_id: lot.lot_id,
            product_code: lot.product_code.clone(),
            unique_code: lot.unique_code.clone(),
            kind,
            quantity_change,
            unit: lot.unit().to_string(),
            operator: operator.to_string(),
            timestamp: at,
            description,
        }
    }

    /// Initial receipt: `+initial quantity`.
    pub fn inbound(lot: &InventoryLot, operator: &str, note: Option<&str>, at: DateTime<Utc>) -> Self {
        let description = note.unwrap_or("initial receipt").to_string();
        Self::for_lot(lot, MovementKind::Inbound, lot.remaining_amount(), operator, description, at)
    }

    /// Withdrawal of `take` from `lot` (state before the deduction).
    pub fn outbound(
        lot: &InventoryLot,
        take: Amount,
        operator: &str,
        note: Option<&str>,
        at: DateTime<Utc>,
    ) -> Self {
        let description = format!(
            "{} (allocated from {})",
            note.unwrap_or("withdrawal"),
            label_suffix(&lot.unique_code)
        );
        Self::for_lot(lot, MovementKind::Outbound, -take, operator, description, at)
    }

    pub fn archive(lot: &InventoryLot, operator: &str, reason: Option<&str>, at: DateTime<Utc>) -> Self {
        let description = reason.unwrap_or("archived by administrator").to_string();
        Self::for_lot(lot, MovementKind::Archive, Amount::ZERO, operator, description, at)
    }
}

/// Remaining amount implied by a lot's ledger history.
pub fn replay<'a>(entries: impl IntoIterator<Item = &'a LedgerEntry>) -> Amount {
    entries.into_iter().map(|e| e.quantity_change).sum()
}

/// Last six characters of a label, as printed on the allocation note.
fn label_suffix(code: &str) -> &str {
    let start = code
        .char_indices()
        .rev()
        .nth(5)
        .map(|(i, _)| i)
        .unwrap_or(0);
    &code[start..]
}

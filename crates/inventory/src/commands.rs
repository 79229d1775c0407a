use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::{DomainResult, LotId};

use crate::lot::LotAttributes;
use crate::planner::Selection;
use crate::precision::Amount;
use crate::quantity::{Category, Quantity};

/// Command: take `amount` from the lots matching `selection`.
///
/// `amount` is in the unit of the selected lots, at any precision; it is
/// rounded to thousandths before planning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawStock {
    pub selection: Selection,
    pub amount: Decimal,
    pub note: Option<String>,
    pub operator: String,
    pub occurred_at: DateTime<Utc>,
}

impl WithdrawStock {
    /// The requested amount in fixed point.
    pub fn requested(&self) -> DomainResult<Amount> {
        Amount::from_decimal(self.amount)
    }
}

/// Command: register a freshly received, labelled unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveLot {
    pub product_code: String,
    pub unique_code: String,
    pub batch_number: Option<String>,
    pub category: Category,
    pub quantity: Quantity,
    pub attributes: LotAttributes,
    pub operator: String,
    pub note: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: administratively archive (soft delete) a lot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveLot {
    pub lot_id: LotId,
    pub operator: String,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

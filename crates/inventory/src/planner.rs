//! Allocation planner: decides which lots a withdrawal draws from.
//!
//! Pure and deterministic. Given the same request and candidate lots it
//! always yields the same plan, and it never touches a store.

use core::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use stockledger_core::{LotId, ValueObject};

use crate::lot::{InventoryLot, LotStatus};
use crate::ordering::AllocationOrder;
use crate::precision::{Amount, EPSILON};

/// Which lots a withdrawal may draw from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Selection {
    /// One scanned unit.
    Label { unique_code: String },
    /// Every lot received under a batch of a product.
    Batch {
        product_code: String,
        batch_number: String,
    },
}

impl ValueObject for Selection {}

impl Selection {
    pub fn label(unique_code: impl Into<String>) -> Self {
        Selection::Label {
            unique_code: unique_code.into(),
        }
    }

    pub fn batch(product_code: impl Into<String>, batch_number: impl Into<String>) -> Self {
        Selection::Batch {
            product_code: product_code.into(),
            batch_number: batch_number.into(),
        }
    }

    pub fn matches(&self, lot: &InventoryLot) -> bool {
        match self {
            Selection::Label { unique_code } => lot.unique_code == *unique_code,
            Selection::Batch {
                product_code,
                batch_number,
            } => {
                lot.product_code == *product_code
                    && lot.batch_number.as_deref() == Some(batch_number.as_str())
            }
        }
    }

    pub fn validate(&self) -> Result<(), AllocationError> {
        let blank = |s: &str| s.trim().is_empty();
        match self {
            Selection::Label { unique_code } if blank(unique_code) => Err(
                AllocationError::InvalidRequest("unique_code cannot be empty".to_string()),
            ),
            Selection::Batch {
                product_code,
                batch_number,
            } if blank(product_code) || blank(batch_number) => Err(
                AllocationError::InvalidRequest(
                    "product_code and batch_number are both required".to_string(),
                ),
            ),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selection::Label { unique_code } => write!(f, "label {unique_code}"),
            Selection::Batch {
                product_code,
                batch_number,
            } => write!(f, "batch {batch_number} of {product_code}"),
        }
    }
}

/// Why a withdrawal could not be planned.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AllocationError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("no lot matches {0}")]
    NotFound(String),

    #[error("insufficient stock: requested {requested} {unit}, available {available} {unit}")]
    InsufficientStock {
        requested: Amount,
        available: Amount,
        unit: String,
    },
}

/// One step of a plan: take `take` from `lot_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanLine {
    pub lot_id: LotId,
    pub unique_code: String,
    /// Lot version the plan was computed against.
    pub lot_version: u64,
    pub take: Amount,
    pub remaining_before: Amount,
    pub remaining_after: Amount,
}

/// Ordered deductions satisfying a withdrawal. Transient; never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationPlan {
    pub selection: Selection,
    pub requested: Amount,
    pub unit: String,
    pub lines: Vec<PlanLine>,
    /// Allocatable stock across the whole selection before the withdrawal.
    pub selection_available: Amount,
}

impl AllocationPlan {
    pub fn total(&self) -> Amount {
        self.lines.iter().map(|l| l.take).sum()
    }

    /// Remaining stock over the lots the plan touches, after it is applied.
    pub fn touched_remaining(&self) -> Amount {
        self.lines.iter().map(|l| l.remaining_after).sum()
    }

    /// Remaining stock over the whole selection, after the plan is applied.
    pub fn selection_remaining(&self) -> Amount {
        self.selection_available - self.total()
    }
}

/// Builds allocation plans under a fixed candidate ordering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocationPlanner {
    order: AllocationOrder,
}

impl AllocationPlanner {
    pub fn new(order: AllocationOrder) -> Self {
        Self { order }
    }

    /// Plan a withdrawal of `requested` from the lots matching `selection`.
    ///
    /// `lots` may contain anything the store returned for the selection;
    /// non-matching, used and deleted lots are ignored.
    ///
    /// - no matching lot that is still on record (not deleted): `NotFound`
    /// - matching lots that fall short of `requested` by more than
    ///   [`EPSILON`], or supply nothing at all: `InsufficientStock`
    /// - candidate stock summing past the `i64` range: `InvalidRequest`
    pub fn plan(
        &self,
        selection: &Selection,
        requested: Amount,
        lots: &[InventoryLot],
    ) -> Result<AllocationPlan, AllocationError> {
        selection.validate()?;
        if !requested.is_positive() {
            return Err(AllocationError::InvalidRequest(format!(
                "amount must be positive (got {requested})"
            )));
        }

        let on_record: Vec<&InventoryLot> = lots
            .iter()
            .filter(|lot| selection.matches(lot) && lot.status != LotStatus::Deleted)
            .collect();
        if on_record.is_empty() {
            return Err(AllocationError::NotFound(selection.to_string()));
        }

        let mut candidates: Vec<InventoryLot> = on_record
            .iter()
            .filter(|lot| lot.is_allocatable())
            .map(|lot| (*lot).clone())
            .collect();
        self.order.sort(&mut candidates);

        let unit = candidates
            .first()
            .map(|lot| lot.unit().to_string())
            .unwrap_or_else(|| on_record[0].unit().to_string());
        if let Some(odd) = candidates.iter().find(|lot| lot.unit() != unit) {
            return Err(AllocationError::InvalidRequest(format!(
                "{selection} mixes units {unit} and {}",
                odd.unit()
            )));
        }

        let selection_available =
            Amount::checked_sum(candidates.iter().map(|l| l.remaining_amount())).ok_or_else(|| {
                AllocationError::InvalidRequest(format!("stock of {selection} exceeds the amount limit"))
            })?;

        let mut still_needed = requested;
        let mut lines = Vec::new();
        for lot in &candidates {
            let remaining = lot.remaining_amount();
            let take = remaining.min(still_needed);
            if !take.is_positive() {
                continue;
            }
            still_needed -= take;
            lines.push(PlanLine {
                lot_id: lot.lot_id,
                unique_code: lot.unique_code.clone(),
                lot_version: lot.version,
                take,
                remaining_before: remaining,
                remaining_after: remaining - take,
            });
            if still_needed <= EPSILON {
                break;
            }
        }

        // A shortfall of at most EPSILON is tolerated, but only on a non-empty plan.
        if still_needed > EPSILON || lines.is_empty() {
            return Err(AllocationError::InsufficientStock {
                requested,
                available: requested - still_needed,
                unit,
            });
        }

        Ok(AllocationPlan {
            selection: selection.clone(),
            requested,
            unit,
            lines,
            selection_available,
        })
    }
}

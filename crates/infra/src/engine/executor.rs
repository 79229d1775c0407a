//! Turns an allocation plan into an atomic changeset.
//!
//! The executor never talks to the store itself: it pairs each plan line with
//! the lot snapshot the plan was computed from, derives the next lot state and
//! the outbound ledger entry, and hands the whole thing back for one commit.
//! A stale snapshot surfaces at commit time as a version conflict.

use serde::{Deserialize, Serialize};

use stockledger_core::LotId;
use stockledger_inventory::{
    AllocationPlan, Amount, EPSILON, ExhaustionPolicy, InventoryLot, LedgerEntry, LotStatus,
    WithdrawStock,
};

use crate::error::{EngineError, EngineResult};
use crate::store::{Changeset, LotWrite};

/// One lot's share of a withdrawal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deduction {
    pub lot_id: LotId,
    pub unique_code: String,
    pub amount: Amount,
    /// Remaining on the lot after the deduction.
    pub remaining: Amount,
    /// The deduction flipped the lot to `used`.
    pub exhausted: bool,
}

/// Result of a committed withdrawal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalOutcome {
    pub deducted_lots: Vec<Deduction>,
    /// The requested amount, or at most [`EPSILON`] below it when the
    /// selection ran dry.
    pub total_deducted: Amount,
    /// Remaining across the lots this withdrawal touched.
    pub total_remaining: Amount,
    /// Remaining across every allocatable lot of the selection, before
    /// exhaustion flips; includes residue left on lots that just became `used`.
    pub selection_remaining: Amount,
    pub unit: String,
}

/// Build the changeset applying `plan`, plus the outcome it yields once committed.
///
/// `snapshot` must contain the lots the plan was computed from.
pub(crate) fn apply_plan(
    plan: &AllocationPlan,
    snapshot: &[InventoryLot],
    command: &WithdrawStock,
    policy: &ExhaustionPolicy,
) -> EngineResult<(Changeset, WithdrawalOutcome)> {
    if plan.lines.is_empty() {
        return Err(EngineError::InvariantViolation(format!(
            "empty plan for {}",
            plan.selection
        )));
    }
    let shortfall = plan.requested - plan.total();
    if shortfall.is_negative() || shortfall > EPSILON {
        return Err(EngineError::InvariantViolation(format!(
            "plan for {} deducts {} of {} requested",
            plan.selection,
            plan.total(),
            plan.requested
        )));
    }

    let at = command.occurred_at;
    let note = command.note.as_deref();
    let mut changeset = Changeset::default();
    let mut deducted_lots = Vec::with_capacity(plan.lines.len());

    for line in &plan.lines {
        let lot = snapshot
            .iter()
            .find(|lot| lot.lot_id == line.lot_id)
            .ok_or_else(|| {
                EngineError::InvariantViolation(format!(
                    "planned lot {} missing from snapshot",
                    line.unique_code
                ))
            })?;
        if lot.version != line.lot_version {
            return Err(EngineError::InvariantViolation(format!(
                "lot {} changed between planning and execution",
                line.unique_code
            )));
        }

        let next = lot.deduct(line.take, policy, at)?;
        let entry = LedgerEntry::outbound(lot, line.take, &command.operator, note, at);

        deducted_lots.push(Deduction {
            lot_id: next.lot_id,
            unique_code: next.unique_code.clone(),
            amount: line.take,
            remaining: next.remaining_amount(),
            exhausted: next.status == LotStatus::Used,
        });
        changeset.entries.push(entry);
        changeset.writes.push(LotWrite::update(next, line.lot_version));
    }

    let total_remaining = deducted_lots.iter().map(|d| d.remaining).sum();
    let outcome = WithdrawalOutcome {
        deducted_lots,
        total_deducted: plan.total(),
        total_remaining,
        selection_remaining: plan.selection_remaining(),
        unit: plan.unit.clone(),
    };
    Ok((changeset, outcome))
}

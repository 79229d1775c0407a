//! Stock allocation engine (application-level orchestration).
//!
//! ## Withdrawal Flow
//!
//! ```text
//! WithdrawStock
//!   ↓
//! 1. Read every lot matching the selection (fresh snapshot)
//!   ↓
//! 2. Plan: pure, deterministic, no I/O (NotFound / InsufficientStock stop here)
//!   ↓
//! 3. Execute: derive next lot states + outbound ledger entries
//!   ↓
//! 4. Commit: one atomic changeset, optimistic version check per lot
//! ```
//!
//! A transient commit failure (version conflict, store unavailable) restarts
//! the cycle from step 1. Plans are never replayed against a stale snapshot.
//! After `EngineConfig::commit_attempts` failed cycles the error surfaces as
//! `TransactionAborted`.
//!
//! Inbound registration and archiving go through the same commit boundary, so
//! an archive and an in-flight withdrawal on one lot cannot both succeed.

mod executor;
mod registrar;

pub use executor::{Deduction, WithdrawalOutcome};
pub use registrar::InboundReceipt;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use stockledger_core::LotId;
use stockledger_inventory::{
    AllocationPlanner, Amount, ArchiveLot, InventoryLot, LedgerEntry, ReceiveLot, WithdrawStock,
    replay,
};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::store::{Changeset, LotWrite, StockStore};

/// Replayed vs stored remaining of one lot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub lot_id: LotId,
    pub replayed: Amount,
    pub stored: Amount,
    pub unit: String,
}

impl Reconciliation {
    pub fn is_balanced(&self) -> bool {
        self.replayed == self.stored
    }
}

/// Entry point for every stock mutation.
///
/// Generic over the store so tests run against `InMemoryStockStore` and
/// deployments against `PostgresStockStore` (or an `Arc` of either).
#[derive(Debug)]
pub struct StockEngine<S> {
    store: S,
    config: EngineConfig,
    planner: AllocationPlanner,
}

impl<S> StockEngine<S> {
    pub fn new(store: S, config: EngineConfig) -> Self {
        Self {
            store,
            planner: AllocationPlanner::new(config.allocation_order),
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

impl<S> StockEngine<S>
where
    S: StockStore,
{
    /// Withdraw `amount` from the lots matching the selection.
    ///
    /// Either every planned deduction commits together with its ledger entry,
    /// or nothing is written.
    #[instrument(
        skip(self, command),
        fields(selection = %command.selection, amount = %command.amount, operator = %command.operator),
        err
    )]
    pub fn withdraw(&self, command: &WithdrawStock) -> EngineResult<WithdrawalOutcome> {
        if command.operator.trim().is_empty() {
            return Err(EngineError::InvalidRequest("operator cannot be empty".to_string()));
        }
        let requested = command.requested()?;

        let outcome = self.with_retry("withdraw", || {
            let lots = self.store.lots_for(&command.selection)?;
            let plan = self
                .planner
                .plan(&command.selection, requested, &lots)
                .inspect_err(|e| info!(reason = %e, "withdrawal rejected"))?;
            let (changeset, outcome) =
                executor::apply_plan(&plan, &lots, command, &self.config.exhaustion)?;
            self.store.commit(changeset)?;
            Ok(outcome)
        })?;

        info!(
            lots = outcome.deducted_lots.len(),
            deducted = %outcome.total_deducted,
            remaining = %outcome.total_remaining,
            unit = %outcome.unit,
            "withdrawal committed"
        );
        Ok(outcome)
    }

    /// Register one freshly received lot with its inbound ledger entry.
    #[instrument(
        skip(self, command),
        fields(product_code = %command.product_code, unique_code = %command.unique_code),
        err
    )]
    pub fn register_inbound(&self, command: &ReceiveLot) -> EngineResult<InboundReceipt> {
        let mut receipts = self.register(std::slice::from_ref(command))?;
        receipts.pop().ok_or_else(|| {
            EngineError::InvariantViolation("inbound commit produced no receipt".to_string())
        })
    }

    /// Register several lots atomically; one bad receipt rejects them all.
    #[instrument(skip(self, commands), fields(count = commands.len()), err)]
    pub fn register_inbound_batch(&self, commands: &[ReceiveLot]) -> EngineResult<Vec<InboundReceipt>> {
        self.register(commands)
    }

    fn register(&self, commands: &[ReceiveLot]) -> EngineResult<Vec<InboundReceipt>> {
        let receipts = self.with_retry("register_inbound", || {
            let (changeset, receipts) = registrar::prepare_batch(&self.store, commands)?;
            self.store.commit(changeset)?;
            Ok(receipts)
        })?;

        for receipt in &receipts {
            info!(lot_id = %receipt.lot_id, unique_code = %receipt.unique_code, "lot registered");
        }
        Ok(receipts)
    }

    /// Soft-delete a lot. The lot keeps its label and history.
    #[instrument(skip(self, command), fields(lot_id = %command.lot_id, operator = %command.operator), err)]
    pub fn archive_lot(&self, command: &ArchiveLot) -> EngineResult<InventoryLot> {
        if command.operator.trim().is_empty() {
            return Err(EngineError::InvalidRequest("operator cannot be empty".to_string()));
        }

        let archived = self.with_retry("archive_lot", || {
            let lot = self.require_lot(command.lot_id)?;
            let next = lot.archive(command.occurred_at)?;
            let entry = LedgerEntry::archive(
                &lot,
                &command.operator,
                command.reason.as_deref(),
                command.occurred_at,
            );
            self.store.commit(Changeset {
                writes: vec![LotWrite::update(next.clone(), lot.version)],
                entries: vec![entry],
            })?;
            Ok(next)
        })?;

        info!(unique_code = %archived.unique_code, "lot archived");
        Ok(archived)
    }

    /// Remaining amount implied by the lot's ledger history.
    pub fn reconcile(&self, lot_id: LotId) -> EngineResult<Amount> {
        Ok(self.audit_lot(lot_id)?.replayed)
    }

    /// Compare the ledger replay of a lot with its stored remaining.
    #[instrument(skip(self), err)]
    pub fn audit_lot(&self, lot_id: LotId) -> EngineResult<Reconciliation> {
        let lot = self.require_lot(lot_id)?;
        let entries = self.store.entries_for_lot(lot_id)?;
        let reconciliation = Reconciliation {
            lot_id,
            replayed: replay(&entries),
            stored: lot.remaining_amount(),
            unit: lot.unit().to_string(),
        };
        if !reconciliation.is_balanced() {
            warn!(
                unique_code = %lot.unique_code,
                replayed = %reconciliation.replayed,
                stored = %reconciliation.stored,
                "ledger does not reconcile"
            );
        }
        Ok(reconciliation)
    }

    pub fn lot(&self, lot_id: LotId) -> EngineResult<Option<InventoryLot>> {
        Ok(self.store.lot(lot_id)?)
    }

    fn require_lot(&self, lot_id: LotId) -> EngineResult<InventoryLot> {
        self.store
            .lot(lot_id)?
            .ok_or_else(|| EngineError::NotFound(format!("lot {lot_id}")))
    }

    /// Run a full read-decide-commit cycle, restarting it on transient store errors.
    fn with_retry<T>(
        &self,
        operation: &'static str,
        mut cycle: impl FnMut() -> EngineResult<T>,
    ) -> EngineResult<T> {
        let attempts = self.config.commit_attempts.max(1);
        let mut attempt = 1;
        loop {
            match cycle() {
                Err(EngineError::Store(err)) if err.is_transient() => {
                    if attempt >= attempts {
                        warn!(operation, attempt, error = %err, "giving up");
                        return Err(EngineError::TransactionAborted {
                            attempts: attempt,
                            last: err,
                        });
                    }
                    warn!(operation, attempt, error = %err, "transient store failure, retrying");
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

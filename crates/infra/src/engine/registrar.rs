//! Inbound registration: new labelled lots plus their inbound ledger entries.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use stockledger_core::{LedgerEntryId, LotId};
use stockledger_inventory::{InventoryLot, LedgerEntry, ReceiveLot};

use crate::error::{EngineError, EngineResult};
use crate::store::{Changeset, LotStore, LotWrite, MaterialCatalog};

/// Identity of a registered lot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundReceipt {
    pub lot_id: LotId,
    pub entry_id: LedgerEntryId,
    pub unique_code: String,
}

/// Validate one receipt against master data and the label pre-check.
///
/// The label check here is advisory; the commit re-checks it authoritatively.
pub(crate) fn prepare_lot<S>(store: &S, command: &ReceiveLot) -> EngineResult<(InventoryLot, LedgerEntry)>
where
    S: MaterialCatalog + LotStore + ?Sized,
{
    if command.operator.trim().is_empty() {
        return Err(EngineError::InvalidRequest("operator cannot be empty".to_string()));
    }

    let material = store
        .material(&command.product_code)?
        .ok_or_else(|| EngineError::MaterialNotFound(command.product_code.clone()))?;
    if material.category != command.category {
        return Err(EngineError::InvalidRequest(format!(
            "material {} is {}, not {}",
            material.product_code, material.category, command.category
        )));
    }
    if command.quantity.category() != command.category {
        return Err(EngineError::InvalidRequest(format!(
            "{} lot cannot carry a {} quantity",
            command.category,
            command.quantity.category()
        )));
    }

    if store.label_exists(&command.unique_code)? {
        return Err(EngineError::duplicate_label(command.unique_code.as_str()));
    }

    let lot = InventoryLot::receive(
        LotId::new(),
        command.unique_code.clone(),
        command.product_code.clone(),
        command.batch_number.clone(),
        command.quantity.clone(),
        command.attributes.clone(),
        command.occurred_at,
    )?;
    let entry = LedgerEntry::inbound(
        &lot,
        &command.operator,
        command.note.as_deref(),
        command.occurred_at,
    );
    Ok((lot, entry))
}

/// Prepare every receipt of a batch; any rejection rejects the batch.
pub(crate) fn prepare_batch<S>(
    store: &S,
    commands: &[ReceiveLot],
) -> EngineResult<(Changeset, Vec<InboundReceipt>)>
where
    S: MaterialCatalog + LotStore + ?Sized,
{
    if commands.is_empty() {
        return Err(EngineError::InvalidRequest("empty inbound batch".to_string()));
    }

    let mut seen = HashSet::new();
    for command in commands {
        if !seen.insert(command.unique_code.as_str()) {
            return Err(EngineError::duplicate_label(command.unique_code.as_str()));
        }
    }

    let mut changeset = Changeset::default();
    let mut receipts = Vec::with_capacity(commands.len());
    for command in commands {
        let (lot, entry) = prepare_lot(store, command)?;
        receipts.push(InboundReceipt {
            lot_id: lot.lot_id,
            entry_id: entry.entry_id,
            unique_code: lot.unique_code.clone(),
        });
        changeset.writes.push(LotWrite::insert(lot));
        changeset.entries.push(entry);
    }
    Ok((changeset, receipts))
}

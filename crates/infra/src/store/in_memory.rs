use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use stockledger_core::{ExpectedVersion, LedgerEntryId, LotId};
use stockledger_inventory::{InventoryLot, LedgerEntry, Material, Selection};

use super::query::{LedgerFilter, LedgerPage, LedgerQuery, Pagination};
use super::r#trait::{Changeset, LedgerStore, LotStore, MaterialCatalog, StockStore, StoreError};

#[derive(Debug, Default)]
struct State {
    materials: HashMap<String, Material>,
    lots: HashMap<LotId, InventoryLot>,
    /// Every label ever inserted; lots are never removed, so neither are labels.
    labels: HashMap<String, LotId>,
    ledger: Vec<LedgerEntry>,
    entry_ids: HashSet<LedgerEntryId>,
}

/// In-memory lot + ledger store.
///
/// Intended for tests/dev. A single `RwLock` serializes commits, and every
/// commit validates the full changeset before applying any of it.
#[derive(Debug, Default)]
pub struct InMemoryStockStore {
    state: RwLock<State>,
}

fn poisoned() -> StoreError {
    StoreError::Unavailable("lock poisoned".to_string())
}

impl InMemoryStockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed master data (normally owned by the material governance process).
    pub fn upsert_material(&self, material: Material) -> Result<(), StoreError> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        state
            .materials
            .insert(material.product_code.clone(), material);
        Ok(())
    }

    pub fn with_materials(materials: impl IntoIterator<Item = Material>) -> Self {
        let state = State {
            materials: materials
                .into_iter()
                .map(|m| (m.product_code.clone(), m))
                .collect(),
            ..State::default()
        };
        Self {
            state: RwLock::new(state),
        }
    }

    /// Total number of ledger entries across all lots.
    pub fn ledger_len(&self) -> Result<usize, StoreError> {
        Ok(self.state.read().map_err(|_| poisoned())?.ledger.len())
    }

    fn validate(state: &State, changeset: &Changeset) -> Result<(), StoreError> {
        let mut written = HashSet::new();
        let mut new_labels = HashSet::new();

        for write in &changeset.writes {
            let lot = &write.lot;
            if !written.insert(lot.lot_id) {
                return Err(StoreError::InvalidWrite(format!(
                    "lot {} written twice in one changeset",
                    lot.lot_id
                )));
            }

            let current = state.lots.get(&lot.lot_id);
            write
                .expected
                .check(current.map(|l| l.version))
                .map_err(|e| StoreError::Conflict(format!("lot {}: {e}", lot.unique_code)))?;

            match (write.expected, current) {
                (ExpectedVersion::Absent, _) => {
                    if state.labels.contains_key(&lot.unique_code)
                        || !new_labels.insert(lot.unique_code.as_str())
                    {
                        return Err(StoreError::DuplicateLabel(lot.unique_code.clone()));
                    }
                }
                (ExpectedVersion::Exact(read), Some(current)) => {
                    if lot.version != read + 1 {
                        return Err(StoreError::InvalidWrite(format!(
                            "lot {} must advance from version {read} to {}",
                            lot.unique_code,
                            read + 1
                        )));
                    }
                    if lot.unique_code != current.unique_code {
                        return Err(StoreError::InvalidWrite(format!(
                            "label of lot {} is immutable",
                            lot.lot_id
                        )));
                    }
                }
                (ExpectedVersion::Exact(_), None) => {}
            }

            if lot.remaining_amount().is_negative() {
                return Err(StoreError::InvalidWrite(format!(
                    "lot {} would go negative",
                    lot.unique_code
                )));
            }
        }

        let mut new_entries = HashSet::new();
        for entry in &changeset.entries {
            if state.entry_ids.contains(&entry.entry_id) || !new_entries.insert(entry.entry_id) {
                return Err(StoreError::InvalidWrite(format!(
                    "ledger entry {} already appended",
                    entry.entry_id
                )));
            }
            if !state.lots.contains_key(&entry.lot_id) && !written.contains(&entry.lot_id) {
                return Err(StoreError::InvalidWrite(format!(
                    "ledger entry {} references unknown lot {}",
                    entry.entry_id, entry.lot_id
                )));
            }
        }

        Ok(())
    }
}

impl MaterialCatalog for InMemoryStockStore {
    fn material(&self, product_code: &str) -> Result<Option<Material>, StoreError> {
        let state = self.state.read().map_err(|_| poisoned())?;
        Ok(state.materials.get(product_code).cloned())
    }
}

impl LotStore for InMemoryStockStore {
    fn lot(&self, lot_id: LotId) -> Result<Option<InventoryLot>, StoreError> {
        let state = self.state.read().map_err(|_| poisoned())?;
        Ok(state.lots.get(&lot_id).cloned())
    }

    fn lots_for(&self, selection: &Selection) -> Result<Vec<InventoryLot>, StoreError> {
        let state = self.state.read().map_err(|_| poisoned())?;
        let lots = match selection {
            Selection::Label { unique_code } => state
                .labels
                .get(unique_code)
                .and_then(|id| state.lots.get(id))
                .cloned()
                .into_iter()
                .collect(),
            Selection::Batch { .. } => state
                .lots
                .values()
                .filter(|lot| selection.matches(lot))
                .cloned()
                .collect(),
        };
        Ok(lots)
    }

    fn label_exists(&self, unique_code: &str) -> Result<bool, StoreError> {
        let state = self.state.read().map_err(|_| poisoned())?;
        Ok(state.labels.contains_key(unique_code))
    }
}

impl LedgerStore for InMemoryStockStore {
    fn entries_for_lot(&self, lot_id: LotId) -> Result<Vec<LedgerEntry>, StoreError> {
        let state = self.state.read().map_err(|_| poisoned())?;
        Ok(state
            .ledger
            .iter()
            .filter(|e| e.lot_id == lot_id)
            .cloned()
            .collect())
    }
}

impl StockStore for InMemoryStockStore {
    fn commit(&self, changeset: Changeset) -> Result<(), StoreError> {
        if changeset.is_empty() {
            return Ok(());
        }

        let mut state = self.state.write().map_err(|_| poisoned())?;
        Self::validate(&state, &changeset)?;

        // Validated as a whole; from here on nothing can fail.
        for write in changeset.writes {
            let lot = write.lot;
            if write.expected == ExpectedVersion::Absent {
                state.labels.insert(lot.unique_code.clone(), lot.lot_id);
            }
            state.lots.insert(lot.lot_id, lot);
        }
        for entry in changeset.entries {
            state.entry_ids.insert(entry.entry_id);
            state.ledger.push(entry);
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl LedgerQuery for InMemoryStockStore {
    async fn query_entries(
        &self,
        filter: LedgerFilter,
        pagination: Pagination,
    ) -> Result<LedgerPage, StoreError> {
        let state = self.state.read().map_err(|_| poisoned())?;
        let mut matching: Vec<&LedgerEntry> =
            state.ledger.iter().filter(|e| filter.matches(e)).collect();
        // Newest first; stable sort keeps append order for equal timestamps.
        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        let total = matching.len() as u64;
        let entries: Vec<LedgerEntry> = matching
            .into_iter()
            .skip(pagination.offset as usize)
            .take(pagination.limit as usize)
            .cloned()
            .collect();
        let has_more = total > pagination.offset as u64 + pagination.limit as u64;

        Ok(LedgerPage {
            entries,
            total,
            pagination,
            has_more,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use stockledger_inventory::{
        Amount, Category, ExhaustionPolicy, LotAttributes, MovementKind, Quantity,
    };

    use crate::store::LotWrite;

    fn store() -> InMemoryStockStore {
        InMemoryStockStore::with_materials([Material::new(
            "CHEM-1",
            "Acetic acid",
            Category::Chemical,
            "kg",
        )
        .unwrap()])
    }

    fn lot(code: &str, units: i64) -> InventoryLot {
        InventoryLot::receive(
            LotId::new(),
            code,
            "CHEM-1",
            Some("B1".to_string()),
            Quantity::scalar(Amount::from_units(units), "kg"),
            LotAttributes::default(),
            Utc::now(),
        )
        .unwrap()
    }

    fn insert(store: &InMemoryStockStore, lot: &InventoryLot) {
        store
            .commit(Changeset {
                writes: vec![LotWrite::insert(lot.clone())],
                entries: vec![LedgerEntry::inbound(lot, "ops", None, lot.created_at)],
            })
            .unwrap();
    }

    #[test]
    fn stale_version_rejects_whole_changeset() {
        let store = store();
        let a = lot("A", 10);
        let b = lot("B", 10);
        insert(&store, &a);
        insert(&store, &b);

        let policy = ExhaustionPolicy::default();
        let a_next = a.deduct(Amount::from_units(1), &policy, Utc::now()).unwrap();
        let b_next = b.deduct(Amount::from_units(1), &policy, Utc::now()).unwrap();

        // Someone else moves B first.
        store
            .commit(Changeset {
                writes: vec![LotWrite::update(b_next.clone(), b.version)],
                entries: vec![],
            })
            .unwrap();

        let err = store
            .commit(Changeset {
                writes: vec![
                    LotWrite::update(a_next, a.version),
                    LotWrite::update(b_next, b.version),
                ],
                entries: vec![LedgerEntry::outbound(&a, Amount::from_units(1), "ops", None, Utc::now())],
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        assert_eq!(store.lot(a.lot_id).unwrap().unwrap(), a);
        assert_eq!(store.entries_for_lot(a.lot_id).unwrap().len(), 1);
    }

    #[test]
    fn label_constraint_covers_existing_and_same_batch_inserts() {
        let store = store();
        let first = lot("T1", 1);
        insert(&store, &first);

        let err = store
            .commit(Changeset {
                writes: vec![LotWrite::insert(lot("T1", 2))],
                entries: vec![],
            })
            .unwrap_err();
        assert_eq!(err, StoreError::DuplicateLabel("T1".to_string()));

        let err = store
            .commit(Changeset {
                writes: vec![LotWrite::insert(lot("T2", 1)), LotWrite::insert(lot("T2", 1))],
                entries: vec![],
            })
            .unwrap_err();
        assert_eq!(err, StoreError::DuplicateLabel("T2".to_string()));
        assert!(!store.label_exists("T2").unwrap());
    }

    #[test]
    fn entries_must_reference_known_lots() {
        let store = store();
        let ghost = lot("G1", 1);
        let err = store
            .commit(Changeset {
                writes: vec![],
                entries: vec![LedgerEntry::inbound(&ghost, "ops", None, Utc::now())],
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidWrite(_)));
        assert_eq!(store.ledger_len().unwrap(), 0);
    }

    #[tokio::test]
    async fn query_returns_newest_first_with_pagination() {
        let store = store();
        let base = Utc::now();
        let mut lots = Vec::new();
        for i in 0..5 {
            let mut l = lot(&format!("Q{i}"), 1);
            l.created_at = base + Duration::minutes(i);
            l.updated_at = l.created_at;
            insert(&store, &l);
            lots.push(l);
        }

        let page = store
            .query_entries(
                LedgerFilter {
                    kind: Some(MovementKind::Inbound),
                    ..Default::default()
                },
                Pagination::new(Some(2), Some(1)),
            )
            .await
            .unwrap();
        assert_eq!(page.total, 5);
        assert!(page.has_more);
        let codes: Vec<_> = page.entries.iter().map(|e| e.unique_code.as_str()).collect();
        assert_eq!(codes, vec!["Q3", "Q2"]);

        let history = store.lot_history(lots[0].lot_id, None).await.unwrap();
        assert_eq!(history.total, 1);
        assert!(!history.has_more);
    }
}

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use stockledger_core::{ExpectedVersion, LotId};
use stockledger_inventory::{InventoryLot, LedgerEntry, Material, Selection};

/// Store operation error.
///
/// These are **infrastructure errors** (storage, concurrency, constraints) as
/// opposed to domain errors (validation, invariants).
///
/// - **Conflict**: a lot version moved between read and commit
/// - **DuplicateLabel**: the `unique_code` constraint rejected an insert
/// - **Unavailable**: the backend could not be reached or the transaction failed
/// - **InvalidWrite**: the changeset itself is malformed
/// - **Corrupt**: a stored record could not be decoded
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("concurrent modification: {0}")]
    Conflict(String),

    #[error("label already registered: {0}")]
    DuplicateLabel(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("invalid write: {0}")]
    InvalidWrite(String),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Whether re-reading fresh state and trying again may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Conflict(_) | StoreError::Unavailable(_))
    }
}

/// One lot mutation inside a [`Changeset`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotWrite {
    /// Full new state of the lot.
    pub lot: InventoryLot,
    /// Version the writer read; `Absent` for inserts.
    pub expected: ExpectedVersion,
}

impl LotWrite {
    pub fn insert(lot: InventoryLot) -> Self {
        Self {
            lot,
            expected: ExpectedVersion::Absent,
        }
    }

    pub fn update(lot: InventoryLot, read_version: u64) -> Self {
        Self {
            lot,
            expected: ExpectedVersion::Exact(read_version),
        }
    }
}

/// Everything one engine operation writes, committed atomically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Changeset {
    pub writes: Vec<LotWrite>,
    pub entries: Vec<LedgerEntry>,
}

impl Changeset {
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty() && self.entries.is_empty()
    }
}

/// Read-only access to material master data.
pub trait MaterialCatalog: Send + Sync {
    fn material(&self, product_code: &str) -> Result<Option<Material>, StoreError>;
}

/// Durable storage of inventory lots.
pub trait LotStore: Send + Sync {
    fn lot(&self, lot_id: LotId) -> Result<Option<InventoryLot>, StoreError>;

    /// Every lot matching `selection`, whatever its status.
    fn lots_for(&self, selection: &Selection) -> Result<Vec<InventoryLot>, StoreError>;

    /// Whether any lot, in any status, ever carried `unique_code`.
    fn label_exists(&self, unique_code: &str) -> Result<bool, StoreError>;
}

/// Append-only movement records.
pub trait LedgerStore: Send + Sync {
    /// Entries of one lot in append order.
    fn entries_for_lot(&self, lot_id: LotId) -> Result<Vec<LedgerEntry>, StoreError>;
}

/// Transactional boundary over lots and ledger.
///
/// ## Commit semantics
///
/// `commit()` must, atomically:
/// - re-read the current version of every written lot and reject the whole
///   changeset with `Conflict` if any differs from `LotWrite::expected`
/// - reject inserts whose `unique_code` already exists (on any lot, in any
///   status) or repeats within the changeset, with `DuplicateLabel`
/// - persist all lot states and append all ledger entries, or nothing
pub trait StockStore: MaterialCatalog + LotStore + LedgerStore {
    fn commit(&self, changeset: Changeset) -> Result<(), StoreError>;
}

impl<S> MaterialCatalog for Arc<S>
where
    S: MaterialCatalog + ?Sized,
{
    fn material(&self, product_code: &str) -> Result<Option<Material>, StoreError> {
        (**self).material(product_code)
    }
}

impl<S> LotStore for Arc<S>
where
    S: LotStore + ?Sized,
{
    fn lot(&self, lot_id: LotId) -> Result<Option<InventoryLot>, StoreError> {
        (**self).lot(lot_id)
    }

    fn lots_for(&self, selection: &Selection) -> Result<Vec<InventoryLot>, StoreError> {
        (**self).lots_for(selection)
    }

    fn label_exists(&self, unique_code: &str) -> Result<bool, StoreError> {
        (**self).label_exists(unique_code)
    }
}

impl<S> LedgerStore for Arc<S>
where
    S: LedgerStore + ?Sized,
{
    fn entries_for_lot(&self, lot_id: LotId) -> Result<Vec<LedgerEntry>, StoreError> {
        (**self).entries_for_lot(lot_id)
    }
}

impl<S> StockStore for Arc<S>
where
    S: StockStore + ?Sized,
{
    fn commit(&self, changeset: Changeset) -> Result<(), StoreError> {
        (**self).commit(changeset)
    }
}

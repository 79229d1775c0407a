//! End-to-end withdrawal, inbound and archive scenarios against the in-memory store.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use rust_decimal_macros::dec;

use stockledger_core::LotId;
use stockledger_infra::{
    Changeset, EngineConfig, EngineError, InMemoryStockStore, LedgerFilter, LedgerQuery,
    LedgerStore, LotStore, MaterialCatalog, Pagination, StockEngine, StockStore, StoreError,
};
use stockledger_inventory::{
    AllocationOrder, Amount, ArchiveLot, Category, Decimal, ExhaustionPolicy, InventoryLot,
    LedgerEntry, LotAttributes, LotStatus, Material, MovementKind, Quantity, ReceiveLot, Selection,
    WithdrawStock,
};

type Engine = StockEngine<Arc<InMemoryStockStore>>;

fn t(minutes: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap() + Duration::minutes(minutes)
}

fn seeded_store() -> Arc<InMemoryStockStore> {
    Arc::new(InMemoryStockStore::with_materials([
        Material::new("CHEM-1", "Acetone", Category::Chemical, "kg").unwrap(),
        Material::new("FILM-1", "PET film 50um", Category::Film, "m").unwrap(),
    ]))
}

fn engine_with(config: EngineConfig) -> Engine {
    StockEngine::new(seeded_store(), config)
}

fn engine() -> Engine {
    engine_with(EngineConfig::default())
}

fn amount(s: &str) -> Amount {
    s.parse().unwrap()
}

fn chemical(code: &str, batch: &str, kg: &str, at: DateTime<Utc>) -> ReceiveLot {
    ReceiveLot {
        product_code: "CHEM-1".to_string(),
        unique_code: code.to_string(),
        batch_number: Some(batch.to_string()),
        category: Category::Chemical,
        quantity: Quantity::scalar(amount(kg), "kg"),
        attributes: LotAttributes {
            weight_kg: Some(amount(kg)),
            ..LotAttributes::default()
        },
        operator: "receiving".to_string(),
        note: None,
        occurred_at: at,
    }
}

fn film(code: &str, batch: &str, meters: &str, at: DateTime<Utc>) -> ReceiveLot {
    ReceiveLot {
        product_code: "FILM-1".to_string(),
        unique_code: code.to_string(),
        batch_number: Some(batch.to_string()),
        category: Category::Film,
        quantity: Quantity::length(amount(meters)),
        attributes: LotAttributes {
            width_mm: Some(1200),
            ..LotAttributes::default()
        },
        operator: "receiving".to_string(),
        note: None,
        occurred_at: at,
    }
}

fn withdrawal(selection: Selection, amt: Decimal) -> WithdrawStock {
    WithdrawStock {
        selection,
        amount: amt,
        note: None,
        operator: "lab-1".to_string(),
        occurred_at: t(600),
    }
}

fn stored(engine: &Engine, lot_id: LotId) -> InventoryLot {
    engine.lot(lot_id).unwrap().unwrap()
}

#[test]
fn single_lot_partial_withdrawal_then_shortfall() {
    stockledger_observability::init();
    let engine = engine();
    let receipt = engine.register_inbound(&chemical("T1", "B1", "100", t(0))).unwrap();

    let outcome = engine
        .withdraw(&withdrawal(Selection::label("T1"), dec!(30)))
        .unwrap();
    assert_eq!(outcome.total_deducted, Amount::from_units(30));
    assert_eq!(outcome.total_remaining, Amount::from_units(70));
    assert_eq!(outcome.unit, "kg");
    assert_eq!(outcome.deducted_lots.len(), 1);
    assert!(!outcome.deducted_lots[0].exhausted);

    let before = stored(&engine, receipt.lot_id);
    let ledger_before = engine.store().ledger_len().unwrap();

    let err = engine
        .withdraw(&withdrawal(Selection::label("T1"), dec!(80)))
        .unwrap_err();
    assert_eq!(
        err,
        EngineError::InsufficientStock {
            requested: Amount::from_units(80),
            available: Amount::from_units(70),
            unit: "kg".to_string(),
        }
    );

    assert_eq!(stored(&engine, receipt.lot_id), before);
    assert_eq!(engine.store().ledger_len().unwrap(), ledger_before);
    assert_eq!(before.attributes.weight_kg, Some(Amount::from_units(70)));
}

#[test]
fn batch_withdrawal_spans_lots_oldest_first() {
    let engine = engine();
    let x = engine.register_inbound(&film("FILM-X", "B100", "10", t(1))).unwrap();
    let y = engine.register_inbound(&film("FILM-Y", "B100", "20", t(2))).unwrap();

    let outcome = engine
        .withdraw(&withdrawal(Selection::batch("FILM-1", "B100"), dec!(15)))
        .unwrap();

    let taken: Vec<_> = outcome
        .deducted_lots
        .iter()
        .map(|d| (d.unique_code.as_str(), d.amount, d.remaining, d.exhausted))
        .collect();
    assert_eq!(
        taken,
        vec![
            ("FILM-X", Amount::from_units(10), Amount::ZERO, true),
            ("FILM-Y", Amount::from_units(5), Amount::from_units(15), false),
        ]
    );
    assert_eq!(outcome.total_remaining, Amount::from_units(15));
    assert_eq!(outcome.selection_remaining, Amount::from_units(15));
    assert_eq!(outcome.unit, "m");

    assert_eq!(stored(&engine, x.lot_id).status, LotStatus::Used);
    assert_eq!(stored(&engine, y.lot_id).status, LotStatus::InStock);
}

#[test]
fn batch_shortfall_writes_nothing() {
    let engine = engine();
    let a = engine.register_inbound(&chemical("A1", "B7", "5", t(0))).unwrap();
    let b = engine.register_inbound(&chemical("A2", "B7", "5", t(1))).unwrap();
    let ledger_before = engine.store().ledger_len().unwrap();

    let err = engine
        .withdraw(&withdrawal(Selection::batch("CHEM-1", "B7"), dec!(12)))
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::InsufficientStock { available, .. } if available == Amount::from_units(10)
    ));

    assert_eq!(stored(&engine, a.lot_id).remaining_amount(), Amount::from_units(5));
    assert_eq!(stored(&engine, b.lot_id).remaining_amount(), Amount::from_units(5));
    assert_eq!(engine.store().ledger_len().unwrap(), ledger_before);
}

#[test]
fn ledger_replay_matches_stored_remaining() {
    let engine = engine();
    let a = engine.register_inbound(&chemical("C1", "B9", "12.5", t(0))).unwrap();
    let b = engine.register_inbound(&chemical("C2", "B9", "7.25", t(1))).unwrap();

    for amt in [dec!(3.333), dec!(4), dec!(0.917), dec!(6)] {
        engine
            .withdraw(&withdrawal(Selection::batch("CHEM-1", "B9"), amt))
            .unwrap();
    }
    engine
        .archive_lot(&ArchiveLot {
            lot_id: b.lot_id,
            operator: "admin".to_string(),
            reason: Some("spilled".to_string()),
            occurred_at: t(900),
        })
        .unwrap();

    for id in [a.lot_id, b.lot_id] {
        let audit = engine.audit_lot(id).unwrap();
        assert!(audit.is_balanced(), "{audit:?}");
        assert_eq!(engine.reconcile(id).unwrap(), stored(&engine, id).remaining_amount());
    }
    assert_eq!(stored(&engine, a.lot_id).remaining_amount(), Amount::ZERO);
    assert_eq!(stored(&engine, b.lot_id).remaining_amount(), amount("5.5"));
}

#[test]
fn full_withdrawal_marks_lot_used() {
    let engine = engine();
    let receipt = engine.register_inbound(&chemical("F1", "B1", "2", t(0))).unwrap();

    let outcome = engine
        .withdraw(&withdrawal(Selection::label("F1"), dec!(2)))
        .unwrap();
    assert!(outcome.deducted_lots[0].exhausted);
    assert_eq!(stored(&engine, receipt.lot_id).status, LotStatus::Used);

    let err = engine
        .withdraw(&withdrawal(Selection::label("F1"), dec!(0.001)))
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::InsufficientStock { available, .. } if available == Amount::ZERO
    ));
}

#[test]
fn sub_thousandth_withdrawal_exhausts_tiny_lot() {
    let engine = engine();
    let mut receive = chemical("TINY", "B1", "1", t(0));
    receive.quantity = Quantity::scalar(Amount::from_decimal(dec!(0.0008)).unwrap(), "kg");
    receive.attributes = LotAttributes::default();
    let receipt = engine.register_inbound(&receive).unwrap();

    let outcome = engine
        .withdraw(&withdrawal(Selection::label("TINY"), dec!(0.0005)))
        .unwrap();

    assert_eq!(outcome.total_remaining, Amount::ZERO);
    assert_eq!(stored(&engine, receipt.lot_id).status, LotStatus::Used);
}

#[test]
fn configured_film_threshold_retires_offcuts() {
    let engine = engine_with(EngineConfig::default().with_exhaustion(ExhaustionPolicy {
        film: amount("0.1"),
        ..ExhaustionPolicy::default()
    }));
    let receipt = engine.register_inbound(&film("ROLL-1", "B2", "10", t(0))).unwrap();

    let outcome = engine
        .withdraw(&withdrawal(Selection::label("ROLL-1"), dec!(9.95)))
        .unwrap();

    assert!(outcome.deducted_lots[0].exhausted);
    let lot = stored(&engine, receipt.lot_id);
    assert_eq!(lot.status, LotStatus::Used);
    assert_eq!(lot.remaining_amount(), amount("0.05"));
    assert!(engine.audit_lot(receipt.lot_id).unwrap().is_balanced());
}

#[test]
fn ten_tenths_leave_exactly_zero() {
    let engine = engine();
    let receipt = engine.register_inbound(&chemical("P1", "B1", "1.0", t(0))).unwrap();

    for i in 0..10 {
        let outcome = engine
            .withdraw(&withdrawal(Selection::label("P1"), dec!(0.1)))
            .unwrap();
        assert_eq!(outcome.deducted_lots[0].exhausted, i == 9);
    }

    let lot = stored(&engine, receipt.lot_id);
    assert_eq!(lot.remaining_amount(), Amount::ZERO);
    assert_eq!(lot.status, LotStatus::Used);
    assert_eq!(engine.reconcile(receipt.lot_id).unwrap(), Amount::ZERO);
}

#[test]
fn labels_are_never_reused() {
    let engine = engine();
    engine.register_inbound(&chemical("U1", "B1", "1", t(0))).unwrap();
    engine
        .withdraw(&withdrawal(Selection::label("U1"), dec!(1)))
        .unwrap();
    assert_eq!(
        engine.register_inbound(&chemical("U1", "B2", "5", t(10))).unwrap_err(),
        EngineError::duplicate_label("U1")
    );

    let archived = engine.register_inbound(&film("U2", "B1", "3", t(1))).unwrap();
    engine
        .archive_lot(&ArchiveLot {
            lot_id: archived.lot_id,
            operator: "admin".to_string(),
            reason: None,
            occurred_at: t(20),
        })
        .unwrap();
    assert_eq!(
        engine.register_inbound(&film("U2", "B3", "3", t(30))).unwrap_err(),
        EngineError::duplicate_label("U2")
    );
}

/// Hides labels from the advisory pre-check so only the commit can catch reuse.
struct BlindLabels(Arc<InMemoryStockStore>);

impl MaterialCatalog for BlindLabels {
    fn material(&self, product_code: &str) -> Result<Option<Material>, StoreError> {
        self.0.material(product_code)
    }
}

impl LotStore for BlindLabels {
    fn lot(&self, lot_id: LotId) -> Result<Option<InventoryLot>, StoreError> {
        self.0.lot(lot_id)
    }

    fn lots_for(&self, selection: &Selection) -> Result<Vec<InventoryLot>, StoreError> {
        self.0.lots_for(selection)
    }

    fn label_exists(&self, _unique_code: &str) -> Result<bool, StoreError> {
        Ok(false)
    }
}

impl LedgerStore for BlindLabels {
    fn entries_for_lot(&self, lot_id: LotId) -> Result<Vec<LedgerEntry>, StoreError> {
        self.0.entries_for_lot(lot_id)
    }
}

impl StockStore for BlindLabels {
    fn commit(&self, changeset: Changeset) -> Result<(), StoreError> {
        self.0.commit(changeset)
    }
}

#[test]
fn duplicate_label_caught_at_commit_is_typed() {
    let store = seeded_store();
    StockEngine::new(store.clone(), EngineConfig::default())
        .register_inbound(&chemical("RACE-1", "B1", "1", t(0)))
        .unwrap();

    let blind = StockEngine::new(BlindLabels(store.clone()), EngineConfig::default());
    let err = blind
        .register_inbound(&chemical("RACE-1", "B1", "1", t(1)))
        .unwrap_err();
    assert_eq!(
        err,
        EngineError::DuplicateLabel {
            unique_code: "RACE-1".to_string(),
            at_commit: true,
        }
    );
    assert!(err.is_transient());

    // Resubmitting goes through the pre-check and fails for good.
    let err = StockEngine::new(store.clone(), EngineConfig::default())
        .register_inbound(&chemical("RACE-1", "B1", "1", t(2)))
        .unwrap_err();
    assert_eq!(err, EngineError::duplicate_label("RACE-1"));
    assert!(!err.is_transient());
    assert_eq!(store.ledger_len().unwrap(), 1);
}

#[test]
fn unknown_selection_is_not_found() {
    let engine = engine();
    assert!(matches!(
        engine
            .withdraw(&withdrawal(Selection::label("NOPE"), dec!(1)))
            .unwrap_err(),
        EngineError::NotFound(_)
    ));

    let only = engine.register_inbound(&chemical("D1", "B5", "4", t(0))).unwrap();
    engine
        .archive_lot(&ArchiveLot {
            lot_id: only.lot_id,
            operator: "admin".to_string(),
            reason: None,
            occurred_at: t(5),
        })
        .unwrap();
    assert!(matches!(
        engine
            .withdraw(&withdrawal(Selection::batch("CHEM-1", "B5"), dec!(1)))
            .unwrap_err(),
        EngineError::NotFound(_)
    ));
}

#[test]
fn shortfall_of_one_thousandth_is_tolerated() {
    let engine = engine();
    let receipt = engine.register_inbound(&chemical("EP-1", "B1", "5", t(0))).unwrap();

    let outcome = engine
        .withdraw(&withdrawal(Selection::label("EP-1"), dec!(5.001)))
        .unwrap();
    assert_eq!(outcome.total_deducted, Amount::from_units(5));
    assert_eq!(outcome.deducted_lots.len(), 1);
    assert_eq!(stored(&engine, receipt.lot_id).status, LotStatus::Used);
    assert_eq!(engine.reconcile(receipt.lot_id).unwrap(), Amount::ZERO);

    engine.register_inbound(&chemical("EP-2", "B1", "5", t(1))).unwrap();
    let err = engine
        .withdraw(&withdrawal(Selection::label("EP-2"), dec!(5.002)))
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::InsufficientStock { available, .. } if available == Amount::from_units(5)
    ));
}

#[test]
fn oversized_quantities_are_invalid_requests() {
    let engine = engine();
    let mut huge = chemical("BIG-1", "B1", "1", t(0));
    huge.quantity = Quantity::scalar(Amount::from_milli(9_000_000_000_000_000_000), "kg");
    assert!(matches!(
        engine.register_inbound(&huge).unwrap_err(),
        EngineError::InvalidRequest(_)
    ));

    engine.register_inbound(&chemical("BIG-2", "B1", "1", t(0))).unwrap();
    assert!(matches!(
        engine
            .withdraw(&withdrawal(Selection::label("BIG-2"), dec!(9000000000000000)))
            .unwrap_err(),
        EngineError::InvalidRequest(_)
    ));
    assert_eq!(engine.store().ledger_len().unwrap(), 1);
}

#[test]
fn malformed_withdrawals_are_invalid() {
    let engine = engine();
    engine.register_inbound(&chemical("V1", "B1", "4", t(0))).unwrap();

    for amt in [Decimal::ZERO, dec!(0.0004), dec!(-1)] {
        assert!(matches!(
            engine.withdraw(&withdrawal(Selection::label("V1"), amt)).unwrap_err(),
            EngineError::InvalidRequest(_)
        ));
    }

    let mut anonymous = withdrawal(Selection::label("V1"), dec!(1));
    anonymous.operator = " ".to_string();
    assert!(matches!(
        engine.withdraw(&anonymous).unwrap_err(),
        EngineError::InvalidRequest(_)
    ));

    let mut grams = chemical("V2", "B1", "500", t(1));
    grams.quantity = Quantity::scalar(Amount::from_units(500), "g");
    engine.register_inbound(&grams).unwrap();
    assert!(matches!(
        engine
            .withdraw(&withdrawal(Selection::batch("CHEM-1", "B1"), dec!(1)))
            .unwrap_err(),
        EngineError::InvalidRequest(_)
    ));
}

#[test]
fn inbound_rejects_unknown_or_mismatched_material() {
    let engine = engine();

    let mut unknown = chemical("M1", "B1", "1", t(0));
    unknown.product_code = "CHEM-404".to_string();
    assert_eq!(
        engine.register_inbound(&unknown).unwrap_err(),
        EngineError::MaterialNotFound("CHEM-404".to_string())
    );

    let mut wrong_kind = film("M2", "B1", "1", t(0));
    wrong_kind.product_code = "CHEM-1".to_string();
    assert!(matches!(
        engine.register_inbound(&wrong_kind).unwrap_err(),
        EngineError::InvalidRequest(_)
    ));

    let mut mismatched = film("M3", "B1", "1", t(0));
    mismatched.quantity = Quantity::scalar(Amount::from_units(1), "kg");
    assert!(matches!(
        engine.register_inbound(&mismatched).unwrap_err(),
        EngineError::InvalidRequest(_)
    ));

    let empty = chemical("M4", "B1", "0", t(0));
    assert!(matches!(
        engine.register_inbound(&empty).unwrap_err(),
        EngineError::InvalidRequest(_)
    ));
    assert_eq!(engine.store().ledger_len().unwrap(), 0);
}

#[test]
fn inbound_batch_is_all_or_nothing() {
    let engine = engine();
    engine.register_inbound(&chemical("EX-1", "B1", "1", t(0))).unwrap();

    let mut unknown = film("NB-2", "B1", "1", t(1));
    unknown.product_code = "FILM-404".to_string();
    let err = engine
        .register_inbound_batch(&[chemical("NB-1", "B1", "1", t(1)), unknown])
        .unwrap_err();
    assert_eq!(err, EngineError::MaterialNotFound("FILM-404".to_string()));
    assert!(!engine.store().label_exists("NB-1").unwrap());

    let err = engine
        .register_inbound_batch(&[chemical("NB-3", "B1", "1", t(1)), chemical("NB-3", "B1", "2", t(1))])
        .unwrap_err();
    assert_eq!(err, EngineError::duplicate_label("NB-3"));

    let err = engine
        .register_inbound_batch(&[chemical("NB-4", "B1", "1", t(1)), chemical("EX-1", "B1", "2", t(1))])
        .unwrap_err();
    assert_eq!(err, EngineError::duplicate_label("EX-1"));
    assert_eq!(engine.store().ledger_len().unwrap(), 1);

    let receipts = engine
        .register_inbound_batch(&[chemical("NB-5", "B2", "1", t(2)), film("NB-6", "B2", "8", t(2))])
        .unwrap();
    assert_eq!(receipts.len(), 2);
    assert_eq!(engine.store().ledger_len().unwrap(), 3);
    assert!(receipts.iter().all(|r| engine.lot(r.lot_id).unwrap().is_some()));
}

#[test]
fn archive_is_a_zero_change_ledger_entry() {
    let engine = engine();
    let receipt = engine.register_inbound(&film("AR-1", "B1", "25", t(0))).unwrap();
    let command = ArchiveLot {
        lot_id: receipt.lot_id,
        operator: "admin".to_string(),
        reason: Some("damaged core".to_string()),
        occurred_at: t(10),
    };

    let archived = engine.archive_lot(&command).unwrap();
    assert_eq!(archived.status, LotStatus::Deleted);
    assert_eq!(archived.remaining_amount(), Amount::from_units(25));

    let entries = engine.store().entries_for_lot(receipt.lot_id).unwrap();
    let last = entries.last().unwrap();
    assert_eq!(last.kind, MovementKind::Archive);
    assert_eq!(last.quantity_change, Amount::ZERO);
    assert_eq!(last.description, "damaged core");

    assert!(matches!(
        engine.archive_lot(&command).unwrap_err(),
        EngineError::InvalidRequest(_)
    ));
    assert!(matches!(
        engine
            .withdraw(&withdrawal(Selection::label("AR-1"), dec!(1)))
            .unwrap_err(),
        EngineError::NotFound(_)
    ));
    assert!(matches!(
        engine
            .archive_lot(&ArchiveLot {
                lot_id: LotId::new(),
                ..command
            })
            .unwrap_err(),
        EngineError::NotFound(_)
    ));
}

#[test]
fn fefo_prefers_earliest_expiry() {
    let engine = engine_with(EngineConfig::default().with_order(AllocationOrder::Fefo));
    let mut old_no_expiry = chemical("E1", "B3", "5", t(0));
    old_no_expiry.attributes.expiry_date = None;
    let mut late = chemical("E2", "B3", "5", t(1));
    late.attributes.expiry_date = NaiveDate::from_ymd_opt(2025, 6, 1);
    let mut soon = chemical("E3", "B3", "5", t(2));
    soon.attributes.expiry_date = NaiveDate::from_ymd_opt(2024, 9, 1);
    engine
        .register_inbound_batch(&[old_no_expiry, late, soon])
        .unwrap();

    let outcome = engine
        .withdraw(&withdrawal(Selection::batch("CHEM-1", "B3"), dec!(7)))
        .unwrap();
    let order: Vec<_> = outcome
        .deducted_lots
        .iter()
        .map(|d| d.unique_code.as_str())
        .collect();
    assert_eq!(order, vec!["E3", "E2"]);
}

/// Lets a competing withdrawal commit between the engine's read and its first commit.
struct RacingStore {
    inner: Arc<InMemoryStockStore>,
    raced: AtomicBool,
}

impl MaterialCatalog for RacingStore {
    fn material(&self, product_code: &str) -> Result<Option<Material>, StoreError> {
        self.inner.material(product_code)
    }
}

impl LotStore for RacingStore {
    fn lot(&self, lot_id: LotId) -> Result<Option<InventoryLot>, StoreError> {
        self.inner.lot(lot_id)
    }

    fn lots_for(&self, selection: &Selection) -> Result<Vec<InventoryLot>, StoreError> {
        self.inner.lots_for(selection)
    }

    fn label_exists(&self, unique_code: &str) -> Result<bool, StoreError> {
        self.inner.label_exists(unique_code)
    }
}

impl LedgerStore for RacingStore {
    fn entries_for_lot(&self, lot_id: LotId) -> Result<Vec<LedgerEntry>, StoreError> {
        self.inner.entries_for_lot(lot_id)
    }
}

impl StockStore for RacingStore {
    fn commit(&self, changeset: Changeset) -> Result<(), StoreError> {
        if !self.raced.swap(true, Ordering::SeqCst) {
            StockEngine::new(self.inner.clone(), EngineConfig::default())
                .withdraw(&withdrawal(Selection::label("R1"), dec!(5)))
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        }
        self.inner.commit(changeset)
    }
}

#[test]
fn conflicting_commit_is_retried_with_fresh_read() {
    let inner = seeded_store();
    let receipt = StockEngine::new(inner.clone(), EngineConfig::default())
        .register_inbound(&chemical("R1", "B1", "100", t(0)))
        .unwrap();

    let engine = StockEngine::new(
        RacingStore {
            inner: inner.clone(),
            raced: AtomicBool::new(false),
        },
        EngineConfig::default(),
    );
    let outcome = engine
        .withdraw(&withdrawal(Selection::label("R1"), dec!(30)))
        .unwrap();

    assert_eq!(outcome.total_remaining, Amount::from_units(65));
    let lot = inner.lot(receipt.lot_id).unwrap().unwrap();
    assert_eq!(lot.remaining_amount(), Amount::from_units(65));
    assert_eq!(lot.version, 3);
    assert_eq!(inner.entries_for_lot(receipt.lot_id).unwrap().len(), 3);
}

/// Every commit fails as if the backend were down.
struct FlakyStore {
    inner: Arc<InMemoryStockStore>,
    commits: AtomicU32,
}

impl MaterialCatalog for FlakyStore {
    fn material(&self, product_code: &str) -> Result<Option<Material>, StoreError> {
        self.inner.material(product_code)
    }
}

impl LotStore for FlakyStore {
    fn lot(&self, lot_id: LotId) -> Result<Option<InventoryLot>, StoreError> {
        self.inner.lot(lot_id)
    }

    fn lots_for(&self, selection: &Selection) -> Result<Vec<InventoryLot>, StoreError> {
        self.inner.lots_for(selection)
    }

    fn label_exists(&self, unique_code: &str) -> Result<bool, StoreError> {
        self.inner.label_exists(unique_code)
    }
}

impl LedgerStore for FlakyStore {
    fn entries_for_lot(&self, lot_id: LotId) -> Result<Vec<LedgerEntry>, StoreError> {
        self.inner.entries_for_lot(lot_id)
    }
}

impl StockStore for FlakyStore {
    fn commit(&self, _changeset: Changeset) -> Result<(), StoreError> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Unavailable("connection reset".to_string()))
    }
}

#[test]
fn persistent_store_failure_surfaces_transaction_aborted() {
    let inner = seeded_store();
    let receipt = StockEngine::new(inner.clone(), EngineConfig::default())
        .register_inbound(&chemical("FL-1", "B1", "10", t(0)))
        .unwrap();

    let engine = StockEngine::new(
        FlakyStore {
            inner: inner.clone(),
            commits: AtomicU32::new(0),
        },
        EngineConfig::default().with_commit_attempts(3),
    );
    let err = engine
        .withdraw(&withdrawal(Selection::label("FL-1"), dec!(1)))
        .unwrap_err();

    assert!(matches!(err, EngineError::TransactionAborted { attempts: 3, .. }));
    assert!(err.is_transient());
    assert_eq!(engine.store().commits.load(Ordering::SeqCst), 3);
    assert_eq!(
        inner.lot(receipt.lot_id).unwrap().unwrap().remaining_amount(),
        Amount::from_units(10)
    );
}

#[test]
fn concurrent_withdrawals_never_oversell() {
    let engine = Arc::new(engine_with(EngineConfig::default().with_commit_attempts(64)));
    let receipt = engine.register_inbound(&chemical("CC-1", "B1", "100", t(0))).unwrap();

    let handles: Vec<_> = (0..12)
        .map(|_| {
            let engine = Arc::clone(&engine);
            std::thread::spawn(move || {
                engine.withdraw(&withdrawal(Selection::label("CC-1"), dec!(10)))
            })
        })
        .collect();

    let mut deducted = Amount::ZERO;
    for handle in handles {
        match handle.join().unwrap() {
            Ok(outcome) => deducted += outcome.total_deducted,
            Err(EngineError::InsufficientStock { .. } | EngineError::TransactionAborted { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    let lot = stored(&engine, receipt.lot_id);
    assert!(deducted <= Amount::from_units(100));
    assert_eq!(lot.remaining_amount(), Amount::from_units(100) - deducted);
    assert!(engine.audit_lot(receipt.lot_id).unwrap().is_balanced());
}

#[tokio::test]
async fn lot_history_is_newest_first() {
    let engine = engine();
    let receipt = engine.register_inbound(&chemical("H1", "B1", "10", t(0))).unwrap();
    let mut first = withdrawal(Selection::label("H1"), dec!(2));
    first.occurred_at = t(10);
    let mut second = withdrawal(Selection::label("H1"), dec!(3));
    second.occurred_at = t(20);
    second.note = Some("batch QC".to_string());
    engine.withdraw(&first).unwrap();
    engine.withdraw(&second).unwrap();

    let history = engine.store().lot_history(receipt.lot_id, None).await.unwrap();
    let changes: Vec<_> = history.entries.iter().map(|e| e.quantity_change).collect();
    assert_eq!(
        changes,
        vec![-Amount::from_units(3), -Amount::from_units(2), Amount::from_units(10)]
    );
    assert_eq!(history.entries[0].description, "batch QC (allocated from H1)");

    let outbound = engine
        .store()
        .query_entries(
            LedgerFilter {
                product_code: Some("CHEM-1".to_string()),
                kind: Some(MovementKind::Outbound),
                occurred_after: Some(t(15)),
                ..Default::default()
            },
            Pagination::default(),
        )
        .await
        .unwrap();
    assert_eq!(outbound.total, 1);
    assert!(!outbound.has_more);
}

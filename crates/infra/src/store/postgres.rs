//! Postgres-backed lot + ledger store.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database (unique violation on `inventory_lots_unique_code`) | `23505` | `DuplicateLabel` | Label registered concurrently |
//! | Database (other unique violation) | `23505` | `Conflict` | Lot or entry id inserted concurrently |
//! | Database (serialization failure / deadlock) | `40001` / `40P01` | `Conflict` | Concurrent transaction won |
//! | Database (foreign key / check violation) | `23503` / `23514` | `InvalidWrite` | Unknown material, negative quantity |
//! | Database (other) | Any other | `InvalidWrite` | Other database errors |
//! | Pool / IO / TLS | N/A | `Unavailable` | Backend unreachable |
//!
//! ## Optimistic Concurrency
//!
//! Lot updates are `UPDATE ... WHERE lot_id = $1 AND version = $expected`.
//! Postgres re-evaluates the predicate after acquiring the row lock, so when
//! two withdrawals race on one lot exactly one update matches; the other sees
//! zero affected rows and the whole transaction is rolled back as `Conflict`.
//!
//! ## Runtime
//!
//! The sync [`StockStore`] methods bridge into async SQLx calls with
//! `block_in_place`, which requires a multi-threaded tokio runtime.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{instrument, Span};
use uuid::Uuid;

use stockledger_core::{ExpectedVersion, LedgerEntryId, LotId};
use stockledger_inventory::{
    Amount, Category, InventoryLot, LedgerEntry, LotAttributes, LotStatus, METERS, Material,
    MovementKind, Quantity, Selection,
};

use super::query::{LedgerFilter, LedgerPage, LedgerQuery, Pagination};
use super::r#trait::{Changeset, LedgerStore, LotStore, MaterialCatalog, StockStore, StoreError};

/// Schema applied by [`PostgresStockStore::migrate`].
pub const SCHEMA: &str = include_str!("../../migrations/0001_stock_ledger.sql");

const LABEL_CONSTRAINT: &str = "inventory_lots_unique_code";

const LOT_COLUMNS: &str = "lot_id, unique_code, product_code, batch_number, category, \
     quantity_milli, unit, attributes, status, version, created_at, updated_at";

const ENTRY_COLUMNS: &str = "entry_id, lot_id, product_code, unique_code, kind, \
     quantity_change_milli, unit, operator, occurred_at, description";

/// Postgres-backed stock store.
///
/// Uses SQLx connection pool which is thread-safe (Arc + Send + Sync).
/// Every commit runs in one SQL transaction.
#[derive(Debug, Clone)]
pub struct PostgresStockStore {
    pool: Arc<PgPool>,
}

impl PostgresStockStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Connect with a small pool.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create tables and indexes if they do not exist yet.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    /// Seed master data (normally owned by the material governance process).
    #[instrument(skip(self, material), fields(product_code = %material.product_code), err)]
    pub async fn upsert_material(&self, material: &Material) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO materials (product_code, name, category, default_unit)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (product_code) DO UPDATE SET
                name = EXCLUDED.name,
                category = EXCLUDED.category,
                default_unit = EXCLUDED.default_unit
            "#,
        )
        .bind(&material.product_code)
        .bind(&material.name)
        .bind(material.category.as_str())
        .bind(&material.default_unit)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_material", e))?;
        Ok(())
    }

    pub async fn fetch_material(&self, product_code: &str) -> Result<Option<Material>, StoreError> {
        let row = sqlx::query(
            "SELECT product_code, name, category, default_unit FROM materials WHERE product_code = $1",
        )
        .bind(product_code)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("fetch_material", e))?;

        row.map(|row| {
            let category: String = row.try_get("category").map_err(corrupt)?;
            Ok(Material {
                product_code: row.try_get("product_code").map_err(corrupt)?,
                name: row.try_get("name").map_err(corrupt)?,
                category: category
                    .parse()
                    .map_err(|e| StoreError::Corrupt(format!("material category: {e}")))?,
                default_unit: row.try_get("default_unit").map_err(corrupt)?,
            })
        })
        .transpose()
    }

    pub async fn fetch_lot(&self, lot_id: LotId) -> Result<Option<InventoryLot>, StoreError> {
        let sql = format!("SELECT {LOT_COLUMNS} FROM inventory_lots WHERE lot_id = $1");
        let row = sqlx::query(&sql)
            .bind(lot_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("fetch_lot", e))?;
        row.as_ref().map(decode_lot).transpose()
    }

    #[instrument(skip(self, selection), fields(selection = %selection, lot_count = tracing::field::Empty), err)]
    pub async fn fetch_lots(&self, selection: &Selection) -> Result<Vec<InventoryLot>, StoreError> {
        let rows = match selection {
            Selection::Label { unique_code } => {
                let sql = format!("SELECT {LOT_COLUMNS} FROM inventory_lots WHERE unique_code = $1");
                sqlx::query(&sql)
                    .bind(unique_code)
                    .fetch_all(&*self.pool)
                    .await
            }
            Selection::Batch {
                product_code,
                batch_number,
            } => {
                let sql = format!(
                    "SELECT {LOT_COLUMNS} FROM inventory_lots \
                     WHERE product_code = $1 AND batch_number = $2 \
                     ORDER BY created_at ASC, lot_id ASC"
                );
                sqlx::query(&sql)
                    .bind(product_code)
                    .bind(batch_number)
                    .fetch_all(&*self.pool)
                    .await
            }
        }
        .map_err(|e| map_sqlx_error("fetch_lots", e))?;

        Span::current().record("lot_count", rows.len() as u64);
        rows.iter().map(decode_lot).collect()
    }

    pub async fn label_taken(&self, unique_code: &str) -> Result<bool, StoreError> {
        let row = sqlx::query(
            "SELECT EXISTS (SELECT 1 FROM inventory_lots WHERE unique_code = $1) AS taken",
        )
        .bind(unique_code)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("label_taken", e))?;
        row.try_get("taken").map_err(corrupt)
    }

    pub async fn fetch_entries(&self, lot_id: LotId) -> Result<Vec<LedgerEntry>, StoreError> {
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE lot_id = $1 ORDER BY seq ASC");
        let rows = sqlx::query(&sql)
            .bind(lot_id.as_uuid())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("fetch_entries", e))?;
        rows.iter().map(decode_entry).collect()
    }

    /// Apply a changeset in one transaction.
    ///
    /// Any error drops the transaction, which rolls it back.
    #[instrument(
        skip(self, changeset),
        fields(writes = changeset.writes.len(), entries = changeset.entries.len()),
        err
    )]
    pub async fn commit_changeset(&self, changeset: Changeset) -> Result<(), StoreError> {
        if changeset.is_empty() {
            return Ok(());
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        for write in &changeset.writes {
            match write.expected {
                ExpectedVersion::Absent => insert_lot(&mut tx, &write.lot).await?,
                ExpectedVersion::Exact(read) => update_lot(&mut tx, &write.lot, read).await?,
            }
        }
        for entry in &changeset.entries {
            insert_entry(&mut tx, entry).await?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(())
    }
}

async fn insert_lot(tx: &mut Transaction<'_, Postgres>, lot: &InventoryLot) -> Result<(), StoreError> {
    let attributes = serde_json::to_value(&lot.attributes)
        .map_err(|e| StoreError::InvalidWrite(format!("attributes serialization failed: {e}")))?;

    sqlx::query(
        r#"
        INSERT INTO inventory_lots (
            lot_id, unique_code, product_code, batch_number, category,
            quantity_milli, unit, attributes, status, version, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        "#,
    )
    .bind(lot.lot_id.as_uuid())
    .bind(&lot.unique_code)
    .bind(&lot.product_code)
    .bind(&lot.batch_number)
    .bind(lot.category().as_str())
    .bind(lot.remaining_amount().milli())
    .bind(lot.unit())
    .bind(attributes)
    .bind(lot.status.as_str())
    .bind(lot.version as i64)
    .bind(lot.created_at)
    .bind(lot.updated_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| {
        if violated_constraint(&e) == Some(LABEL_CONSTRAINT) {
            StoreError::DuplicateLabel(lot.unique_code.clone())
        } else {
            map_sqlx_error("insert_lot", e)
        }
    })?;
    Ok(())
}

async fn update_lot(
    tx: &mut Transaction<'_, Postgres>,
    lot: &InventoryLot,
    read_version: u64,
) -> Result<(), StoreError> {
    if lot.version != read_version + 1 {
        return Err(StoreError::InvalidWrite(format!(
            "lot {} must advance from version {read_version} to {}",
            lot.unique_code,
            read_version + 1
        )));
    }
    let attributes = serde_json::to_value(&lot.attributes)
        .map_err(|e| StoreError::InvalidWrite(format!("attributes serialization failed: {e}")))?;

    let result = sqlx::query(
        r#"
        UPDATE inventory_lots
        SET quantity_milli = $2,
            attributes = $3,
            status = $4,
            version = $5,
            updated_at = $6
        WHERE lot_id = $1 AND version = $7
        "#,
    )
    .bind(lot.lot_id.as_uuid())
    .bind(lot.remaining_amount().milli())
    .bind(attributes)
    .bind(lot.status.as_str())
    .bind(lot.version as i64)
    .bind(lot.updated_at)
    .bind(read_version as i64)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("update_lot", e))?;

    if result.rows_affected() == 0 {
        return Err(StoreError::Conflict(format!(
            "lot {} is no longer at version {read_version}",
            lot.unique_code
        )));
    }
    Ok(())
}

async fn insert_entry(tx: &mut Transaction<'_, Postgres>, entry: &LedgerEntry) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO ledger_entries (
            entry_id, lot_id, product_code, unique_code, kind,
            quantity_change_milli, unit, operator, occurred_at, description
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(entry.entry_id.as_uuid())
    .bind(entry.lot_id.as_uuid())
    .bind(&entry.product_code)
    .bind(&entry.unique_code)
    .bind(entry.kind.as_str())
    .bind(entry.quantity_change.milli())
    .bind(&entry.unit)
    .bind(&entry.operator)
    .bind(entry.timestamp)
    .bind(&entry.description)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("insert_entry", e))?;
    Ok(())
}

fn corrupt(err: sqlx::Error) -> StoreError {
    StoreError::Corrupt(err.to_string())
}

fn decode_lot(row: &PgRow) -> Result<InventoryLot, StoreError> {
    let category: String = row.try_get("category").map_err(corrupt)?;
    let category: Category = category
        .parse()
        .map_err(|e| StoreError::Corrupt(format!("lot category: {e}")))?;
    let amount = Amount::from_milli(row.try_get("quantity_milli").map_err(corrupt)?);
    let unit: String = row.try_get("unit").map_err(corrupt)?;
    let quantity = match category {
        Category::Chemical => Quantity::scalar(amount, unit),
        Category::Film if unit == METERS => Quantity::length(amount),
        Category::Film => {
            return Err(StoreError::Corrupt(format!("film lot stored in unit {unit}")));
        }
    };

    let attributes: serde_json::Value = row.try_get("attributes").map_err(corrupt)?;
    let attributes: LotAttributes = serde_json::from_value(attributes)
        .map_err(|e| StoreError::Corrupt(format!("lot attributes: {e}")))?;
    let status: String = row.try_get("status").map_err(corrupt)?;
    let version: i64 = row.try_get("version").map_err(corrupt)?;
    let lot_id: Uuid = row.try_get("lot_id").map_err(corrupt)?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(corrupt)?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at").map_err(corrupt)?;

    Ok(InventoryLot {
        lot_id: LotId::from_uuid(lot_id),
        unique_code: row.try_get("unique_code").map_err(corrupt)?,
        product_code: row.try_get("product_code").map_err(corrupt)?,
        batch_number: row.try_get("batch_number").map_err(corrupt)?,
        quantity,
        attributes,
        status: LotStatus::parse(&status).map_err(|e| StoreError::Corrupt(e.to_string()))?,
        version: version as u64,
        created_at,
        updated_at,
    })
}

fn decode_entry(row: &PgRow) -> Result<LedgerEntry, StoreError> {
    let kind: String = row.try_get("kind").map_err(corrupt)?;
    let entry_id: Uuid = row.try_get("entry_id").map_err(corrupt)?;
    let lot_id: Uuid = row.try_get("lot_id").map_err(corrupt)?;

    Ok(LedgerEntry {
        entry_id: LedgerEntryId::from_uuid(entry_id),
        lot_id: LotId::from_uuid(lot_id),
        product_code: row.try_get("product_code").map_err(corrupt)?,
        unique_code: row.try_get("unique_code").map_err(corrupt)?,
        kind: MovementKind::parse(&kind).map_err(|e| StoreError::Corrupt(e.to_string()))?,
        quantity_change: Amount::from_milli(row.try_get("quantity_change_milli").map_err(corrupt)?),
        unit: row.try_get("unit").map_err(corrupt)?,
        operator: row.try_get("operator").map_err(corrupt)?,
        timestamp: row.try_get("occurred_at").map_err(corrupt)?,
        description: row.try_get("description").map_err(corrupt)?,
    })
}

fn violated_constraint(err: &sqlx::Error) -> Option<&str> {
    match err {
        sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505") => {
            db_err.constraint()
        }
        _ => None,
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") | Some("40001") | Some("40P01") => StoreError::Conflict(msg),
                Some("23503") | Some("23514") => StoreError::InvalidWrite(msg),
                _ => StoreError::InvalidWrite(msg),
            }
        }
        sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut => {
            StoreError::Unavailable(format!("connection pool unavailable in {operation}"))
        }
        sqlx::Error::Io(e) => StoreError::Unavailable(format!("io error in {operation}: {e}")),
        sqlx::Error::Tls(e) => StoreError::Unavailable(format!("tls error in {operation}: {e}")),
        other => StoreError::Unavailable(format!("{operation} failed: {other}")),
    }
}

/// Run an async store call from the sync trait surface.
fn block_on<F: Future>(future: F) -> Result<F::Output, StoreError> {
    let handle = tokio::runtime::Handle::try_current().map_err(|_| {
        StoreError::Unavailable(
            "PostgresStockStore requires a tokio runtime; call it from within one".to_string(),
        )
    })?;
    if handle.runtime_flavor() == tokio::runtime::RuntimeFlavor::CurrentThread {
        return Err(StoreError::Unavailable(
            "PostgresStockStore requires a multi-threaded tokio runtime".to_string(),
        ));
    }
    Ok(tokio::task::block_in_place(|| handle.block_on(future)))
}

impl MaterialCatalog for PostgresStockStore {
    fn material(&self, product_code: &str) -> Result<Option<Material>, StoreError> {
        block_on(self.fetch_material(product_code))?
    }
}

impl LotStore for PostgresStockStore {
    fn lot(&self, lot_id: LotId) -> Result<Option<InventoryLot>, StoreError> {
        block_on(self.fetch_lot(lot_id))?
    }

    fn lots_for(&self, selection: &Selection) -> Result<Vec<InventoryLot>, StoreError> {
        block_on(self.fetch_lots(selection))?
    }

    fn label_exists(&self, unique_code: &str) -> Result<bool, StoreError> {
        block_on(self.label_taken(unique_code))?
    }
}

impl LedgerStore for PostgresStockStore {
    fn entries_for_lot(&self, lot_id: LotId) -> Result<Vec<LedgerEntry>, StoreError> {
        block_on(self.fetch_entries(lot_id))?
    }
}

impl StockStore for PostgresStockStore {
    fn commit(&self, changeset: Changeset) -> Result<(), StoreError> {
        block_on(self.commit_changeset(changeset))?
    }
}

#[async_trait::async_trait]
impl LedgerQuery for PostgresStockStore {
    async fn query_entries(
        &self,
        filter: LedgerFilter,
        pagination: Pagination,
    ) -> Result<LedgerPage, StoreError> {
        let lot_param: Option<Uuid> = filter.lot_id.map(|id| *id.as_uuid());
        let product_param: Option<&str> = filter.product_code.as_deref();
        let kind_param: Option<&str> = filter.kind.map(MovementKind::as_str);

        let count_row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total
            FROM ledger_entries
            WHERE ($1::uuid IS NULL OR lot_id = $1)
                AND ($2::text IS NULL OR product_code = $2)
                AND ($3::text IS NULL OR kind = $3)
                AND ($4::timestamptz IS NULL OR occurred_at >= $4)
                AND ($5::timestamptz IS NULL OR occurred_at <= $5)
            "#,
        )
        .bind(lot_param)
        .bind(product_param)
        .bind(kind_param)
        .bind(filter.occurred_after)
        .bind(filter.occurred_before)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("count_entries", e))?;
        let total: i64 = count_row.try_get("total").map_err(corrupt)?;

        let sql = format!(
            r#"
            SELECT {ENTRY_COLUMNS}
            FROM ledger_entries
            WHERE ($1::uuid IS NULL OR lot_id = $1)
                AND ($2::text IS NULL OR product_code = $2)
                AND ($3::text IS NULL OR kind = $3)
                AND ($4::timestamptz IS NULL OR occurred_at >= $4)
                AND ($5::timestamptz IS NULL OR occurred_at <= $5)
            ORDER BY occurred_at DESC, seq ASC
            LIMIT $6 OFFSET $7
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(lot_param)
            .bind(product_param)
            .bind(kind_param)
            .bind(filter.occurred_after)
            .bind(filter.occurred_before)
            .bind(pagination.limit as i64)
            .bind(pagination.offset as i64)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("query_entries", e))?;

        let entries = rows.iter().map(decode_entry).collect::<Result<Vec<_>, _>>()?;
        let has_more = total > pagination.offset as i64 + pagination.limit as i64;

        Ok(LedgerPage {
            entries,
            total: total as u64,
            pagination,
            has_more,
        })
    }
}

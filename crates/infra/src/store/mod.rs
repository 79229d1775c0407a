//! Lot and ledger storage boundary.
//!
//! The engine only talks to [`StockStore`]; the in-memory store backs tests
//! and development, the Postgres store backs deployments.

pub mod in_memory;
pub mod postgres;
pub mod query;
pub mod r#trait;

pub use in_memory::InMemoryStockStore;
pub use postgres::PostgresStockStore;
pub use query::{LedgerFilter, LedgerPage, LedgerQuery, Pagination};
pub use r#trait::{Changeset, LedgerStore, LotStore, LotWrite, MaterialCatalog, StockStore, StoreError};

//! Infrastructure layer: stores, engine orchestration, configuration.

pub mod config;
pub mod engine;
pub mod error;
pub mod store;

pub use config::{ConfigError, EngineConfig};
pub use engine::{Deduction, InboundReceipt, Reconciliation, StockEngine, WithdrawalOutcome};
pub use error::{EngineError, EngineResult};
pub use store::{
    Changeset, InMemoryStockStore, LedgerFilter, LedgerPage, LedgerQuery, LedgerStore, LotStore,
    LotWrite, MaterialCatalog, Pagination, PostgresStockStore, StockStore, StoreError,
};

//! Stock allocation domain (lots, ledger entries, allocation planning).
//!
//! This crate contains business rules for stock, implemented purely as
//! deterministic domain logic (no IO, no storage).

pub mod commands;
pub mod ledger;
pub mod lot;
pub mod material;
pub mod ordering;
pub mod planner;
pub mod precision;
pub mod quantity;

pub use commands::{ArchiveLot, ReceiveLot, WithdrawStock};
pub use ledger::{LedgerEntry, MovementKind, replay};
pub use lot::{ExhaustionPolicy, InventoryLot, LotAttributes, LotStatus};
pub use material::Material;
pub use ordering::AllocationOrder;
pub use planner::{AllocationError, AllocationPlan, AllocationPlanner, PlanLine, Selection};
pub use precision::{Amount, EPSILON, SCALE};
pub use quantity::{Category, METERS, Quantity};

pub use rust_decimal::Decimal;

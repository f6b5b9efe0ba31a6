//! Inventory - Snapshots of the platform's storage and the capacity ledger

pub mod ledger;
pub mod snapshot;

pub use ledger::CapacityLedger;
pub use snapshot::{InventoryDocument, InventorySnapshot};

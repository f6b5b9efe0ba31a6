//! Placement - Profile catalog, placement records and the placement engine

pub mod engine;
pub mod profile;
pub mod store;

pub use engine::{rank_candidates, PlacementEngine, PlacementOutcome, PlacementRequest};
pub use profile::ProfileCatalog;
pub use store::PlacementStore;

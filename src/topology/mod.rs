//! Topology - Zone lifecycle tracking and events

pub mod events;
pub mod tracker;

pub use events::ZoneEvent;
pub use tracker::{DomainLifecycle, ZoneLifecycleTracker};

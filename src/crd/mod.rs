//! Custom Resource Definitions for the Placement Engine
//!
//! This module contains all CRD types:
//! - TopologyZone: Zone membership and decommission requests
//! - DatastorePool: Platform datastore capacity and volume copies

pub mod datastore_pool;
pub mod topology_zone;

pub use datastore_pool::*;
pub use topology_zone::*;

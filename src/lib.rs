//! Storage Placement Engine
//!
//! Topology-aware placement of persistent volume claims onto storage pools,
//! zone lifecycle tracking, and migration planning for pool and zone
//! decommissioning.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                              Orchestrator                                   │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────────┐  │
//! │  │    Placement    │  │    Migration    │  │      Zone Lifecycle         │  │
//! │  │     Engine      │  │     Planner     │  │      Tracker                │  │
//! │  └────────┬────────┘  └────────┬────────┘  └─────────────┬───────────────┘  │
//! │           │                    │                         │                   │
//! │           └────────────────────┼─────────────────────────┘                   │
//! │                                │                                             │
//! │                    ┌───────────┴───────────┐                                │
//! │                    │    Capacity Ledger    │                                │
//! │                    │  + Placement Records  │                                │
//! │                    └───────────────────────┘                                │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │                        Annotation Reconciler                                 │
//! │          (deduplicated, cancellable waits on object annotations)             │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │                          Adapters                                            │
//! │  ┌─────────────────────────────┐  ┌─────────────────────────────────────┐   │
//! │  │   Inventory (CRD / HTTP /   │  │   Control plane (Kubernetes API /   │   │
//! │  │   file / static)            │  │   in-memory)                        │   │
//! │  └─────────────────────────────┘  └─────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`placement`]: Candidate ranking and the placement engine
//! - [`migration`]: Decommission plans for pools and zones
//! - [`topology`]: Zone lifecycle states and events
//! - [`annotation`]: Annotation waits and writes
//! - [`inventory`]: Inventory snapshots and the capacity ledger
//! - [`controlplane`]: Orchestrator, REST API, zone controller and adapters
//! - [`crd`]: Custom Resource Definitions
//! - [`config`]: Process configuration and feature switches
//! - [`domain`]: Core domain types and ports
//! - [`error`]: Error types and handling

pub mod annotation;
pub mod config;
pub mod controlplane;
pub mod crd;
pub mod domain;
pub mod error;
pub mod inventory;
pub mod locks;
pub mod migration;
pub mod placement;
pub mod topology;

// Re-export commonly used types
pub use controlplane::{
    ApiServer, ApiServerConfig, Orchestrator, OrchestratorConfig, OrchestratorStatus,
    PlatformFactory,
};

pub use crd::{
    DatastorePool, DatastorePoolSpec, DatastorePoolStatus, TopologyZone, TopologyZoneSpec,
    TopologyZoneStatus,
};

pub use domain::model::{
    AccessibilityRequirement, ClaimKey, DomainState, PlacementRecord, PoolId, RemovalPolicy,
    StoragePool, StorageProfile, TopologyDomain, VolumeId, ZoneKey,
};

pub use domain::ports::{ControlPlaneClient, InventoryProvider, PlatformSessions};

pub use error::{Error, ErrorAction, Result};

pub use migration::{MigrationPlan, PlanStatus, PlanTarget};
pub use placement::{PlacementEngine, PlacementOutcome};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

//! Control Plane Module
//!
//! Everything that connects the engine to the outside: the orchestrator
//! behind the REST surface, the TopologyZone controller, and the adapters
//! to the cluster and the virtualization platform.

pub mod api;
pub mod kube_client;
pub mod memory;
pub mod orchestrator;
pub mod platform;
pub mod zone_controller;

pub use api::{ApiServer, ApiServerConfig, RestRouter};
pub use kube_client::KubeControlPlane;
pub use memory::InMemoryControlPlane;
pub use orchestrator::{
    Orchestrator, OrchestratorConfig, OrchestratorStatus, PoolCapacity, RemovalReport, ZoneView,
};
pub use platform::{PlatformAdapters, PlatformFactory};
pub use zone_controller::{run_zone_controller, ZoneContext};

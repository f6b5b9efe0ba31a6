//! Domain Ports - Core trait definitions for the placement engine
//!
//! These traits define the boundaries between the engine and the systems it
//! does not own: the virtualization platform's storage inventory, the cluster
//! control plane and the authenticated platform sessions.
//! Adapters implement these traits to provide concrete functionality.

use crate::domain::model::{AccessibilityRequirement, AnnotationSubject, ClaimKey, PoolId, VolumeId};
use crate::error::Result;
use crate::inventory::InventorySnapshot;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// =============================================================================
// Inventory Provider Port
// =============================================================================

/// Port for reading the externally-owned storage inventory
///
/// Every call returns a fresh point-in-time view. Implementations must not
/// hold locks across calls; the inventory may change between two snapshots.
#[async_trait]
pub trait InventoryProvider: Send + Sync {
    /// Take a snapshot of zones, pools and volume copy locations
    async fn snapshot(&self) -> Result<InventorySnapshot>;

    /// Get provider name
    fn provider_name(&self) -> &str;
}

// =============================================================================
// Control Plane Port
// =============================================================================

/// Claim details as seen by the cluster control plane
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimSpec {
    pub claim: ClaimKey,
    /// Storage class name; resolves to a storage profile
    pub storage_class: Option<String>,
    /// Requested size in bytes
    pub requested_bytes: u64,
    /// Bound volume name, once provisioned
    pub volume_name: Option<String>,
    /// Topology requested through the claim's annotation
    pub requested_topology: Option<AccessibilityRequirement>,
}

/// A claim whose pool selection annotation is set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacedClaim {
    pub spec: ClaimSpec,
    /// Value of the selected-pool annotation
    pub pool: PoolId,
}

/// Port for annotation reads/writes and object lookups on the cluster
#[async_trait]
pub trait ControlPlaneClient: Send + Sync {
    /// Read an annotation; `None` when the object exists but the key is unset
    async fn get_annotation(&self, subject: &AnnotationSubject, key: &str)
        -> Result<Option<String>>;

    /// Write an annotation; returns once the write is acknowledged
    async fn set_annotation(&self, subject: &AnnotationSubject, key: &str, value: &str)
        -> Result<()>;

    /// Look up a claim
    async fn get_claim(&self, claim: &ClaimKey) -> Result<ClaimSpec>;

    /// Every claim carrying a selected-pool annotation, in claim order
    async fn list_placed_claims(&self) -> Result<Vec<PlacedClaim>>;

    /// Find the pod on a node that mounts the given volume
    async fn find_pod_for_volume(
        &self,
        volume_id: &VolumeId,
        node_name: &str,
    ) -> Result<Option<AnnotationSubject>>;
}

// =============================================================================
// Platform Session Port
// =============================================================================

/// Port for the authenticated sessions held against the platform
#[async_trait]
pub trait PlatformSessions: Send + Sync {
    /// Log out every open session; called once during process teardown
    async fn logout_all(&self) -> Result<()>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type InventoryProviderRef = Arc<dyn InventoryProvider>;
pub type ControlPlaneClientRef = Arc<dyn ControlPlaneClient>;
pub type PlatformSessionsRef = Arc<dyn PlatformSessions>;

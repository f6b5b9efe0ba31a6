//! Placement Orchestrator
//!
//! Front door of the engine. Owns the shared zone tracker, capacity ledger
//! and placement records, and serves both the controller operations
//! (placement, decommission plans, zone removal) and the node annotation
//! lookups.
//!
//! Placement records are rebuilt from claim annotations by
//! [`Orchestrator::restore`] before any operation that reads or writes them
//! is accepted.

use crate::annotation::AnnotationReconciler;
use crate::config::{
    ClusterFlavor, DriverConfig, FeatureSwitches, ServiceMode, FEATURE_STORAGE_VMOTION_PLAN,
    FEATURE_WORKLOAD_DOMAIN_ISOLATION,
};
use crate::domain::model::{
    AccessibilityRequirement, AnnotationSubject, ClaimKey, DomainState, MigrationReason,
    PlacementRecord, PoolId, RemovalPolicy, StoragePool, StorageProfile, VolumeId, ZoneKey,
    ANNOTATION_SELECTED_POOL, ANNOTATION_SELECTED_ZONE, ANNOTATION_VM_UUID,
};
use crate::domain::ports::{
    ClaimSpec, ControlPlaneClientRef, InventoryProviderRef, PlacedClaim, PlatformSessionsRef,
};
use crate::error::{Error, Result};
use crate::inventory::{CapacityLedger, InventorySnapshot};
use crate::locks::EngineLocks;
use crate::migration::{self, MigrationPlan, PlanTarget};
use crate::placement::{
    PlacementEngine, PlacementOutcome, PlacementRequest, PlacementStore, ProfileCatalog,
};
use crate::topology::{DomainLifecycle, ZoneEvent, ZoneLifecycleTracker};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

// =============================================================================
// Orchestrator Configuration
// =============================================================================

/// Configuration for the orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Bytes that must stay free on a pool after placement
    pub capacity_floor_bytes: u64,
    /// Interval between annotation polls
    pub poll_interval: Duration,
    /// Await timeout when the caller gives none
    pub default_await_timeout: Duration,
    /// Feature switches
    pub features: FeatureSwitches,
    pub flavor: ClusterFlavor,
    pub mode: ServiceMode,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            capacity_floor_bytes: 0,
            poll_interval: Duration::from_secs(1),
            default_await_timeout: Duration::from_secs(120),
            features: FeatureSwitches::default(),
            flavor: ClusterFlavor::Vanilla,
            mode: ServiceMode::Full,
        }
    }
}

impl From<&DriverConfig> for OrchestratorConfig {
    fn from(config: &DriverConfig) -> Self {
        Self {
            capacity_floor_bytes: config.settings.capacity_floor_bytes,
            poll_interval: config.settings.poll_interval(),
            default_await_timeout: config.settings.default_await_timeout(),
            features: config.features.clone(),
            flavor: config.flavor,
            mode: config.mode,
        }
    }
}

// =============================================================================
// Views
// =============================================================================

/// Zone as seen by inventory and tracker together
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneView {
    pub zone: String,
    pub phase: String,
    pub policy: Option<RemovalPolicy>,
    pub pools: Vec<String>,
    pub nodes: Vec<String>,
    pub placed_volumes: usize,
    #[serde(default)]
    pub marked_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub removed_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Capacity of a pool as the engine accounts for it
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolCapacity {
    pub pool: String,
    pub zone: String,
    pub total_bytes: u64,
    pub platform_used_bytes: u64,
    pub committed_bytes: u64,
    pub effective_free_bytes: u64,
    pub placed_bytes: u64,
    pub accessible: bool,
}

/// Outcome of confirming a zone removal
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemovalReport {
    pub zone: String,
    /// Volumes re-homed onto an existing copy outside the zone
    pub promoted: Vec<String>,
    pub phase: String,
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Main orchestrator that coordinates all engine operations
pub struct Orchestrator {
    config: OrchestratorConfig,
    /// Platform inventory
    inventory: InventoryProviderRef,
    /// Cluster control plane
    control_plane: ControlPlaneClientRef,
    /// Platform sessions, logged out on shutdown
    sessions: PlatformSessionsRef,
    /// Storage class -> profile
    catalog: Arc<ProfileCatalog>,
    tracker: Arc<ZoneLifecycleTracker>,
    ledger: Arc<CapacityLedger>,
    store: Arc<PlacementStore>,
    locks: Arc<EngineLocks>,
    annotations: Arc<AnnotationReconciler>,
    placement: Arc<PlacementEngine>,
    /// Set once placement records were rebuilt
    restored: AtomicBool,
    shut_down: AtomicBool,
}

impl Orchestrator {
    /// Create a new orchestrator
    pub fn new(
        config: OrchestratorConfig,
        inventory: InventoryProviderRef,
        control_plane: ControlPlaneClientRef,
        sessions: PlatformSessionsRef,
        catalog: Arc<ProfileCatalog>,
    ) -> Arc<Self> {
        let tracker = ZoneLifecycleTracker::new();
        let ledger = CapacityLedger::new();
        let store = PlacementStore::new();
        let locks = EngineLocks::new();
        let annotations = AnnotationReconciler::new(
            control_plane.clone(),
            config.poll_interval,
            config.default_await_timeout,
        );
        let placement = PlacementEngine::new(
            inventory.clone(),
            tracker.clone(),
            ledger.clone(),
            store.clone(),
            annotations.clone(),
            locks.clone(),
            config.capacity_floor_bytes,
        );

        info!(
            "Orchestrator created: mode={}, flavor={}, inventory={}, {} profile(s)",
            config.mode,
            config.flavor,
            inventory.provider_name(),
            catalog.len()
        );

        Arc::new(Self {
            config,
            inventory,
            control_plane,
            sessions,
            catalog,
            tracker,
            ledger,
            store,
            locks,
            annotations,
            placement,
            restored: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn tracker(&self) -> &Arc<ZoneLifecycleTracker> {
        &self.tracker
    }

    // =========================================================================
    // Startup
    // =========================================================================

    /// Rebuild placement records and ledger commitments from the claims'
    /// selected-pool annotations
    ///
    /// Claims whose selected pool is missing from inventory are skipped.
    /// Only the first successful call does any work.
    pub async fn restore(&self) -> Result<usize> {
        if self.restored.load(Ordering::SeqCst) {
            return Ok(self.store.len());
        }

        let snapshot = self.inventory.snapshot().await?;
        let placed = self.control_plane.list_placed_claims().await?;
        let total = placed.len();
        let mut restored = 0usize;

        for PlacedClaim { spec, pool } in placed {
            let pool = match snapshot.pool(&pool) {
                Some(pool) => pool,
                None => {
                    warn!(
                        "Claim {} selects pool {} which is not in inventory, not restored",
                        spec.claim, pool
                    );
                    continue;
                }
            };

            let profile = match spec.storage_class.as_deref().and_then(|c| self.catalog.get(c)) {
                Some(profile) => (*profile).clone(),
                None => {
                    warn!(
                        "Claim {} storage class {:?} has no placement profile, restoring with an unconstrained one",
                        spec.claim, spec.storage_class
                    );
                    StorageProfile::new(spec.storage_class.clone().unwrap_or_default())
                }
            };

            let record = PlacementRecord {
                claim: spec.claim.clone(),
                volume_id: volume_id_for(&spec),
                profile,
                requirement: spec.requested_topology.clone().unwrap_or_default(),
                size_bytes: spec.requested_bytes,
                pool: pool.id.clone(),
                domain: pool.domain.clone(),
                placed_at: chrono::Utc::now(),
                history: Vec::new(),
            };
            if self.store.insert(record) {
                self.ledger.restore(&pool.id, spec.requested_bytes);
                restored += 1;
            }
        }

        self.restored.store(true, Ordering::SeqCst);
        info!(
            "Restored {} placement record(s) from {} annotated claim(s)",
            restored, total
        );
        Ok(restored)
    }

    fn ensure_restored(&self) -> Result<()> {
        if self.restored.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::NotReady(
                "placement records have not been rebuilt yet".to_string(),
            ))
        }
    }

    // =========================================================================
    // Node service operations
    // =========================================================================

    /// Wait for the VM UUID annotation of the pod mounting a volume on a node
    ///
    /// Deprecated: callers should read the annotation from the pod directly.
    /// Kept for older node plugins; the result is informational only.
    pub async fn get_pod_vm_uuid_annotation(
        &self,
        volume_id: &VolumeId,
        node_name: &str,
        timeout: Option<Duration>,
    ) -> Result<String> {
        warn!(
            "GetPodVMUUIDAnnotation is deprecated (volume {}, node {})",
            volume_id, node_name
        );

        let pod = self
            .control_plane
            .find_pod_for_volume(volume_id, node_name)
            .await?
            .ok_or_else(|| Error::ResourceNotFound {
                kind: "Pod".to_string(),
                name: format!("mounting {} on {}", volume_id, node_name),
            })?;

        let entry = self
            .annotations
            .await_annotation(&pod, ANNOTATION_VM_UUID, timeout)
            .await?;
        Ok(entry.value)
    }

    /// Read an annotation of a host without waiting
    pub async fn get_host_annotation(&self, host: &str, key: &str) -> Result<String> {
        let subject = AnnotationSubject::Host {
            name: host.to_string(),
        };
        self.annotations
            .lookup(&subject, key)
            .await?
            .ok_or_else(|| Error::ResourceNotFound {
                kind: "Annotation".to_string(),
                name: format!("{} on host {}", key, host),
            })
    }

    // =========================================================================
    // Controller service operations
    // =========================================================================

    /// Place a claim onto a pool
    ///
    /// An empty `requirement` falls back to the topology requested through
    /// the claim's annotation. Claims whose storage class has no registered
    /// profile follow default platform scheduling.
    pub async fn place_persistent_volume_claim(
        &self,
        claim: &ClaimKey,
        requirement: AccessibilityRequirement,
    ) -> Result<PlacementOutcome> {
        if !self
            .config
            .features
            .is_enabled(FEATURE_WORKLOAD_DOMAIN_ISOLATION)
        {
            debug!(
                "{} disabled, skipping placement of {}",
                FEATURE_WORKLOAD_DOMAIN_ISOLATION, claim
            );
            return Ok(PlacementOutcome::NoOpRequired);
        }
        self.ensure_restored()?;

        let spec = self.control_plane.get_claim(claim).await?;

        let profile = match spec.storage_class.as_deref().and_then(|c| self.catalog.get(c)) {
            Some(profile) => profile,
            None => {
                debug!(
                    "Claim {} storage class {:?} has no placement profile",
                    claim, spec.storage_class
                );
                return Ok(PlacementOutcome::NoOpRequired);
            }
        };

        let requirement = if requirement.is_empty() {
            spec.requested_topology.clone().unwrap_or_default()
        } else {
            requirement
        };

        let volume_id = volume_id_for(&spec);

        self.placement
            .place(&PlacementRequest {
                claim: claim.clone(),
                volume_id,
                profile: (*profile).clone(),
                requirement,
                size_bytes: spec.requested_bytes,
            })
            .await
    }

    /// Plan the evacuation of a single pool
    ///
    /// Fails as infeasible when volumes need to move and none of them fit
    /// anywhere. A partial plan is returned as data.
    pub async fn get_storage_vmotion_plan(
        &self,
        pool: &PoolId,
        policy: RemovalPolicy,
    ) -> Result<MigrationPlan> {
        self.config.features.require(FEATURE_STORAGE_VMOTION_PLAN)?;

        let plan = self
            .plan_decommission(&PlanTarget::Pool { id: pool.clone() }, policy)
            .await?;

        if plan.assignments.is_empty() && !plan.unplaced.is_empty() {
            return Err(Error::Infeasible {
                subject: format!("pool {}", pool),
                reason: format!(
                    "none of {} volume(s) fit on any destination pool",
                    plan.unplaced.len()
                ),
            });
        }
        if !plan.is_complete() {
            warn!(
                "Storage vMotion plan for pool {} is partial: {} volume(s) unplaced",
                pool,
                plan.unplaced.len()
            );
        }
        Ok(plan)
    }

    /// Plan the decommissioning of a pool or zone
    pub async fn plan_decommission(
        &self,
        target: &PlanTarget,
        policy: RemovalPolicy,
    ) -> Result<MigrationPlan> {
        self.ensure_restored()?;
        let snapshot = self.inventory.snapshot().await?;
        let records = self.store.list();
        migration::plan(
            &snapshot,
            &self.ledger,
            &self.tracker,
            &records,
            target,
            policy,
        )
    }

    /// Record that a volume was moved to `destination` on the platform
    pub async fn apply_migration(
        &self,
        volume_id: &VolumeId,
        destination: &PoolId,
    ) -> Result<PlacementRecord> {
        self.ensure_restored()?;
        let claim = self
            .store
            .find_by_volume(volume_id)
            .map(|r| r.claim)
            .ok_or_else(|| Error::ResourceNotFound {
                kind: "PlacementRecord".to_string(),
                name: volume_id.to_string(),
            })?;

        let _claim_guard = self.locks.claims.lock(claim.clone()).await;
        let record = self.store.get(&claim).ok_or_else(|| Error::ResourceNotFound {
            kind: "PlacementRecord".to_string(),
            name: volume_id.to_string(),
        })?;

        if &record.pool == destination {
            debug!("Volume {} already on pool {}", volume_id, destination);
            return Ok(record);
        }

        let snapshot = self.inventory.snapshot().await?;
        let dest = snapshot
            .pool(destination)
            .cloned()
            .ok_or_else(|| Error::StaleState {
                kind: "StoragePool".to_string(),
                name: destination.to_string(),
            })?;
        self.check_destination(&snapshot, &record, &dest)?;

        let _zone_guards = self
            .locks
            .zones
            .lock_all([record.domain.clone(), dest.domain.clone()])
            .await;

        if self.tracker.is_removed(&dest.domain) {
            return Err(Error::StaleState {
                kind: "TopologyDomain".to_string(),
                name: dest.domain.to_string(),
            });
        }

        self.ledger.transfer(&record.pool, &dest, record.size_bytes)?;

        if let Err(e) = self.write_selection(&record.claim, &dest).await {
            self.undo_transfer(&snapshot, &record, &dest);
            return Err(e);
        }

        let updated = self
            .store
            .update(&record.claim, |r| r.relocate(&dest, MigrationReason::StorageMotion))
            .ok_or_else(|| Error::Internal(format!("record for {} vanished", record.claim)))?;

        info!(
            "Applied migration of {} ({} bytes): {} -> {}",
            volume_id, record.size_bytes, record.pool, dest.id
        );
        Ok(updated)
    }

    /// Forget the placement of a deleted claim and return its committed bytes
    pub async fn release_claim(&self, claim: &ClaimKey) -> Result<PlacementRecord> {
        self.ensure_restored()?;
        let not_placed = || Error::ResourceNotFound {
            kind: "PlacementRecord".to_string(),
            name: claim.to_string(),
        };

        let _claim_guard = self.locks.claims.lock(claim.clone()).await;
        // Records only move under the claim lock, so the zone is stable here
        let domain = self.store.get(claim).map(|r| r.domain).ok_or_else(not_placed)?;
        let _zone_guard = self.locks.zones.lock(domain).await;

        let record = self.store.remove(claim).ok_or_else(not_placed)?;
        self.ledger.release(&record.pool, record.size_bytes);

        info!(
            "Released claim {} ({} bytes) from pool {}",
            claim, record.size_bytes, record.pool
        );
        Ok(record)
    }

    fn check_destination(
        &self,
        snapshot: &InventorySnapshot,
        record: &PlacementRecord,
        dest: &StoragePool,
    ) -> Result<()> {
        let admitted = snapshot
            .domain_of(dest)
            .map(|d| record.requirement.admits(d))
            .unwrap_or(false);

        if !dest.accessible
            || !admitted
            || !record.profile.accepts_pool(dest)
            || !record.profile.accepts_zone(&dest.domain)
        {
            return Err(Error::Infeasible {
                subject: record.volume_id.to_string(),
                reason: format!(
                    "pool {} is not an eligible destination for claim {}",
                    dest.id, record.claim
                ),
            });
        }
        Ok(())
    }

    fn undo_transfer(&self, snapshot: &InventorySnapshot, record: &PlacementRecord, dest: &StoragePool) {
        match snapshot.pool(&record.pool) {
            Some(source) => {
                if let Err(e) = self.ledger.transfer(&dest.id, source, record.size_bytes) {
                    error!("Failed to return capacity to pool {}: {}", record.pool, e);
                }
            }
            None => self.ledger.release(&dest.id, record.size_bytes),
        }
    }

    async fn write_selection(&self, claim: &ClaimKey, pool: &StoragePool) -> Result<()> {
        let subject = AnnotationSubject::claim(claim);
        self.annotations
            .set(&subject, ANNOTATION_SELECTED_POOL, pool.id.as_str())
            .await?;
        self.annotations
            .set(&subject, ANNOTATION_SELECTED_ZONE, &pool.domain.value)
            .await?;
        Ok(())
    }

    // =========================================================================
    // Zone lifecycle
    // =========================================================================

    /// Mark a zone for removal
    pub async fn mark_zone_for_removal(
        &self,
        zone: &ZoneKey,
        policy: RemovalPolicy,
    ) -> Result<DomainLifecycle> {
        let snapshot = self.inventory.snapshot().await?;
        if snapshot.domain(zone).is_none() && self.tracker.state(zone) == DomainState::Active {
            return Err(Error::StaleState {
                kind: "TopologyDomain".to_string(),
                name: zone.to_string(),
            });
        }

        self.tracker.mark_for_removal(zone, policy)?;
        Ok(self.tracker.lifecycle(zone))
    }

    /// Confirm a marked zone as removed
    ///
    /// Records with an accessible copy outside the zone are re-homed onto
    /// that copy. Fails with `RemovalBlocked` while any other record still
    /// references the zone.
    pub async fn complete_zone_removal(&self, zone: &ZoneKey) -> Result<RemovalReport> {
        self.ensure_restored()?;
        match self.tracker.state(zone) {
            DomainState::Removed => {
                return Ok(RemovalReport {
                    zone: zone.to_string(),
                    promoted: Vec::new(),
                    phase: DomainState::Removed.phase().to_string(),
                })
            }
            DomainState::Active => {
                return Err(Error::InvalidZoneTransition {
                    zone: zone.to_string(),
                    from: DomainState::Active.to_string(),
                    to: DomainState::Removed.to_string(),
                })
            }
            DomainState::MarkedForRemoval(_) => {}
        }

        let snapshot = self.inventory.snapshot().await?;
        let candidates = self.store.in_zone(zone);

        // Promotion targets decide which other zones we touch
        let mut zones: BTreeSet<ZoneKey> = BTreeSet::new();
        zones.insert(zone.clone());
        for record in &candidates {
            if let Some(copy) = self.promotion_target(&snapshot, zone, &record.volume_id) {
                zones.insert(copy.domain.clone());
            }
        }

        let _claim_guards = self
            .locks
            .claims
            .lock_all(candidates.iter().map(|r| r.claim.clone()))
            .await;
        let _zone_guards = self.locks.zones.lock_all(zones.iter().cloned()).await;

        let locked: BTreeSet<&ClaimKey> = candidates.iter().map(|r| &r.claim).collect();
        let mut promoted = Vec::new();
        let mut remaining = 0usize;

        // Re-read under the locks; records may have moved in or out meanwhile
        for record in self.store.in_zone(zone) {
            if !locked.contains(&record.claim) {
                remaining += 1;
                continue;
            }

            let copy = match self.promotion_target(&snapshot, zone, &record.volume_id) {
                Some(copy) if zones.contains(&copy.domain) => copy.clone(),
                _ => {
                    remaining += 1;
                    continue;
                }
            };

            self.write_selection(&record.claim, &copy).await?;
            // The copy already occupies space on its pool
            self.ledger.release(&record.pool, record.size_bytes);
            self.store
                .update(&record.claim, |r| r.relocate(&copy, MigrationReason::ReplicaPromoted));

            info!(
                "Promoted copy of {} on pool {} while removing zone {}",
                record.volume_id, copy.id, zone
            );
            self.tracker.notify(ZoneEvent::ReplicaPromoted {
                zone: zone.clone(),
                volume_id: record.volume_id.to_string(),
                pool: copy.id.to_string(),
            });
            promoted.push(record.volume_id.to_string());
        }

        if remaining > 0 {
            warn!(
                "Zone {} removal blocked: {} volume(s) still placed there",
                zone, remaining
            );
            return Err(Error::RemovalBlocked {
                zone: zone.to_string(),
                remaining,
            });
        }

        self.tracker.confirm_removed(zone)?;
        Ok(RemovalReport {
            zone: zone.to_string(),
            promoted,
            phase: DomainState::Removed.phase().to_string(),
        })
    }

    /// Accessible copy of a volume outside `zone` in an Active zone, lowest pool id first
    fn promotion_target<'a>(
        &self,
        snapshot: &'a InventorySnapshot,
        zone: &ZoneKey,
        volume: &VolumeId,
    ) -> Option<&'a StoragePool> {
        snapshot.copies_of(volume).find(|pool| {
            pool.accessible
                && &pool.domain != zone
                && self.tracker.state(&pool.domain) == DomainState::Active
        })
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Zones known to inventory or tracker
    pub async fn zones(&self) -> Result<Vec<ZoneView>> {
        let snapshot = self.inventory.snapshot().await?;

        let mut keys: BTreeSet<ZoneKey> = snapshot.domains.keys().cloned().collect();
        keys.extend(self.tracker.list().into_iter().map(|(k, _)| k));

        Ok(keys
            .into_iter()
            .map(|key| {
                let lifecycle = self.tracker.lifecycle(&key);
                let domain = snapshot.domain(&key);
                ZoneView {
                    zone: key.to_string(),
                    phase: lifecycle.state.phase().to_string(),
                    policy: lifecycle.state.removal_policy(),
                    pools: domain
                        .map(|d| d.pools.iter().map(|p| p.to_string()).collect())
                        .unwrap_or_default(),
                    nodes: domain
                        .map(|d| d.nodes.iter().cloned().collect())
                        .unwrap_or_default(),
                    placed_volumes: self.store.in_zone(&key).len(),
                    marked_at: lifecycle.marked_at,
                    removed_at: lifecycle.removed_at,
                }
            })
            .collect())
    }

    pub fn placement(&self, claim: &ClaimKey) -> Option<PlacementRecord> {
        self.store.get(claim)
    }

    /// Capacity per pool as the engine accounts for it
    pub async fn capacity(&self) -> Result<Vec<PoolCapacity>> {
        let snapshot = self.inventory.snapshot().await?;
        let placed = self.store.bytes_per_pool();

        Ok(snapshot
            .pools
            .values()
            .map(|pool| PoolCapacity {
                pool: pool.id.to_string(),
                zone: pool.domain.to_string(),
                total_bytes: pool.total_bytes,
                platform_used_bytes: pool.used_bytes,
                committed_bytes: self.ledger.committed(&pool.id),
                effective_free_bytes: self.ledger.effective_free(pool),
                placed_bytes: placed.get(&pool.id).copied().unwrap_or(0),
                accessible: pool.accessible,
            })
            .collect())
    }

    /// Check that records were rebuilt and the inventory answers
    pub async fn ready(&self) -> bool {
        if !self.restored.load(Ordering::SeqCst) {
            return false;
        }
        match self.inventory.snapshot().await {
            Ok(_) => true,
            Err(e) => {
                warn!("Inventory not ready: {}", e);
                false
            }
        }
    }

    /// Get overall orchestrator status
    pub async fn status(&self) -> OrchestratorStatus {
        let zones = self.tracker.list();
        OrchestratorStatus {
            healthy: !self.shut_down.load(Ordering::SeqCst),
            restored: self.restored.load(Ordering::SeqCst),
            mode: self.config.mode.to_string(),
            flavor: self.config.flavor.to_string(),
            inventory_provider: self.inventory.provider_name().to_string(),
            profile_count: self.catalog.len() as u64,
            placement_count: self.store.len() as u64,
            zones_marked: zones
                .iter()
                .filter(|(_, l)| matches!(l.state, DomainState::MarkedForRemoval(_)))
                .count() as u64,
            zones_removed: zones
                .iter()
                .filter(|(_, l)| l.state == DomainState::Removed)
                .count() as u64,
            inflight_waits: self.annotations.inflight_count() as u64,
            features: self
                .config
                .features
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
        }
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    /// Log out platform sessions; only the first call does anything
    pub async fn shutdown(&self) -> Result<()> {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("Logging out platform sessions");
        self.sessions.logout_all().await
    }
}

/// Volume backing a claim: the bound volume, else an id derived from the claim
fn volume_id_for(spec: &ClaimSpec) -> VolumeId {
    spec.volume_name
        .clone()
        .map(VolumeId::new)
        .unwrap_or_else(|| {
            VolumeId::new(format!("pvc-{}-{}", spec.claim.namespace, spec.claim.name))
        })
}

/// Orchestrator status summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorStatus {
    pub healthy: bool,
    pub restored: bool,
    pub mode: String,
    pub flavor: String,
    pub inventory_provider: String,
    pub profile_count: u64,
    pub placement_count: u64,
    pub zones_marked: u64,
    pub zones_removed: u64,
    pub inflight_waits: u64,
    pub features: std::collections::BTreeMap<String, bool>,
}

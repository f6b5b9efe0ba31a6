//! Placement Engine
//!
//! Chooses the pool that hosts a new claim. Candidate ranking is a pure
//! function of a snapshot, the ledger and the zone states; the commit step
//! then walks the ranking under zone locks until a reservation sticks.

use crate::annotation::AnnotationReconciler;
use crate::domain::model::{
    AccessibilityRequirement, AnnotationSubject, BindingMode, ClaimKey, PlacementRecord, PoolId,
    StoragePool, StorageProfile, VolumeId, ZoneKey, ANNOTATION_SELECTED_POOL,
    ANNOTATION_SELECTED_ZONE,
};
use crate::domain::ports::InventoryProviderRef;
use crate::error::{Error, Result};
use crate::inventory::{CapacityLedger, InventorySnapshot};
use crate::locks::EngineLocks;
use crate::placement::PlacementStore;
use crate::topology::ZoneLifecycleTracker;
use chrono::Utc;
use serde::Serialize;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, info, warn};

// =============================================================================
// Request & Outcome
// =============================================================================

/// A claim asking for a pool
#[derive(Debug, Clone)]
pub struct PlacementRequest {
    pub claim: ClaimKey,
    pub volume_id: VolumeId,
    pub profile: StorageProfile,
    pub requirement: AccessibilityRequirement,
    pub size_bytes: u64,
}

/// Result of a placement call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum PlacementOutcome {
    /// Default platform scheduling applies; nothing was recorded
    NoOpRequired,
    #[serde(rename_all = "camelCase")]
    Placed {
        pool: PoolId,
        domain: ZoneKey,
        /// False when an existing record was returned
        created: bool,
    },
}

// =============================================================================
// Candidate Ranking
// =============================================================================

/// Compare pools by utilization (effective used / total), then by id
fn by_utilization(ledger: &CapacityLedger, a: &StoragePool, b: &StoragePool) -> Ordering {
    let lhs = ledger.effective_used(a) as u128 * b.total_bytes as u128;
    let rhs = ledger.effective_used(b) as u128 * a.total_bytes as u128;
    lhs.cmp(&rhs).then_with(|| a.id.cmp(&b.id))
}

/// Eligible pools for a claim, least-loaded first
///
/// When any eligible pool lies in a zone matching a preferred term, only
/// those pools are returned.
pub fn rank_candidates(
    snapshot: &InventorySnapshot,
    ledger: &CapacityLedger,
    profile: &StorageProfile,
    requirement: &AccessibilityRequirement,
    size_bytes: u64,
    floor_bytes: u64,
    is_active: impl Fn(&ZoneKey) -> bool,
) -> Vec<StoragePool> {
    let needed = size_bytes.saturating_add(floor_bytes);

    let eligible: Vec<(&StoragePool, bool)> = snapshot
        .pools
        .values()
        .filter(|pool| pool.accessible && pool.total_bytes > 0)
        .filter(|pool| profile.accepts_pool(pool) && profile.accepts_zone(&pool.domain))
        .filter(|pool| is_active(&pool.domain))
        .filter(|pool| ledger.effective_free(pool) >= needed)
        .filter_map(|pool| {
            let domain = snapshot.domain_of(pool)?;
            requirement
                .admits(domain)
                .then(|| (pool, requirement.prefers(domain)))
        })
        .collect();

    let any_preferred = eligible.iter().any(|(_, preferred)| *preferred);
    let mut ranked: Vec<StoragePool> = eligible
        .into_iter()
        .filter(|(_, preferred)| !any_preferred || *preferred)
        .map(|(pool, _)| pool.clone())
        .collect();

    ranked.sort_by(|a, b| by_utilization(ledger, a, b));
    ranked
}

// =============================================================================
// Placement Engine
// =============================================================================

/// Selects and commits a pool for each claim
pub struct PlacementEngine {
    inventory: InventoryProviderRef,
    tracker: Arc<ZoneLifecycleTracker>,
    ledger: Arc<CapacityLedger>,
    store: Arc<PlacementStore>,
    annotations: Arc<AnnotationReconciler>,
    locks: Arc<EngineLocks>,
    /// Bytes that must stay free on a pool after placement
    floor_bytes: u64,
}

impl PlacementEngine {
    pub fn new(
        inventory: InventoryProviderRef,
        tracker: Arc<ZoneLifecycleTracker>,
        ledger: Arc<CapacityLedger>,
        store: Arc<PlacementStore>,
        annotations: Arc<AnnotationReconciler>,
        locks: Arc<EngineLocks>,
        floor_bytes: u64,
    ) -> Arc<Self> {
        Arc::new(Self {
            inventory,
            tracker,
            ledger,
            store,
            annotations,
            locks,
            floor_bytes,
        })
    }

    /// Place a claim, or return its existing placement
    pub async fn place(&self, request: &PlacementRequest) -> Result<PlacementOutcome> {
        if !request.profile.requires_pool_placement {
            debug!(
                "Profile {} does not require pool placement, skipping {}",
                request.profile.name, request.claim
            );
            return Ok(PlacementOutcome::NoOpRequired);
        }

        let _claim_guard = self.locks.claims.lock(request.claim.clone()).await;

        if let Some(existing) = self.store.get(&request.claim) {
            debug!(
                "Claim {} already placed on pool {}",
                request.claim, existing.pool
            );
            return Ok(PlacementOutcome::Placed {
                pool: existing.pool,
                domain: existing.domain,
                created: false,
            });
        }

        if request.profile.binding_mode == BindingMode::WaitForFirstConsumer
            && request.requirement.requisite.is_empty()
        {
            return Err(Error::ApiValidation(format!(
                "claim {} uses WaitForFirstConsumer profile {} but carries no topology requirement",
                request.claim, request.profile.name
            )));
        }

        let snapshot = self.inventory.snapshot().await?;
        let candidates = rank_candidates(
            &snapshot,
            &self.ledger,
            &request.profile,
            &request.requirement,
            request.size_bytes,
            self.floor_bytes,
            |zone| self.tracker.is_placement_eligible(zone),
        );

        if candidates.is_empty() {
            warn!(
                "No eligible pool for claim {} ({} bytes, profile {})",
                request.claim, request.size_bytes, request.profile.name
            );
            return Err(Error::Infeasible {
                subject: request.claim.to_string(),
                reason: format!(
                    "no accessible pool in an active zone matches profile {} and the topology requirement with {} bytes free",
                    request.profile.name,
                    request.size_bytes.saturating_add(self.floor_bytes)
                ),
            });
        }

        debug!(
            "Claim {}: {} candidate pool(s), best {}",
            request.claim,
            candidates.len(),
            candidates[0].id
        );

        for pool in &candidates {
            let _zone_guard = self.locks.zones.lock(pool.domain.clone()).await;

            // The zone may have been marked while we were ranking
            if !self.tracker.is_placement_eligible(&pool.domain) {
                continue;
            }
            if let Err(e) = self
                .ledger
                .try_reserve(pool, request.size_bytes, self.floor_bytes)
            {
                debug!("Skipping pool {}: {}", pool.id, e);
                continue;
            }

            if let Err(e) = self.write_decision(&request.claim, pool).await {
                self.ledger.release(&pool.id, request.size_bytes);
                warn!(
                    "Failed to record placement of {} on {}: {}",
                    request.claim, pool.id, e
                );
                return Err(e);
            }

            self.store.insert(PlacementRecord {
                claim: request.claim.clone(),
                volume_id: request.volume_id.clone(),
                profile: request.profile.clone(),
                requirement: request.requirement.clone(),
                size_bytes: request.size_bytes,
                pool: pool.id.clone(),
                domain: pool.domain.clone(),
                placed_at: Utc::now(),
                history: Vec::new(),
            });

            info!(
                "Placed claim {} ({} bytes) on pool {} in zone {}",
                request.claim, request.size_bytes, pool.id, pool.domain
            );
            return Ok(PlacementOutcome::Placed {
                pool: pool.id.clone(),
                domain: pool.domain.clone(),
                created: true,
            });
        }

        Err(Error::Infeasible {
            subject: request.claim.to_string(),
            reason: format!(
                "all {} candidate pool(s) were filled or left placement eligibility concurrently",
                candidates.len()
            ),
        })
    }

    async fn write_decision(&self, claim: &ClaimKey, pool: &StoragePool) -> Result<()> {
        let subject = AnnotationSubject::claim(claim);
        self.annotations
            .set(&subject, ANNOTATION_SELECTED_POOL, pool.id.as_str())
            .await?;
        self.annotations
            .set(&subject, ANNOTATION_SELECTED_ZONE, &pool.domain.value)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controlplane::memory::InMemoryControlPlane;
    use crate::controlplane::platform::memory::InMemoryPlatform;
    use crate::domain::model::{RemovalPolicy, TopologyTerm};
    use assert_matches::assert_matches;
    use std::time::Duration;

    const ZONE: &str = "topology.kubernetes.io/zone";

    fn zone(value: &str) -> ZoneKey {
        ZoneKey::new(ZONE, value)
    }

    struct Fixture {
        platform: Arc<InMemoryPlatform>,
        control_plane: Arc<InMemoryControlPlane>,
        tracker: Arc<ZoneLifecycleTracker>,
        ledger: Arc<CapacityLedger>,
        store: Arc<PlacementStore>,
        engine: Arc<PlacementEngine>,
    }

    fn fixture(snapshot: InventorySnapshot) -> Fixture {
        let platform = InMemoryPlatform::new(snapshot);
        let control_plane = InMemoryControlPlane::new();
        let tracker = ZoneLifecycleTracker::new();
        let ledger = CapacityLedger::new();
        let store = PlacementStore::new();
        let annotations = AnnotationReconciler::new(
            control_plane.clone(),
            Duration::from_millis(100),
            Duration::from_secs(5),
        );
        let engine = PlacementEngine::new(
            platform.clone(),
            tracker.clone(),
            ledger.clone(),
            store.clone(),
            annotations,
            EngineLocks::new(),
            0,
        );
        Fixture {
            platform,
            control_plane,
            tracker,
            ledger,
            store,
            engine,
        }
    }

    fn three_zones() -> InventorySnapshot {
        InventorySnapshot::new()
            .with_pool(StoragePool::new("ds-a", zone("zone-1"), 100, 60).with_tag("shared"))
            .with_pool(StoragePool::new("ds-b", zone("zone-2"), 100, 20).with_tag("shared"))
            .with_pool(StoragePool::new("ds-c", zone("zone-3"), 100, 95).with_tag("shared"))
    }

    fn request(name: &str, size: u64, requirement: AccessibilityRequirement) -> PlacementRequest {
        PlacementRequest {
            claim: ClaimKey::new("default", name),
            volume_id: VolumeId::new(format!("pvc-{}", name)),
            profile: StorageProfile::new("shared").with_tag("shared"),
            requirement,
            size_bytes: size,
        }
    }

    #[test]
    fn test_ranking_least_loaded_then_id() {
        let snapshot = InventorySnapshot::new()
            .with_pool(StoragePool::new("ds-2", zone("zone-1"), 200, 50))
            .with_pool(StoragePool::new("ds-1", zone("zone-1"), 100, 25))
            .with_pool(StoragePool::new("ds-3", zone("zone-2"), 100, 10));
        let ledger = CapacityLedger::new();

        let ranked = rank_candidates(
            &snapshot,
            &ledger,
            &StorageProfile::new("any"),
            &AccessibilityRequirement::default(),
            5,
            0,
            |_| true,
        );
        let ids: Vec<&str> = ranked.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["ds-3", "ds-1", "ds-2"]);
    }

    #[test]
    fn test_preferred_terms_restrict_candidates() {
        let snapshot = three_zones();
        let ledger = CapacityLedger::new();
        let requirement = AccessibilityRequirement {
            requisite: vec![
                TopologyTerm::zone(&zone("zone-1")),
                TopologyTerm::zone(&zone("zone-2")),
            ],
            preferred: vec![TopologyTerm::zone(&zone("zone-1"))],
        };

        let ranked = rank_candidates(
            &snapshot,
            &ledger,
            &StorageProfile::new("shared"),
            &requirement,
            10,
            0,
            |_| true,
        );
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].id.as_str(), "ds-a");
    }

    #[tokio::test]
    async fn test_placement_is_idempotent() {
        let f = fixture(three_zones());
        let req = request("data-0", 10, AccessibilityRequirement::default());

        let first = f.engine.place(&req).await.unwrap();
        let second = f.engine.place(&req).await.unwrap();

        assert_matches!(first, PlacementOutcome::Placed { ref pool, created: true, .. } if pool.as_str() == "ds-b");
        assert_matches!(second, PlacementOutcome::Placed { ref pool, created: false, .. } if pool.as_str() == "ds-b");
        assert_eq!(f.store.len(), 1);
        assert_eq!(f.ledger.committed(&PoolId::new("ds-b")), 30);

        let subject = AnnotationSubject::claim(&req.claim);
        assert_eq!(
            f.control_plane.annotation(&subject, ANNOTATION_SELECTED_ZONE),
            Some("zone-2".to_string())
        );
    }

    #[tokio::test]
    async fn test_concurrent_placement_of_one_claim_creates_one_record() {
        let f = fixture(three_zones());
        let req = request("data-0", 10, AccessibilityRequirement::default());

        let results = futures::future::join_all((0..8).map(|_| f.engine.place(&req))).await;
        let created = results
            .iter()
            .filter(|r| matches!(r, Ok(PlacementOutcome::Placed { created: true, .. })))
            .count();

        assert_eq!(created, 1);
        assert_eq!(f.store.len(), 1);
        assert_eq!(f.ledger.committed(&PoolId::new("ds-b")), 30);
    }

    #[tokio::test]
    async fn test_zone_without_capacity_is_infeasible() {
        let f = fixture(three_zones());
        let req = request(
            "data-0",
            10,
            AccessibilityRequirement::zones([&zone("zone-3")]),
        );

        let err = f.engine.place(&req).await.unwrap_err();
        assert!(err.is_infeasible());
        assert!(f.store.get(&req.claim).is_none());
        assert!(f.ledger.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_marked_zone_excluded_from_placement() {
        let f = fixture(three_zones());
        f.tracker
            .mark_for_removal(&zone("zone-2"), RemovalPolicy::EnsureAccessibility)
            .unwrap();

        let outcome = f
            .engine
            .place(&request("data-0", 10, AccessibilityRequirement::default()))
            .await
            .unwrap();
        assert_matches!(outcome, PlacementOutcome::Placed { ref pool, .. } if pool.as_str() == "ds-a");
    }

    #[tokio::test]
    async fn test_profile_without_pool_placement_is_noop() {
        let f = fixture(three_zones());
        let mut req = request("data-0", 10, AccessibilityRequirement::default());
        req.profile.requires_pool_placement = false;

        assert_eq!(f.engine.place(&req).await.unwrap(), PlacementOutcome::NoOpRequired);
        assert!(f.store.is_empty());
    }

    #[tokio::test]
    async fn test_wait_for_first_consumer_needs_topology() {
        let f = fixture(three_zones());
        let mut req = request("data-0", 10, AccessibilityRequirement::default());
        req.profile.binding_mode = BindingMode::WaitForFirstConsumer;

        assert_matches!(f.engine.place(&req).await, Err(Error::ApiValidation(_)));

        req.requirement = AccessibilityRequirement::zones([&zone("zone-1")]);
        assert_matches!(
            f.engine.place(&req).await,
            Ok(PlacementOutcome::Placed { ref pool, .. }) if pool.as_str() == "ds-a"
        );
    }

    #[tokio::test]
    async fn test_annotation_failure_leaves_no_trace() {
        let f = fixture(three_zones());
        f.control_plane.fail_writes(true);
        let req = request("data-0", 10, AccessibilityRequirement::default());

        assert_matches!(
            f.engine.place(&req).await,
            Err(Error::TransportFailure { .. })
        );
        assert!(f.store.is_empty());

        let ds_b = f.platform.pool(&PoolId::new("ds-b")).unwrap();
        assert_eq!(f.ledger.effective_free(&ds_b), 80);
    }

    #[tokio::test]
    async fn test_capacity_never_overcommitted() {
        let f = fixture(
            InventorySnapshot::new()
                .with_pool(StoragePool::new("ds-1", zone("zone-1"), 100, 0))
                .with_pool(StoragePool::new("ds-2", zone("zone-2"), 100, 0)),
        );

        let requests: Vec<_> = (0..30)
            .map(|i| {
                let mut req = request(&format!("data-{}", i), 10, AccessibilityRequirement::default());
                req.profile = StorageProfile::new("any");
                req
            })
            .collect();
        let results = futures::future::join_all(requests.iter().map(|r| f.engine.place(r))).await;

        let placed = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(placed, 20);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| e.is_infeasible()));
        for (_, bytes) in f.store.bytes_per_pool() {
            assert!(bytes <= 100);
        }
    }
}

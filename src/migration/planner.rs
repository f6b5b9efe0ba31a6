//! Migration Planner
//!
//! Computes where the volumes of a decommissioned pool or zone should go.
//! Planning is a pure computation over a snapshot, the ledger, the zone
//! states and the placement records; the returned plan is advisory and never
//! persisted.
//!
//! Assignment is greedy best-fit: largest volumes first, each onto the
//! destination whose remaining capacity fits it most tightly.

use crate::domain::model::{
    ClaimKey, DomainState, PlacementRecord, PoolId, RemovalPolicy, StoragePool, VolumeId, ZoneKey,
};
use crate::error::{Error, Result};
use crate::inventory::{CapacityLedger, InventorySnapshot};
use crate::topology::ZoneLifecycleTracker;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

// =============================================================================
// Plan Types
// =============================================================================

/// What is being decommissioned
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PlanTarget {
    Pool { id: PoolId },
    Domain { key: ZoneKey },
}

impl std::fmt::Display for PlanTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlanTarget::Pool { id } => write!(f, "pool {}", id),
            PlanTarget::Domain { key } => write!(f, "zone {}", key),
        }
    }
}

/// Whether every affected volume found a destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlanStatus {
    Complete,
    PartialCapacityExhausted,
}

/// One volume move
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationAssignment {
    pub volume_id: VolumeId,
    pub claim: ClaimKey,
    pub size_bytes: u64,
    pub source: PoolId,
    pub destination: PoolId,
}

/// A volume no destination could take
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnplacedVolume {
    pub volume_id: VolumeId,
    pub claim: ClaimKey,
    pub size_bytes: u64,
    pub source: PoolId,
}

/// Decommission plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationPlan {
    pub target: PlanTarget,
    /// Effective policy after combining the request with the zone state
    pub policy: RemovalPolicy,
    pub assignments: Vec<MigrationAssignment>,
    pub unplaced: Vec<UnplacedVolume>,
    pub status: PlanStatus,
    pub computed_at: DateTime<Utc>,
}

impl MigrationPlan {
    /// Volume -> destination pool, in assignment order
    pub fn mapping(&self) -> IndexMap<String, String> {
        self.assignments
            .iter()
            .map(|a| (a.volume_id.to_string(), a.destination.to_string()))
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.status == PlanStatus::Complete
    }
}

// =============================================================================
// Planning
// =============================================================================

/// Source pools and the zones they belong to for a target
fn resolve_sources(snapshot: &InventorySnapshot, target: &PlanTarget) -> Result<Vec<StoragePool>> {
    match target {
        PlanTarget::Pool { id } => snapshot
            .pool(id)
            .cloned()
            .map(|p| vec![p])
            .ok_or_else(|| Error::StaleState {
                kind: "StoragePool".to_string(),
                name: id.to_string(),
            }),
        PlanTarget::Domain { key } => {
            if snapshot.domain(key).is_none() {
                return Err(Error::StaleState {
                    kind: "TopologyDomain".to_string(),
                    name: key.to_string(),
                });
            }
            Ok(snapshot.pools_in(key).cloned().collect())
        }
    }
}

/// Whether the volume has an accessible copy outside the sources on an Active zone
pub fn has_alternate_copy(
    snapshot: &InventorySnapshot,
    tracker: &ZoneLifecycleTracker,
    volume: &VolumeId,
    sources: &[PoolId],
) -> bool {
    snapshot.copies_of(volume).any(|pool| {
        pool.accessible
            && !sources.contains(&pool.id)
            && tracker.state(&pool.domain) == DomainState::Active
    })
}

/// Whether `pool` may receive the record's volume
fn accepts(
    snapshot: &InventorySnapshot,
    tracker: &ZoneLifecycleTracker,
    record: &PlacementRecord,
    pool: &StoragePool,
) -> bool {
    if !record.profile.accepts_pool(pool) || !record.profile.accepts_zone(&pool.domain) {
        return false;
    }
    if tracker.is_removed(&pool.domain) {
        return false;
    }
    match snapshot.domain_of(pool) {
        Some(domain) => record.requirement.admits(domain),
        None => false,
    }
}

/// Compute a decommission plan
///
/// `records` are the engine's placement records; only those placed on the
/// target's pools are considered.
pub fn plan(
    snapshot: &InventorySnapshot,
    ledger: &CapacityLedger,
    tracker: &ZoneLifecycleTracker,
    records: &[PlacementRecord],
    target: &PlanTarget,
    requested: RemovalPolicy,
) -> Result<MigrationPlan> {
    let sources = resolve_sources(snapshot, target)?;
    let source_ids: Vec<PoolId> = sources.iter().map(|p| p.id.clone()).collect();

    let policy = sources
        .iter()
        .filter_map(|p| tracker.state(&p.domain).removal_policy())
        .fold(requested, RemovalPolicy::stricter);
    if policy != requested {
        debug!(
            "Plan for {} uses zone policy {} over requested {}",
            target, policy, requested
        );
    }

    let mut affected: Vec<&PlacementRecord> = records
        .iter()
        .filter(|r| source_ids.contains(&r.pool))
        .filter(|r| match policy {
            RemovalPolicy::EvacuateAll => true,
            RemovalPolicy::EnsureAccessibility => {
                !has_alternate_copy(snapshot, tracker, &r.volume_id, &source_ids)
            }
        })
        .collect();
    affected.sort_by(|a, b| {
        b.size_bytes
            .cmp(&a.size_bytes)
            .then_with(|| a.volume_id.cmp(&b.volume_id))
    });

    let destinations: Vec<&StoragePool> = snapshot
        .pools
        .values()
        .filter(|p| p.accessible && !source_ids.contains(&p.id))
        .filter(|p| !tracker.is_removed(&p.domain))
        .collect();
    let mut remaining: BTreeMap<PoolId, u64> = destinations
        .iter()
        .map(|p| (p.id.clone(), ledger.effective_free(p)))
        .collect();

    let mut assignments = Vec::new();
    let mut unplaced = Vec::new();

    for record in affected {
        let best = destinations
            .iter()
            .filter(|p| accepts(snapshot, tracker, record, p))
            .filter_map(|p| {
                let free = remaining.get(&p.id).copied().unwrap_or(0);
                (free >= record.size_bytes).then_some((free, &p.id))
            })
            .min_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)))
            .map(|(_, id)| id.clone());

        match best {
            Some(destination) => {
                if let Some(free) = remaining.get_mut(&destination) {
                    *free -= record.size_bytes;
                }
                assignments.push(MigrationAssignment {
                    volume_id: record.volume_id.clone(),
                    claim: record.claim.clone(),
                    size_bytes: record.size_bytes,
                    source: record.pool.clone(),
                    destination,
                });
            }
            None => unplaced.push(UnplacedVolume {
                volume_id: record.volume_id.clone(),
                claim: record.claim.clone(),
                size_bytes: record.size_bytes,
                source: record.pool.clone(),
            }),
        }
    }

    let status = if unplaced.is_empty() {
        PlanStatus::Complete
    } else {
        warn!(
            "Plan for {}: {} volume(s) have no destination with enough capacity",
            target,
            unplaced.len()
        );
        PlanStatus::PartialCapacityExhausted
    };

    info!(
        "Computed {:?} plan for {} under {}: {} move(s)",
        status,
        target,
        policy,
        assignments.len()
    );

    Ok(MigrationPlan {
        target: target.clone(),
        policy,
        assignments,
        unplaced,
        status,
        computed_at: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{AccessibilityRequirement, StorageProfile};
    use assert_matches::assert_matches;

    fn zone(value: &str) -> ZoneKey {
        ZoneKey::new("topology.kubernetes.io/zone", value)
    }

    fn record(volume: &str, size: u64, pool: &str, domain: &str) -> PlacementRecord {
        PlacementRecord {
            claim: ClaimKey::new("default", format!("claim-{}", volume)),
            volume_id: VolumeId::new(volume),
            profile: StorageProfile::new("shared"),
            requirement: AccessibilityRequirement::default(),
            size_bytes: size,
            pool: PoolId::new(pool),
            domain: zone(domain),
            placed_at: Utc::now(),
            history: Vec::new(),
        }
    }

    fn zone_with_two_pools() -> InventorySnapshot {
        InventorySnapshot::new()
            .with_pool(StoragePool::new("P1", zone("z"), 100, 80))
            .with_pool(StoragePool::new("P2", zone("z"), 100, 10))
    }

    #[test]
    fn test_drain_p1_into_p2_largest_first() {
        let snapshot = zone_with_two_pools();
        let ledger = CapacityLedger::new();
        let tracker = ZoneLifecycleTracker::new();
        let records = vec![
            record("v5", 5, "P1", "z"),
            record("v20", 20, "P1", "z"),
            record("v15", 15, "P1", "z"),
        ];

        let plan = plan(
            &snapshot,
            &ledger,
            &tracker,
            &records,
            &PlanTarget::Pool {
                id: PoolId::new("P1"),
            },
            RemovalPolicy::EnsureAccessibility,
        )
        .unwrap();

        assert_eq!(plan.status, PlanStatus::Complete);
        let order: Vec<(&str, &str)> = plan
            .assignments
            .iter()
            .map(|a| (a.volume_id.as_str(), a.destination.as_str()))
            .collect();
        assert_eq!(order, vec![("v20", "P2"), ("v15", "P2"), ("v5", "P2")]);
        assert_eq!(
            plan.mapping().keys().cloned().collect::<Vec<_>>(),
            vec!["v20", "v15", "v5"]
        );
    }

    #[test]
    fn test_ensure_accessibility_skips_redundant_volumes() {
        let snapshot = zone_with_two_pools()
            .with_pool(StoragePool::new("Q1", zone("other"), 100, 0))
            .with_replica("v20", "P1")
            .with_replica("v20", "Q1");
        let ledger = CapacityLedger::new();
        let tracker = ZoneLifecycleTracker::new();
        let records = vec![record("v20", 20, "P1", "z"), record("v5", 5, "P1", "z")];
        let target = PlanTarget::Pool {
            id: PoolId::new("P1"),
        };

        let ensure = plan(
            &snapshot,
            &ledger,
            &tracker,
            &records,
            &target,
            RemovalPolicy::EnsureAccessibility,
        )
        .unwrap();
        assert_eq!(ensure.assignments.len(), 1);
        assert_eq!(ensure.assignments[0].volume_id.as_str(), "v5");

        let evacuate = plan(
            &snapshot,
            &ledger,
            &tracker,
            &records,
            &target,
            RemovalPolicy::EvacuateAll,
        )
        .unwrap();
        assert_eq!(evacuate.assignments.len(), 2);
        assert!(evacuate.is_complete());
    }

    #[test]
    fn test_copy_in_marked_zone_does_not_count() {
        let snapshot = zone_with_two_pools()
            .with_pool(StoragePool::new("Q1", zone("other"), 100, 0))
            .with_replica("v20", "Q1");
        let ledger = CapacityLedger::new();
        let tracker = ZoneLifecycleTracker::new();
        tracker
            .mark_for_removal(&zone("other"), RemovalPolicy::EnsureAccessibility)
            .unwrap();
        let records = vec![record("v20", 20, "P1", "z")];

        let plan = plan(
            &snapshot,
            &ledger,
            &tracker,
            &records,
            &PlanTarget::Pool {
                id: PoolId::new("P1"),
            },
            RemovalPolicy::EnsureAccessibility,
        )
        .unwrap();
        assert_eq!(plan.assignments.len(), 1);
    }

    #[test]
    fn test_zone_policy_overrides_weaker_request() {
        let snapshot = zone_with_two_pools()
            .with_pool(StoragePool::new("Q1", zone("other"), 100, 0))
            .with_replica("v20", "Q1");
        let ledger = CapacityLedger::new();
        let tracker = ZoneLifecycleTracker::new();
        tracker
            .mark_for_removal(&zone("z"), RemovalPolicy::EvacuateAll)
            .unwrap();
        let records = vec![record("v20", 20, "P1", "z")];

        let plan = plan(
            &snapshot,
            &ledger,
            &tracker,
            &records,
            &PlanTarget::Domain { key: zone("z") },
            RemovalPolicy::EnsureAccessibility,
        )
        .unwrap();
        assert_eq!(plan.policy, RemovalPolicy::EvacuateAll);
        assert_eq!(plan.assignments.len(), 1);
        assert_eq!(plan.assignments[0].destination.as_str(), "Q1");
    }

    #[test]
    fn test_evacuate_all_assigns_or_reports_every_volume() {
        let snapshot = InventorySnapshot::new()
            .with_pool(StoragePool::new("P1", zone("z1"), 100, 0))
            .with_pool(StoragePool::new("P2", zone("z2"), 50, 20))
            .with_pool(StoragePool::new("P3", zone("z3"), 40, 0));
        let ledger = CapacityLedger::new();
        let tracker = ZoneLifecycleTracker::new();
        let records = vec![
            record("a", 30, "P1", "z1"),
            record("b", 25, "P1", "z1"),
            record("c", 20, "P1", "z1"),
            record("d", 10, "P1", "z1"),
        ];

        let plan = plan(
            &snapshot,
            &ledger,
            &tracker,
            &records,
            &PlanTarget::Domain { key: zone("z1") },
            RemovalPolicy::EvacuateAll,
        )
        .unwrap();

        assert_eq!(plan.assignments.len() + plan.unplaced.len(), records.len());
        assert_eq!(plan.status, PlanStatus::PartialCapacityExhausted);
        assert_eq!(plan.unplaced.len(), 1);
        assert_eq!(plan.unplaced[0].volume_id.as_str(), "c");

        let mut used: BTreeMap<&str, u64> = BTreeMap::new();
        for a in &plan.assignments {
            *used.entry(a.destination.as_str()).or_default() += a.size_bytes;
        }
        assert!(used.get("P2").copied().unwrap_or(0) <= 30);
        assert!(used.get("P3").copied().unwrap_or(0) <= 40);
    }

    #[test]
    fn test_removed_zone_is_never_a_destination() {
        let snapshot = zone_with_two_pools()
            .with_pool(StoragePool::new("R1", zone("gone"), 1000, 0))
            .with_pool(StoragePool::new("M1", zone("marked"), 1000, 0));
        let ledger = CapacityLedger::new();
        let tracker = ZoneLifecycleTracker::new();
        tracker
            .mark_for_removal(&zone("gone"), RemovalPolicy::EvacuateAll)
            .unwrap();
        tracker.confirm_removed(&zone("gone")).unwrap();
        tracker
            .mark_for_removal(&zone("marked"), RemovalPolicy::EvacuateAll)
            .unwrap();

        let records = vec![record("v", 95, "P1", "z")];
        let plan = plan(
            &snapshot,
            &ledger,
            &tracker,
            &records,
            &PlanTarget::Pool {
                id: PoolId::new("P1"),
            },
            RemovalPolicy::EvacuateAll,
        )
        .unwrap();

        assert_eq!(plan.assignments[0].destination.as_str(), "M1");
    }

    #[test]
    fn test_plan_is_deterministic() {
        let snapshot = InventorySnapshot::new()
            .with_pool(StoragePool::new("P1", zone("z1"), 100, 0))
            .with_pool(StoragePool::new("B", zone("z2"), 100, 50))
            .with_pool(StoragePool::new("A", zone("z2"), 100, 50));
        let ledger = CapacityLedger::new();
        let tracker = ZoneLifecycleTracker::new();
        let records = vec![record("x", 10, "P1", "z1"), record("y", 10, "P1", "z1")];
        let target = PlanTarget::Pool {
            id: PoolId::new("P1"),
        };

        let first = plan(&snapshot, &ledger, &tracker, &records, &target, RemovalPolicy::EvacuateAll)
            .unwrap();
        let second = plan(&snapshot, &ledger, &tracker, &records, &target, RemovalPolicy::EvacuateAll)
            .unwrap();

        assert_eq!(first.assignments, second.assignments);
        // Equal fit breaks ties by pool id; A then becomes the tighter fit
        assert_eq!(first.mapping().get("x").map(String::as_str), Some("A"));
        assert_eq!(first.mapping().get("y").map(String::as_str), Some("A"));
    }

    #[test]
    fn test_unknown_target_is_stale() {
        let snapshot = zone_with_two_pools();
        let result = plan(
            &snapshot,
            &CapacityLedger::new(),
            &ZoneLifecycleTracker::new(),
            &[],
            &PlanTarget::Pool {
                id: PoolId::new("nope"),
            },
            RemovalPolicy::EvacuateAll,
        );
        assert_matches!(result, Err(Error::StaleState { .. }));
    }
}

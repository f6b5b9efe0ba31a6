//! Zone Lifecycle Tracker
//!
//! Owns the decommission state of every topology domain:
//!
//! ```text
//!   Active ──mark(policy)──▶ MarkedForRemoval(policy) ──confirm──▶ Removed
//!                                 │  ▲
//!                                 └──┘ mark(stricter policy)
//! ```
//!
//! Zones never seen by the tracker are `Active`. Each transition runs under
//! the map's entry lock, so two concurrent marks observe each other and the
//! stricter policy always wins.

use super::ZoneEvent;
use crate::domain::model::{DomainState, RemovalPolicy, ZoneKey};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Lifecycle of a single zone
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainLifecycle {
    pub state: DomainState,
    pub marked_at: Option<DateTime<Utc>>,
    pub removed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl DomainLifecycle {
    fn active() -> Self {
        Self {
            state: DomainState::Active,
            marked_at: None,
            removed_at: None,
            updated_at: Utc::now(),
        }
    }
}

/// Zone lifecycle tracker
pub struct ZoneLifecycleTracker {
    /// Lifecycle per zone; absent means Active
    zones: DashMap<ZoneKey, DomainLifecycle>,
    /// Event broadcaster
    event_sender: broadcast::Sender<ZoneEvent>,
}

impl ZoneLifecycleTracker {
    pub fn new() -> Arc<Self> {
        let (event_sender, _) = broadcast::channel(1024);
        Arc::new(Self {
            zones: DashMap::new(),
            event_sender,
        })
    }

    /// Subscribe to zone events
    pub fn subscribe(&self) -> broadcast::Receiver<ZoneEvent> {
        self.event_sender.subscribe()
    }

    pub fn state(&self, zone: &ZoneKey) -> DomainState {
        self.zones
            .get(zone)
            .map(|l| l.state)
            .unwrap_or(DomainState::Active)
    }

    pub fn lifecycle(&self, zone: &ZoneKey) -> DomainLifecycle {
        self.zones
            .get(zone)
            .map(|l| l.clone())
            .unwrap_or_else(DomainLifecycle::active)
    }

    /// Only Active zones accept new placements
    pub fn is_placement_eligible(&self, zone: &ZoneKey) -> bool {
        self.state(zone) == DomainState::Active
    }

    /// Removed zones are never migration destinations
    pub fn is_removed(&self, zone: &ZoneKey) -> bool {
        self.state(zone) == DomainState::Removed
    }

    /// Mark a zone for removal, or upgrade the policy of an already marked zone
    ///
    /// Marking is idempotent. A weaker policy never replaces a stricter one.
    pub fn mark_for_removal(&self, zone: &ZoneKey, policy: RemovalPolicy) -> Result<DomainState> {
        let now = Utc::now();
        let mut entry = self
            .zones
            .entry(zone.clone())
            .or_insert_with(DomainLifecycle::active);

        let current_state = entry.state;
        let event = match current_state {
            DomainState::Active => {
                entry.state = DomainState::MarkedForRemoval(policy);
                entry.marked_at = Some(now);
                entry.updated_at = now;
                info!("Zone {} marked for removal with policy {}", zone, policy);
                Some(ZoneEvent::MarkedForRemoval {
                    zone: zone.clone(),
                    policy,
                })
            }
            DomainState::MarkedForRemoval(current) => {
                let effective = current.stricter(policy);
                if effective != current {
                    entry.state = DomainState::MarkedForRemoval(effective);
                    entry.updated_at = now;
                    info!(
                        "Zone {} removal policy upgraded: {} -> {}",
                        zone, current, effective
                    );
                    Some(ZoneEvent::PolicyUpgraded {
                        zone: zone.clone(),
                        from: current,
                        to: effective,
                    })
                } else {
                    debug!("Zone {} already marked with policy {}", zone, current);
                    None
                }
            }
            DomainState::Removed => {
                return Err(Error::InvalidZoneTransition {
                    zone: zone.to_string(),
                    from: DomainState::Removed.to_string(),
                    to: DomainState::MarkedForRemoval(policy).to_string(),
                });
            }
        };

        let state = entry.state;
        drop(entry);

        if let Some(event) = event {
            let _ = self.event_sender.send(event);
        }
        Ok(state)
    }

    /// Confirm a marked zone as removed
    ///
    /// Callers must have verified that no placement still depends on the zone.
    pub fn confirm_removed(&self, zone: &ZoneKey) -> Result<()> {
        let now = Utc::now();
        let mut entry = self
            .zones
            .entry(zone.clone())
            .or_insert_with(DomainLifecycle::active);

        let current_state = entry.state;
        match current_state {
            DomainState::MarkedForRemoval(_) => {
                entry.state = DomainState::Removed;
                entry.removed_at = Some(now);
                entry.updated_at = now;
            }
            DomainState::Removed => return Ok(()),
            DomainState::Active => {
                return Err(Error::InvalidZoneTransition {
                    zone: zone.to_string(),
                    from: DomainState::Active.to_string(),
                    to: DomainState::Removed.to_string(),
                });
            }
        }
        drop(entry);

        info!("Zone {} removed", zone);
        let _ = self
            .event_sender
            .send(ZoneEvent::Removed { zone: zone.clone() });
        Ok(())
    }

    /// Publish an informational event
    pub fn notify(&self, event: ZoneEvent) {
        let _ = self.event_sender.send(event);
    }

    /// All zones with a non-default lifecycle, in key order
    pub fn list(&self) -> Vec<(ZoneKey, DomainLifecycle)> {
        let mut zones: Vec<_> = self
            .zones
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        zones.sort_by(|a, b| a.0.cmp(&b.0));
        zones
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use RemovalPolicy::*;

    fn zone(value: &str) -> ZoneKey {
        ZoneKey::new("topology.kubernetes.io/zone", value)
    }

    #[test]
    fn test_unknown_zone_is_active() {
        let tracker = ZoneLifecycleTracker::new();
        assert_eq!(tracker.state(&zone("z1")), DomainState::Active);
        assert!(tracker.is_placement_eligible(&zone("z1")));
        assert!(tracker.list().is_empty());
    }

    #[test]
    fn test_policy_upgrade_never_reverts() {
        let tracker = ZoneLifecycleTracker::new();
        let z = zone("z1");

        tracker.mark_for_removal(&z, EnsureAccessibility).unwrap();
        assert_eq!(tracker.state(&z), DomainState::MarkedForRemoval(EnsureAccessibility));

        tracker.mark_for_removal(&z, EvacuateAll).unwrap();
        assert_eq!(tracker.state(&z), DomainState::MarkedForRemoval(EvacuateAll));

        let state = tracker.mark_for_removal(&z, EnsureAccessibility).unwrap();
        assert_eq!(state, DomainState::MarkedForRemoval(EvacuateAll));
        assert!(!tracker.is_placement_eligible(&z));
    }

    #[test]
    fn test_removed_zone_rejects_marking() {
        let tracker = ZoneLifecycleTracker::new();
        let z = zone("z1");

        assert_matches!(
            tracker.confirm_removed(&z),
            Err(Error::InvalidZoneTransition { .. })
        );

        tracker.mark_for_removal(&z, EvacuateAll).unwrap();
        tracker.confirm_removed(&z).unwrap();
        tracker.confirm_removed(&z).unwrap();
        assert!(tracker.is_removed(&z));
        assert!(tracker.lifecycle(&z).removed_at.is_some());

        assert_matches!(
            tracker.mark_for_removal(&z, EvacuateAll),
            Err(Error::InvalidZoneTransition { .. })
        );
    }

    #[tokio::test]
    async fn test_transitions_are_broadcast() {
        let tracker = ZoneLifecycleTracker::new();
        let mut events = tracker.subscribe();
        let z = zone("z1");

        tracker.mark_for_removal(&z, EnsureAccessibility).unwrap();
        tracker.mark_for_removal(&z, EnsureAccessibility).unwrap();
        tracker.mark_for_removal(&z, EvacuateAll).unwrap();
        tracker.confirm_removed(&z).unwrap();

        assert_matches!(events.recv().await.unwrap(), ZoneEvent::MarkedForRemoval { .. });
        assert_matches!(
            events.recv().await.unwrap(),
            ZoneEvent::PolicyUpgraded { to: EvacuateAll, .. }
        );
        assert_matches!(events.recv().await.unwrap(), ZoneEvent::Removed { .. });
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_concurrent_marks_keep_strictest() {
        let tracker = ZoneLifecycleTracker::new();
        let z = zone("z1");

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let tracker = tracker.clone();
                let z = z.clone();
                std::thread::spawn(move || {
                    let policy = if i == 3 { EvacuateAll } else { EnsureAccessibility };
                    tracker.mark_for_removal(&z, policy).unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(tracker.state(&z), DomainState::MarkedForRemoval(EvacuateAll));
    }
}

//! Zone Events
//!
//! Events emitted by the zone lifecycle tracker for external consumers to
//! react to decommission progress.

use crate::domain::model::{RemovalPolicy, ZoneKey};
use serde::{Deserialize, Serialize};

/// Events emitted by the zone lifecycle tracker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ZoneEvent {
    /// A zone was marked for removal for the first time
    MarkedForRemoval { zone: ZoneKey, policy: RemovalPolicy },

    /// A marked zone's policy was upgraded
    PolicyUpgraded {
        zone: ZoneKey,
        from: RemovalPolicy,
        to: RemovalPolicy,
    },

    /// A zone finished decommissioning
    Removed { zone: ZoneKey },

    /// A placement record was re-homed onto an existing copy outside the zone
    ReplicaPromoted {
        zone: ZoneKey,
        volume_id: String,
        pool: String,
    },
}

impl ZoneEvent {
    /// Get the zone associated with this event
    pub fn zone(&self) -> &ZoneKey {
        match self {
            ZoneEvent::MarkedForRemoval { zone, .. } => zone,
            ZoneEvent::PolicyUpgraded { zone, .. } => zone,
            ZoneEvent::Removed { zone } => zone,
            ZoneEvent::ReplicaPromoted { zone, .. } => zone,
        }
    }

    /// Check if this event changed the zone's lifecycle state
    pub fn is_transition(&self) -> bool {
        !matches!(self, ZoneEvent::ReplicaPromoted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_zone() {
        let event = ZoneEvent::PolicyUpgraded {
            zone: ZoneKey::new("zone", "z1"),
            from: RemovalPolicy::EnsureAccessibility,
            to: RemovalPolicy::EvacuateAll,
        };
        assert_eq!(event.zone().value, "z1");
        assert!(event.is_transition());

        let event = ZoneEvent::ReplicaPromoted {
            zone: ZoneKey::new("zone", "z1"),
            volume_id: "vol-1".to_string(),
            pool: "ds-2".to_string(),
        };
        assert!(!event.is_transition());
    }
}

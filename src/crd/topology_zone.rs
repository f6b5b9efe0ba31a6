//! TopologyZone CRD
//!
//! Represents a topology domain (zone) published by the platform agent.
//! Operators request decommissioning by setting `spec.removal`, and confirm
//! it once the migration plan has been applied by setting
//! `spec.removal.confirmed`.

use crate::domain::model::{RemovalPolicy, TopologyDomain, ZoneKey};
use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// TopologyZone CRD
// =============================================================================

/// TopologyZone describes one failure/locality domain and its member nodes
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "placement.storage.io",
    version = "v1alpha1",
    kind = "TopologyZone",
    plural = "topologyzones",
    shortname = "tz",
    status = "TopologyZoneStatus",
    printcolumn = r#"{"name": "Zone", "type": "string", "jsonPath": ".spec.value"}"#,
    printcolumn = r#"{"name": "Phase", "type": "string", "jsonPath": ".status.phase"}"#,
    printcolumn = r#"{"name": "Policy", "type": "string", "jsonPath": ".status.policy"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    namespaced = false
)]
#[serde(rename_all = "camelCase")]
pub struct TopologyZoneSpec {
    /// Topology label key
    #[serde(default = "default_category")]
    pub category: String,

    /// Topology label value
    pub value: String,

    /// Additional topology labels (e.g. region)
    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    /// Compute nodes in this zone
    #[serde(default)]
    pub nodes: Vec<String>,

    /// Decommission request
    #[serde(default)]
    pub removal: Option<ZoneRemovalSpec>,
}

// =============================================================================
// Sub-Types
// =============================================================================

/// Decommission request for a zone
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ZoneRemovalSpec {
    /// Maintenance mode
    pub policy: ZoneRemovalPolicy,

    /// Set once the caller applied the migration plan
    #[serde(default)]
    pub confirmed: bool,
}

/// Maintenance mode of a zone removal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum ZoneRemovalPolicy {
    EnsureAccessibility,
    EvacuateAll,
}

impl From<ZoneRemovalPolicy> for RemovalPolicy {
    fn from(policy: ZoneRemovalPolicy) -> Self {
        match policy {
            ZoneRemovalPolicy::EnsureAccessibility => RemovalPolicy::EnsureAccessibility,
            ZoneRemovalPolicy::EvacuateAll => RemovalPolicy::EvacuateAll,
        }
    }
}

// =============================================================================
// Status
// =============================================================================

/// Observed lifecycle of a zone
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TopologyZoneStatus {
    /// Current phase
    #[serde(default)]
    pub phase: ZonePhase,

    /// Effective removal policy
    #[serde(default)]
    pub policy: Option<String>,

    /// Placements still depending on the zone
    #[serde(default)]
    pub remaining_volumes: u32,

    /// Human-readable message
    #[serde(default)]
    pub message: Option<String>,

    /// Last phase change
    #[serde(default)]
    #[schemars(with = "Option<String>")]
    pub last_transition_time: Option<DateTime<Utc>>,

    /// Observed generation
    #[serde(default)]
    pub observed_generation: Option<i64>,
}

/// Zone phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub enum ZonePhase {
    #[default]
    Active,
    MarkedForRemoval,
    Removed,
}

impl std::fmt::Display for ZonePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ZonePhase::Active => write!(f, "Active"),
            ZonePhase::MarkedForRemoval => write!(f, "MarkedForRemoval"),
            ZonePhase::Removed => write!(f, "Removed"),
        }
    }
}

// =============================================================================
// Conversions
// =============================================================================

impl TopologyZoneSpec {
    pub fn key(&self) -> ZoneKey {
        ZoneKey::new(self.category.clone(), self.value.clone())
    }

    /// Domain view without pools; pools attach through their own resources
    pub fn to_domain(&self) -> TopologyDomain {
        let mut domain = TopologyDomain::new(self.key());
        domain.labels = self.labels.clone();
        domain.nodes = self.nodes.iter().cloned().collect();
        domain
    }
}

fn default_category() -> String {
    "topology.kubernetes.io/zone".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_defaults_and_conversion() {
        let spec: TopologyZoneSpec = serde_json::from_value(serde_json::json!({
            "value": "zone-2",
            "nodes": ["node-a", "node-b"],
            "removal": { "policy": "evacuateAll" }
        }))
        .unwrap();

        assert_eq!(spec.category, "topology.kubernetes.io/zone");
        let removal = spec.removal.clone().unwrap();
        assert!(!removal.confirmed);
        assert_eq!(RemovalPolicy::from(removal.policy), RemovalPolicy::EvacuateAll);

        let domain = spec.to_domain();
        assert_eq!(domain.key.to_string(), "topology.kubernetes.io/zone=zone-2");
        assert_eq!(domain.nodes.len(), 2);
    }
}

//! DatastorePool CRD
//!
//! Represents one datastore of the virtualization platform as seen from the
//! cluster. The platform agent keeps `status` current: used capacity,
//! accessibility and the volumes holding a copy on this datastore.

use crate::domain::model::{PoolId, StoragePool, ZoneKey};
use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// =============================================================================
// DatastorePool CRD
// =============================================================================

/// DatastorePool describes an allocatable storage pool inside a zone
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "placement.storage.io",
    version = "v1alpha1",
    kind = "DatastorePool",
    plural = "datastorepools",
    shortname = "dsp",
    status = "DatastorePoolStatus",
    printcolumn = r#"{"name": "Zone", "type": "string", "jsonPath": ".spec.zone"}"#,
    printcolumn = r#"{"name": "Capacity", "type": "integer", "jsonPath": ".spec.capacityBytes"}"#,
    printcolumn = r#"{"name": "Used", "type": "integer", "jsonPath": ".status.usedBytes"}"#,
    printcolumn = r#"{"name": "Accessible", "type": "boolean", "jsonPath": ".status.accessible"}"#,
    namespaced = false
)]
#[serde(rename_all = "camelCase")]
pub struct DatastorePoolSpec {
    /// Topology label key of the parent zone
    #[serde(default = "default_category")]
    pub category: String,

    /// Parent zone value
    pub zone: String,

    /// Tags matched against storage profiles
    #[serde(default)]
    pub tags: Vec<String>,

    /// Total capacity in bytes
    pub capacity_bytes: u64,
}

/// Observed state published by the platform agent
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DatastorePoolStatus {
    /// Used capacity in bytes
    #[serde(default)]
    pub used_bytes: u64,

    /// Whether the zone's hosts can reach the datastore
    #[serde(default = "default_true")]
    pub accessible: bool,

    /// Volumes holding an accessible copy here
    #[serde(default)]
    pub volume_copies: Vec<String>,

    /// Last refresh by the agent
    #[serde(default)]
    #[schemars(with = "Option<String>")]
    pub last_updated: Option<DateTime<Utc>>,
}

impl Default for DatastorePoolStatus {
    fn default() -> Self {
        Self {
            used_bytes: 0,
            accessible: true,
            volume_copies: Vec::new(),
            last_updated: None,
        }
    }
}

impl DatastorePool {
    /// Pool view of this resource; the resource name is the pool id
    pub fn to_pool(&self, name: &str) -> StoragePool {
        let status = self.status.clone().unwrap_or_default();
        StoragePool {
            id: PoolId::new(name),
            domain: ZoneKey::new(self.spec.category.clone(), self.spec.zone.clone()),
            tags: self.spec.tags.iter().cloned().collect(),
            total_bytes: self.spec.capacity_bytes,
            used_bytes: status.used_bytes,
            accessible: status.accessible,
        }
    }
}

fn default_category() -> String {
    "topology.kubernetes.io/zone".to_string()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_without_status_is_accessible_and_empty() {
        let pool = DatastorePool::new(
            "ds-1",
            DatastorePoolSpec {
                category: default_category(),
                zone: "zone-1".into(),
                tags: vec!["gold".into()],
                capacity_bytes: 100,
            },
        );

        let view = pool.to_pool("ds-1");
        assert_eq!(view.id.as_str(), "ds-1");
        assert_eq!(view.domain.value, "zone-1");
        assert!(view.accessible);
        assert_eq!(view.used_bytes, 0);
        assert!(view.tags.contains("gold"));
    }
}

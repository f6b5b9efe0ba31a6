//! Inventory Snapshot
//!
//! Point-in-time view of zones, storage pools and the pools holding an
//! accessible copy of each volume. Snapshots are plain values: taking one
//! never blocks the platform and holding one never pins anything.

use crate::domain::model::{PoolId, StoragePool, TopologyDomain, VolumeId, ZoneKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

/// Serialized inventory document (static file or platform REST payload)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryDocument {
    #[serde(default)]
    pub domains: Vec<TopologyDomain>,
    #[serde(default)]
    pub pools: Vec<StoragePool>,
    /// Volume id -> pools holding an accessible copy
    #[serde(default)]
    pub replicas: BTreeMap<VolumeId, BTreeSet<PoolId>>,
}

/// Read-only inventory view
#[derive(Debug, Clone)]
pub struct InventorySnapshot {
    pub taken_at: DateTime<Utc>,
    pub domains: BTreeMap<ZoneKey, TopologyDomain>,
    pub pools: BTreeMap<PoolId, StoragePool>,
    pub replicas: BTreeMap<VolumeId, BTreeSet<PoolId>>,
}

impl Default for InventorySnapshot {
    fn default() -> Self {
        Self::new()
    }
}

impl InventorySnapshot {
    pub fn new() -> Self {
        Self {
            taken_at: Utc::now(),
            domains: BTreeMap::new(),
            pools: BTreeMap::new(),
            replicas: BTreeMap::new(),
        }
    }

    /// Build a snapshot from a serialized document
    pub fn from_document(doc: InventoryDocument) -> Self {
        let mut snapshot = Self::new();
        for domain in doc.domains {
            snapshot = snapshot.with_domain(domain);
        }
        for pool in doc.pools {
            snapshot = snapshot.with_pool(pool);
        }
        for (volume, pools) in doc.replicas {
            for pool in pools {
                snapshot = snapshot.with_replica(volume.clone(), pool);
            }
        }
        snapshot
    }

    /// Convert back into a document, e.g. for the platform stub
    pub fn to_document(&self) -> InventoryDocument {
        InventoryDocument {
            domains: self.domains.values().cloned().collect(),
            pools: self.pools.values().cloned().collect(),
            replicas: self.replicas.clone(),
        }
    }

    pub fn with_domain(mut self, domain: TopologyDomain) -> Self {
        match self.domains.get_mut(&domain.key) {
            Some(existing) => {
                existing.labels.extend(domain.labels);
                existing.pools.extend(domain.pools);
                existing.nodes.extend(domain.nodes);
            }
            None => {
                self.domains.insert(domain.key.clone(), domain);
            }
        }
        self
    }

    /// Add a pool, clamping used bytes and registering it with its zone
    pub fn with_pool(mut self, mut pool: StoragePool) -> Self {
        if pool.used_bytes > pool.total_bytes {
            warn!(
                "Pool {} reports {} used bytes over {} total, clamping",
                pool.id, pool.used_bytes, pool.total_bytes
            );
            pool.used_bytes = pool.total_bytes;
        }

        self.domains
            .entry(pool.domain.clone())
            .or_insert_with(|| TopologyDomain::new(pool.domain.clone()))
            .pools
            .insert(pool.id.clone());
        self.pools.insert(pool.id.clone(), pool);
        self
    }

    pub fn with_replica(mut self, volume: impl Into<VolumeId>, pool: impl Into<PoolId>) -> Self {
        self.replicas
            .entry(volume.into())
            .or_default()
            .insert(pool.into());
        self
    }

    pub fn pool(&self, id: &PoolId) -> Option<&StoragePool> {
        self.pools.get(id)
    }

    pub fn domain(&self, key: &ZoneKey) -> Option<&TopologyDomain> {
        self.domains.get(key)
    }

    /// Domain of a pool
    pub fn domain_of(&self, pool: &StoragePool) -> Option<&TopologyDomain> {
        self.domains.get(&pool.domain)
    }

    /// Pools of a zone in id order
    pub fn pools_in<'a>(&'a self, key: &'a ZoneKey) -> impl Iterator<Item = &'a StoragePool> + 'a {
        self.pools.values().filter(move |p| &p.domain == key)
    }

    /// Pools that hold a copy of the volume
    pub fn copies_of(&self, volume: &VolumeId) -> impl Iterator<Item = &StoragePool> {
        self.replicas
            .get(volume)
            .into_iter()
            .flatten()
            .filter_map(move |id| self.pools.get(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zone(value: &str) -> ZoneKey {
        ZoneKey::new("topology.kubernetes.io/zone", value)
    }

    #[test]
    fn test_pool_registration_creates_domain() {
        let snapshot = InventorySnapshot::new()
            .with_pool(StoragePool::new("ds-1", zone("zone-1"), 100, 10))
            .with_pool(StoragePool::new("ds-2", zone("zone-1"), 100, 20));

        let domain = snapshot.domain(&zone("zone-1")).unwrap();
        assert_eq!(domain.pools.len(), 2);
        assert_eq!(snapshot.pools_in(&zone("zone-1")).count(), 2);
    }

    #[test]
    fn test_used_bytes_clamped_to_total() {
        let snapshot =
            InventorySnapshot::new().with_pool(StoragePool::new("ds-1", zone("zone-1"), 100, 150));
        let pool = snapshot.pool(&PoolId::new("ds-1")).unwrap();
        assert_eq!(pool.used_bytes, 100);
        assert_eq!(pool.free_bytes(), 0);
    }

    #[test]
    fn test_document_preserves_replicas() {
        let doc: InventoryDocument = serde_yaml::from_str(
            r#"
domains:
  - key: { category: topology.kubernetes.io/zone, value: zone-1 }
    nodes: [node-a]
pools:
  - id: ds-1
    domain: { category: topology.kubernetes.io/zone, value: zone-1 }
    tags: [gold]
    totalBytes: 100
    usedBytes: 40
replicas:
  vol-1: [ds-1, ds-9]
"#,
        )
        .unwrap();

        let snapshot = InventorySnapshot::from_document(doc);
        let domain = snapshot.domain(&zone("zone-1")).unwrap();
        assert!(domain.nodes.contains("node-a"));
        assert!(domain.pools.contains(&PoolId::new("ds-1")));
        assert!(snapshot.pool(&PoolId::new("ds-1")).unwrap().accessible);

        // ds-9 is unknown to the inventory and is skipped
        assert_eq!(snapshot.copies_of(&VolumeId::new("vol-1")).count(), 1);
    }
}

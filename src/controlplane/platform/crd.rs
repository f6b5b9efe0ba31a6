//! CRD Inventory Provider
//!
//! Builds snapshots from the `TopologyZone` and `DatastorePool` resources
//! the platform agent keeps up to date in the cluster.

use crate::crd::{DatastorePool, TopologyZone};
use crate::domain::model::{PoolId, VolumeId};
use crate::domain::ports::InventoryProvider;
use crate::error::Result;
use crate::inventory::InventorySnapshot;
use async_trait::async_trait;
use kube::api::ListParams;
use kube::{Api, Client, ResourceExt};
use tracing::debug;

/// Inventory read from custom resources
pub struct CrdInventory {
    zones: Api<TopologyZone>,
    pools: Api<DatastorePool>,
}

impl CrdInventory {
    pub fn new(client: Client) -> Self {
        Self {
            zones: Api::all(client.clone()),
            pools: Api::all(client),
        }
    }
}

/// Assemble a snapshot from listed resources
pub fn snapshot_from_resources(zones: &[TopologyZone], pools: &[DatastorePool]) -> InventorySnapshot {
    let mut snapshot = InventorySnapshot::new();

    for zone in zones {
        snapshot = snapshot.with_domain(zone.spec.to_domain());
    }

    for resource in pools {
        let name = resource.name_any();
        snapshot = snapshot.with_pool(resource.to_pool(&name));
        if let Some(status) = &resource.status {
            for volume in &status.volume_copies {
                snapshot = snapshot.with_replica(VolumeId::new(volume.clone()), PoolId::new(name.clone()));
            }
        }
    }

    snapshot
}

#[async_trait]
impl InventoryProvider for CrdInventory {
    async fn snapshot(&self) -> Result<InventorySnapshot> {
        let zones = self.zones.list(&ListParams::default()).await?;
        let pools = self.pools.list(&ListParams::default()).await?;
        debug!(
            "Listed {} TopologyZone(s) and {} DatastorePool(s)",
            zones.items.len(),
            pools.items.len()
        );
        Ok(snapshot_from_resources(&zones.items, &pools.items))
    }

    fn provider_name(&self) -> &str {
        "crd"
    }
}

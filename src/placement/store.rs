//! Placement Store
//!
//! The engine's records of where each placed claim lives. Records are
//! created by the placement engine or rebuilt from claim annotations at
//! startup, mutated by migration apply and replica promotion, and removed
//! when the claim is released.

use crate::domain::model::{ClaimKey, PlacementRecord, PoolId, VolumeId, ZoneKey};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Concurrent map of placement records keyed by claim
#[derive(Default)]
pub struct PlacementStore {
    records: DashMap<ClaimKey, PlacementRecord>,
}

impl PlacementStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn get(&self, claim: &ClaimKey) -> Option<PlacementRecord> {
        self.records.get(claim).map(|r| r.clone())
    }

    /// Insert a record; returns false if the claim already had one
    pub fn insert(&self, record: PlacementRecord) -> bool {
        match self.records.entry(record.claim.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(record);
                true
            }
        }
    }

    /// Forget a claim's record
    pub fn remove(&self, claim: &ClaimKey) -> Option<PlacementRecord> {
        self.records.remove(claim).map(|(_, record)| record)
    }

    /// Mutate a record in place, returning the updated copy
    pub fn update<F>(&self, claim: &ClaimKey, f: F) -> Option<PlacementRecord>
    where
        F: FnOnce(&mut PlacementRecord),
    {
        self.records.get_mut(claim).map(|mut r| {
            f(&mut r);
            r.clone()
        })
    }

    pub fn find_by_volume(&self, volume: &VolumeId) -> Option<PlacementRecord> {
        self.records
            .iter()
            .find(|r| &r.volume_id == volume)
            .map(|r| r.clone())
    }

    /// Records placed on any of the given pools, in claim order
    pub fn on_pools(&self, pools: &[PoolId]) -> Vec<PlacementRecord> {
        let mut records: Vec<_> = self
            .records
            .iter()
            .filter(|r| pools.contains(&r.pool))
            .map(|r| r.clone())
            .collect();
        records.sort_by(|a, b| a.claim.cmp(&b.claim));
        records
    }

    pub fn in_zone(&self, zone: &ZoneKey) -> Vec<PlacementRecord> {
        let mut records: Vec<_> = self
            .records
            .iter()
            .filter(|r| &r.domain == zone)
            .map(|r| r.clone())
            .collect();
        records.sort_by(|a, b| a.claim.cmp(&b.claim));
        records
    }

    /// Sum of record sizes per pool
    pub fn bytes_per_pool(&self) -> BTreeMap<PoolId, u64> {
        let mut totals = BTreeMap::new();
        for record in self.records.iter() {
            *totals.entry(record.pool.clone()).or_insert(0) += record.size_bytes;
        }
        totals
    }

    pub fn list(&self) -> Vec<PlacementRecord> {
        let mut records: Vec<_> = self.records.iter().map(|r| r.clone()).collect();
        records.sort_by(|a, b| a.claim.cmp(&b.claim));
        records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

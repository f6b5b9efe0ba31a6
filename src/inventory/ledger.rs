//! Capacity Ledger
//!
//! Engine-side committed bytes per pool, shared by the placement engine and
//! the migration planner. The platform's own used-bytes figure lags behind
//! our decisions, so the effective usage of a pool is the larger of the two.
//! Reservations are atomic per pool through the map's entry lock.

use crate::domain::model::{PoolId, StoragePool};
use crate::error::{Error, Result};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Per-pool committed capacity
#[derive(Debug, Default)]
pub struct CapacityLedger {
    committed: DashMap<PoolId, u64>,
}

impl CapacityLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Bytes committed by the engine on a pool
    pub fn committed(&self, pool: &PoolId) -> u64 {
        self.committed.get(pool).map(|v| *v).unwrap_or(0)
    }

    /// Usage accounting for both the platform figure and our commitments
    pub fn effective_used(&self, pool: &StoragePool) -> u64 {
        pool.used_bytes.max(self.committed(&pool.id)).min(pool.total_bytes)
    }

    pub fn effective_free(&self, pool: &StoragePool) -> u64 {
        pool.total_bytes.saturating_sub(self.effective_used(pool))
    }

    /// Commit `bytes` on `pool` keeping `floor` bytes free
    pub fn try_reserve(&self, pool: &StoragePool, bytes: u64, floor: u64) -> Result<()> {
        let mut entry = self.committed.entry(pool.id.clone()).or_insert(0);
        let used = pool.used_bytes.max(*entry);
        let available = pool.total_bytes.saturating_sub(used).saturating_sub(floor);

        if bytes > available {
            return Err(Error::InsufficientCapacity {
                pool: pool.id.to_string(),
                requested: bytes,
                available,
            });
        }

        *entry = used + bytes;
        debug!("Reserved {} bytes on pool {} ({} committed)", bytes, pool.id, *entry);
        Ok(())
    }

    /// Return `bytes` to a pool
    pub fn release(&self, pool: &PoolId, bytes: u64) {
        if let Some(mut entry) = self.committed.get_mut(pool) {
            *entry = entry.saturating_sub(bytes);
            debug!("Released {} bytes on pool {} ({} committed)", bytes, pool, *entry);
        }
    }

    /// Re-commit bytes of a placement that already exists, without a capacity check
    pub fn restore(&self, pool: &PoolId, bytes: u64) {
        let mut entry = self.committed.entry(pool.clone()).or_insert(0);
        *entry = entry.saturating_add(bytes);
        debug!("Restored {} bytes on pool {} ({} committed)", bytes, pool, *entry);
    }

    /// Move a commitment between pools; the source is untouched on failure
    pub fn transfer(&self, from: &PoolId, to: &StoragePool, bytes: u64) -> Result<()> {
        self.try_reserve(to, bytes, 0)?;
        self.release(from, bytes);
        Ok(())
    }

    pub fn snapshot(&self) -> BTreeMap<PoolId, u64> {
        self.committed
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect()
    }
}

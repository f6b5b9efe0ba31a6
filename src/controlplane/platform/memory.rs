//! In-Memory Platform
//!
//! Serves a snapshot held in memory. Backs standalone runs (static inventory
//! from the settings file or a YAML document on disk) and the tests, which
//! mutate it to simulate the platform changing underneath the engine.

use crate::domain::model::{PoolId, StoragePool};
use crate::domain::ports::{InventoryProvider, PlatformSessions};
use crate::error::Result;
use crate::inventory::{InventoryDocument, InventorySnapshot};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::info;

/// Platform inventory held in memory
pub struct InMemoryPlatform {
    snapshot: RwLock<InventorySnapshot>,
    logouts: AtomicU32,
}

impl InMemoryPlatform {
    pub fn new(snapshot: InventorySnapshot) -> Arc<Self> {
        Arc::new(Self {
            snapshot: RwLock::new(snapshot),
            logouts: AtomicU32::new(0),
        })
    }

    pub fn from_document(doc: InventoryDocument) -> Arc<Self> {
        Self::new(InventorySnapshot::from_document(doc))
    }

    /// Load a YAML inventory document
    pub fn load(path: &Path) -> Result<Arc<Self>> {
        let content = std::fs::read_to_string(path)?;
        let doc: InventoryDocument = serde_yaml::from_str(&content)?;
        info!(
            "Loaded inventory from {}: {} zone(s), {} pool(s)",
            path.display(),
            doc.domains.len(),
            doc.pools.len()
        );
        Ok(Self::from_document(doc))
    }

    /// Mutate the inventory in place
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut InventorySnapshot),
    {
        f(&mut self.snapshot.write());
    }

    pub fn pool(&self, id: &PoolId) -> Option<StoragePool> {
        self.snapshot.read().pool(id).cloned()
    }

    /// Number of session logouts performed
    pub fn logouts(&self) -> u32 {
        self.logouts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InventoryProvider for InMemoryPlatform {
    async fn snapshot(&self) -> Result<InventorySnapshot> {
        let mut snapshot = self.snapshot.read().clone();
        snapshot.taken_at = Utc::now();
        Ok(snapshot)
    }

    fn provider_name(&self) -> &str {
        "memory"
    }
}

#[async_trait]
impl PlatformSessions for InMemoryPlatform {
    async fn logout_all(&self) -> Result<()> {
        self.logouts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

//! Platform Adapters
//!
//! Provides inventory and session adapters for:
//! - In-memory / static inventory (standalone runs and tests)
//! - Custom resources published by the platform agent
//! - The platform's inventory REST endpoint

pub mod crd;
pub mod http;
pub mod memory;

pub use crd::CrdInventory;
pub use http::{HttpPlatform, HttpPlatformConfig};
pub use memory::InMemoryPlatform;

use crate::config::{DriverConfig, InventorySource};
use crate::domain::ports::{InventoryProviderRef, PlatformSessions, PlatformSessionsRef};
use crate::error::{Error, Result};
use async_trait::async_trait;
use kube::Client;
use std::sync::Arc;

/// Inventory and session adapters selected for this process
pub struct PlatformAdapters {
    pub inventory: InventoryProviderRef,
    pub sessions: PlatformSessionsRef,
}

/// Factory for creating platform adapters
pub struct PlatformFactory;

impl PlatformFactory {
    /// Create adapters for the configured inventory source
    pub fn create(config: &DriverConfig, client: Option<Client>) -> Result<PlatformAdapters> {
        match &config.inventory_source {
            InventorySource::Static => {
                let doc = config.settings.inventory.clone().ok_or_else(|| {
                    Error::Configuration("settings file has no inventory".into())
                })?;
                let platform = InMemoryPlatform::from_document(doc);
                Ok(PlatformAdapters {
                    inventory: platform.clone(),
                    sessions: platform,
                })
            }
            InventorySource::File(path) => {
                let platform = InMemoryPlatform::load(path)?;
                Ok(PlatformAdapters {
                    inventory: platform.clone(),
                    sessions: platform,
                })
            }
            InventorySource::Http(url) => {
                let mut http_config = HttpPlatformConfig::new(url.clone());
                http_config.token = std::env::var("PLATFORM_TOKEN").ok();
                let platform = Arc::new(HttpPlatform::new(http_config)?);
                Ok(PlatformAdapters {
                    inventory: platform.clone(),
                    sessions: platform,
                })
            }
            InventorySource::Crd => {
                let client = client.ok_or_else(|| {
                    Error::Configuration("crd inventory requires a Kubernetes client".into())
                })?;
                Ok(PlatformAdapters {
                    inventory: Arc::new(CrdInventory::new(client)),
                    sessions: Arc::new(NoSessions),
                })
            }
        }
    }
}

/// Session port for sources that hold no platform session
pub struct NoSessions;

#[async_trait]
impl PlatformSessions for NoSessions {
    async fn logout_all(&self) -> Result<()> {
        Ok(())
    }
}

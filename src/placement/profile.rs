//! Storage Profile Catalog
//!
//! Maps storage class names to their placement profiles. A profile is
//! immutable once registered: registering the same name again is accepted
//! only when the content is identical.

use crate::domain::model::StorageProfile;
use crate::error::{Error, Result};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// Registered storage profiles
#[derive(Default)]
pub struct ProfileCatalog {
    profiles: RwLock<BTreeMap<String, Arc<StorageProfile>>>,
}

impl ProfileCatalog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Build a catalog from a list of profiles
    pub fn with_profiles(profiles: impl IntoIterator<Item = StorageProfile>) -> Result<Arc<Self>> {
        let catalog = Self::new();
        for profile in profiles {
            catalog.register(profile)?;
        }
        Ok(catalog)
    }

    pub fn register(&self, profile: StorageProfile) -> Result<Arc<StorageProfile>> {
        let mut profiles = self.profiles.write();

        if let Some(existing) = profiles.get(&profile.name) {
            if **existing == profile {
                return Ok(existing.clone());
            }
            return Err(Error::ProfileConflict {
                profile: profile.name,
            });
        }

        info!(
            "Registered storage profile {} ({:?}, {} eligible tag(s))",
            profile.name,
            profile.binding_mode,
            profile.eligible_tags.len()
        );
        let profile = Arc::new(profile);
        profiles.insert(profile.name.clone(), profile.clone());
        Ok(profile)
    }

    pub fn get(&self, name: &str) -> Option<Arc<StorageProfile>> {
        self.profiles.read().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.profiles.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.profiles.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.read().is_empty()
    }
}

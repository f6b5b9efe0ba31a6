//! Driver Configuration
//!
//! Process-wide settings assembled once at start-up from CLI flags and
//! environment, an optional YAML settings file and the feature switch
//! sources. The result is an immutable [`DriverConfig`] shared by `Arc`.

use crate::domain::model::StorageProfile;
use crate::error::{Error, Result};
use crate::inventory::InventoryDocument;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::{Api, Client};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Gates zone-aware placement of claims
pub const FEATURE_WORKLOAD_DOMAIN_ISOLATION: &str = "workload-domain-isolation";

/// Gates decommission migration planning
pub const FEATURE_STORAGE_VMOTION_PLAN: &str = "storage-vmotion-plan";

// =============================================================================
// Cluster Flavor & Service Mode
// =============================================================================

/// Kind of cluster the driver runs in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterFlavor {
    #[default]
    Vanilla,
    /// Supervisor (workload management) cluster
    Workload,
    /// Guest cluster running inside a supervisor namespace
    Guest,
}

impl FromStr for ClusterFlavor {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "" | "vanilla" => Ok(ClusterFlavor::Vanilla),
            "workload" => Ok(ClusterFlavor::Workload),
            "guest" | "guest_cluster" => Ok(ClusterFlavor::Guest),
            other => Err(Error::Configuration(format!(
                "unknown cluster flavor '{}'",
                other
            ))),
        }
    }
}

impl std::fmt::Display for ClusterFlavor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClusterFlavor::Vanilla => write!(f, "vanilla"),
            ClusterFlavor::Workload => write!(f, "workload"),
            ClusterFlavor::Guest => write!(f, "guest"),
        }
    }
}

/// Which half of the service this process runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceMode {
    Controller,
    Node,
    #[default]
    Full,
}

impl ServiceMode {
    pub fn serves_controller(&self) -> bool {
        matches!(self, ServiceMode::Controller | ServiceMode::Full)
    }

    pub fn serves_node(&self) -> bool {
        matches!(self, ServiceMode::Node | ServiceMode::Full)
    }
}

impl FromStr for ServiceMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "controller" => Ok(ServiceMode::Controller),
            "node" => Ok(ServiceMode::Node),
            "" | "full" => Ok(ServiceMode::Full),
            other => Err(Error::Configuration(format!(
                "unknown service mode '{}', use controller, node or full",
                other
            ))),
        }
    }
}

impl std::fmt::Display for ServiceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceMode::Controller => write!(f, "controller"),
            ServiceMode::Node => write!(f, "node"),
            ServiceMode::Full => write!(f, "full"),
        }
    }
}

// =============================================================================
// Feature Switches
// =============================================================================

/// Named on/off switches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureSwitches {
    switches: BTreeMap<String, bool>,
}

impl Default for FeatureSwitches {
    fn default() -> Self {
        let mut switches = BTreeMap::new();
        switches.insert(FEATURE_WORKLOAD_DOMAIN_ISOLATION.to_string(), true);
        switches.insert(FEATURE_STORAGE_VMOTION_PLAN.to_string(), true);
        Self { switches }
    }
}

impl FeatureSwitches {
    /// Unknown switches are disabled
    pub fn is_enabled(&self, feature: &str) -> bool {
        self.switches.get(feature).copied().unwrap_or(false)
    }

    /// Fail with `FeatureDisabled` unless the switch is on
    pub fn require(&self, feature: &str) -> Result<()> {
        if self.is_enabled(feature) {
            Ok(())
        } else {
            Err(Error::FeatureDisabled {
                feature: feature.to_string(),
            })
        }
    }

    pub fn set(&mut self, feature: impl Into<String>, enabled: bool) {
        self.switches.insert(feature.into(), enabled);
    }

    /// Overlay another source; its values win
    pub fn merge(&mut self, other: BTreeMap<String, bool>) {
        self.switches.extend(other);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &bool)> {
        self.switches.iter()
    }

    /// Parse `name: "true"|"false"` pairs as found in a ConfigMap
    pub fn parse_data(data: &BTreeMap<String, String>) -> Result<BTreeMap<String, bool>> {
        data.iter()
            .map(|(name, value)| {
                let enabled = value.trim().parse::<bool>().map_err(|_| {
                    Error::Configuration(format!(
                        "feature switch '{}' has non-boolean value '{}'",
                        name, value
                    ))
                })?;
                Ok((name.clone(), enabled))
            })
            .collect()
    }

    /// Load a YAML map of switches from disk
    pub fn load_file(path: &Path) -> Result<BTreeMap<String, bool>> {
        let content = std::fs::read_to_string(path)?;
        let data: BTreeMap<String, String> = serde_yaml::from_str(&content)?;
        Self::parse_data(&data)
    }

    /// Load switches from a ConfigMap
    pub async fn load_config_map(
        client: Client,
        namespace: &str,
        name: &str,
    ) -> Result<BTreeMap<String, bool>> {
        let api: Api<ConfigMap> = Api::namespaced(client, namespace);
        let cm = api.get_opt(name).await?.ok_or_else(|| Error::ResourceNotFound {
            kind: "ConfigMap".to_string(),
            name: format!("{}/{}", namespace, name),
        })?;

        debug!("Loaded feature switches from ConfigMap {}/{}", namespace, name);
        Self::parse_data(&cm.data.unwrap_or_default())
    }
}

// =============================================================================
// Engine Settings
// =============================================================================

/// Tunables read from the optional YAML settings file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineSettings {
    /// Bytes that must stay free on a pool after placement
    #[serde(default)]
    pub capacity_floor_bytes: u64,

    /// Interval between annotation polls in milliseconds
    #[serde(default = "EngineSettings::default_poll_interval")]
    pub annotation_poll_interval_ms: u64,

    /// Await timeout used when a caller does not give one
    #[serde(default = "EngineSettings::default_await_timeout_secs")]
    pub default_await_timeout_secs: u64,

    /// Storage profiles keyed by storage class name
    #[serde(default)]
    pub profiles: Vec<StorageProfile>,

    /// Static inventory for standalone runs
    #[serde(default)]
    pub inventory: Option<InventoryDocument>,
}

impl EngineSettings {
    const fn default_poll_interval() -> u64 {
        1000
    }

    const fn default_await_timeout_secs() -> u64 {
        120
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.annotation_poll_interval_ms.max(1))
    }

    pub fn default_await_timeout(&self) -> Duration {
        Duration::from_secs(self.default_await_timeout_secs)
    }

    /// Load settings from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings: EngineSettings = serde_yaml::from_str(&content)?;
        info!(
            "Loaded settings from {}: {} profile(s)",
            path.display(),
            settings.profiles.len()
        );
        Ok(settings)
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            capacity_floor_bytes: 0,
            annotation_poll_interval_ms: Self::default_poll_interval(),
            default_await_timeout_secs: Self::default_await_timeout_secs(),
            profiles: Vec::new(),
            inventory: None,
        }
    }
}

// =============================================================================
// Inventory Source
// =============================================================================

/// Where pool and zone inventory is read from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InventorySource {
    /// `TopologyZone` and `DatastorePool` custom resources
    Crd,
    /// YAML inventory document on disk
    File(PathBuf),
    /// Platform inventory REST endpoint
    Http(String),
    /// Inventory embedded in the settings file
    Static,
}

impl FromStr for InventorySource {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s == "crd" {
            Ok(InventorySource::Crd)
        } else if s == "static" {
            Ok(InventorySource::Static)
        } else if let Some(path) = s.strip_prefix("file:") {
            Ok(InventorySource::File(PathBuf::from(path)))
        } else if s.starts_with("http://") || s.starts_with("https://") {
            Ok(InventorySource::Http(s.trim_end_matches('/').to_string()))
        } else {
            Err(Error::Configuration(format!(
                "invalid inventory source '{}', use crd, static, file:<path> or an http(s) URL",
                s
            )))
        }
    }
}

/// Parse the service endpoint (`tcp://host:port` or `host:port`)
pub fn parse_endpoint(endpoint: &str) -> Result<SocketAddr> {
    let endpoint = endpoint.trim();
    if endpoint.is_empty() {
        return Err(Error::Configuration("service endpoint cannot be empty".into()));
    }
    if endpoint.starts_with("unix://") || endpoint.starts_with('/') {
        return Err(Error::Configuration(format!(
            "unix socket endpoint '{}' is not supported, use tcp://host:port",
            endpoint
        )));
    }

    let addr = endpoint.strip_prefix("tcp://").unwrap_or(endpoint);
    addr.parse()
        .map_err(|e| Error::Configuration(format!("invalid endpoint '{}': {}", endpoint, e)))
}

// =============================================================================
// Driver Config
// =============================================================================

/// Immutable process configuration
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// REST listen address
    pub endpoint: SocketAddr,
    pub flavor: ClusterFlavor,
    pub mode: ServiceMode,
    pub features: FeatureSwitches,
    pub settings: EngineSettings,
    pub inventory_source: InventorySource,
}

impl DriverConfig {
    pub fn new(
        endpoint: &str,
        flavor: ClusterFlavor,
        mode: ServiceMode,
        features: FeatureSwitches,
        settings: EngineSettings,
        inventory_source: InventorySource,
    ) -> Result<Arc<Self>> {
        let endpoint = parse_endpoint(endpoint)?;

        if inventory_source == InventorySource::Static && settings.inventory.is_none() {
            return Err(Error::Configuration(
                "static inventory selected but the settings file has no inventory".into(),
            ));
        }

        Ok(Arc::new(Self {
            endpoint,
            flavor,
            mode,
            features,
            settings,
            inventory_source,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::io::Write;

    #[test]
    fn test_mode_capabilities() {
        assert!(ServiceMode::Full.serves_controller() && ServiceMode::Full.serves_node());
        assert!(!ServiceMode::Node.serves_controller());
        assert!(!ServiceMode::Controller.serves_node());
        assert_eq!("".parse::<ServiceMode>().unwrap(), ServiceMode::Full);
        assert!("both".parse::<ServiceMode>().is_err());
        assert_eq!("GUEST".parse::<ClusterFlavor>().unwrap(), ClusterFlavor::Guest);
    }

    #[test]
    fn test_endpoint_parsing() {
        assert_eq!(
            parse_endpoint("tcp://127.0.0.1:9808").unwrap(),
            "127.0.0.1:9808".parse::<SocketAddr>().unwrap()
        );
        assert!(parse_endpoint("0.0.0.0:8080").is_ok());
        assert_matches!(parse_endpoint(""), Err(Error::Configuration(_)));
        assert_matches!(
            parse_endpoint("unix:///var/lib/csi/csi.sock"),
            Err(Error::Configuration(_))
        );
    }

    #[test]
    fn test_inventory_source_parsing() {
        assert_eq!("crd".parse::<InventorySource>().unwrap(), InventorySource::Crd);
        assert_eq!(
            "file:/etc/inventory.yaml".parse::<InventorySource>().unwrap(),
            InventorySource::File(PathBuf::from("/etc/inventory.yaml"))
        );
        assert_eq!(
            "https://vc.local/".parse::<InventorySource>().unwrap(),
            InventorySource::Http("https://vc.local".into())
        );
        assert!("ftp://vc.local".parse::<InventorySource>().is_err());
    }

    #[test]
    fn test_feature_switch_overlay() {
        let mut features = FeatureSwitches::default();
        assert!(features.is_enabled(FEATURE_STORAGE_VMOTION_PLAN));
        assert!(!features.is_enabled("unknown"));

        let mut data = BTreeMap::new();
        data.insert(FEATURE_STORAGE_VMOTION_PLAN.to_string(), "false".to_string());
        features.merge(FeatureSwitches::parse_data(&data).unwrap());

        assert_matches!(
            features.require(FEATURE_STORAGE_VMOTION_PLAN),
            Err(Error::FeatureDisabled { .. })
        );
        assert!(features.require(FEATURE_WORKLOAD_DOMAIN_ISOLATION).is_ok());

        data.insert("broken".to_string(), "maybe".to_string());
        assert!(FeatureSwitches::parse_data(&data).is_err());
    }

    #[test]
    fn test_settings_file_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
capacityFloorBytes: 1024
profiles:
  - name: gold
    eligibleTags: [gold]
    bindingMode: WaitForFirstConsumer
"#
        )
        .unwrap();

        let settings = EngineSettings::load(file.path()).unwrap();
        assert_eq!(settings.capacity_floor_bytes, 1024);
        assert_eq!(settings.poll_interval(), Duration::from_millis(1000));
        assert_eq!(settings.default_await_timeout(), Duration::from_secs(120));
        assert_eq!(settings.profiles.len(), 1);
        assert!(settings.profiles[0].requires_pool_placement);
        assert!(settings.inventory.is_none());
    }

    #[test]
    fn test_feature_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "workload-domain-isolation: \"false\"").unwrap();

        let loaded = FeatureSwitches::load_file(file.path()).unwrap();
        assert_eq!(loaded.get(FEATURE_WORKLOAD_DOMAIN_ISOLATION), Some(&false));
    }

    #[test]
    fn test_static_inventory_requires_document() {
        let result = DriverConfig::new(
            "tcp://127.0.0.1:9808",
            ClusterFlavor::Vanilla,
            ServiceMode::Full,
            FeatureSwitches::default(),
            EngineSettings::default(),
            InventorySource::Static,
        );
        assert_matches!(result, Err(Error::Configuration(_)));
    }
}

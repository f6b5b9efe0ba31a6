//! Domain Model
//!
//! Identifiers, topology, pools, profiles and placement records shared by
//! every component of the engine.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

// =============================================================================
// Identifiers
// =============================================================================

/// Topology label pair identifying a zone, e.g. `topology.kubernetes.io/zone=zone-2`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ZoneKey {
    /// Topology category (label key)
    pub category: String,
    /// Zone value (label value)
    pub value: String,
}

impl ZoneKey {
    pub fn new(category: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            value: value.into(),
        }
    }
}

impl std::fmt::Display for ZoneKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}", self.category, self.value)
    }
}

impl FromStr for ZoneKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('=') {
            Some((category, value)) if !category.is_empty() && !value.is_empty() => {
                Ok(Self::new(category, value))
            }
            _ => Err(Error::ApiValidation(format!(
                "invalid zone '{}', expected <category>=<value>",
                s
            ))),
        }
    }
}

/// Storage pool (datastore) identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PoolId(pub String);

impl PoolId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PoolId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PoolId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Volume identifier as known to the virtualization platform
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VolumeId(pub String);

impl VolumeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for VolumeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for VolumeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identity of a persistent volume claim
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClaimKey {
    pub namespace: String,
    pub name: String,
}

impl ClaimKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ClaimKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

// =============================================================================
// Topology
// =============================================================================

/// Decommission policy requested for a zone or pool
///
/// Ordered by strictness: `EvacuateAll` is stricter than `EnsureAccessibility`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub enum RemovalPolicy {
    /// Only move volumes whose sole accessible copy would be lost
    EnsureAccessibility,
    /// Move every volume regardless of redundancy
    EvacuateAll,
}

impl RemovalPolicy {
    /// The stricter of two policies
    pub fn stricter(self, other: RemovalPolicy) -> RemovalPolicy {
        self.max(other)
    }
}

impl std::fmt::Display for RemovalPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemovalPolicy::EnsureAccessibility => write!(f, "ensureAccessibility"),
            RemovalPolicy::EvacuateAll => write!(f, "evacuateAll"),
        }
    }
}

impl FromStr for RemovalPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace(['-', '_'], "").as_str() {
            "ensureaccessibility" => Ok(RemovalPolicy::EnsureAccessibility),
            "evacuateall" => Ok(RemovalPolicy::EvacuateAll),
            _ => Err(Error::ApiValidation(format!(
                "invalid maintenance mode '{}', use 'ensureAccessibility' or 'evacuateAll'",
                s
            ))),
        }
    }
}

/// Lifecycle state of a topology domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", content = "policy")]
pub enum DomainState {
    Active,
    MarkedForRemoval(RemovalPolicy),
    Removed,
}

impl DomainState {
    /// Policy in force while marked for removal
    pub fn removal_policy(&self) -> Option<RemovalPolicy> {
        match self {
            DomainState::MarkedForRemoval(policy) => Some(*policy),
            _ => None,
        }
    }

    pub fn phase(&self) -> &'static str {
        match self {
            DomainState::Active => "Active",
            DomainState::MarkedForRemoval(_) => "MarkedForRemoval",
            DomainState::Removed => "Removed",
        }
    }
}

impl Default for DomainState {
    fn default() -> Self {
        DomainState::Active
    }
}

impl std::fmt::Display for DomainState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DomainState::MarkedForRemoval(policy) => write!(f, "MarkedForRemoval({})", policy),
            other => write!(f, "{}", other.phase()),
        }
    }
}

/// A zone with its member pools and nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopologyDomain {
    /// Identifying label pair
    pub key: ZoneKey,
    /// Additional topology labels (e.g. region); the identifying pair is implied
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Member storage pools
    #[serde(default)]
    pub pools: BTreeSet<PoolId>,
    /// Member compute nodes
    #[serde(default)]
    pub nodes: BTreeSet<String>,
}

impl TopologyDomain {
    pub fn new(key: ZoneKey) -> Self {
        Self {
            key,
            labels: BTreeMap::new(),
            pools: BTreeSet::new(),
            nodes: BTreeSet::new(),
        }
    }

    /// Value of a topology segment for this domain
    pub fn label(&self, segment: &str) -> Option<&str> {
        if segment == self.key.category {
            Some(self.key.value.as_str())
        } else {
            self.labels.get(segment).map(String::as_str)
        }
    }

    /// Check whether every segment of a term matches this domain
    pub fn satisfies(&self, term: &TopologyTerm) -> bool {
        term.segments
            .iter()
            .all(|(segment, value)| self.label(segment) == Some(value.as_str()))
    }
}

/// A single alternative of an accessibility requirement
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TopologyTerm {
    pub segments: BTreeMap<String, String>,
}

impl TopologyTerm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, segment: impl Into<String>, value: impl Into<String>) -> Self {
        self.segments.insert(segment.into(), value.into());
        self
    }

    /// Term matching exactly one zone
    pub fn zone(key: &ZoneKey) -> Self {
        Self::new().with(key.category.clone(), key.value.clone())
    }
}

/// Multi-term topology constraint; requisite terms are alternatives
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessibilityRequirement {
    #[serde(default)]
    pub requisite: Vec<TopologyTerm>,
    #[serde(default)]
    pub preferred: Vec<TopologyTerm>,
}

impl AccessibilityRequirement {
    pub fn is_empty(&self) -> bool {
        self.requisite.is_empty() && self.preferred.is_empty()
    }

    /// Requirement restricting placement to the given zones
    pub fn zones<'a>(keys: impl IntoIterator<Item = &'a ZoneKey>) -> Self {
        Self {
            requisite: keys.into_iter().map(TopologyTerm::zone).collect(),
            preferred: Vec::new(),
        }
    }

    /// A domain is admitted when there are no requisite terms or any term matches
    pub fn admits(&self, domain: &TopologyDomain) -> bool {
        self.requisite.is_empty() || self.requisite.iter().any(|t| domain.satisfies(t))
    }

    pub fn prefers(&self, domain: &TopologyDomain) -> bool {
        self.preferred.iter().any(|t| domain.satisfies(t))
    }
}

// =============================================================================
// Storage Pools & Profiles
// =============================================================================

/// Allocatable backing storage within a zone
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoragePool {
    pub id: PoolId,
    /// Parent zone
    pub domain: ZoneKey,
    /// Tags matched against profile eligibility
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub total_bytes: u64,
    pub used_bytes: u64,
    /// Whether the pool is currently reachable from its zone's hosts
    #[serde(default = "default_true")]
    pub accessible: bool,
}

impl StoragePool {
    pub fn new(id: impl Into<String>, domain: ZoneKey, total_bytes: u64, used_bytes: u64) -> Self {
        Self {
            id: PoolId::new(id),
            domain,
            tags: BTreeSet::new(),
            total_bytes,
            used_bytes,
            accessible: true,
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn free_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.used_bytes)
    }
}

/// Volume binding mode of a profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BindingMode {
    #[default]
    Immediate,
    WaitForFirstConsumer,
}

/// Named placement policy attached to a storage class
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageProfile {
    pub name: String,
    /// Pool tags eligible for this profile (empty = any pool)
    #[serde(default)]
    pub eligible_tags: BTreeSet<String>,
    /// Zone values this profile is compatible with (empty = any zone)
    #[serde(default)]
    pub allowed_zones: BTreeSet<String>,
    #[serde(default)]
    pub binding_mode: BindingMode,
    /// False when default platform scheduling satisfies the profile
    #[serde(default = "default_true")]
    pub requires_pool_placement: bool,
}

impl StorageProfile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            eligible_tags: BTreeSet::new(),
            allowed_zones: BTreeSet::new(),
            binding_mode: BindingMode::Immediate,
            requires_pool_placement: true,
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.eligible_tags.insert(tag.into());
        self
    }

    pub fn with_zone(mut self, zone: impl Into<String>) -> Self {
        self.allowed_zones.insert(zone.into());
        self
    }

    pub fn with_binding_mode(mut self, mode: BindingMode) -> Self {
        self.binding_mode = mode;
        self
    }

    /// Pool carries at least one eligible tag
    pub fn accepts_pool(&self, pool: &StoragePool) -> bool {
        self.eligible_tags.is_empty() || self.eligible_tags.iter().any(|t| pool.tags.contains(t))
    }

    pub fn accepts_zone(&self, key: &ZoneKey) -> bool {
        self.allowed_zones.is_empty() || self.allowed_zones.contains(&key.value)
    }
}

// =============================================================================
// Placement Records
// =============================================================================

/// Why a record moved between pools
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MigrationReason {
    /// Relocated by a storage vMotion applied from a migration plan
    StorageMotion,
    /// Re-homed onto an existing accessible copy while its zone was removed
    ReplicaPromoted,
}

/// History entry appended on every pool change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationHistoryEntry {
    pub from: PoolId,
    pub to: PoolId,
    pub reason: MigrationReason,
    pub at: DateTime<Utc>,
}

/// The engine's record of where a claim's volume lives
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacementRecord {
    pub claim: ClaimKey,
    pub volume_id: VolumeId,
    /// Profile in force when the claim was placed
    pub profile: StorageProfile,
    /// Topology requirement the claim was placed under
    pub requirement: AccessibilityRequirement,
    pub size_bytes: u64,
    pub pool: PoolId,
    pub domain: ZoneKey,
    pub placed_at: DateTime<Utc>,
    #[serde(default)]
    pub history: Vec<MigrationHistoryEntry>,
}

impl PlacementRecord {
    /// Move the record to another pool, keeping the trail
    pub fn relocate(&mut self, pool: &StoragePool, reason: MigrationReason) {
        self.history.push(MigrationHistoryEntry {
            from: self.pool.clone(),
            to: pool.id.clone(),
            reason,
            at: Utc::now(),
        });
        self.pool = pool.id.clone();
        self.domain = pool.domain.clone();
    }
}

// =============================================================================
// Annotations
// =============================================================================

/// Annotation key for the pool chosen for a claim
pub const ANNOTATION_SELECTED_POOL: &str = "placement.storage.io/selected-pool";

/// Annotation key for the zone chosen for a claim
pub const ANNOTATION_SELECTED_ZONE: &str = "placement.storage.io/selected-zone";

/// Annotation key carrying a claim's requested topology (JSON list of terms)
pub const ANNOTATION_REQUESTED_TOPOLOGY: &str = "placement.storage.io/requested-topology";

/// Annotation key written on pods by the VM agent once the backing VM exists
pub const ANNOTATION_VM_UUID: &str = "placement.storage.io/vm-uuid";

/// Object an annotation is attached to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum AnnotationSubject {
    Node { name: String },
    Pod { namespace: String, name: String },
    Host { name: String },
    Claim { namespace: String, name: String },
}

impl AnnotationSubject {
    pub fn claim(key: &ClaimKey) -> Self {
        AnnotationSubject::Claim {
            namespace: key.namespace.clone(),
            name: key.name.clone(),
        }
    }
}

impl std::fmt::Display for AnnotationSubject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnnotationSubject::Node { name } => write!(f, "node/{}", name),
            AnnotationSubject::Pod { namespace, name } => write!(f, "pod/{}/{}", namespace, name),
            AnnotationSubject::Host { name } => write!(f, "host/{}", name),
            AnnotationSubject::Claim { namespace, name } => write!(f, "pvc/{}/{}", namespace, name),
        }
    }
}

/// Observed or written annotation value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationEntry {
    pub subject: AnnotationSubject,
    pub key: String,
    pub value: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
}

// =============================================================================
// Utility Functions
// =============================================================================

fn default_true() -> bool {
    true
}

/// Parse capacity string (e.g., "100Gi", "1Ti") to bytes
pub fn parse_capacity(s: &str) -> Result<u64> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::CapacityParse("empty capacity string".into()));
    }

    // Find where the number ends and unit begins
    let num_end = s
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit() && *c != '.')
        .map(|(i, _)| i)
        .unwrap_or(s.len());

    let num_str = &s[..num_end];
    let unit_str = s[num_end..].trim();

    let num: f64 = num_str
        .parse()
        .map_err(|_| Error::CapacityParse(format!("invalid number: {}", num_str)))?;

    let multiplier: u64 = match unit_str {
        "" => 1,
        "k" | "K" => 1000,
        "M" => 1000 * 1000,
        "G" => 1000 * 1000 * 1000,
        "T" => 1000 * 1000 * 1000 * 1000,
        "Ki" => 1024,
        "Mi" => 1024 * 1024,
        "Gi" => 1024 * 1024 * 1024,
        "Ti" => 1024 * 1024 * 1024 * 1024,
        "Pi" => 1024 * 1024 * 1024 * 1024 * 1024,
        _ => {
            return Err(Error::CapacityParse(format!(
                "unknown unit: {}",
                unit_str
            )))
        }
    };

    Ok((num * multiplier as f64) as u64)
}

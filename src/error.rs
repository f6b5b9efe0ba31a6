//! Error types for the Storage Placement Engine
//!
//! Provides structured error types for placement, migration planning,
//! zone lifecycle tracking, annotation reconciliation and the transports
//! to the cluster control plane and the virtualization platform.

use std::time::Duration;
use thiserror::Error;

/// Unified error type for the engine
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Feature disabled: {feature}")]
    FeatureDisabled { feature: String },

    #[error("Engine not ready: {0}")]
    NotReady(String),

    // =========================================================================
    // Kubernetes Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Resource not found: {kind}/{name}")]
    ResourceNotFound { kind: String, name: String },

    // =========================================================================
    // Platform Errors
    // =========================================================================
    #[error("Platform HTTP error: {0}")]
    PlatformHttp(#[from] reqwest::Error),

    #[error("Transport failure during {operation}: {reason}")]
    TransportFailure { operation: String, reason: String },

    // =========================================================================
    // Placement Errors
    // =========================================================================
    #[error("No eligible storage pool for {subject}: {reason}")]
    Infeasible { subject: String, reason: String },

    #[error("Stale reference: {kind} {name} no longer exists in inventory")]
    StaleState { kind: String, name: String },

    #[error("Insufficient capacity on pool {pool}: requested {requested} bytes, available {available} bytes")]
    InsufficientCapacity {
        pool: String,
        requested: u64,
        available: u64,
    },

    #[error("Storage profile {profile} is already registered with different constraints")]
    ProfileConflict { profile: String },

    // =========================================================================
    // Zone Lifecycle Errors
    // =========================================================================
    #[error("Invalid zone transition for {zone}: {from} -> {to}")]
    InvalidZoneTransition {
        zone: String,
        from: String,
        to: String,
    },

    #[error("Zone {zone} cannot be removed: {remaining} volume(s) still depend on it")]
    RemovalBlocked { zone: String, remaining: usize },

    // =========================================================================
    // Annotation Errors
    // =========================================================================
    #[error("Annotation {key} on {subject} not observed within {timeout:?}")]
    AnnotationTimeout {
        subject: String,
        key: String,
        timeout: Duration,
    },

    // =========================================================================
    // API Errors
    // =========================================================================
    #[error("API request validation failed: {0}")]
    ApiValidation(String),

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("Capacity parse error: {0}")]
    CapacityParse(String),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Action to take on error during reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Requeue with exponential backoff
    RequeueWithBackoff,
    /// Requeue after specific duration
    RequeueAfter(Duration),
    /// Don't requeue, wait for changes
    NoRequeue,
}

impl Error {
    /// Determine what action to take for this error
    pub fn action(&self) -> ErrorAction {
        match self {
            // Transient errors - retry with backoff
            Error::Kube(_)
            | Error::PlatformHttp(_)
            | Error::TransportFailure { .. }
            | Error::InsufficientCapacity { .. } => ErrorAction::RequeueWithBackoff,

            // Removal waits on callers applying their migration plans
            Error::RemovalBlocked { .. } => ErrorAction::RequeueAfter(Duration::from_secs(30)),

            Error::AnnotationTimeout { .. } => ErrorAction::RequeueAfter(Duration::from_secs(10)),

            Error::NotReady(_) => ErrorAction::RequeueAfter(Duration::from_secs(5)),

            // Retrying without an inventory change cannot succeed
            Error::Infeasible { .. } | Error::StaleState { .. } => {
                ErrorAction::RequeueAfter(Duration::from_secs(300))
            }

            // Configuration/validation errors - don't retry automatically
            Error::Configuration(_)
            | Error::FeatureDisabled { .. }
            | Error::ApiValidation(_)
            | Error::CapacityParse(_)
            | Error::ProfileConflict { .. }
            | Error::InvalidZoneTransition { .. } => ErrorAction::NoRequeue,

            // All other errors - retry with backoff
            _ => ErrorAction::RequeueWithBackoff,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        !matches!(self.action(), ErrorAction::NoRequeue)
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Kube(_) | Error::PlatformHttp(_) | Error::TransportFailure { .. }
        )
    }

    /// Stale references are reported the same way as a capacity or topology shortfall
    pub fn is_infeasible(&self) -> bool {
        matches!(self, Error::Infeasible { .. } | Error::StaleState { .. })
    }

    /// Stable machine-readable code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            Error::Internal(_) => "internal_error",
            Error::Configuration(_) => "configuration_error",
            Error::FeatureDisabled { .. } => "feature_disabled",
            Error::NotReady(_) => "not_ready",
            Error::Kube(_) | Error::PlatformHttp(_) | Error::TransportFailure { .. } => {
                "transport_failure"
            }
            Error::ResourceNotFound { .. } => "not_found",
            Error::Infeasible { .. } | Error::StaleState { .. } => "infeasible",
            Error::InsufficientCapacity { .. } => "insufficient_capacity",
            Error::ProfileConflict { .. } => "profile_conflict",
            Error::InvalidZoneTransition { .. } => "invalid_zone_transition",
            Error::RemovalBlocked { .. } => "removal_blocked",
            Error::AnnotationTimeout { .. } => "timeout",
            Error::ApiValidation(_) | Error::CapacityParse(_) => "invalid_request",
            Error::JsonParse(_) | Error::YamlParse(_) => "parse_error",
            Error::Io(_) => "io_error",
        }
    }

    /// Wrap a failed read or write against an external collaborator
    pub fn transport(operation: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Error::TransportFailure {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type alias for the engine
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_actions() {
        let err = Error::RemovalBlocked {
            zone: "zone=z1".into(),
            remaining: 2,
        };
        assert_eq!(
            err.action(),
            ErrorAction::RequeueAfter(Duration::from_secs(30))
        );

        let err = Error::Configuration("bad config".into());
        assert_eq!(err.action(), ErrorAction::NoRequeue);

        let err = Error::InvalidZoneTransition {
            zone: "zone=z1".into(),
            from: "Removed".into(),
            to: "MarkedForRemoval".into(),
        };
        assert_eq!(err.action(), ErrorAction::NoRequeue);
    }

    #[test]
    fn test_error_retryable() {
        let transient = Error::transport("read inventory", "connection reset");
        assert!(transient.is_retryable());
        assert!(transient.is_transient());

        let config_err = Error::Configuration("invalid".into());
        assert!(!config_err.is_retryable());
        assert!(!config_err.is_transient());

        let not_ready = Error::NotReady("rebuilding placements".into());
        assert_eq!(
            not_ready.action(),
            ErrorAction::RequeueAfter(Duration::from_secs(5))
        );
        assert_eq!(not_ready.code(), "not_ready");
    }

    #[test]
    fn test_stale_state_is_infeasible() {
        let stale = Error::StaleState {
            kind: "StoragePool".into(),
            name: "ds-1".into(),
        };
        assert!(stale.is_infeasible());
        assert_eq!(stale.code(), "infeasible");
        assert!(!Error::Internal("x".into()).is_infeasible());
    }
}

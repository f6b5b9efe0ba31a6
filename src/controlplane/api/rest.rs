//! REST API Handlers
//!
//! Implements the REST endpoints for claim placement, storage vMotion
//! planning, zone lifecycle, annotation lookups and capacity queries.

use crate::controlplane::orchestrator::{Orchestrator, PoolCapacity, RemovalReport, ZoneView};
use crate::domain::model::{
    AccessibilityRequirement, ClaimKey, PlacementRecord, PoolId, RemovalPolicy, TopologyTerm,
    VolumeId, ZoneKey,
};
use crate::error::Error;
use crate::migration::{MigrationPlan, PlanStatus, PlanTarget};
use crate::placement::PlacementOutcome;
use crate::topology::DomainLifecycle;
use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Category assumed when a zone path segment carries only a value
const DEFAULT_ZONE_CATEGORY: &str = "topology.kubernetes.io/zone";

// =============================================================================
// Request/Response Types
// =============================================================================

/// Placement request body
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceClaimRequest {
    #[serde(default)]
    pub requisite: Vec<TopologyTerm>,
    #[serde(default)]
    pub preferred: Vec<TopologyTerm>,
}

/// Placement response
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceClaimResponse {
    pub place_success: bool,
    pub outcome: PlacementOutcome,
}

/// Storage vMotion plan request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VMotionPlanRequest {
    /// ensureAccessibility or evacuateAll
    pub maintenance_mode: String,
}

/// Storage vMotion plan response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VMotionPlanResponse {
    /// Volume id -> destination pool name
    pub plan: IndexMap<String, String>,
    pub status: PlanStatus,
    pub policy: RemovalPolicy,
    #[serde(default)]
    pub unplaced: Vec<String>,
}

impl From<MigrationPlan> for VMotionPlanResponse {
    fn from(plan: MigrationPlan) -> Self {
        Self {
            plan: plan.mapping(),
            status: plan.status,
            policy: plan.policy,
            unplaced: plan
                .unplaced
                .iter()
                .map(|u| u.volume_id.to_string())
                .collect(),
        }
    }
}

/// Query of the deprecated VM UUID lookup
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmUuidQuery {
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmUuidResponse {
    pub vm_uuid: String,
    pub deprecated: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostAnnotationResponse {
    pub host: String,
    pub key: String,
    pub value: String,
}

/// Zone removal request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneRemovalRequest {
    pub policy: String,
}

/// Decommission plan request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecommissionPlanRequest {
    pub target: PlanTarget,
    pub policy: String,
}

/// Migration apply request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyMigrationRequest {
    pub destination: String,
}

/// API error response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

// =============================================================================
// Error Mapping
// =============================================================================

/// HTTP status for an engine error
pub fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::Infeasible { .. } | Error::StaleState { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        Error::ResourceNotFound { .. } => StatusCode::NOT_FOUND,
        Error::AnnotationTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        Error::ApiValidation(_)
        | Error::CapacityParse(_)
        | Error::JsonParse(_)
        | Error::YamlParse(_) => StatusCode::BAD_REQUEST,
        Error::TransportFailure { .. } | Error::PlatformHttp(_) | Error::Kube(_) => {
            StatusCode::BAD_GATEWAY
        }
        Error::InvalidZoneTransition { .. }
        | Error::RemovalBlocked { .. }
        | Error::InsufficientCapacity { .. }
        | Error::ProfileConflict { .. } => StatusCode::CONFLICT,
        Error::FeatureDisabled { .. } => StatusCode::NOT_IMPLEMENTED,
        Error::NotReady(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Engine error rendered as an API response
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        } else {
            debug!("Request rejected: {}", self.0);
        }

        let details = match &self.0 {
            Error::Infeasible { subject, .. } => Some(subject.clone()),
            Error::RemovalBlocked { remaining, .. } => {
                Some(format!("{} volume(s) remaining", remaining))
            }
            _ => None,
        };

        (
            status,
            Json(ApiErrorResponse {
                error: self.0.code().into(),
                message: self.0.to_string(),
                details,
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

// =============================================================================
// REST Router
// =============================================================================

/// REST API router builder
pub struct RestRouter {
    orchestrator: Arc<Orchestrator>,
}

impl RestRouter {
    /// Create a new REST router
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Build the Axum router for the configured service mode
    pub fn build(self) -> Router {
        let mode = self.orchestrator.config().mode;
        let state = AppState {
            orchestrator: self.orchestrator,
        };

        let mut router = Router::new()
            .route("/healthz", get(health_check))
            .route("/readyz", get(readiness_check));

        if mode.serves_node() {
            router = router
                .route(
                    "/v1/volumes/:volume_id/nodes/:node_name/vm-uuid",
                    get(get_pod_vm_uuid),
                )
                .route("/v1/hosts/:host/annotations/:key", get(get_host_annotation));
        }

        if mode.serves_controller() {
            router = router
                .route(
                    "/v1/claims/:namespace/:name/placement",
                    post(place_claim).get(get_placement).delete(release_claim),
                )
                .route("/v1/pools/:name/vmotion-plan", post(vmotion_plan))
                .route("/v1/zones", get(list_zones))
                .route("/v1/zones/:zone/removal", post(mark_zone))
                .route("/v1/zones/:zone/removal/complete", post(complete_zone))
                .route("/v1/decommission-plans", post(decommission_plan))
                .route("/v1/volumes/:volume_id/migration", post(apply_migration))
                .route("/v1/capacity", get(get_capacity));
        }

        router.with_state(state)
    }
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    orchestrator: Arc<Orchestrator>,
}

/// Zone path segment: `category=value`, or a bare value in the default category
fn parse_zone(segment: &str) -> Result<ZoneKey, ApiError> {
    if segment.contains('=') {
        Ok(segment.parse()?)
    } else if segment.is_empty() {
        Err(Error::ApiValidation("empty zone".into()).into())
    } else {
        Ok(ZoneKey::new(DEFAULT_ZONE_CATEGORY, segment))
    }
}

// =============================================================================
// Node Service Handlers
// =============================================================================

/// Deprecated: wait for the VM UUID annotation of the pod using a volume
async fn get_pod_vm_uuid(
    State(state): State<AppState>,
    Path((volume_id, node_name)): Path<(String, String)>,
    Query(query): Query<VmUuidQuery>,
) -> ApiResult<VmUuidResponse> {
    let vm_uuid = state
        .orchestrator
        .get_pod_vm_uuid_annotation(
            &VolumeId::new(volume_id),
            &node_name,
            query.timeout_secs.map(Duration::from_secs),
        )
        .await?;

    Ok(Json(VmUuidResponse {
        vm_uuid,
        deprecated: true,
    }))
}

async fn get_host_annotation(
    State(state): State<AppState>,
    Path((host, key)): Path<(String, String)>,
) -> ApiResult<HostAnnotationResponse> {
    let value = state.orchestrator.get_host_annotation(&host, &key).await?;
    Ok(Json(HostAnnotationResponse { host, key, value }))
}

// =============================================================================
// Controller Service Handlers
// =============================================================================

/// Place a claim
async fn place_claim(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
    Json(request): Json<PlaceClaimRequest>,
) -> ApiResult<PlaceClaimResponse> {
    let claim = ClaimKey::new(namespace, name);
    info!("Placement requested for claim {}", claim);

    let outcome = state
        .orchestrator
        .place_persistent_volume_claim(
            &claim,
            AccessibilityRequirement {
                requisite: request.requisite,
                preferred: request.preferred,
            },
        )
        .await?;

    Ok(Json(PlaceClaimResponse {
        place_success: true,
        outcome,
    }))
}

async fn get_placement(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
) -> ApiResult<PlacementRecord> {
    let claim = ClaimKey::new(namespace, name);
    state
        .orchestrator
        .placement(&claim)
        .map(Json)
        .ok_or_else(|| {
            Error::ResourceNotFound {
                kind: "PlacementRecord".into(),
                name: claim.to_string(),
            }
            .into()
        })
}

/// Forget the placement of a deleted claim
async fn release_claim(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
) -> ApiResult<PlacementRecord> {
    let claim = ClaimKey::new(namespace, name);
    Ok(Json(state.orchestrator.release_claim(&claim).await?))
}

/// Plan the evacuation of a pool
async fn vmotion_plan(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<VMotionPlanRequest>,
) -> ApiResult<VMotionPlanResponse> {
    let policy: RemovalPolicy = request.maintenance_mode.parse()?;
    let plan = state
        .orchestrator
        .get_storage_vmotion_plan(&PoolId::new(name), policy)
        .await?;
    Ok(Json(plan.into()))
}

async fn list_zones(State(state): State<AppState>) -> ApiResult<Vec<ZoneView>> {
    Ok(Json(state.orchestrator.zones().await?))
}

async fn mark_zone(
    State(state): State<AppState>,
    Path(zone): Path<String>,
    Json(request): Json<ZoneRemovalRequest>,
) -> ApiResult<DomainLifecycle> {
    let zone = parse_zone(&zone)?;
    let policy: RemovalPolicy = request.policy.parse()?;
    warn!("Zone {} marked for removal ({}) via API", zone, policy);
    Ok(Json(
        state.orchestrator.mark_zone_for_removal(&zone, policy).await?,
    ))
}

async fn complete_zone(
    State(state): State<AppState>,
    Path(zone): Path<String>,
) -> ApiResult<RemovalReport> {
    let zone = parse_zone(&zone)?;
    Ok(Json(state.orchestrator.complete_zone_removal(&zone).await?))
}

async fn decommission_plan(
    State(state): State<AppState>,
    Json(request): Json<DecommissionPlanRequest>,
) -> ApiResult<MigrationPlan> {
    let policy: RemovalPolicy = request.policy.parse()?;
    Ok(Json(
        state
            .orchestrator
            .plan_decommission(&request.target, policy)
            .await?,
    ))
}

async fn apply_migration(
    State(state): State<AppState>,
    Path(volume_id): Path<String>,
    Json(request): Json<ApplyMigrationRequest>,
) -> ApiResult<PlacementRecord> {
    Ok(Json(
        state
            .orchestrator
            .apply_migration(&VolumeId::new(volume_id), &PoolId::new(request.destination))
            .await?,
    ))
}

async fn get_capacity(State(state): State<AppState>) -> ApiResult<Vec<PoolCapacity>> {
    Ok(Json(state.orchestrator.capacity().await?))
}

// =============================================================================
// Health
// =============================================================================

/// Health check
async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness check
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    if state.orchestrator.ready().await {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "inventory unavailable")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceMode;
    use crate::controlplane::memory::InMemoryControlPlane;
    use crate::controlplane::orchestrator::OrchestratorConfig;
    use crate::controlplane::platform::memory::InMemoryPlatform;
    use crate::domain::model::{AnnotationSubject, StoragePool, StorageProfile};
    use crate::domain::ports::ClaimSpec;
    use crate::inventory::InventorySnapshot;
    use crate::placement::ProfileCatalog;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    fn zone(value: &str) -> ZoneKey {
        ZoneKey::new(DEFAULT_ZONE_CATEGORY, value)
    }

    async fn router(mode: ServiceMode) -> (Router, Arc<InMemoryControlPlane>) {
        let platform = InMemoryPlatform::new(
            InventorySnapshot::new()
                .with_pool(StoragePool::new("P1", zone("z1"), 100, 0))
                .with_pool(StoragePool::new("P2", zone("z2"), 100, 95)),
        );
        let control_plane = InMemoryControlPlane::new();
        control_plane.put_claim(ClaimSpec {
            claim: ClaimKey::new("default", "data-0"),
            storage_class: Some("shared".into()),
            requested_bytes: 10,
            volume_name: Some("vol-0".into()),
            requested_topology: None,
        });
        let orchestrator = Orchestrator::new(
            OrchestratorConfig {
                mode,
                ..Default::default()
            },
            platform.clone(),
            control_plane.clone(),
            platform,
            ProfileCatalog::with_profiles([StorageProfile::new("shared")]).unwrap(),
        );
        orchestrator.restore().await.unwrap();
        (RestRouter::new(orchestrator).build(), control_plane)
    }

    async fn call(router: &Router, method: &str, uri: &str, body: Option<&str>) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty))
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&Error::Infeasible {
                subject: "pvc".into(),
                reason: "full".into()
            }),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_for(&Error::StaleState {
                kind: "StoragePool".into(),
                name: "P9".into()
            }),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_for(&Error::RemovalBlocked {
                zone: "z".into(),
                remaining: 1
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&Error::transport("read", "reset")),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_for(&Error::ApiValidation("bad".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&Error::NotReady("rebuilding".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_parse_zone_segment() {
        assert_eq!(parse_zone("z1").unwrap(), zone("z1"));
        assert_eq!(
            parse_zone("rack=r7").unwrap(),
            ZoneKey::new("rack", "r7")
        );
        assert!(parse_zone("").is_err());
    }

    #[tokio::test]
    async fn test_place_and_read_back() {
        let (router, _) = router(ServiceMode::Controller).await;

        let (status, body) = call(&router, "POST", "/v1/claims/default/data-0/placement", Some("{}")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["placeSuccess"], true);
        assert_eq!(body["outcome"]["pool"], "P1");

        let (status, body) = call(&router, "GET", "/v1/claims/default/data-0/placement", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["volumeId"], "vol-0");

        let (status, body) = call(&router, "GET", "/v1/claims/default/other/placement", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");
    }

    #[tokio::test]
    async fn test_release_claim_route() {
        let (router, _) = router(ServiceMode::Controller).await;
        call(&router, "POST", "/v1/claims/default/data-0/placement", Some("{}")).await;

        let (status, body) = call(&router, "DELETE", "/v1/claims/default/data-0/placement", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["pool"], "P1");

        let (status, body) = call(&router, "GET", "/v1/capacity", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["committedBytes"], 0);

        let (status, _) = call(&router, "DELETE", "/v1/claims/default/data-0/placement", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_infeasible_placement_is_422() {
        let (router, _) = router(ServiceMode::Full).await;
        let body = r#"{"requisite":[{"topology.kubernetes.io/zone":"z2"}]}"#;

        let (status, body) = call(&router, "POST", "/v1/claims/default/data-0/placement", Some(body)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "infeasible");
    }

    #[tokio::test]
    async fn test_zone_removal_flow() {
        let (router, _) = router(ServiceMode::Controller).await;

        let (status, body) = call(
            &router,
            "POST",
            "/v1/zones/z1/removal",
            Some(r#"{"policy":"evacuateAll"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"]["phase"], "MarkedForRemoval");

        let (status, _) = call(&router, "POST", "/v1/zones/z1/removal/complete", None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = call(&router, "GET", "/v1/zones", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["phase"], "Removed");

        let (status, _) = call(
            &router,
            "POST",
            "/v1/zones/z1/removal",
            Some(r#"{"policy":"evacuateAll"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_vmotion_plan_rejects_unknown_mode() {
        let (router, _) = router(ServiceMode::Controller).await;
        let (status, _) = call(
            &router,
            "POST",
            "/v1/pools/P1/vmotion-plan",
            Some(r#"{"maintenanceMode":"sometimes"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = call(
            &router,
            "POST",
            "/v1/pools/P1/vmotion-plan",
            Some(r#"{"maintenanceMode":"evacuateAll"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "Complete");
    }

    #[tokio::test]
    async fn test_routes_follow_service_mode() {
        let (router, control_plane) = router(ServiceMode::Node).await;
        control_plane.put_annotation(
            AnnotationSubject::Host {
                name: "esx-1".into(),
            },
            "zone",
            "z1",
        );

        let (status, body) = call(&router, "GET", "/v1/hosts/esx-1/annotations/zone", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["value"], "z1");

        let (status, _) = call(&router, "GET", "/v1/capacity", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(&router, "GET", "/healthz", None).await;
        assert_eq!(status, StatusCode::OK);
    }
}

//! TopologyZone Controller
//!
//! Watches `TopologyZone` resources and drives the zone lifecycle from
//! `spec.removal`: a removal request marks the zone, a confirmed request
//! completes it once no placement depends on the zone. The observed
//! lifecycle is written back into `status`.

use crate::controlplane::Orchestrator;
use crate::crd::{TopologyZone, TopologyZoneStatus, ZonePhase};
use crate::domain::model::DomainState;
use crate::error::{Error, ErrorAction, Result};
use crate::topology::DomainLifecycle;
use futures::StreamExt;
use kube::api::{Patch, PatchParams};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher;
use kube::{Api, Client, ResourceExt};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Resync period for zones without pending work
const RESYNC: Duration = Duration::from_secs(300);

/// Requeue period while removal waits on migrations
const BLOCKED_RESYNC: Duration = Duration::from_secs(30);

/// Shared state for reconciliation
pub struct ZoneContext {
    pub client: Client,
    pub orchestrator: Arc<Orchestrator>,
}

/// Run the controller until `shutdown` is cancelled
pub async fn run_zone_controller(ctx: Arc<ZoneContext>, shutdown: CancellationToken) -> Result<()> {
    let zones: Api<TopologyZone> = Api::all(ctx.client.clone());

    if let Err(e) = zones.list(&Default::default()).await {
        error!("TopologyZone CRD not available: {}", e);
        return Err(Error::Configuration(
            "TopologyZone CRD not installed".to_string(),
        ));
    }

    info!("Starting TopologyZone controller");

    Controller::new(zones, watcher::Config::default())
        .graceful_shutdown_on(async move { shutdown.cancelled().await })
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((zone, _)) => debug!("Reconciled zone {}", zone.name),
                Err(e) => warn!("Zone reconcile error: {}", e),
            }
        })
        .await;

    info!("TopologyZone controller stopped");
    Ok(())
}

async fn reconcile(zone: Arc<TopologyZone>, ctx: Arc<ZoneContext>) -> Result<Action> {
    let name = zone.name_any();
    let key = zone.spec.key();
    let orchestrator = &ctx.orchestrator;

    let mut remaining = 0usize;
    let mut message = None;
    let mut requeue = RESYNC;

    if let Some(removal) = &zone.spec.removal {
        if !orchestrator.tracker().is_removed(&key) {
            orchestrator
                .mark_zone_for_removal(&key, removal.policy.into())
                .await?;
        }

        if removal.confirmed {
            match orchestrator.complete_zone_removal(&key).await {
                Ok(report) => {
                    if !report.promoted.is_empty() {
                        message = Some(format!(
                            "promoted {} copy(ies) outside the zone",
                            report.promoted.len()
                        ));
                    }
                }
                Err(Error::RemovalBlocked { remaining: left, .. }) => {
                    remaining = left;
                    message = Some(format!(
                        "waiting on {} volume(s) to migrate out of the zone",
                        left
                    ));
                    requeue = BLOCKED_RESYNC;
                }
                Err(e) => return Err(e),
            }
        }
    } else if orchestrator.tracker().state(&key) != DomainState::Active {
        message = Some("removal cannot be withdrawn once requested".to_string());
    }

    let lifecycle = orchestrator.tracker().lifecycle(&key);
    let status = zone_status(&lifecycle, remaining, message, zone.metadata.generation);

    let changed = zone
        .status
        .as_ref()
        .map(|s| s.phase != status.phase || s.remaining_volumes != status.remaining_volumes)
        .unwrap_or(true);

    if changed {
        info!(
            "Zone {} is {} ({} volume(s) remaining)",
            name, status.phase, status.remaining_volumes
        );
    }

    let api: Api<TopologyZone> = Api::all(ctx.client.clone());
    api.patch_status(
        &name,
        &PatchParams::default(),
        &Patch::Merge(&json!({ "status": status })),
    )
    .await?;

    Ok(Action::requeue(requeue))
}

/// Status of a zone from its tracked lifecycle
pub fn zone_status(
    lifecycle: &DomainLifecycle,
    remaining: usize,
    message: Option<String>,
    generation: Option<i64>,
) -> TopologyZoneStatus {
    let phase = match lifecycle.state {
        DomainState::Active => ZonePhase::Active,
        DomainState::MarkedForRemoval(_) => ZonePhase::MarkedForRemoval,
        DomainState::Removed => ZonePhase::Removed,
    };

    TopologyZoneStatus {
        phase,
        policy: lifecycle.state.removal_policy().map(|p| p.to_string()),
        remaining_volumes: remaining as u32,
        message,
        last_transition_time: lifecycle.removed_at.or(lifecycle.marked_at),
        observed_generation: generation,
    }
}

/// Requeue decision for a failed reconcile
pub fn requeue_for(error: &Error) -> Action {
    match error.action() {
        ErrorAction::RequeueWithBackoff => Action::requeue(Duration::from_secs(15)),
        ErrorAction::RequeueAfter(delay) => Action::requeue(delay),
        ErrorAction::NoRequeue => Action::await_change(),
    }
}

fn error_policy(zone: Arc<TopologyZone>, error: &Error, _ctx: Arc<ZoneContext>) -> Action {
    error!("Reconciliation error for zone {}: {}", zone.name_any(), error);
    requeue_for(error)
}

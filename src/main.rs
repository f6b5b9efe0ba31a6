//! Storage Placement Engine
//!
//! Topology-aware volume placement and decommission migration planning
//! for Kubernetes storage.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                              REST API (axum)                                │
//! │        node routes (annotations)      controller routes (placement)         │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │                               Orchestrator                                  │
//! │  ┌───────────────┐ ┌───────────────┐ ┌───────────────┐ ┌────────────────┐   │
//! │  │   Placement   │ │   Migration   │ │ Zone Lifecycle│ │   Annotation   │   │
//! │  │    Engine     │ │    Planner    │ │    Tracker    │ │   Reconciler   │   │
//! │  └───────┬───────┘ └───────┬───────┘ └───────────────┘ └────────────────┘   │
//! │          └─── Capacity Ledger ───┘                                          │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │   Inventory: CRDs │ HTTP platform │ file/static   Control plane: kube API   │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```

use backoff::ExponentialBackoffBuilder;
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use storage_placement_engine::config::{
    ClusterFlavor, DriverConfig, EngineSettings, FeatureSwitches, InventorySource, ServiceMode,
};
use storage_placement_engine::controlplane::{
    run_zone_controller, ApiServer, ApiServerConfig, InMemoryControlPlane, KubeControlPlane,
    Orchestrator, OrchestratorConfig, PlatformFactory, ZoneContext,
};
use storage_placement_engine::domain::ports::ControlPlaneClientRef;
use storage_placement_engine::placement::ProfileCatalog;
use storage_placement_engine::{Error, Result};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Storage Placement Engine - topology-aware placement and decommission planning
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Service endpoint (tcp://host:port or host:port)
    #[arg(long, env = "CSI_ENDPOINT", default_value = "")]
    endpoint: String,

    /// Cluster flavor (vanilla, workload, guest)
    #[arg(long, env = "CLUSTER_FLAVOR", default_value = "vanilla")]
    cluster_flavor: String,

    /// Service mode (controller, node, full)
    #[arg(long, env = "X_CSI_MODE", default_value = "full")]
    mode: String,

    /// Feature switch ConfigMap name
    #[arg(long = "fss-name", env = "FSS_NAME", default_value = "placement-feature-states")]
    fss_name: String,

    /// Feature switch ConfigMap namespace
    #[arg(long = "fss-namespace", env = "FSS_NAMESPACE", default_value = "kube-system")]
    fss_namespace: String,

    /// Supervisor feature switch ConfigMap name (guest clusters)
    #[arg(
        long = "supervisor-fss-name",
        env = "SUPERVISOR_FSS_NAME",
        default_value = "placement-supervisor-feature-states"
    )]
    supervisor_fss_name: String,

    /// Supervisor feature switch ConfigMap namespace (guest clusters)
    #[arg(
        long = "supervisor-fss-namespace",
        env = "SUPERVISOR_FSS_NAMESPACE",
        default_value = "kube-system"
    )]
    supervisor_fss_namespace: String,

    /// YAML file of feature switches, applied before the ConfigMap
    #[arg(long, env = "FEATURE_STATES_FILE")]
    feature_file: Option<PathBuf>,

    /// YAML settings file (profiles, capacity floor, timeouts, inventory)
    #[arg(long, env = "SETTINGS_FILE")]
    settings: Option<PathBuf>,

    /// Inventory source: crd, static, file:<path>, or an http(s) URL
    #[arg(long, env = "INVENTORY_SOURCE", default_value = "crd")]
    inventory: String,

    /// Run without a Kubernetes cluster
    #[arg(long, env = "STANDALONE")]
    standalone: bool,

    /// Run the TopologyZone controller
    #[arg(long, env = "ENABLE_ZONE_CONTROLLER")]
    zone_controller: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    if args.endpoint.trim().is_empty() {
        error!("CSI_ENDPOINT must be set");
        std::process::exit(1);
    }

    info!("Starting Storage Placement Engine");
    info!("  Version: {}", storage_placement_engine::VERSION);
    info!("  Endpoint: {}", args.endpoint);
    info!("  Mode: {}", args.mode);
    info!("  Standalone mode: {}", args.standalone);

    let shutdown = CancellationToken::new();
    let panicked = Arc::new(AtomicBool::new(false));
    install_panic_hook(shutdown.clone(), panicked.clone());

    let client = if args.standalone {
        None
    } else {
        Some(kube::Client::try_default().await?)
    };

    let config = build_config(&args, client.clone()).await?;

    let adapters = PlatformFactory::create(&config, client.clone())?;
    let control_plane: ControlPlaneClientRef = match &client {
        Some(client) => Arc::new(KubeControlPlane::new(client.clone())),
        None => InMemoryControlPlane::new(),
    };
    let catalog = ProfileCatalog::with_profiles(config.settings.profiles.clone())?;

    let orchestrator = Orchestrator::new(
        OrchestratorConfig::from(config.as_ref()),
        adapters.inventory,
        control_plane,
        adapters.sessions,
        catalog,
    );

    // Nothing that reads placement records may run before they are rebuilt
    restore_placements(&orchestrator).await?;

    // Start zone controller
    if args.zone_controller {
        match &client {
            Some(client) => {
                let ctx = Arc::new(ZoneContext {
                    client: client.clone(),
                    orchestrator: orchestrator.clone(),
                });
                let token = shutdown.clone();
                tokio::spawn(async move {
                    if let Err(e) = run_zone_controller(ctx, token).await {
                        error!("Zone controller error: {}", e);
                    }
                });
            }
            None => warn!("Zone controller needs a cluster, not started in standalone mode"),
        }
    }

    let api_server = ApiServer::new(
        ApiServerConfig {
            rest_addr: config.endpoint,
        },
        orchestrator.clone(),
    );

    // Signals cancel the shared token, which stops the server
    let server_token = api_server.shutdown_token();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        signal_token.cancel();
    });
    let stop_token = shutdown.clone();
    tokio::spawn(async move {
        stop_token.cancelled().await;
        server_token.cancel();
    });

    info!("Starting API server");
    let served = api_server.run().await;
    shutdown.cancel();

    if let Err(e) = orchestrator.shutdown().await {
        error!("Failed to log out platform sessions: {}", e);
    }

    if panicked.load(Ordering::SeqCst) {
        error!("Exiting after panic");
        std::process::exit(1);
    }

    served?;
    info!("Engine shutdown complete");
    Ok(())
}

/// Rebuild placement records, retrying while the cluster or platform is unreachable
async fn restore_placements(orchestrator: &Orchestrator) -> Result<()> {
    let policy = ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_millis(500))
        .with_max_interval(Duration::from_secs(10))
        .with_max_elapsed_time(Some(Duration::from_secs(120)))
        .build();

    let restored = backoff::future::retry(policy, || async {
        orchestrator.restore().await.map_err(|e| {
            if e.is_transient() {
                warn!("Placement restore failed, will retry: {}", e);
                backoff::Error::transient(e)
            } else {
                backoff::Error::permanent(e)
            }
        })
    })
    .await?;

    info!("Placement state ready: {} record(s)", restored);
    Ok(())
}

/// Fold flags, files and ConfigMaps into the process configuration
async fn build_config(args: &Args, client: Option<kube::Client>) -> Result<Arc<DriverConfig>> {
    let flavor: ClusterFlavor = args.cluster_flavor.parse()?;
    let mode: ServiceMode = args.mode.parse()?;
    let inventory: InventorySource = args.inventory.parse()?;

    let settings = match &args.settings {
        Some(path) => EngineSettings::load(path)?,
        None => EngineSettings::default(),
    };

    let mut features = FeatureSwitches::default();
    if let Some(path) = &args.feature_file {
        features.merge(FeatureSwitches::load_file(path)?);
    }

    if let Some(client) = client {
        match FeatureSwitches::load_config_map(client.clone(), &args.fss_namespace, &args.fss_name)
            .await
        {
            Ok(switches) => features.merge(switches),
            Err(Error::ResourceNotFound { .. }) => warn!(
                "Feature switch ConfigMap {}/{} not found, using defaults",
                args.fss_namespace, args.fss_name
            ),
            Err(e) => return Err(e),
        }

        // Guest clusters only get what the supervisor also enables
        if flavor == ClusterFlavor::Guest {
            match FeatureSwitches::load_config_map(
                client,
                &args.supervisor_fss_namespace,
                &args.supervisor_fss_name,
            )
            .await
            {
                Ok(switches) => {
                    for (name, enabled) in switches {
                        if !enabled {
                            features.set(name, false);
                        }
                    }
                }
                Err(e) => warn!("Supervisor feature switches unavailable: {}", e),
            }
        }
    }

    for (name, enabled) in features.iter() {
        info!("  Feature {}: {}", name, enabled);
    }

    DriverConfig::new(&args.endpoint, flavor, mode, features, settings, inventory)
}

// =============================================================================
// Shutdown
// =============================================================================

/// Cancel the shutdown token and remember that a panic happened
fn install_panic_hook(shutdown: CancellationToken, panicked: Arc<AtomicBool>) {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        default_hook(info);
        panicked.store(true, Ordering::SeqCst);
        shutdown.cancel();
    }));
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "kube=info", "tower=warn", "axum=info"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

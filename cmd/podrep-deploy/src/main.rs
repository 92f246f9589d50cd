use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{Json, Router, extract::State, response::IntoResponse, routing::get};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use pkg_constants::paths::{DEFAULT_DATA_DIR, DEFAULT_DEPLOY_CONFIG};
use pkg_constants::state::DEFAULT_STORE_RETRIES;
use pkg_labels::{Applicator, KvApplicator};
use pkg_rc::{HealthMonitor, ReplicationController};
use pkg_rcstore::{KvRcStore, RcStore};
use pkg_scheduler::{ApplicatorScheduler, HttpScheduler, Scheduler};
use pkg_state::client::SlateStore;
use pkg_state::store::KvStore;
use pkg_types::config::{DeployConfigFile, load_config_file};
use pkg_types::manifest::Manifest;
use pkg_types::selector::Selector;

#[derive(Parser, Debug)]
#[command(
    name = "podrep-deploy",
    about = "podrep-deploy keeps a pod manifest replicated across selector-matched nodes.

Example invocation: podrep-deploy --selector app=helloworld --replicas 2 /tmp/helloworld.yaml"
)]
struct Cli {
    /// Path to the pod manifest that will be replicated
    manifest: String,

    /// Path to YAML config file
    #[arg(long, short, default_value = DEFAULT_DEPLOY_CONFIG)]
    config: String,

    /// Node selector expression, e.g. app=helloworld
    #[arg(long)]
    selector: Option<String>,

    /// Number of replicas to keep scheduled
    #[arg(long)]
    replicas: Option<u32>,

    /// Directory for the SlateDB coordination store
    #[arg(long)]
    data_dir: Option<String>,

    /// Port for the /_status endpoint
    #[arg(long)]
    status_port: Option<u16>,

    /// Node inventory endpoint to query for selector matches;
    /// falls back to node labels in the coordination store when unset
    #[arg(long)]
    node_endpoint: Option<String>,

    /// Attempts per store round-trip before surfacing an error
    #[arg(long)]
    retries: Option<u32>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    // Merge: CLI args > config file > defaults
    let file_cfg: DeployConfigFile = load_config_file(&cli.config)?;
    let selector_expr = cli.selector.or(file_cfg.selector).unwrap_or_default();
    let replicas = cli.replicas.or(file_cfg.replicas).unwrap_or(1);
    let data_dir = cli
        .data_dir
        .or(file_cfg.data_dir)
        .unwrap_or_else(|| DEFAULT_DATA_DIR.to_string());
    let status_port = cli.status_port.or(file_cfg.status_port).unwrap_or(8080);
    let node_endpoint = cli.node_endpoint.or(file_cfg.node_endpoint);
    let retries = cli
        .retries
        .or(file_cfg.retries)
        .unwrap_or(DEFAULT_STORE_RETRIES);

    // Validation happens before any store interaction.
    let manifest = Manifest::from_file(&cli.manifest)?;
    let selector = Selector::parse(&selector_expr)?;

    info!("Starting podrep-deploy");
    info!("  Manifest:  {} (pod {})", cli.manifest, manifest.id);
    info!("  Selector:  '{}'", selector);
    info!("  Replicas:  {}", replicas);
    info!("  Data dir:  {}", data_dir);

    let slate = SlateStore::open(&data_dir).await?;
    let store: Arc<dyn KvStore> = slate.clone();
    let applicator: Arc<dyn Applicator> = Arc::new(KvApplicator::new(store.clone(), retries));
    let scheduler: Arc<dyn Scheduler> = match &node_endpoint {
        Some(endpoint) => {
            info!("  Nodes via: {}", endpoint);
            Arc::new(HttpScheduler::new(endpoint.clone()))
        }
        None => Arc::new(ApplicatorScheduler::new(applicator.clone())),
    };
    let rc_store: Arc<dyn RcStore> =
        Arc::new(KvRcStore::new(store.clone(), applicator.clone(), retries));

    let pod_labels = HashMap::from([("deployed-by".to_string(), "podrep-deploy".to_string())]);
    let record = rc_store.create(manifest, selector, pod_labels).await?;
    info!("Created replication controller {}", record.id);

    let controller = ReplicationController::new(
        record.id.clone(),
        rc_store.clone(),
        scheduler,
        applicator,
        store,
    );
    let (errors, ticks, stop) = controller.watch_desires().into_parts();

    let health = HealthMonitor::new();
    health.monitor(&format!("rc-{}", record.id), errors, ticks);
    tokio::spawn(serve_status(
        SocketAddr::from(([0, 0, 0, 0], status_port)),
        health,
    ));

    rc_store.set_desired_replicas(&record.id, replicas).await?;
    info!("Desired replicas set to {}, converging", replicas);

    // Report placement until the operator asks us to stop.
    let mut converged = false;
    loop {
        tokio::select! {
            _ = shutdown_signal() => break,
            _ = tokio::time::sleep(Duration::from_secs(3)) => {
                match controller.current_nodes().await {
                    Ok(current) => {
                        if current.len() as u32 == replicas && !converged {
                            converged = true;
                            info!("Converged on {:?}", current);
                        } else if !converged {
                            info!("Currently on {:?} ({}/{})", current, current.len(), replicas);
                        }
                    }
                    Err(e) => warn!("Couldn't read current nodes: {}", e),
                }
            }
        }
    }

    // Cascade quit to the watch loop and wait for its acknowledgement;
    // no writes happen after this returns.
    info!("Stopping watch loop");
    stop.stop().await;
    slate.close().await?;
    info!("Terminating");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("Interrupt received, stopping work"),
            _ = terminate.recv() => info!("SIGTERM received, stopping work"),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
        info!("Interrupt received, stopping work");
    }
}

async fn serve_status(addr: SocketAddr, health: HealthMonitor) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/_status", get(status_handler))
        .with_state(health);
    let listener = TcpListener::bind(addr).await?;
    info!("Status endpoint on http://{}/_status", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn status_handler(State(health): State<HealthMonitor>) -> impl IntoResponse {
    let loops = health.snapshot().await;
    let status = if loops.values().all(|l| l.consecutive_errors == 0) {
        "ok"
    } else {
        "degraded"
    };
    Json(serde_json::json!({ "status": status, "loops": loops }))
}

//! Azure Disk Operator
//!
//! Deploys the Azure Disk CSI driver and keeps it configured for the
//! platform the cluster runs on.
//!
//! ```text
//!  Infrastructure ──▶ detect ──▶ Standard   ──▶ storageclass.yaml, snapshot class
//!                         └────▶ Restricted ──▶ *_restricted.yaml + config synchronizer
//! ```

use anyhow::Context;
use clap::Parser;
use hyper::{Body, Response, StatusCode};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use azure_disk_operator::cluster::{
    node_cache, secret_cache, watch_config_map, KubeConfigMaps, KubeInfrastructureReader,
};
use azure_disk_operator::controlplane::IMAGE_PLACEHOLDERS;
use azure_disk_operator::{
    ApplyEngine, AssetReader, Collaborators, DirectoryAssets, EmbeddedAssets, Error,
    ImageReference, Operator, OperatorConfig, OperatorMetrics, PipelineSettings, ProxyConfig,
    SecretReference, SyncConfig,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Azure Disk Operator - CSI driver lifecycle for Azure and Azure Stack Hub
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Namespace the driver is deployed into
    #[arg(long, env = "OPERATOR_NAMESPACE", default_value = "openshift-cluster-csi-drivers")]
    namespace: String,

    /// Privileged namespace holding the cloud provider config
    #[arg(long, env = "CONFIG_NAMESPACE", default_value = "openshift-config")]
    config_namespace: String,

    /// Credentials secret in the operator namespace
    #[arg(long, env = "CREDENTIALS_SECRET", default_value = "azure-disk-credentials")]
    secret_name: String,

    /// Source ConfigMap in the config namespace
    #[arg(long, env = "SOURCE_CONFIG_MAP", default_value = "cloud-provider-config")]
    source_config_map: String,

    /// Destination ConfigMap in the operator namespace
    #[arg(long, env = "DESTINATION_CONFIG_MAP", default_value = "azure-stack-config")]
    destination_config_map: String,

    /// Keys copied from the source ConfigMap; empty copies every key
    #[arg(long, env = "MIRRORED_KEYS", value_delimiter = ',', default_value = "endpoints")]
    mirrored_keys: Vec<String>,

    /// CSI driver image
    #[arg(long, env = "DRIVER_IMAGE", default_value = "")]
    driver_image: String,

    #[arg(long, env = "PROVISIONER_IMAGE", default_value = "")]
    provisioner_image: String,

    #[arg(long, env = "ATTACHER_IMAGE", default_value = "")]
    attacher_image: String,

    #[arg(long, env = "RESIZER_IMAGE", default_value = "")]
    resizer_image: String,

    #[arg(long, env = "SNAPSHOTTER_IMAGE", default_value = "")]
    snapshotter_image: String,

    #[arg(long, env = "NODE_DRIVER_REGISTRAR_IMAGE", default_value = "")]
    node_driver_registrar_image: String,

    #[arg(long, env = "LIVENESS_PROBE_IMAGE", default_value = "")]
    liveness_probe_image: String,

    /// Image providing the credentials injector init container
    #[arg(long, env = "CLUSTER_CLOUD_CONTROLLER_MANAGER_OPERATOR_IMAGE", default_value = "")]
    cluster_cloud_controller_manager_operator_image: String,

    #[arg(long, env = "HTTP_PROXY")]
    http_proxy: Option<String>,

    #[arg(long, env = "HTTPS_PROXY")]
    https_proxy: Option<String>,

    #[arg(long, env = "NO_PROXY")]
    no_proxy: Option<String>,

    /// Seconds between full apply passes
    #[arg(long, env = "RESYNC_INTERVAL", default_value = "60")]
    resync_interval_secs: u64,

    /// Seconds between config synchronizer passes
    #[arg(long, env = "SYNC_INTERVAL", default_value = "60")]
    sync_interval_secs: u64,

    /// Directory overriding the embedded templates
    #[arg(long, env = "ASSET_DIR")]
    asset_dir: Option<PathBuf>,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn image(&self, env: &str) -> &str {
        match env {
            "DRIVER_IMAGE" => &self.driver_image,
            "PROVISIONER_IMAGE" => &self.provisioner_image,
            "ATTACHER_IMAGE" => &self.attacher_image,
            "RESIZER_IMAGE" => &self.resizer_image,
            "SNAPSHOTTER_IMAGE" => &self.snapshotter_image,
            "NODE_DRIVER_REGISTRAR_IMAGE" => &self.node_driver_registrar_image,
            "LIVENESS_PROBE_IMAGE" => &self.liveness_probe_image,
            "CLUSTER_CLOUD_CONTROLLER_MANAGER_OPERATOR_IMAGE" => {
                &self.cluster_cloud_controller_manager_operator_image
            }
            _ => "",
        }
    }

    fn operator_config(&self) -> OperatorConfig {
        let defaults = OperatorConfig::default();

        let pipeline = PipelineSettings {
            images: IMAGE_PLACEHOLDERS
                .iter()
                .map(|(placeholder, env)| ImageReference::new(*placeholder, self.image(env)))
                .collect(),
            proxy: ProxyConfig {
                http_proxy: self.http_proxy.clone(),
                https_proxy: self.https_proxy.clone(),
                no_proxy: self.no_proxy.clone(),
            },
            secret: SecretReference::new(self.namespace.clone(), self.secret_name.clone()),
            ..defaults.pipeline
        };

        let sync = SyncConfig {
            source_namespace: self.config_namespace.clone(),
            source_name: self.source_config_map.clone(),
            destination_namespace: self.namespace.clone(),
            destination_name: self.destination_config_map.clone(),
            mirrored_keys: self
                .mirrored_keys
                .iter()
                .filter(|k| !k.is_empty())
                .cloned()
                .collect(),
            resync_interval: Duration::from_secs(self.sync_interval_secs),
            ..defaults.sync
        };

        OperatorConfig {
            namespace: self.namespace.clone(),
            pipeline,
            sync,
            resync_interval: Duration::from_secs(self.resync_interval_secs),
        }
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args)?;

    info!("Starting Azure Disk Operator");
    info!("  Version: {}", azure_disk_operator::VERSION);
    info!("  Namespace: {}", args.namespace);
    info!("  Asset directory: {:?}", args.asset_dir);

    let config = args.operator_config();
    let metrics = Arc::new(OperatorMetrics::new()?);
    let started = Arc::new(AtomicBool::new(false));
    let shutdown = CancellationToken::new();

    let client = kube::Client::try_default()
        .await
        .context("creating Kubernetes client")?;

    // Caches
    let changes = Arc::new(Notify::new());
    let nodes = Arc::new(node_cache(client.clone(), changes.clone(), shutdown.clone()));
    let secrets = Arc::new(secret_cache(
        client.clone(),
        &config.pipeline.secret.namespace,
        &config.pipeline.secret.name,
        changes.clone(),
        shutdown.clone(),
    ));
    let source_changes = watch_config_map(
        client.clone(),
        &config.sync.source_namespace,
        &config.sync.source_name,
        shutdown.clone(),
    );

    let assets: Arc<dyn AssetReader> = match &args.asset_dir {
        Some(dir) => Arc::new(DirectoryAssets::new(dir)),
        None => Arc::new(EmbeddedAssets),
    };

    // Start health server
    let health_addr = parse_addr(&args.health_addr)?;
    let node_watch = nodes.clone();
    let secret_watch = secrets.clone();
    let ready = readiness(
        started.clone(),
        vec![
            Arc::new(move || node_watch.is_running()) as ReadyCheck,
            Arc::new(move || secret_watch.is_running()) as ReadyCheck,
        ],
    );
    tokio::spawn(async move {
        if let Err(e) = run_health_server(health_addr, ready).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let metrics_addr = parse_addr(&args.metrics_addr)?;
    let server_metrics = metrics.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(metrics_addr, server_metrics).await {
            error!("Metrics server error: {}", e);
        }
    });

    // Stop on SIGINT / SIGTERM
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received");
        signal_token.cancel();
    });

    let collaborators = Collaborators {
        infrastructure: Arc::new(KubeInfrastructureReader::new(client.clone())),
        config_maps: Arc::new(KubeConfigMaps::new(client.clone())),
        nodes,
        secrets,
        assets,
        engine: Arc::new(ApplyEngine::new(client, metrics.clone())),
        metrics,
        changes: Some(changes),
        source_changes: Some(source_changes),
    };

    // Ready only once the platform is detected and every task is running
    let running = match Operator::new(config, collaborators).start(shutdown.clone()).await {
        Ok(running) => running,
        Err(e) => {
            error!(fatal = e.is_fatal(), "Operator failed to start: {}", e);
            shutdown.cancel();
            return Err(e.into());
        }
    };
    started.store(true, Ordering::SeqCst);
    info!("Operator ready on {} platform", running.variant());

    let result = running.wait().await;
    started.store(false, Ordering::SeqCst);
    shutdown.cancel();

    match result {
        Ok(()) => {
            info!("Operator shutdown complete");
            Ok(())
        }
        Err(e) => {
            error!(fatal = e.is_fatal(), "Operator failed: {}", e);
            Err(e.into())
        }
    }
}

fn parse_addr(addr: &str) -> Result<SocketAddr, Error> {
    addr.parse()
        .map_err(|e| Error::Configuration(format!("Invalid bind address {}: {}", addr, e)))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
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
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) -> anyhow::Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse()?)
        .add_directive("kube=info".parse()?)
        .add_directive("tower=warn".parse()?);

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
    Ok(())
}

// =============================================================================
// Health Server
// =============================================================================

fn text_response(status: StatusCode, body: impl Into<Body>) -> Response<Body> {
    let mut response = Response::new(body.into());
    *response.status_mut() = status;
    response
}

/// Condition checked on every `/readyz` request
type ReadyCheck = Arc<dyn Fn() -> bool + Send + Sync>;

/// Ready once started and while every check passes
fn readiness(started: Arc<AtomicBool>, checks: Vec<ReadyCheck>) -> ReadyCheck {
    Arc::new(move || started.load(Ordering::SeqCst) && checks.iter().all(|check| check()))
}

async fn run_health_server(addr: SocketAddr, ready: ReadyCheck) -> Result<(), Error> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Request, Server};

    let make_svc = make_service_fn(move |_conn| {
        let ready = ready.clone();
        async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req: Request<Body>| {
                let ready = ready.clone();
                async move {
                    let response = match req.uri().path() {
                        "/healthz" | "/livez" => text_response(StatusCode::OK, "ok"),
                        "/readyz" if ready() => text_response(StatusCode::OK, "ok"),
                        "/readyz" => text_response(StatusCode::SERVICE_UNAVAILABLE, "not ready"),
                        _ => text_response(StatusCode::NOT_FOUND, "not found"),
                    };
                    Ok::<_, std::convert::Infallible>(response)
                }
            }))
        }
    });

    info!("Health server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Health server error: {}", e)))?;

    Ok(())
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: SocketAddr, metrics: Arc<OperatorMetrics>) -> Result<(), Error> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Request, Server};

    let make_svc = make_service_fn(move |_conn| {
        let metrics = metrics.clone();
        async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req: Request<Body>| {
                let metrics = metrics.clone();
                async move {
                    let response = match req.uri().path() {
                        "/metrics" => match metrics.encode() {
                            Ok(buffer) => {
                                let mut response = text_response(StatusCode::OK, buffer);
                                response.headers_mut().insert(
                                    hyper::header::CONTENT_TYPE,
                                    hyper::header::HeaderValue::from_static(
                                        "text/plain; version=0.0.4",
                                    ),
                                );
                                response
                            }
                            Err(e) => text_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
                        },
                        _ => text_response(StatusCode::NOT_FOUND, "not found"),
                    };
                    Ok::<_, std::convert::Infallible>(response)
                }
            }))
        }
    });

    info!("Metrics server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Metrics server error: {}", e)))?;

    Ok(())
}

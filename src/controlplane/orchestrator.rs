//! Operator Orchestrator
//!
//! Wires the platform detector, asset selection, hook pipelines, config
//! synchronizer and apply engine together:
//! - Detects the platform once; failure is fatal
//! - Selects the static assets and builds the controller and node pipelines
//! - Starts the config synchronizer on Azure Stack Hub only
//! - Hands everything to the reconciliation engine
//!
//! All long-running tasks share one cancellation token. The first task to
//! fail cancels the others.

use crate::controlplane::assets::select_assets;
use crate::controlplane::engine::{EngineConfig, ReconciliationEngineRef};
use crate::controlplane::hooks::{PipelineSettings, SecretReference};
use crate::controlplane::platform::detect_platform;
use crate::controlplane::sync::{ConfigSynchronizer, SyncConfig};
use crate::domain::ports::{
    AssetReaderRef, ConfigMapStoreRef, InfrastructureReaderRef, NodeListerRef, PlatformVariant,
    SecretListerRef,
};
use crate::error::{Error, Result};
use crate::metrics::OperatorMetrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

// =============================================================================
// Operator Configuration
// =============================================================================

/// Configuration for the operator
#[derive(Debug, Clone)]
pub struct OperatorConfig {
    /// Namespace the driver is deployed into
    pub namespace: String,
    /// Images, proxy and secret used by the workload pipelines
    pub pipeline: PipelineSettings,
    /// Config synchronizer settings (Azure Stack Hub only)
    pub sync: SyncConfig,
    /// Interval between full apply passes
    pub resync_interval: Duration,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        let namespace = "openshift-cluster-csi-drivers".to_string();
        Self {
            pipeline: PipelineSettings {
                secret: SecretReference::new(namespace.clone(), "azure-disk-credentials"),
                ..Default::default()
            },
            sync: SyncConfig {
                destination_namespace: namespace.clone(),
                ..Default::default()
            },
            namespace,
            resync_interval: Duration::from_secs(60),
        }
    }
}

// =============================================================================
// Collaborators
// =============================================================================

/// Cluster-facing dependencies of the operator
pub struct Collaborators {
    pub infrastructure: InfrastructureReaderRef,
    pub config_maps: ConfigMapStoreRef,
    pub nodes: NodeListerRef,
    pub secrets: SecretListerRef,
    pub assets: AssetReaderRef,
    pub engine: ReconciliationEngineRef,
    pub metrics: Arc<OperatorMetrics>,
    /// Signalled when a cached node or secret changes
    pub changes: Option<Arc<Notify>>,
    /// Source ConfigMap change notifications for the synchronizer
    pub source_changes: Option<mpsc::Receiver<()>>,
}

// =============================================================================
// Operator
// =============================================================================

pub struct Operator {
    config: OperatorConfig,
    collaborators: Collaborators,
}

impl Operator {
    pub fn new(config: OperatorConfig, collaborators: Collaborators) -> Self {
        Self {
            config,
            collaborators,
        }
    }

    /// Detect the platform and start the long-running tasks
    pub async fn start(self, shutdown: CancellationToken) -> Result<RunningOperator> {
        let Operator {
            config,
            collaborators,
        } = self;

        let variant = detect_platform(collaborators.infrastructure.as_ref()).await?;
        collaborators.metrics.record_platform(variant);

        let assets = select_assets(variant);
        info!(
            "Selected {} and {} for {} platform",
            assets.storage_class, assets.snapshot_class, variant
        );

        let mut settings = config.pipeline.clone();
        settings.platform_fields.config_map_name = config.sync.destination_name.clone();

        let mut tasks = JoinSet::new();

        let synchronizer = if variant.is_restricted() {
            let synchronizer = ConfigSynchronizer::new(
                config.sync.clone(),
                collaborators.config_maps.clone(),
                collaborators.metrics.clone(),
            );
            let changes = collaborators
                .source_changes
                .unwrap_or_else(|| mpsc::channel(1).1);
            let task = synchronizer.clone().run(shutdown.clone(), changes);
            tasks.spawn(async move { ("config-synchronizer", task.await) });
            Some(synchronizer)
        } else {
            None
        };

        let engine_config = EngineConfig {
            variant,
            namespace: config.namespace.clone(),
            assets,
            reader: collaborators.assets.clone(),
            controller_pipeline: settings.controller_pipeline(variant),
            node_pipeline: settings.node_pipeline(variant),
            nodes: collaborators.nodes.clone(),
            secrets: collaborators.secrets.clone(),
            resync_interval: config.resync_interval,
            changes: collaborators.changes.clone(),
        };
        let engine = collaborators.engine.clone();
        let token = shutdown.clone();
        tasks.spawn(async move { ("reconciliation-engine", engine.run(engine_config, token).await) });

        info!("Operator started on {} platform", variant);

        Ok(RunningOperator {
            variant,
            synchronizer,
            tasks,
            shutdown,
        })
    }
}

/// Handle to the started operator tasks
pub struct RunningOperator {
    variant: PlatformVariant,
    synchronizer: Option<Arc<ConfigSynchronizer>>,
    tasks: JoinSet<(&'static str, Result<()>)>,
    shutdown: CancellationToken,
}

impl RunningOperator {
    pub fn variant(&self) -> PlatformVariant {
        self.variant
    }

    /// The config synchronizer, running on Azure Stack Hub only
    pub fn synchronizer(&self) -> Option<&Arc<ConfigSynchronizer>> {
        self.synchronizer.as_ref()
    }

    /// Wait for every task to stop. The first failure cancels the rest and is
    /// returned once all tasks have exited.
    pub async fn wait(mut self) -> Result<()> {
        let mut first_error = None;

        while let Some(joined) = self.tasks.join_next().await {
            let failure = match joined {
                Ok((task, Ok(()))) => {
                    info!("{} stopped", task);
                    None
                }
                Ok((task, Err(e))) => {
                    error!("{} failed: {}", task, e);
                    Some(e)
                }
                Err(e) => {
                    error!("Operator task panicked: {}", e);
                    Some(Error::Internal(format!("task panicked: {}", e)))
                }
            };

            if let Some(e) = failure {
                self.shutdown.cancel();
                first_error.get_or_insert(e);
            }
        }

        first_error.map_or(Ok(()), Err)
    }
}

/// Start the operator and run it until shutdown or the first task failure
pub async fn run_operator(
    config: OperatorConfig,
    collaborators: Collaborators,
    shutdown: CancellationToken,
) -> Result<()> {
    Operator::new(config, collaborators)
        .start(shutdown)
        .await?
        .wait()
        .await
}

//! Reconciliation Engine
//!
//! Applies the selected static assets and the rendered controller and node
//! workloads to the cluster, then keeps re-applying them so drift is
//! corrected. A tick fires on the resync interval or whenever the node or
//! secret caches report a change.
//!
//! A failed resource never stops the loop; it is logged, counted and retried.
//! The delay before the retry follows the error's [`ErrorAction`]: transient
//! failures back off exponentially, a secret that is not cached yet is retried
//! shortly, and configuration errors wait for the next resync or change.

use crate::controlplane::assets::{AssetSet, CONTROLLER_ASSET, NODE_ASSET};
use crate::controlplane::hooks::{HookContext, Pipeline, WorkloadKind, WorkloadTemplate};
use crate::domain::ports::{AssetReader, AssetReaderRef, NodeListerRef, PlatformVariant, SecretListerRef};
use crate::error::{Error, ErrorAction, Result};
use crate::metrics::OperatorMetrics;
use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use kube::api::{Api, DynamicObject, Patch, PatchParams};
use kube::core::GroupVersionKind;
use kube::discovery::{self, ApiCapabilities, ApiResource, Scope};
use kube::Client;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Field manager used for server-side apply
pub const FIELD_MANAGER: &str = "azure-disk-operator";

/// First retry delay after a transient failure
const RETRY_INITIAL: Duration = Duration::from_secs(1);

// =============================================================================
// Engine Configuration
// =============================================================================

/// Everything the engine needs to drive the cluster towards the desired state
#[derive(Clone)]
pub struct EngineConfig {
    pub variant: PlatformVariant,
    /// Namespace for namespaced resources that do not set one
    pub namespace: String,
    pub assets: AssetSet,
    pub reader: AssetReaderRef,
    pub controller_pipeline: Pipeline,
    pub node_pipeline: Pipeline,
    pub nodes: NodeListerRef,
    pub secrets: SecretListerRef,
    /// Interval between full apply passes
    pub resync_interval: Duration,
    /// Signalled by the caches when a watched object changes
    pub changes: Option<Arc<Notify>>,
}

impl EngineConfig {
    fn context(&self) -> HookContext<'_> {
        HookContext {
            variant: self.variant,
            nodes: self.nodes.as_ref(),
            secrets: self.secrets.as_ref(),
        }
    }

    /// Render one workload from its base asset
    pub fn render(&self, kind: WorkloadKind) -> Result<WorkloadTemplate> {
        let (asset, pipeline) = match kind {
            WorkloadKind::Controller => (CONTROLLER_ASSET, &self.controller_pipeline),
            WorkloadKind::Node => (NODE_ASSET, &self.node_pipeline),
        };
        render_workload(kind, asset, self.reader.as_ref(), pipeline, &self.context())
    }

    /// Wait for the next tick, at most `delay`. Returns false on shutdown.
    pub async fn wait_for_tick(&self, delay: Duration, shutdown: &CancellationToken) -> bool {
        let changed = async {
            match &self.changes {
                Some(notify) => notify.notified().await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = shutdown.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
            _ = changed => {
                debug!("Watched object changed, reconciling");
                true
            }
        }
    }
}

/// Backoff for transient failures, capped at the resync interval
pub fn retry_backoff(resync_interval: Duration) -> ExponentialBackoff {
    ExponentialBackoffBuilder::new()
        .with_initial_interval(RETRY_INITIAL.min(resync_interval))
        .with_max_interval(resync_interval)
        .with_max_elapsed_time(None)
        .build()
}

/// Delay before the next pass given the actions of the resources that failed.
///
/// Never longer than the resync interval. The backoff advances once per pass
/// with a transient failure and resets otherwise.
pub fn next_delay(
    resync_interval: Duration,
    failed: &[ErrorAction],
    backoff: &mut ExponentialBackoff,
) -> Duration {
    let mut delay = resync_interval;

    if failed.contains(&ErrorAction::RequeueWithBackoff) {
        delay = delay.min(backoff.next_backoff().unwrap_or(resync_interval));
    } else {
        backoff.reset();
    }

    for action in failed {
        if let ErrorAction::RequeueAfter(after) = action {
            delay = delay.min(*after);
        }
    }
    delay
}

/// Parse a workload asset and run it through its pipeline
pub fn render_workload(
    kind: WorkloadKind,
    asset: &str,
    reader: &dyn AssetReader,
    pipeline: &Pipeline,
    ctx: &HookContext<'_>,
) -> Result<WorkloadTemplate> {
    let bytes = reader.read(asset)?;
    let base = WorkloadTemplate::parse(kind, asset, &bytes)?;
    pipeline.render(&base, ctx)
}

/// Parse a static asset into an untyped object
pub fn parse_static(name: &str, bytes: &[u8]) -> Result<DynamicObject> {
    let object: DynamicObject = serde_yaml::from_slice(bytes).map_err(|e| Error::InvalidTemplate {
        name: name.to_string(),
        reason: e.to_string(),
    })?;

    if object.types.is_none() || object.metadata.name.is_none() {
        return Err(Error::InvalidTemplate {
            name: name.to_string(),
            reason: "missing apiVersion, kind or metadata.name".into(),
        });
    }
    Ok(object)
}

// =============================================================================
// Engine Port
// =============================================================================

/// Drives the cluster towards the rendered desired state until cancelled
#[async_trait]
pub trait ReconciliationEngine: Send + Sync {
    async fn run(&self, config: EngineConfig, shutdown: CancellationToken) -> Result<()>;
}

pub type ReconciliationEngineRef = Arc<dyn ReconciliationEngine>;

// =============================================================================
// Server-Side Apply Engine
// =============================================================================

/// Engine applying resources with server-side apply
pub struct ApplyEngine {
    client: Client,
    metrics: Arc<OperatorMetrics>,
    /// Discovery results keyed by group/version/kind
    resources: Mutex<HashMap<GroupVersionKind, (ApiResource, ApiCapabilities)>>,
}

impl ApplyEngine {
    pub fn new(client: Client, metrics: Arc<OperatorMetrics>) -> Self {
        Self {
            client,
            metrics,
            resources: Mutex::new(HashMap::new()),
        }
    }

    async fn resolve(&self, gvk: &GroupVersionKind) -> Result<(ApiResource, ApiCapabilities)> {
        let cached = self.resources.lock().get(gvk).cloned();
        if let Some(found) = cached {
            return Ok(found);
        }
        let found = discovery::pinned_kind(&self.client, gvk).await?;
        self.resources.lock().insert(gvk.clone(), found.clone());
        Ok(found)
    }

    async fn apply_static(&self, config: &EngineConfig, name: &str) -> Result<()> {
        let bytes = config.reader.read(name)?;
        let mut object = parse_static(name, &bytes)?;

        let types = object.types.clone().ok_or_else(|| Error::InvalidTemplate {
            name: name.to_string(),
            reason: "missing apiVersion or kind".into(),
        })?;
        let gvk = match types.api_version.split_once('/') {
            Some((group, version)) => GroupVersionKind::gvk(group, version, &types.kind),
            None => GroupVersionKind::gvk("", &types.api_version, &types.kind),
        };
        let (resource, caps) = self.resolve(&gvk).await?;

        let object_name = object.metadata.name.clone().unwrap_or_default();
        let api: Api<DynamicObject> = match caps.scope {
            Scope::Namespaced => {
                let namespace = object
                    .metadata
                    .namespace
                    .get_or_insert_with(|| config.namespace.clone())
                    .clone();
                Api::namespaced_with(self.client.clone(), &namespace, &resource)
            }
            Scope::Cluster => Api::all_with(self.client.clone(), &resource),
        };

        api.patch(
            &object_name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(&object),
        )
        .await?;

        debug!(asset = name, kind = %gvk.kind, name = %object_name, "Applied static asset");
        Ok(())
    }

    async fn apply_workload(&self, config: &EngineConfig, kind: WorkloadKind) -> Result<()> {
        let rendered = config.render(kind)?;
        let name = rendered.name().to_string();
        let params = PatchParams::apply(FIELD_MANAGER).force();

        match rendered {
            WorkloadTemplate::Controller(mut deployment) => {
                let namespace = deployment
                    .metadata
                    .namespace
                    .get_or_insert_with(|| config.namespace.clone())
                    .clone();
                let api: Api<Deployment> = Api::namespaced(self.client.clone(), &namespace);
                api.patch(&name, &params, &Patch::Apply(&deployment)).await?;
            }
            WorkloadTemplate::Node(mut daemon_set) => {
                let namespace = daemon_set
                    .metadata
                    .namespace
                    .get_or_insert_with(|| config.namespace.clone())
                    .clone();
                let api: Api<DaemonSet> = Api::namespaced(self.client.clone(), &namespace);
                api.patch(&name, &params, &Patch::Apply(&daemon_set)).await?;
            }
        }

        debug!(workload = %kind, name = %name, "Applied workload");
        Ok(())
    }

    fn record(&self, resource: &str, result: &Result<()>) {
        let label = match result {
            Ok(()) => "success",
            Err(_) => "error",
        };
        self.metrics
            .reconcile_passes
            .with_label_values(&[resource, label])
            .inc();

        if let Err(e) = result {
            if e.is_configuration() {
                error!(resource, error = %e, "Cannot reconcile resource until configuration is fixed");
            } else {
                warn!(resource, error = %e, "Failed to reconcile resource, will retry");
            }
        }
    }

    /// Apply every resource once, returning the action for each failure
    async fn reconcile_once(&self, config: &EngineConfig) -> Vec<ErrorAction> {
        let mut failed = Vec::new();

        for name in config.assets.names() {
            let result = self.apply_static(config, name).await;
            self.record(name, &result);
            if let Err(e) = result {
                failed.push(e.action());
            }
        }

        for kind in [WorkloadKind::Controller, WorkloadKind::Node] {
            let result = self.apply_workload(config, kind).await;
            self.record(&kind.to_string(), &result);
            if let Err(e) = result {
                failed.push(e.action());
            }
        }

        failed
    }
}

#[async_trait]
impl ReconciliationEngine for ApplyEngine {
    async fn run(&self, config: EngineConfig, shutdown: CancellationToken) -> Result<()> {
        info!(
            "Starting apply engine for {} platform ({} static assets)",
            config.variant,
            config.assets.len()
        );

        let mut backoff = retry_backoff(config.resync_interval);

        loop {
            let failed = tokio::select! {
                _ = shutdown.cancelled() => break,
                failed = self.reconcile_once(&config) => failed,
            };

            let delay = next_delay(config.resync_interval, &failed, &mut backoff);
            if failed.is_empty() {
                debug!("Reconcile pass complete");
            } else {
                warn!(failures = failed.len(), next_in = ?delay, "Reconcile pass completed with failures");
            }

            if !config.wait_for_tick(delay, &shutdown).await {
                break;
            }
        }

        info!("Apply engine stopped");
        Ok(())
    }
}

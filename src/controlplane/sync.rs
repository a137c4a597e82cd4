//! Config Synchronizer
//!
//! On Azure Stack Hub the cloud endpoint document lives in a ConfigMap in the
//! privileged config namespace. This loop mirrors the relevant keys into a
//! ConfigMap in the operator namespace, where the driver pods can mount it.
//!
//! ```text
//!   Idle ──(tick | source change)──▶ Reconciling ──(written / unchanged)──▶ Idle
//!                                        │
//!                                        └──(write failed)──▶ Reconciling, retried after backoff
//! ```
//!
//! The destination is never deleted: a missing source may be a transient read
//! problem, and removing the copy would take the driver down.

use crate::domain::ports::ConfigMapStoreRef;
use crate::error::{Error, ErrorAction, Result};
use crate::metrics::OperatorMetrics;
use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the synchronizer
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Privileged namespace holding the source ConfigMap
    pub source_namespace: String,
    pub source_name: String,
    /// Operator namespace receiving the copy
    pub destination_namespace: String,
    pub destination_name: String,
    /// Keys to mirror; empty mirrors every key
    pub mirrored_keys: Vec<String>,
    /// Interval between passes when nothing changes
    pub resync_interval: Duration,
    /// Re-read-and-retry attempts on write conflicts within one pass
    pub max_conflict_retries: u32,
    /// First retry delay after a failed pass
    pub retry_initial: Duration,
    /// Upper bound on the retry delay
    pub retry_max: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            source_namespace: "openshift-config".to_string(),
            source_name: "cloud-provider-config".to_string(),
            destination_namespace: "openshift-cluster-csi-drivers".to_string(),
            destination_name: "azure-stack-config".to_string(),
            mirrored_keys: vec!["endpoints".to_string()],
            resync_interval: Duration::from_secs(60),
            max_conflict_retries: 5,
            retry_initial: Duration::from_secs(1),
            retry_max: Duration::from_secs(60),
        }
    }
}

// =============================================================================
// State
// =============================================================================

/// Synchronizer state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Reconciling,
}

/// Result of one successful pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Created,
    Updated,
    Unchanged,
    SourceMissing,
}

impl std::fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncOutcome::Created => write!(f, "created"),
            SyncOutcome::Updated => write!(f, "updated"),
            SyncOutcome::Unchanged => write!(f, "unchanged"),
            SyncOutcome::SourceMissing => write!(f, "source_missing"),
        }
    }
}

// =============================================================================
// Synchronizer
// =============================================================================

pub struct ConfigSynchronizer {
    config: SyncConfig,
    store: ConfigMapStoreRef,
    metrics: Arc<OperatorMetrics>,
    state: RwLock<SyncState>,
    /// Completion time of the last successful pass
    last_success: RwLock<Option<DateTime<Utc>>>,
}

impl ConfigSynchronizer {
    pub fn new(config: SyncConfig, store: ConfigMapStoreRef, metrics: Arc<OperatorMetrics>) -> Arc<Self> {
        Arc::new(Self {
            config,
            store,
            metrics,
            state: RwLock::new(SyncState::Idle),
            last_success: RwLock::new(None),
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    pub fn last_success(&self) -> Option<DateTime<Utc>> {
        *self.last_success.read()
    }

    /// Run one synchronization pass
    pub async fn sync(&self) -> Result<SyncOutcome> {
        *self.state.write() = SyncState::Reconciling;

        let result = self.sync_once().await;
        match &result {
            Ok(outcome) => {
                *self.state.write() = SyncState::Idle;
                *self.last_success.write() = Some(Utc::now());
                self.metrics
                    .sync_passes
                    .with_label_values(&[&outcome.to_string()])
                    .inc();
            }
            Err(_) => {
                self.metrics.sync_passes.with_label_values(&["error"]).inc();
            }
        }
        result
    }

    async fn sync_once(&self) -> Result<SyncOutcome> {
        let cfg = &self.config;
        let Some(source) = self.store.get(&cfg.source_namespace, &cfg.source_name).await? else {
            warn!(
                "Source ConfigMap {}/{} not found, keeping {}/{} as is",
                cfg.source_namespace, cfg.source_name, cfg.destination_namespace, cfg.destination_name
            );
            return Ok(SyncOutcome::SourceMissing);
        };

        let desired = self.desired_data(&source);
        let mut attempt = 0;
        loop {
            match self.write_destination(&desired).await {
                Err(Error::Conflict { .. }) if attempt < cfg.max_conflict_retries => {
                    attempt += 1;
                    debug!(attempt, "Conflict writing {}, re-reading", cfg.destination_name);
                }
                result => return result,
            }
        }
    }

    /// Destination data derived from the source
    fn desired_data(&self, source: &ConfigMap) -> BTreeMap<String, String> {
        let data = source.data.clone().unwrap_or_default();
        if self.config.mirrored_keys.is_empty() {
            return data;
        }
        data.into_iter()
            .filter(|(key, _)| self.config.mirrored_keys.contains(key))
            .collect()
    }

    async fn write_destination(&self, desired: &BTreeMap<String, String>) -> Result<SyncOutcome> {
        let cfg = &self.config;
        let current = self
            .store
            .get(&cfg.destination_namespace, &cfg.destination_name)
            .await?;

        match current {
            None => {
                let config_map = ConfigMap {
                    metadata: ObjectMeta {
                        name: Some(cfg.destination_name.clone()),
                        namespace: Some(cfg.destination_namespace.clone()),
                        ..Default::default()
                    },
                    data: Some(desired.clone()),
                    ..Default::default()
                };
                self.store.create(&cfg.destination_namespace, &config_map).await?;
                info!(
                    "Created {}/{} from {}/{}",
                    cfg.destination_namespace, cfg.destination_name, cfg.source_namespace, cfg.source_name
                );
                Ok(SyncOutcome::Created)
            }
            Some(existing) => {
                let in_sync = existing.data.as_ref().map_or(desired.is_empty(), |d| d == desired)
                    && existing.binary_data.as_ref().map_or(true, |b| b.is_empty());
                if in_sync {
                    return Ok(SyncOutcome::Unchanged);
                }

                let mut updated = existing;
                updated.data = Some(desired.clone());
                updated.binary_data = None;
                self.store
                    .replace(&cfg.destination_namespace, &cfg.destination_name, &updated)
                    .await?;
                info!("Updated {}/{}", cfg.destination_namespace, cfg.destination_name);
                Ok(SyncOutcome::Updated)
            }
        }
    }

    fn retry_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.config.retry_initial)
            .with_max_interval(self.config.retry_max)
            .with_max_elapsed_time(None)
            .build()
    }

    /// Delay before the next pass after a failed one.
    ///
    /// Errors that are not retryable wait for the next resync or source change.
    fn retry_delay(&self, error: &Error, backoff: &mut ExponentialBackoff) -> Duration {
        match error.action() {
            ErrorAction::RequeueWithBackoff => backoff.next_backoff().unwrap_or(self.config.retry_max),
            ErrorAction::RequeueAfter(delay) => delay,
            ErrorAction::NoRequeue => self.config.resync_interval,
        }
    }

    /// Run passes until cancelled.
    ///
    /// A pass starts immediately, then on every message from `changes`, every
    /// `resync_interval`, or after the retry delay following a failure.
    /// Passes never overlap.
    pub async fn run(
        self: Arc<Self>,
        shutdown: CancellationToken,
        mut changes: mpsc::Receiver<()>,
    ) -> Result<()> {
        info!(
            "Starting config synchronizer {}/{} -> {}/{}",
            self.config.source_namespace,
            self.config.source_name,
            self.config.destination_namespace,
            self.config.destination_name
        );

        let mut backoff = self.retry_backoff();
        let mut delay = Duration::ZERO;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
                Some(()) = changes.recv() => debug!("Source ConfigMap changed"),
            }

            let result = tokio::select! {
                _ = shutdown.cancelled() => break,
                result = self.sync() => result,
            };

            delay = match result {
                Ok(outcome) => {
                    debug!(%outcome, "Config sync pass complete");
                    backoff.reset();
                    self.config.resync_interval
                }
                Err(e) => {
                    let retry_in = self.retry_delay(&e, &mut backoff);
                    warn!(error = %e, retryable = e.is_retryable(), ?retry_in, "Config sync pass failed");
                    retry_in
                }
            };
        }

        info!("Config synchronizer stopped");
        Ok(())
    }
}

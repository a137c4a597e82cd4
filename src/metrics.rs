//! Operator metrics
//!
//! Counters for synchronizer and reconciliation passes, exposed in the
//! Prometheus text format by the metrics server.

use crate::domain::ports::PlatformVariant;
use crate::error::{Error, Result};
use prometheus::{Encoder, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};

pub struct OperatorMetrics {
    registry: Registry,
    /// Config synchronizer passes by outcome
    pub sync_passes: IntCounterVec,
    /// Workload and static asset reconcile passes by result
    pub reconcile_passes: IntCounterVec,
    /// Detected platform variant, set to 1 for the active one
    pub platform: IntGaugeVec,
}

impl OperatorMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let sync_passes = IntCounterVec::new(
            Opts::new(
                "azure_disk_operator_config_sync_passes_total",
                "Config synchronizer passes by outcome",
            ),
            &["outcome"],
        )
        .map_err(metrics_error)?;

        let reconcile_passes = IntCounterVec::new(
            Opts::new(
                "azure_disk_operator_reconcile_passes_total",
                "Reconcile passes by resource and result",
            ),
            &["resource", "result"],
        )
        .map_err(metrics_error)?;

        let platform = IntGaugeVec::new(
            Opts::new("azure_disk_operator_platform", "Detected platform variant"),
            &["variant"],
        )
        .map_err(metrics_error)?;

        registry
            .register(Box::new(sync_passes.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(reconcile_passes.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(platform.clone()))
            .map_err(metrics_error)?;

        Ok(Self {
            registry,
            sync_passes,
            reconcile_passes,
            platform,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_platform(&self, variant: PlatformVariant) {
        for v in PlatformVariant::ALL {
            self.platform
                .with_label_values(&[&v.to_string()])
                .set(i64::from(v == variant));
        }
    }

    /// Text exposition of all registered metrics
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metrics_error)?;
        Ok(buffer)
    }
}

fn metrics_error(e: prometheus::Error) -> Error {
    Error::Internal(format!("metrics: {}", e))
}

//! Platform Detector
//!
//! Classifies the cluster as public Azure or Azure Stack Hub by reading the
//! `Infrastructure` object once at startup.

use crate::crd::{InfrastructureStatus, AZURE_STACK_CLOUD, INFRASTRUCTURE_NAME};
use crate::domain::ports::{InfrastructureReader, PlatformVariant};
use crate::error::{Error, Result};
use tracing::{debug, info};

/// Detect the platform variant.
///
/// Any failure to read the infrastructure object is reported as
/// [`Error::Detection`]; there are no internal retries.
pub async fn detect_platform(reader: &dyn InfrastructureReader) -> Result<PlatformVariant> {
    let infra = reader.get_infrastructure().await.map_err(|e| Error::Detection {
        reason: format!("reading infrastructure {}: {}", INFRASTRUCTURE_NAME, e),
    })?;

    let variant = infra
        .status
        .as_ref()
        .map(classify)
        .unwrap_or(PlatformVariant::Standard);

    debug!(
        cloud_name = ?infra.status.as_ref().and_then(|s| s.azure_cloud_name()),
        "Classified infrastructure"
    );
    info!("Detected platform variant: {}", variant);

    Ok(variant)
}

/// Map infrastructure status to a platform variant
pub fn classify(status: &InfrastructureStatus) -> PlatformVariant {
    match status.azure_cloud_name() {
        Some(AZURE_STACK_CLOUD) => PlatformVariant::Restricted,
        _ => PlatformVariant::Standard,
    }
}

//! Domain Ports - Core trait definitions for the operator
//!
//! These traits define the boundaries between the platform-adaptive logic and
//! the cluster. The kube-backed adapters live in [`crate::cluster`]; tests use
//! in-memory implementations.

use crate::crd::Infrastructure;
use crate::error::Result;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Node, Secret};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// =============================================================================
// Platform Variant
// =============================================================================

/// Infrastructure flavor the cluster runs on.
///
/// Detected once at startup and passed by value to every component that
/// depends on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformVariant {
    /// Public Azure cloud
    Standard,
    /// Azure Stack Hub: custom endpoints, different storage SKUs
    Restricted,
}

impl PlatformVariant {
    /// Every known variant
    pub const ALL: [PlatformVariant; 2] = [PlatformVariant::Standard, PlatformVariant::Restricted];

    /// Whether the config synchronizer and platform-field hooks are active
    pub fn is_restricted(self) -> bool {
        self == PlatformVariant::Restricted
    }
}

impl std::fmt::Display for PlatformVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlatformVariant::Standard => write!(f, "standard"),
            PlatformVariant::Restricted => write!(f, "restricted"),
        }
    }
}

// =============================================================================
// Asset Loader Port
// =============================================================================

/// Read-only access to raw template content by logical name
pub trait AssetReader: Send + Sync {
    /// Return the raw bytes of the named asset
    fn read(&self, name: &str) -> Result<Vec<u8>>;
}

// =============================================================================
// Cache Observer Ports
// =============================================================================

/// Cached view of cluster nodes
pub trait NodeLister: Send + Sync {
    /// All nodes currently in the cache
    fn list_nodes(&self) -> Vec<Arc<Node>>;
}

/// Cached view of secrets keyed by (namespace, name)
pub trait SecretLister: Send + Sync {
    /// The cached secret, or `None` if the cache has no copy
    fn get_secret(&self, namespace: &str, name: &str) -> Option<Arc<Secret>>;
}

// =============================================================================
// Cluster Store Ports
// =============================================================================

/// Port for reading the cluster infrastructure object
#[async_trait]
pub trait InfrastructureReader: Send + Sync {
    /// Fetch the singleton Infrastructure object
    async fn get_infrastructure(&self) -> Result<Infrastructure>;
}

/// Port for ConfigMap reads and writes with optimistic concurrency.
///
/// `create` fails with [`crate::Error::Conflict`] if the object already
/// exists; `replace` fails with it if the supplied `resourceVersion` is stale.
#[async_trait]
pub trait ConfigMapStore: Send + Sync {
    /// Get a ConfigMap, `None` if absent
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>>;

    /// Create a ConfigMap
    async fn create(&self, namespace: &str, config_map: &ConfigMap) -> Result<ConfigMap>;

    /// Replace an existing ConfigMap
    async fn replace(&self, namespace: &str, name: &str, config_map: &ConfigMap) -> Result<ConfigMap>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type AssetReaderRef = Arc<dyn AssetReader>;
pub type NodeListerRef = Arc<dyn NodeLister>;
pub type SecretListerRef = Arc<dyn SecretLister>;
pub type InfrastructureReaderRef = Arc<dyn InfrastructureReader>;
pub type ConfigMapStoreRef = Arc<dyn ConfigMapStore>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_variant_display() {
        assert_eq!(format!("{}", PlatformVariant::Standard), "standard");
        assert_eq!(format!("{}", PlatformVariant::Restricted), "restricted");
    }

    #[test]
    fn test_is_restricted() {
        assert!(PlatformVariant::Restricted.is_restricted());
        assert!(!PlatformVariant::Standard.is_restricted());
    }
}

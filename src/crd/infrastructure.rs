//! Infrastructure CRD
//!
//! Typed view of the cluster-scoped `infrastructures.config.openshift.io`
//! object. The operator only reads it; the installer owns it. Only the fields
//! needed to classify the platform are modelled, everything else is ignored
//! during deserialization.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Name of the singleton Infrastructure object
pub const INFRASTRUCTURE_NAME: &str = "cluster";

/// Cloud name reported by Azure Stack Hub installations
pub const AZURE_STACK_CLOUD: &str = "AzureStackCloud";

// =============================================================================
// Infrastructure CRD
// =============================================================================

/// Infrastructure holds cluster-wide information about the underlying cloud.
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "config.openshift.io",
    version = "v1",
    kind = "Infrastructure",
    plural = "infrastructures",
    status = "InfrastructureStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct InfrastructureSpec {
    /// Name of the cloud config ConfigMap in the config namespace
    #[serde(default)]
    pub cloud_config: Option<ConfigMapFileReference>,
}

/// Reference to a key inside a ConfigMap
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMapFileReference {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub key: Option<String>,
}

// =============================================================================
// Status
// =============================================================================

/// Observed infrastructure status
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InfrastructureStatus {
    /// Unique infrastructure name used to tag cloud resources
    #[serde(default)]
    pub infrastructure_name: Option<String>,

    /// Platform-specific status
    #[serde(default)]
    pub platform_status: Option<PlatformStatus>,
}

/// Platform-specific status block
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlatformStatus {
    /// Platform type (Azure, AWS, ...)
    #[serde(default, rename = "type")]
    pub platform_type: Option<String>,

    /// Azure-specific status, present on Azure and Azure Stack Hub
    #[serde(default)]
    pub azure: Option<AzurePlatformStatus>,
}

/// Azure platform status
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AzurePlatformStatus {
    /// Resource group for cluster resources
    #[serde(default)]
    pub resource_group_name: Option<String>,

    /// Azure cloud environment, e.g. AzurePublicCloud or AzureStackCloud
    #[serde(default)]
    pub cloud_name: Option<String>,
}

impl InfrastructureStatus {
    /// Azure cloud name, if the cluster reports one
    pub fn azure_cloud_name(&self) -> Option<&str> {
        self.platform_status
            .as_ref()?
            .azure
            .as_ref()?
            .cloud_name
            .as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_stack_hub_status() {
        let status: InfrastructureStatus = serde_json::from_value(serde_json::json!({
            "infrastructureName": "mycluster-x7k2p",
            "platform": "Azure",
            "platformStatus": {
                "type": "Azure",
                "azure": {
                    "resourceGroupName": "mycluster-rg",
                    "cloudName": "AzureStackCloud"
                }
            }
        }))
        .unwrap();

        assert_eq!(status.azure_cloud_name(), Some(AZURE_STACK_CLOUD));
        assert_eq!(
            status.platform_status.unwrap().platform_type.as_deref(),
            Some("Azure")
        );
    }

    #[test]
    fn test_missing_platform_status() {
        let status = InfrastructureStatus::default();
        assert_eq!(status.azure_cloud_name(), None);
    }
}

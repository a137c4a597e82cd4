//! Azure Stack Hub hook
//!
//! Mounts the endpoint configuration mirrored by the config synchronizer into
//! the driver container and points the Azure SDK at it.

use super::{upsert_env, upsert_volume, upsert_volume_mount, WorkloadTemplate};
use crate::error::Result;
use k8s_openapi::api::core::v1::{ConfigMapVolumeSource, KeyToPath, Volume, VolumeMount};

/// Where and how the endpoint ConfigMap is mounted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformFields {
    /// ConfigMap in the operator namespace written by the synchronizer
    pub config_map_name: String,
    /// Key holding the endpoint document
    pub config_map_key: String,
    /// Container receiving the mount and env var
    pub container_name: String,
    pub volume_name: String,
    pub mount_path: String,
    pub file_name: String,
    /// Env var telling the driver where the endpoint document lives
    pub env_name: String,
}

impl Default for PlatformFields {
    fn default() -> Self {
        Self {
            config_map_name: "azure-stack-config".to_string(),
            config_map_key: "endpoints".to_string(),
            container_name: "csi-driver".to_string(),
            volume_name: "azure-stack-config".to_string(),
            mount_path: "/etc/kubernetes/azurestackcloud".to_string(),
            file_name: "endpoints.json".to_string(),
            env_name: "AZURE_ENVIRONMENT_FILEPATH".to_string(),
        }
    }
}

impl PlatformFields {
    /// Absolute path of the endpoint document inside the container
    pub fn file_path(&self) -> String {
        format!("{}/{}", self.mount_path.trim_end_matches('/'), self.file_name)
    }
}

pub fn inject_platform_fields(template: &mut WorkloadTemplate, fields: &PlatformFields) -> Result<()> {
    let spec = template.pod_spec_mut()?;

    upsert_volume(
        spec,
        Volume {
            name: fields.volume_name.clone(),
            config_map: Some(ConfigMapVolumeSource {
                name: Some(fields.config_map_name.clone()),
                items: Some(vec![KeyToPath {
                    key: fields.config_map_key.clone(),
                    path: fields.file_name.clone(),
                    mode: None,
                }]),
                ..Default::default()
            }),
            ..Default::default()
        },
    );

    let file_path = fields.file_path();
    for container in spec
        .containers
        .iter_mut()
        .filter(|c| c.name == fields.container_name)
    {
        upsert_env(container, &fields.env_name, &file_path);
        upsert_volume_mount(
            container,
            VolumeMount {
                name: fields.volume_name.clone(),
                mount_path: fields.mount_path.clone(),
                read_only: Some(true),
                ..Default::default()
            },
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controlplane::hooks::fixtures::{controller, node};

    #[test]
    fn test_mounts_endpoint_config() {
        let fields = PlatformFields::default();
        let mut template = node();
        inject_platform_fields(&mut template, &fields).unwrap();

        let spec = template.pod_spec().unwrap();
        let volume = spec
            .volumes
            .as_ref()
            .unwrap()
            .iter()
            .find(|v| v.name == "azure-stack-config")
            .unwrap();
        assert_eq!(
            volume.config_map.as_ref().unwrap().name.as_deref(),
            Some("azure-stack-config")
        );

        let driver = spec.containers.iter().find(|c| c.name == "csi-driver").unwrap();
        let env = driver.env.as_ref().unwrap();
        let path = env.iter().find(|e| e.name == "AZURE_ENVIRONMENT_FILEPATH").unwrap();
        assert_eq!(
            path.value.as_deref(),
            Some("/etc/kubernetes/azurestackcloud/endpoints.json")
        );
        assert!(driver
            .volume_mounts
            .as_ref()
            .unwrap()
            .iter()
            .any(|m| m.name == "azure-stack-config"));
    }

    #[test]
    fn test_only_driver_container() {
        let mut template = controller();
        inject_platform_fields(&mut template, &PlatformFields::default()).unwrap();

        let spec = template.pod_spec().unwrap();
        for container in spec.containers.iter().filter(|c| c.name != "csi-driver") {
            let has_env = container
                .env
                .iter()
                .flatten()
                .any(|e| e.name == "AZURE_ENVIRONMENT_FILEPATH");
            assert!(!has_env, "{} should not be modified", container.name);
        }
    }

    #[test]
    fn test_idempotent() {
        let fields = PlatformFields::default();
        let mut once = controller();
        inject_platform_fields(&mut once, &fields).unwrap();
        let mut twice = once.clone();
        inject_platform_fields(&mut twice, &fields).unwrap();
        assert_eq!(once, twice);
    }
}

//! ConfigMap store backed by the API server
//!
//! Writes carry the `resourceVersion` of the object they were derived from;
//! the API server rejects stale writes with 409, which surfaces as
//! [`Error::Conflict`].

use crate::domain::ports::ConfigMapStore;
use crate::error::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::PostParams;
use kube::{Api, Client};
use tracing::debug;

pub struct KubeConfigMaps {
    client: Client,
}

impl KubeConfigMaps {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Map an API error on a write, turning 409 into a conflict
fn write_error(e: kube::Error, name: &str) -> Error {
    match e {
        kube::Error::Api(ref response) if response.code == 409 => {
            debug!("Conflict writing ConfigMap {}: {}", name, response.message);
            Error::Conflict {
                kind: "ConfigMap".into(),
                name: name.to_string(),
            }
        }
        other => Error::Kube(other),
    }
}

#[async_trait]
impl ConfigMapStore for KubeConfigMaps {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>> {
        Ok(self.api(namespace).get_opt(name).await?)
    }

    async fn create(&self, namespace: &str, config_map: &ConfigMap) -> Result<ConfigMap> {
        let name = config_map.metadata.name.clone().unwrap_or_default();
        self.api(namespace)
            .create(&PostParams::default(), config_map)
            .await
            .map_err(|e| write_error(e, &name))
    }

    async fn replace(&self, namespace: &str, name: &str, config_map: &ConfigMap) -> Result<ConfigMap> {
        self.api(namespace)
            .replace(name, &PostParams::default(), config_map)
            .await
            .map_err(|e| write_error(e, name))
    }
}

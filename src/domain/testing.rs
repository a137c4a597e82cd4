//! In-memory port implementations used by unit tests.

use crate::crd::{Infrastructure, InfrastructureSpec, InfrastructureStatus, INFRASTRUCTURE_NAME};
use crate::domain::ports::{
    AssetReader, ConfigMapStore, InfrastructureReader, NodeLister, SecretLister,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Node, NodeSpec, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

// =============================================================================
// Object Builders
// =============================================================================

pub fn node(name: &str, labels: &[(&str, &str)]) -> Arc<Node> {
    Arc::new(Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(
                labels
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
            ..Default::default()
        },
        spec: Some(NodeSpec::default()),
        status: None,
    })
}

pub fn master_nodes(count: usize) -> Vec<Arc<Node>> {
    (0..count)
        .map(|i| node(&format!("master-{}", i), &[("node-role.kubernetes.io/master", "")]))
        .collect()
}

pub fn secret(namespace: &str, name: &str, data: &[(&str, &[u8])]) -> Arc<Secret> {
    Arc::new(Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        data: Some(
            data.iter()
                .map(|(k, v)| (k.to_string(), ByteString(v.to_vec())))
                .collect(),
        ),
        ..Default::default()
    })
}

pub fn config_map(namespace: &str, name: &str, data: &[(&str, &str)]) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        data: Some(
            data.iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        ),
        ..Default::default()
    }
}

pub fn infrastructure(cloud_name: Option<&str>) -> Infrastructure {
    let status: InfrastructureStatus = serde_json::from_value(serde_json::json!({
        "platformStatus": {
            "type": "Azure",
            "azure": { "cloudName": cloud_name }
        }
    }))
    .unwrap();
    let mut infra = Infrastructure::new(INFRASTRUCTURE_NAME, InfrastructureSpec::default());
    infra.status = Some(status);
    infra
}

// =============================================================================
// Cache Fakes
// =============================================================================

#[derive(Default)]
pub struct StaticNodes(pub Mutex<Vec<Arc<Node>>>);

impl StaticNodes {
    pub fn new(nodes: Vec<Arc<Node>>) -> Self {
        Self(Mutex::new(nodes))
    }

    pub fn set(&self, nodes: Vec<Arc<Node>>) {
        *self.0.lock() = nodes;
    }
}

impl NodeLister for StaticNodes {
    fn list_nodes(&self) -> Vec<Arc<Node>> {
        self.0.lock().clone()
    }
}

#[derive(Default)]
pub struct StaticSecrets(pub Mutex<Vec<Arc<Secret>>>);

impl StaticSecrets {
    pub fn new(secrets: Vec<Arc<Secret>>) -> Self {
        Self(Mutex::new(secrets))
    }

    pub fn set(&self, secrets: Vec<Arc<Secret>>) {
        *self.0.lock() = secrets;
    }
}

impl SecretLister for StaticSecrets {
    fn get_secret(&self, namespace: &str, name: &str) -> Option<Arc<Secret>> {
        self.0
            .lock()
            .iter()
            .find(|s| {
                s.metadata.namespace.as_deref() == Some(namespace)
                    && s.metadata.name.as_deref() == Some(name)
            })
            .cloned()
    }
}

pub struct StaticAssets(pub BTreeMap<String, String>);

impl StaticAssets {
    pub fn new(assets: &[(&str, &str)]) -> Self {
        Self(
            assets
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }
}

impl AssetReader for StaticAssets {
    fn read(&self, name: &str) -> Result<Vec<u8>> {
        self.0
            .get(name)
            .map(|s| s.as_bytes().to_vec())
            .ok_or_else(|| Error::AssetNotFound { name: name.to_string() })
    }
}

// =============================================================================
// Store Fakes
// =============================================================================

pub struct StaticInfrastructure(pub Option<Infrastructure>);

#[async_trait]
impl InfrastructureReader for StaticInfrastructure {
    async fn get_infrastructure(&self) -> Result<Infrastructure> {
        self.0.clone().ok_or_else(|| Error::ResourceNotFound {
            kind: "Infrastructure".into(),
            name: INFRASTRUCTURE_NAME.into(),
        })
    }
}

/// ConfigMap store with resourceVersion checks and fault injection
#[derive(Default)]
pub struct InMemoryConfigMaps {
    objects: Mutex<BTreeMap<(String, String), ConfigMap>>,
    version: AtomicU64,
    /// Number of upcoming writes that lose a race against a concurrent writer
    pub inject_conflicts: AtomicU32,
    /// Number of upcoming writes that fail outright
    pub inject_failures: AtomicU32,
    pub writes: AtomicU32,
}

impl InMemoryConfigMaps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, mut config_map: ConfigMap) {
        let namespace = config_map.metadata.namespace.clone().unwrap_or_default();
        let name = config_map.metadata.name.clone().unwrap_or_default();
        config_map.metadata.resource_version = Some(self.next_version());
        self.objects.lock().insert((namespace, name), config_map);
    }

    pub fn remove(&self, namespace: &str, name: &str) {
        self.objects
            .lock()
            .remove(&(namespace.to_string(), name.to_string()));
    }

    pub fn data(&self, namespace: &str, name: &str) -> Option<BTreeMap<String, String>> {
        self.objects
            .lock()
            .get(&(namespace.to_string(), name.to_string()))
            .map(|cm| cm.data.clone().unwrap_or_default())
    }

    fn next_version(&self) -> String {
        (self.version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn take(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ConfigMapStore for InMemoryConfigMaps {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>> {
        Ok(self
            .objects
            .lock()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn create(&self, namespace: &str, config_map: &ConfigMap) -> Result<ConfigMap> {
        if Self::take(&self.inject_failures) {
            return Err(Error::Internal("injected write failure".into()));
        }
        let name = config_map.metadata.name.clone().unwrap_or_default();
        let mut objects = self.objects.lock();
        let key = (namespace.to_string(), name.clone());
        if objects.contains_key(&key) {
            return Err(Error::Conflict { kind: "ConfigMap".into(), name });
        }
        let mut stored = config_map.clone();
        stored.metadata.namespace = Some(namespace.to_string());
        stored.metadata.resource_version = Some(self.next_version());
        objects.insert(key, stored.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(stored)
    }

    async fn replace(&self, namespace: &str, name: &str, config_map: &ConfigMap) -> Result<ConfigMap> {
        if Self::take(&self.inject_failures) {
            return Err(Error::Internal("injected write failure".into()));
        }
        let mut objects = self.objects.lock();
        let key = (namespace.to_string(), name.to_string());
        let current = objects.get_mut(&key).ok_or_else(|| Error::ResourceNotFound {
            kind: "ConfigMap".into(),
            name: name.to_string(),
        })?;

        if Self::take(&self.inject_conflicts) {
            // Another writer got there first.
            current.metadata.resource_version = Some(self.next_version());
            return Err(Error::Conflict { kind: "ConfigMap".into(), name: name.to_string() });
        }
        if current.metadata.resource_version != config_map.metadata.resource_version {
            return Err(Error::Conflict { kind: "ConfigMap".into(), name: name.to_string() });
        }

        let mut stored = config_map.clone();
        stored.metadata.namespace = Some(namespace.to_string());
        stored.metadata.resource_version = Some(self.next_version());
        *current = stored.clone();
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(stored)
    }
}

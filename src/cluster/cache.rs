//! Reflector-backed caches
//!
//! Each cache owns a reflector store fed by a watch stream. The stream is
//! driven by a background task until shutdown; every touched object wakes the
//! shared [`Notify`] so the apply engine reconciles without waiting for the
//! next resync.

use crate::domain::ports::{NodeLister, SecretLister};
use futures::{Stream, TryStreamExt};
use k8s_openapi::api::core::v1::{ConfigMap, Node, Secret};
use kube::runtime::reflector::{self, ObjectRef, Store};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Read-only view over a reflector store
pub struct ResourceCache<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    store: Store<K>,
    task: JoinHandle<()>,
}

impl<K> ResourceCache<K>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    /// Start watching `api` and caching what it returns
    pub fn spawn(
        api: Api<K>,
        config: watcher::Config,
        changes: Arc<Notify>,
        shutdown: CancellationToken,
    ) -> Self {
        let (store, writer) = reflector::store();
        let stream = reflector::reflector(writer, watcher(api, config))
            .default_backoff()
            .touched_objects();

        let kind = K::kind(&()).to_string();
        let task = tokio::spawn(drive(kind, stream, shutdown, move || changes.notify_one()));
        Self { store, task }
    }

    /// False once the watch task has exited
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl NodeLister for ResourceCache<Node> {
    fn list_nodes(&self) -> Vec<Arc<Node>> {
        self.store.state()
    }
}

impl SecretLister for ResourceCache<Secret> {
    fn get_secret(&self, namespace: &str, name: &str) -> Option<Arc<Secret>> {
        self.store.get(&ObjectRef::new(name).within(namespace))
    }
}

/// Cache of every node in the cluster
pub fn node_cache(client: Client, changes: Arc<Notify>, shutdown: CancellationToken) -> ResourceCache<Node> {
    ResourceCache::spawn(Api::all(client), watcher::Config::default(), changes, shutdown)
}

/// Cache of a single secret
pub fn secret_cache(
    client: Client,
    namespace: &str,
    name: &str,
    changes: Arc<Notify>,
    shutdown: CancellationToken,
) -> ResourceCache<Secret> {
    let config = watcher::Config::default().fields(&format!("metadata.name={}", name));
    ResourceCache::spawn(Api::namespaced(client, namespace), config, changes, shutdown)
}

/// Watch one ConfigMap and signal on every change.
///
/// Signals coalesce: while one is pending, further changes are dropped.
pub fn watch_config_map(
    client: Client,
    namespace: &str,
    name: &str,
    shutdown: CancellationToken,
) -> mpsc::Receiver<()> {
    let (tx, rx) = mpsc::channel(1);
    let api: Api<ConfigMap> = Api::namespaced(client, namespace);
    let config = watcher::Config::default().fields(&format!("metadata.name={}", name));
    let stream = watcher(api, config).default_backoff().touched_objects();

    tokio::spawn(drive("ConfigMap".to_string(), stream, shutdown, move || {
        let _ = tx.try_send(());
    }));
    rx
}

async fn drive<K, S>(kind: String, stream: S, shutdown: CancellationToken, on_change: impl Fn())
where
    K: Resource,
    S: Stream<Item = Result<K, watcher::Error>>,
{
    info!("Starting {} watch", kind);
    let mut stream = std::pin::pin!(stream);

    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = stream.try_next() => next,
        };

        match next {
            Ok(Some(object)) => {
                debug!(kind = %kind, name = ?object.meta().name, "Watched object changed");
                on_change();
            }
            Ok(None) => break,
            Err(e) => warn!(kind = %kind, error = %e, "Watch error, retrying"),
        }
    }

    info!("{} watch stopped", kind);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_is_running_follows_watch_task() {
        let (store, _writer) = reflector::store::<Node>();
        let shutdown = CancellationToken::new();
        let stopped = shutdown.clone();
        let cache = ResourceCache {
            store,
            task: tokio::spawn(async move { stopped.cancelled().await }),
        };
        assert!(cache.is_running());
        assert!(cache.list_nodes().is_empty());

        shutdown.cancel();
        for _ in 0..200 {
            if !cache.is_running() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!cache.is_running());
    }
}

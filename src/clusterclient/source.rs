//! Credential source backed by the management cluster
//!
//! Two watchers (Secrets in the shipyard namespace, cluster-scoped Cluster
//! objects) feed one join task that owns the [`CredentialTable`] and sends
//! the resulting [`CredentialEvent`]s to the store.

use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use kube::runtime::watcher;
use kube::{Api, Client, ResourceExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::credential::{CredentialEvent, CredentialTable};
use crate::models::Cluster;

const MAX_CONSECUTIVE_ERRORS: u32 = 5;

enum HalfEvent {
    SecretApplied(Secret),
    SecretDeleted(String),
    ClusterApplied(Cluster),
    ClusterDeleted(String),
}

/// Watches Secrets and Clusters and joins them into credentials
pub struct KubeCredentialSource {
    handles: Vec<JoinHandle<()>>,
}

impl KubeCredentialSource {
    /// Start watching; events arrive on the returned receiver
    pub fn spawn(
        client: Client,
        namespace: &str,
        stop: CancellationToken,
    ) -> (Self, mpsc::UnboundedReceiver<CredentialEvent>) {
        let (half_tx, half_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
        let clusters: Api<Cluster> = Api::all(client);

        let handles = vec![
            tokio::spawn(watch_halves(
                "Secret",
                secrets,
                half_tx.clone(),
                stop.clone(),
                HalfEvent::SecretApplied,
                HalfEvent::SecretDeleted,
            )),
            tokio::spawn(watch_halves(
                "Cluster",
                clusters,
                half_tx,
                stop.clone(),
                HalfEvent::ClusterApplied,
                HalfEvent::ClusterDeleted,
            )),
            tokio::spawn(join(half_rx, event_tx)),
        ];

        (Self { handles }, event_rx)
    }

    /// Abort all watcher tasks
    pub fn stop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
        self.handles.clear();
    }
}

impl Drop for KubeCredentialSource {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn watch_halves<K>(
    display_name: &'static str,
    api: Api<K>,
    tx: mpsc::UnboundedSender<HalfEvent>,
    stop: CancellationToken,
    applied: fn(K) -> HalfEvent,
    deleted: fn(String) -> HalfEvent,
) where
    K: kube::Resource + Clone + std::fmt::Debug + serde::de::DeserializeOwned + Send + 'static,
    K::DynamicType: Default,
{
    let mut w = Box::pin(watcher(api, watcher::Config::default()));
    let mut error_count = 0u32;

    loop {
        let event = tokio::select! {
            _ = stop.cancelled() => break,
            event = w.next() => match event {
                Some(event) => event,
                None => break,
            },
        };

        match event {
            Ok(watcher::Event::InitApply(obj)) | Ok(watcher::Event::Apply(obj)) => {
                error_count = 0;
                tracing::debug!(kind = display_name, name = %obj.name_any(), "applied");
                if tx.send(applied(obj)).is_err() {
                    break;
                }
            }
            Ok(watcher::Event::Delete(obj)) => {
                error_count = 0;
                tracing::debug!(kind = display_name, name = %obj.name_any(), "deleted");
                if tx.send(deleted(obj.name_any())).is_err() {
                    break;
                }
            }
            Ok(watcher::Event::Init) | Ok(watcher::Event::InitDone) => {
                error_count = 0;
            }
            Err(e) => {
                error_count += 1;
                if error_count == 1 || error_count.is_multiple_of(10) {
                    tracing::warn!("{} watcher error ({}): {}", display_name, error_count, e);
                }
                if error_count >= MAX_CONSECUTIVE_ERRORS {
                    // the watcher keeps retrying internally; back off harder
                    tokio::time::sleep(tokio::time::Duration::from_secs(10)).await;
                } else {
                    tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
                }
            }
        }
    }
    tracing::debug!("{} watcher stopped", display_name);
}

async fn join(
    mut rx: mpsc::UnboundedReceiver<HalfEvent>,
    tx: mpsc::UnboundedSender<CredentialEvent>,
) {
    let mut table = CredentialTable::new();
    while let Some(half) = rx.recv().await {
        let event = match half {
            HalfEvent::SecretApplied(secret) => table.apply_secret(&secret),
            HalfEvent::SecretDeleted(name) => table.delete_secret(&name),
            HalfEvent::ClusterApplied(cluster) => table.apply_cluster(&cluster),
            HalfEvent::ClusterDeleted(name) => table.delete_cluster(&name),
        };
        if let Some(event) = event
            && tx.send(event).is_err()
        {
            break;
        }
    }
}

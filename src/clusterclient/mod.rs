//! Cluster client store
//!
//! Maps cluster names to live API clients. Credentials arrive as
//! [`CredentialEvent`]s; [`Store::run`] is the only writer of the entry
//! table and swaps a rebuilt entry in only once both of its clients exist,
//! so a reader sees either the previous entry or the new one.
//!
//! Build failures are recorded on the entry instead of being propagated,
//! which keeps one broken credential from stalling the event loop.

mod credential;
mod source;

pub use credential::{ClusterCredential, CredentialEvent, CredentialTable};
pub use source::KubeCredentialSource;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{RwLock, broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::error::ShipyardError;
use crate::kube::DynamicClient;

/// Handle every controller receives from [`Store::get_client`]
pub type DynamicHandle = Arc<dyn DynamicClient>;

/// Produces one kind of client from a credential
#[async_trait]
pub trait ClientBuilder<C>: Send + Sync {
    async fn build(&self, credential: &ClusterCredential) -> anyhow::Result<C>;
}

#[async_trait]
impl<C, F, Fut> ClientBuilder<C> for F
where
    F: Fn(ClusterCredential) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<C>> + Send,
    C: Send + 'static,
{
    async fn build(&self, credential: &ClusterCredential) -> anyhow::Result<C> {
        (self)(credential.clone()).await
    }
}

enum EntryState<T> {
    Ready { typed: T, dynamic: DynamicHandle },
    Failed(String),
}

struct ClientEntry<T> {
    checksum: String,
    state: EntryState<T>,
}

/// Clients for one cluster, tagged with the caller's identity
#[derive(Clone)]
pub struct ClusterClients<T> {
    cluster: String,
    user_agent: String,
    checksum: String,
    typed: T,
    dynamic: DynamicHandle,
}

impl<T> ClusterClients<T> {
    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    /// Identity writes are attributed to
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Checksum of the credential these clients were built from
    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    pub fn typed(&self) -> &T {
        &self.typed
    }

    pub fn dynamic(&self) -> &dyn DynamicClient {
        self.dynamic.as_ref()
    }
}

/// Cache of per-cluster clients kept in sync with the credential source
pub struct Store<T> {
    entries: Arc<RwLock<HashMap<String, Arc<ClientEntry<T>>>>>,
    typed_builder: Arc<dyn ClientBuilder<T>>,
    dynamic_builder: Arc<dyn ClientBuilder<DynamicHandle>>,
    changes: broadcast::Sender<String>,
}

impl<T> Clone for Store<T> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
            typed_builder: Arc::clone(&self.typed_builder),
            dynamic_builder: Arc::clone(&self.dynamic_builder),
            changes: self.changes.clone(),
        }
    }
}

impl<T> Store<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(
        typed_builder: impl ClientBuilder<T> + 'static,
        dynamic_builder: impl ClientBuilder<DynamicHandle> + 'static,
    ) -> Self {
        let (changes, _) = broadcast::channel(64);
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            typed_builder: Arc::new(typed_builder),
            dynamic_builder: Arc::new(dynamic_builder),
            changes,
        }
    }

    /// Current clients for `cluster`
    pub async fn get_client(
        &self,
        cluster: &str,
        user_agent: &str,
    ) -> Result<ClusterClients<T>, ShipyardError> {
        let entry = {
            let entries = self.entries.read().await;
            entries.get(cluster).cloned()
        };
        let Some(entry) = entry else {
            return Err(ShipyardError::ClusterNotReady(cluster.to_string()));
        };

        match &entry.state {
            EntryState::Ready { typed, dynamic } => Ok(ClusterClients {
                cluster: cluster.to_string(),
                user_agent: user_agent.to_string(),
                checksum: entry.checksum.clone(),
                typed: typed.clone(),
                dynamic: Arc::clone(dynamic),
            }),
            EntryState::Failed(reason) => Err(ShipyardError::ClusterCredentialInvalid {
                cluster: cluster.to_string(),
                reason: reason.clone(),
            }),
        }
    }

    /// Names of every cluster with an entry, sorted
    pub async fn clusters(&self) -> Vec<String> {
        let entries = self.entries.read().await;
        let mut names: Vec<String> = entries.keys().cloned().collect();
        names.sort();
        names
    }

    /// Names of clusters whose entry was rebuilt or removed
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.changes.subscribe()
    }

    /// Consume credential events until `stop` fires, then drop every entry
    ///
    /// Only one `run` may be active per store.
    pub async fn run(self, mut events: mpsc::UnboundedReceiver<CredentialEvent>, stop: CancellationToken) {
        tracing::info!("cluster client store started");
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => self.handle(event).await,
                    None => {
                        tracing::debug!("credential source closed");
                        stop.cancelled().await;
                        break;
                    }
                },
            }
        }
        self.entries.write().await.clear();
        tracing::info!("cluster client store stopped");
    }

    async fn handle(&self, event: CredentialEvent) {
        match event {
            CredentialEvent::Applied(credential) => self.rebuild(credential).await,
            CredentialEvent::Invalid { cluster, reason } => {
                tracing::warn!(cluster = %cluster, %reason, "invalid cluster credential");
                let entry = ClientEntry {
                    checksum: String::new(),
                    state: EntryState::Failed(reason),
                };
                self.publish(cluster, entry).await;
            }
            CredentialEvent::Deleted(cluster) => {
                let removed = self.entries.write().await.remove(&cluster);
                if removed.is_some() {
                    tracing::info!(cluster = %cluster, "removed cluster clients");
                    let _ = self.changes.send(cluster);
                }
            }
        }
    }

    async fn rebuild(&self, credential: ClusterCredential) {
        let current = {
            let entries = self.entries.read().await;
            entries.get(&credential.cluster).map(|e| e.checksum.clone())
        };
        if current.as_deref() == Some(credential.checksum.as_str()) {
            tracing::debug!(cluster = %credential.cluster, "credential unchanged");
            return;
        }

        let state = match self.build(&credential).await {
            Ok((typed, dynamic)) => {
                tracing::info!(cluster = %credential.cluster, endpoint = %credential.endpoint, "built cluster clients");
                EntryState::Ready { typed, dynamic }
            }
            Err(err) => {
                tracing::warn!(cluster = %credential.cluster, "failed to build cluster clients: {:#}", err);
                EntryState::Failed(format!("{:#}", err))
            }
        };

        let entry = ClientEntry {
            checksum: credential.checksum,
            state,
        };
        self.publish(credential.cluster, entry).await;
    }

    async fn build(&self, credential: &ClusterCredential) -> anyhow::Result<(T, DynamicHandle)> {
        let typed = self.typed_builder.build(credential).await?;
        let dynamic = self.dynamic_builder.build(credential).await?;
        Ok((typed, dynamic))
    }

    async fn publish(&self, cluster: String, entry: ClientEntry<T>) {
        self.entries
            .write()
            .await
            .insert(cluster.clone(), Arc::new(entry));
        let _ = self.changes.send(cluster);
    }
}

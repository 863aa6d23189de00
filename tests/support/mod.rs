//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use flate2::Compression;
use flate2::write::GzEncoder;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::core::DynamicObject;
use kube::runtime::watcher;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use shipyard::capacity::PodLister;
use shipyard::chart::cache_path;
use shipyard::clusterclient::DynamicHandle;
use shipyard::kube::{DynamicClient, ResourceDescriptor, WatchStream};
use shipyard::models::{ChartReference, InstallationTarget, InstallationTargetSpec};
use shipyard::{ApiError, ClusterCredential, CredentialEvent, Store};

pub const REPO_URL: &str = "https://charts.example.com/stable";

/// Gzipped tar of a chart directory named `name`
pub fn chart_archive(name: &str, version: &str, values: Option<&str>, templates: &[(&str, &str)]) -> Vec<u8> {
    let mut files = vec![(
        format!("{}/Chart.yaml", name),
        format!("apiVersion: v2\nname: {}\nversion: {}\n", name, version),
    )];
    if let Some(values) = values {
        files.push((format!("{}/values.yaml", name), values.to_string()));
    }
    for (file, body) in templates {
        files.push((format!("{}/templates/{}", name, file), body.to_string()));
    }

    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (path, body) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(body.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, path, body.as_bytes()).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

/// Put `archive` where a LocalChartFetcher over `cache_dir` finds `chart`
pub fn cache_chart(cache_dir: &Path, chart: &ChartReference, archive: &[u8]) {
    let path = cache_path(cache_dir, &chart.repo_url, &chart.name, &chart.version);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, archive).unwrap();
}

pub fn chart_ref(name: &str, version: &str) -> ChartReference {
    ChartReference {
        name: name.to_string(),
        version: version.to_string(),
        repo_url: REPO_URL.to_string(),
    }
}

pub fn target(
    name: &str,
    namespace: &str,
    clusters: &[&str],
    chart: ChartReference,
    labels: &[(&str, &str)],
) -> InstallationTarget {
    let mut target = InstallationTarget::new(
        name,
        InstallationTargetSpec {
            clusters: clusters.iter().map(|c| c.to_string()).collect(),
            chart,
            values: None,
            can_override: false,
        },
    );
    target.metadata.namespace = Some(namespace.to_string());
    if !labels.is_empty() {
        target.metadata.labels = Some(
            labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
        );
    }
    target
}

/// Call recorded by [`FakeDynamicClient`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Get { kind: String, name: String },
    Create { kind: String, name: String },
    Update { kind: String, name: String },
    List { kind: String, selector: String },
}

type ObjectKey = (String, Option<String>, String);

/// In-memory API server for one cluster
#[derive(Default)]
pub struct FakeDynamicClient {
    objects: Mutex<HashMap<ObjectKey, DynamicObject>>,
    calls: Mutex<Vec<Call>>,
    next_uid: AtomicU64,
    cluster_scoped: Mutex<HashSet<String>>,
}

impl FakeDynamicClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn key(resource: &ResourceDescriptor, namespace: Option<&str>, name: &str) -> ObjectKey {
        let namespace = if resource.namespaced {
            namespace.map(str::to_string)
        } else {
            None
        };
        (resource.kind.clone(), namespace, name.to_string())
    }

    /// Serve `kind` as a cluster-scoped resource, whatever its descriptor guesses
    pub fn serve_cluster_scoped(&self, kind: &str) {
        self.cluster_scoped.lock().unwrap().insert(kind.to_string());
    }

    /// Store `obj` as if another actor had created it
    pub fn insert(&self, obj: DynamicObject) {
        let resource = ResourceDescriptor::of(&obj).unwrap();
        let key = Self::key(
            &resource,
            obj.metadata.namespace.as_deref(),
            obj.metadata.name.as_deref().unwrap(),
        );
        self.objects.lock().unwrap().insert(key, obj);
    }

    pub fn object(&self, kind: &str, namespace: Option<&str>, name: &str) -> Option<DynamicObject> {
        self.objects
            .lock()
            .unwrap()
            .get(&(kind.to_string(), namespace.map(str::to_string), name.to_string()))
            .cloned()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn creates(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Create { .. }))
            .count()
    }

    pub fn updates(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Update { .. }))
            .count()
    }

    pub fn lists(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::List { .. }))
            .count()
    }

    pub fn gets(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Get { .. }))
            .count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

fn matches_selector(obj: &DynamicObject, selector: &str) -> bool {
    let labels = obj.metadata.labels.clone().unwrap_or_default();
    selector
        .split(',')
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((k, v)) => labels.get(k).map(String::as_str) == Some(v),
            None => labels.contains_key(term),
        })
}

#[async_trait]
impl DynamicClient for FakeDynamicClient {
    async fn resolve(&self, resource: &ResourceDescriptor) -> Result<ResourceDescriptor, ApiError> {
        let mut resolved = resource.clone();
        if self.cluster_scoped.lock().unwrap().contains(&resource.kind) {
            resolved.namespaced = false;
        }
        Ok(resolved)
    }

    async fn get(
        &self,
        resource: &ResourceDescriptor,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>, ApiError> {
        self.record(Call::Get {
            kind: resource.kind.clone(),
            name: name.to_string(),
        });
        Ok(self
            .objects
            .lock()
            .unwrap()
            .get(&Self::key(resource, namespace, name))
            .cloned())
    }

    async fn create(
        &self,
        resource: &ResourceDescriptor,
        namespace: Option<&str>,
        obj: &DynamicObject,
        _field_manager: &str,
    ) -> Result<DynamicObject, ApiError> {
        let name = obj.metadata.name.clone().unwrap_or_default();
        self.record(Call::Create {
            kind: resource.kind.clone(),
            name: name.clone(),
        });

        let key = Self::key(resource, namespace, &name);
        let mut objects = self.objects.lock().unwrap();
        if objects.contains_key(&key) {
            return Err(ApiError::Rejected(format!("{} {} already exists", resource.kind, name)));
        }
        let mut stored = obj.clone();
        let uid = self.next_uid.fetch_add(1, Ordering::SeqCst) + 1;
        stored.metadata.uid = Some(format!("uid-{}", uid));
        stored.metadata.resource_version = Some("1".to_string());
        objects.insert(key, stored.clone());
        Ok(stored)
    }

    async fn update(
        &self,
        resource: &ResourceDescriptor,
        namespace: Option<&str>,
        obj: &DynamicObject,
        _field_manager: &str,
    ) -> Result<DynamicObject, ApiError> {
        let name = obj.metadata.name.clone().unwrap_or_default();
        self.record(Call::Update {
            kind: resource.kind.clone(),
            name: name.clone(),
        });

        let key = Self::key(resource, namespace, &name);
        let mut objects = self.objects.lock().unwrap();
        let Some(current) = objects.get(&key) else {
            return Err(ApiError::Rejected(format!("{} {} not found", resource.kind, name)));
        };
        let version: u64 = current
            .metadata
            .resource_version
            .as_deref()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let mut stored = obj.clone();
        stored.metadata.uid = current.metadata.uid.clone();
        stored.metadata.resource_version = Some((version + 1).to_string());
        objects.insert(key, stored.clone());
        Ok(stored)
    }

    async fn list(
        &self,
        resource: &ResourceDescriptor,
        namespace: Option<&str>,
        label_selector: &str,
    ) -> Result<Vec<DynamicObject>, ApiError> {
        self.record(Call::List {
            kind: resource.kind.clone(),
            selector: label_selector.to_string(),
        });
        let objects = self.objects.lock().unwrap();
        let mut found: Vec<DynamicObject> = objects
            .iter()
            .filter(|((kind, ns, _), _)| {
                *kind == resource.kind && (namespace.is_none() || ns.as_deref() == namespace)
            })
            .map(|(_, obj)| obj)
            .filter(|obj| matches_selector(obj, label_selector))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
        Ok(found)
    }

    /// Replays the stored objects as an initial list, then ends
    fn watch(&self, resource: &ResourceDescriptor, namespace: Option<&str>) -> WatchStream {
        let mut found: Vec<DynamicObject> = self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|((kind, ns, _), _)| {
                *kind == resource.kind && (namespace.is_none() || ns.as_deref() == namespace)
            })
            .map(|(_, obj)| obj.clone())
            .collect();
        found.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));

        let mut events = vec![Ok(watcher::Event::Init)];
        events.extend(found.into_iter().map(|obj| Ok(watcher::Event::InitApply(obj))));
        events.push(Ok(watcher::Event::InitDone));
        futures::stream::iter(events).boxed()
    }
}

#[async_trait]
impl PodLister for FakeDynamicClient {
    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>, ApiError> {
        let pods = self
            .list(&ResourceDescriptor::new("v1", "Pod"), Some(namespace), label_selector)
            .await?;
        pods.into_iter()
            .map(|obj| -> Result<Pod, ApiError> {
                let value = serde_json::to_value(obj)?;
                Ok(serde_json::from_value(value)?)
            })
            .collect()
    }
}

pub fn credential(cluster: &str, endpoint: &str) -> ClusterCredential {
    ClusterCredential::new(
        cluster,
        endpoint,
        None,
        b"cert".to_vec(),
        b"key".to_vec(),
        false,
        None,
    )
}

/// A running store whose clients are the given fakes
pub struct FakeFleet {
    pub store: Store<Arc<FakeDynamicClient>>,
    pub events: mpsc::UnboundedSender<CredentialEvent>,
    pub stop: CancellationToken,
}

impl FakeFleet {
    /// Start a store and register every cluster in `clusters`
    pub async fn start(clusters: &[(&str, Arc<FakeDynamicClient>)]) -> Self {
        let fakes: HashMap<String, Arc<FakeDynamicClient>> = clusters
            .iter()
            .map(|(name, client)| (name.to_string(), Arc::clone(client)))
            .collect();
        let fakes = Arc::new(fakes);

        let typed_fakes = Arc::clone(&fakes);
        let store = Store::new(
            move |c: ClusterCredential| {
                let fakes = Arc::clone(&typed_fakes);
                async move {
                    fakes
                        .get(&c.cluster)
                        .cloned()
                        .ok_or_else(|| anyhow::anyhow!("no fake for {}", c.cluster))
                }
            },
            move |c: ClusterCredential| {
                let fakes = Arc::clone(&fakes);
                async move {
                    fakes
                        .get(&c.cluster)
                        .map(|client| Arc::clone(client) as DynamicHandle)
                        .ok_or_else(|| anyhow::anyhow!("no fake for {}", c.cluster))
                }
            },
        );

        let (events, rx) = mpsc::unbounded_channel();
        let stop = CancellationToken::new();
        tokio::spawn(store.clone().run(rx, stop.clone()));

        let fleet = Self { store, events, stop };
        for (name, _) in clusters {
            fleet
                .apply(credential(name, &format!("https://{}.example.com", name)))
                .await;
        }
        fleet
    }

    /// Send `credential` and wait until the store has published it
    pub async fn apply(&self, credential: ClusterCredential) {
        let mut changes = self.store.subscribe();
        let cluster = credential.cluster.clone();
        self.events
            .send(CredentialEvent::Applied(credential))
            .unwrap();
        wait_for_change(&mut changes, &cluster).await;
    }

    pub async fn send(&self, event: CredentialEvent) {
        let mut changes = self.store.subscribe();
        let cluster = event.cluster().to_string();
        self.events.send(event).unwrap();
        wait_for_change(&mut changes, &cluster).await;
    }
}

impl Drop for FakeFleet {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

pub async fn wait_for_change(changes: &mut tokio::sync::broadcast::Receiver<String>, cluster: &str) {
    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        loop {
            if changes.recv().await.unwrap() == cluster {
                return;
            }
        }
    })
    .await
    .expect("store did not publish the change");
}

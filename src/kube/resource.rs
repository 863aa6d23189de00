//! Dynamic resource access
//!
//! Rendered charts can contain any kind, so objects are handled as
//! [`DynamicObject`]s and addressed through a [`ResourceDescriptor`] built at
//! runtime. [`DynamicClient`] is the capability every cluster handle exposes;
//! [`KubeDynamicClient`] backs it with a live `kube::Client` and asks the
//! API server how each kind is served.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use kube::api::{ListParams, PostParams};
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};
use kube::discovery::{self, Scope};
use kube::runtime::watcher;
use kube::{Api, Client};
use tokio::sync::RwLock;

use crate::error::ApiError;

/// Cluster-scoped kinds known without asking an API server
///
/// Only used until a descriptor is resolved through discovery.
const CLUSTER_SCOPED_KINDS: &[&str] = &[
    "Namespace",
    "Node",
    "PersistentVolume",
    "StorageClass",
    "PriorityClass",
    "ClusterRole",
    "ClusterRoleBinding",
    "CustomResourceDefinition",
    "MutatingWebhookConfiguration",
    "ValidatingWebhookConfiguration",
    "APIService",
    "Cluster",
];

/// Irregular plurals the suffix rules below get wrong
const KIND_PLURALS: &[(&str, &str)] = &[
    ("endpoints", "endpoints"),
    ("ingress", "ingresses"),
    ("networkpolicy", "networkpolicies"),
    ("podsecuritypolicy", "podsecuritypolicies"),
];

/// Group, version and kind of a resource plus how to address it
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceDescriptor {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub plural: String,
    pub namespaced: bool,
}

impl ResourceDescriptor {
    /// Build a descriptor from an `apiVersion` (`v1`, `apps/v1`) and kind
    ///
    /// Plural and scope are guessed; [`DynamicClient::resolve`] replaces them
    /// with what the cluster reports.
    pub fn new(api_version: &str, kind: &str) -> Self {
        let (group, version) = match api_version.split_once('/') {
            Some((group, version)) => (group.to_string(), version.to_string()),
            None => (String::new(), api_version.to_string()),
        };
        Self {
            group,
            version,
            kind: kind.to_string(),
            plural: pluralize_kind(kind),
            namespaced: !CLUSTER_SCOPED_KINDS.contains(&kind),
        }
    }

    /// Descriptor for an object's own type metadata
    pub fn of(obj: &DynamicObject) -> Option<Self> {
        let types = obj.types.as_ref()?;
        if types.api_version.is_empty() || types.kind.is_empty() {
            return None;
        }
        Some(Self::new(&types.api_version, &types.kind))
    }

    pub fn config_map() -> Self {
        Self::new("v1", "ConfigMap")
    }

    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    pub fn gvk(&self) -> GroupVersionKind {
        GroupVersionKind::gvk(&self.group, &self.version, &self.kind)
    }

    pub fn api_resource(&self) -> ApiResource {
        ApiResource::from_gvk_with_plural(&self.gvk(), &self.plural)
    }

    /// Descriptor as served by an API server
    pub fn discovered(resource: &ApiResource, scope: &Scope) -> Self {
        Self {
            group: resource.group.clone(),
            version: resource.version.clone(),
            kind: resource.kind.clone(),
            plural: resource.plural.clone(),
            namespaced: matches!(scope, Scope::Namespaced),
        }
    }
}

fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();

    for (singular, plural) in KIND_PLURALS {
        if *singular == lower {
            return (*plural).to_string();
        }
    }

    if lower.ends_with('s') || lower.ends_with("ch") || lower.ends_with("sh") {
        format!("{}es", lower)
    } else if lower.ends_with('y') && !lower.ends_with("ay") && !lower.ends_with("ey") {
        format!("{}ies", &lower[..lower.len() - 1])
    } else {
        format!("{}s", lower)
    }
}

pub type WatchStream = BoxStream<'static, Result<watcher::Event<DynamicObject>, ApiError>>;

/// Schema-less access to one cluster's API
///
/// The capability is `get`, `create`, `update`, `list` and `watch` over any
/// [`ResourceDescriptor`]. `namespace` is ignored for cluster-scoped
/// descriptors; `None` lists and watches a namespaced kind across all
/// namespaces. `field_manager` attributes writes to the calling component.
#[async_trait]
pub trait DynamicClient: Send + Sync {
    /// Plural and scope of `resource` as this cluster serves it
    ///
    /// Clients without discovery keep the guessed descriptor.
    async fn resolve(&self, resource: &ResourceDescriptor) -> Result<ResourceDescriptor, ApiError> {
        Ok(resource.clone())
    }

    async fn get(
        &self,
        resource: &ResourceDescriptor,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>, ApiError>;

    async fn create(
        &self,
        resource: &ResourceDescriptor,
        namespace: Option<&str>,
        obj: &DynamicObject,
        field_manager: &str,
    ) -> Result<DynamicObject, ApiError>;

    async fn update(
        &self,
        resource: &ResourceDescriptor,
        namespace: Option<&str>,
        obj: &DynamicObject,
        field_manager: &str,
    ) -> Result<DynamicObject, ApiError>;

    async fn list(
        &self,
        resource: &ResourceDescriptor,
        namespace: Option<&str>,
        label_selector: &str,
    ) -> Result<Vec<DynamicObject>, ApiError>;

    /// Changes to objects of `resource`, starting with the current list
    fn watch(&self, resource: &ResourceDescriptor, namespace: Option<&str>) -> WatchStream;
}

/// [`DynamicClient`] talking to a real API server
#[derive(Clone)]
pub struct KubeDynamicClient {
    client: Client,
    discovered: Arc<RwLock<HashMap<GroupVersionKind, ResourceDescriptor>>>,
}

impl KubeDynamicClient {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            discovered: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn api(&self, resource: &ResourceDescriptor, namespace: Option<&str>) -> Api<DynamicObject> {
        let api_resource = resource.api_resource();
        match (namespace, resource.namespaced) {
            (Some(ns), true) => Api::namespaced_with(self.client.clone(), ns, &api_resource),
            _ => Api::all_with(self.client.clone(), &api_resource),
        }
    }
}

fn post_params(field_manager: &str) -> PostParams {
    PostParams {
        dry_run: false,
        field_manager: Some(field_manager.to_string()),
    }
}

fn object_name(obj: &DynamicObject) -> Result<&str, ApiError> {
    obj.metadata
        .name
        .as_deref()
        .ok_or_else(|| ApiError::Rejected("object has no metadata.name".to_string()))
}

#[async_trait]
impl DynamicClient for KubeDynamicClient {
    async fn resolve(&self, resource: &ResourceDescriptor) -> Result<ResourceDescriptor, ApiError> {
        let gvk = resource.gvk();
        if let Some(known) = self.discovered.read().await.get(&gvk) {
            return Ok(known.clone());
        }

        let (api_resource, capabilities) = discovery::pinned_kind(&self.client, &gvk).await?;
        let resolved = ResourceDescriptor::discovered(&api_resource, &capabilities.scope);
        tracing::debug!(
            kind = %resolved.kind,
            plural = %resolved.plural,
            namespaced = resolved.namespaced,
            "discovered resource"
        );
        self.discovered.write().await.insert(gvk, resolved.clone());
        Ok(resolved)
    }

    async fn get(
        &self,
        resource: &ResourceDescriptor,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>, ApiError> {
        Ok(self.api(resource, namespace).get_opt(name).await?)
    }

    async fn create(
        &self,
        resource: &ResourceDescriptor,
        namespace: Option<&str>,
        obj: &DynamicObject,
        field_manager: &str,
    ) -> Result<DynamicObject, ApiError> {
        let api = self.api(resource, namespace);
        Ok(api.create(&post_params(field_manager), obj).await?)
    }

    async fn update(
        &self,
        resource: &ResourceDescriptor,
        namespace: Option<&str>,
        obj: &DynamicObject,
        field_manager: &str,
    ) -> Result<DynamicObject, ApiError> {
        let name = object_name(obj)?;
        let api = self.api(resource, namespace);
        Ok(api.replace(name, &post_params(field_manager), obj).await?)
    }

    async fn list(
        &self,
        resource: &ResourceDescriptor,
        namespace: Option<&str>,
        label_selector: &str,
    ) -> Result<Vec<DynamicObject>, ApiError> {
        let api = self.api(resource, namespace);
        let params = ListParams::default().labels(label_selector);
        Ok(api.list(&params).await?.items)
    }

    fn watch(&self, resource: &ResourceDescriptor, namespace: Option<&str>) -> WatchStream {
        let api = self.api(resource, namespace);
        watcher(api, watcher::Config::default())
            .map(|event| event.map_err(ApiError::from))
            .boxed()
    }
}

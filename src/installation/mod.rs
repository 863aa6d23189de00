//! Release installation
//!
//! For every cluster of an InstallationTarget: obtain its clients from the
//! [`Store`], make sure the release anchor exists and apply each rendered
//! object with get-then-create-or-update. Desired objects carry a checksum
//! annotation, so an unchanged object costs a single get.

mod anchor;
mod status;

pub use anchor::{anchor_name, desired_anchor, ensure_anchor, owner_reference};
pub use status::{ClusterOutcome, RETRYING_REASON, cluster_status, retrying_status};

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::ResourceExt;
use kube::core::DynamicObject;
use sha2::{Digest, Sha256};

use crate::chart::{ChartFetcher, RenderedManifestSet, fetch_and_render};
use crate::clusterclient::{ClusterClients, Store};
use crate::constants::{APP_LABEL, MANIFEST_CHECKSUM_ANNOTATION, RELEASE_LABEL};
use crate::error::{ApiError, ShipyardError};
use crate::kube::ResourceDescriptor;
use crate::models::InstallationTarget;

/// Outcome of one reconcile pass, one entry per target cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    pub clusters: Vec<(String, ClusterOutcome)>,
}

impl InstallReport {
    pub fn outcome(&self, cluster: &str) -> Option<&ClusterOutcome> {
        self.clusters
            .iter()
            .find(|(name, _)| name == cluster)
            .map(|(_, outcome)| outcome)
    }

    /// Whether any cluster failed in a way retrying could fix
    pub fn needs_retry(&self) -> bool {
        self.clusters
            .iter()
            .any(|(_, o)| o.kind().is_some_and(|k| k.is_retryable()))
    }

    pub fn is_installed(&self) -> bool {
        self.clusters
            .iter()
            .all(|(_, o)| *o == ClusterOutcome::Installed)
    }
}

/// Installs one InstallationTarget on all of its clusters
pub struct Installer<'a, T> {
    store: &'a Store<T>,
    fetcher: &'a dyn ChartFetcher,
    user_agent: &'a str,
}

impl<'a, T> Installer<'a, T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(store: &'a Store<T>, fetcher: &'a dyn ChartFetcher, user_agent: &'a str) -> Self {
        Self {
            store,
            fetcher,
            user_agent,
        }
    }

    /// Render the chart once, then install it on every cluster
    pub async fn reconcile(&self, target: &InstallationTarget) -> InstallReport {
        let release = target.name_any();
        let rendered = fetch_and_render(self.fetcher, target).await;
        if let Err(err) = &rendered {
            tracing::warn!(release = %release, kind = %err.kind(), "{}", err);
        }

        let mut clusters = Vec::with_capacity(target.spec.clusters.len());
        for cluster in &target.spec.clusters {
            let outcome = match (self.store.get_client(cluster, self.user_agent).await, &rendered) {
                (Err(err), _) => {
                    tracing::warn!(release = %release, cluster = %cluster, "{}", err);
                    ClusterOutcome::failed(&err)
                }
                (Ok(_), Err(err)) => ClusterOutcome::failed(err),
                (Ok(clients), Ok(manifests)) => match install(&clients, target, manifests).await {
                    Ok(()) => {
                        tracing::info!(release = %release, cluster = %cluster, objects = manifests.len(), "installed");
                        ClusterOutcome::Installed
                    }
                    Err(err) => {
                        tracing::warn!(release = %release, cluster = %cluster, "{}", err);
                        ClusterOutcome::failed(&err)
                    }
                },
            };
            clusters.push((cluster.clone(), outcome));
        }

        InstallReport { clusters }
    }
}

/// Apply `manifests` on the cluster behind `clients`
pub async fn install<T>(
    clients: &ClusterClients<T>,
    target: &InstallationTarget,
    manifests: &RenderedManifestSet,
) -> Result<(), ShipyardError> {
    let release = target.name_any();
    let namespace = target.namespace().unwrap_or_default();
    let client = clients.dynamic();
    let field_manager = clients.user_agent();

    let anchor = ensure_anchor(client, &namespace, &release, field_manager)
        .await
        .and_then(|anchor| owner_reference(&anchor))
        .map_err(|source| ShipyardError::Apply {
            cluster: clients.cluster().to_string(),
            kind: "ConfigMap".to_string(),
            name: anchor_name(&release),
            source,
        })?;

    for (rendered, object) in manifests.resources() {
        let name = object.name_any();
        apply_rendered(clients, &rendered, object, target, &namespace, &anchor)
            .await
            .map_err(|source| ShipyardError::Apply {
                cluster: clients.cluster().to_string(),
                kind: rendered.kind.clone(),
                name,
                source,
            })?;
    }
    Ok(())
}

/// Resolve how the cluster serves `rendered`, then apply `object`
async fn apply_rendered<T>(
    clients: &ClusterClients<T>,
    rendered: &ResourceDescriptor,
    object: &DynamicObject,
    target: &InstallationTarget,
    namespace: &str,
    anchor: &OwnerReference,
) -> Result<(), ApiError> {
    let resource = clients.dynamic().resolve(rendered).await?;
    let desired = prepare(object, &resource, target, namespace, anchor)?;
    apply(clients, &resource, namespace, desired, target).await
}

/// Stamp ownership, release labels and the content checksum onto `object`
fn prepare(
    object: &DynamicObject,
    resource: &ResourceDescriptor,
    target: &InstallationTarget,
    namespace: &str,
    anchor: &OwnerReference,
) -> Result<DynamicObject, ApiError> {
    let mut desired = object.clone();
    let release = target.name_any();

    if resource.namespaced {
        desired.metadata.namespace = Some(namespace.to_string());
        desired
            .metadata
            .owner_references
            .get_or_insert_with(Vec::new)
            .push(anchor.clone());
    }

    let labels = desired.metadata.labels.get_or_insert_with(Default::default);
    labels.insert(RELEASE_LABEL.to_string(), release);
    if let Some(app) = target.labels().get(APP_LABEL) {
        labels.insert(APP_LABEL.to_string(), app.clone());
    }

    let checksum = manifest_checksum(&desired)?;
    desired
        .metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert(MANIFEST_CHECKSUM_ANNOTATION.to_string(), checksum);
    Ok(desired)
}

fn manifest_checksum(object: &DynamicObject) -> Result<String, ApiError> {
    let bytes = serde_json::to_vec(object)?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}

async fn apply<T>(
    clients: &ClusterClients<T>,
    resource: &ResourceDescriptor,
    namespace: &str,
    mut desired: DynamicObject,
    target: &InstallationTarget,
) -> Result<(), ApiError> {
    let client = clients.dynamic();
    let name = desired.name_any();
    let ns = resource.namespaced.then_some(namespace);

    let Some(existing) = client.get(resource, ns, &name).await? else {
        tracing::debug!(kind = %resource.kind, name = %name, "creating");
        client
            .create(resource, ns, &desired, clients.user_agent())
            .await?;
        return Ok(());
    };

    let wanted = desired
        .annotations()
        .get(MANIFEST_CHECKSUM_ANNOTATION)
        .cloned();
    if existing.annotations().get(MANIFEST_CHECKSUM_ANNOTATION) == wanted.as_ref() {
        tracing::debug!(kind = %resource.kind, name = %name, "up to date");
        return Ok(());
    }

    let release = target.name_any();
    let owner = existing.labels().get(RELEASE_LABEL);
    if let Some(owner) = owner
        && *owner != release
        && !target.spec.can_override
    {
        return Err(ApiError::Rejected(format!(
            "{} {:?} belongs to release {:?} and overriding is not allowed",
            resource.kind, name, owner
        )));
    }

    tracing::debug!(kind = %resource.kind, name = %name, "updating");
    desired.metadata.resource_version = existing.metadata.resource_version.clone();
    desired.metadata.uid = existing.metadata.uid.clone();
    client
        .update(resource, ns, &desired, clients.user_agent())
        .await?;
    Ok(())
}

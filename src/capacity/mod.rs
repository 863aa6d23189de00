//! Capacity reporting
//!
//! Pods of a release are observed on every cluster it runs on and folded into
//! one [`ClusterCapacityReport`]. Pods are sorted by name before folding so
//! the report does not depend on the order the API servers listed them in.

mod builder;

pub use builder::ReportBuilder;

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::ListParams;
use kube::{Api, Client, ResourceExt};

use crate::constants::RELEASE_LABEL;
use crate::error::ApiError;
use crate::models::ClusterCapacityReport;

/// Lists pods on one cluster
#[async_trait]
pub trait PodLister: Send + Sync {
    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>, ApiError>;
}

#[async_trait]
impl PodLister for Client {
    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>, ApiError> {
        let api: Api<Pod> = Api::namespaced(self.clone(), namespace);
        let params = ListParams::default().labels(label_selector);
        Ok(api.list(&params).await?.items)
    }
}

#[async_trait]
impl<P: PodLister + ?Sized> PodLister for Arc<P> {
    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>, ApiError> {
        self.as_ref().list_pods(namespace, label_selector).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Waiting,
    Running,
    Terminated,
}

impl ContainerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerState::Waiting => "Waiting",
            ContainerState::Running => "Running",
            ContainerState::Terminated => "Terminated",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodCondition {
    pub type_: String,
    pub status: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerObservation {
    pub name: String,
    pub state: ContainerState,
    pub reason: String,
}

/// One pod as seen during a single aggregation pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodObservation {
    pub name: String,
    pub conditions: Vec<PodCondition>,
    pub containers: Vec<ContainerObservation>,
}

impl From<&Pod> for PodObservation {
    fn from(pod: &Pod) -> Self {
        let status = pod.status.as_ref();

        let conditions = status
            .and_then(|s| s.conditions.as_ref())
            .map(|conditions| {
                conditions
                    .iter()
                    .map(|c| PodCondition {
                        type_: c.type_.clone(),
                        status: c.status.clone(),
                        reason: c.reason.clone().unwrap_or_default(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let containers = status
            .and_then(|s| s.container_statuses.as_ref())
            .map(|statuses| {
                statuses
                    .iter()
                    .filter_map(|cs| {
                        let state = cs.state.as_ref()?;
                        let (state, reason) = if let Some(waiting) = &state.waiting {
                            (ContainerState::Waiting, waiting.reason.clone())
                        } else if state.running.is_some() {
                            (ContainerState::Running, None)
                        } else if let Some(terminated) = &state.terminated {
                            (ContainerState::Terminated, terminated.reason.clone())
                        } else {
                            return None;
                        };
                        Some(ContainerObservation {
                            name: cs.name.clone(),
                            state,
                            reason: reason.unwrap_or_default(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            name: pod.name_any(),
            conditions,
            containers,
        }
    }
}

/// Fold `pods` into a report owned by `owner`
pub fn build_report(owner: &str, mut pods: Vec<PodObservation>) -> ClusterCapacityReport {
    pods.sort_by(|a, b| a.name.cmp(&b.name));

    let mut builder = ReportBuilder::new(owner);
    for pod in &pods {
        builder.add_pod(pod);
    }
    builder.build()
}

/// List the pods of `release` on every given cluster and build its report
pub async fn collect(
    clusters: &[&dyn PodLister],
    namespace: &str,
    release: &str,
) -> Result<ClusterCapacityReport, ApiError> {
    let selector = format!("{}={}", RELEASE_LABEL, release);

    let mut pods = Vec::new();
    for cluster in clusters {
        pods.extend(
            cluster
                .list_pods(namespace, &selector)
                .await?
                .iter()
                .map(PodObservation::from),
        );
    }

    tracing::debug!(release, pods = pods.len(), "collected pods");
    Ok(build_report(release, pods))
}

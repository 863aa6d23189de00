//! Installation controller
//!
//! Runs InstallationTargets through [`kube::runtime::Controller`]. A target
//! is reconciled when it changes, when the clients of one of its clusters are
//! rebuilt or removed, and again after every resync period. Transient
//! failures requeue the target with exponential backoff.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use kube::api::{Patch, PatchParams};
use kube::runtime::controller::{self, Action};
use kube::runtime::reflector::{self, ObjectRef};
use kube::runtime::{Controller, watcher};
use kube::{Api, Client, ResourceExt};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::{ControllerSettings, WATCH_TIMEOUT_SECS, backoff_delay};
use crate::chart::ChartFetcher;
use crate::clusterclient::Store;
use crate::error::ApiError;
use crate::events::{EventRecorder, EventType};
use crate::installation::{ClusterOutcome, InstallReport, Installer, cluster_status, retrying_status};
use crate::models::{InstallationTarget, InstallationTargetStatus};

/// Key of `target` in logs, events and retry bookkeeping
pub fn target_key(target: &InstallationTarget) -> String {
    format!("{}/{}", target.namespace().unwrap_or_default(), target.name_any())
}

/// Status after a reconcile pass
///
/// Chart errors and successes replace the cluster's entry right away.
/// Other failures mark the cluster as retrying, and are only reported once
/// `failures` (counting this pass) reaches `status_after_retries`.
pub fn compose_status(
    previous: Option<&InstallationTargetStatus>,
    report: &InstallReport,
    failures: u32,
    status_after_retries: u32,
    now: DateTime<Utc>,
) -> InstallationTargetStatus {
    let clusters = report
        .clusters
        .iter()
        .map(|(cluster, outcome)| {
            let prior = previous.and_then(|s| s.cluster(cluster));
            match outcome {
                ClusterOutcome::Failed { kind, .. }
                    if !kind.is_chart_error() && failures < status_after_retries =>
                {
                    retrying_status(prior, cluster, now)
                }
                _ => cluster_status(prior, cluster, outcome, now),
            }
        })
        .collect();

    InstallationTargetStatus { clusters }
}

/// Writes InstallationTarget status on the management cluster
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StatusWriter: Send + Sync {
    async fn patch_status(
        &self,
        target: &InstallationTarget,
        status: &InstallationTargetStatus,
    ) -> Result<(), ApiError>;
}

/// [`StatusWriter`] merge-patching the status subresource
pub struct KubeStatusWriter {
    client: Client,
}

impl KubeStatusWriter {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StatusWriter for KubeStatusWriter {
    async fn patch_status(
        &self,
        target: &InstallationTarget,
        status: &InstallationTargetStatus,
    ) -> Result<(), ApiError> {
        let namespace = target.namespace().unwrap_or_default();
        let api: Api<InstallationTarget> = Api::namespaced(self.client.clone(), &namespace);
        let patch = serde_json::json!({ "status": status });
        api.patch_status(&target.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

/// A reconcile pass that could not record its result
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("failed to update status of {key}: {source}")]
    Status {
        key: String,
        #[source]
        source: ApiError,
    },
}

/// State shared by every reconcile of the installation controller
pub struct Context<T> {
    store: Store<T>,
    fetcher: Arc<dyn ChartFetcher>,
    status: Arc<dyn StatusWriter>,
    settings: ControllerSettings,
    recorder: EventRecorder,
    failures: Mutex<HashMap<String, u32>>,
}

impl<T> Context<T> {
    pub fn new(
        store: Store<T>,
        fetcher: Arc<dyn ChartFetcher>,
        status: Arc<dyn StatusWriter>,
        settings: ControllerSettings,
        recorder: EventRecorder,
    ) -> Self {
        Self {
            store,
            fetcher,
            status,
            settings,
            recorder,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Consecutive failed passes of `key`
    pub fn failures(&self, key: &str) -> u32 {
        let failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        failures.get(key).copied().unwrap_or(0)
    }

    fn set_failures(&self, key: &str, count: u32) {
        let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        if count == 0 {
            failures.remove(key);
        } else {
            failures.insert(key.to_string(), count);
        }
    }

    fn backoff(&self, failures: u32) -> Action {
        Action::requeue(backoff_delay(
            self.settings.backoff_base,
            self.settings.backoff_max,
            failures,
        ))
    }
}

/// Install `target` on its clusters and record the outcome in its status
pub async fn reconcile<T>(
    target: Arc<InstallationTarget>,
    ctx: Arc<Context<T>>,
) -> Result<Action, ReconcileError>
where
    T: Clone + Send + Sync + 'static,
{
    let key = target_key(&target);
    let installer = Installer::new(&ctx.store, ctx.fetcher.as_ref(), &ctx.settings.user_agent);
    let report = installer.reconcile(&target).await;

    let failures = if report.needs_retry() {
        ctx.failures(&key) + 1
    } else {
        0
    };
    let status = compose_status(
        target.status.as_ref(),
        &report,
        failures,
        ctx.settings.status_after_retries,
        Utc::now(),
    );

    let recorder = ctx.recorder.about(key.as_str());
    for (cluster, outcome) in &report.clusters {
        if let ClusterOutcome::Failed { kind, message } = outcome {
            recorder.record(
                EventType::Warning,
                kind.as_str(),
                format!("cluster {}: {}", cluster, message),
            );
        }
    }

    if target.status.as_ref() != Some(&status) {
        ctx.status
            .patch_status(&target, &status)
            .await
            .map_err(|source| ReconcileError::Status {
                key: key.clone(),
                source,
            })?;
    }

    ctx.set_failures(&key, failures);
    if failures > 0 {
        tracing::debug!(key = %key, failures, "requeueing with backoff");
        return Ok(ctx.backoff(failures));
    }
    if report.is_installed() {
        tracing::debug!(key = %key, "release installed on every cluster");
    }
    Ok(Action::requeue(ctx.settings.resync))
}

/// Requeue a pass that failed to record its result
pub fn error_policy<T>(
    target: Arc<InstallationTarget>,
    error: &ReconcileError,
    ctx: Arc<Context<T>>,
) -> Action {
    let key = target_key(&target);
    let failures = ctx.failures(&key) + 1;
    ctx.set_failures(&key, failures);
    tracing::warn!(key = %key, failures, "reconcile failed: {}", error);
    ctx.backoff(failures)
}

/// References of every target installed on `cluster`
pub fn targets_on_cluster(
    targets: &[Arc<InstallationTarget>],
    cluster: &str,
) -> Vec<ObjectRef<InstallationTarget>> {
    targets
        .iter()
        .filter(|t| t.spec.clusters.iter().any(|c| c == cluster))
        .map(|t| ObjectRef::from_obj(t.as_ref()))
        .collect()
}

/// Turn store notifications into reconcile requests
///
/// A lagging receiver has lost track of which clusters changed, so every
/// known target is requested.
fn cluster_triggers(
    reader: reflector::Store<InstallationTarget>,
    changes: broadcast::Receiver<String>,
) -> impl Stream<Item = ObjectRef<InstallationTarget>> + Send + 'static {
    futures::stream::unfold((reader, changes), |(reader, mut changes)| async move {
        let refs = match changes.recv().await {
            Ok(cluster) => {
                let refs = targets_on_cluster(&reader.state(), &cluster);
                tracing::debug!(cluster = %cluster, targets = refs.len(), "cluster clients changed");
                refs
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                tracing::debug!(missed, "store notifications lagged, requeueing everything");
                reader.state().iter().map(|t| ObjectRef::from_obj(t.as_ref())).collect()
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        };
        Some((futures::stream::iter(refs), (reader, changes)))
    })
    .flatten()
}

/// Installs InstallationTargets on their clusters
pub struct InstallationController<T> {
    client: Client,
    context: Arc<Context<T>>,
}

impl<T> InstallationController<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(
        client: Client,
        store: Store<T>,
        fetcher: Arc<dyn ChartFetcher>,
        settings: ControllerSettings,
        recorder: EventRecorder,
    ) -> Self {
        let status = Arc::new(KubeStatusWriter::new(client.clone()));
        Self {
            client,
            context: Arc::new(Context::new(store, fetcher, status, settings, recorder)),
        }
    }

    /// Run until `stop` fires and in-flight reconciles have finished
    pub async fn run(self, stop: CancellationToken) {
        let workers = self.context.settings.workers;
        tracing::info!(workers, "installation controller started");
        self.context
            .recorder
            .record(EventType::Normal, "Started", format!("{} workers", workers));

        let targets: Api<InstallationTarget> = Api::all(self.client.clone());
        let controller = Controller::new(
            targets,
            watcher::Config::default().timeout(WATCH_TIMEOUT_SECS),
        )
        .with_config(
            controller::Config::default()
                .concurrency(u16::try_from(workers).unwrap_or(u16::MAX)),
        );
        let triggers = cluster_triggers(controller.store(), self.context.store.subscribe());

        controller
            .reconcile_on(triggers)
            .graceful_shutdown_on(stop.cancelled_owned())
            .run(reconcile::<T>, error_policy::<T>, self.context)
            .for_each(|result| {
                match result {
                    Ok((object, action)) => {
                        tracing::debug!(object = %object, ?action, "reconciled")
                    }
                    Err(e) => tracing::warn!("installation controller error: {}", e),
                }
                futures::future::ready(())
            })
            .await;
        tracing::info!("installation controller stopped");
    }
}

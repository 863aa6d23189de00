//! Capacity controller
//!
//! Builds the capacity report of each InstallationTarget across its clusters
//! and stores it in the ConfigMap `<release>-capacity` next to the target on
//! the management cluster. Reports are refreshed whenever a target changes
//! and on every resync tick.

use std::sync::Arc;

use futures::StreamExt;
use kube::core::DynamicObject;
use kube::runtime::watcher;
use kube::{Resource, ResourceExt};
use tokio_util::sync::CancellationToken;

use super::{ControllerSettings, MAX_CONSECUTIVE_ERRORS};
use crate::capacity::{self, PodLister};
use crate::clusterclient::{ClusterClients, Store};
use crate::constants::{API_GROUP, API_VERSION, RELEASE_LABEL};
use crate::error::{ApiError, ShipyardError};
use crate::events::{EventRecorder, EventType};
use crate::kube::{DynamicClient, ResourceDescriptor};
use crate::models::{ClusterCapacityReport, InstallationTarget};

/// Data key holding the serialized report
pub const REPORT_KEY: &str = "report.json";

pub fn capacity_config_map_name(release: &str) -> String {
    format!("{}-capacity", release)
}

fn installation_targets() -> ResourceDescriptor {
    ResourceDescriptor::new(&format!("{}/{}", API_GROUP, API_VERSION), "InstallationTarget")
}

/// Why a report could not be refreshed
#[derive(Debug, thiserror::Error)]
pub enum CapacityError {
    /// A target cluster cannot be read; the stored report is left as is
    #[error(transparent)]
    Cluster(#[from] ShipyardError),

    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Keeps capacity reports up to date
pub struct CapacityController<T> {
    management: Arc<dyn DynamicClient>,
    store: Store<T>,
    settings: ControllerSettings,
    recorder: EventRecorder,
}

impl<T> CapacityController<T>
where
    T: PodLister + Clone + Send + Sync + 'static,
{
    pub fn new(
        management: Arc<dyn DynamicClient>,
        store: Store<T>,
        settings: ControllerSettings,
        recorder: EventRecorder,
    ) -> Self {
        Self {
            management,
            store,
            settings,
            recorder,
        }
    }

    /// Run until `stop` fires
    pub async fn run(self, stop: CancellationToken) {
        tracing::info!(resync = ?self.settings.resync, "capacity controller started");
        let mut targets = self
            .management
            .watch(&installation_targets(), None)
            .fuse();
        let mut ticker = tokio::time::interval(self.settings.resync);
        // the first tick completes immediately; the watch's initial list covers startup
        ticker.tick().await;
        let mut error_count = 0u32;

        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.refresh_all().await {
                        tracing::warn!("failed to list InstallationTargets: {}", e);
                    }
                }
                Some(event) = targets.next() => match event {
                    Ok(watcher::Event::InitApply(obj)) | Ok(watcher::Event::Apply(obj)) => {
                        error_count = 0;
                        self.refresh_object(&obj).await;
                    }
                    Ok(_) => error_count = 0,
                    Err(e) => {
                        error_count += 1;
                        if error_count == 1 || error_count.is_multiple_of(10) {
                            tracing::warn!("InstallationTarget watcher error ({}): {}", error_count, e);
                        }
                        let pause = if error_count >= MAX_CONSECUTIVE_ERRORS { 10 } else { 1 };
                        tokio::time::sleep(tokio::time::Duration::from_secs(pause)).await;
                    }
                },
            }
        }
        tracing::info!("capacity controller stopped");
    }

    /// Refresh the report of every InstallationTarget once
    pub async fn refresh_all(&self) -> Result<(), ApiError> {
        let objects = self
            .management
            .list(&installation_targets(), None, "")
            .await?;

        for obj in &objects {
            self.refresh_object(obj).await;
        }
        Ok(())
    }

    async fn refresh_object(&self, obj: &DynamicObject) {
        let target: InstallationTarget =
            match serde_json::to_value(obj).and_then(serde_json::from_value) {
                Ok(target) => target,
                Err(e) => {
                    tracing::warn!(name = %obj.name_any(), "undecodable InstallationTarget: {}", e);
                    return;
                }
            };

        let key = super::target_key(&target);
        match self.refresh(&target).await {
            Ok(true) => tracing::debug!(key = %key, "capacity report updated"),
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(key = %key, "failed to refresh capacity report: {}", e);
                self.recorder
                    .about(key)
                    .record(EventType::Warning, "CapacityReportFailed", e.to_string());
            }
        }
    }

    /// Refresh the report of `target`; returns whether it changed
    ///
    /// Every cluster of the target must be ready. A partial report would
    /// read as lost capacity, so the stored one is kept instead.
    pub async fn refresh(&self, target: &InstallationTarget) -> Result<bool, CapacityError> {
        let release = target.name_any();
        let namespace = target.namespace().unwrap_or_default();

        let mut names = target.spec.clusters.clone();
        names.sort();
        names.dedup();

        let mut clients: Vec<ClusterClients<T>> = Vec::with_capacity(names.len());
        for name in &names {
            clients.push(self.store.get_client(name, &self.settings.user_agent).await?);
        }
        let listers: Vec<&dyn PodLister> = clients
            .iter()
            .map(|c| c.typed() as &dyn PodLister)
            .collect();

        let report = capacity::collect(&listers, &namespace, &release).await?;
        let written = write_report(
            self.management.as_ref(),
            target,
            &report,
            &self.settings.user_agent,
        )
        .await?;
        Ok(written)
    }
}

/// The report ConfigMap as it should exist for `target`
pub fn desired_report(
    target: &InstallationTarget,
    report: &ClusterCapacityReport,
) -> Result<DynamicObject, ApiError> {
    let release = target.name_any();
    let resource = ResourceDescriptor::config_map();
    let mut data = serde_json::Map::new();
    data.insert(
        REPORT_KEY.to_string(),
        serde_json::Value::String(serde_json::to_string_pretty(report)?),
    );
    let mut obj = DynamicObject::new(&capacity_config_map_name(&release), &resource.api_resource())
        .within(&target.namespace().unwrap_or_default())
        .data(serde_json::json!({ "data": data }));
    obj.metadata
        .labels
        .get_or_insert_with(Default::default)
        .insert(RELEASE_LABEL.to_string(), release);
    if let Some(owner) = target.controller_owner_ref(&()) {
        obj.metadata.owner_references = Some(vec![owner]);
    }
    Ok(obj)
}

/// Create or update the report ConfigMap; returns whether anything was written
pub async fn write_report(
    client: &dyn DynamicClient,
    target: &InstallationTarget,
    report: &ClusterCapacityReport,
    field_manager: &str,
) -> Result<bool, ApiError> {
    let resource = ResourceDescriptor::config_map();
    let namespace = target.namespace().unwrap_or_default();
    let desired = desired_report(target, report)?;
    let name = capacity_config_map_name(&target.name_any());

    match client.get(&resource, Some(&namespace), &name).await? {
        None => {
            client
                .create(&resource, Some(&namespace), &desired, field_manager)
                .await?;
            Ok(true)
        }
        Some(existing) if existing.data.get("data") == desired.data.get("data") => Ok(false),
        Some(existing) => {
            let mut updated = desired;
            updated.metadata.resource_version = existing.metadata.resource_version;
            updated.metadata.uid = existing.metadata.uid;
            client
                .update(&resource, Some(&namespace), &updated, field_manager)
                .await?;
            Ok(true)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChartReference, InstallationTargetSpec, ReportOwner};

    fn target() -> InstallationTarget {
        let mut target = InstallationTarget::new(
            "reviews-api",
            InstallationTargetSpec {
                clusters: vec!["kind-1".into()],
                chart: ChartReference {
                    name: "reviews".into(),
                    version: "1.0.0".into(),
                    repo_url: "https://charts.example.com".into(),
                },
                ..Default::default()
            },
        );
        target.metadata.namespace = Some("reviews".into());
        target.metadata.uid = Some("1234".into());
        target
    }

    #[test]
    fn test_desired_report_is_owned_by_target() {
        let report = ClusterCapacityReport {
            owner: ReportOwner {
                name: "reviews-api".into(),
            },
            breakdown: Vec::new(),
        };
        let obj = desired_report(&target(), &report).unwrap();

        assert_eq!(obj.metadata.name.as_deref(), Some("reviews-api-capacity"));
        assert_eq!(obj.metadata.namespace.as_deref(), Some("reviews"));
        let owners = obj.metadata.owner_references.unwrap();
        assert_eq!(owners[0].kind, "InstallationTarget");
        assert_eq!(owners[0].uid, "1234");

        let stored = obj.data["data"][REPORT_KEY].as_str().unwrap();
        let decoded: ClusterCapacityReport = serde_json::from_str(stored).unwrap();
        assert_eq!(decoded, report);
    }

    #[test]
    fn test_targets_descriptor() {
        let rd = installation_targets();
        assert_eq!(rd.plural, "installationtargets");
        assert!(rd.namespaced);
    }

    #[test]
    fn test_unready_cluster_error_keeps_its_kind() {
        let err = CapacityError::from(ShipyardError::ClusterNotReady("kind-2".into()));
        assert_eq!(err.to_string(), "cluster \"kind-2\" is not ready yet");
    }
}

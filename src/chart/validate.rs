//! Structural checks on a rendered manifest set
//!
//! Traffic shifting needs exactly one production Service per release whose
//! selector spans every release of the application, and Deployments whose
//! names differ between releases.

use std::collections::BTreeMap;

use kube::core::DynamicObject;

use crate::constants::{
    HELM_RELEASE_LABEL, HELM_WORKAROUND_LABEL, LB_FOR_PRODUCTION, LB_LABEL, LEGACY_CHART_LABEL,
    TRUE,
};
use crate::error::ShipyardError;

const DEPLOYMENT_KINDS: &[&str] = &["Deployment", "StatefulSet"];

fn kind_of(obj: &DynamicObject) -> &str {
    obj.types.as_ref().map(|t| t.kind.as_str()).unwrap_or_default()
}

fn api_version_of(obj: &DynamicObject) -> &str {
    obj.types.as_ref().map(|t| t.api_version.as_str()).unwrap_or_default()
}

fn name_of(obj: &DynamicObject) -> &str {
    obj.metadata.name.as_deref().unwrap_or_default()
}

fn label_is_true(labels: &BTreeMap<String, String>, key: &str) -> bool {
    labels.get(key).is_some_and(|v| v == TRUE)
}

fn is_production_service(obj: &DynamicObject) -> bool {
    api_version_of(obj) == "v1"
        && kind_of(obj) == "Service"
        && obj
            .metadata
            .labels
            .as_ref()
            .and_then(|l| l.get(LB_LABEL))
            .is_some_and(|v| v == LB_FOR_PRODUCTION)
}

/// Check `objects` rendered for `release`, whose owner carries `labels`
pub fn validate(
    objects: &[DynamicObject],
    release: &str,
    labels: &BTreeMap<String, String>,
) -> Result<(), ShipyardError> {
    if label_is_true(labels, LEGACY_CHART_LABEL) {
        tracing::debug!(release, "legacy chart, skipping structural validation");
        return Ok(());
    }

    let services: Vec<&DynamicObject> = objects.iter().filter(|o| is_production_service(o)).collect();
    if services.len() != 1 {
        return Err(ShipyardError::InvalidChart(format!(
            "one and only one v1.Service object with label {:?} is required, but {} found instead",
            LB_LABEL,
            services.len()
        )));
    }

    if label_is_true(labels, HELM_WORKAROUND_LABEL) {
        for obj in objects.iter().filter(|o| DEPLOYMENT_KINDS.contains(&kind_of(o))) {
            let name = name_of(obj);
            if !name.starts_with(release) {
                return Err(ShipyardError::InvalidChart(format!(
                    "{} {:?} has invalid name. The name of the {} should be templated with {{{{ .Release.Name }}}}. \
                     This will break traffic shifting logic",
                    kind_of(obj),
                    name,
                    kind_of(obj)
                )));
            }
        }
    } else {
        let service = services[0];
        let pins_release = service
            .data
            .pointer("/spec/selector")
            .and_then(|s| s.as_object())
            .is_some_and(|s| s.contains_key(HELM_RELEASE_LABEL));
        if pins_release {
            return Err(ShipyardError::InvalidChart(format!(
                "service {:?} selector contains the {:?} label key, which pins traffic to a single release. \
                 This will break traffic shifting logic",
                name_of(service),
                HELM_RELEASE_LABEL
            )));
        }
    }

    Ok(())
}

//! Release anchors
//!
//! Every object installed for a release on a cluster is owned by one
//! ConfigMap, `<release>-anchor`. Deleting the anchor garbage-collects the
//! release from that cluster.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::core::DynamicObject;

use crate::constants::{ANCHOR_SUFFIX, RELEASE_LABEL};
use crate::error::ApiError;
use crate::kube::{DynamicClient, ResourceDescriptor};

pub fn anchor_name(release: &str) -> String {
    format!("{}{}", release, ANCHOR_SUFFIX)
}

/// The anchor as it should exist on every cluster
pub fn desired_anchor(namespace: &str, release: &str) -> DynamicObject {
    let resource = ResourceDescriptor::config_map();
    let mut anchor = DynamicObject::new(&anchor_name(release), &resource.api_resource())
        .within(namespace)
        .data(serde_json::json!({ "data": { "release": release } }));
    anchor
        .metadata
        .labels
        .get_or_insert_with(Default::default)
        .insert(RELEASE_LABEL.to_string(), release.to_string());
    anchor
}

/// Fetch the release's anchor, creating it when missing
pub async fn ensure_anchor(
    client: &dyn DynamicClient,
    namespace: &str,
    release: &str,
    field_manager: &str,
) -> Result<DynamicObject, ApiError> {
    let resource = ResourceDescriptor::config_map();
    if let Some(existing) = client
        .get(&resource, Some(namespace), &anchor_name(release))
        .await?
    {
        return Ok(existing);
    }

    tracing::debug!(namespace, release, "creating anchor");
    let anchor = desired_anchor(namespace, release);
    client
        .create(&resource, Some(namespace), &anchor, field_manager)
        .await
}

/// Owner reference pointing at `anchor`
pub fn owner_reference(anchor: &DynamicObject) -> Result<OwnerReference, ApiError> {
    let uid = anchor
        .metadata
        .uid
        .clone()
        .ok_or_else(|| ApiError::Rejected("anchor has no uid".to_string()))?;
    Ok(OwnerReference {
        api_version: "v1".to_string(),
        kind: "ConfigMap".to_string(),
        name: anchor.metadata.name.clone().unwrap_or_default(),
        uid,
        ..Default::default()
    })
}

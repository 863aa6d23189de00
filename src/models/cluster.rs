//! Cluster Custom Resource Definition
//!
//! A Cluster names one member of the fleet. Its name matches the Secret that
//! carries the cluster's TLS material; together they form a credential.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Specification for a Cluster
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "shipyard.io",
    version = "v1alpha1",
    kind = "Cluster",
    plural = "clusters",
    namespaced = false,
    printcolumn = r#"{"name":"Region","type":"string","jsonPath":".spec.region"}"#,
    printcolumn = r#"{"name":"API","type":"string","jsonPath":".spec.apiMaster"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// API server endpoint, e.g. `https://10.0.0.1:6443`
    #[serde(default)]
    pub api_master: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<String>,

    #[serde(default)]
    pub region: String,

    #[serde(default)]
    pub scheduler: ClusterSchedulerSettings,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSchedulerSettings {
    /// Unschedulable clusters keep their installations but receive no new ones
    #[serde(default)]
    pub unschedulable: bool,
}

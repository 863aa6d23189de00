//! InstallationTarget Custom Resource Definition
//!
//! One InstallationTarget exists per release. It names the chart, the values
//! to render it with and the clusters it must be installed on. Its status
//! carries one condition list per cluster.

use std::fmt;

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Immutable reference to a packaged chart
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct ChartReference {
    pub name: String,

    /// Exact version or semver constraint
    pub version: String,

    pub repo_url: String,
}

impl fmt::Display for ChartReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// Specification for an InstallationTarget
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "shipyard.io",
    version = "v1alpha1",
    kind = "InstallationTarget",
    plural = "installationtargets",
    shortname = "it",
    status = "InstallationTargetStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct InstallationTargetSpec {
    /// Clusters the chart is installed on
    #[serde(default)]
    pub clusters: Vec<String>,

    pub chart: ChartReference,

    /// Release values, merged over the chart defaults
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "free_form")]
    pub values: Option<serde_json::Value>,

    /// Whether another release may take over objects this one installed
    #[serde(default)]
    pub can_override: bool,
}

fn free_form(_: &mut schemars::SchemaGenerator) -> schemars::Schema {
    schemars::json_schema!({
        "type": "object",
        "x-kubernetes-preserve-unknown-fields": true
    })
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstallationTargetStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub clusters: Vec<ClusterInstallationStatus>,
}

impl InstallationTargetStatus {
    pub fn cluster(&self, name: &str) -> Option<&ClusterInstallationStatus> {
        self.clusters.iter().find(|c| c.name == name)
    }
}

/// Installation status of a release on one cluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterInstallationStatus {
    pub name: String,

    #[serde(default)]
    pub conditions: Vec<TargetCondition>,
}

impl ClusterInstallationStatus {
    pub fn condition(&self, kind: TargetConditionType) -> Option<&TargetCondition> {
        self.conditions.iter().find(|c| c.type_ == kind)
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum TargetConditionType {
    /// The cluster can be talked to
    Operational,
    /// Every manifest of the release is applied on the cluster
    Ready,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TargetCondition {
    #[serde(rename = "type")]
    pub type_: TargetConditionType,

    pub status: ConditionStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl TargetCondition {
    pub fn new(type_: TargetConditionType, status: ConditionStatus) -> Self {
        Self {
            type_,
            status,
            reason: None,
            message: None,
            last_transition_time: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>, message: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self.message = Some(message.into());
        self
    }
}

//! Capacity report types
//!
//! A report folds the pods of one release into a tree: pod condition
//! `(type, status, reason)` at the top, containers below it, container
//! states below those. The structure is fully ordered so two reports built
//! from the same pods serialize identically.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterCapacityReport {
    pub owner: ReportOwner,

    #[serde(default)]
    pub breakdown: Vec<ClusterCapacityReportBreakdown>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct ReportOwner {
    pub name: String,
}

/// Pods sharing one pod condition
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterCapacityReportBreakdown {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    pub count: u32,

    /// Sorted by container name
    #[serde(default)]
    pub containers: Vec<ContainerBreakdown>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct ContainerBreakdown {
    pub name: String,
    pub count: u32,

    /// Sorted by `(type, reason)`
    #[serde(default)]
    pub states: Vec<ContainerStateBreakdown>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct ContainerStateBreakdown {
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    pub count: u32,
    pub example: ContainerBreakdownExample,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct ContainerBreakdownExample {
    pub pod: String,
}

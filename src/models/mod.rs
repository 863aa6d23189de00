//! Shipyard Model Layer
//!
//! This module provides Rust types for the shipyard custom resources and for
//! the values they embed.
//!
//! Structure:
//! - `cluster.rs` - Cluster resource (API endpoint and scheduling settings)
//! - `installation_target.rs` - InstallationTarget resource and its status
//! - `capacity_report.rs` - Cross-cluster capacity report
//! - `mod.rs` - Public API re-exports

pub mod capacity_report;
pub mod cluster;
pub mod installation_target;

pub use capacity_report::{
    ClusterCapacityReport, ClusterCapacityReportBreakdown, ContainerBreakdown,
    ContainerBreakdownExample, ContainerStateBreakdown, ReportOwner,
};
pub use cluster::{Cluster, ClusterSchedulerSettings, ClusterSpec};
pub use installation_target::{
    ChartReference, ClusterInstallationStatus, ConditionStatus, InstallationTarget,
    InstallationTargetSpec, InstallationTargetStatus, TargetCondition, TargetConditionType,
};

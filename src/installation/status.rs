//! Per-cluster installation conditions

use chrono::{DateTime, Utc};

use crate::error::{ErrorKind, ShipyardError};
use crate::models::{
    ClusterInstallationStatus, ConditionStatus, TargetCondition, TargetConditionType,
};

/// What happened to one cluster during a reconcile pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterOutcome {
    Installed,
    Failed { kind: ErrorKind, message: String },
}

impl ClusterOutcome {
    pub fn failed(err: &ShipyardError) -> Self {
        ClusterOutcome::Failed {
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            ClusterOutcome::Installed => None,
            ClusterOutcome::Failed { kind, .. } => Some(*kind),
        }
    }

    /// Conditions describing this outcome
    pub fn conditions(&self) -> Vec<TargetCondition> {
        use ConditionStatus::{False, True, Unknown};
        use TargetConditionType::{Operational, Ready};

        match self {
            ClusterOutcome::Installed => vec![
                TargetCondition::new(Operational, True),
                TargetCondition::new(Ready, True),
            ],
            ClusterOutcome::Failed { kind, message } if kind.is_cluster_error() => vec![
                TargetCondition::new(Operational, False)
                    .with_reason(kind.as_str(), format!("{}: {}", kind, message)),
                TargetCondition::new(Ready, Unknown),
            ],
            ClusterOutcome::Failed { kind, message } => vec![
                TargetCondition::new(Operational, True),
                TargetCondition::new(Ready, False)
                    .with_reason(kind.as_str(), format!("{}: {}", kind, message)),
            ],
        }
    }
}

/// Status entry for `cluster`, keeping transition times of unchanged conditions
pub fn cluster_status(
    previous: Option<&ClusterInstallationStatus>,
    cluster: &str,
    outcome: &ClusterOutcome,
    now: DateTime<Utc>,
) -> ClusterInstallationStatus {
    let conditions = outcome
        .conditions()
        .into_iter()
        .map(|mut condition| {
            let carried = previous
                .and_then(|p| p.condition(condition.type_))
                .filter(|p| p.status == condition.status)
                .and_then(|p| p.last_transition_time);
            condition.last_transition_time = Some(carried.unwrap_or(now));
            condition
        })
        .collect();

    ClusterInstallationStatus {
        name: cluster.to_string(),
        conditions,
    }
}

/// Reason carried by `Ready` while a transient failure is being retried
pub const RETRYING_REASON: &str = "Retrying";

/// Status entry for `cluster` while a transient failure is retried
///
/// `Ready` leaves `True` right away, but the error itself is not reported
/// yet. `Operational` keeps whatever the previous pass observed.
pub fn retrying_status(
    previous: Option<&ClusterInstallationStatus>,
    cluster: &str,
    now: DateTime<Utc>,
) -> ClusterInstallationStatus {
    let operational = previous
        .and_then(|p| p.condition(TargetConditionType::Operational))
        .cloned()
        .unwrap_or_else(|| {
            let mut unknown =
                TargetCondition::new(TargetConditionType::Operational, ConditionStatus::Unknown);
            unknown.last_transition_time = Some(now);
            unknown
        });

    let mut ready = TargetCondition::new(TargetConditionType::Ready, ConditionStatus::Unknown);
    ready.reason = Some(RETRYING_REASON.to_string());
    ready.last_transition_time = Some(
        previous
            .and_then(|p| p.condition(TargetConditionType::Ready))
            .filter(|p| p.status == ConditionStatus::Unknown)
            .and_then(|p| p.last_transition_time)
            .unwrap_or(now),
    );

    ClusterInstallationStatus {
        name: cluster.to_string(),
        conditions: vec![operational, ready],
    }
}

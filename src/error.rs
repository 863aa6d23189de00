//! Error taxonomy
//!
//! Every failure of the installation pipeline ends up as a [`ShipyardError`].
//! The variant decides whether the reconcile loop requeues the key or writes
//! the failure straight into the target's status.

use std::fmt;

/// Errors raised by the chart fetch contract
#[derive(Debug, thiserror::Error)]
pub enum ChartFetchError {
    #[error("chart {0} not found")]
    NotFound(String),

    #[error("{0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl ChartFetchError {
    pub fn transport<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        ChartFetchError::Transport(err.into())
    }
}

/// Errors raised by a dynamic cluster client
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Kube(#[from] kube::Error),

    #[error("{0}")]
    Rejected(String),

    #[error(transparent)]
    Watch(#[from] kube::runtime::watcher::Error),

    #[error("failed to encode object: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Pipeline errors
#[derive(Debug, thiserror::Error)]
pub enum ShipyardError {
    #[error("failed to fetch chart {chart}: {source}")]
    ChartFetch {
        chart: String,
        #[source]
        source: ChartFetchError,
    },

    #[error("failed to render chart: {0}")]
    RenderManifest(String),

    #[error("{0}")]
    InvalidChart(String),

    #[error("cluster {0:?} is not ready yet")]
    ClusterNotReady(String),

    #[error("cluster {cluster:?} has invalid credentials: {reason}")]
    ClusterCredentialInvalid { cluster: String, reason: String },

    #[error("failed to apply {kind} {name:?} on cluster {cluster:?}: {source}")]
    Apply {
        cluster: String,
        kind: String,
        name: String,
        #[source]
        source: ApiError,
    },
}

/// Stable identifier of an error variant, persisted as a condition reason
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ChartFetch,
    RenderManifest,
    InvalidChart,
    ClusterNotReady,
    ClusterCredentialInvalid,
    Apply,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ChartFetch => "ChartFetchError",
            ErrorKind::RenderManifest => "RenderManifestError",
            ErrorKind::InvalidChart => "InvalidChartError",
            ErrorKind::ClusterNotReady => "ClusterNotReady",
            ErrorKind::ClusterCredentialInvalid => "ClusterCredentialInvalid",
            ErrorKind::Apply => "ApplyError",
        }
    }

    /// Whether retrying without any change to the inputs can succeed
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ErrorKind::RenderManifest | ErrorKind::InvalidChart)
    }

    /// Chart errors go to status right away; retrying an unchanged chart won't fix them
    pub fn is_chart_error(&self) -> bool {
        matches!(
            self,
            ErrorKind::ChartFetch | ErrorKind::RenderManifest | ErrorKind::InvalidChart
        )
    }

    /// Whether the failure means the cluster itself cannot be operated
    pub fn is_cluster_error(&self) -> bool {
        matches!(
            self,
            ErrorKind::ClusterNotReady | ErrorKind::ClusterCredentialInvalid
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ShipyardError {
    pub fn render(err: impl fmt::Display) -> Self {
        ShipyardError::RenderManifest(err.to_string())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ShipyardError::ChartFetch { .. } => ErrorKind::ChartFetch,
            ShipyardError::RenderManifest(_) => ErrorKind::RenderManifest,
            ShipyardError::InvalidChart(_) => ErrorKind::InvalidChart,
            ShipyardError::ClusterNotReady(_) => ErrorKind::ClusterNotReady,
            ShipyardError::ClusterCredentialInvalid { .. } => ErrorKind::ClusterCredentialInvalid,
            ShipyardError::Apply { .. } => ErrorKind::Apply,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    pub fn is_chart_error(&self) -> bool {
        self.kind().is_chart_error()
    }

    pub fn is_cluster_error(&self) -> bool {
        self.kind().is_cluster_error()
    }
}

pub type Result<T, E = ShipyardError> = std::result::Result<T, E>;

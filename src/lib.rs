//! Shipyard Library
//!
//! Installs chart releases on a fleet of Kubernetes clusters and reports on
//! the pods they run. The binary wires these modules together; they are
//! exposed as a library for integration testing.

pub mod capacity;
pub mod chart;
pub mod cli;
pub mod clusterclient;
pub mod config;
pub mod constants;
pub mod controller;
pub mod error;
pub mod events;
pub mod installation;
pub mod kube;
pub mod models;

// Re-export commonly used types for convenience
pub use chart::{ChartFetcher, RenderedManifestSet, fetch_and_render};
pub use clusterclient::{ClusterClients, ClusterCredential, CredentialEvent, Store};
pub use error::{ApiError, ChartFetchError, ErrorKind, ShipyardError};
pub use installation::{InstallReport, Installer};

//! Configuration schema definitions
//!
//! Defines the structure of configuration files using serde for serialization.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::constants::DEFAULT_NAMESPACE;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Config {
    /// Namespace holding cluster credential secrets
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Reconcile workers per controller
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// On-disk chart archive cache
    #[serde(default = "default_chart_cache_dir")]
    pub chart_cache_dir: PathBuf,

    /// Timeout applied to every API and chart repository request
    #[serde(default = "default_rest_timeout_seconds")]
    pub rest_timeout_seconds: u64,

    /// Period of full resyncs and capacity report refreshes
    #[serde(default = "default_resync_seconds")]
    pub resync_seconds: u64,

    /// Controllers to run; empty means all known controllers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enabled_controllers: Vec<String>,

    /// Controllers never to run, applied after `enabledControllers`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disabled_controllers: Vec<String>,

    /// Consecutive transient failures before they are written to status
    #[serde(default = "default_status_after_retries")]
    pub status_after_retries: u32,

    /// Requeue backoff
    #[serde(default)]
    pub backoff: BackoffConfig,
}

/// Exponential requeue backoff
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BackoffConfig {
    /// Delay after the first failure, doubled on every further failure
    #[serde(default = "default_backoff_base_millis")]
    pub base_millis: u64,

    /// Upper bound of the delay
    #[serde(default = "default_backoff_max_seconds")]
    pub max_seconds: u64,
}

impl Config {
    pub fn rest_timeout(&self) -> Duration {
        Duration::from_secs(self.rest_timeout_seconds)
    }

    pub fn resync(&self) -> Duration {
        Duration::from_secs(self.resync_seconds)
    }
}

impl BackoffConfig {
    pub fn base(&self) -> Duration {
        Duration::from_millis(self.base_millis)
    }

    pub fn max(&self) -> Duration {
        Duration::from_secs(self.max_seconds)
    }
}

// Default value functions
fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

fn default_workers() -> usize {
    2
}

fn default_chart_cache_dir() -> PathBuf {
    super::paths::cache_dir().join("charts")
}

fn default_rest_timeout_seconds() -> u64 {
    15
}

fn default_resync_seconds() -> u64 {
    300
}

fn default_status_after_retries() -> u32 {
    5
}

fn default_backoff_base_millis() -> u64 {
    5
}

fn default_backoff_max_seconds() -> u64 {
    1000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            workers: default_workers(),
            chart_cache_dir: default_chart_cache_dir(),
            rest_timeout_seconds: default_rest_timeout_seconds(),
            resync_seconds: default_resync_seconds(),
            enabled_controllers: Vec::new(),
            disabled_controllers: Vec::new(),
            status_after_retries: default_status_after_retries(),
            backoff: BackoffConfig::default(),
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_millis: default_backoff_base_millis(),
            max_seconds: default_backoff_max_seconds(),
        }
    }
}

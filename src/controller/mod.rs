//! Controllers run by `shipyard run`
//!
//! The installation controller runs on [`kube::runtime::Controller`]; the
//! capacity controller follows a watch and a resync timer. They share the
//! cluster client [`Store`](crate::clusterclient::Store).

mod capacity;
mod installation;

pub use capacity::{
    CapacityController, CapacityError, REPORT_KEY, capacity_config_map_name, desired_report,
    write_report,
};
pub use installation::{
    Context, InstallationController, KubeStatusWriter, ReconcileError, StatusWriter,
    compose_status, error_policy, reconcile, target_key, targets_on_cluster,
};

use std::time::Duration;

/// Server-side timeout of management cluster watches
pub(crate) const WATCH_TIMEOUT_SECS: u32 = 25;

/// Watch errors in a row before the retry pause grows
pub(crate) const MAX_CONSECUTIVE_ERRORS: u32 = 5;

/// Delay before retry number `failures` (1-based)
pub fn backoff_delay(base: Duration, max: Duration, failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(31);
    base.saturating_mul(1u32 << exponent).min(max)
}

pub const INSTALLATION: &str = "installation";
pub const CAPACITY: &str = "capacity";

/// Every controller this binary knows how to run
pub const KNOWN_CONTROLLERS: &[&str] = &[INSTALLATION, CAPACITY];

/// Settings shared by all controllers
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub workers: usize,
    pub resync: Duration,
    pub status_after_retries: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// Field manager and user agent for writes on target clusters
    pub user_agent: String,
}

impl ControllerSettings {
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self {
            workers: config.workers.max(1),
            resync: config.resync(),
            status_after_retries: config.status_after_retries,
            backoff_base: config.backoff.base(),
            backoff_max: config.backoff.max(),
            user_agent: format!("shipyard/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Resolve the controllers to start
///
/// An empty `enabled` list means every known controller. Names in
/// `disabled` are removed afterwards. Unknown names in either list fail.
pub fn selected_controllers(
    enabled: &[String],
    disabled: &[String],
) -> anyhow::Result<Vec<&'static str>> {
    for name in enabled.iter().chain(disabled) {
        if !KNOWN_CONTROLLERS.contains(&name.as_str()) {
            return Err(anyhow::anyhow!(
                "unknown controller {:?}, expected one of: {}",
                name,
                KNOWN_CONTROLLERS.join(", ")
            ));
        }
    }

    Ok(KNOWN_CONTROLLERS
        .iter()
        .copied()
        .filter(|known| enabled.is_empty() || enabled.iter().any(|e| e == known))
        .filter(|known| !disabled.iter().any(|d| d == known))
        .collect())
}

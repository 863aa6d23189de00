//! `shipyard run`

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::RunArgs;
use crate::chart::{Catalog, ChartFetcher, HttpChartRepository};
use crate::clusterclient::{ClusterCredential, KubeCredentialSource, Store};
use crate::config::{CliOverrides, ConfigLoader};
use crate::controller::{
    CAPACITY, CapacityController, ControllerSettings, INSTALLATION, InstallationController,
    selected_controllers,
};
use crate::events::{EventRecorder, EventSink, TracingEventSink};
use crate::kube::{KubeDynamicClient, client_for_credential, create_client, dynamic_for_credential};

/// Start the store and the enabled controllers, then wait for a signal
pub async fn run(config_path: Option<&Path>, args: RunArgs) -> Result<()> {
    let overrides = CliOverrides {
        namespace: args.namespace,
        workers: args.workers,
    };
    let config =
        ConfigLoader::load(config_path, &overrides).context("Failed to load configuration")?;
    let controllers =
        selected_controllers(&config.enabled_controllers, &config.disabled_controllers)?;

    let timeout = config.rest_timeout();
    let client = create_client(args.kubeconfig.as_deref(), timeout)
        .await
        .context("Failed to create management cluster client")?;

    let stop = CancellationToken::new();
    spawn_signal_handler(stop.clone());

    let store = Store::new(
        move |credential: ClusterCredential| async move {
            client_for_credential(&credential, timeout).await
        },
        move |credential: ClusterCredential| async move {
            dynamic_for_credential(&credential, timeout).await
        },
    );

    let (mut source, credentials) =
        KubeCredentialSource::spawn(client.clone(), &config.namespace, stop.clone());

    let mut tasks = JoinSet::new();
    tasks.spawn(store.clone().run(credentials, stop.clone()));

    let sink: Arc<dyn EventSink> = Arc::new(TracingEventSink);
    let settings = ControllerSettings::from_config(&config);

    if controllers.contains(&INSTALLATION) {
        crate::config::paths::ensure_dir(&config.chart_cache_dir).with_context(|| {
            format!(
                "Failed to create chart cache {}",
                config.chart_cache_dir.display()
            )
        })?;
        let repository = HttpChartRepository::new(timeout)?;
        let fetcher: Arc<dyn ChartFetcher> =
            Arc::new(Catalog::new(repository, config.chart_cache_dir.clone()));
        let controller = InstallationController::new(
            client.clone(),
            store.clone(),
            fetcher,
            settings.clone(),
            EventRecorder::for_component(Arc::clone(&sink), "installation-controller"),
        );
        tasks.spawn(controller.run(stop.clone()));
    }

    if controllers.contains(&CAPACITY) {
        let controller = CapacityController::new(
            Arc::new(KubeDynamicClient::new(client.clone())),
            store.clone(),
            settings.clone(),
            EventRecorder::for_component(Arc::clone(&sink), "capacity-controller"),
        );
        tasks.spawn(controller.run(stop.clone()));
    }

    tracing::info!(
        namespace = %config.namespace,
        controllers = ?controllers,
        "shipyard started"
    );

    while let Some(result) = tasks.join_next().await {
        if let Err(e) = result {
            tracing::warn!("task failed: {}", e);
        }
    }
    source.stop();

    tracing::info!("shipyard stopped");
    Ok(())
}

/// Cancel `stop` on the first SIGINT/SIGTERM, exit on the second
fn spawn_signal_handler(stop: CancellationToken) {
    tokio::spawn(handle_signals(stop, wait_for_signal));
}

async fn handle_signals<F, Fut>(stop: CancellationToken, wait: F)
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = std::io::Result<()>>,
{
    if let Err(e) = wait().await {
        tracing::warn!("failed to install signal handler, shutdown needs SIGKILL: {}", e);
        return;
    }
    tracing::info!("shutting down, signal again to force exit");
    stop.cancel();

    match wait().await {
        Ok(()) => std::process::exit(130),
        Err(e) => tracing::warn!("failed to install signal handler for forced exit: {}", e),
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_failed_signal_install_keeps_running() {
        let stop = CancellationToken::new();
        let calls = AtomicU32::new(0);
        handle_signals(stop.clone(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(std::io::Error::other("no signal driver")) }
        })
        .await;

        assert!(!stop.is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_first_signal_cancels_stop() {
        let stop = CancellationToken::new();
        let calls = AtomicU32::new(0);
        handle_signals(stop.clone(), || {
            let first = calls.fetch_add(1, Ordering::SeqCst) == 0;
            async move {
                if first {
                    Ok(())
                } else {
                    Err(std::io::Error::other("gone"))
                }
            }
        })
        .await;

        assert!(stop.is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}

//! Kubernetes client module
//!
//! Connects to the management cluster and turns cluster credentials into
//! clients for the fleet members.

mod resource;

pub use resource::{DynamicClient, KubeDynamicClient, ResourceDescriptor, WatchStream};

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use base64::Engine;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};

use crate::clusterclient::{ClusterCredential, DynamicHandle};

/// Client for the management cluster
///
/// Uses `kubeconfig` when given, otherwise the default loading strategy:
/// 1. In-cluster config (if running in a pod)
/// 2. KUBECONFIG environment variable
/// 3. ~/.kube/config
pub async fn create_client(kubeconfig: Option<&Path>, timeout: Duration) -> Result<Client> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path)
                .with_context(|| format!("Failed to read kubeconfig {}", path.display()))?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await?
        }
        None => Config::infer().await?,
    };
    config.read_timeout = Some(timeout);

    tracing::debug!(cluster_url = %config.cluster_url, "connecting to management cluster");
    let client = Client::try_from(config)?;
    Ok(client)
}

/// Build a client for a fleet member from its credential
pub async fn client_for_credential(
    credential: &ClusterCredential,
    timeout: Duration,
) -> Result<Client> {
    let kubeconfig = credential_kubeconfig(credential)?;
    let mut config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .with_context(|| format!("Invalid credential for cluster {}", credential.cluster))?;
    config.read_timeout = Some(timeout);
    Client::try_from(config)
        .with_context(|| format!("Failed to create client for cluster {}", credential.cluster))
}

/// Build the dynamic handle the store hands out
pub async fn dynamic_for_credential(
    credential: &ClusterCredential,
    timeout: Duration,
) -> Result<DynamicHandle> {
    let client = client_for_credential(credential, timeout).await?;
    Ok(Arc::new(KubeDynamicClient::new(client)))
}

fn credential_kubeconfig(credential: &ClusterCredential) -> Result<Kubeconfig> {
    let b64 = base64::engine::general_purpose::STANDARD;
    let mut cluster = serde_json::json!({ "server": credential.endpoint });
    if credential.insecure_skip_verify {
        cluster["insecure-skip-tls-verify"] = true.into();
    } else if let Some(ca) = &credential.ca {
        cluster["certificate-authority-data"] = b64.encode(ca).into();
    }

    let kubeconfig = serde_json::json!({
        "apiVersion": "v1",
        "kind": "Config",
        "clusters": [{ "name": credential.cluster, "cluster": cluster }],
        "users": [{
            "name": credential.cluster,
            "user": {
                "client-certificate-data": b64.encode(&credential.cert),
                "client-key-data": b64.encode(&credential.key),
            }
        }],
        "contexts": [{
            "name": credential.cluster,
            "context": { "cluster": credential.cluster, "user": credential.cluster }
        }],
        "current-context": credential.cluster,
    });
    serde_json::from_value(kubeconfig).context("Failed to assemble kubeconfig")
}

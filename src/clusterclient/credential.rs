//! Cluster credentials
//!
//! A credential is the join of a Secret (TLS material) and the Cluster
//! object of the same name (API endpoint). [`CredentialTable`] holds both
//! halves and turns every change into at most one [`CredentialEvent`].

use std::collections::HashMap;
use std::fmt;

use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use sha2::{Digest, Sha256};

use crate::constants::{
    SECRET_CA_KEY, SECRET_CERT_KEY, SECRET_CHECKSUM_ANNOTATION, SECRET_KEY_KEY,
    SECRET_SKIP_TLS_VERIFY_ANNOTATION, TRUE,
};
use crate::models::Cluster;

/// Everything needed to build clients for one cluster
#[derive(Clone, PartialEq, Eq)]
pub struct ClusterCredential {
    pub cluster: String,
    pub endpoint: String,
    pub ca: Option<Vec<u8>>,
    pub cert: Vec<u8>,
    pub key: Vec<u8>,
    pub insecure_skip_verify: bool,
    pub checksum: String,
}

impl ClusterCredential {
    /// Build a credential, deriving the checksum from its contents
    ///
    /// `annotated` is the checksum the secret was published with; when it is
    /// missing the raw TLS material is hashed instead.
    pub fn new(
        cluster: impl Into<String>,
        endpoint: impl Into<String>,
        ca: Option<Vec<u8>>,
        cert: Vec<u8>,
        key: Vec<u8>,
        insecure_skip_verify: bool,
        annotated: Option<&str>,
    ) -> Self {
        let mut credential = Self {
            cluster: cluster.into(),
            endpoint: endpoint.into(),
            ca,
            cert,
            key,
            insecure_skip_verify,
            checksum: String::new(),
        };
        credential.checksum = credential.compute_checksum(annotated);
        credential
    }

    fn compute_checksum(&self, annotated: Option<&str>) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.endpoint.as_bytes());
        hasher.update([0u8, self.insecure_skip_verify as u8]);
        match annotated {
            Some(sum) => hasher.update(sum.as_bytes()),
            None => {
                for part in [
                    self.ca.as_deref().unwrap_or_default(),
                    self.cert.as_slice(),
                    self.key.as_slice(),
                ] {
                    hasher.update((part.len() as u64).to_be_bytes());
                    hasher.update(part);
                }
            }
        }
        format!("{:x}", hasher.finalize())
    }
}

impl fmt::Debug for ClusterCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterCredential")
            .field("cluster", &self.cluster)
            .field("endpoint", &self.endpoint)
            .field("insecure_skip_verify", &self.insecure_skip_verify)
            .field("checksum", &self.checksum)
            .finish_non_exhaustive()
    }
}

/// Change to the set of known credentials
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialEvent {
    /// Credential created or modified
    Applied(ClusterCredential),
    /// Secret or Cluster removed
    Deleted(String),
    /// Both halves exist but cannot form a usable credential
    Invalid { cluster: String, reason: String },
}

impl CredentialEvent {
    pub fn cluster(&self) -> &str {
        match self {
            CredentialEvent::Applied(c) => &c.cluster,
            CredentialEvent::Deleted(name) => name,
            CredentialEvent::Invalid { cluster, .. } => cluster,
        }
    }
}

/// TLS half of a credential as read from a Secret
#[derive(Debug, Clone)]
struct SecretHalf {
    ca: Option<Vec<u8>>,
    cert: Option<Vec<u8>>,
    key: Option<Vec<u8>>,
    insecure_skip_verify: bool,
    checksum: Option<String>,
}

impl SecretHalf {
    fn from_secret(secret: &Secret) -> Self {
        let data = secret.data.as_ref();
        let field = |key: &str| data.and_then(|d| d.get(key)).map(|b| b.0.clone());
        let annotations = secret.annotations();
        Self {
            ca: field(SECRET_CA_KEY),
            cert: field(SECRET_CERT_KEY),
            key: field(SECRET_KEY_KEY),
            insecure_skip_verify: annotations
                .get(SECRET_SKIP_TLS_VERIFY_ANNOTATION)
                .is_some_and(|v| v == TRUE),
            checksum: annotations.get(SECRET_CHECKSUM_ANNOTATION).cloned(),
        }
    }
}

/// Join table of Secrets and Clusters keyed by cluster name
#[derive(Debug, Default)]
pub struct CredentialTable {
    secrets: HashMap<String, SecretHalf>,
    endpoints: HashMap<String, String>,
}

impl CredentialTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply_secret(&mut self, secret: &Secret) -> Option<CredentialEvent> {
        let name = secret.name_any();
        self.secrets.insert(name.clone(), SecretHalf::from_secret(secret));
        self.resolve(&name)
    }

    pub fn apply_cluster(&mut self, cluster: &Cluster) -> Option<CredentialEvent> {
        let name = cluster.name_any();
        self.endpoints.insert(name.clone(), cluster.spec.api_master.clone());
        self.resolve(&name)
    }

    pub fn delete_secret(&mut self, name: &str) -> Option<CredentialEvent> {
        self.secrets.remove(name)?;
        Some(CredentialEvent::Deleted(name.to_string()))
    }

    pub fn delete_cluster(&mut self, name: &str) -> Option<CredentialEvent> {
        self.endpoints.remove(name)?;
        Some(CredentialEvent::Deleted(name.to_string()))
    }

    /// Current event for a cluster, `None` while one half is missing
    fn resolve(&self, name: &str) -> Option<CredentialEvent> {
        let secret = self.secrets.get(name)?;
        let endpoint = self.endpoints.get(name)?;

        let invalid = |reason: String| CredentialEvent::Invalid {
            cluster: name.to_string(),
            reason,
        };

        if endpoint.is_empty() {
            return Some(invalid("cluster has no API endpoint".to_string()));
        }
        let Some(cert) = secret.cert.clone() else {
            return Some(invalid(format!("secret has no {:?} entry", SECRET_CERT_KEY)));
        };
        let Some(key) = secret.key.clone() else {
            return Some(invalid(format!("secret has no {:?} entry", SECRET_KEY_KEY)));
        };

        Some(CredentialEvent::Applied(ClusterCredential::new(
            name,
            endpoint.clone(),
            secret.ca.clone(),
            cert,
            key,
            secret.insecure_skip_verify,
            secret.checksum.as_deref(),
        )))
    }
}

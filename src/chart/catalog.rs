//! Chart catalog
//!
//! [`ChartFetcher`] is the contract the installer depends on. [`Catalog`]
//! implements it on top of a [`ChartRepository`] transport and an on-disk
//! cache laid out as `<cache>/<sanitised repo url>/<name>-<version>.tgz`.
//! [`LocalChartFetcher`] serves the same layout without any transport.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use semver::{Version, VersionReq};
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::error::ChartFetchError;
use crate::models::ChartReference;

/// Fetch a chart archive by reference
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChartFetcher: Send + Sync {
    async fn fetch(&self, chart: &ChartReference) -> Result<Vec<u8>, ChartFetchError>;
}

/// Remote chart repository transport
#[async_trait]
pub trait ChartRepository: Send + Sync {
    /// Read the repository's `index.yaml`
    async fn index(&self, repo_url: &str) -> Result<RepositoryIndex, ChartFetchError>;

    /// Download one archive; `url` may be relative to `repo_url`
    async fn download(&self, repo_url: &str, url: &str) -> Result<Vec<u8>, ChartFetchError>;
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RepositoryIndex {
    #[serde(default)]
    pub entries: HashMap<String, Vec<ChartVersion>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChartVersion {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub urls: Vec<String>,
    /// Hex SHA-256 of the archive
    #[serde(default)]
    pub digest: Option<String>,
}

impl RepositoryIndex {
    /// Pick the entry matching `version`: the exact string, or the highest
    /// version satisfying a semver constraint
    pub fn resolve(&self, name: &str, version: &str) -> Option<&ChartVersion> {
        let versions = self.entries.get(name)?;
        if let Some(exact) = versions.iter().find(|v| v.version == version) {
            return Some(exact);
        }
        let req = VersionReq::parse(version).ok()?;
        versions
            .iter()
            .filter_map(|v| Version::parse(&v.version).ok().map(|parsed| (parsed, v)))
            .filter(|(parsed, _)| req.matches(parsed))
            .max_by(|(a, _), (b, _)| a.cmp(b))
            .map(|(_, v)| v)
    }
}

/// Cache location of one chart version
pub fn cache_path(cache_dir: &Path, repo_url: &str, name: &str, version: &str) -> PathBuf {
    cache_dir
        .join(sanitize_repo_url(repo_url))
        .join(format!("{}-{}.tgz", name, version))
}

/// Collapse every run of non-alphanumeric characters into `_`
fn sanitize_repo_url(repo_url: &str) -> String {
    let mut out = String::with_capacity(repo_url.len());
    let mut in_run = false;
    for ch in repo_url.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch);
            in_run = false;
        } else if !in_run {
            out.push('_');
            in_run = true;
        }
    }
    out
}

async fn read_cached(path: &Path) -> Result<Option<Vec<u8>>, ChartFetchError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ChartFetchError::transport(e)),
    }
}

/// Fetcher resolving charts through a repository and caching them on disk
pub struct Catalog<R> {
    repository: R,
    cache_dir: PathBuf,
}

impl<R: ChartRepository> Catalog<R> {
    pub fn new(repository: R, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            repository,
            cache_dir: cache_dir.into(),
        }
    }

    async fn store(&self, path: &Path, bytes: &[u8]) -> Result<(), ChartFetchError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(ChartFetchError::transport)?;
        }
        let partial = path.with_extension("tgz.partial");
        tokio::fs::write(&partial, bytes)
            .await
            .map_err(ChartFetchError::transport)?;
        tokio::fs::rename(&partial, path)
            .await
            .map_err(ChartFetchError::transport)
    }
}

#[async_trait]
impl<R: ChartRepository> ChartFetcher for Catalog<R> {
    async fn fetch(&self, chart: &ChartReference) -> Result<Vec<u8>, ChartFetchError> {
        let exact = Version::parse(&chart.version).is_ok();
        if exact {
            let path = cache_path(&self.cache_dir, &chart.repo_url, &chart.name, &chart.version);
            if let Some(bytes) = read_cached(&path).await? {
                tracing::debug!(chart = %chart, "serving chart from cache");
                return Ok(bytes);
            }
        }

        let index = self.repository.index(&chart.repo_url).await?;
        let resolved = index
            .resolve(&chart.name, &chart.version)
            .ok_or_else(|| ChartFetchError::NotFound(chart.to_string()))?;

        let path = cache_path(&self.cache_dir, &chart.repo_url, &resolved.name, &resolved.version);
        if let Some(bytes) = read_cached(&path).await? {
            tracing::debug!(chart = %chart, resolved = %resolved.version, "serving chart from cache");
            return Ok(bytes);
        }

        let url = resolved
            .urls
            .first()
            .ok_or_else(|| ChartFetchError::NotFound(format!("{}@{}", resolved.name, resolved.version)))?;
        let bytes = self.repository.download(&chart.repo_url, url).await?;

        if let Some(expected) = &resolved.digest {
            let actual = format!("{:x}", Sha256::digest(&bytes));
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(ChartFetchError::transport(format!(
                    "digest mismatch for {}@{}: expected {}, got {}",
                    resolved.name, resolved.version, expected, actual
                )));
            }
        }

        self.store(&path, &bytes).await?;
        tracing::info!(chart = %chart, resolved = %resolved.version, "downloaded chart");
        Ok(bytes)
    }
}

/// Fetcher reading only from the cache directory
pub struct LocalChartFetcher {
    cache_dir: PathBuf,
}

impl LocalChartFetcher {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }
}

#[async_trait]
impl ChartFetcher for LocalChartFetcher {
    async fn fetch(&self, chart: &ChartReference) -> Result<Vec<u8>, ChartFetchError> {
        let path = cache_path(&self.cache_dir, &chart.repo_url, &chart.name, &chart.version);
        read_cached(&path)
            .await?
            .ok_or_else(|| ChartFetchError::NotFound(chart.to_string()))
    }
}

/// Chart repository served over HTTP(S)
pub struct HttpChartRepository {
    client: reqwest::Client,
}

impl HttpChartRepository {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;
        Ok(Self { client })
    }

    async fn get(&self, url: url::Url) -> Result<reqwest::Response, ChartFetchError> {
        tracing::debug!("Fetching {}", url);
        let resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(ChartFetchError::transport)?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ChartFetchError::NotFound(url.to_string()));
        }
        resp.error_for_status().map_err(ChartFetchError::transport)
    }
}

/// Resolve `path` against the repository root
fn join_url(repo_url: &str, path: &str) -> Result<url::Url, ChartFetchError> {
    let mut base = url::Url::parse(repo_url).map_err(ChartFetchError::transport)?;
    if !base.path().ends_with('/') {
        let dir = format!("{}/", base.path());
        base.set_path(&dir);
    }
    base.join(path).map_err(ChartFetchError::transport)
}

#[async_trait]
impl ChartRepository for HttpChartRepository {
    async fn index(&self, repo_url: &str) -> Result<RepositoryIndex, ChartFetchError> {
        let resp = self.get(join_url(repo_url, "index.yaml")?).await?;
        let body = resp.text().await.map_err(ChartFetchError::transport)?;
        serde_yaml::from_str(&body).map_err(ChartFetchError::transport)
    }

    async fn download(&self, repo_url: &str, url: &str) -> Result<Vec<u8>, ChartFetchError> {
        let resp = self.get(join_url(repo_url, url)?).await?;
        let bytes = resp.bytes().await.map_err(ChartFetchError::transport)?;
        Ok(bytes.to_vec())
    }
}

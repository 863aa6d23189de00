//! Chart pipeline
//!
//! Turns an InstallationTarget's chart reference and values into a validated
//! set of Kubernetes objects:
//!
//! 1. fetch the archive through a [`ChartFetcher`]
//! 2. load it ([`archive`])
//! 3. render its templates ([`render`])
//! 4. check the result against the traffic-shifting conventions ([`validate`])
//!
//! The pipeline runs on every reconcile pass; nothing is cached here beyond
//! what the fetcher keeps on disk.

pub mod archive;
pub mod catalog;
pub mod render;
pub mod validate;

pub use archive::{Chart, ChartMetadata, Template};
pub use catalog::{
    Catalog, ChartFetcher, ChartRepository, ChartVersion, HttpChartRepository, LocalChartFetcher,
    RepositoryIndex, cache_path,
};
#[cfg(test)]
pub use catalog::MockChartFetcher;
pub use render::{ReleaseContext, merge_values};

use kube::ResourceExt;
use kube::core::DynamicObject;

use crate::error::ShipyardError;
use crate::kube::ResourceDescriptor;
use crate::models::InstallationTarget;

/// Objects rendered from one chart, in the order the templates produced them
#[derive(Debug, Clone, Default)]
pub struct RenderedManifestSet {
    objects: Vec<DynamicObject>,
}

impl RenderedManifestSet {
    pub fn new(objects: Vec<DynamicObject>) -> Self {
        Self { objects }
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DynamicObject> {
        self.objects.iter()
    }

    /// Objects paired with the descriptor used to apply them
    pub fn resources(&self) -> impl Iterator<Item = (ResourceDescriptor, &DynamicObject)> {
        self.objects
            .iter()
            .filter_map(|o| ResourceDescriptor::of(o).map(|rd| (rd, o)))
    }

    /// Objects of one kind
    pub fn of_kind<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a DynamicObject> + 'a {
        self.objects
            .iter()
            .filter(move |o| o.types.as_ref().is_some_and(|t| t.kind == kind))
    }

    pub fn into_inner(self) -> Vec<DynamicObject> {
        self.objects
    }
}

/// Fetch, render and validate the chart of `target`
pub async fn fetch_and_render(
    fetcher: &dyn ChartFetcher,
    target: &InstallationTarget,
) -> Result<RenderedManifestSet, ShipyardError> {
    let reference = &target.spec.chart;
    let bytes = fetcher
        .fetch(reference)
        .await
        .map_err(|source| ShipyardError::ChartFetch {
            chart: reference.to_string(),
            source,
        })?;

    let chart = archive::load(&bytes)?;

    let release = target.name_any();
    let namespace = target.namespace().unwrap_or_default();
    let objects = render::render(
        &chart,
        &ReleaseContext {
            name: &release,
            namespace: &namespace,
            values: target.spec.values.as_ref(),
        },
    )?;

    validate::validate(&objects, &release, target.labels())?;

    Ok(RenderedManifestSet::new(objects))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChartFetchError;
    use crate::models::{ChartReference, InstallationTargetSpec};

    fn target() -> InstallationTarget {
        InstallationTarget::new(
            "reviews-api-abc",
            InstallationTargetSpec {
                clusters: vec!["kind-a".into()],
                chart: ChartReference {
                    name: "reviews-api".into(),
                    version: "0.0.1".into(),
                    repo_url: "https://charts.example.com".into(),
                },
                values: None,
                can_override: false,
            },
        )
    }

    #[tokio::test]
    async fn test_fetch_error_wraps_source() {
        let mut fetcher = MockChartFetcher::new();
        fetcher
            .expect_fetch()
            .times(1)
            .returning(|chart| Err(ChartFetchError::NotFound(chart.to_string())));

        let err = fetch_and_render(&fetcher, &target()).await.unwrap_err();
        assert_eq!(err.kind().as_str(), "ChartFetchError");
        assert!(err.to_string().contains("reviews-api@0.0.1"));
    }

    #[tokio::test]
    async fn test_corrupt_archive_is_render_error() {
        let mut fetcher = MockChartFetcher::new();
        fetcher
            .expect_fetch()
            .returning(|_| Ok(b"\x00\x01 not gzip".to_vec()));

        let err = fetch_and_render(&fetcher, &target()).await.unwrap_err();
        assert!(matches!(err, ShipyardError::RenderManifest(_)));
    }
}

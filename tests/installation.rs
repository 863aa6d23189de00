//! Installing a release on fake clusters

mod support;

use kube::ResourceExt;
use serde_json::json;

use shipyard::chart::LocalChartFetcher;
use shipyard::constants::{MANIFEST_CHECKSUM_ANNOTATION, RELEASE_LABEL};
use shipyard::error::ErrorKind;
use shipyard::installation::ClusterOutcome;
use shipyard::models::InstallationTarget;
use shipyard::{Installer, ShipyardError};
use support::{FakeDynamicClient, FakeFleet, cache_chart, chart_archive, chart_ref, target};

const USER_AGENT: &str = "shipyard-test";

const TEMPLATES: &[(&str, &str)] = &[
    (
        "deployment.yaml",
        "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: {{ .Release.Name }}-web\nspec:\n  replicas: {{ .Values.replicas }}\n",
    ),
    (
        "service.yaml",
        "apiVersion: v1\nkind: Service\nmetadata:\n  name: reviews\n  labels:\n    shipyard-lb: production\nspec:\n  selector:\n    app: reviews\n",
    ),
];

struct Fixture {
    _cache: tempfile::TempDir,
    fetcher: LocalChartFetcher,
}

fn fixture(templates: &[(&str, &str)]) -> Fixture {
    let cache = tempfile::tempdir().unwrap();
    let archive = chart_archive("reviews", "1.0.0", Some("replicas: 2\n"), templates);
    cache_chart(cache.path(), &chart_ref("reviews", "1.0.0"), &archive);
    let fetcher = LocalChartFetcher::new(cache.path());
    Fixture {
        _cache: cache,
        fetcher,
    }
}

fn release(clusters: &[&str]) -> InstallationTarget {
    target(
        "reviews-api-abc",
        "reviews",
        clusters,
        chart_ref("reviews", "1.0.0"),
        &[],
    )
}

#[tokio::test]
async fn test_first_pass_creates_anchor_and_objects() {
    let cluster = FakeDynamicClient::new();
    let fleet = FakeFleet::start(&[("kind-1", cluster.clone())]).await;
    let fx = fixture(TEMPLATES);

    let report = Installer::new(&fleet.store, &fx.fetcher, USER_AGENT)
        .reconcile(&release(&["kind-1"]))
        .await;

    assert!(report.is_installed());
    assert_eq!(report.outcome("kind-1"), Some(&ClusterOutcome::Installed));
    assert_eq!(cluster.creates(), 3);

    let anchor = cluster
        .object("ConfigMap", Some("reviews"), "reviews-api-abc-anchor")
        .unwrap();
    let anchor_uid = anchor.metadata.uid.clone().unwrap();

    let deployment = cluster
        .object("Deployment", Some("reviews"), "reviews-api-abc-web")
        .unwrap();
    assert_eq!(deployment.owner_references()[0].uid, anchor_uid);
    assert_eq!(deployment.labels()[RELEASE_LABEL], "reviews-api-abc");
    assert!(deployment.annotations().contains_key(MANIFEST_CHECKSUM_ANNOTATION));
    assert_eq!(deployment.data["spec"]["replicas"], 2);
}

#[tokio::test]
async fn test_cluster_scoped_kinds_follow_discovery() {
    let cluster = FakeDynamicClient::new();
    cluster.serve_cluster_scoped("ClusterIssuer");
    let fleet = FakeFleet::start(&[("kind-1", cluster.clone())]).await;
    let mut templates = TEMPLATES.to_vec();
    templates.push((
        "issuer.yaml",
        "apiVersion: cert-manager.io/v1\nkind: ClusterIssuer\nmetadata:\n  name: {{ .Release.Name }}-issuer\nspec:\n  selfSigned: {}\n",
    ));
    let fx = fixture(&templates);

    let report = Installer::new(&fleet.store, &fx.fetcher, USER_AGENT)
        .reconcile(&release(&["kind-1"]))
        .await;

    assert!(report.is_installed());
    assert!(cluster.object("ClusterIssuer", Some("reviews"), "reviews-api-abc-issuer").is_none());
    let issuer = cluster
        .object("ClusterIssuer", None, "reviews-api-abc-issuer")
        .unwrap();
    assert!(issuer.metadata.namespace.is_none());
    assert!(issuer.owner_references().is_empty());
    assert_eq!(issuer.labels()[RELEASE_LABEL], "reviews-api-abc");

    let deployment = cluster
        .object("Deployment", Some("reviews"), "reviews-api-abc-web")
        .unwrap();
    assert_eq!(deployment.owner_references().len(), 1);
}

#[tokio::test]
async fn test_second_pass_only_reads() {
    let cluster = FakeDynamicClient::new();
    let fleet = FakeFleet::start(&[("kind-1", cluster.clone())]).await;
    let fx = fixture(TEMPLATES);
    let installer = Installer::new(&fleet.store, &fx.fetcher, USER_AGENT);
    let target = release(&["kind-1"]);

    installer.reconcile(&target).await;
    cluster.clear_calls();

    let report = installer.reconcile(&target).await;
    assert!(report.is_installed());
    assert_eq!(cluster.creates(), 0);
    assert_eq!(cluster.updates(), 0);
    assert_eq!(cluster.gets(), 3);
}

#[tokio::test]
async fn test_changed_values_update_objects() {
    let cluster = FakeDynamicClient::new();
    let fleet = FakeFleet::start(&[("kind-1", cluster.clone())]).await;
    let fx = fixture(TEMPLATES);
    let installer = Installer::new(&fleet.store, &fx.fetcher, USER_AGENT);

    let mut target = release(&["kind-1"]);
    installer.reconcile(&target).await;
    cluster.clear_calls();

    target.spec.values = Some(json!({ "replicas": 5 }));
    let report = installer.reconcile(&target).await;

    assert!(report.is_installed());
    assert_eq!(cluster.updates(), 1);
    let deployment = cluster
        .object("Deployment", Some("reviews"), "reviews-api-abc-web")
        .unwrap();
    assert_eq!(deployment.data["spec"]["replicas"], 5);
    assert_eq!(deployment.metadata.resource_version.as_deref(), Some("2"));
}

#[tokio::test]
async fn test_unknown_cluster_is_not_ready() {
    let cluster = FakeDynamicClient::new();
    let fleet = FakeFleet::start(&[("kind-1", cluster.clone())]).await;
    let fx = fixture(TEMPLATES);

    let report = Installer::new(&fleet.store, &fx.fetcher, USER_AGENT)
        .reconcile(&release(&["kind-1", "kind-2"]))
        .await;

    assert_eq!(report.outcome("kind-1"), Some(&ClusterOutcome::Installed));
    let missing = report.outcome("kind-2").unwrap();
    assert_eq!(missing.kind(), Some(ErrorKind::ClusterNotReady));
    assert!(report.needs_retry());

    let conditions = missing.conditions();
    assert_eq!(conditions[0].reason.as_deref(), Some("ClusterNotReady"));
}

#[tokio::test]
async fn test_invalid_chart_fails_every_cluster_without_writes() {
    let east = FakeDynamicClient::new();
    let west = FakeDynamicClient::new();
    let fleet = FakeFleet::start(&[("east", east.clone()), ("west", west.clone())]).await;
    let fx = fixture(&TEMPLATES[..1]);

    let report = Installer::new(&fleet.store, &fx.fetcher, USER_AGENT)
        .reconcile(&release(&["east", "west"]))
        .await;

    for cluster in ["east", "west"] {
        assert_eq!(
            report.outcome(cluster).unwrap().kind(),
            Some(ErrorKind::InvalidChart)
        );
    }
    assert!(!report.needs_retry());
    assert!(east.calls().is_empty());
    assert!(west.calls().is_empty());
}

#[tokio::test]
async fn test_objects_of_another_release_are_not_taken_over() {
    let cluster = FakeDynamicClient::new();
    cluster.insert(
        serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": {
                "name": "reviews",
                "namespace": "reviews",
                "uid": "uid-other",
                "resourceVersion": "7",
                "labels": {"shipyard-release": "reviews-api-old", "shipyard-lb": "production"}
            },
            "spec": {"selector": {"app": "reviews"}}
        }))
        .unwrap(),
    );
    let fleet = FakeFleet::start(&[("kind-1", cluster.clone())]).await;
    let fx = fixture(TEMPLATES);
    let installer = Installer::new(&fleet.store, &fx.fetcher, USER_AGENT);

    let mut target = release(&["kind-1"]);
    let report = installer.reconcile(&target).await;
    let outcome = report.outcome("kind-1").unwrap();
    assert_eq!(outcome.kind(), Some(ErrorKind::Apply));
    assert_eq!(cluster.updates(), 0);

    target.spec.can_override = true;
    let report = installer.reconcile(&target).await;
    assert!(report.is_installed());
    let service = cluster.object("Service", Some("reviews"), "reviews").unwrap();
    assert_eq!(service.labels()[RELEASE_LABEL], "reviews-api-abc");
    assert_eq!(service.metadata.uid.as_deref(), Some("uid-other"));
}

#[tokio::test]
async fn test_install_error_names_cluster_and_object() {
    let cluster = FakeDynamicClient::new();
    cluster.insert(
        serde_json::from_value(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {
                "name": "reviews-api-abc-web",
                "namespace": "reviews",
                "labels": {"shipyard-release": "someone-else"}
            }
        }))
        .unwrap(),
    );
    let fleet = FakeFleet::start(&[("kind-1", cluster.clone())]).await;
    let fx = fixture(TEMPLATES);

    let clients = fleet.store.get_client("kind-1", USER_AGENT).await.unwrap();
    let target = release(&["kind-1"]);
    let manifests = shipyard::fetch_and_render(&fx.fetcher, &target).await.unwrap();
    let err = shipyard::installation::install(&clients, &target, &manifests)
        .await
        .unwrap_err();

    match err {
        ShipyardError::Apply { cluster, kind, name, .. } => {
            assert_eq!(cluster, "kind-1");
            assert_eq!(kind, "Deployment");
            assert_eq!(name, "reviews-api-abc-web");
        }
        other => panic!("unexpected error {:?}", other),
    }
}

//! Constants used throughout the crate
//!
//! Label keys, annotation keys and defaults shared between the client store,
//! the chart pipeline and the controllers live here so they are spelled once.

/// API group of the shipyard custom resources
pub const API_GROUP: &str = "shipyard.io";

/// API version of the shipyard custom resources
pub const API_VERSION: &str = "v1alpha1";

/// Label identifying the Service that receives shifted traffic
pub const LB_LABEL: &str = "shipyard-lb";

/// Value carried by the traffic-routing label on production Services
pub const LB_FOR_PRODUCTION: &str = "production";

/// Release label enabling the helm compatibility workaround
pub const HELM_WORKAROUND_LABEL: &str = "shipyard-helm-workaround";

/// Release label opting a legacy chart out of structural validation
pub const LEGACY_CHART_LABEL: &str = "shipyard-legacy-chart";

/// Application label stamped on every release object
pub const APP_LABEL: &str = "shipyard-app";

/// Release label stamped on every release object
pub const RELEASE_LABEL: &str = "shipyard-release";

/// Selector key that Helm charts use to pin a Service to one release
pub const HELM_RELEASE_LABEL: &str = "release";

/// Canonical truthy label value
pub const TRUE: &str = "true";

/// Annotation carrying the checksum of the cluster credential payload
pub const SECRET_CHECKSUM_ANNOTATION: &str = "shipyard.io/cluster-secret-checksum";

/// Annotation disabling TLS verification for a cluster
pub const SECRET_SKIP_TLS_VERIFY_ANNOTATION: &str = "shipyard.io/cluster-skip-tls-verify";

/// Annotation carrying the checksum of an applied manifest
pub const MANIFEST_CHECKSUM_ANNOTATION: &str = "shipyard.io/manifest-checksum";

/// Secret data keys holding TLS material
pub const SECRET_CA_KEY: &str = "tls.ca";
pub const SECRET_CERT_KEY: &str = "tls.crt";
pub const SECRET_KEY_KEY: &str = "tls.key";

/// Suffix of the anchor ConfigMap owning every installed object
pub const ANCHOR_SUFFIX: &str = "-anchor";

/// Default namespace for shipyard's own resources
pub const DEFAULT_NAMESPACE: &str = "shipyard-system";

/// Service name reported to templates as `Release.Service`
pub const RELEASE_SERVICE: &str = "shipyard";

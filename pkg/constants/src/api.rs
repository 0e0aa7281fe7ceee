//! Remote API constants (Rancher management API and per-cluster Kubernetes API).

/// Default per-request timeout against either API, in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

// ─── Rancher v3 management API ────────────────────────────────────────────

/// Project collection; filtered with `?clusterId=<id>`.
pub const RANCHER_PROJECTS_PATH: &str = "/v3/projects";

/// Cluster collection; kubeconfigs come from `<path>/<id>?action=generateKubeconfig`.
pub const RANCHER_CLUSTERS_PATH: &str = "/v3/clusters";

/// Action name that returns a token-auth kubeconfig for a cluster.
pub const GENERATE_KUBECONFIG_ACTION: &str = "generateKubeconfig";

// ─── Kubernetes API ───────────────────────────────────────────────────────

/// Namespace collection on a downstream cluster.
pub const K8S_NAMESPACES_PATH: &str = "/api/v1/namespaces";

/// Namespace annotation carrying the owning project, as `<cluster>:<project>`.
pub const PROJECT_ID_ANNOTATION: &str = "field.cattle.io/projectId";

/// Namespace annotation carrying the namespace quota as a JSON document.
pub const RESOURCE_QUOTA_ANNOTATION: &str = "field.cattle.io/resourceQuota";

/// Content type for namespace annotation patches.
pub const STRATEGIC_MERGE_PATCH: &str = "application/strategic-merge-patch+json";

/// Longest namespace name the Kubernetes API accepts (one DNS-1123 label).
pub const MAX_NAMESPACE_NAME_LEN: usize = 63;

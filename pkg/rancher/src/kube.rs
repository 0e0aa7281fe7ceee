//! Per-cluster Kubernetes access derived from a Rancher-issued kubeconfig.

use pkg_constants::api::{PROJECT_ID_ANNOTATION, RESOURCE_QUOTA_ANNOTATION};
use pkg_reconcile::gateway::GatewayError;
use pkg_types::quota::QuotaSpec;
use pkg_types::secret::Secret;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::wire;

#[derive(Debug, Deserialize)]
struct Kubeconfig {
    #[serde(rename = "current-context")]
    current_context: Option<String>,
    #[serde(default)]
    clusters: Vec<Named<KubeCluster>>,
    #[serde(default)]
    users: Vec<Named<KubeUser>>,
    #[serde(default)]
    contexts: Vec<Named<KubeContext>>,
}

#[derive(Debug, Deserialize)]
struct Named<T> {
    name: String,
    #[serde(alias = "cluster", alias = "user", alias = "context")]
    inner: T,
}

#[derive(Debug, Deserialize)]
struct KubeCluster {
    server: Option<String>,
    #[serde(rename = "insecure-skip-tls-verify", default)]
    insecure_skip_tls_verify: bool,
}

#[derive(Debug, Deserialize)]
struct KubeUser {
    token: Option<Secret>,
}

#[derive(Debug, Deserialize)]
struct KubeContext {
    cluster: String,
    user: String,
}

/// Where and how to reach one downstream cluster's API.
#[derive(Debug, Clone)]
pub struct KubeEndpoint {
    pub server: String,
    pub token: Secret,
    pub insecure_skip_tls_verify: bool,
}

/// Resolve the current context of a kubeconfig to a server and token.
///
/// Only token auth is supported; client-certificate users are rejected.
pub fn parse_kubeconfig(raw: &str) -> Result<KubeEndpoint, GatewayError> {
    let bad = |msg: &str| GatewayError::Decode(format!("kubeconfig: {}", msg));
    let config: Kubeconfig =
        serde_yaml::from_str(raw).map_err(|e| bad(&format!("invalid yaml: {}", e)))?;

    let current = config
        .current_context
        .as_deref()
        .ok_or_else(|| bad("no current-context"))?;
    let ctx = config
        .contexts
        .iter()
        .find(|c| c.name == current)
        .map(|c| &c.inner)
        .ok_or_else(|| bad("current-context not defined"))?;
    let cluster = config
        .clusters
        .iter()
        .find(|c| c.name == ctx.cluster)
        .map(|c| &c.inner)
        .ok_or_else(|| bad("context cluster not defined"))?;
    let user = config
        .users
        .iter()
        .find(|u| u.name == ctx.user)
        .map(|u| &u.inner)
        .ok_or_else(|| bad("context user not defined"))?;

    let server = cluster
        .server
        .clone()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| bad("cluster has no server"))?;
    let token = user
        .token
        .clone()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| bad("user has no token; only token auth is supported"))?;

    Ok(KubeEndpoint {
        server: server.trim_end_matches('/').to_string(),
        token,
        insecure_skip_tls_verify: cluster.insecure_skip_tls_verify,
    })
}

pub fn annotation<'a>(namespace: &'a Value, key: &str) -> Option<&'a str> {
    namespace
        .get("metadata")?
        .get("annotations")?
        .get(key)?
        .as_str()
}

pub fn namespace_name(namespace: &Value) -> Option<&str> {
    namespace.pointer("/metadata/name").and_then(Value::as_str)
}

pub fn belongs_to(namespace: &Value, project_id: &str) -> bool {
    annotation(namespace, PROJECT_ID_ANNOTATION) == Some(project_id)
}

/// Current quota document of a namespace. A missing or malformed
/// annotation reads as an empty document.
pub fn quota_document(namespace: &Value) -> Value {
    let Some(raw) = annotation(namespace, RESOURCE_QUOTA_ANNOTATION) else {
        return Value::Null;
    };
    match serde_json::from_str::<Value>(raw) {
        Ok(doc) if doc.is_object() => doc,
        Ok(_) | Err(_) => {
            debug!(
                "Kube: ignoring malformed quota annotation on {}",
                namespace_name(namespace).unwrap_or("?")
            );
            Value::Null
        }
    }
}

pub fn namespace_quota(namespace: &Value) -> Result<QuotaSpec, GatewayError> {
    let doc = quota_document(namespace);
    if doc.is_null() {
        return Ok(QuotaSpec::default());
    }
    wire::quota_from_document(&doc)
}

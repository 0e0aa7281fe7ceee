use async_trait::async_trait;
use pkg_constants::api::{
    DEFAULT_REQUEST_TIMEOUT_SECS, GENERATE_KUBECONFIG_ACTION, K8S_NAMESPACES_PATH,
    RANCHER_CLUSTERS_PATH, RANCHER_PROJECTS_PATH, RESOURCE_QUOTA_ANNOTATION,
    STRATEGIC_MERGE_PATCH,
};
use pkg_reconcile::gateway::{GatewayError, QuotaGateway};
use pkg_types::config::InstanceConfig;
use pkg_types::quota::QuotaSpec;
use pkg_types::resource::{ClusterRef, ResourceRef};
use pkg_types::secret::Secret;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::kube::{self, KubeEndpoint};
use crate::wire;

/// Longest slice of a response body carried into an error message.
const MAX_ERROR_BODY: usize = 200;

/// Connection settings for one Rancher instance.
#[derive(Debug, Clone)]
pub struct RancherOptions {
    pub insecure_skip_tls_verify: bool,
    pub timeout: Duration,
}

impl RancherOptions {
    pub fn from_config(config: &InstanceConfig, force_insecure: bool) -> Self {
        Self {
            insecure_skip_tls_verify: config.insecure_skip_tls_verify || force_insecure,
            timeout: Duration::from_secs(
                config.timeout_secs.unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
            ),
        }
    }
}

/// A downstream cluster API reachable through a cached kubeconfig.
#[derive(Debug)]
struct KubeClient {
    endpoint: KubeEndpoint,
    http: reqwest::Client,
}

/// [`QuotaGateway`] over the Rancher v3 management API.
///
/// Project quotas live on the project object; namespace quotas live in a
/// namespace annotation on the downstream cluster, reached with a
/// kubeconfig generated once per cluster.
pub struct RancherClient {
    base_url: String,
    token: Secret,
    options: RancherOptions,
    http: reqwest::Client,
    kube: Mutex<HashMap<String, Arc<KubeClient>>>,
}

fn build_http(options: &RancherOptions, insecure: bool) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(options.timeout)
        .danger_accept_invalid_certs(insecure)
        .build()
}

impl RancherClient {
    pub fn new(base_url: &str, token: Secret, options: RancherOptions) -> reqwest::Result<Self> {
        let http = build_http(&options, options.insecure_skip_tls_verify)?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            options,
            http,
            kube: Mutex::new(HashMap::new()),
        })
    }

    pub fn from_config(config: &InstanceConfig, force_insecure: bool) -> reqwest::Result<Self> {
        Self::new(
            &config.url,
            config.token.clone(),
            RancherOptions::from_config(config, force_insecure),
        )
    }

    /// Replace any credential that leaked into `msg`.
    fn redact(&self, msg: &str, extra: Option<&Secret>) -> String {
        let mut out = msg.to_string();
        for secret in std::iter::once(&self.token).chain(extra) {
            if !secret.is_empty() {
                out = out.replace(secret.expose(), "***");
            }
        }
        out
    }

    /// Send a request and decode a JSON body, mapping failures onto the
    /// gateway taxonomy.
    async fn send(
        &self,
        req: RequestBuilder,
        token: &Secret,
        what: &str,
    ) -> Result<Value, GatewayError> {
        let resp = req
            .bearer_auth(token.expose())
            .send()
            .await
            .map_err(|e| {
                let kind = if e.is_timeout() { "timed out" } else { "request failed" };
                GatewayError::ServerError(self.redact(&format!("{} {}: {}", what, kind, e), Some(token)))
            })?;

        let status = resp.status();
        if status.is_success() {
            return resp.json::<Value>().await.map_err(|e| {
                GatewayError::Decode(self.redact(&format!("{}: {}", what, e), Some(token)))
            });
        }

        let body = resp.text().await.unwrap_or_default();
        let body: String = body.chars().take(MAX_ERROR_BODY).collect();
        let message = self.redact(&format!("{} returned {}: {}", what, status, body.trim()), Some(token));
        Err(classify(status, message))
    }

    async fn rancher(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value, GatewayError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("Rancher: {} {}", method, url);
        let mut req = self.http.request(method.clone(), &url);
        if let Some(body) = body {
            req = req.json(body);
        }
        self.send(req, &self.token, &format!("{} {}", method, path)).await
    }

    /// Kubernetes client for a cluster, generating its kubeconfig on first use.
    ///
    /// The cache lock is not held while the kubeconfig is fetched; when two
    /// callers race for the same cluster the first insert wins.
    async fn kube(&self, cluster_id: &str) -> Result<Arc<KubeClient>, GatewayError> {
        if let Some(client) = self.kube.lock().await.get(cluster_id) {
            return Ok(client.clone());
        }

        let path = format!(
            "{}/{}?action={}",
            RANCHER_CLUSTERS_PATH, cluster_id, GENERATE_KUBECONFIG_ACTION
        );
        let resp = self.rancher(Method::POST, &path, Some(&json!({}))).await?;
        let raw = resp
            .get("config")
            .and_then(Value::as_str)
            .ok_or_else(|| GatewayError::Decode(format!("no kubeconfig returned for cluster {}", cluster_id)))?;
        let endpoint = kube::parse_kubeconfig(raw)?;

        let insecure = self.options.insecure_skip_tls_verify || endpoint.insecure_skip_tls_verify;
        let http = if insecure == self.options.insecure_skip_tls_verify {
            self.http.clone()
        } else {
            build_http(&self.options, insecure)
                .map_err(|e| GatewayError::ServerError(format!("kube client for {}: {}", cluster_id, e)))?
        };
        info!("Rancher: kubeconfig ready for cluster {} ({})", cluster_id, endpoint.server);

        let client = Arc::new(KubeClient { endpoint, http });
        let mut cache = self.kube.lock().await;
        Ok(cache
            .entry(cluster_id.to_string())
            .or_insert(client)
            .clone())
    }

    async fn get_namespace(&self, kube: &KubeClient, name: &str) -> Result<Value, GatewayError> {
        let path = format!("{}/{}", K8S_NAMESPACES_PATH, name);
        let req = kube
            .http
            .get(format!("{}{}", kube.endpoint.server, path));
        self.send(req, &kube.endpoint.token, &format!("GET {}", path)).await
    }
}

/// Map a non-success status onto the gateway taxonomy.
pub fn classify(status: StatusCode, message: String) -> GatewayError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => GatewayError::Unauthorized(message),
        StatusCode::NOT_FOUND => GatewayError::NotFound(message),
        StatusCode::CONFLICT => GatewayError::Conflict(message),
        StatusCode::TOO_MANY_REQUESTS => GatewayError::RateLimited(message),
        s if s.is_server_error() => GatewayError::ServerError(message),
        s => GatewayError::Rejected {
            status: s.as_u16(),
            message,
        },
    }
}

#[async_trait]
impl QuotaGateway for RancherClient {
    async fn list_projects(&self, cluster: &ClusterRef) -> Result<Vec<ResourceRef>, GatewayError> {
        let path = format!("{}?clusterId={}", RANCHER_PROJECTS_PATH, cluster.cluster_id);
        let resp = self.rancher(Method::GET, &path, None).await?;
        let data = resp
            .get("data")
            .and_then(Value::as_array)
            .ok_or_else(|| GatewayError::Decode(format!("GET {}: missing data array", path)))?;
        data.iter().map(|p| wire::project_ref(cluster, p)).collect()
    }

    async fn get_project_quota(&self, project: &ResourceRef) -> Result<QuotaSpec, GatewayError> {
        let path = format!("{}/{}", RANCHER_PROJECTS_PATH, project.id);
        let resp = self.rancher(Method::GET, &path, None).await?;
        wire::project_quota(&resp)
    }

    async fn list_namespaces(&self, project: &ResourceRef) -> Result<Vec<ResourceRef>, GatewayError> {
        let kube = self.kube(&project.cluster_id).await?;
        let req = kube
            .http
            .get(format!("{}{}", kube.endpoint.server, K8S_NAMESPACES_PATH));
        let resp = self
            .send(req, &kube.endpoint.token, &format!("GET {}", K8S_NAMESPACES_PATH))
            .await?;
        let items = resp
            .get("items")
            .and_then(Value::as_array)
            .ok_or_else(|| GatewayError::Decode("namespace list without items".to_string()))?;

        Ok(items
            .iter()
            .filter(|ns| kube::belongs_to(ns, &project.id))
            .filter_map(kube::namespace_name)
            .map(|name| {
                ResourceRef::namespace(project, format!("{}:{}", project.cluster_id, name), name)
            })
            .collect())
    }

    async fn get_namespace_quota(&self, namespace: &ResourceRef) -> Result<QuotaSpec, GatewayError> {
        let kube = self.kube(&namespace.cluster_id).await?;
        let ns = self.get_namespace(&kube, &namespace.name).await?;
        kube::namespace_quota(&ns)
    }

    async fn update_project_quota(
        &self,
        project: &ResourceRef,
        partial: &QuotaSpec,
    ) -> Result<(), GatewayError> {
        let path = format!("{}/{}", RANCHER_PROJECTS_PATH, project.id);
        let mut current = self.rancher(Method::GET, &path, None).await?;
        let Some(obj) = current.as_object_mut() else {
            return Err(GatewayError::Decode(format!("GET {}: not an object", path)));
        };
        let doc = obj.entry("resourceQuota").or_insert(Value::Null);
        wire::merge_quota(doc, partial);
        self.rancher(Method::PUT, &path, Some(&current)).await?;
        Ok(())
    }

    async fn update_namespace_quota(
        &self,
        namespace: &ResourceRef,
        partial: &QuotaSpec,
    ) -> Result<(), GatewayError> {
        let kube = self.kube(&namespace.cluster_id).await?;
        let ns = self.get_namespace(&kube, &namespace.name).await?;
        let mut doc = kube::quota_document(&ns);
        wire::merge_quota(&mut doc, partial);

        let mut annotations = Map::new();
        annotations.insert(
            RESOURCE_QUOTA_ANNOTATION.to_string(),
            Value::String(doc.to_string()),
        );
        let patch = json!({ "metadata": { "annotations": annotations } });
        let path = format!("{}/{}", K8S_NAMESPACES_PATH, namespace.name);
        let req = kube
            .http
            .patch(format!("{}{}", kube.endpoint.server, path))
            .header(reqwest::header::CONTENT_TYPE, STRATEGIC_MERGE_PATCH)
            .body(patch.to_string());
        self.send(req, &kube.endpoint.token, &format!("PATCH {}", path))
            .await?;
        Ok(())
    }
}

//! The narrow read/write surface the engine needs from a control plane.

use async_trait::async_trait;
use pkg_types::quota::QuotaSpec;
use pkg_types::resource::{ClusterRef, ResourceRef};

/// Typed failure of a single gateway call.
///
/// Messages never carry credentials.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// Authentication or authorization failure (401/403).
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    /// 5xx responses, timeouts and connection failures.
    #[error("server error: {0}")]
    ServerError(String),
    /// Any other client error; never retried.
    #[error("rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },
    /// The response could not be understood.
    #[error("unexpected response: {0}")]
    Decode(String),
}

/// How the retry policy treats a gateway error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Retried once.
    Conflict,
    /// Retried with exponential backoff.
    Transient,
    Never,
}

impl GatewayError {
    pub fn retry_class(&self) -> RetryClass {
        match self {
            GatewayError::Conflict(_) => RetryClass::Conflict,
            GatewayError::RateLimited(_) | GatewayError::ServerError(_) => RetryClass::Transient,
            GatewayError::Unauthorized(_)
            | GatewayError::NotFound(_)
            | GatewayError::Rejected { .. }
            | GatewayError::Decode(_) => RetryClass::Never,
        }
    }
}

/// Project and namespace quota access on one control-plane instance.
///
/// Every call is one network operation bounded by the implementation's
/// request timeout. Writes take a partial spec: fields left `None` must not
/// be touched on the remote resource.
#[async_trait]
pub trait QuotaGateway: Send + Sync {
    async fn list_projects(&self, cluster: &ClusterRef) -> Result<Vec<ResourceRef>, GatewayError>;

    async fn get_project_quota(&self, project: &ResourceRef) -> Result<QuotaSpec, GatewayError>;

    async fn list_namespaces(&self, project: &ResourceRef) -> Result<Vec<ResourceRef>, GatewayError>;

    async fn get_namespace_quota(&self, namespace: &ResourceRef)
    -> Result<QuotaSpec, GatewayError>;

    async fn update_project_quota(
        &self,
        project: &ResourceRef,
        partial: &QuotaSpec,
    ) -> Result<(), GatewayError>;

    async fn update_namespace_quota(
        &self,
        namespace: &ResourceRef,
        partial: &QuotaSpec,
    ) -> Result<(), GatewayError>;
}

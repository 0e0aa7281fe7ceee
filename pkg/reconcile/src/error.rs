use pkg_types::quota::QuotaError;
use pkg_types::resource::{ResourceKind, ResourceRef};
use serde::{Serialize, Serializer};

use crate::gateway::GatewayError;

/// Engine error taxonomy.
///
/// Used both as the reason a run aborted and as the detail recorded on a
/// failed or skipped item. Every variant carries enough identity
/// (instance/cluster/project/namespace) to be reported on its own.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReconcileError {
    #[error(transparent)]
    InvalidQuotaFormat(#[from] QuotaError),

    #[error("cluster '{cluster_id}' not found on instance '{instance}'")]
    ClusterNotFound { instance: String, cluster_id: String },

    #[error("project '{project}' not found in cluster '{cluster_id}' on instance '{instance}'")]
    ProjectNotFound {
        instance: String,
        cluster_id: String,
        project: String,
    },

    #[error(
        "namespace '{namespace}' not found in project '{project}' (cluster '{cluster_id}', instance '{instance}')"
    )]
    NamespaceNotFound {
        instance: String,
        cluster_id: String,
        project: String,
        namespace: String,
    },

    #[error("{kind} name '{name}' is ambiguous in {scope}: {matches} resources share it")]
    AmbiguousName {
        kind: ResourceKind,
        name: String,
        scope: String,
        matches: usize,
    },

    #[error("unauthorized on instance '{instance}': {detail}")]
    Unauthorized { instance: String, detail: String },

    #[error("conflict persisted on {resource}: {detail}")]
    Conflict { resource: String, detail: String },

    #[error("rate limited on {resource}: {detail}")]
    RateLimited { resource: String, detail: String },

    #[error("server error on {resource}: {detail}")]
    ServerError { resource: String, detail: String },

    #[error("write to {resource} rejected: {detail}")]
    Rejected { resource: String, detail: String },

    #[error("failed to read {what}: {source}")]
    Read { what: String, source: GatewayError },

    #[error("selection matches nothing: {0}")]
    Selection(String),

    #[error("run cancelled")]
    Cancelled,
}

impl ReconcileError {
    /// Map a failed write on `resource` into the engine taxonomy.
    pub fn from_write(err: GatewayError, resource: &ResourceRef) -> Self {
        let label = resource.to_string();
        match err {
            GatewayError::Unauthorized(detail) => ReconcileError::Unauthorized {
                instance: resource.instance.clone(),
                detail,
            },
            GatewayError::NotFound(_) => match resource.kind {
                ResourceKind::Project => ReconcileError::ProjectNotFound {
                    instance: resource.instance.clone(),
                    cluster_id: resource.cluster_id.clone(),
                    project: resource.name.clone(),
                },
                ResourceKind::Namespace => ReconcileError::NamespaceNotFound {
                    instance: resource.instance.clone(),
                    cluster_id: resource.cluster_id.clone(),
                    project: resource.project_label().to_string(),
                    namespace: resource.name.clone(),
                },
            },
            GatewayError::Conflict(detail) => ReconcileError::Conflict {
                resource: label,
                detail,
            },
            GatewayError::RateLimited(detail) => ReconcileError::RateLimited {
                resource: label,
                detail,
            },
            GatewayError::ServerError(detail) => ReconcileError::ServerError {
                resource: label,
                detail,
            },
            GatewayError::Rejected { status, message } => ReconcileError::Rejected {
                resource: label,
                detail: format!("status {}: {}", status, message),
            },
            GatewayError::Decode(detail) => ReconcileError::Rejected {
                resource: label,
                detail,
            },
        }
    }

    /// Map a failed read into the engine taxonomy. Credential problems stay
    /// `Unauthorized` so they always abort the run.
    pub fn from_read(err: GatewayError, instance: &str, what: impl Into<String>) -> Self {
        match err {
            GatewayError::Unauthorized(detail) => ReconcileError::Unauthorized {
                instance: instance.to_string(),
                detail,
            },
            source => ReconcileError::Read {
                what: what.into(),
                source,
            },
        }
    }

    /// Short machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            ReconcileError::InvalidQuotaFormat(_) => "InvalidQuotaFormat",
            ReconcileError::ClusterNotFound { .. } => "ClusterNotFound",
            ReconcileError::ProjectNotFound { .. } => "ProjectNotFound",
            ReconcileError::NamespaceNotFound { .. } => "NamespaceNotFound",
            ReconcileError::AmbiguousName { .. } => "AmbiguousName",
            ReconcileError::Unauthorized { .. } => "Unauthorized",
            ReconcileError::Conflict { .. } => "Conflict",
            ReconcileError::RateLimited { .. } => "RateLimited",
            ReconcileError::ServerError { .. } => "ServerError",
            ReconcileError::Rejected { .. } => "Rejected",
            ReconcileError::Read { .. } => "Read",
            ReconcileError::Selection(_) => "Selection",
            ReconcileError::Cancelled => "Cancelled",
        }
    }

    /// Errors that abort the whole run whatever the error policy says.
    pub fn is_always_fatal(&self) -> bool {
        matches!(
            self,
            ReconcileError::Unauthorized { .. }
                | ReconcileError::AmbiguousName { .. }
                | ReconcileError::InvalidQuotaFormat(_)
                | ReconcileError::Selection(_)
                | ReconcileError::Cancelled
        )
    }

    /// A skip that does not degrade the run's exit status.
    pub fn is_benign_skip(&self) -> bool {
        matches!(self, ReconcileError::NamespaceNotFound { .. })
    }
}

impl Serialize for ReconcileError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("ReconcileError", 2)?;
        s.serialize_field("kind", self.kind())?;
        s.serialize_field("message", &self.to_string())?;
        s.end()
    }
}

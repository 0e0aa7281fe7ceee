use serde::Serialize;
use std::fmt;

/// The two kinds of quota-enforcing resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Project,
    Namespace,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Project => write!(f, "project"),
            ResourceKind::Namespace => write!(f, "namespace"),
        }
    }
}

/// A downstream cluster on a named control-plane instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ClusterRef {
    pub instance: String,
    pub cluster_id: String,
}

impl ClusterRef {
    pub fn new(instance: impl Into<String>, cluster_id: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
            cluster_id: cluster_id.into(),
        }
    }
}

impl fmt::Display for ClusterRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cluster '{}' ({})", self.cluster_id, self.instance)
    }
}

/// A resolved project or namespace on a control-plane instance.
///
/// Project names are unique only per cluster and namespace names only per
/// project, so `id` is the only stable handle for writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceRef {
    pub kind: ResourceKind,
    pub id: String,
    pub name: String,
    pub instance: String,
    pub cluster_id: String,
    /// Owning project id (namespaces only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    /// Owning project name (namespaces only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
}

impl ResourceRef {
    pub fn project(cluster: &ClusterRef, id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: ResourceKind::Project,
            id: id.into(),
            name: name.into(),
            instance: cluster.instance.clone(),
            cluster_id: cluster.cluster_id.clone(),
            project_id: None,
            project_name: None,
        }
    }

    /// A namespace owned by `project`.
    pub fn namespace(project: &ResourceRef, id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: ResourceKind::Namespace,
            id: id.into(),
            name: name.into(),
            instance: project.instance.clone(),
            cluster_id: project.cluster_id.clone(),
            project_id: Some(project.id.clone()),
            project_name: Some(project.name.clone()),
        }
    }

    /// Name of the project this resource belongs to (itself for projects).
    pub fn project_label(&self) -> &str {
        match self.kind {
            ResourceKind::Project => &self.name,
            ResourceKind::Namespace => self.project_name.as_deref().unwrap_or_default(),
        }
    }

    pub fn cluster(&self) -> ClusterRef {
        ClusterRef::new(self.instance.clone(), self.cluster_id.clone())
    }

    /// Namespace name, if this is a namespace.
    pub fn namespace_label(&self) -> Option<&str> {
        match self.kind {
            ResourceKind::Project => None,
            ResourceKind::Namespace => Some(&self.name),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ResourceKind::Project => write!(
                f,
                "project '{}' ({}/{})",
                self.name, self.instance, self.cluster_id
            ),
            ResourceKind::Namespace => write!(
                f,
                "namespace '{}' ({}/{}/{})",
                self.name,
                self.instance,
                self.cluster_id,
                self.project_label()
            ),
        }
    }
}

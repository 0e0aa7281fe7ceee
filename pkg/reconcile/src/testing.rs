//! In-memory gateway used by the engine tests.

use async_trait::async_trait;
use pkg_types::config::{ClusterConfig, InstanceConfig, NamespaceConfig, ProjectConfig};
use pkg_types::quota::{QuotaField, QuotaSpec};
use pkg_types::resource::{ClusterRef, ResourceRef};
use pkg_types::secret::Secret;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;

use crate::cancel::CancelHandle;
use crate::gateway::{GatewayError, QuotaGateway};

#[derive(Debug, Clone)]
struct FakeNamespace {
    id: String,
    name: String,
    quota: QuotaSpec,
}

#[derive(Debug, Clone)]
struct FakeProject {
    id: String,
    name: String,
    quota: QuotaSpec,
    namespaces: Vec<FakeNamespace>,
}

#[derive(Debug, Default)]
struct State {
    clusters: BTreeMap<String, Vec<FakeProject>>,
    writes: Vec<(String, QuotaSpec)>,
    write_failures: HashMap<String, VecDeque<GatewayError>>,
    read_failures: HashMap<String, GatewayError>,
    cancel_on_write: HashMap<String, CancelHandle>,
    reads: usize,
}

/// Scriptable in-memory control plane.
///
/// Writes merge the partial spec into the stored quota, so a second plan
/// against the same fake observes the first run's writes.
#[derive(Debug, Default)]
pub struct FakeGateway {
    state: Mutex<State>,
}

pub fn spec(fields: &[(QuotaField, &str)]) -> QuotaSpec {
    fields.iter().fold(QuotaSpec::default(), |acc, (f, raw)| {
        acc.with_parsed(*f, raw).unwrap()
    })
}

fn merge(into: &mut QuotaSpec, partial: &QuotaSpec) {
    for (field, value) in partial.iter() {
        *into = into.with(field, Some(value));
    }
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an empty cluster.
    pub fn cluster(self, cluster_id: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .clusters
            .entry(cluster_id.to_string())
            .or_default();
        self
    }

    pub fn project(self, cluster_id: &str, id: &str, name: &str, quota: QuotaSpec) -> Self {
        self.state
            .lock()
            .unwrap()
            .clusters
            .entry(cluster_id.to_string())
            .or_default()
            .push(FakeProject {
                id: id.to_string(),
                name: name.to_string(),
                quota,
                namespaces: Vec::new(),
            });
        self
    }

    /// Add a namespace to the project with id `project_id`. Its id is
    /// `<cluster>:<name>`.
    pub fn namespace(self, project_id: &str, name: &str, quota: QuotaSpec) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            for (cluster_id, projects) in state.clusters.iter_mut() {
                if let Some(p) = projects.iter_mut().find(|p| p.id == project_id) {
                    p.namespaces.push(FakeNamespace {
                        id: format!("{}:{}", cluster_id, name),
                        name: name.to_string(),
                        quota,
                    });
                }
            }
        }
        self
    }

    /// Queue errors returned by successive writes to `id` before writes
    /// start succeeding.
    pub fn fail_writes(self, id: &str, errors: Vec<GatewayError>) -> Self {
        self.state
            .lock()
            .unwrap()
            .write_failures
            .insert(id.to_string(), errors.into());
        self
    }

    /// Every read of `id` (a cluster, project or namespace id) fails.
    pub fn fail_reads(self, id: &str, error: GatewayError) -> Self {
        self.state
            .lock()
            .unwrap()
            .read_failures
            .insert(id.to_string(), error);
        self
    }

    /// Cancel the run right after a successful write to `id`.
    pub fn cancel_after_write(self, id: &str, handle: CancelHandle) -> Self {
        self.state
            .lock()
            .unwrap()
            .cancel_on_write
            .insert(id.to_string(), handle);
        self
    }

    /// Successful writes as `(resource id, partial spec)`, in order.
    pub fn writes(&self) -> Vec<(String, QuotaSpec)> {
        self.state.lock().unwrap().writes.clone()
    }

    pub fn reads(&self) -> usize {
        self.state.lock().unwrap().reads
    }

    pub fn quota_of(&self, id: &str) -> Option<QuotaSpec> {
        let state = self.state.lock().unwrap();
        state.clusters.values().flatten().find_map(|p| {
            if p.id == id {
                return Some(p.quota);
            }
            p.namespaces.iter().find(|n| n.id == id).map(|n| n.quota)
        })
    }

    fn check_read(&self, id: &str) -> Result<(), GatewayError> {
        let mut state = self.state.lock().unwrap();
        state.reads += 1;
        match state.read_failures.get(id) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn write(&self, id: &str, partial: &QuotaSpec) -> Result<(), GatewayError> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state
            .write_failures
            .get_mut(id)
            .and_then(|queue| queue.pop_front())
        {
            return Err(err);
        }
        let mut found = false;
        for p in state.clusters.values_mut().flatten() {
            if p.id == id {
                merge(&mut p.quota, partial);
                found = true;
            }
            for n in p.namespaces.iter_mut().filter(|n| n.id == id) {
                merge(&mut n.quota, partial);
                found = true;
            }
        }
        if !found {
            return Err(GatewayError::NotFound(id.to_string()));
        }
        state.writes.push((id.to_string(), *partial));
        if let Some(handle) = state.cancel_on_write.get(id) {
            handle.cancel();
        }
        Ok(())
    }
}

#[async_trait]
impl QuotaGateway for FakeGateway {
    async fn list_projects(&self, cluster: &ClusterRef) -> Result<Vec<ResourceRef>, GatewayError> {
        self.check_read(&cluster.cluster_id)?;
        let state = self.state.lock().unwrap();
        let projects = state
            .clusters
            .get(&cluster.cluster_id)
            .ok_or_else(|| GatewayError::NotFound(cluster.cluster_id.clone()))?;
        Ok(projects
            .iter()
            .map(|p| ResourceRef::project(cluster, p.id.clone(), p.name.clone()))
            .collect())
    }

    async fn get_project_quota(&self, project: &ResourceRef) -> Result<QuotaSpec, GatewayError> {
        self.check_read(&project.id)?;
        self.quota_of(&project.id)
            .ok_or_else(|| GatewayError::NotFound(project.id.clone()))
    }

    async fn list_namespaces(&self, project: &ResourceRef) -> Result<Vec<ResourceRef>, GatewayError> {
        self.check_read(&format!("{}/namespaces", project.id))?;
        let state = self.state.lock().unwrap();
        let p = state
            .clusters
            .values()
            .flatten()
            .find(|p| p.id == project.id)
            .ok_or_else(|| GatewayError::NotFound(project.id.clone()))?;
        Ok(p.namespaces
            .iter()
            .map(|n| ResourceRef::namespace(project, n.id.clone(), n.name.clone()))
            .collect())
    }

    async fn get_namespace_quota(&self, namespace: &ResourceRef) -> Result<QuotaSpec, GatewayError> {
        self.check_read(&namespace.id)?;
        self.quota_of(&namespace.id)
            .ok_or_else(|| GatewayError::NotFound(namespace.id.clone()))
    }

    async fn update_project_quota(
        &self,
        project: &ResourceRef,
        partial: &QuotaSpec,
    ) -> Result<(), GatewayError> {
        self.write(&project.id, partial)
    }

    async fn update_namespace_quota(
        &self,
        namespace: &ResourceRef,
        partial: &QuotaSpec,
    ) -> Result<(), GatewayError> {
        self.write(&namespace.id, partial)
    }
}

pub fn instance(name: &str, clusters: Vec<ClusterConfig>) -> InstanceConfig {
    InstanceConfig {
        name: name.to_string(),
        url: "https://rancher.test".to_string(),
        token: Secret::new("token-test"),
        insecure_skip_tls_verify: false,
        timeout_secs: None,
        clusters,
    }
}

pub fn cluster(cluster_id: &str, projects: Vec<ProjectConfig>) -> ClusterConfig {
    ClusterConfig {
        name: cluster_id.to_string(),
        cluster_id: cluster_id.to_string(),
        projects,
    }
}

pub fn project(name: &str, quota: QuotaSpec, namespaces: Vec<(&str, QuotaSpec)>) -> ProjectConfig {
    ProjectConfig {
        name: name.to_string(),
        id: None,
        quota,
        namespaces: namespaces
            .into_iter()
            .map(|(name, quota)| NamespaceConfig {
                name: name.to_string(),
                quota,
            })
            .collect(),
    }
}

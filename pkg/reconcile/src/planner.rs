use pkg_types::config::{ClusterConfig, InstanceConfig, NamespaceConfig, ProjectConfig};
use pkg_types::quota::QuotaSpec;
use pkg_types::resource::{ClusterRef, ResourceKind, ResourceRef};
use std::future::Future;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::error::ReconcileError;
use crate::gateway::{GatewayError, QuotaGateway};
use crate::plan::{ExecutionResult, Plan, PlanItem, Target};
use crate::policy::ErrorPolicy;
use crate::retry::RetryPolicy;

/// Which configured instances, clusters and projects a run covers.
///
/// Empty lists mean "everything configured".
#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub instances: Vec<String>,
    /// Matched against `cluster_id` or the cluster's config key.
    pub clusters: Vec<String>,
    /// Matched against the configured project name or its pinned id.
    pub projects: Vec<String>,
    pub all_projects: bool,
}

impl Selection {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn matches_instance(&self, instance: &InstanceConfig) -> bool {
        self.instances.is_empty() || self.instances.iter().any(|i| *i == instance.name)
    }

    pub fn matches_cluster(&self, cluster: &ClusterConfig) -> bool {
        self.clusters.is_empty()
            || self
                .clusters
                .iter()
                .any(|c| *c == cluster.cluster_id || *c == cluster.name)
    }

    pub fn matches_project(&self, project: &ProjectConfig) -> bool {
        self.all_projects
            || self.projects.is_empty()
            || self
                .projects
                .iter()
                .any(|p| *p == project.name || project.id.as_deref() == Some(p.as_str()))
    }

    /// Clusters of `instance` this selection covers, in config order.
    pub fn clusters_of<'a>(
        &'a self,
        instance: &'a InstanceConfig,
    ) -> impl Iterator<Item = &'a ClusterConfig> + 'a {
        instance
            .clusters
            .iter()
            .filter(move |c| self.matches_cluster(c))
    }
}

/// Planning stopped on a fatal error. `partial` keeps what was planned and
/// skipped up to that point.
#[derive(Debug)]
pub struct PlanError {
    pub error: ReconcileError,
    pub partial: Plan,
}

/// Builds a [`Plan`] for one instance by reading observed state through the
/// gateway and diffing it against the desired config.
pub struct Planner<'a> {
    gateway: &'a dyn QuotaGateway,
    policy: ErrorPolicy,
    retry: &'a RetryPolicy,
    cancel: &'a CancelToken,
}

impl<'a> Planner<'a> {
    pub fn new(
        gateway: &'a dyn QuotaGateway,
        policy: ErrorPolicy,
        retry: &'a RetryPolicy,
        cancel: &'a CancelToken,
    ) -> Self {
        Self {
            gateway,
            policy,
            retry,
            cancel,
        }
    }

    pub async fn build(
        &self,
        selection: &Selection,
        config: &InstanceConfig,
    ) -> Result<Plan, PlanError> {
        let mut plan = Plan::default();
        match self.build_into(selection, config, &mut plan).await {
            Ok(()) => {
                info!(
                    instance = %config.name,
                    "Planner: {} change(s), {} skipped",
                    plan.len(),
                    plan.skipped.len()
                );
                Ok(plan)
            }
            Err(error) => Err(PlanError {
                error,
                partial: plan,
            }),
        }
    }

    async fn build_into(
        &self,
        selection: &Selection,
        config: &InstanceConfig,
        plan: &mut Plan,
    ) -> Result<(), ReconcileError> {
        for cluster in selection.clusters_of(config) {
            let projects: Vec<&ProjectConfig> = cluster
                .projects
                .iter()
                .filter(|p| selection.matches_project(p))
                .collect();
            if projects.is_empty() {
                continue;
            }
            if self.cancel.is_cancelled() {
                return Err(ReconcileError::Cancelled);
            }

            let cref = ClusterRef::new(&config.name, &cluster.cluster_id);
            let listed = match self.list_projects(&cref).await {
                Ok(listed) => listed,
                Err(err) => {
                    for project in &projects {
                        self.absorb(
                            err.clone(),
                            Target::unresolved_project(
                                &cref.instance,
                                &cref.cluster_id,
                                &project.name,
                            ),
                            plan,
                        )?;
                    }
                    continue;
                }
            };
            debug!(
                instance = %cref.instance,
                cluster = %cref.cluster_id,
                "Planner: {} project(s) listed",
                listed.len()
            );

            for project in projects {
                if self.cancel.is_cancelled() {
                    return Err(ReconcileError::Cancelled);
                }
                self.plan_project(&cref, &listed, project, plan).await?;
            }
        }
        Ok(())
    }

    async fn plan_project(
        &self,
        cluster: &ClusterRef,
        listed: &[ResourceRef],
        project: &ProjectConfig,
        plan: &mut Plan,
    ) -> Result<(), ReconcileError> {
        let pref = match resolve_project(cluster, listed, project) {
            Ok(pref) => pref,
            Err(err) => {
                let target =
                    Target::unresolved_project(&cluster.instance, &cluster.cluster_id, &project.name);
                return self.absorb(err, target, plan);
            }
        };

        if !project.quota.is_empty() {
            let observed = self
                .read(&cluster.instance, pref.to_string(), || {
                    self.gateway.get_project_quota(&pref)
                })
                .await;
            match observed {
                Ok(observed) => self.push_if_drifted(pref.clone(), observed, project.quota, plan),
                Err(err) => self.absorb(err, Target::from(&pref), plan)?,
            }
        }

        let declared: Vec<&NamespaceConfig> = project
            .namespaces
            .iter()
            .filter(|ns| {
                if ns.quota.is_empty() {
                    debug!(
                        project = %pref.name,
                        namespace = %ns.name,
                        "Planner: no quota declared, nothing to enforce"
                    );
                }
                !ns.quota.is_empty()
            })
            .collect();
        if declared.is_empty() {
            return Ok(());
        }

        let namespaces = self
            .read(
                &cluster.instance,
                format!("namespaces of {}", pref),
                || self.gateway.list_namespaces(&pref),
            )
            .await;
        let namespaces = match namespaces {
            Ok(namespaces) => namespaces,
            Err(err) => return self.absorb(err, Target::from(&pref), plan),
        };

        for ns in declared {
            let nref = match resolve_namespace(&pref, &namespaces, &ns.name) {
                Ok(Some(nref)) => nref,
                Ok(None) => {
                    let err = ReconcileError::NamespaceNotFound {
                        instance: pref.instance.clone(),
                        cluster_id: pref.cluster_id.clone(),
                        project: pref.name.clone(),
                        namespace: ns.name.clone(),
                    };
                    warn!(
                        instance = %pref.instance,
                        cluster = %pref.cluster_id,
                        project = %pref.name,
                        namespace = %ns.name,
                        "Planner: namespace does not exist, skipping"
                    );
                    plan.skip(ExecutionResult::skipped(
                        Target::unresolved_namespace(&pref, &ns.name),
                        err,
                    ));
                    continue;
                }
                Err(err) => {
                    self.absorb(err, Target::unresolved_namespace(&pref, &ns.name), plan)?;
                    continue;
                }
            };

            let observed = self
                .read(&cluster.instance, nref.to_string(), || {
                    self.gateway.get_namespace_quota(&nref)
                })
                .await;
            match observed {
                Ok(observed) => self.push_if_drifted(nref, observed, ns.quota, plan),
                Err(err) => self.absorb(err, Target::from(&nref), plan)?,
            }
        }
        Ok(())
    }

    fn push_if_drifted(
        &self,
        resource: ResourceRef,
        observed: QuotaSpec,
        desired: QuotaSpec,
        plan: &mut Plan,
    ) {
        match PlanItem::new(resource, observed, desired) {
            Some(item) => {
                info!(
                    instance = %item.resource.instance,
                    cluster = %item.resource.cluster_id,
                    project = %item.resource.project_label(),
                    namespace = item.resource.namespace_label().unwrap_or(""),
                    "Planner: {} drifts on {} field(s)",
                    item.resource.kind,
                    item.deltas.len()
                );
                plan.push(item);
            }
            None => debug!("Planner: in sync"),
        }
    }

    /// Record a per-resource error as skipped, or hand it back when it must
    /// stop the run.
    fn absorb(
        &self,
        err: ReconcileError,
        target: Target,
        plan: &mut Plan,
    ) -> Result<(), ReconcileError> {
        if err.is_always_fatal() || !self.policy.continues() {
            return Err(err);
        }
        warn!(
            instance = %target.instance,
            cluster = %target.cluster_id,
            project = %target.project,
            "Planner: skipping {}: {}",
            target,
            err
        );
        plan.skip(ExecutionResult::skipped(target, err));
        Ok(())
    }

    async fn list_projects(&self, cluster: &ClusterRef) -> Result<Vec<ResourceRef>, ReconcileError> {
        let attempted = self
            .retry
            .run(&format!("list projects of {}", cluster), || {
                self.gateway.list_projects(cluster)
            })
            .await;
        attempted.result.map_err(|err| match err {
            GatewayError::NotFound(_) => ReconcileError::ClusterNotFound {
                instance: cluster.instance.clone(),
                cluster_id: cluster.cluster_id.clone(),
            },
            other => ReconcileError::from_read(other, &cluster.instance, format!("projects of {}", cluster)),
        })
    }

    async fn read<T, F, Fut>(&self, instance: &str, what: String, op: F) -> Result<T, ReconcileError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let attempted = self.retry.run(&what, op).await;
        attempted
            .result
            .map_err(|err| ReconcileError::from_read(err, instance, what))
    }
}

/// Resolve a configured project to exactly one listed project.
///
/// A pinned id must match a listed id. Otherwise the name is matched
/// against display names; when none match, the name is tried as an id.
fn resolve_project(
    cluster: &ClusterRef,
    listed: &[ResourceRef],
    project: &ProjectConfig,
) -> Result<ResourceRef, ReconcileError> {
    let not_found = || ReconcileError::ProjectNotFound {
        instance: cluster.instance.clone(),
        cluster_id: cluster.cluster_id.clone(),
        project: project.name.clone(),
    };

    if let Some(id) = &project.id {
        return listed
            .iter()
            .find(|p| p.id == *id)
            .cloned()
            .ok_or_else(not_found);
    }

    let by_name: Vec<&ResourceRef> = listed.iter().filter(|p| p.name == project.name).collect();
    match by_name.as_slice() {
        [one] => Ok((*one).clone()),
        [] => listed
            .iter()
            .find(|p| p.id == project.name)
            .cloned()
            .ok_or_else(not_found),
        many => Err(ReconcileError::AmbiguousName {
            kind: ResourceKind::Project,
            name: project.name.clone(),
            scope: format!("cluster '{}'", cluster),
            matches: many.len(),
        }),
    }
}

/// `Ok(None)` when no namespace of that name exists in the project.
fn resolve_namespace(
    project: &ResourceRef,
    listed: &[ResourceRef],
    name: &str,
) -> Result<Option<ResourceRef>, ReconcileError> {
    let matches: Vec<&ResourceRef> = listed.iter().filter(|n| n.name == name).collect();
    match matches.as_slice() {
        [] => Ok(None),
        [one] => Ok(Some((*one).clone())),
        many => Err(ReconcileError::AmbiguousName {
            kind: ResourceKind::Namespace,
            name: name.to_string(),
            scope: project.to_string(),
            matches: many.len(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::cancel_pair;
    use crate::testing::{FakeGateway, cluster, instance, project, spec};
    use pkg_types::quota::QuotaField::*;

    async fn build(
        gateway: &FakeGateway,
        config: &InstanceConfig,
        policy: ErrorPolicy,
    ) -> Result<Plan, PlanError> {
        let retry = RetryPolicy::none();
        let cancel = CancelToken::never();
        Planner::new(gateway, policy, &retry, &cancel)
            .build(&Selection::all(), config)
            .await
    }

    #[tokio::test]
    async fn single_field_drift_yields_one_item() {
        let gw = FakeGateway::new().project(
            "c-1",
            "c-1:p-1",
            "payments",
            spec(&[(CpuLimit, "1000m"), (MemoryLimit, "4Gi")]),
        );
        let config = instance(
            "prod",
            vec![cluster(
                "c-1",
                vec![project("payments", spec(&[(CpuLimit, "2000m")]), vec![])],
            )],
        );

        let plan = build(&gw, &config, ErrorPolicy::FailFast).await.unwrap();
        assert_eq!(plan.len(), 1);
        let item = &plan.items()[0];
        assert_eq!(item.resource.id, "c-1:p-1");
        assert_eq!(item.deltas.len(), 1);
        assert_eq!(item.deltas[0].field, CpuLimit);
        assert_eq!(item.deltas[0].current.map(|v| v.format()).as_deref(), Some("1"));
        assert_eq!(item.deltas[0].desired.format(), "2");
        assert!(plan.skipped.is_empty());
    }

    #[tokio::test]
    async fn namespaces_follow_their_project() {
        let gw = FakeGateway::new()
            .project("c-1", "c-1:p-1", "payments", QuotaSpec::default())
            .namespace("c-1:p-1", "api", QuotaSpec::default())
            .namespace("c-1:p-1", "worker", QuotaSpec::default())
            .project("c-1", "c-1:p-2", "search", QuotaSpec::default());
        let q = spec(&[(CpuLimit, "1")]);
        let config = instance(
            "prod",
            vec![cluster(
                "c-1",
                vec![
                    project("payments", q, vec![("worker", q), ("api", q)]),
                    project("search", q, vec![]),
                ],
            )],
        );

        let plan = build(&gw, &config, ErrorPolicy::FailFast).await.unwrap();
        let ids: Vec<&str> = plan.items().iter().map(|i| i.resource.id.as_str()).collect();
        assert_eq!(ids, vec!["c-1:p-1", "c-1:worker", "c-1:api", "c-1:p-2"]);
    }

    #[tokio::test]
    async fn ambiguous_project_name_is_fatal_under_any_policy() {
        let gw = FakeGateway::new()
            .project("c-1", "c-1:p-1", "payments", QuotaSpec::default())
            .project("c-1", "c-1:p-2", "payments", QuotaSpec::default());
        let config = instance(
            "prod",
            vec![cluster(
                "c-1",
                vec![project("payments", spec(&[(CpuLimit, "1")]), vec![])],
            )],
        );

        for policy in [ErrorPolicy::FailFast, ErrorPolicy::ContinueOnError] {
            let err = build(&gw, &config, policy).await.unwrap_err();
            assert!(matches!(
                err.error,
                ReconcileError::AmbiguousName { matches: 2, .. }
            ));
        }
        assert!(gw.writes().is_empty());
    }

    #[tokio::test]
    async fn ambiguous_namespace_name_is_fatal_under_any_policy() {
        let gw = FakeGateway::new()
            .project("c-1", "c-1:p-1", "payments", QuotaSpec::default())
            .namespace("c-1:p-1", "api", QuotaSpec::default())
            .namespace("c-1:p-1", "api", QuotaSpec::default());
        let q = spec(&[(CpuLimit, "1")]);
        let config = instance(
            "prod",
            vec![cluster("c-1", vec![project("payments", q, vec![("api", q)])])],
        );

        for policy in [ErrorPolicy::FailFast, ErrorPolicy::ContinueOnError] {
            let err = build(&gw, &config, policy).await.unwrap_err();
            assert!(matches!(
                err.error,
                ReconcileError::AmbiguousName {
                    kind: ResourceKind::Namespace,
                    matches: 2,
                    ..
                }
            ));
            assert!(err.partial.skipped.is_empty());
        }
        assert!(gw.writes().is_empty());
    }

    #[tokio::test]
    async fn pinned_id_bypasses_name_resolution() {
        let gw = FakeGateway::new()
            .project("c-1", "c-1:p-1", "payments", QuotaSpec::default())
            .project("c-1", "c-1:p-2", "payments", QuotaSpec::default());
        let mut p = project("payments", spec(&[(CpuLimit, "1")]), vec![]);
        p.id = Some("c-1:p-2".into());
        let config = instance("prod", vec![cluster("c-1", vec![p])]);

        let plan = build(&gw, &config, ErrorPolicy::FailFast).await.unwrap();
        assert_eq!(plan.items()[0].resource.id, "c-1:p-2");
    }

    #[tokio::test]
    async fn project_name_may_be_an_id() {
        let gw = FakeGateway::new().project("c-1", "c-1:p-1", "Payments", QuotaSpec::default());
        let config = instance(
            "prod",
            vec![cluster(
                "c-1",
                vec![project("c-1:p-1", spec(&[(CpuLimit, "1")]), vec![])],
            )],
        );
        let plan = build(&gw, &config, ErrorPolicy::FailFast).await.unwrap();
        assert_eq!(plan.items()[0].resource.name, "Payments");
    }

    #[tokio::test]
    async fn missing_namespace_is_skipped_even_under_fail_fast() {
        let gw = FakeGateway::new()
            .project("c-1", "c-1:p-1", "payments", QuotaSpec::default())
            .namespace("c-1:p-1", "api", QuotaSpec::default());
        let q = spec(&[(MemoryLimit, "1Gi")]);
        let config = instance(
            "prod",
            vec![cluster(
                "c-1",
                vec![project("payments", QuotaSpec::default(), vec![("ghost", q), ("api", q)])],
            )],
        );

        let plan = build(&gw, &config, ErrorPolicy::FailFast).await.unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.items()[0].resource.name, "api");
        assert_eq!(plan.skipped.len(), 1);
        let skipped = &plan.skipped[0];
        assert_eq!(skipped.target.namespace.as_deref(), Some("ghost"));
        assert!(skipped.error.as_ref().unwrap().is_benign_skip());
    }

    #[tokio::test]
    async fn missing_project_depends_on_policy() {
        let gw = FakeGateway::new().project("c-1", "c-1:p-2", "search", QuotaSpec::default());
        let q = spec(&[(CpuLimit, "1")]);
        let config = instance(
            "prod",
            vec![cluster(
                "c-1",
                vec![project("payments", q, vec![]), project("search", q, vec![])],
            )],
        );

        let err = build(&gw, &config, ErrorPolicy::FailFast).await.unwrap_err();
        assert_eq!(err.error.kind(), "ProjectNotFound");
        assert!(err.partial.is_empty());

        let plan = build(&gw, &config, ErrorPolicy::ContinueOnError)
            .await
            .unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.skipped.len(), 1);
        assert_eq!(plan.skipped[0].target.project, "payments");
    }

    #[tokio::test]
    async fn unknown_cluster_reports_cluster_not_found() {
        let gw = FakeGateway::new().cluster("c-1");
        let config = instance(
            "prod",
            vec![cluster(
                "c-9",
                vec![project("payments", spec(&[(CpuLimit, "1")]), vec![])],
            )],
        );
        let err = build(&gw, &config, ErrorPolicy::FailFast).await.unwrap_err();
        assert_eq!(err.error.kind(), "ClusterNotFound");
    }

    #[tokio::test]
    async fn read_failure_is_skipped_under_continue_on_error() {
        let gw = FakeGateway::new()
            .project("c-1", "c-1:p-1", "payments", QuotaSpec::default())
            .fail_reads("c-1:p-1", GatewayError::ServerError("503".into()));
        let config = instance(
            "prod",
            vec![cluster(
                "c-1",
                vec![project("payments", spec(&[(CpuLimit, "1")]), vec![])],
            )],
        );

        let plan = build(&gw, &config, ErrorPolicy::ContinueOnError)
            .await
            .unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.skipped[0].error.as_ref().unwrap().kind(), "Read");

        let err = build(&gw, &config, ErrorPolicy::FailFast).await.unwrap_err();
        assert_eq!(err.error.kind(), "Read");
    }

    #[tokio::test]
    async fn unauthorized_read_always_aborts() {
        let gw = FakeGateway::new()
            .project("c-1", "c-1:p-1", "payments", QuotaSpec::default())
            .fail_reads("c-1", GatewayError::Unauthorized("401".into()));
        let config = instance(
            "prod",
            vec![cluster(
                "c-1",
                vec![project("payments", spec(&[(CpuLimit, "1")]), vec![])],
            )],
        );
        let err = build(&gw, &config, ErrorPolicy::ContinueOnError)
            .await
            .unwrap_err();
        assert_eq!(err.error.kind(), "Unauthorized");
    }

    #[tokio::test]
    async fn selection_limits_projects() {
        let gw = FakeGateway::new()
            .project("c-1", "c-1:p-1", "payments", QuotaSpec::default())
            .project("c-1", "c-1:p-2", "search", QuotaSpec::default());
        let q = spec(&[(CpuLimit, "1")]);
        let config = instance(
            "prod",
            vec![cluster(
                "c-1",
                vec![project("payments", q, vec![]), project("search", q, vec![])],
            )],
        );
        let selection = Selection {
            projects: vec!["search".into()],
            ..Selection::all()
        };
        let retry = RetryPolicy::none();
        let cancel = CancelToken::never();
        let plan = Planner::new(&gw, ErrorPolicy::FailFast, &retry, &cancel)
            .build(&selection, &config)
            .await
            .unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.items()[0].resource.name, "search");
    }

    #[tokio::test]
    async fn cancelled_before_planning() {
        let gw = FakeGateway::new().project("c-1", "c-1:p-1", "payments", QuotaSpec::default());
        let config = instance(
            "prod",
            vec![cluster(
                "c-1",
                vec![project("payments", spec(&[(CpuLimit, "1")]), vec![])],
            )],
        );
        let (handle, token) = cancel_pair();
        handle.cancel();
        let retry = RetryPolicy::none();
        let err = Planner::new(&gw, ErrorPolicy::FailFast, &retry, &token)
            .build(&Selection::all(), &config)
            .await
            .unwrap_err();
        assert_eq!(err.error, ReconcileError::Cancelled);
        assert_eq!(gw.reads(), 0);
    }
}

//! Runs plan and apply across every selected instance.

use pkg_types::config::InstanceConfig;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, info_span, warn};
use tracing::Instrument;

use crate::cancel::CancelToken;
use crate::error::ReconcileError;
use crate::executor::Executor;
use crate::gateway::QuotaGateway;
use crate::plan::{ExecutionResult, Plan};
use crate::planner::{Planner, Selection};
use crate::policy::ErrorPolicy;
use crate::retry::RetryPolicy;
use crate::summary::{Summary, summarize};

/// One configured instance and the gateway that talks to it.
pub struct InstanceTarget {
    pub config: InstanceConfig,
    pub gateway: Arc<dyn QuotaGateway>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    /// Plan only; nothing is written.
    DryRun,
    Apply,
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub mode: Mode,
    pub policy: ErrorPolicy,
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub mode: Mode,
    pub plan: Plan,
    pub summary: Summary,
}

/// Check that every explicit selector names something configured.
pub fn validate_selection(
    targets: &[InstanceTarget],
    selection: &Selection,
) -> Result<(), ReconcileError> {
    let instances: Vec<&InstanceConfig> = targets
        .iter()
        .map(|t| &t.config)
        .filter(|c| selection.matches_instance(c))
        .collect();
    if instances.is_empty() {
        return Err(ReconcileError::Selection(format!(
            "no configured instance named {}",
            selection.instances.join(", ")
        )));
    }

    for wanted in &selection.clusters {
        let found = instances.iter().any(|i| {
            i.clusters
                .iter()
                .any(|c| c.cluster_id == *wanted || c.name == *wanted)
        });
        if !found {
            return Err(ReconcileError::Selection(format!(
                "cluster '{}' is not configured",
                wanted
            )));
        }
    }

    if !selection.all_projects {
        for wanted in &selection.projects {
            let found = instances.iter().any(|i| {
                selection.clusters_of(i).any(|c| {
                    c.projects
                        .iter()
                        .any(|p| p.name == *wanted || p.id.as_deref() == Some(wanted.as_str()))
                })
            });
            if !found {
                return Err(ReconcileError::Selection(format!(
                    "project '{}' is not configured in the selected clusters",
                    wanted
                )));
            }
        }
    }
    Ok(())
}

/// Plan and, in apply mode, execute every selected instance in order.
///
/// Always returns a report; a fatal error is carried in
/// `summary.aborted` together with everything processed before it.
pub async fn run(
    targets: &[InstanceTarget],
    selection: &Selection,
    opts: &RunOptions,
    cancel: &CancelToken,
) -> RunReport {
    let mut plan = Plan::default();
    let mut results: Vec<ExecutionResult> = Vec::new();
    let mut aborted = None;

    if let Err(err) = validate_selection(targets, selection) {
        warn!("Run: {}", err);
        return RunReport {
            mode: opts.mode,
            plan,
            summary: summarize(results, Some(err)),
        };
    }

    for target in targets.iter().filter(|t| selection.matches_instance(&t.config)) {
        if cancel.is_cancelled() {
            aborted = Some(ReconcileError::Cancelled);
            break;
        }
        let span = info_span!("instance", instance = %target.config.name);
        let outcome = run_instance(target, selection, opts, cancel, &mut plan, &mut results)
            .instrument(span)
            .await;
        if let Err(err) = outcome {
            aborted = Some(err);
            break;
        }
    }

    let summary = summarize(results, aborted);
    info!(
        "Run: {} applied, {} failed, {} skipped, exit code {}",
        summary.counts.applied, summary.counts.failed, summary.counts.skipped, summary.exit_code
    );
    RunReport {
        mode: opts.mode,
        plan,
        summary,
    }
}

async fn run_instance(
    target: &InstanceTarget,
    selection: &Selection,
    opts: &RunOptions,
    cancel: &CancelToken,
    plan: &mut Plan,
    results: &mut Vec<ExecutionResult>,
) -> Result<(), ReconcileError> {
    let gateway = target.gateway.as_ref();
    let planned = Planner::new(gateway, opts.policy, &opts.retry, cancel)
        .build(selection, &target.config)
        .await;
    let instance_plan = match planned {
        Ok(p) => p,
        Err(failure) => {
            results.extend(failure.partial.interleave_skipped(Vec::new()));
            plan.extend(failure.partial);
            return Err(failure.error);
        }
    };

    if opts.mode == Mode::DryRun {
        results.extend(instance_plan.interleave_skipped(Vec::new()));
        plan.extend(instance_plan);
        return Ok(());
    }

    let execution = Executor::new(gateway, opts.policy, &opts.retry, cancel)
        .apply(instance_plan.items().to_vec())
        .await;
    results.extend(instance_plan.interleave_skipped(execution.results));
    plan.extend(instance_plan);
    match execution.aborted {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::cancel_pair;
    use crate::gateway::GatewayError;
    use crate::plan::Outcome;
    use crate::testing::{FakeGateway, cluster, instance, project, spec};
    use pkg_types::quota::QuotaField::*;
    use pkg_types::quota::QuotaSpec;

    fn opts(mode: Mode, policy: ErrorPolicy) -> RunOptions {
        RunOptions {
            mode,
            policy,
            retry: RetryPolicy::default(),
        }
    }

    fn payments_target(gw: Arc<FakeGateway>) -> InstanceTarget {
        let config = instance(
            "prod",
            vec![cluster(
                "c-1",
                vec![project(
                    "payments",
                    spec(&[(CpuLimit, "2000m")]),
                    vec![("api", spec(&[(MemoryLimit, "1Gi")]))],
                )],
            )],
        );
        InstanceTarget {
            config,
            gateway: gw,
        }
    }

    fn payments_gateway() -> Arc<FakeGateway> {
        Arc::new(
            FakeGateway::new()
                .project(
                    "c-1",
                    "c-1:p-1",
                    "payments",
                    spec(&[(CpuLimit, "1000m"), (MemoryLimit, "8Gi")]),
                )
                .namespace("c-1:p-1", "api", QuotaSpec::default()),
        )
    }

    #[tokio::test]
    async fn apply_then_rerun_is_idempotent() {
        let gw = payments_gateway();
        let targets = vec![payments_target(gw.clone())];
        let cancel = CancelToken::never();
        let apply = opts(Mode::Apply, ErrorPolicy::FailFast);

        let first = run(&targets, &Selection::all(), &apply, &cancel).await;
        assert_eq!(first.summary.counts.applied, 2);
        assert_eq!(first.summary.exit_code, 0);
        assert_eq!(gw.writes().len(), 2);

        let second = run(&targets, &Selection::all(), &apply, &cancel).await;
        assert!(second.plan.is_empty());
        assert_eq!(second.summary.exit_code, 0);
        assert_eq!(gw.writes().len(), 2);
    }

    #[tokio::test]
    async fn scenario_single_cpu_change() {
        let gw = Arc::new(FakeGateway::new().project(
            "c-1",
            "c-1:p-1",
            "payments",
            spec(&[(CpuLimit, "1000m"), (MemoryLimit, "4Gi")]),
        ));
        let targets = vec![InstanceTarget {
            config: instance(
                "prod",
                vec![cluster(
                    "c-1",
                    vec![project("payments", spec(&[(CpuLimit, "2000m")]), vec![])],
                )],
            ),
            gateway: gw.clone(),
        }];

        let report = run(
            &targets,
            &Selection::all(),
            &opts(Mode::Apply, ErrorPolicy::FailFast),
            &CancelToken::never(),
        )
        .await;
        assert_eq!(report.plan.len(), 1);
        assert_eq!(report.plan.items()[0].deltas.len(), 1);
        let c = report.summary.counts;
        assert_eq!((c.applied, c.failed, c.skipped), (1, 0, 0));
        assert_eq!(report.summary.exit_code, 0);

        let writes = gw.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].1, spec(&[(CpuLimit, "2")]));
        assert_eq!(
            gw.quota_of("c-1:p-1").unwrap(),
            spec(&[(CpuLimit, "2"), (MemoryLimit, "4Gi")])
        );
    }

    #[tokio::test]
    async fn dry_run_writes_nothing() {
        let gw = payments_gateway();
        let targets = vec![payments_target(gw.clone())];
        let report = run(
            &targets,
            &Selection::all(),
            &opts(Mode::DryRun, ErrorPolicy::FailFast),
            &CancelToken::never(),
        )
        .await;
        assert_eq!(report.plan.len(), 2);
        assert!(report.summary.results.is_empty());
        assert_eq!(report.summary.exit_code, 0);
        assert!(gw.writes().is_empty());
    }

    #[tokio::test]
    async fn unknown_project_selector_is_fatal() {
        let gw = payments_gateway();
        let targets = vec![payments_target(gw.clone())];
        let selection = Selection {
            projects: vec!["billing".into()],
            ..Selection::all()
        };
        let report = run(
            &targets,
            &selection,
            &opts(Mode::Apply, ErrorPolicy::FailFast),
            &CancelToken::never(),
        )
        .await;
        assert_eq!(report.summary.exit_code, 1);
        assert_eq!(report.summary.aborted.unwrap().kind(), "Selection");
        assert_eq!(gw.reads(), 0);
    }

    #[tokio::test]
    async fn unknown_instance_selector_is_fatal() {
        let targets = vec![payments_target(payments_gateway())];
        let selection = Selection {
            instances: vec!["staging".into()],
            ..Selection::all()
        };
        let err = validate_selection(&targets, &selection).unwrap_err();
        assert!(err.to_string().contains("staging"));
    }

    #[tokio::test(start_paused = true)]
    async fn failure_in_first_instance_stops_the_run_under_fail_fast() {
        let first = Arc::new(
            FakeGateway::new()
                .project("c-1", "c-1:p-1", "payments", QuotaSpec::default())
                .fail_writes("c-1:p-1", vec![GatewayError::ServerError("500".into()); 3]),
        );
        let second = payments_gateway();
        let mut t2 = payments_target(second.clone());
        t2.config.name = "staging".into();
        let targets = vec![payments_target(first.clone()), t2];

        let report = run(
            &targets,
            &Selection::all(),
            &opts(Mode::Apply, ErrorPolicy::FailFast),
            &CancelToken::never(),
        )
        .await;
        assert_eq!(report.summary.exit_code, 1);
        assert_eq!(report.summary.results.len(), 2);
        assert_eq!(report.summary.results[0].outcome, Outcome::Failed);
        // "api" does not exist on this instance; it follows its project
        assert_eq!(report.summary.results[1].outcome, Outcome::Skipped);
        assert_eq!(second.reads(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn continue_on_error_covers_every_instance() {
        let first = Arc::new(
            FakeGateway::new()
                .project("c-1", "c-1:p-1", "payments", QuotaSpec::default())
                .fail_writes("c-1:p-1", vec![GatewayError::ServerError("500".into()); 3]),
        );
        let second = payments_gateway();
        let mut t2 = payments_target(second.clone());
        t2.config.name = "staging".into();
        let targets = vec![payments_target(first), t2];

        let report = run(
            &targets,
            &Selection::all(),
            &opts(Mode::Apply, ErrorPolicy::ContinueOnError),
            &CancelToken::never(),
        )
        .await;
        assert_eq!(report.summary.exit_code, 2);
        assert_eq!(report.summary.counts.failed, 1);
        assert_eq!(report.summary.counts.applied, 2);
        assert_eq!(second.writes().len(), 2);
    }

    #[tokio::test]
    async fn summary_follows_plan_order() {
        let q = spec(&[(CpuLimit, "1")]);
        let gw = Arc::new(
            FakeGateway::new()
                .project("c-1", "c-1:p-1", "payments", QuotaSpec::default())
                .namespace("c-1:p-1", "api", QuotaSpec::default())
                .project("c-1", "c-1:p-2", "search", QuotaSpec::default()),
        );
        let targets = vec![InstanceTarget {
            config: instance(
                "prod",
                vec![cluster(
                    "c-1",
                    vec![
                        project("payments", q, vec![("ghost", q), ("api", q)]),
                        project("search", q, vec![]),
                    ],
                )],
            ),
            gateway: gw,
        }];

        let report = run(
            &targets,
            &Selection::all(),
            &opts(Mode::Apply, ErrorPolicy::FailFast),
            &CancelToken::never(),
        )
        .await;
        let order: Vec<(Outcome, String)> = report
            .summary
            .results
            .iter()
            .map(|r| {
                let name = r.target.namespace.clone().unwrap_or_else(|| r.target.project.clone());
                (r.outcome, name)
            })
            .collect();
        assert_eq!(
            order,
            vec![
                (Outcome::Applied, "payments".to_string()),
                (Outcome::Skipped, "ghost".to_string()),
                (Outcome::Applied, "api".to_string()),
                (Outcome::Applied, "search".to_string()),
            ]
        );
        assert_eq!(report.summary.exit_code, 0);
    }

    #[tokio::test]
    async fn cancellation_mid_run_returns_partial_summary() {
        let (handle, token) = cancel_pair();
        let gw = Arc::new(
            FakeGateway::new()
                .project("c-1", "c-1:p-1", "payments", spec(&[(CpuLimit, "1000m")]))
                .namespace("c-1:p-1", "api", QuotaSpec::default())
                .cancel_after_write("c-1:p-1", handle),
        );
        let targets = vec![payments_target(gw.clone())];

        let report = run(
            &targets,
            &Selection::all(),
            &opts(Mode::Apply, ErrorPolicy::ContinueOnError),
            &token,
        )
        .await;
        assert_eq!(report.plan.len(), 2);
        assert_eq!(report.summary.results.len(), 1);
        assert_eq!(report.summary.results[0].outcome, Outcome::Applied);
        assert_eq!(report.summary.aborted, Some(ReconcileError::Cancelled));
        assert_eq!(report.summary.exit_code, 1);
        assert_eq!(report.summary.counts.applied, 1);
        assert_eq!(gw.writes().len(), 1);
        assert_eq!(gw.quota_of("c-1:api"), Some(QuotaSpec::default()));
    }

    #[tokio::test]
    async fn ambiguous_namespace_aborts_before_any_write() {
        let gw = Arc::new(
            FakeGateway::new()
                .project("c-1", "c-1:p-1", "payments", QuotaSpec::default())
                .namespace("c-1:p-1", "api", QuotaSpec::default())
                .namespace("c-1:p-1", "api", QuotaSpec::default()),
        );
        let targets = vec![payments_target(gw.clone())];

        let report = run(
            &targets,
            &Selection::all(),
            &opts(Mode::Apply, ErrorPolicy::ContinueOnError),
            &CancelToken::never(),
        )
        .await;
        assert_eq!(report.summary.exit_code, 1);
        assert_eq!(report.summary.aborted.unwrap().kind(), "AmbiguousName");
        assert!(gw.writes().is_empty());
    }
}

use pkg_types::resource::ResourceKind;
use tracing::{error, info, warn};

use crate::cancel::CancelToken;
use crate::error::ReconcileError;
use crate::gateway::QuotaGateway;
use crate::plan::{ExecutionResult, PlanItem};
use crate::policy::ErrorPolicy;
use crate::retry::RetryPolicy;

/// Results of applying a plan, in plan order.
///
/// `aborted` is set when processing stopped early: a fatal error, the first
/// failure under fail-fast, or cancellation. Items after that point are not
/// attempted and do not appear in `results`.
#[derive(Debug, Clone, Default)]
pub struct Execution {
    pub results: Vec<ExecutionResult>,
    pub aborted: Option<ReconcileError>,
}

/// Applies plan items one at a time through the gateway.
pub struct Executor<'a> {
    gateway: &'a dyn QuotaGateway,
    policy: ErrorPolicy,
    retry: &'a RetryPolicy,
    cancel: &'a CancelToken,
}

impl<'a> Executor<'a> {
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

    pub async fn apply(&self, items: Vec<PlanItem>) -> Execution {
        let mut execution = Execution::default();
        for item in items {
            if self.cancel.is_cancelled() {
                warn!("Executor: cancelled, remaining items not attempted");
                execution.aborted = Some(ReconcileError::Cancelled);
                break;
            }

            let result = self.apply_one(item).await;
            let stop = match &result.error {
                Some(err) if err.is_always_fatal() => {
                    error!("Executor: aborting run: {}", err);
                    execution.aborted = Some(err.clone());
                    true
                }
                Some(err) if !self.policy.continues() => {
                    warn!("Executor: stopping at first failure: {}", err);
                    execution.aborted = Some(err.clone());
                    true
                }
                Some(_) | None => false,
            };
            execution.results.push(result);
            if stop {
                break;
            }
        }
        execution
    }

    async fn apply_one(&self, item: PlanItem) -> ExecutionResult {
        let payload = item.write_payload();
        let resource = &item.resource;
        let what = resource.to_string();
        let attempted = match resource.kind {
            ResourceKind::Project => {
                self.retry
                    .run(&what, || self.gateway.update_project_quota(resource, &payload))
                    .await
            }
            ResourceKind::Namespace => {
                self.retry
                    .run(&what, || self.gateway.update_namespace_quota(resource, &payload))
                    .await
            }
        };

        match attempted.result {
            Ok(()) => {
                info!(
                    instance = %resource.instance,
                    cluster = %resource.cluster_id,
                    project = %resource.project_label(),
                    namespace = resource.namespace_label().unwrap_or(""),
                    attempts = attempted.attempts,
                    "Executor: applied {} field(s) to {}",
                    item.deltas.len(),
                    what
                );
                ExecutionResult::applied(item, attempted.attempts)
            }
            Err(err) => {
                let err = ReconcileError::from_write(err, resource);
                warn!(
                    instance = %resource.instance,
                    cluster = %resource.cluster_id,
                    project = %resource.project_label(),
                    namespace = resource.namespace_label().unwrap_or(""),
                    attempts = attempted.attempts,
                    "Executor: write to {} failed: {}",
                    what,
                    err
                );
                ExecutionResult::failed(item, err, attempted.attempts)
            }
        }
    }
}

use pkg_types::quota::QuotaSpec;
use pkg_types::resource::{ResourceKind, ResourceRef};
use serde::Serialize;
use std::fmt;

use crate::diff::{self, FieldDelta};
use crate::error::ReconcileError;

/// A resource that drifts from its desired quota.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanItem {
    pub resource: ResourceRef,
    pub observed: QuotaSpec,
    pub desired: QuotaSpec,
    pub deltas: Vec<FieldDelta>,
}

impl PlanItem {
    /// Diff `observed` against `desired`; `None` when nothing drifts.
    pub fn new(resource: ResourceRef, observed: QuotaSpec, desired: QuotaSpec) -> Option<Self> {
        let deltas = diff::compute(&observed, &desired);
        if deltas.is_empty() {
            return None;
        }
        Some(Self {
            resource,
            observed,
            desired,
            deltas,
        })
    }

    /// The partial spec to write: only the drifted fields.
    pub fn write_payload(&self) -> QuotaSpec {
        self.desired.restricted_to(self.deltas.iter().map(|d| d.field))
    }
}

/// Ordered writes for one run: cluster, then project, then that project's
/// namespaces. Also carries the resources skipped while planning.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Plan {
    items: Vec<PlanItem>,
    pub skipped: Vec<ExecutionResult>,
    /// Number of items planned before each entry of `skipped`.
    #[serde(skip)]
    skipped_at: Vec<usize>,
}

impl Plan {
    pub fn items(&self) -> &[PlanItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub(crate) fn push(&mut self, item: PlanItem) {
        debug_assert!(!item.deltas.is_empty());
        self.items.push(item);
    }

    /// Record a resource skipped at the current plan position.
    pub(crate) fn skip(&mut self, result: ExecutionResult) {
        self.skipped_at.push(self.items.len());
        self.skipped.push(result);
    }

    /// Append another plan, keeping both orders.
    pub fn extend(&mut self, other: Plan) {
        let offset = self.items.len();
        for idx in 0..other.skipped.len() {
            self.skipped_at.push(offset + other.skip_position(idx));
        }
        self.items.extend(other.items);
        self.skipped.extend(other.skipped);
    }

    fn skip_position(&self, idx: usize) -> usize {
        self.skipped_at.get(idx).copied().unwrap_or(self.items.len())
    }

    /// Merge planning skips into execution results in plan order.
    ///
    /// `executed[i]` must be the result of `items()[i]`. Skips recorded past
    /// the last executed item are appended.
    pub fn interleave_skipped(&self, executed: Vec<ExecutionResult>) -> Vec<ExecutionResult> {
        let mut out = Vec::with_capacity(executed.len() + self.skipped.len());
        let mut skips = self.skipped.iter().enumerate().peekable();
        for (i, result) in executed.into_iter().enumerate() {
            while let Some((_, skipped)) = skips.next_if(|(idx, _)| self.skip_position(*idx) <= i) {
                out.push(skipped.clone());
            }
            out.push(result);
        }
        out.extend(skips.map(|(_, skipped)| skipped.clone()));
        out
    }

}

/// Identity of a processed resource, resolved or not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Target {
    pub kind: ResourceKind,
    pub instance: String,
    pub cluster_id: String,
    pub project: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Remote id, when the resource was resolved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl Target {
    pub fn unresolved_project(instance: &str, cluster_id: &str, project: &str) -> Self {
        Self {
            kind: ResourceKind::Project,
            instance: instance.to_string(),
            cluster_id: cluster_id.to_string(),
            project: project.to_string(),
            namespace: None,
            id: None,
        }
    }

    pub fn unresolved_namespace(project: &ResourceRef, namespace: &str) -> Self {
        Self {
            kind: ResourceKind::Namespace,
            instance: project.instance.clone(),
            cluster_id: project.cluster_id.clone(),
            project: project.name.clone(),
            namespace: Some(namespace.to_string()),
            id: None,
        }
    }
}

impl From<&ResourceRef> for Target {
    fn from(r: &ResourceRef) -> Self {
        Self {
            kind: r.kind,
            instance: r.instance.clone(),
            cluster_id: r.cluster_id.clone(),
            project: r.project_label().to_string(),
            namespace: r.namespace_label().map(str::to_string),
            id: Some(r.id.clone()),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(
                f,
                "namespace '{}' ({}/{}/{})",
                ns, self.instance, self.cluster_id, self.project
            ),
            None => write!(
                f,
                "project '{}' ({}/{})",
                self.project, self.instance, self.cluster_id
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Applied,
    Failed,
    Skipped,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Applied => write!(f, "applied"),
            Outcome::Failed => write!(f, "failed"),
            Outcome::Skipped => write!(f, "skipped"),
        }
    }
}

/// What happened to one resource. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    pub target: Target,
    /// The executed item; `None` for resources skipped while planning.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item: Option<PlanItem>,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ReconcileError>,
    pub attempts: u32,
}

impl ExecutionResult {
    pub fn applied(item: PlanItem, attempts: u32) -> Self {
        Self {
            target: Target::from(&item.resource),
            item: Some(item),
            outcome: Outcome::Applied,
            error: None,
            attempts,
        }
    }

    pub fn failed(item: PlanItem, error: ReconcileError, attempts: u32) -> Self {
        Self {
            target: Target::from(&item.resource),
            item: Some(item),
            outcome: Outcome::Failed,
            error: Some(error),
            attempts,
        }
    }

    pub fn skipped(target: Target, error: ReconcileError) -> Self {
        Self {
            target,
            item: None,
            outcome: Outcome::Skipped,
            error: Some(error),
            attempts: 0,
        }
    }
}

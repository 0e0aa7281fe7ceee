//! Quota reconciliation engine.
//!
//! Reads observed project and namespace quotas through a [`gateway::QuotaGateway`],
//! diffs them against the declared config, and applies only the drifted
//! fields with bounded retries.

pub mod cancel;
pub mod diff;
pub mod error;
pub mod executor;
pub mod gateway;
pub mod plan;
pub mod planner;
pub mod policy;
pub mod reconcile;
pub mod render;
pub mod report;
pub mod retry;
pub mod summary;

#[cfg(test)]
pub(crate) mod testing;

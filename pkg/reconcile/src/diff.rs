//! Field-level delta between observed and desired quota.

use pkg_types::quota::{QuotaField, QuotaSpec, QuotaValue};
use serde::Serialize;
use std::cmp::Ordering;

/// One field whose observed value differs from the declared one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FieldDelta {
    pub field: QuotaField,
    /// `None` when the resource has no value set for the field.
    pub current: Option<QuotaValue>,
    pub desired: QuotaValue,
}

/// Compute the deltas needed to bring `observed` to `desired`.
///
/// Only fields declared in `desired` are enforced. A declared field yields a
/// delta when the observed field is unset or its normalized value differs;
/// string spelling (`2` vs `2000m`) never matters. Output follows
/// [`QuotaField::ALL`] order.
pub fn compute(observed: &QuotaSpec, desired: &QuotaSpec) -> Vec<FieldDelta> {
    QuotaField::ALL
        .into_iter()
        .filter_map(|field| {
            let want = desired.get(field)?;
            let have = observed.get(field);
            let drifted = match have {
                None => true,
                Some(have) => have.compare(&want) != Ordering::Equal,
            };
            drifted.then_some(FieldDelta {
                field,
                current: have,
                desired: want,
            })
        })
        .collect()
}

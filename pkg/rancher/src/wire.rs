//! Rancher JSON shapes for projects and quota documents.
//!
//! Rancher has used two spellings for the same four fields over time:
//! `limit.cpu` / `reservation.cpu` and `limit.limitsCpu` / `limit.requestsCpu`.
//! Both are read; writes use the `limitsCpu` family and drop the other.

use pkg_reconcile::gateway::GatewayError;
use pkg_types::quota::{QuotaField, QuotaSpec, QuotaValue};
use pkg_types::resource::{ClusterRef, ResourceRef};
use serde_json::{Map, Value};

/// Key of a field in the `limit` object as Rancher writes it.
fn rancher_key(field: QuotaField) -> &'static str {
    match field {
        QuotaField::CpuLimit => "limitsCpu",
        QuotaField::MemoryLimit => "limitsMemory",
        QuotaField::CpuReservation => "requestsCpu",
        QuotaField::MemoryReservation => "requestsMemory",
    }
}

/// Older `(section, key)` spelling of a field.
fn legacy_key(field: QuotaField) -> (&'static str, &'static str) {
    match field {
        QuotaField::CpuLimit => ("limit", "cpu"),
        QuotaField::MemoryLimit => ("limit", "memory"),
        QuotaField::CpuReservation => ("reservation", "cpu"),
        QuotaField::MemoryReservation => ("reservation", "memory"),
    }
}

fn str_at<'a>(v: &'a Value, section: &str, key: &str) -> Option<&'a str> {
    v.get(section)?
        .get(key)?
        .as_str()
        .filter(|s| !s.trim().is_empty())
}

/// Decode a `resourceQuota`-shaped document (`{"limit": {...}, "reservation": {...}}`).
pub fn quota_from_document(doc: &Value) -> Result<QuotaSpec, GatewayError> {
    let mut spec = QuotaSpec::default();
    for field in QuotaField::ALL {
        let (section, key) = legacy_key(field);
        let raw = str_at(doc, section, key).or_else(|| str_at(doc, "limit", rancher_key(field)));
        if let Some(raw) = raw {
            let value = QuotaValue::parse(raw, field.class())
                .map_err(|e| GatewayError::Decode(format!("{}: {}", field, e)))?;
            spec = spec.with(field, Some(value));
        }
    }
    Ok(spec)
}

/// Quota of a project object: `resourceQuota`, else `spec.resourceQuota`.
pub fn project_quota(project: &Value) -> Result<QuotaSpec, GatewayError> {
    let doc = project
        .get("resourceQuota")
        .filter(|v| !v.is_null())
        .or_else(|| project.pointer("/spec/resourceQuota").filter(|v| !v.is_null()));
    match doc {
        Some(doc) => quota_from_document(doc),
        None => Ok(QuotaSpec::default()),
    }
}

/// Display name of a project: `spec.displayName`, then `displayName`, then `name`, then `id`.
pub fn project_ref(cluster: &ClusterRef, project: &Value) -> Result<ResourceRef, GatewayError> {
    let id = project
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| GatewayError::Decode("project without an id".to_string()))?;
    let name = [
        project.pointer("/spec/displayName"),
        project.get("displayName"),
        project.get("name"),
    ]
    .into_iter()
    .flatten()
    .filter_map(Value::as_str)
    .find(|s| !s.is_empty())
    .unwrap_or(id);
    Ok(ResourceRef::project(cluster, id, name))
}

/// Write the fields of `partial` into `doc.limit` with canonical values,
/// leaving every other key in place.
pub fn merge_quota(doc: &mut Value, partial: &QuotaSpec) {
    if !doc.is_object() {
        *doc = Value::Object(Map::new());
    }
    for (field, value) in partial.iter() {
        let (section, key) = legacy_key(field);
        if let Some(old) = doc.get_mut(section).and_then(Value::as_object_mut) {
            old.remove(key);
        }
        if let Some(obj) = doc.as_object_mut() {
            let limit = obj
                .entry("limit")
                .or_insert_with(|| Value::Object(Map::new()));
            if !limit.is_object() {
                *limit = Value::Object(Map::new());
            }
            if let Some(limit) = limit.as_object_mut() {
                limit.insert(rancher_key(field).to_string(), Value::String(value.format()));
            }
        }
    }
}

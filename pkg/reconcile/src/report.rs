//! Read-only HTML report of the quotas currently set on selected clusters.

use chrono::{DateTime, Utc};
use html_escape::encode_text;
use pkg_types::config::InstanceConfig;
use pkg_types::quota::{QuotaField, QuotaSpec};
use pkg_types::resource::{ClusterRef, ResourceRef};
use std::fmt::Write;
use tracing::{info, warn};

use crate::error::ReconcileError;
use crate::gateway::{GatewayError, QuotaGateway};
use crate::planner::Selection;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone)]
pub struct NamespaceQuotaData {
    pub namespace: ResourceRef,
    pub quota: QuotaSpec,
}

#[derive(Debug, Clone)]
pub struct ProjectQuotaData {
    pub project: ResourceRef,
    pub quota: QuotaSpec,
    pub namespaces: Vec<NamespaceQuotaData>,
}

#[derive(Debug, Clone)]
pub struct ClusterQuotaData {
    pub cluster_id: String,
    /// Config key of the cluster.
    pub cluster_name: String,
    pub projects: Vec<ProjectQuotaData>,
}

#[derive(Debug, Clone)]
pub struct InstanceReport {
    pub instance: String,
    pub url: String,
    pub clusters: Vec<ClusterQuotaData>,
}

/// Read every project and namespace quota of the selected clusters.
///
/// Credential failures and unknown clusters abort; any other read failure
/// drops the affected project (or its namespaces) with a warning.
pub async fn collect(
    config: &InstanceConfig,
    selection: &Selection,
    gateway: &dyn QuotaGateway,
    retry: &RetryPolicy,
) -> Result<InstanceReport, ReconcileError> {
    let mut clusters = Vec::new();
    for cluster in selection.clusters_of(config) {
        let cref = ClusterRef::new(&config.name, &cluster.cluster_id);
        info!(
            instance = %cref.instance,
            cluster = %cref.cluster_id,
            "Report: collecting quotas for cluster {}",
            cluster.name
        );
        let projects = retry
            .run(&format!("list projects of {}", cref), || {
                gateway.list_projects(&cref)
            })
            .await
            .result
            .map_err(|err| match err {
                GatewayError::NotFound(_) => ReconcileError::ClusterNotFound {
                    instance: cref.instance.clone(),
                    cluster_id: cref.cluster_id.clone(),
                },
                other => ReconcileError::from_read(
                    other,
                    &cref.instance,
                    format!("projects of {}", cref),
                ),
            })?;

        let mut data = ClusterQuotaData {
            cluster_id: cluster.cluster_id.clone(),
            cluster_name: cluster.name.clone(),
            projects: Vec::new(),
        };
        for project in projects {
            if let Some(p) = collect_project(gateway, retry, project).await? {
                data.projects.push(p);
            }
        }
        clusters.push(data);
    }

    Ok(InstanceReport {
        instance: config.name.clone(),
        url: config.url.clone(),
        clusters,
    })
}

/// `Ok(None)` when the project quota could not be read.
async fn collect_project(
    gateway: &dyn QuotaGateway,
    retry: &RetryPolicy,
    project: ResourceRef,
) -> Result<Option<ProjectQuotaData>, ReconcileError> {
    let what = project.to_string();
    let quota = match retry
        .run(&what, || gateway.get_project_quota(&project))
        .await
        .result
    {
        Ok(quota) => quota,
        Err(GatewayError::Unauthorized(detail)) => {
            return Err(ReconcileError::Unauthorized {
                instance: project.instance.clone(),
                detail,
            });
        }
        Err(err) => {
            warn!(project = %project.name, "Report: failed to read {}: {}", what, err);
            return Ok(None);
        }
    };

    let listed = match retry
        .run(&what, || gateway.list_namespaces(&project))
        .await
        .result
    {
        Ok(listed) => listed,
        Err(GatewayError::Unauthorized(detail)) => {
            return Err(ReconcileError::Unauthorized {
                instance: project.instance.clone(),
                detail,
            });
        }
        Err(err) => {
            warn!(
                project = %project.name,
                "Report: failed to list namespaces of {}: {}", what, err
            );
            Vec::new()
        }
    };

    let mut namespaces = Vec::with_capacity(listed.len());
    for ns in listed {
        match retry
            .run(&ns.to_string(), || gateway.get_namespace_quota(&ns))
            .await
            .result
        {
            Ok(quota) => namespaces.push(NamespaceQuotaData {
                namespace: ns,
                quota,
            }),
            Err(GatewayError::Unauthorized(detail)) => {
                return Err(ReconcileError::Unauthorized {
                    instance: ns.instance.clone(),
                    detail,
                });
            }
            Err(err) => warn!(namespace = %ns.name, "Report: failed to read {}: {}", ns, err),
        }
    }

    Ok(Some(ProjectQuotaData {
        project,
        quota,
        namespaces,
    }))
}

const STYLE: &str = "\
body { font-family: -apple-system, 'Segoe UI', Roboto, sans-serif; margin: 0; padding: 2rem; background: #f5f5f5; color: #333; }
.header { margin-bottom: 2rem; border-bottom: 1px solid #ddd; }
.meta { color: #666; font-size: 0.9rem; }
section.cluster { background: #fff; border-radius: 8px; padding: 1.5rem; margin-bottom: 2rem; }
.project { margin-top: 1.5rem; border-top: 1px solid #ddd; padding-top: 1rem; }
.namespace { margin: 1rem 0 1rem 2rem; padding: 1rem; background: #f5f5f5; border-radius: 4px; }
.id { font-weight: normal; color: #666; font-size: 0.85em; }
table { width: 100%; border-collapse: collapse; font-size: 0.9rem; }
th, td { padding: 0.5rem 0.75rem; text-align: left; border-bottom: 1px solid #ddd; }
";

fn quota_table(out: &mut String, quota: &QuotaSpec) {
    out.push_str("<table><thead><tr>");
    for field in QuotaField::ALL {
        let _ = write!(out, "<th>{}</th>", field.label());
    }
    out.push_str("</tr></thead><tbody>");
    if quota.is_empty() {
        out.push_str("<tr><td colspan=\"4\"><em>No quota set</em></td></tr>");
    } else {
        out.push_str("<tr>");
        for field in QuotaField::ALL {
            let cell = quota
                .get(field)
                .map(|v| v.format())
                .unwrap_or_else(|| "\u{2014}".to_string());
            let _ = write!(out, "<td>{}</td>", encode_text(&cell));
        }
        out.push_str("</tr>");
    }
    out.push_str("</tbody></table>\n");
}

fn project_section(out: &mut String, p: &ProjectQuotaData) {
    let _ = writeln!(
        out,
        "<div class=\"project\"><h3>{} <span class=\"id\">({})</span></h3>",
        encode_text(&p.project.name),
        encode_text(&p.project.id)
    );
    out.push_str("<h4>Project quota</h4>\n");
    quota_table(out, &p.quota);
    let _ = writeln!(out, "<h4>Namespaces ({})</h4>", p.namespaces.len());
    if p.namespaces.is_empty() {
        out.push_str("<p><em>No namespaces in project</em></p>\n");
    }
    for ns in &p.namespaces {
        let _ = writeln!(
            out,
            "<div class=\"namespace\"><h5>{}</h5>",
            encode_text(&ns.namespace.name)
        );
        quota_table(out, &ns.quota);
        out.push_str("</div>\n");
    }
    out.push_str("</div>\n");
}

/// Render a self-contained HTML document for the collected instances.
pub fn render_html(title: &str, reports: &[InstanceReport], generated_at: DateTime<Utc>) -> String {
    let title = encode_text(title);
    let mut out = String::new();
    let _ = write!(
        out,
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"UTF-8\">\n<title>{}</title>\n<style>\n{}</style>\n</head>\n<body>\n",
        title, STYLE
    );
    let _ = writeln!(out, "<div class=\"header\"><h1>{}</h1>", title);
    let _ = writeln!(
        out,
        "<div class=\"meta\">Generated: {}</div></div>",
        generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    );

    for report in reports {
        for cluster in &report.clusters {
            let _ = writeln!(
                out,
                "<section class=\"cluster\"><h2>{} <span class=\"id\">({})</span></h2>",
                encode_text(&cluster.cluster_name),
                encode_text(&cluster.cluster_id)
            );
            let _ = writeln!(
                out,
                "<div class=\"meta\">Instance: {} \u{b7} {}</div>",
                encode_text(&report.instance),
                encode_text(&report.url)
            );
            if cluster.projects.is_empty() {
                out.push_str("<p><em>No projects</em></p>\n");
            }
            for p in &cluster.projects {
                project_section(&mut out, p);
            }
            out.push_str("</section>\n");
        }
    }
    out.push_str("</body>\n</html>\n");
    out
}

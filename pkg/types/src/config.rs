use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::quota::{QuotaField, QuotaSpec};
use crate::secret::Secret;
use crate::validate::{validate_base_url, validate_namespace_name};

/// Control-plane instance configuration file (YAML).
///
/// Example `prod.yaml`:
/// ```yaml
/// url: https://rancher.example.com
/// token_ref: RANCHER_PROD_TOKEN
/// clusters:
///   production:
///     cluster_id: c-abc12
///     projects:
///       payments:
///         project_quota:
///           cpu_limit: 2000m
///           memory_limit: 4Gi
///         namespace_quotas:
///           payments-api:
///             cpu_limit: 500m
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InstanceConfigFile {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub token: Option<Secret>,
    /// Name of the environment variable holding the token.
    #[serde(default, alias = "token-ref")]
    pub token_ref: Option<String>,
    #[serde(default, alias = "insecure-skip-tls-verify")]
    pub insecure_skip_tls_verify: bool,
    #[serde(default, alias = "timeout-secs")]
    pub timeout_secs: Option<u64>,
    /// Keyed by name; clusters, projects and namespaces are planned in
    /// sorted name order, not file order.
    #[serde(default)]
    pub clusters: BTreeMap<String, ClusterConfigFile>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClusterConfigFile {
    #[serde(default, alias = "cluster-id")]
    pub cluster_id: Option<String>,
    #[serde(default)]
    pub projects: BTreeMap<String, ProjectConfigFile>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectConfigFile {
    /// Pins the project id, bypassing name resolution.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, alias = "project-quota")]
    pub project_quota: QuotaSpecFile,
    #[serde(default, alias = "namespace-quotas")]
    pub namespace_quotas: BTreeMap<String, QuotaSpecFile>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QuotaSpecFile {
    #[serde(default)]
    pub cpu_limit: Option<Quantity>,
    #[serde(default)]
    pub memory_limit: Option<Quantity>,
    #[serde(default)]
    pub cpu_reservation: Option<Quantity>,
    #[serde(default)]
    pub memory_reservation: Option<Quantity>,
}

/// A quota as written in YAML: `2000m`, `4Gi`, or a bare number.
///
/// Floats are captured so they reach the quota parser and fail there with
/// the field name attached, rather than as an opaque untagged-enum error.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Quantity {
    Number(u64),
    Float(f64),
    Text(String),
}

impl Quantity {
    fn as_text(&self) -> String {
        match self {
            Quantity::Number(n) => n.to_string(),
            Quantity::Float(n) => n.to_string(),
            Quantity::Text(s) => s.clone(),
        }
    }
}

impl QuotaSpecFile {
    fn raw(&self, field: QuotaField) -> Option<&Quantity> {
        match field {
            QuotaField::CpuLimit => self.cpu_limit.as_ref(),
            QuotaField::MemoryLimit => self.memory_limit.as_ref(),
            QuotaField::CpuReservation => self.cpu_reservation.as_ref(),
            QuotaField::MemoryReservation => self.memory_reservation.as_ref(),
        }
    }

    /// Parse every declared field; the error names the offending field.
    pub fn parse(&self) -> Result<QuotaSpec> {
        let mut spec = QuotaSpec::default();
        for field in QuotaField::ALL {
            if let Some(raw) = self.raw(field) {
                spec = spec
                    .with_parsed(field, &raw.as_text())
                    .with_context(|| format!("field '{}'", field.key()))?;
            }
        }
        Ok(spec)
    }
}

// --- Validated configuration handed to the engine ---

/// Desired state and connection settings for one control-plane instance.
#[derive(Debug, Clone)]
pub struct InstanceConfig {
    pub name: String,
    pub url: String,
    pub token: Secret,
    pub insecure_skip_tls_verify: bool,
    pub timeout_secs: Option<u64>,
    pub clusters: Vec<ClusterConfig>,
}

#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Key of the cluster in the config file.
    pub name: String,
    pub cluster_id: String,
    pub projects: Vec<ProjectConfig>,
}

#[derive(Debug, Clone)]
pub struct ProjectConfig {
    pub name: String,
    pub id: Option<String>,
    pub quota: QuotaSpec,
    pub namespaces: Vec<NamespaceConfig>,
}

#[derive(Debug, Clone)]
pub struct NamespaceConfig {
    pub name: String,
    pub quota: QuotaSpec,
}

impl InstanceConfig {
    /// Load and validate an instance config, resolving the token from the
    /// process environment.
    pub fn load(path: &Path, token_env_var: Option<&str>) -> Result<Self> {
        Self::load_with_env(path, token_env_var, |key| std::env::var(key).ok())
    }

    /// Like [`InstanceConfig::load`] with an explicit environment lookup.
    pub fn load_with_env(
        path: &Path,
        token_env_var: Option<&str>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let file: InstanceConfigFile = load_config_file(path)?;
        let default_name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "default".to_string());
        Self::from_file(file, &default_name, token_env_var, env)
            .with_context(|| format!("invalid config {}", path.display()))
    }

    /// Validate a parsed file. Quota strings are parsed here, so an
    /// `InvalidQuotaFormat` surfaces before any remote call.
    pub fn from_file(
        file: InstanceConfigFile,
        default_name: &str,
        token_env_var: Option<&str>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let url = match file.url {
            Some(u) if !u.trim().is_empty() => u.trim().trim_end_matches('/').to_string(),
            _ => bail!("config must contain 'url'"),
        };
        validate_base_url(&url)?;

        // CLI env var > token_ref > literal token
        let token = if let Some(var) = token_env_var {
            env(var).map(Secret::new)
        } else if let Some(var) = file.token_ref.as_deref() {
            env(var).map(Secret::new)
        } else {
            file.token
        };
        let token = match token {
            Some(t) if !t.is_empty() => t,
            _ => bail!(
                "token must be provided via 'token' or 'token_ref' in config, or --token-env-var"
            ),
        };

        let mut clusters = Vec::with_capacity(file.clusters.len());
        for (cluster_name, cluster) in file.clusters {
            let cluster_id = match cluster.cluster_id {
                Some(id) if !id.trim().is_empty() => id,
                _ => bail!("cluster '{}' must have 'cluster_id'", cluster_name),
            };

            let mut projects = Vec::with_capacity(cluster.projects.len());
            for (project_name, project) in cluster.projects {
                let quota = project.project_quota.parse().with_context(|| {
                    format!(
                        "project_quota of project '{}' in cluster '{}'",
                        project_name, cluster_name
                    )
                })?;

                let mut namespaces = Vec::with_capacity(project.namespace_quotas.len());
                for (ns_name, ns_quota) in project.namespace_quotas {
                    validate_namespace_name(&ns_name).with_context(|| {
                        format!(
                            "project '{}' in cluster '{}'",
                            project_name, cluster_name
                        )
                    })?;
                    let quota = ns_quota.parse().with_context(|| {
                        format!(
                            "namespace_quotas.{} of project '{}' in cluster '{}'",
                            ns_name, project_name, cluster_name
                        )
                    })?;
                    namespaces.push(NamespaceConfig {
                        name: ns_name,
                        quota,
                    });
                }

                projects.push(ProjectConfig {
                    name: project_name,
                    id: project.id.filter(|id| !id.trim().is_empty()),
                    quota,
                    namespaces,
                });
            }

            clusters.push(ClusterConfig {
                name: cluster_name,
                cluster_id,
                projects,
            });
        }

        Ok(Self {
            name: file.name.unwrap_or_else(|| default_name.to_string()),
            url,
            token,
            insecure_skip_tls_verify: file.insecure_skip_tls_verify,
            timeout_secs: file.timeout_secs,
            clusters,
        })
    }
}

/// Load a YAML config file. Unlike optional daemon configs, a missing
/// desired-state file is an error.
pub fn load_config_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("config file not found or unreadable: {}", path.display()))?;
    let config: T = serde_yaml::from_str(&content)
        .with_context(|| format!("config file {} is not valid YAML", path.display()))?;
    Ok(config)
}

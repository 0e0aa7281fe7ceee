use anyhow::{Result, bail};
use pkg_constants::api::MAX_NAMESPACE_NAME_LEN;

/// Check a namespace key from `namespace_quotas` before any remote call.
///
/// Namespaces are single DNS-1123 labels: no dots, only `[a-z0-9-]`, and
/// alphanumeric at both ends. The error points at the first bad character.
pub fn validate_namespace_name(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("namespace name must not be empty");
    }
    if name.len() > MAX_NAMESPACE_NAME_LEN {
        bail!(
            "namespace '{}' is {} characters long, Kubernetes allows at most {}",
            name,
            name.len(),
            MAX_NAMESPACE_NAME_LEN
        );
    }
    let bad = name
        .char_indices()
        .find(|(_, c)| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-'));
    match bad {
        Some((pos, '.')) => bail!(
            "namespace '{}' contains '.' at position {}: a namespace is a single DNS label",
            name,
            pos
        ),
        Some((pos, c)) => bail!(
            "namespace '{}' has invalid character {:?} at position {} (allowed: a-z, 0-9, '-')",
            name,
            c,
            pos
        ),
        None => {}
    }
    if name.starts_with('-') || name.ends_with('-') {
        bail!(
            "namespace '{}' must start and end with a lowercase letter or digit",
            name
        );
    }
    Ok(())
}

/// Validate a control-plane base URL: http(s) scheme and a host.
pub fn validate_base_url(url: &str) -> Result<()> {
    let rest = match url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
    {
        Some(rest) => rest,
        None => bail!("url '{}' must start with http:// or https://", url),
    };
    if rest.trim_end_matches('/').is_empty() {
        bail!("url '{}' has no host", url);
    }
    Ok(())
}

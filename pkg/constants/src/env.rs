//! Environment variable names read by quotactl.

/// When set to `1`, `true` or `yes`, TLS certificates are not verified.
pub const INSECURE_SKIP_VERIFY_ENV: &str = "RANCHER_INSECURE_SKIP_VERIFY";

/// Standard tracing filter override.
pub const LOG_FILTER_ENV: &str = "RUST_LOG";

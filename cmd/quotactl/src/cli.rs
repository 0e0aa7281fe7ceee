use clap::{ArgGroup, Args, Parser, Subcommand, ValueEnum};
use pkg_reconcile::planner::Selection;
use pkg_reconcile::policy::ErrorPolicy;
use pkg_reconcile::reconcile::Mode;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "quotactl",
    about = "Reconcile Rancher project and namespace quotas against declared config"
)]
pub struct Cli {
    /// Log verbosity; RUST_LOG overrides it when set
    #[arg(long, global = true, default_value = "info",
          value_parser = ["trace", "debug", "info", "warn", "error"])]
    pub log_level: String,

    /// Log record format on stderr
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Plan quota changes and optionally apply them
    Apply(ApplyArgs),
    /// Write an HTML report of the quotas currently set
    Report(ReportArgs),
}

/// Flags shared by every subcommand.
#[derive(Args, Debug)]
pub struct ConnectArgs {
    /// Instance config file; repeat for several instances
    #[arg(long = "config", short = 'c', required = true)]
    pub configs: Vec<PathBuf>,

    /// Only these instances (by name)
    #[arg(long = "instance")]
    pub instances: Vec<String>,

    /// Only these clusters (cluster id or config key)
    #[arg(long = "cluster")]
    pub clusters: Vec<String>,

    /// Read the API token from this environment variable
    #[arg(long)]
    pub token_env_var: Option<String>,

    /// Skip TLS certificate verification
    #[arg(long)]
    pub insecure: bool,
}

#[derive(Args, Debug)]
#[command(group(ArgGroup::new("mode").required(true).args(["dry_run", "apply"])))]
pub struct ApplyArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,

    /// Only these projects (configured name or pinned id)
    #[arg(long = "project", conflicts_with = "all_projects")]
    pub projects: Vec<String>,

    /// Every configured project of the selected clusters
    #[arg(long)]
    pub all_projects: bool,

    /// Show the plan without writing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Apply the plan
    #[arg(long)]
    pub apply: bool,

    /// Keep going after a failed resource
    #[arg(long)]
    pub continue_on_error: bool,

    /// Run-level deadline in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Stdout format for the plan and summary
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub output: OutputFormat,
}

#[derive(Args, Debug)]
pub struct ReportArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,

    /// HTML file to write
    #[arg(long, short = 'o')]
    pub output: PathBuf,
}

impl ApplyArgs {
    pub fn mode(&self) -> Mode {
        if self.apply { Mode::Apply } else { Mode::DryRun }
    }

    pub fn policy(&self) -> ErrorPolicy {
        ErrorPolicy::from_flag(self.continue_on_error)
    }

    pub fn selection(&self) -> Selection {
        Selection {
            instances: self.connect.instances.clone(),
            clusters: self.connect.clusters.clone(),
            projects: self.projects.clone(),
            all_projects: self.all_projects,
        }
    }
}

impl ReportArgs {
    pub fn selection(&self) -> Selection {
        Selection {
            instances: self.connect.instances.clone(),
            clusters: self.connect.clusters.clone(),
            ..Selection::all()
        }
    }
}

/// `1`, `true` or `yes`, in any case.
pub fn flag_enabled(value: Option<&str>) -> bool {
    value.is_some_and(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
}

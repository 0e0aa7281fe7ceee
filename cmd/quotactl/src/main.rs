mod cli;

use anyhow::{Context, bail};
use clap::Parser;
use pkg_constants::env::{INSECURE_SKIP_VERIFY_ENV, LOG_FILTER_ENV};
use pkg_constants::exit::EXIT_FATAL;
use pkg_rancher::RancherClient;
use pkg_reconcile::cancel::{CancelHandle, cancel_pair};
use pkg_reconcile::error::ReconcileError;
use pkg_reconcile::plan::Plan;
use pkg_reconcile::reconcile::{InstanceTarget, Mode, RunOptions, RunReport, run, validate_selection};
use pkg_reconcile::retry::RetryPolicy;
use pkg_reconcile::{render, report};
use pkg_types::config::InstanceConfig;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::cli::{ApplyArgs, Cli, Command, ConnectArgs, LogFormat, OutputFormat, ReportArgs};

fn init_logging(level: &str, format: LogFormat) {
    let filter = match std::env::var(LOG_FILTER_ENV) {
        Ok(directives) if !directives.trim().is_empty() => EnvFilter::new(directives),
        _ => EnvFilter::new(level),
    };
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Text => subscriber.init(),
    }
}

fn load_configs(connect: &ConnectArgs) -> anyhow::Result<Vec<InstanceConfig>> {
    let mut seen = HashSet::new();
    let mut configs = Vec::with_capacity(connect.configs.len());
    for path in &connect.configs {
        let config = InstanceConfig::load(path, connect.token_env_var.as_deref())?;
        if !seen.insert(config.name.clone()) {
            bail!(
                "instance '{}' is configured more than once ({})",
                config.name,
                path.display()
            );
        }
        info!(
            "Config: loaded instance '{}' from {} ({} cluster(s))",
            config.name,
            path.display(),
            config.clusters.len()
        );
        configs.push(config);
    }
    Ok(configs)
}

fn build_targets(
    configs: Vec<InstanceConfig>,
    connect: &ConnectArgs,
) -> anyhow::Result<Vec<InstanceTarget>> {
    let env_insecure = cli::flag_enabled(std::env::var(INSECURE_SKIP_VERIFY_ENV).ok().as_deref());
    let force_insecure = connect.insecure || env_insecure;
    configs
        .into_iter()
        .map(|config| {
            let client = RancherClient::from_config(&config, force_insecure)
                .with_context(|| format!("failed to build HTTP client for '{}'", config.name))?;
            if force_insecure || config.insecure_skip_tls_verify {
                warn!("TLS verification disabled for instance '{}'", config.name);
            }
            Ok(InstanceTarget {
                config,
                gateway: Arc::new(client),
            })
        })
        .collect()
}

/// Cancel on Ctrl-C or when the run-level deadline passes.
fn spawn_canceller(handle: CancelHandle, timeout: Option<u64>) {
    tokio::spawn(async move {
        let deadline = async {
            match timeout {
                Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => warn!("Interrupted, stopping after the current item"),
            _ = deadline => warn!("Run timeout reached, stopping after the current item"),
        }
        handle.cancel();
    });
}

#[derive(Serialize)]
struct DryRunOutput<'a> {
    plan: &'a Plan,
    exit_code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    aborted: Option<&'a ReconcileError>,
}

fn print_report(report: &RunReport, format: OutputFormat) -> anyhow::Result<()> {
    match (format, report.mode) {
        (OutputFormat::Text, Mode::DryRun) => {
            print!("{}", render::plan_text(&report.plan));
            if let Some(err) = &report.summary.aborted {
                println!("Aborted: [{}] {}", err.kind(), err);
            }
        }
        (OutputFormat::Text, Mode::Apply) => {
            print!("{}", render::plan_text(&report.plan));
            println!();
            print!("{}", render::summary_text(&report.summary));
        }
        (OutputFormat::Json, Mode::DryRun) => {
            let out = DryRunOutput {
                plan: &report.plan,
                exit_code: report.summary.exit_code,
                aborted: report.summary.aborted.as_ref(),
            };
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        (OutputFormat::Json, Mode::Apply) => {
            println!("{}", serde_json::to_string_pretty(&report.summary)?);
        }
    }
    Ok(())
}

async fn apply(args: ApplyArgs) -> anyhow::Result<i32> {
    let configs = load_configs(&args.connect)?;
    let targets = build_targets(configs, &args.connect)?;

    let (handle, token) = cancel_pair();
    spawn_canceller(handle, args.timeout);

    let opts = RunOptions {
        mode: args.mode(),
        policy: args.policy(),
        retry: RetryPolicy::default(),
    };
    info!(
        "Starting {} run over {} instance(s), policy {:?}",
        if opts.mode == Mode::Apply { "apply" } else { "dry-run" },
        targets.len(),
        opts.policy
    );

    let report = run(&targets, &args.selection(), &opts, &token).await;
    print_report(&report, args.output)?;
    Ok(report.summary.exit_code)
}

async fn write_report(args: ReportArgs) -> anyhow::Result<i32> {
    let configs = load_configs(&args.connect)?;
    let targets = build_targets(configs, &args.connect)?;
    let selection = args.selection();
    let retry = RetryPolicy::default();
    validate_selection(&targets, &selection)?;

    let selected: Vec<&InstanceTarget> = targets
        .iter()
        .filter(|t| selection.matches_instance(&t.config))
        .collect();

    let mut reports = Vec::with_capacity(selected.len());
    for target in selected {
        let collected = report::collect(
            &target.config,
            &selection,
            target.gateway.as_ref(),
            &retry,
        )
        .await
        .with_context(|| format!("failed to collect quotas from '{}'", target.config.name))?;
        reports.push(collected);
    }

    let html = report::render_html("Rancher quota report", &reports, chrono::Utc::now());
    tokio::fs::write(&args.output, html)
        .await
        .with_context(|| format!("failed to write {}", args.output.display()))?;
    info!("Report written to {}", args.output.display());
    Ok(pkg_constants::exit::EXIT_SUCCESS)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.log_format);

    let outcome = match cli.command {
        Command::Apply(args) => apply(args).await,
        Command::Report(args) => write_report(args).await,
    };
    let code = match outcome {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            EXIT_FATAL
        }
    };
    std::process::exit(code);
}

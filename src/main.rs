mod classify;
mod collectors;
mod config;
mod metrics;
mod partition;
mod remote;
mod report;
mod survey;

use clap::Parser;
use collectors::checks::probe_client;
use config::Config;
use metrics::Metrics;
use remote::FleetExecutor;
use report::RunStamp;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use survey::{load_host_list, local_host_name, run_fleet, Surveyor};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_PATH: &str = "./config.yaml";

#[derive(Parser, Debug)]
#[command(name = "fleet-survey")]
#[command(version)]
struct Cli {
    /// Host list, one name per line.
    #[arg(long, default_value = "./hosts.txt", conflicts_with = "local")]
    hosts: PathBuf,
    /// Survey this machine and print the report as JSON on stdout.
    #[arg(long)]
    local: bool,
    /// Optional YAML config; defaults apply when absent.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    output_dir: Option<PathBuf>,
    #[arg(long)]
    concurrency: Option<usize>,
    /// Per-host limit for remote surveys, e.g. `90s` or `5m`.
    #[arg(long, value_parser = humantime::parse_duration)]
    host_timeout: Option<Duration>,
    /// Write Prometheus textfile metrics here after the run.
    #[arg(long)]
    metrics_file: Option<PathBuf>,
    #[arg(long)]
    print_default_config: bool,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return;
    }

    let cfg = match load_config(&cli) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(error = %err, "failed to load configuration");
            std::process::exit(1);
        }
    };
    let classifier = match cfg.classifier() {
        Ok(classifier) => classifier,
        Err(err) => {
            error!(error = %err, "invalid internal range table");
            std::process::exit(1);
        }
    };
    debug!(intervals = classifier.interval_count(), "internal range table compiled");
    let surveyor = Arc::new(Surveyor::new(
        cfg.probes.clone(),
        classifier,
        probe_client(),
    ));

    if cli.local {
        let report = surveyor.survey_local(&local_host_name()).await;
        match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{json}"),
            Err(err) => {
                error!(error = %err, "failed to encode report");
                std::process::exit(1);
            }
        }
        return;
    }

    let hosts = match load_host_list(&cli.hosts) {
        Ok(hosts) => hosts,
        Err(err) => {
            error!(error = %err, "nothing to survey");
            std::process::exit(1);
        }
    };

    let started = RunStamp::now();
    info!(
        hosts = hosts.len(),
        concurrency = cfg.host_concurrency,
        output_dir = %cfg.output_dir.display(),
        "fleet survey started"
    );
    let executor = Arc::new(FleetExecutor::new(&cfg.remote, surveyor));
    let summary = match run_fleet(hosts, executor, &cfg.output_dir, cfg.host_concurrency).await {
        Ok(summary) => summary,
        Err(err) => {
            error!(error = %err, "fleet survey aborted");
            std::process::exit(1);
        }
    };
    info!(
        succeeded = summary.succeeded(),
        failed = summary.failed(),
        files = summary.files().count(),
        "fleet survey finished"
    );

    if let Some(path) = &cli.metrics_file {
        let written = Metrics::new()
            .map_err(|err| err.to_string())
            .and_then(|metrics| {
                metrics.record_fleet(&summary, &started);
                metrics.write_textfile(path).map_err(|err| err.to_string())
            });
        if let Err(err) = written {
            warn!(path = %path.display(), error = %err, "metrics file not written");
        }
    }
}

/// Explicit `--config` must load; the default path is used only if present.
fn load_config(cli: &Cli) -> Result<Config, config::ConfigError> {
    let mut cfg = match &cli.config {
        Some(path) => Config::load_from_file(path)?,
        None if std::path::Path::new(DEFAULT_CONFIG_PATH).exists() => {
            Config::load_from_file(DEFAULT_CONFIG_PATH)?
        }
        None => Config::default(),
    };

    if let Some(dir) = &cli.output_dir {
        cfg.output_dir = dir.clone();
    }
    if let Some(n) = cli.concurrency {
        cfg.host_concurrency = n;
    }
    if let Some(limit) = cli.host_timeout {
        cfg.remote.host_timeout_secs = limit.as_secs().max(1);
    }
    cfg.validate()?;
    Ok(cfg)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

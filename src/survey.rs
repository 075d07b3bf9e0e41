use crate::classify::AddressClassifier;
use crate::collectors::checks::run_probe_set;
use crate::collectors::hotfix::{collect_hotfixes, sort_newest_first};
use crate::collectors::{connections, system::collect_system};
use crate::config::ProbeSet;
use crate::partition::partition;
use crate::remote::RemoteExecutor;
use crate::report::{
    ConnectionRecord, HostFailure, HotFix, RunStamp, SurveyReport, SystemDetails,
};
use reqwest::Client;
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use sysinfo::{System, SystemExt};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

#[derive(Debug, Error)]
pub enum SurveyError {
    #[error("failed to read host list {path}: {source}")]
    HostListRead {
        path: String,
        source: std::io::Error,
    },
    #[error("host list {path} contains no hosts")]
    EmptyHostList { path: String },
    #[error("failed to create output directory {path}: {source}")]
    OutputDir {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    WriteReport {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to encode report: {0}")]
    Encode(#[from] serde_json::Error),
}

pub trait InventoryProvider {
    fn system_details(&mut self) -> SystemDetails;
}

pub trait HotfixProvider {
    fn hotfixes(&mut self) -> Vec<HotFix>;
}

pub trait ConnectionSource {
    fn connections(&mut self) -> Vec<ConnectionRecord>;
}

pub struct LocalInventory {
    system: System,
}

impl LocalInventory {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl InventoryProvider for LocalInventory {
    fn system_details(&mut self) -> SystemDetails {
        collect_system(&mut self.system)
    }
}

pub struct LocalHotfixes;

impl HotfixProvider for LocalHotfixes {
    fn hotfixes(&mut self) -> Vec<HotFix> {
        collect_hotfixes()
    }
}

pub struct LocalConnections {
    system: System,
}

impl LocalConnections {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl ConnectionSource for LocalConnections {
    fn connections(&mut self) -> Vec<ConnectionRecord> {
        connections::snapshot(&mut self.system)
    }
}

/// Everything a single-host survey needs besides the host-side providers.
pub struct Surveyor {
    probes: ProbeSet,
    classifier: AddressClassifier,
    client: Client,
}

impl Surveyor {
    pub fn new(probes: ProbeSet, classifier: AddressClassifier, client: Client) -> Self {
        Self {
            probes,
            classifier,
            client,
        }
    }

    pub async fn survey_local(&self, host: &str) -> SurveyReport {
        self.run(
            host,
            &mut LocalInventory::new(),
            &mut LocalHotfixes,
            &mut LocalConnections::new(),
        )
        .await
    }

    pub async fn run(
        &self,
        host: &str,
        inventory: &mut impl InventoryProvider,
        hotfixes: &mut impl HotfixProvider,
        connections: &mut impl ConnectionSource,
    ) -> SurveyReport {
        self.run_at(RunStamp::now(), host, inventory, hotfixes, connections)
            .await
    }

    /// Assembles one report; every section carries `stamp`.
    pub async fn run_at(
        &self,
        stamp: RunStamp,
        host: &str,
        inventory: &mut impl InventoryProvider,
        hotfixes: &mut impl HotfixProvider,
        connections: &mut impl ConnectionSource,
    ) -> SurveyReport {
        let (http_checks, tcp_checks) = run_probe_set(&self.client, &self.probes, &stamp).await;

        let system_details = inventory.system_details();
        let mut os_hot_fixes = hotfixes.hotfixes();
        sort_newest_first(&mut os_hot_fixes);
        let endpoints = partition(connections.connections(), &self.classifier);
        if endpoints.is_empty() {
            debug!(host = %host, "no connections with a remote peer");
        }

        info!(
            host = %host,
            http_reachable = http_checks.checks.values().filter(|c| c.is_reachable()).count(),
            tcp_open = tcp_checks.checks.values().filter(|c| c.open).count(),
            hotfixes = os_hot_fixes.len(),
            connections = endpoints.len(),
            internal = endpoints.internal.len(),
            external = endpoints.external.len(),
            "host survey complete"
        );

        SurveyReport {
            system_name: host.to_string(),
            timestamp: stamp.timestamp(),
            system_details,
            os_hot_fixes,
            http_checks,
            tcp_checks,
            internal_endpoints: endpoints.internal,
            external_endpoints: endpoints.external,
        }
    }
}

/// One identifier per line; blank lines and `#` comments are skipped.
/// Repeats (compared case-insensitively) keep their first spelling.
pub fn parse_host_list(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter(|line| seen.insert(line.to_ascii_lowercase()))
        .map(str::to_string)
        .collect()
}

pub fn load_host_list(path: impl AsRef<Path>) -> Result<Vec<String>, SurveyError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|source| SurveyError::HostListRead {
        path: path.display().to_string(),
        source,
    })?;
    let hosts = parse_host_list(&text);
    if hosts.is_empty() {
        return Err(SurveyError::EmptyHostList {
            path: path.display().to_string(),
        });
    }
    Ok(hosts)
}

fn sanitize_host(host: &str) -> String {
    host.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// File-name stem per host. Hosts whose sanitised names clash (`fe80::1`
/// and `fe80__1`) get `-2`, `-3`, ... in list order.
pub fn file_keys(hosts: &[String]) -> Vec<String> {
    let mut taken = HashSet::new();
    hosts
        .iter()
        .map(|host| {
            let base = sanitize_host(host);
            let mut key = base.clone();
            let mut n = 1;
            while !taken.insert(key.to_ascii_lowercase()) {
                n += 1;
                key = format!("{base}-{n}");
            }
            key
        })
        .collect()
}

pub fn report_file_name(file_key: &str, stamp: &RunStamp) -> String {
    format!(
        "{}-SystemReport-{}.json",
        sanitize_host(file_key),
        stamp.file_stamp()
    )
}

pub fn write_host_file<T: Serialize>(
    output_dir: &Path,
    file_key: &str,
    stamp: &RunStamp,
    record: &T,
) -> Result<PathBuf, SurveyError> {
    let path = output_dir.join(report_file_name(file_key, stamp));
    let body = serde_json::to_vec_pretty(record)?;
    fs::write(&path, body).map_err(|source| SurveyError::WriteReport {
        path: path.display().to_string(),
        source,
    })?;
    Ok(path)
}

#[derive(Debug, Clone)]
pub enum HostOutcome {
    Surveyed(Box<SurveyReport>),
    Failed(HostFailure),
}

#[derive(Debug, Clone)]
pub struct HostResult {
    pub host: String,
    pub outcome: HostOutcome,
    /// `None` when the output file could not be written.
    pub file: Option<PathBuf>,
}

impl HostResult {
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, HostOutcome::Surveyed(_))
    }
}

#[derive(Debug, Clone, Default)]
pub struct FleetSummary {
    pub hosts: Vec<HostResult>,
}

impl FleetSummary {
    pub fn succeeded(&self) -> usize {
        self.hosts.iter().filter(|h| h.succeeded()).count()
    }

    pub fn failed(&self) -> usize {
        self.hosts.len() - self.succeeded()
    }

    pub fn files(&self) -> impl Iterator<Item = &Path> {
        self.hosts.iter().filter_map(|h| h.file.as_deref())
    }
}

/// Surveys every host through `executor`, at most `concurrency` at a time.
/// Each host gets exactly one output file whatever happens to the others.
pub async fn run_fleet<E: RemoteExecutor>(
    hosts: Vec<String>,
    executor: Arc<E>,
    output_dir: &Path,
    concurrency: usize,
) -> Result<FleetSummary, SurveyError> {
    fs::create_dir_all(output_dir).map_err(|source| SurveyError::OutputDir {
        path: output_dir.display().to_string(),
        source,
    })?;

    let limit = Arc::new(Semaphore::new(concurrency.max(1)));
    let keys = file_keys(&hosts);
    let mut tasks = JoinSet::new();
    for (idx, (host, key)) in hosts.into_iter().zip(keys).enumerate() {
        let executor = executor.clone();
        let limit = limit.clone();
        let output_dir = output_dir.to_path_buf();
        tasks.spawn(async move {
            let _permit = limit.acquire_owned().await.ok();
            let result = survey_host(executor.as_ref(), &host, &key, &output_dir).await;
            (idx, result)
        });
    }

    let mut results = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(done) => results.push(done),
            Err(err) => error!(error = %err, "host task aborted"),
        }
    }
    results.sort_by_key(|(idx, _)| *idx);

    Ok(FleetSummary {
        hosts: results.into_iter().map(|(_, r)| r).collect(),
    })
}

async fn survey_host<E: RemoteExecutor>(
    executor: &E,
    host: &str,
    file_key: &str,
    output_dir: &Path,
) -> HostResult {
    let stamp = RunStamp::now();
    let outcome = match executor.survey(host).await {
        Ok(report) => HostOutcome::Surveyed(Box::new(report)),
        Err(err) => {
            error!(host = %host, error = %err, "host survey failed");
            HostOutcome::Failed(HostFailure::new(host, &stamp, err.to_string()))
        }
    };

    let written = match &outcome {
        HostOutcome::Surveyed(report) => write_host_file(output_dir, file_key, &stamp, report),
        HostOutcome::Failed(failure) => write_host_file(output_dir, file_key, &stamp, failure),
    };
    let file = match written {
        Ok(path) => {
            info!(host = %host, path = %path.display(), "host file written");
            Some(path)
        }
        Err(err) => {
            error!(host = %host, error = %err, "host file not written");
            None
        }
    };

    HostResult {
        host: host.to_string(),
        outcome,
        file,
    }
}

pub fn local_host_name() -> String {
    System::new()
        .host_name()
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

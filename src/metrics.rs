use crate::report::{RunStamp, SurveyReport};
use crate::survey::{FleetSummary, HostOutcome};
use prometheus::core::Collector;
use prometheus::{opts, Encoder, Gauge, GaugeVec, Registry, TextEncoder};
use std::path::Path;

/// Fleet run results in Prometheus text format, written as a node-exporter
/// textfile after each run.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub fleet_hosts_total: Gauge,
    pub fleet_hosts_failed: Gauge,
    pub fleet_host_up: GaugeVec,
    pub fleet_http_check_status_code: GaugeVec,
    pub fleet_http_check_latency_ms: GaugeVec,
    pub fleet_tcp_check_up: GaugeVec,
    pub fleet_tcp_check_latency_ms: GaugeVec,
    pub fleet_connections: GaugeVec,
    pub fleet_hotfix_count: GaugeVec,
    pub fleet_last_run_timestamp_seconds: Gauge,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let fleet_hosts_total =
            Gauge::with_opts(opts!("fleet_hosts_total", "Hosts listed for the last run"))?;
        let fleet_hosts_failed = Gauge::with_opts(opts!(
            "fleet_hosts_failed",
            "Hosts that could not be surveyed in the last run"
        ))?;
        let fleet_host_up = GaugeVec::new(
            opts!("fleet_host_up", "1 if the host was surveyed, 0 otherwise"),
            &["host"],
        )?;
        let fleet_http_check_status_code = GaugeVec::new(
            opts!(
                "fleet_http_check_status_code",
                "HTTP status seen by the check (0 when unreachable)"
            ),
            &["host", "check"],
        )?;
        let fleet_http_check_latency_ms = GaugeVec::new(
            opts!("fleet_http_check_latency_ms", "HTTP check latency in ms"),
            &["host", "check"],
        )?;
        let fleet_tcp_check_up = GaugeVec::new(
            opts!("fleet_tcp_check_up", "1 if the TCP port accepted a connection"),
            &["host", "check"],
        )?;
        let fleet_tcp_check_latency_ms = GaugeVec::new(
            opts!("fleet_tcp_check_latency_ms", "TCP check latency in ms"),
            &["host", "check"],
        )?;
        let fleet_connections = GaugeVec::new(
            opts!(
                "fleet_connections",
                "Established connections by address scope"
            ),
            &["host", "scope"],
        )?;
        let fleet_hotfix_count = GaugeVec::new(
            opts!("fleet_hotfix_count", "Installed patches reported by the host"),
            &["host"],
        )?;
        let fleet_last_run_timestamp_seconds = Gauge::with_opts(opts!(
            "fleet_last_run_timestamp_seconds",
            "Unix time the last fleet run started"
        ))?;

        register(&registry, &fleet_hosts_total)?;
        register(&registry, &fleet_hosts_failed)?;
        register(&registry, &fleet_host_up)?;
        register(&registry, &fleet_http_check_status_code)?;
        register(&registry, &fleet_http_check_latency_ms)?;
        register(&registry, &fleet_tcp_check_up)?;
        register(&registry, &fleet_tcp_check_latency_ms)?;
        register(&registry, &fleet_connections)?;
        register(&registry, &fleet_hotfix_count)?;
        register(&registry, &fleet_last_run_timestamp_seconds)?;

        Ok(Self {
            registry,
            fleet_hosts_total,
            fleet_hosts_failed,
            fleet_host_up,
            fleet_http_check_status_code,
            fleet_http_check_latency_ms,
            fleet_tcp_check_up,
            fleet_tcp_check_latency_ms,
            fleet_connections,
            fleet_hotfix_count,
            fleet_last_run_timestamp_seconds,
        })
    }

    pub fn record_fleet(&self, summary: &FleetSummary, started: &RunStamp) {
        self.fleet_hosts_total.set(summary.hosts.len() as f64);
        self.fleet_hosts_failed.set(summary.failed() as f64);
        self.fleet_last_run_timestamp_seconds
            .set(started.unix() as f64);

        for result in &summary.hosts {
            match &result.outcome {
                HostOutcome::Surveyed(report) => {
                    self.fleet_host_up
                        .with_label_values(&[result.host.as_str()])
                        .set(1.0);
                    self.record_report(&result.host, report);
                }
                HostOutcome::Failed(_) => {
                    self.fleet_host_up
                        .with_label_values(&[result.host.as_str()])
                        .set(0.0);
                }
            }
        }
    }

    fn record_report(&self, host: &str, report: &SurveyReport) {
        for (name, check) in &report.http_checks.checks {
            self.fleet_http_check_status_code
                .with_label_values(&[host, name.as_str()])
                .set(check.status.map(f64::from).unwrap_or(0.0));
            self.fleet_http_check_latency_ms
                .with_label_values(&[host, name.as_str()])
                .set(check.latency_ms as f64);
        }
        for (name, check) in &report.tcp_checks.checks {
            self.fleet_tcp_check_up
                .with_label_values(&[host, name.as_str()])
                .set(if check.open { 1.0 } else { 0.0 });
            self.fleet_tcp_check_latency_ms
                .with_label_values(&[host, name.as_str()])
                .set(check.latency_ms as f64);
        }
        self.fleet_connections
            .with_label_values(&[host, "internal"])
            .set(report.internal_endpoints.len() as f64);
        self.fleet_connections
            .with_label_values(&[host, "external"])
            .set(report.external_endpoints.len() as f64);
        self.fleet_hotfix_count
            .with_label_values(&[host])
            .set(report.os_hot_fixes.len() as f64);
    }

    pub fn encode_metrics(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder.encode(&mf, &mut buf)?;
        Ok(buf)
    }

    /// Writes via a sibling temp file so scrapers never read a partial file.
    pub fn write_textfile(&self, path: &Path) -> std::io::Result<()> {
        let body = self
            .encode_metrics()
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err))?;
        let tmp = path.with_extension("prom.tmp");
        std::fs::write(&tmp, body)?;
        std::fs::rename(&tmp, path)
    }
}

fn register<T: Collector + Clone + 'static>(
    registry: &Registry,
    collector: &T,
) -> Result<(), prometheus::Error> {
    registry.register(Box::new(collector.clone()))
}

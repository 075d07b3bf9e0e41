use crate::classify::{AddressClassifier, DEFAULT_INTERNAL_RANGES};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_host_concurrency")]
    pub host_concurrency: usize,
    #[serde(default = "default_internal_ranges")]
    pub internal_ranges: Vec<String>,
    #[serde(default)]
    pub probes: ProbeSet,
    #[serde(default)]
    pub remote: RemoteConfig,
}

/// Label → target mapping probed on every surveyed host.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProbeSet {
    #[serde(default)]
    pub http_checks: Vec<HttpCheckConfig>,
    #[serde(default)]
    pub tcp_checks: Vec<TcpCheckConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpCheckConfig {
    pub name: String,
    #[serde(default = "default_http_url")]
    pub url: String,
    #[serde(default = "default_http_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TcpCheckConfig {
    pub name: String,
    #[serde(default = "default_tcp_host")]
    pub host: String,
    #[serde(default = "default_tcp_port")]
    pub port: u16,
    #[serde(default = "default_tcp_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RemoteConfig {
    #[serde(default = "default_ssh_program")]
    pub ssh_program: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default = "default_remote_command")]
    pub remote_command: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_host_timeout_secs")]
    pub host_timeout_secs: u64,
    #[serde(default = "default_local_aliases")]
    pub local_aliases: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            host_concurrency: default_host_concurrency(),
            internal_ranges: default_internal_ranges(),
            probes: ProbeSet::default(),
            remote: RemoteConfig::default(),
        }
    }
}

impl Default for ProbeSet {
    fn default() -> Self {
        Self {
            http_checks: vec![
                HttpCheckConfig::named("Google"),
                HttpCheckConfig {
                    name: "WindowsUpdate".to_string(),
                    url: "http://windowsupdate.microsoft.com".to_string(),
                    timeout_ms: default_http_timeout_ms(),
                },
            ],
            tcp_checks: vec![
                TcpCheckConfig::named("Google"),
                TcpCheckConfig {
                    port: 443,
                    ..TcpCheckConfig::named("GoogleHttps")
                },
                TcpCheckConfig {
                    name: "GoogleDns".to_string(),
                    host: "8.8.8.8".to_string(),
                    port: 53,
                    timeout_ms: default_tcp_timeout_ms(),
                },
            ],
        }
    }
}

impl HttpCheckConfig {
    /// A check against the default target with the default timeout.
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            url: default_http_url(),
            timeout_ms: default_http_timeout_ms(),
        }
    }
}

impl TcpCheckConfig {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            host: default_tcp_host(),
            port: default_tcp_port(),
            timeout_ms: default_tcp_timeout_ms(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            ssh_program: default_ssh_program(),
            user: None,
            remote_command: default_remote_command(),
            connect_timeout_secs: default_connect_timeout_secs(),
            host_timeout_secs: default_host_timeout_secs(),
            local_aliases: default_local_aliases(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse YAML in {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("invalid configuration: {0}")]
    Validation(String),
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        let cfg: Config = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path_display,
            source,
        })?;

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host_concurrency < 1 {
            return Err(ConfigError::Validation(
                "host_concurrency must be >= 1".to_string(),
            ));
        }
        if self.output_dir.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "output_dir must not be empty".to_string(),
            ));
        }

        self.classifier()?;
        validate_http_checks(&self.probes.http_checks)?;
        validate_tcp_checks(&self.probes.tcp_checks)?;
        validate_remote(&self.remote)?;

        Ok(())
    }

    pub fn classifier(&self) -> Result<AddressClassifier, ConfigError> {
        AddressClassifier::from_patterns(&self.internal_ranges)
            .map_err(|err| ConfigError::Validation(format!("internal_ranges: {err}")))
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }
}

fn validate_http_checks(checks: &[HttpCheckConfig]) -> Result<(), ConfigError> {
    let mut names = HashSet::new();
    for check in checks {
        if check.name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "probes.http_checks[*].name must not be empty".to_string(),
            ));
        }
        if !names.insert(check.name.clone()) {
            return Err(ConfigError::Validation(format!(
                "http check name '{}' must be unique",
                check.name
            )));
        }
        if check.timeout_ms == 0 {
            return Err(ConfigError::Validation(format!(
                "http check '{}' timeout_ms must be > 0",
                check.name
            )));
        }
        if check.url.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "http check '{}' url must not be empty",
                check.name
            )));
        }
    }
    Ok(())
}

fn validate_tcp_checks(checks: &[TcpCheckConfig]) -> Result<(), ConfigError> {
    let mut names = HashSet::new();
    for check in checks {
        if check.name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "probes.tcp_checks[*].name must not be empty".to_string(),
            ));
        }
        if !names.insert(check.name.clone()) {
            return Err(ConfigError::Validation(format!(
                "tcp check name '{}' must be unique",
                check.name
            )));
        }
        if check.host.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "tcp check '{}' host must not be empty",
                check.name
            )));
        }
        if check.port == 0 {
            return Err(ConfigError::Validation(format!(
                "tcp check '{}' port must be in 1..65535",
                check.name
            )));
        }
        if check.timeout_ms == 0 {
            return Err(ConfigError::Validation(format!(
                "tcp check '{}' timeout_ms must be > 0",
                check.name
            )));
        }
    }
    Ok(())
}

fn validate_remote(cfg: &RemoteConfig) -> Result<(), ConfigError> {
    if cfg.ssh_program.trim().is_empty() {
        return Err(ConfigError::Validation(
            "remote.ssh_program must not be empty".to_string(),
        ));
    }
    if cfg.remote_command.trim().is_empty() {
        return Err(ConfigError::Validation(
            "remote.remote_command must not be empty".to_string(),
        ));
    }
    if cfg.connect_timeout_secs < 1 {
        return Err(ConfigError::Validation(
            "remote.connect_timeout_secs must be >= 1".to_string(),
        ));
    }
    if cfg.host_timeout_secs < cfg.connect_timeout_secs {
        return Err(ConfigError::Validation(
            "remote.host_timeout_secs must be >= remote.connect_timeout_secs".to_string(),
        ));
    }
    Ok(())
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./reports")
}

const fn default_host_concurrency() -> usize {
    4
}

fn default_internal_ranges() -> Vec<String> {
    DEFAULT_INTERNAL_RANGES
        .iter()
        .map(|r| r.to_string())
        .collect()
}

fn default_http_url() -> String {
    "http://www.google.co.uk".to_string()
}

const fn default_http_timeout_ms() -> u64 {
    300
}

fn default_tcp_host() -> String {
    "google.com".to_string()
}

const fn default_tcp_port() -> u16 {
    80
}

const fn default_tcp_timeout_ms() -> u64 {
    100
}

fn default_ssh_program() -> String {
    "ssh".to_string()
}

fn default_remote_command() -> String {
    "fleet-survey --local".to_string()
}

const fn default_connect_timeout_secs() -> u64 {
    10
}

const fn default_host_timeout_secs() -> u64 {
    120
}

fn default_local_aliases() -> Vec<String> {
    vec![
        "localhost".to_string(),
        "127.0.0.1".to_string(),
        ".".to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = Config::default();
        cfg.validate().expect("built-in configuration must validate");

        let tcp = &cfg.probes.tcp_checks[0];
        assert_eq!(tcp.host, "google.com");
        assert_eq!(tcp.port, 80);
        assert_eq!(tcp.timeout_ms, 100);
        let http = &cfg.probes.http_checks[0];
        assert_eq!(http.url, "http://www.google.co.uk");
        assert_eq!(http.timeout_ms, 300);
    }

    #[test]
    fn example_yaml_parses_and_validates() {
        let cfg: Config = serde_yaml::from_str(Config::example_yaml()).unwrap();
        cfg.validate().unwrap();
        assert!(!cfg.probes.tcp_checks.is_empty());
    }

    #[test]
    fn partial_yaml_falls_back_to_defaults() {
        let cfg: Config = serde_yaml::from_str(
            "probes:\n  tcp_checks:\n    - name: intranet\n      host: 10.0.0.1\n",
        )
        .unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.host_concurrency, 4);
        assert_eq!(cfg.probes.tcp_checks[0].port, 80);
        assert_eq!(cfg.probes.tcp_checks[0].timeout_ms, 100);
        assert!(cfg.probes.http_checks.is_empty());
        assert_eq!(cfg.internal_ranges.len(), DEFAULT_INTERNAL_RANGES.len());
    }

    #[test]
    fn duplicate_check_names_rejected() {
        let mut cfg = Config::default();
        cfg.probes.tcp_checks = vec![TcpCheckConfig::named("a"), TcpCheckConfig::named("a")];
        assert!(matches!(cfg.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn bad_internal_range_rejected() {
        let mut cfg = Config::default();
        cfg.internal_ranges.push("10.300.*".to_string());
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("internal_ranges"));
    }

    #[test]
    fn zero_timeouts_rejected() {
        let mut cfg = Config::default();
        cfg.probes.http_checks[0].timeout_ms = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.host_concurrency = 0;
        assert!(cfg.validate().is_err());
    }
}

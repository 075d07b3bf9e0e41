use chrono::{DateTime, Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const FILE_STAMP_FORMAT: &str = "%Y%m%d_%H%M";

/// Wall-clock instant captured once per survey and reused by every section
/// of the report produced from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunStamp(DateTime<Local>);

impl RunStamp {
    pub fn now() -> Self {
        Self::from_datetime(Local::now())
    }

    pub fn from_datetime(at: DateTime<Local>) -> Self {
        Self(at)
    }

    pub fn timestamp(&self) -> String {
        self.0.format(TIMESTAMP_FORMAT).to_string()
    }

    pub fn file_stamp(&self) -> String {
        self.0.format(FILE_STAMP_FORMAT).to_string()
    }

    pub fn unix(&self) -> i64 {
        self.0.timestamp()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRecord {
    pub local_address: String,
    pub local_port: u16,
    pub remote_address: String,
    pub remote_port: u16,
    pub state: String,
    pub creation_time: Option<String>,
    pub owning_process_id: Option<u32>,
    /// `None` when the owning process exited before it could be looked up.
    pub process_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionedConnections {
    pub internal: Vec<ConnectionRecord>,
    pub external: Vec<ConnectionRecord>,
}

impl PartitionedConnections {
    pub fn len(&self) -> usize {
        self.internal.len() + self.external.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TcpProbeResult {
    pub hostname: String,
    pub port: u16,
    pub open: bool,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpProbeResult {
    pub url: String,
    /// HTTP status of the response, `None` when no status could be obtained.
    pub status: Option<u16>,
    pub latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HttpProbeResult {
    pub fn is_reachable(&self) -> bool {
        self.status.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointCheckSet<T> {
    pub timestamp: String,
    pub checks: BTreeMap<String, T>,
}

impl<T> EndpointCheckSet<T> {
    pub fn new(stamp: &RunStamp) -> Self {
        Self {
            timestamp: stamp.timestamp(),
            checks: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HotFix {
    pub id: String,
    pub description: String,
    pub install_date: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemDetails {
    pub host_name: Option<String>,
    pub os_name: Option<String>,
    pub os_version: Option<String>,
    pub long_os_version: Option<String>,
    pub kernel_version: Option<String>,
    pub distribution_id: String,
    pub cpu_brand: Option<String>,
    pub cpu_core_count: u32,
    pub physical_core_count: Option<u32>,
    pub memory_total_bytes: u64,
    pub swap_total_bytes: u64,
    pub boot_time_unix: u64,
    pub uptime_seconds: u64,
    pub disks: Vec<DiskInfo>,
    pub interfaces: Vec<InterfaceInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskInfo {
    pub name: String,
    pub mount: String,
    pub file_system: String,
    pub total_bytes: u64,
    pub available_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceInfo {
    pub name: String,
    pub rx_bytes_total: u64,
    pub tx_bytes_total: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurveyReport {
    pub system_name: String,
    pub timestamp: String,
    pub system_details: SystemDetails,
    pub os_hot_fixes: Vec<HotFix>,
    pub http_checks: EndpointCheckSet<HttpProbeResult>,
    pub tcp_checks: EndpointCheckSet<TcpProbeResult>,
    pub internal_endpoints: Vec<ConnectionRecord>,
    pub external_endpoints: Vec<ConnectionRecord>,
}

/// Written in place of a report when a host could not be surveyed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostFailure {
    pub system_name: String,
    pub timestamp: String,
    pub error: bool,
    pub message: String,
}

impl HostFailure {
    pub fn new(system_name: &str, stamp: &RunStamp, message: impl Into<String>) -> Self {
        Self {
            system_name: system_name.to_string(),
            timestamp: stamp.timestamp(),
            error: true,
            message: message.into(),
        }
    }
}

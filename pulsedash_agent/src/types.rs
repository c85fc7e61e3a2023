//! Data types sent to viewers as JSON.
//! Keep this module minimal and stable; it defines the wire format.
//!
//! Units: sizes in bytes, percentages in 0..=100, network rates in bits/sec.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub timestamp: DateTime<Utc>,
    pub refresh_ms: u64,
    pub host: HostInfo,
    pub cpu: CpuInfo,
    pub memory: MemoryInfo,
    pub disks: Vec<DiskInfo>,
    pub containers: Vec<ContainerInfo>,
    pub container_counts: ContainerCounts,
    pub network: Vec<InterfaceRate>,
    pub docker_error: Option<String>,
    #[serde(default)]
    pub diagnostics: Diagnostics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostInfo {
    pub hostname: String,
    pub distro: String,
    pub release: String,
    pub kernel: String,
    pub arch: String,
    pub uptime_sec: u64,
    pub boot_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CpuInfo {
    pub model: String,
    pub logical_cores: usize,
    pub physical_cores: Option<usize>,
    /// Overall load, one decimal.
    pub load: f64,
    /// Celsius, one decimal; absent when no sensor answered.
    pub temp: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryInfo {
    pub total: u64,
    pub used: u64,
    pub available: u64,
    pub used_pct: f64,
    pub total_pretty: String,
    pub used_pretty: String,
    pub available_pretty: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskInfo {
    pub mount: String,
    pub size: u64,
    pub used: u64,
    pub usage: f64,
    pub size_pretty: String,
    pub used_pretty: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerInfo {
    pub name: String,
    pub image: String,
    pub status: String,
    pub ports: String,
    pub running: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerCounts {
    pub total: usize,
    pub running: usize,
    pub stopped: usize,
}

impl ContainerCounts {
    pub fn from_list(list: &[ContainerInfo]) -> Self {
        let running = list.iter().filter(|c| c.running).count();
        Self {
            total: list.len(),
            running,
            stopped: list.len() - running,
        }
    }
}

/// One network interface with derived throughput.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceRate {
    pub name: String,
    pub ip4: String,
    pub mac: String,
    pub driver: String,
    pub speed_mbps: Option<u64>,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    /// Absent on the first observation of an interface.
    pub rx_rate: Option<f64>,
    pub tx_rate: Option<f64>,
    pub peak_rx_rate: f64,
    pub peak_tx_rate: f64,
    pub history: Vec<RateSample>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateSample {
    pub rx: f64,
    pub tx: f64,
}

/// Per-domain failure notes; `None` means that source answered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub host: Option<String>,
    pub cpu: Option<String>,
    pub memory: Option<String>,
    pub disks: Option<String>,
    pub temperature: Option<String>,
    pub network: Option<String>,
}

impl Diagnostics {
    pub fn is_clean(&self) -> bool {
        *self == Diagnostics::default()
    }
}

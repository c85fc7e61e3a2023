//! Host sources backed by persistent sysinfo handles.
//!
//! The handles live across ticks so CPU usage is measured between two
//! refreshes rather than from a cold start. sysinfo calls block, so each probe
//! runs on the blocking pool and locks its handle with `blocking_lock`.

use super::{blocking, linux, CpuReading, DockerCli, MemoryReading, RawDisk, RawInterface, Sources};
use crate::config::AgentConfig;
use crate::error::{SourceError, SourceResult};
use crate::types::{ContainerInfo, HostInfo};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use sysinfo::{
    Components, CpuRefreshKind, Disks, MemoryRefreshKind, Networks, RefreshKind, System,
    MINIMUM_CPU_UPDATE_INTERVAL,
};
use tokio::sync::Mutex;

pub type SharedSystem = Arc<Mutex<System>>;
pub type SharedNetworks = Arc<Mutex<Networks>>;
pub type SharedComponents = Arc<Mutex<Components>>;
pub type SharedDisks = Arc<Mutex<Disks>>;

/// Where raw interface byte counters come from, most trusted first.
/// The first reader that yields a pair wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CounterSource {
    /// `/sys/class/net/<if>/statistics/{rx,tx}_bytes` (Linux).
    Sysfs,
    /// sysinfo's cumulative `total_received` / `total_transmitted`.
    Sysinfo,
}

const COUNTER_PREFERENCE: [CounterSource; 2] = [CounterSource::Sysfs, CounterSource::Sysinfo];

const TEMP_LABELS: [&str; 5] = ["cpu", "package", "tctl", "tdie", "soc"];

pub struct SystemSources {
    sys: SharedSystem,
    // Time of the last CPU usage refresh. Held for the whole probe so usage is
    // always measured over at least MINIMUM_CPU_UPDATE_INTERVAL.
    cpu_refreshed: Arc<Mutex<Instant>>,
    networks: SharedNetworks,
    components: SharedComponents,
    disks: SharedDisks,
    docker: DockerCli,
}

impl SystemSources {
    pub fn new(cfg: &AgentConfig) -> Self {
        let refresh_kind = RefreshKind::nothing()
            .with_cpu(CpuRefreshKind::everything())
            .with_memory(MemoryRefreshKind::everything());
        let mut sys = System::new_with_specifics(refresh_kind);
        // Prime CPU usage so the first tick has a reference point.
        sys.refresh_cpu_usage();

        Self {
            sys: Arc::new(Mutex::new(sys)),
            cpu_refreshed: Arc::new(Mutex::new(Instant::now())),
            networks: Arc::new(Mutex::new(Networks::new_with_refreshed_list())),
            components: Arc::new(Mutex::new(Components::new_with_refreshed_list())),
            disks: Arc::new(Mutex::new(Disks::new_with_refreshed_list())),
            docker: DockerCli::new(cfg.docker_bin.clone(), cfg.docker_all),
        }
    }
}

#[async_trait]
impl Sources for SystemSources {
    async fn host(&self) -> SourceResult<HostInfo> {
        blocking(|| {
            let name = System::name();
            let kernel = System::kernel_version();
            if name.is_none() && kernel.is_none() {
                return Err(SourceError::Unavailable("OS identity unavailable".into()));
            }
            let hostname = hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .or_else(System::host_name)
                .unwrap_or_else(|| "unknown".into());
            let uptime_sec = System::uptime();
            Ok(HostInfo {
                hostname,
                distro: name.unwrap_or_else(|| "unknown".into()),
                release: System::os_version().unwrap_or_else(|| "unknown".into()),
                kernel: kernel.unwrap_or_else(|| "unknown".into()),
                arch: System::cpu_arch(),
                uptime_sec,
                boot_time: boot_time(System::boot_time(), uptime_sec),
            })
        })
        .await
    }

    async fn cpu(&self) -> SourceResult<CpuReading> {
        let mut refreshed = self.cpu_refreshed.lock().await;
        let wait = cpu_window_remaining(*refreshed, Instant::now());
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
        let sys = self.sys.clone();
        let reading = blocking(move || {
            let mut sys = sys.blocking_lock();
            sys.refresh_cpu_usage();
            let cpus = sys.cpus();
            let Some(first) = cpus.first() else {
                return Err(SourceError::Unavailable("no CPUs reported".into()));
            };
            let model = match first.brand().trim() {
                "" => match first.vendor_id().trim() {
                    "" => "Unknown CPU".to_string(),
                    v => v.to_string(),
                },
                b => b.to_string(),
            };
            Ok(CpuReading {
                model,
                logical_cores: cpus.len(),
                physical_cores: System::physical_core_count(),
                load: sys.global_cpu_usage(),
            })
        })
        .await;
        *refreshed = Instant::now();
        reading
    }

    async fn memory(&self) -> SourceResult<MemoryReading> {
        let sys = self.sys.clone();
        blocking(move || {
            let mut sys = sys.blocking_lock();
            sys.refresh_memory();
            let total = sys.total_memory();
            if total == 0 {
                return Err(SourceError::Unavailable("total memory reported as 0".into()));
            }
            Ok(MemoryReading {
                total,
                available: sys.available_memory(),
                active: linux::meminfo_active(),
            })
        })
        .await
    }

    async fn disks(&self) -> SourceResult<Vec<RawDisk>> {
        let disks = self.disks.clone();
        blocking(move || {
            let mut disks = disks.blocking_lock();
            disks.refresh(true);
            let list: Vec<RawDisk> = disks
                .list()
                .iter()
                .map(|d| RawDisk {
                    mount: d.mount_point().to_string_lossy().into_owned(),
                    total: d.total_space(),
                    available: d.available_space(),
                })
                .collect();
            Ok(list)
        })
        .await
    }

    async fn temperature(&self) -> SourceResult<f32> {
        let components = self.components.clone();
        blocking(move || {
            let mut components = components.blocking_lock();
            components.refresh(false);
            let hottest = components
                .iter()
                .filter(|c| {
                    let label = c.label().to_ascii_lowercase();
                    TEMP_LABELS.iter().any(|l| label.contains(l))
                })
                .filter_map(|c| c.temperature())
                .filter(|t| t.is_finite())
                .max_by(|a, b| a.total_cmp(b));
            hottest.ok_or_else(|| SourceError::Unavailable("no CPU temperature sensor".into()))
        })
        .await
    }

    async fn network(&self) -> SourceResult<Vec<RawInterface>> {
        let networks = self.networks.clone();
        blocking(move || {
            let mut networks = networks.blocking_lock();
            networks.refresh(true);
            let mut list: Vec<RawInterface> = networks
                .iter()
                .map(|(name, data)| {
                    let (rx_bytes, tx_bytes) = COUNTER_PREFERENCE
                        .iter()
                        .find_map(|src| match src {
                            CounterSource::Sysfs => linux::iface_counters(name),
                            CounterSource::Sysinfo => {
                                Some((data.total_received(), data.total_transmitted()))
                            }
                        })
                        .unwrap_or((0, 0));
                    let mac = data.mac_address();
                    RawInterface {
                        name: name.clone(),
                        ip4: data
                            .ip_networks()
                            .iter()
                            .find_map(|n| match n.addr {
                                IpAddr::V4(v4) => Some(v4.to_string()),
                                IpAddr::V6(_) => None,
                            })
                            .unwrap_or_default(),
                        mac: if mac.is_unspecified() {
                            String::new()
                        } else {
                            mac.to_string()
                        },
                        driver: linux::iface_driver(name).unwrap_or_default(),
                        speed_mbps: linux::iface_speed_mbps(name),
                        rx_bytes,
                        tx_bytes,
                    }
                })
                .collect();
            list.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(list)
        })
        .await
    }

    async fn containers(&self) -> SourceResult<Vec<ContainerInfo>> {
        self.docker.list().await
    }
}

/// How long to wait before the next CPU refresh yields a meaningful usage
/// figure.
fn cpu_window_remaining(last: Instant, now: Instant) -> Duration {
    MINIMUM_CPU_UPDATE_INTERVAL.saturating_sub(now.saturating_duration_since(last))
}

fn boot_time(boot_secs: u64, uptime_sec: u64) -> Option<DateTime<Utc>> {
    if boot_secs > 0 {
        return DateTime::from_timestamp(i64::try_from(boot_secs).ok()?, 0);
    }
    let up = i64::try_from(uptime_sec).ok()?;
    Utc::now().checked_sub_signed(ChronoDuration::seconds(up))
}

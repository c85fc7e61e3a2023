//! Snapshot assembly: one concurrent fan-out to every source, then
//! normalization into the wire schema.
//!
//! A failed or timed-out source never fails the snapshot. Its fields fall
//! back to "unknown"/zero/absent and the reason lands in `diagnostics` (or
//! `dockerError` for the container runtime).

use crate::config::{AgentConfig, NetFilter};
use crate::error::SourceResult;
use crate::rate::RateEngine;
use crate::sources::{bounded, CpuReading, MemoryReading, RawDisk, RawInterface, Sources};
use crate::types::{
    ContainerCounts, CpuInfo, Diagnostics, DiskInfo, HostInfo, InterfaceRate, MemoryInfo, Snapshot,
};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const GIB: f64 = (1u64 << 30) as f64;
const UNKNOWN: &str = "unknown";

#[derive(Debug, Clone)]
pub struct AggregatorSettings {
    pub refresh_ms: u64,
    pub source_timeout: Duration,
    pub net_timeout: Duration,
    pub history_len: usize,
    pub forget_after: u64,
    pub mounts_of_interest: Vec<String>,
    pub net_filter: NetFilter,
}

impl From<&AgentConfig> for AggregatorSettings {
    fn from(cfg: &AgentConfig) -> Self {
        Self {
            refresh_ms: u64::try_from(cfg.refresh.as_millis()).unwrap_or(u64::MAX),
            source_timeout: cfg.source_timeout,
            net_timeout: cfg.net_timeout,
            history_len: cfg.history_len,
            forget_after: cfg.forget_after,
            mounts_of_interest: cfg.mounts_of_interest.clone(),
            net_filter: cfg.net_filter,
        }
    }
}

pub struct Aggregator {
    sources: Arc<dyn Sources>,
    // Only ever locked for the network enrichment step of one snapshot.
    rates: Mutex<RateEngine>,
    health: std::sync::Mutex<HashMap<&'static str, bool>>,
    settings: AggregatorSettings,
}

impl Aggregator {
    pub fn new(sources: Arc<dyn Sources>, settings: AggregatorSettings) -> Self {
        Self {
            rates: Mutex::new(RateEngine::new(settings.history_len)),
            sources,
            health: std::sync::Mutex::new(HashMap::new()),
            settings,
        }
    }

    /// Sample every source concurrently and build one snapshot.
    pub async fn aggregate(&self) -> Snapshot {
        let limit = self.settings.source_timeout;
        let src = &*self.sources;
        let network = async {
            let res = bounded(self.settings.net_timeout, src.network()).await;
            (res, Instant::now())
        };
        let (host, cpu, memory, disks, temp, (network, sampled_at), containers) = tokio::join!(
            bounded(limit, src.host()),
            bounded(limit, src.cpu()),
            bounded(limit, src.memory()),
            bounded(limit, src.disks()),
            bounded(limit, src.temperature()),
            network,
            bounded(limit, src.containers()),
        );

        let mut diag = Diagnostics::default();

        let host = self
            .settle("host", host, &mut diag.host)
            .unwrap_or_else(unknown_host);
        let temp = self
            .settle("temperature", temp, &mut diag.temperature)
            .map(|t| round1(f64::from(t)));
        let cpu = cpu_info(self.settle("cpu", cpu, &mut diag.cpu), temp);
        let memory = memory_info(self.settle("memory", memory, &mut diag.memory));
        let disks = self
            .settle("disks", disks, &mut diag.disks)
            .map(|raw| select_disks(&raw, &self.settings.mounts_of_interest))
            .unwrap_or_default();

        let network = match self.settle("network", network, &mut diag.network) {
            Some(raw) => self.enrich_network(raw, sampled_at).await,
            None => Vec::new(),
        };

        let mut docker_error = None;
        let containers = self
            .settle("containers", containers, &mut docker_error)
            .unwrap_or_default();

        let snap = Snapshot {
            timestamp: Utc::now(),
            refresh_ms: self.settings.refresh_ms,
            host,
            cpu,
            memory,
            disks,
            container_counts: ContainerCounts::from_list(&containers),
            containers,
            network,
            docker_error,
            diagnostics: diag,
        };
        debug!(
            disks = snap.disks.len(),
            ifaces = snap.network.len(),
            containers = snap.containers.len(),
            "snapshot assembled"
        );
        snap
    }

    async fn enrich_network(&self, raw: Vec<RawInterface>, at: Instant) -> Vec<InterfaceRate> {
        let mut rates = self.rates.lock().await;
        let out: Vec<InterfaceRate> = raw
            .into_iter()
            .filter(|i| keep_interface(i, self.settings.net_filter))
            .map(|i| {
                let counters = rates.observe(&i.name, i.rx_bytes, i.tx_bytes, at);
                InterfaceRate {
                    ip4: i.ip4,
                    mac: i.mac,
                    driver: i.driver,
                    speed_mbps: i.speed_mbps,
                    ..counters
                }
            })
            .collect();
        let forgotten = rates.end_round(self.settings.forget_after);
        debug!(tracked = rates.tracked(), forgotten, "rate engine round closed");
        out
    }

    /// Unpack one source result, recording its diagnostic on failure.
    /// Failures are logged once when a source starts failing and again when it
    /// recovers, not on every tick.
    fn settle<T>(
        &self,
        domain: &'static str,
        res: SourceResult<T>,
        slot: &mut Option<String>,
    ) -> Option<T> {
        let ok = res.is_ok();
        let was_ok = self
            .health
            .lock()
            .map(|mut h| h.insert(domain, ok).unwrap_or(true))
            .unwrap_or(true);
        match res {
            Ok(v) => {
                if !was_ok {
                    info!(source = domain, "metric source recovered");
                }
                Some(v)
            }
            Err(e) => {
                if was_ok {
                    warn!(source = domain, error = %e, "metric source failed");
                } else {
                    debug!(source = domain, error = %e, "metric source still failing");
                }
                *slot = Some(e.to_string());
                None
            }
        }
    }
}

fn unknown_host() -> HostInfo {
    HostInfo {
        hostname: UNKNOWN.into(),
        distro: UNKNOWN.into(),
        release: UNKNOWN.into(),
        kernel: UNKNOWN.into(),
        arch: UNKNOWN.into(),
        uptime_sec: 0,
        boot_time: None,
    }
}

fn cpu_info(reading: Option<CpuReading>, temp: Option<f64>) -> CpuInfo {
    match reading {
        Some(r) => CpuInfo {
            model: r.model,
            logical_cores: r.logical_cores,
            physical_cores: r.physical_cores,
            load: clamp_pct(f64::from(r.load)),
            temp,
        },
        None => CpuInfo {
            model: UNKNOWN.into(),
            logical_cores: 0,
            physical_cores: None,
            load: 0.0,
            temp,
        },
    }
}

/// "Used" prefers the OS active counter, else `total - available`.
pub fn memory_used(r: &MemoryReading) -> u64 {
    r.active
        .unwrap_or_else(|| r.total.saturating_sub(r.available))
        .min(r.total)
}

fn memory_info(reading: Option<MemoryReading>) -> MemoryInfo {
    let Some(r) = reading else {
        return MemoryInfo {
            total: 0,
            used: 0,
            available: 0,
            used_pct: 0.0,
            total_pretty: UNKNOWN.into(),
            used_pretty: UNKNOWN.into(),
            available_pretty: UNKNOWN.into(),
        };
    };
    let used = memory_used(&r);
    let available = match r.available {
        0 => r.total.saturating_sub(used),
        a => a.min(r.total),
    };
    MemoryInfo {
        total: r.total,
        used,
        available,
        used_pct: usage_pct(used, r.total),
        total_pretty: pretty_bytes(r.total),
        used_pretty: pretty_bytes(used),
        available_pretty: pretty_bytes(available),
    }
}

fn normalize_mount(m: &str) -> &str {
    match m.trim_end_matches('/') {
        "" => "/",
        trimmed => trimmed,
    }
}

/// Root first (or the largest mount standing in for it), then configured
/// mounts of interest in their configured order. Each mount appears once.
pub fn select_disks(raw: &[RawDisk], interest: &[String]) -> Vec<DiskInfo> {
    let mut picked: Vec<&RawDisk> = Vec::new();
    let root = raw
        .iter()
        .find(|d| normalize_mount(&d.mount) == "/")
        .or_else(|| raw.iter().max_by_key(|d| d.total));
    picked.extend(root);

    for want in interest {
        let want = normalize_mount(want);
        let found = raw.iter().find(|d| normalize_mount(&d.mount) == want);
        if let Some(d) = found {
            if !picked.iter().any(|p| normalize_mount(&p.mount) == want) {
                picked.push(d);
            }
        }
    }

    picked.into_iter().map(disk_info).collect()
}

fn disk_info(d: &RawDisk) -> DiskInfo {
    let used = d.total.saturating_sub(d.available);
    DiskInfo {
        mount: d.mount.clone(),
        size: d.total,
        used,
        usage: usage_pct(used, d.total),
        size_pretty: pretty_bytes(d.total),
        used_pretty: pretty_bytes(used),
    }
}

pub fn keep_interface(i: &RawInterface, filter: NetFilter) -> bool {
    match filter {
        NetFilter::All => true,
        NetFilter::Active => {
            !i.ip4.is_empty() || !i.mac.is_empty() || i.rx_bytes > 0 || i.tx_bytes > 0
        }
    }
}

pub fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

/// Clamp into [0, 100] (non-finite input becomes 0) and round to one decimal.
pub fn clamp_pct(v: f64) -> f64 {
    if !v.is_finite() {
        return 0.0;
    }
    round1(v.clamp(0.0, 100.0))
}

pub fn usage_pct(used: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    clamp_pct(used as f64 / total as f64 * 100.0)
}

pub fn pretty_bytes(bytes: u64) -> String {
    format!("{:.1} GiB", bytes as f64 / GIB)
}

//! Metric sources. Each method queries exactly one domain and fails soft:
//! every problem comes back as a [`SourceError`], never a panic.

pub mod docker;
pub mod linux;
pub mod system;

use crate::error::{SourceError, SourceResult};
use crate::types::{ContainerInfo, HostInfo};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

pub use docker::DockerCli;
pub use system::SystemSources;

#[derive(Debug, Clone, PartialEq)]
pub struct CpuReading {
    pub model: String,
    pub logical_cores: usize,
    pub physical_cores: Option<usize>,
    /// Overall usage as reported by the OS; may be slightly outside 0..=100.
    pub load: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryReading {
    pub total: u64,
    pub available: u64,
    /// OS "active" memory counter when one is exposed.
    pub active: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDisk {
    pub mount: String,
    pub total: u64,
    pub available: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawInterface {
    pub name: String,
    pub ip4: String,
    pub mac: String,
    pub driver: String,
    pub speed_mbps: Option<u64>,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

/// The full set of adapters the aggregator fans out to.
#[async_trait]
pub trait Sources: Send + Sync {
    async fn host(&self) -> SourceResult<HostInfo>;
    async fn cpu(&self) -> SourceResult<CpuReading>;
    async fn memory(&self) -> SourceResult<MemoryReading>;
    async fn disks(&self) -> SourceResult<Vec<RawDisk>>;
    /// Hottest CPU sensor in Celsius.
    async fn temperature(&self) -> SourceResult<f32>;
    async fn network(&self) -> SourceResult<Vec<RawInterface>>;
    async fn containers(&self) -> SourceResult<Vec<ContainerInfo>>;
}

/// Run a source call under a deadline; expiry becomes [`SourceError::Timeout`].
pub async fn bounded<T, F>(limit: Duration, fut: F) -> SourceResult<T>
where
    F: Future<Output = SourceResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(res) => res,
        Err(_) => Err(SourceError::Timeout(limit)),
    }
}

/// Run a blocking probe on the blocking pool; a panic inside it is reported,
/// not propagated.
pub async fn blocking<T, F>(f: F) -> SourceResult<T>
where
    F: FnOnce() -> SourceResult<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(res) => res,
        Err(e) => Err(SourceError::Panicked(e.to_string())),
    }
}

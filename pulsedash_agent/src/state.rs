//! Shared agent state: the aggregator, live connections and hot JSON cache.

use crate::aggregator::{Aggregator, AggregatorSettings};
use crate::config::AgentConfig;
use crate::registry::ConnectionRegistry;
use crate::sources::Sources;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AgentConfig>,
    pub aggregator: Arc<Aggregator>,
    pub registry: ConnectionRegistry,

    // Last serialized snapshot; new stream clients and /api/health read it.
    pub latest: Arc<RwLock<Option<Arc<str>>>>,
    // Serializes cold-start sampling so concurrent first requests share one.
    cold_start: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(config: AgentConfig, sources: Arc<dyn Sources>) -> Self {
        let aggregator = Aggregator::new(sources, AggregatorSettings::from(&config));
        Self {
            registry: ConnectionRegistry::new(config.client_buffer, config.max_lagged),
            aggregator: Arc::new(aggregator),
            config: Arc::new(config),
            latest: Arc::new(RwLock::new(None)),
            cold_start: Arc::new(Mutex::new(())),
        }
    }

    pub async fn latest_frame(&self) -> Option<Arc<str>> {
        self.latest.read().await.clone()
    }

    pub async fn store_frame(&self, frame: Arc<str>) {
        *self.latest.write().await = Some(frame);
    }

    /// Cache `frame` unless a frame is already there; returns the cached one.
    pub async fn store_frame_if_empty(&self, frame: Arc<str>) -> Arc<str> {
        let mut latest = self.latest.write().await;
        latest.get_or_insert(frame).clone()
    }

    /// The cached frame, or (cold start) one sampled now through the same
    /// aggregator the sampler uses. At most one cold sample runs at a time and
    /// it never replaces a frame a tick stored meanwhile.
    pub async fn current_frame(&self) -> Result<Arc<str>, serde_json::Error> {
        if let Some(frame) = self.latest_frame().await {
            return Ok(frame);
        }
        let _cold = self.cold_start.lock().await;
        if let Some(frame) = self.latest_frame().await {
            return Ok(frame);
        }
        let snap = self.aggregator.aggregate().await;
        let frame: Arc<str> = serde_json::to_string(&snap)?.into();
        Ok(self.store_frame_if_empty(frame).await)
    }
}

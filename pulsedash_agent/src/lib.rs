//! pulsedash agent library: metric sources, snapshot aggregation, network
//! rates and the SSE fan-out, exposed for the binary and integration tests.

pub mod aggregator;
pub mod config;
pub mod error;
pub mod http;
pub mod rate;
pub mod registry;
pub mod sampler;
pub mod sources;
pub mod state;
pub mod stream;
pub mod types;

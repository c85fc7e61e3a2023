//! Error types for configuration and metric sources.

use std::time::Duration;
use thiserror::Error;

/// Startup configuration problems. These are the only fatal errors in the agent.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("missing value for {0}")]
    MissingValue(String),

    #[error("unexpected argument {0:?}")]
    UnexpectedArgument(String),
}

/// Why a single metric source produced no value for this tick.
///
/// Never propagated past the aggregator: it is rendered into the snapshot as a
/// diagnostic string instead.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("{0}")]
    Unavailable(String),

    #[error("`{command}` failed: {detail}")]
    Command { command: String, detail: String },

    #[error("could not parse {what}: {detail}")]
    Parse { what: &'static str, detail: String },

    #[error("probe task failed: {0}")]
    Panicked(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type SourceResult<T> = std::result::Result<T, SourceError>;

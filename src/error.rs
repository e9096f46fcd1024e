use thiserror::Error;

use crate::topology::PeerId;

/// Main error type for the plan-selection runtime
#[derive(Error, Debug)]
pub enum IeposError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigSource(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    // Topology errors
    #[error("Topology generation failed: {0}")]
    Topology(String),

    #[error("Unknown peer: {0}")]
    UnknownPeer(PeerId),

    // Agent errors
    #[error("Invalid plan index {index}: agent has {available} candidate plans")]
    InvalidPlan { index: usize, available: usize },

    #[error("Protocol error: {0}")]
    Protocol(String),

    // Run errors
    #[error("Run stalled: {unfinished} agents did not complete their iterations")]
    Stalled { unfinished: usize },

    #[error("Run timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for IeposError
pub type Result<T> = std::result::Result<T, IeposError>;

//! Crate-level error type for configuration, storage and messaging.
//! Per-candidate classification failures never surface here; they are folded
//! into a fail-open `Verdict` at the classification boundary.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FilterError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Classifier error: {0}")]
    Classify(#[from] crate::classify::ClassifyError),

    #[error("background worker channel closed")]
    ChannelClosed,
}

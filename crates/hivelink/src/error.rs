//! Error types for hivelink.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Which deadline expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    /// No message at all arrived within the per-take window.
    Queue(Duration),
    /// The whole exchange ran past its total budget.
    Overall(Duration),
}

impl fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutKind::Queue(d) => write!(f, "no message received within {:?}", d),
            TimeoutKind::Overall(d) => write!(f, "no matching result within {:?}", d),
        }
    }
}

/// Hivelink error type.
#[derive(Error, Debug)]
pub enum HivelinkError {
    /// Handshake or subscription did not complete within its bound
    #[error("Connection error: {0}")]
    Connection(String),

    /// A deadline expired before a matching message arrived
    #[error("Timeout: {0}")]
    Timeout(TimeoutKind),

    /// Payload was not valid UTF-8 JSON of the expected shape
    #[error("Malformed message: {0}")]
    Malformed(String),

    /// The domain computation rejected a command
    #[error("Domain computation failed: {0}")]
    Domain(String),

    /// The broker client refused a publish or subscribe
    #[error("Transport error: {0}")]
    Transport(String),

    /// Missing or invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error (record files, config files)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error outside of inbound message decoding
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl HivelinkError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, HivelinkError::Timeout(_))
    }
}

impl From<color_experiment::ExperimentError> for HivelinkError {
    fn from(e: color_experiment::ExperimentError) -> Self {
        HivelinkError::Domain(e.to_string())
    }
}

/// Result type for hivelink operations.
pub type HivelinkResult<T> = Result<T, HivelinkError>;

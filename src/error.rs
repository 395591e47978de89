//! Error types shared across components

use crate::db::DbError;
use thiserror::Error;

/// Failures talking to the avatar runtime
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Avatar runtime could not be located by any discovery strategy")]
    RuntimeUnreachable,
    #[error("Delivery to {target}.{method} failed: {reason}")]
    DeliveryFailure {
        target: String,
        method: String,
        reason: String,
    },
    #[error("Message serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BridgeError {
    pub fn delivery(target: &str, method: &str, reason: impl Into<String>) -> Self {
        Self::DeliveryFailure {
            target: target.to_string(),
            method: method.to_string(),
            reason: reason.into(),
        }
    }
}

/// Audio playback could not be started
#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("Audio clip is empty")]
    EmptyClip,
    #[error("Playback rejected: {0}")]
    Rejected(String),
}

/// Outbound transport failures
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Transport closed")]
    Closed,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TransportError {
    /// Classify a write failure; a vanished reader means the transport is gone
    pub fn from_write(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::BrokenPipe | std::io::ErrorKind::UnexpectedEof => Self::Closed,
            _ => Self::Io(e),
        }
    }
}

/// Invalid configuration values
#[derive(Debug, Error)]
#[error("Invalid configuration: {0}")]
pub struct ConfigError(pub String);

/// Top-level error for conductor operations
#[derive(Debug, Error)]
pub enum ConductorError {
    #[error(transparent)]
    Db(#[from] DbError),
    #[error("Profile store error: {0}")]
    Store(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

use serde_json::Value;
use thiserror::Error;

use crate::config::ConfigError;
use crate::transport::TransportError;

/// Main error type for ticketing-bridge operations
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Remote API returned {status}")]
    Remote { status: u16, body: Option<Value> },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Token pre-warming is not active")]
    NotActive,

    #[error("Unexpected response: {0}")]
    Decode(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl BridgeError {
    /// Stable, machine-readable name of the error kind used in response envelopes
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeError::Auth(_) => "auth",
            BridgeError::Transport(_) => "transport",
            BridgeError::Remote { .. } => "remote",
            BridgeError::NotFound(_) => "not_found",
            BridgeError::InvalidArgument(_) => "invalid_argument",
            BridgeError::NotActive => "not_active",
            BridgeError::Decode(_) => "decode",
            BridgeError::Config(_) => "config",
        }
    }

    /// Whether the request executor may retry after this error.
    ///
    /// Connection failures, timeouts and 5xx responses are transient;
    /// authentication and client errors are not.
    pub fn is_transient(&self) -> bool {
        match self {
            BridgeError::Transport(e) => e.is_transient(),
            BridgeError::Remote { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Human-readable detail including the remote error payload when present
    pub fn detail(&self) -> String {
        match self {
            BridgeError::Remote {
                status,
                body: Some(body),
            } => {
                let payload = body.get("Errors").unwrap_or(body);
                format!("Remote API returned {}: {}", status, payload)
            }
            other => other.to_string(),
        }
    }
}

/// Result type alias for ticketing-bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

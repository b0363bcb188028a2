//! Core error types for sandbridge

use sb_protocol::{ErrorCode, ProtocolError};
use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for the sandbridge client
#[derive(Error, Debug)]
pub enum SandboxError {
    /// Connection/handshake error, fatal to the create attempt
    #[error("Connection error: {0}")]
    Connect(#[from] ConnectError),

    /// Call error
    #[error("Call error: {0}")]
    Call(#[from] CallError),

    /// Process output subscription could not be restored after a reconnect
    #[error("Process output subscription lost")]
    SubscriptionLost,

    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors establishing a session
#[derive(Error, Debug)]
pub enum ConnectError {
    /// Credential was rejected by the host
    #[error("Authentication failed")]
    AuthFailed,

    /// Requested environment template is not available
    #[error("Environment unavailable: {0}")]
    EnvironmentUnavailable(String),

    /// TCP connection could not be established
    #[error("Connection refused: {0}")]
    Refused(String),

    /// Connection attempt timed out
    #[error("Connection timed out")]
    Timeout,

    /// Handshake did not complete as expected
    #[error("Handshake failed: {0}")]
    Handshake(String),
}

/// Errors resolving an individual call
///
/// `Timeout` is local-only: the remote operation may still have run. The
/// caller decides whether to retry; nothing is retried automatically.
#[derive(Error, Debug, Clone)]
pub enum CallError {
    /// Local wait on the call expired
    #[error("Call timed out")]
    Timeout,

    /// The host explicitly rejected or failed the call
    #[error("Remote error {code:?}: {message}")]
    Remote {
        /// Error code from the host
        code: ErrorCode,
        /// Human-readable message
        message: String,
    },

    /// Transport dropped while the call was in flight
    #[error("Connection lost")]
    ConnectionLost,

    /// Session was closed by the caller
    #[error("Session closed")]
    SessionClosed,

    /// Reconnection retry budget was exhausted; the session is gone
    #[error("Session lost")]
    SessionLost,

    /// The host answered with a response of the wrong shape
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_error_display() {
        let err = CallError::Remote {
            code: ErrorCode::SpawnFailed,
            message: "command not found".to_string(),
        };
        assert_eq!(
            format!("{}", err),
            "Remote error SpawnFailed: command not found"
        );
    }

    #[test]
    fn test_call_error_is_cloneable() {
        let err = CallError::ConnectionLost;
        let other = err.clone();
        assert!(matches!(other, CallError::ConnectionLost));
    }
}

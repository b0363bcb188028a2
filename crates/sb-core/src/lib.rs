//! sb-core: Core abstractions and configuration for sandbridge
//!
//! This crate provides the shared domain types, error taxonomy, and
//! configuration structures used by the client.

pub mod config;
pub mod error;
pub mod types;

pub use config::{BackoffConfig, ClientConfig, RetryConfig};
pub use error::{CallError, ConnectError, SandboxError};
pub use types::{EnvironmentKind, ProcessState, SessionState};

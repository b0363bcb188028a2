//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Runtime environment template selected at session creation.
///
/// The template id strings are a wire-level contract with the host; the
/// `Custom` variant passes future/unknown templates through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnvironmentKind {
    /// Node.js runtime
    NodeJs,
    /// Python 3 runtime
    Python3,
    /// Go toolchain
    Go,
    /// Rust toolchain
    Rust,
    /// Java runtime
    Java,
    /// PHP runtime
    Php,
    /// Perl runtime
    Perl,
    /// .NET runtime
    DotNet,
    /// Plain Bash shell
    Bash,
    /// A template this client version does not know about
    Custom(String),
}

impl EnvironmentKind {
    /// Wire-level template id for this environment
    pub fn template_id(&self) -> &str {
        match self {
            EnvironmentKind::NodeJs => "Nodejs",
            EnvironmentKind::Python3 => "Python3",
            EnvironmentKind::Go => "Go",
            EnvironmentKind::Rust => "Rust",
            EnvironmentKind::Java => "Java",
            EnvironmentKind::Php => "PHP",
            EnvironmentKind::Perl => "Perl",
            EnvironmentKind::DotNet => "DotNET",
            EnvironmentKind::Bash => "Bash",
            EnvironmentKind::Custom(id) => id,
        }
    }

    /// Parse a template id, falling back to `Custom` for unknown ids
    pub fn from_template_id(id: &str) -> Self {
        match id {
            "Nodejs" => EnvironmentKind::NodeJs,
            "Python3" => EnvironmentKind::Python3,
            "Go" => EnvironmentKind::Go,
            "Rust" => EnvironmentKind::Rust,
            "Java" => EnvironmentKind::Java,
            "PHP" => EnvironmentKind::Php,
            "Perl" => EnvironmentKind::Perl,
            "DotNET" => EnvironmentKind::DotNet,
            "Bash" => EnvironmentKind::Bash,
            other => EnvironmentKind::Custom(other.to_string()),
        }
    }
}

impl fmt::Display for EnvironmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.template_id())
    }
}

/// Connection state of a session.
///
/// Transitions are monotone except `Reconnecting -> Open`, which may repeat.
/// `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Initial connection and handshake in progress
    Connecting,
    /// Session is live
    Open,
    /// Transport dropped, reconnection in progress
    Reconnecting,
    /// Session is gone (explicit close or retry budget exhausted)
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Open => write!(f, "open"),
            SessionState::Reconnecting => write!(f, "reconnecting"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}

/// State of a remote process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Spawn call sent, no output observed yet
    Starting,
    /// Output observed, process is running
    Running,
    /// Process exited with the given code
    Exited(i32),
}

//! Message types for the sandbridge protocol
//!
//! This module defines the messages exchanged between the client and the
//! remote sandbox host. Messages are serialized into frames using the codec
//! defined in `codec.rs`.
//!
//! # Message Flow
//!
//! Typical sequence for a session:
//!
//! 1. Client connects and sends `Auth` with its credential
//! 2. Host responds with `Ok` (or an `AuthFailed` error frame)
//! 3. Client sends `OpenEnvironment`, host responds with `EnvironmentOpened`
//! 4. Client sends `Refresh` periodically so the sandbox is not reclaimed
//! 5. Process and filesystem calls flow concurrently, each under its own
//!    correlation id; process output arrives as `Stdout`/`Stderr`/`Exited`
//!    events keyed by process id
//! 6. After a reconnect the client sends `AttachSession` and `AttachProcess`
//!    to restore its session and output subscriptions

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::ids::{ProcessId, SessionId};

/// Current protocol version string.
///
/// Included in `Auth` messages to enable version negotiation.
/// Format: "MAJOR.MINOR" where MAJOR changes indicate breaking changes.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Frame kind identifier carried in the frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    /// Client-initiated call expecting a response
    Call = 0x01,
    /// Successful response to a call
    Response = 0x02,
    /// Unsolicited event keyed by process id
    Event = 0x03,
    /// Error response to a call
    Error = 0x04,
}

impl FrameKind {
    /// Convert to u8
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Call),
            0x02 => Some(Self::Response),
            0x03 => Some(Self::Event),
            0x04 => Some(Self::Error),
            _ => None,
        }
    }
}

/// Error codes carried in error frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u16)]
pub enum ErrorCode {
    /// Unknown error
    Unknown = 0,
    /// Credential was rejected
    AuthFailed = 1,
    /// Requested environment template is not available
    EnvironmentUnavailable = 2,
    /// Session not found (stale attach after reclamation)
    SessionNotFound = 3,
    /// Process not found (stale attach or kill)
    ProcessNotFound = 4,
    /// Process could not be spawned
    SpawnFailed = 5,
    /// File not found
    FileNotFound = 6,
    /// Path rejected by the sandbox
    PathInvalid = 7,
    /// Filesystem I/O failure inside the sandbox
    Io = 8,
}

/// Protocol messages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    // --- calls (client -> host) ---
    /// Authenticate the connection.
    ///
    /// Sent immediately after connecting, before any other call. The
    /// optional `version` field enables protocol version negotiation; if
    /// absent the host assumes protocol version 1.0.
    Auth {
        /// Credential issued to the caller
        credential: String,
        /// Protocol version, use `PROTOCOL_VERSION` when sending
        version: Option<String>,
    },

    /// Open a fresh environment of the given template kind
    OpenEnvironment {
        /// Environment template id (e.g. "Nodejs", "Python3")
        kind: String,
    },

    /// Re-attach to an existing session after a reconnect
    AttachSession {
        /// Session id returned by `EnvironmentOpened`
        session_id: SessionId,
    },

    /// Liveness signal so the sandbox is not reclaimed
    Refresh,

    /// Spawn a process inside the sandbox
    StartProcess {
        /// Command line to run
        cmd: String,
        /// Working directory (None = sandbox default)
        cwd: Option<String>,
        /// Environment variables to set
        env: Vec<(String, String)>,
    },

    /// Terminate a running process
    KillProcess {
        /// Process to terminate
        process_id: ProcessId,
    },

    /// Re-attach to a running process's output stream after a reconnect
    AttachProcess {
        /// Process to re-attach to
        process_id: ProcessId,
    },

    /// Write a file inside the sandbox filesystem
    WriteFile {
        /// Absolute path inside the sandbox
        path: String,
        /// File contents
        data: Bytes,
    },

    /// Read a file from the sandbox filesystem
    ReadFile {
        /// Absolute path inside the sandbox
        path: String,
    },

    // --- responses (host -> client) ---
    /// Generic success response
    Ok,

    /// Environment is ready
    EnvironmentOpened {
        /// Server-assigned session id
        session_id: SessionId,
    },

    /// Process was spawned
    ProcessStarted {
        /// Server-assigned process id
        process_id: ProcessId,
    },

    /// File contents for a `ReadFile` call
    FileData {
        /// File contents
        data: Bytes,
    },

    /// Acknowledgment of a `Refresh` call
    RefreshAck,

    // --- events (host -> client, keyed by process id) ---
    /// Process stdout chunk
    Stdout {
        /// Emitting process
        process_id: ProcessId,
        /// Output bytes
        data: Bytes,
    },

    /// Process stderr chunk
    Stderr {
        /// Emitting process
        process_id: ProcessId,
        /// Output bytes
        data: Bytes,
    },

    /// Process exited
    Exited {
        /// Exited process
        process_id: ProcessId,
        /// Exit code
        code: i32,
    },

    // --- error (host -> client) ---
    /// Error response to a call
    Error {
        /// Error code
        code: ErrorCode,
        /// Human-readable message
        message: String,
    },
}

impl Message {
    /// Get the frame kind for this message
    pub fn frame_kind(&self) -> FrameKind {
        match self {
            Message::Auth { .. }
            | Message::OpenEnvironment { .. }
            | Message::AttachSession { .. }
            | Message::Refresh
            | Message::StartProcess { .. }
            | Message::KillProcess { .. }
            | Message::AttachProcess { .. }
            | Message::WriteFile { .. }
            | Message::ReadFile { .. } => FrameKind::Call,

            Message::Ok
            | Message::EnvironmentOpened { .. }
            | Message::ProcessStarted { .. }
            | Message::FileData { .. }
            | Message::RefreshAck => FrameKind::Response,

            Message::Stdout { .. } | Message::Stderr { .. } | Message::Exited { .. } => {
                FrameKind::Event
            }

            Message::Error { .. } => FrameKind::Error,
        }
    }
}

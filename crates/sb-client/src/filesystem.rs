//! Filesystem operations inside the sandbox
//!
//! Reads and writes travel over the same multiplexed connection as every
//! other call. Writes are not replayed after a reconnect: a write in flight
//! when the transport drops fails with `ConnectionLost` and the caller
//! decides whether to issue it again.

use std::sync::Arc;

use bytes::Bytes;

use sb_core::error::CallError;
use sb_protocol::Message;

use crate::session::Shared;

/// Entry point for filesystem operations on a session
pub struct Filesystem {
    shared: Arc<Shared>,
}

impl Filesystem {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Write a file, creating it or replacing its contents
    pub async fn write(
        &self,
        path: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Result<(), CallError> {
        let path = path.into();
        let message = Message::WriteFile {
            path: path.clone(),
            data: data.into(),
        };
        let timeout = self.shared.config.default_call_timeout;
        match self.shared.correlator.call(message, timeout).await {
            Ok(Message::Ok) => {
                tracing::debug!(path, "file written");
                Ok(())
            }
            Ok(other) => Err(CallError::UnexpectedResponse(format!("{:?}", other))),
            Err(e) => Err(e),
        }
    }

    /// Read a file's contents
    pub async fn read(&self, path: impl Into<String>) -> Result<Bytes, CallError> {
        let path = path.into();
        let message = Message::ReadFile { path: path.clone() };
        let timeout = self.shared.config.default_call_timeout;
        match self.shared.correlator.call(message, timeout).await {
            Ok(Message::FileData { data }) => {
                tracing::debug!(path, bytes = data.len(), "file read");
                Ok(data)
            }
            Ok(other) => Err(CallError::UnexpectedResponse(format!("{:?}", other))),
            Err(e) => Err(e),
        }
    }
}

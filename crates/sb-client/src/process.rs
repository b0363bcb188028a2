//! Process operations: spawn, stream output, kill
//!
//! Output events for a process are delivered in arrival order on a
//! per-process channel, so one chatty process can never stall another.
//! Every stream ends with a terminal event: `Exited` normally, or
//! `SubscriptionLost` when the stream could not be restored after a
//! reconnect.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use sb_core::error::{CallError, SandboxError};
use sb_core::types::ProcessState;
use sb_protocol::{Message, ProcessId};

use crate::session::Shared;

/// One event on a process output stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    /// Chunk of stdout
    Stdout(Bytes),
    /// Chunk of stderr
    Stderr(Bytes),
    /// Process exited with the given code. Terminal.
    Exited(i32),
    /// Output subscription could not be restored after a reconnect; the
    /// process may still be running remotely. Terminal.
    SubscriptionLost,
}

/// Options for starting a process
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    /// Working directory (None = sandbox default)
    pub cwd: Option<String>,
    /// Environment variables to set
    pub env: Vec<(String, String)>,
}

impl StartOptions {
    /// Create empty options
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the working directory
    pub fn cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Add an environment variable
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// Entry point for process operations on a session
pub struct Processes {
    shared: Arc<Shared>,
}

impl Processes {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Start a process with default options
    pub async fn start(&self, cmd: impl Into<String>) -> Result<ProcessHandle, CallError> {
        self.start_with(cmd, StartOptions::default()).await
    }

    /// Start a process.
    ///
    /// The returned handle's output subscription is registered before the
    /// spawn response is handed back, so output the process emits
    /// immediately is never missed.
    pub async fn start_with(
        &self,
        cmd: impl Into<String>,
        options: StartOptions,
    ) -> Result<ProcessHandle, CallError> {
        let cmd = cmd.into();
        let message = Message::StartProcess {
            cmd: cmd.clone(),
            cwd: options.cwd,
            env: options.env,
        };
        let timeout = self.shared.config.default_call_timeout;
        let (response, events) = self.shared.correlator.call_with_output(message, timeout).await?;

        match response {
            Message::ProcessStarted { process_id } => {
                tracing::debug!(%process_id, cmd, "process started");
                Ok(ProcessHandle {
                    shared: self.shared.clone(),
                    id: process_id,
                    events,
                    state: ProcessState::Starting,
                })
            }
            other => Err(CallError::UnexpectedResponse(format!("{:?}", other))),
        }
    }
}

/// Handle to a running remote process
pub struct ProcessHandle {
    shared: Arc<Shared>,
    id: ProcessId,
    events: mpsc::UnboundedReceiver<ProcessEvent>,
    state: ProcessState,
}

impl ProcessHandle {
    /// Server-assigned id of this process
    pub fn id(&self) -> ProcessId {
        self.id
    }

    /// Last observed state of the process
    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// Receive the next output event.
    ///
    /// Returns `None` after a terminal event has been delivered, or when
    /// the session was closed.
    pub async fn next_event(&mut self) -> Option<ProcessEvent> {
        let event = self.events.recv().await?;
        match &event {
            ProcessEvent::Stdout(_) | ProcessEvent::Stderr(_) => {
                if self.state == ProcessState::Starting {
                    self.state = ProcessState::Running;
                }
            }
            ProcessEvent::Exited(code) => self.state = ProcessState::Exited(*code),
            ProcessEvent::SubscriptionLost => {}
        }
        Some(event)
    }

    /// Wait for the process to exit, discarding its output
    pub async fn wait(&mut self) -> Result<i32, SandboxError> {
        loop {
            match self.next_event().await {
                Some(ProcessEvent::Exited(code)) => return Ok(code),
                Some(ProcessEvent::SubscriptionLost) => {
                    return Err(SandboxError::SubscriptionLost)
                }
                Some(_) => {}
                None => return Err(CallError::SessionClosed.into()),
            }
        }
    }

    /// Wait for the process to exit, collecting its output
    pub async fn output(&mut self) -> Result<ProcessOutput, SandboxError> {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        loop {
            match self.next_event().await {
                Some(ProcessEvent::Stdout(data)) => stdout.extend_from_slice(&data),
                Some(ProcessEvent::Stderr(data)) => stderr.extend_from_slice(&data),
                Some(ProcessEvent::Exited(code)) => {
                    return Ok(ProcessOutput {
                        stdout,
                        stderr,
                        code,
                    })
                }
                Some(ProcessEvent::SubscriptionLost) => {
                    return Err(SandboxError::SubscriptionLost)
                }
                None => return Err(CallError::SessionClosed.into()),
            }
        }
    }

    /// Drive the output stream through callbacks on a background task.
    ///
    /// Consumes the handle; each stdout and stderr chunk is handed to the
    /// matching closure as it arrives, and the returned task resolves with
    /// the exit code once the process exits.
    pub fn stream<O, E>(mut self, mut on_stdout: O, mut on_stderr: E) -> JoinHandle<Result<i32, SandboxError>>
    where
        O: FnMut(Bytes) + Send + 'static,
        E: FnMut(Bytes) + Send + 'static,
    {
        tokio::spawn(async move {
            loop {
                match self.next_event().await {
                    Some(ProcessEvent::Stdout(data)) => on_stdout(data),
                    Some(ProcessEvent::Stderr(data)) => on_stderr(data),
                    Some(ProcessEvent::Exited(code)) => return Ok(code),
                    Some(ProcessEvent::SubscriptionLost) => {
                        return Err(SandboxError::SubscriptionLost)
                    }
                    None => return Err(CallError::SessionClosed.into()),
                }
            }
        })
    }

    /// Terminate the process.
    ///
    /// A process the host no longer knows about counts as already
    /// terminated.
    pub async fn kill(&self) -> Result<(), CallError> {
        let timeout = self.shared.config.default_call_timeout;
        match self
            .shared
            .correlator
            .call(Message::KillProcess { process_id: self.id }, timeout)
            .await
        {
            Ok(Message::Ok) => Ok(()),
            Ok(other) => Err(CallError::UnexpectedResponse(format!("{:?}", other))),
            Err(CallError::Remote {
                code: sb_protocol::ErrorCode::ProcessNotFound,
                ..
            }) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        // Later output for this process id is dropped at the correlator
        self.shared.correlator.unsubscribe(self.id);
    }
}

/// Collected output of a finished process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Everything the process wrote to stdout
    pub stdout: Vec<u8>,
    /// Everything the process wrote to stderr
    pub stderr: Vec<u8>,
    /// Exit code
    pub code: i32,
}

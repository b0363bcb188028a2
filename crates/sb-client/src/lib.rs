//! sb-client: Session manager for remote sandboxed code execution
//!
//! A [`Session`] is the caller's handle to one remote sandboxed runtime
//! environment (Node.js, Python, ...). Through it processes are started and
//! their output streamed, and files are read and written inside the sandbox
//! filesystem, all multiplexed over a single persistent connection.
//!
//! The connection is supervised: a periodic refresh keeps the sandbox from
//! being reclaimed, and a dropped transport is re-established with
//! exponential backoff, re-authenticating and re-attaching process output
//! subscriptions. Interruptions are surfaced explicitly; an output stream
//! never goes silent without a terminal event.
//!
//! ```no_run
//! use sb_client::{ClientConfig, EnvironmentKind, ProcessEvent, Session};
//!
//! # async fn run() -> Result<(), sb_client::SandboxError> {
//! let session =
//!     Session::create(ClientConfig::from_env(), EnvironmentKind::NodeJs, "api-key").await?;
//!
//! session
//!     .filesystem()
//!     .write("/code/index.js", b"console.log('Hello World!')".to_vec())
//!     .await?;
//!
//! let mut process = session.process().start("node /code/index.js").await?;
//! while let Some(event) = process.next_event().await {
//!     match event {
//!         ProcessEvent::Stdout(data) => print!("{}", String::from_utf8_lossy(&data)),
//!         ProcessEvent::Exited(code) => println!("exited with {code}"),
//!         _ => {}
//!     }
//! }
//!
//! session.close().await;
//! # Ok(())
//! # }
//! ```

mod correlator;
mod filesystem;
mod process;
mod reconnect;
mod refresh;
mod session;
mod transport;

pub use filesystem::Filesystem;
pub use process::{ProcessEvent, ProcessHandle, ProcessOutput, Processes, StartOptions};
pub use session::Session;

pub use sb_core::{
    BackoffConfig, CallError, ClientConfig, ConnectError, EnvironmentKind, ProcessState,
    RetryConfig, SandboxError, SessionState,
};
pub use sb_protocol::{ProcessId, SessionId};

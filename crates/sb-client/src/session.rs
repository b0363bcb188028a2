//! Session: the caller's handle to one remote sandbox
//!
//! `Session::create` dials the host, authenticates, opens an environment and
//! starts the background tasks that keep the session alive: a dispatch task
//! routing inbound frames, a supervisor that reconnects on transport loss
//! and a refresher that keeps the sandbox from being reclaimed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use sb_core::config::ClientConfig;
use sb_core::error::{CallError, ConnectError, SandboxError};
use sb_core::types::{EnvironmentKind, SessionState};
use sb_protocol::{ErrorCode, Frame, Message, SessionId, PROTOCOL_VERSION};

use crate::correlator::Correlator;
use crate::filesystem::Filesystem;
use crate::process::Processes;
use crate::reconnect::spawn_supervisor;
use crate::refresh::spawn_refresher;
use crate::transport::{self, INBOUND_CHANNEL_CAPACITY};

/// State shared between the session handle and its background tasks
pub(crate) struct Shared {
    pub(crate) config: ClientConfig,
    credential: String,
    pub(crate) correlator: Correlator,
    /// Set once the environment is opened; read during re-attach
    pub(crate) session_id: OnceLock<SessionId>,
    state: watch::Sender<SessionState>,
    pub(crate) cancel: CancellationToken,
    inbound_tx: mpsc::Sender<(u64, Frame)>,
    lost_tx: mpsc::Sender<u64>,
    epoch: AtomicU64,
}

impl Shared {
    /// Current session state
    pub(crate) fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Publish a state transition
    pub(crate) fn set_state(&self, state: SessionState) {
        // send_replace so the transition lands even with no subscribers
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!(from = %previous, to = %state, "session state changed");
        }
    }

    /// Dial the host and install the resulting connection for a new epoch
    pub(crate) async fn connect_transport(&self) -> Result<(), ConnectError> {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let conn = transport::connect(
            &self.config.endpoint(),
            self.config.connect_timeout,
            epoch,
            self.inbound_tx.clone(),
            self.lost_tx.clone(),
            self.cancel.child_token(),
        )
        .await?;
        self.correlator.replace_connection(conn);
        Ok(())
    }

    /// Authenticate the current connection.
    ///
    /// Must be the first call on every new connection; the host rejects
    /// anything else before a successful `Auth`.
    pub(crate) async fn authenticate(&self) -> Result<(), ConnectError> {
        let auth = Message::Auth {
            credential: self.credential.clone(),
            version: Some(PROTOCOL_VERSION.to_string()),
        };
        match self
            .correlator
            .recovery_call(auth, self.config.connect_timeout)
            .await
        {
            Ok(Message::Ok) => Ok(()),
            Ok(other) => Err(ConnectError::Handshake(format!(
                "unexpected auth response: {:?}",
                other
            ))),
            Err(CallError::Remote {
                code: ErrorCode::AuthFailed,
                ..
            }) => Err(ConnectError::AuthFailed),
            Err(CallError::Timeout) => Err(ConnectError::Timeout),
            Err(e) => Err(ConnectError::Handshake(e.to_string())),
        }
    }
}

/// A live session with a remote sandbox environment
pub struct Session {
    shared: Arc<Shared>,
    id: SessionId,
}

impl Session {
    /// Create a session: connect, authenticate and open a fresh environment
    /// of the given kind.
    ///
    /// On success the session is `Open` and its background tasks are
    /// running; it stays usable across transport drops until the caller
    /// closes it or the reconnect budget is exhausted.
    pub async fn create(
        config: ClientConfig,
        kind: EnvironmentKind,
        credential: impl Into<String>,
    ) -> Result<Self, SandboxError> {
        let (state_tx, _) = watch::channel(SessionState::Connecting);
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        let (lost_tx, lost_rx) = mpsc::channel(8);
        let (health_tx, health_rx) = mpsc::channel(4);

        let shared = Arc::new(Shared {
            config,
            credential: credential.into(),
            correlator: Correlator::new(),
            session_id: OnceLock::new(),
            state: state_tx,
            cancel: CancellationToken::new(),
            inbound_tx,
            lost_tx,
            epoch: AtomicU64::new(0),
        });

        spawn_dispatch(shared.clone(), inbound_rx);

        // Any handshake failure must stop the tasks spawned above
        let id = match Self::handshake(&shared, &kind).await {
            Ok(id) => id,
            Err(e) => {
                shared.correlator.take_connection();
                shared.cancel.cancel();
                return Err(e);
            }
        };
        // First create wins; a second set is impossible here
        let _ = shared.session_id.set(id.clone());

        shared.set_state(SessionState::Open);
        tracing::info!(session = %id, environment = kind.template_id(), "session open");

        spawn_supervisor(shared.clone(), lost_rx, health_rx);
        spawn_refresher(shared.clone(), health_tx);

        Ok(Self { shared, id })
    }

    async fn handshake(
        shared: &Arc<Shared>,
        kind: &EnvironmentKind,
    ) -> Result<SessionId, SandboxError> {
        shared.connect_transport().await?;
        shared.authenticate().await?;

        let open = Message::OpenEnvironment {
            kind: kind.template_id().to_string(),
        };
        let timeout = shared.config.default_call_timeout;
        match shared.correlator.call(open, timeout).await {
            Ok(Message::EnvironmentOpened { session_id }) => Ok(session_id),
            Ok(other) => Err(CallError::UnexpectedResponse(format!("{:?}", other)).into()),
            Err(CallError::Remote {
                code: ErrorCode::EnvironmentUnavailable,
                message,
            }) => Err(ConnectError::EnvironmentUnavailable(message).into()),
            Err(e) => Err(e.into()),
        }
    }

    /// Server-assigned id of this session
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Current session state
    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Subscribe to session state transitions
    pub fn state_watch(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    /// Number of calls currently awaiting a response
    pub fn pending_calls(&self) -> usize {
        self.shared.correlator.pending_calls()
    }

    /// Filesystem operations inside the sandbox
    pub fn filesystem(&self) -> Filesystem {
        Filesystem::new(self.shared.clone())
    }

    /// Process operations inside the sandbox
    pub fn process(&self) -> Processes {
        Processes::new(self.shared.clone())
    }

    /// Close the session.
    ///
    /// In-flight calls fail with `SessionClosed`, output streams end
    /// without a further event and the connection is torn down. Closing an
    /// already-closed session is a no-op.
    pub async fn close(&self) {
        if self.shared.state() == SessionState::Closed {
            return;
        }
        tracing::info!(session = %self.id, "closing session");
        self.shared.correlator.set_closed();
        self.shared.set_state(SessionState::Closed);
        self.shared.correlator.fail_all_pending(CallError::SessionClosed);
        self.shared.correlator.close_subscriptions();
        self.shared.correlator.take_connection();
        self.shared.cancel.cancel();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Stops the dispatch, supervisor, refresher and transport tasks
        self.shared.correlator.set_closed();
        self.shared.cancel.cancel();
    }
}

/// Spawn the task that routes inbound frames to the correlator
fn spawn_dispatch(shared: Arc<Shared>, mut inbound_rx: mpsc::Receiver<(u64, Frame)>) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shared.cancel.cancelled() => break,
                inbound = inbound_rx.recv() => match inbound {
                    Some((epoch, frame)) => shared.correlator.dispatch(epoch, frame),
                    None => break,
                },
            }
        }
    });
}

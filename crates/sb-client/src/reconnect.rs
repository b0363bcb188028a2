//! Reconnection: exponential backoff and the connection supervisor
//!
//! The supervisor reacts to two signals: the transport reader exiting
//! (connection dropped) and the refresher reporting repeated failures. Both
//! start a recovery cycle: fail in-flight calls, mark subscriptions
//! interrupted, then retry connect + re-auth + re-attach under a backoff
//! with a bounded budget. Exhausting the budget is fatal: the session
//! transitions to `Closed` and everything waiting is told `SessionLost`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use sb_core::config::{BackoffConfig, RetryConfig};
use sb_core::error::{CallError, ConnectError};
use sb_core::types::SessionState;
use sb_protocol::{ErrorCode, Message};

use crate::session::Shared;

/// Exponential backoff with jitter for reconnection attempts
pub(crate) struct ExponentialBackoff {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    jitter: f64,
    attempt: u32,
}

impl ExponentialBackoff {
    /// Create a new backoff from configuration
    pub(crate) fn from_config(config: &BackoffConfig) -> Self {
        Self::new(config.initial, config.max, config.multiplier, config.jitter)
    }

    /// Create a new backoff with custom parameters
    pub(crate) fn new(initial: Duration, max: Duration, multiplier: f64, jitter: f64) -> Self {
        Self {
            initial,
            max,
            multiplier,
            jitter,
            attempt: 0,
        }
    }

    /// Get the next delay and advance the backoff
    pub(crate) fn next_delay(&mut self) -> Duration {
        let factor = self.multiplier.powi(self.attempt as i32);
        let capped = (self.initial.as_secs_f64() * factor).min(self.max.as_secs_f64());
        self.attempt = self.attempt.saturating_add(1);

        let jitter = capped * self.jitter * rand::random::<f64>();
        Duration::from_secs_f64(capped + jitter)
    }
}

/// Bounded budget for one reconnection outage
pub(crate) struct RetryBudget {
    max_attempts: u32,
    max_elapsed: Duration,
    attempts: u32,
    started: Option<Instant>,
}

impl RetryBudget {
    /// Create a new budget from configuration
    pub(crate) fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            max_elapsed: config.max_elapsed,
            attempts: 0,
            started: None,
        }
    }

    /// Record an attempt; returns false once the budget is exhausted
    pub(crate) fn try_attempt(&mut self) -> bool {
        let started = *self.started.get_or_insert_with(Instant::now);
        if self.attempts >= self.max_attempts || started.elapsed() >= self.max_elapsed {
            return false;
        }
        self.attempts += 1;
        true
    }

    /// Attempts recorded so far
    pub(crate) fn attempts(&self) -> u32 {
        self.attempts
    }
}

enum ReconnectFailure {
    /// Worth retrying: network-level failure
    Transient(String),
    /// Not worth retrying: the session cannot be restored
    Fatal(String),
}

/// Spawn the connection supervisor for a session
pub(crate) fn spawn_supervisor(
    shared: Arc<Shared>,
    mut lost_rx: mpsc::Receiver<u64>,
    mut health_rx: mpsc::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shared.cancel.cancelled() => break,
                lost = lost_rx.recv() => {
                    let Some(epoch) = lost else { break };
                    // Stale notifications from already-replaced connections
                    // are ignored
                    if shared.correlator.current_epoch() != Some(epoch) {
                        continue;
                    }
                    tracing::warn!(epoch, "connection lost");
                    if !recover(&shared).await {
                        break;
                    }
                }
                signal = health_rx.recv() => {
                    if signal.is_none() {
                        break;
                    }
                    if shared.state() != SessionState::Open {
                        continue;
                    }
                    tracing::warn!("refresh failures exceeded threshold, treating connection as lost");
                    if !recover(&shared).await {
                        break;
                    }
                }
            }
        }
    })
}

/// Run one full recovery cycle.
///
/// Returns false when the session is gone: budget exhausted, fatal attach
/// failure, or cancellation.
async fn recover(shared: &Arc<Shared>) -> bool {
    shared.set_state(SessionState::Reconnecting);
    shared.correlator.suspend();
    shared.correlator.take_connection();
    shared.correlator.fail_all_pending(CallError::ConnectionLost);
    shared.correlator.mark_interrupted();

    let mut backoff = ExponentialBackoff::from_config(&shared.config.reconnect_backoff);
    let mut budget = RetryBudget::from_config(&shared.config.retry);

    loop {
        if !budget.try_attempt() {
            tracing::error!(
                attempts = budget.attempts(),
                "reconnect budget exhausted, session lost"
            );
            give_up(shared);
            return false;
        }

        let delay = backoff.next_delay();
        tracing::info!(attempt = budget.attempts(), ?delay, "reconnecting");
        tokio::select! {
            _ = shared.cancel.cancelled() => return false,
            _ = tokio::time::sleep(delay) => {}
        }

        match try_reconnect(shared).await {
            Ok(()) => {
                shared.correlator.resume();
                shared.set_state(SessionState::Open);
                tracing::info!("reconnected");
                return true;
            }
            Err(ReconnectFailure::Fatal(reason)) => {
                tracing::error!("session cannot be restored: {}", reason);
                give_up(shared);
                return false;
            }
            Err(ReconnectFailure::Transient(reason)) => {
                tracing::warn!("reconnect attempt failed: {}", reason);
                shared.correlator.take_connection();
            }
        }
    }
}

async fn try_reconnect(shared: &Arc<Shared>) -> Result<(), ReconnectFailure> {
    shared
        .connect_transport()
        .await
        .map_err(|e| ReconnectFailure::Transient(e.to_string()))?;

    shared.authenticate().await.map_err(|e| match e {
        // A credential that worked before and is now rejected will not
        // start working by retrying
        ConnectError::AuthFailed => ReconnectFailure::Fatal(e.to_string()),
        other => ReconnectFailure::Transient(other.to_string()),
    })?;

    let Some(session_id) = shared.session_id.get() else {
        return Err(ReconnectFailure::Fatal("no session id recorded".to_string()));
    };

    let timeout = shared.config.default_call_timeout;
    match shared
        .correlator
        .recovery_call(
            Message::AttachSession {
                session_id: session_id.clone(),
            },
            timeout,
        )
        .await
    {
        Ok(Message::Ok) => {}
        Ok(other) => {
            return Err(ReconnectFailure::Transient(format!(
                "unexpected attach response: {:?}",
                other
            )))
        }
        Err(CallError::Remote {
            code: ErrorCode::SessionNotFound,
            message,
        }) => {
            // The host reclaimed the sandbox while we were away
            return Err(ReconnectFailure::Fatal(message));
        }
        Err(e) => return Err(ReconnectFailure::Transient(e.to_string())),
    }

    shared
        .correlator
        .replay(timeout)
        .await
        .map_err(|e| ReconnectFailure::Transient(e.to_string()))?;

    Ok(())
}

fn give_up(shared: &Shared) {
    shared.set_state(SessionState::Closed);
    shared.correlator.set_lost();
    shared.correlator.take_connection();
    shared.correlator.fail_all_pending(CallError::SessionLost);
    shared.correlator.fail_subscriptions_lost();
}

//! Keepalive refresher
//!
//! The sandbox host reclaims environments that stop refreshing. A
//! per-session task sends `Refresh` on a fixed interval; after enough
//! consecutive failures it signals the supervisor, which treats the
//! connection as lost even though the socket may still look alive.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use sb_core::types::SessionState;
use sb_protocol::Message;

use crate::session::Shared;

/// Consecutive refresh failures before the connection is declared unhealthy
pub(crate) const REFRESH_FAILURE_THRESHOLD: u32 = 3;

/// Spawn the keepalive task for a session
pub(crate) fn spawn_refresher(shared: Arc<Shared>, health_tx: mpsc::Sender<()>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(shared.config.refresh_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; the session was just refreshed
        // by being created, so skip it.
        ticker.tick().await;

        let mut failures = 0u32;
        loop {
            tokio::select! {
                _ = shared.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match shared.state() {
                SessionState::Closed => break,
                SessionState::Open => {}
                // The supervisor owns recovery; refreshing mid-reconnect
                // would only add noise
                _ => continue,
            }

            // A refresh slower than the interval is as good as a failure
            match shared
                .correlator
                .call(Message::Refresh, shared.config.refresh_interval)
                .await
            {
                Ok(Message::RefreshAck) | Ok(Message::Ok) => {
                    if failures > 0 {
                        tracing::debug!("refresh recovered after {} failures", failures);
                    }
                    failures = 0;
                }
                Ok(other) => {
                    tracing::warn!("unexpected refresh response: {:?}", other);
                }
                Err(e) => {
                    failures += 1;
                    tracing::warn!(failures, "refresh failed: {}", e);
                    if failures >= REFRESH_FAILURE_THRESHOLD {
                        failures = 0;
                        if health_tx.send(()).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    })
}

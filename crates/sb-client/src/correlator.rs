//! Correlator: matches responses and events to their callers
//!
//! Every outbound call gets a fresh correlation id and a one-shot result
//! slot; inbound responses resolve exactly one slot each. Process output
//! events are demultiplexed by process id to per-process subscriptions.
//!
//! Frames are tagged with the connection epoch they arrived on; frames from
//! a replaced connection are dropped so a stale response can never resolve a
//! call issued on a newer connection.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};

use sb_core::error::CallError;
use sb_protocol::{CorrelationId, ErrorCode, Frame, Message, ProcessId};

use crate::process::ProcessEvent;
use crate::transport::Connection;

fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

/// One in-flight call awaiting its response
struct PendingCall {
    resolve: oneshot::Sender<Result<Message, CallError>>,
    /// For spawn calls: output sink registered for the new process id the
    /// moment the response arrives, so no early output event can be missed.
    subscribe_output: Option<mpsc::UnboundedSender<ProcessEvent>>,
}

/// A registered sink for one process's output events
struct Subscription {
    events: mpsc::UnboundedSender<ProcessEvent>,
    /// Set when the connection carrying this subscription dropped; cleared
    /// once the process has been re-attached on a new connection.
    interrupted: AtomicBool,
}

/// Matches inbound frames to pending calls and subscriptions
pub(crate) struct Correlator {
    next_id: AtomicU64,
    pending: DashMap<CorrelationId, PendingCall>,
    subscriptions: DashMap<ProcessId, Subscription>,
    conn: RwLock<Option<Connection>>,
    closed: AtomicBool,
    lost: AtomicBool,
    /// Set while recovery owns the connection; user calls fail fast instead
    /// of reaching a connection that has not completed its handshake yet
    suspended: AtomicBool,
}

impl Correlator {
    /// Create a new correlator with no connection installed
    pub(crate) fn new() -> Self {
        Self {
            // 0 is reserved for unsolicited events
            next_id: AtomicU64::new(1),
            pending: DashMap::new(),
            subscriptions: DashMap::new(),
            conn: RwLock::new(None),
            closed: AtomicBool::new(false),
            lost: AtomicBool::new(false),
            suspended: AtomicBool::new(false),
        }
    }

    fn next_correlation_id(&self) -> CorrelationId {
        CorrelationId::new(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Install a new connection, tearing down the previous one
    pub(crate) fn replace_connection(&self, conn: Connection) {
        let old = write_lock(&self.conn).replace(conn);
        if let Some(old) = old {
            old.close();
        }
    }

    /// Remove and tear down the current connection
    pub(crate) fn take_connection(&self) {
        if let Some(old) = write_lock(&self.conn).take() {
            old.close();
        }
    }

    /// Epoch of the currently installed connection
    pub(crate) fn current_epoch(&self) -> Option<u64> {
        read_lock(&self.conn).as_ref().map(Connection::epoch)
    }

    /// Reject all further calls with `SessionClosed`
    pub(crate) fn set_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Reject all further calls with `SessionLost`
    pub(crate) fn set_lost(&self) {
        self.lost.store(true, Ordering::SeqCst);
    }

    /// Fail user calls fast until [`resume`](Self::resume) is called
    pub(crate) fn suspend(&self) {
        self.suspended.store(true, Ordering::SeqCst);
    }

    /// Let user calls through again
    pub(crate) fn resume(&self) {
        self.suspended.store(false, Ordering::SeqCst);
    }

    /// Number of calls currently awaiting a response
    pub(crate) fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    /// Issue a call and wait for its response.
    ///
    /// The pending entry is removed on every exit path: response, error
    /// frame, timeout, connection loss, or session shutdown.
    pub(crate) async fn call(
        &self,
        message: Message,
        timeout: Duration,
    ) -> Result<Message, CallError> {
        self.call_inner(message, timeout, None, true).await
    }

    /// Issue a handshake or replay call during recovery, bypassing the
    /// suspension gate that holds ordinary traffic back
    pub(crate) async fn recovery_call(
        &self,
        message: Message,
        timeout: Duration,
    ) -> Result<Message, CallError> {
        self.call_inner(message, timeout, None, false).await
    }

    /// Issue a spawn call; on success the returned receiver delivers output
    /// events for the new process id, registered before any event can race
    /// past the response.
    pub(crate) async fn call_with_output(
        &self,
        message: Message,
        timeout: Duration,
    ) -> Result<(Message, mpsc::UnboundedReceiver<ProcessEvent>), CallError> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let response = self
            .call_inner(message, timeout, Some(events_tx), true)
            .await?;
        Ok((response, events_rx))
    }

    async fn call_inner(
        &self,
        message: Message,
        timeout: Duration,
        subscribe_output: Option<mpsc::UnboundedSender<ProcessEvent>>,
        gated: bool,
    ) -> Result<Message, CallError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CallError::SessionClosed);
        }
        if self.lost.load(Ordering::SeqCst) {
            return Err(CallError::SessionLost);
        }
        // A connection mid-handshake must not see user traffic; the host
        // rejects anything sent before auth and attach complete
        if gated && self.suspended.load(Ordering::SeqCst) {
            return Err(CallError::ConnectionLost);
        }

        let id = self.next_correlation_id();
        let (resolve, result) = oneshot::channel();
        self.pending.insert(
            id,
            PendingCall {
                resolve,
                subscribe_output,
            },
        );

        // The deadline covers the send as well: a full outbound queue on a
        // stalled connection must not hold a call past its timeout
        let outcome = tokio::time::timeout(timeout, async {
            // Clone the sender out of the lock; never hold the guard across await
            let conn = read_lock(&self.conn).clone();
            match conn {
                Some(conn) => conn.send(Frame::new(id, message)).await?,
                None => return Err(CallError::ConnectionLost),
            }
            match result.await {
                Ok(result) => result,
                // Resolver dropped without answering; treated as a lost connection
                Err(_) => Err(CallError::ConnectionLost),
            }
        })
        .await;

        match outcome {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => {
                self.pending.remove(&id);
                Err(e)
            }
            Err(_) => {
                self.pending.remove(&id);
                tracing::debug!(correlation = %id, "call timed out");
                Err(CallError::Timeout)
            }
        }
    }

    /// Register an output subscription for an already-known process id
    #[cfg(test)]
    pub(crate) fn subscribe(&self, process_id: ProcessId) -> mpsc::UnboundedReceiver<ProcessEvent> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        self.subscriptions.insert(
            process_id,
            Subscription {
                events: events_tx,
                interrupted: AtomicBool::new(false),
            },
        );
        events_rx
    }

    /// Remove the subscription for a process, if any
    pub(crate) fn unsubscribe(&self, process_id: ProcessId) {
        self.subscriptions.remove(&process_id);
    }

    /// Route one inbound frame to its waiter or subscriber
    pub(crate) fn dispatch(&self, epoch: u64, frame: Frame) {
        if self.current_epoch() != Some(epoch) {
            tracing::trace!(epoch, "dropping frame from stale connection");
            return;
        }

        match frame.message {
            Message::Stdout { process_id, data } => {
                self.forward_event(process_id, ProcessEvent::Stdout(data));
            }
            Message::Stderr { process_id, data } => {
                self.forward_event(process_id, ProcessEvent::Stderr(data));
            }
            Message::Exited { process_id, code } => {
                // Terminal: deliver and drop the subscription so any later
                // output for this process id is ignored
                if let Some((_, sub)) = self.subscriptions.remove(&process_id) {
                    let _ = sub.events.send(ProcessEvent::Exited(code));
                } else {
                    tracing::trace!(%process_id, "exit event for unknown process");
                }
            }
            Message::Error { code, message } => {
                if let Some((_, call)) = self.pending.remove(&frame.correlation_id) {
                    let _ = call.resolve.send(Err(CallError::Remote { code, message }));
                } else {
                    tracing::debug!(correlation = %frame.correlation_id, "error frame for unknown call");
                }
            }
            response => {
                if let Some((_, call)) = self.pending.remove(&frame.correlation_id) {
                    if let (Some(events), Message::ProcessStarted { process_id }) =
                        (&call.subscribe_output, &response)
                    {
                        self.subscriptions.insert(
                            *process_id,
                            Subscription {
                                events: events.clone(),
                                interrupted: AtomicBool::new(false),
                            },
                        );
                    }
                    let _ = call.resolve.send(Ok(response));
                } else {
                    tracing::debug!(correlation = %frame.correlation_id, "response for unknown call");
                }
            }
        }
    }

    fn forward_event(&self, process_id: ProcessId, event: ProcessEvent) {
        match self.subscriptions.get(&process_id) {
            Some(sub) => {
                let _ = sub.events.send(event);
            }
            None => tracing::trace!(%process_id, "output event for unknown process"),
        }
    }

    /// Resolve every pending call with the given error
    pub(crate) fn fail_all_pending(&self, error: CallError) {
        let ids: Vec<CorrelationId> = self.pending.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, call)) = self.pending.remove(&id) {
                let _ = call.resolve.send(Err(error.clone()));
            }
        }
    }

    /// Mark every subscription as interrupted, pending replay
    pub(crate) fn mark_interrupted(&self) {
        for entry in self.subscriptions.iter() {
            entry.value().interrupted.store(true, Ordering::SeqCst);
        }
    }

    /// Re-attach every interrupted subscription on the new connection.
    ///
    /// A subscription whose remote process no longer exists receives a
    /// terminal `SubscriptionLost` event and is removed; it never goes
    /// silently quiet. Transport-level failures abort the replay so the
    /// supervisor can retry the whole reconnect.
    pub(crate) async fn replay(&self, timeout: Duration) -> Result<(), CallError> {
        let interrupted: Vec<ProcessId> = self
            .subscriptions
            .iter()
            .filter(|entry| entry.value().interrupted.load(Ordering::SeqCst))
            .map(|entry| *entry.key())
            .collect();

        for process_id in interrupted {
            match self
                .recovery_call(Message::AttachProcess { process_id }, timeout)
                .await
            {
                Ok(Message::Ok) => {
                    if let Some(sub) = self.subscriptions.get(&process_id) {
                        sub.interrupted.store(false, Ordering::SeqCst);
                    }
                    tracing::debug!(%process_id, "output subscription restored");
                }
                Ok(other) => {
                    tracing::warn!(%process_id, "unexpected attach response: {:?}", other);
                }
                Err(CallError::Remote {
                    code: ErrorCode::ProcessNotFound | ErrorCode::SessionNotFound,
                    ..
                }) => {
                    if let Some((_, sub)) = self.subscriptions.remove(&process_id) {
                        let _ = sub.events.send(ProcessEvent::SubscriptionLost);
                    }
                    tracing::warn!(%process_id, "output subscription lost");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Deliver a terminal `SubscriptionLost` to every subscription
    pub(crate) fn fail_subscriptions_lost(&self) {
        let ids: Vec<ProcessId> = self.subscriptions.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, sub)) = self.subscriptions.remove(&id) {
                let _ = sub.events.send(ProcessEvent::SubscriptionLost);
            }
        }
    }

    /// Drop every subscription, ending the streams without an error event
    pub(crate) fn close_subscriptions(&self) {
        self.subscriptions.clear();
    }
}

//! Transport: one physical connection to the sandbox host
//!
//! Each successful connect produces a fresh [`Connection`] for a new epoch.
//! Connections are replaced, never repaired: on any failure the reader task
//! reports the epoch and the supervisor decides what to do next.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use sb_core::error::{CallError, ConnectError};
use sb_protocol::{Frame, FrameCodec};

/// Channel capacity for frames queued towards the host.
///
/// 256 provides headroom for bursts of concurrent calls without letting a
/// stalled connection buffer unbounded amounts of outbound data.
pub(crate) const OUTBOUND_CHANNEL_CAPACITY: usize = 256;

/// Channel capacity for inbound frames awaiting dispatch
pub(crate) const INBOUND_CHANNEL_CAPACITY: usize = 256;

/// A live connection for one epoch
#[derive(Debug, Clone)]
pub(crate) struct Connection {
    epoch: u64,
    outbound: mpsc::Sender<Frame>,
    cancel: CancellationToken,
}

impl Connection {
    /// Epoch this connection belongs to
    pub(crate) fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Queue a frame for sending
    pub(crate) async fn send(&self, frame: Frame) -> Result<(), CallError> {
        self.outbound
            .send(frame)
            .await
            .map_err(|_| CallError::ConnectionLost)
    }

    /// Tear the connection down, stopping both halves
    pub(crate) fn close(&self) {
        self.cancel.cancel();
    }
}

/// Open a connection and spawn its reader and writer tasks.
///
/// Inbound frames are forwarded to `inbound_tx` tagged with `epoch`; when
/// the reader stops for any reason the epoch is reported on `lost_tx`.
pub(crate) async fn connect(
    endpoint: &str,
    connect_timeout: Duration,
    epoch: u64,
    inbound_tx: mpsc::Sender<(u64, Frame)>,
    lost_tx: mpsc::Sender<u64>,
    cancel: CancellationToken,
) -> Result<Connection, ConnectError> {
    tracing::debug!(endpoint, epoch, "connecting");

    let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(endpoint))
        .await
        .map_err(|_| ConnectError::Timeout)?
        .map_err(|e| ConnectError::Refused(e.to_string()))?;
    let _ = stream.set_nodelay(true);

    let framed = Framed::new(stream, FrameCodec::new());
    let (mut sink, mut frames) = framed.split();

    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Frame>(OUTBOUND_CHANNEL_CAPACITY);

    // Writer half: drains the outbound queue until close or write failure
    let writer_cancel = cancel.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = writer_cancel.cancelled() => break,
                frame = outbound_rx.recv() => match frame {
                    Some(frame) => {
                        if let Err(e) = sink.send(frame).await {
                            tracing::debug!(epoch, "write failed: {}", e);
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
        let _ = sink.close().await;
    });

    // Reader half: forwards inbound frames, reports the epoch on exit
    let reader_cancel = cancel.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = reader_cancel.cancelled() => break,
                frame = frames.next() => match frame {
                    Some(Ok(frame)) => {
                        if inbound_tx.send((epoch, frame)).await.is_err() {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        tracing::warn!(epoch, "transport error: {}", e);
                        break;
                    }
                    None => break,
                },
            }
        }
        let _ = lost_tx.send(epoch).await;
    });

    Ok(Connection {
        epoch,
        outbound: outbound_tx,
        cancel,
    })
}

#![allow(dead_code)]

//! Shared test harness: a scriptable in-process sandbox host.
//!
//! Tests accept connections and script exact frame exchanges, which keeps
//! ordering assertions deterministic: the host side of every test is a
//! straight-line script on one connection at a time.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;

use sb_client::{BackoffConfig, ClientConfig, RetryConfig};
use sb_protocol::{Frame, FrameCodec, Message, SessionId};

/// Listener standing in for the remote sandbox host
pub struct MockHost {
    listener: TcpListener,
}

impl MockHost {
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock host");
        Self { listener }
    }

    pub fn port(&self) -> u16 {
        self.listener.local_addr().expect("local addr").port()
    }

    pub async fn accept(&self) -> MockConn {
        let (stream, _) = self.listener.accept().await.expect("accept");
        MockConn {
            framed: Framed::new(stream, FrameCodec::new()),
        }
    }
}

/// One accepted connection, driven frame by frame
pub struct MockConn {
    framed: Framed<TcpStream, FrameCodec>,
}

impl MockConn {
    /// Receive the next frame; panics if the client hung up
    pub async fn recv(&mut self) -> Frame {
        self.framed
            .next()
            .await
            .expect("client closed connection")
            .expect("decode frame")
    }

    pub async fn send(&mut self, frame: Frame) {
        self.framed.send(frame).await.expect("send frame");
    }

    /// Send an unsolicited event frame
    pub async fn send_event(&mut self, message: Message) {
        self.send(Frame::event(message)).await;
    }

    /// Expect an `Auth` call and accept it
    pub async fn expect_auth(&mut self) {
        let frame = self.recv().await;
        assert!(
            matches!(frame.message, Message::Auth { .. }),
            "expected Auth, got {:?}",
            frame.message
        );
        self.send(Frame::new(frame.correlation_id, Message::Ok)).await;
    }

    /// Script the handshake for a fresh session: `Auth` then
    /// `OpenEnvironment`
    pub async fn accept_create(&mut self, session_id: &str) {
        self.expect_auth().await;

        let frame = self.recv().await;
        assert!(
            matches!(frame.message, Message::OpenEnvironment { .. }),
            "expected OpenEnvironment, got {:?}",
            frame.message
        );
        self.send(Frame::new(
            frame.correlation_id,
            Message::EnvironmentOpened {
                session_id: SessionId::new(session_id),
            },
        ))
        .await;
    }

    /// Script the handshake for a reconnect: `Auth` then `AttachSession`
    pub async fn accept_reattach(&mut self, session_id: &str) {
        self.expect_auth().await;

        let frame = self.recv().await;
        match &frame.message {
            Message::AttachSession { session_id: id } => {
                assert_eq!(id.as_str(), session_id);
            }
            other => panic!("expected AttachSession, got {:?}", other),
        }
        self.send(Frame::new(frame.correlation_id, Message::Ok)).await;
    }
}

/// Configuration pointed at the mock host, with timings tightened so
/// failure paths resolve in milliseconds instead of minutes
pub fn test_config(port: u16) -> ClientConfig {
    ClientConfig {
        host: "127.0.0.1".to_string(),
        port,
        debug_local: true,
        refresh_interval: Duration::from_secs(60),
        reconnect_backoff: BackoffConfig {
            initial: Duration::from_millis(20),
            max: Duration::from_millis(100),
            multiplier: 2.0,
            jitter: 0.0,
        },
        retry: RetryConfig {
            max_attempts: 3,
            max_elapsed: Duration::from_secs(10),
        },
        default_call_timeout: Duration::from_secs(2),
        connect_timeout: Duration::from_secs(1),
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

//! Refresh keepalive and health escalation

mod common;

use std::time::Duration;

use bytes::Bytes;
use sb_client::{EnvironmentKind, Session, SessionState};
use sb_protocol::{Frame, Message};

use common::{init_tracing, test_config, MockHost};

#[tokio::test]
async fn test_refresh_calls_are_acknowledged() {
    init_tracing();
    let host = MockHost::bind().await;
    let port = host.port();

    let mut config = test_config(port);
    config.refresh_interval = Duration::from_millis(50);

    let (session, mut conn) = tokio::join!(
        async {
            Session::create(config, EnvironmentKind::NodeJs, "test-key")
                .await
                .unwrap()
        },
        async {
            let mut conn = host.accept().await;
            conn.accept_create("s-keepalive").await;
            conn
        }
    );

    // Answer a few refresh ticks; the session stays open throughout
    for _ in 0..3 {
        let frame = conn.recv().await;
        assert!(matches!(frame.message, Message::Refresh));
        conn.send(Frame::new(frame.correlation_id, Message::RefreshAck))
            .await;
    }
    assert_eq!(session.state(), SessionState::Open);
}

#[tokio::test]
async fn test_ignored_refreshes_escalate_to_reconnect() {
    init_tracing();
    let host = MockHost::bind().await;
    let port = host.port();

    let mut config = test_config(port);
    config.refresh_interval = Duration::from_millis(50);

    let (session, conn) = tokio::join!(
        async {
            Session::create(config, EnvironmentKind::NodeJs, "test-key")
                .await
                .unwrap()
        },
        async {
            let mut conn = host.accept().await;
            conn.accept_create("s-deaf").await;
            conn
        }
    );

    // The host stops answering but keeps the socket open. After enough
    // failed refreshes the client must treat the connection as lost and
    // re-dial.
    let mut replacement = host.accept().await;
    replacement.accept_reattach("s-deaf").await;
    drop(conn);

    let mut states = session.state_watch();
    tokio::time::timeout(
        Duration::from_secs(5),
        states.wait_for(|s| *s == SessionState::Open),
    )
    .await
    .expect("session did not recover from a deaf host")
    .unwrap();

    // Fully usable again on the replacement connection
    let fs = session.filesystem();
    let (data, _) = tokio::join!(
        async { fs.read("/after").await.unwrap() },
        async {
            // Refresh traffic may resume before the read arrives
            loop {
                let frame = replacement.recv().await;
                match frame.message {
                    Message::Refresh => {
                        replacement
                            .send(Frame::new(frame.correlation_id, Message::RefreshAck))
                            .await;
                    }
                    Message::ReadFile { .. } => {
                        replacement
                            .send(Frame::new(
                                frame.correlation_id,
                                Message::FileData {
                                    data: Bytes::from("alive"),
                                },
                            ))
                            .await;
                        break;
                    }
                    other => panic!("unexpected frame: {:?}", other),
                }
            }
        }
    );
    assert_eq!(data, Bytes::from("alive"));
}

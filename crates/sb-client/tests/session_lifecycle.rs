//! End-to-end session lifecycle against a scripted host

mod common;

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use sb_client::{CallError, EnvironmentKind, Session, SessionState};
use sb_protocol::{Frame, Message, ProcessId};

use common::{init_tracing, test_config, MockHost};

#[tokio::test]
async fn test_create_open_session() {
    init_tracing();
    let host = MockHost::bind().await;
    let port = host.port();

    let server = tokio::spawn(async move {
        let mut conn = host.accept().await;
        conn.accept_create("s-1").await;
        conn
    });

    let session = Session::create(test_config(port), EnvironmentKind::NodeJs, "test-key")
        .await
        .unwrap();
    let _conn = server.await.unwrap();

    assert_eq!(session.id().as_str(), "s-1");
    assert_eq!(session.state(), SessionState::Open);
    assert_eq!(session.pending_calls(), 0);
}

#[tokio::test]
async fn test_hello_world_run() {
    init_tracing();
    let host = MockHost::bind().await;
    let port = host.port();

    let server = tokio::spawn(async move {
        let mut conn = host.accept().await;
        conn.accept_create("s-hello").await;

        // Write of the source file
        let frame = conn.recv().await;
        match &frame.message {
            Message::WriteFile { path, data } => {
                assert_eq!(path, "/code/index.js");
                assert_eq!(data.as_ref(), b"console.log('Hello World!')");
            }
            other => panic!("expected WriteFile, got {:?}", other),
        }
        conn.send(Frame::new(frame.correlation_id, Message::Ok)).await;

        // Spawn, one line of output, clean exit
        let frame = conn.recv().await;
        match &frame.message {
            Message::StartProcess { cmd, .. } => assert_eq!(cmd, "node /code/index.js"),
            other => panic!("expected StartProcess, got {:?}", other),
        }
        let pid = ProcessId::new(42);
        conn.send(Frame::new(
            frame.correlation_id,
            Message::ProcessStarted { process_id: pid },
        ))
        .await;
        conn.send_event(Message::Stdout {
            process_id: pid,
            data: Bytes::from("Hello World!\n"),
        })
        .await;
        conn.send_event(Message::Exited {
            process_id: pid,
            code: 0,
        })
        .await;
        conn
    });

    let session = Session::create(test_config(port), EnvironmentKind::NodeJs, "test-key")
        .await
        .unwrap();

    session
        .filesystem()
        .write("/code/index.js", Bytes::from("console.log('Hello World!')"))
        .await
        .unwrap();

    let mut process = session.process().start("node /code/index.js").await.unwrap();
    let output = process.output().await.unwrap();
    assert_eq!(output.stdout, b"Hello World!\n");
    assert!(output.stderr.is_empty());
    assert_eq!(output.code, 0);

    // Stream is over
    assert!(process.next_event().await.is_none());

    let _conn = server.await.unwrap();
    session.close().await;
}

#[tokio::test]
async fn test_streaming_output_through_callbacks() {
    init_tracing();
    let host = MockHost::bind().await;
    let port = host.port();

    let server = tokio::spawn(async move {
        let mut conn = host.accept().await;
        conn.accept_create("s-callbacks").await;

        let frame = conn.recv().await;
        assert!(matches!(frame.message, Message::StartProcess { .. }));
        let pid = ProcessId::new(5);
        conn.send(Frame::new(
            frame.correlation_id,
            Message::ProcessStarted { process_id: pid },
        ))
        .await;
        conn.send_event(Message::Stdout {
            process_id: pid,
            data: Bytes::from("out-1"),
        })
        .await;
        conn.send_event(Message::Stderr {
            process_id: pid,
            data: Bytes::from("err-1"),
        })
        .await;
        conn.send_event(Message::Stdout {
            process_id: pid,
            data: Bytes::from("out-2"),
        })
        .await;
        conn.send_event(Message::Exited {
            process_id: pid,
            code: 3,
        })
        .await;
        conn
    });

    let session = Session::create(test_config(port), EnvironmentKind::NodeJs, "test-key")
        .await
        .unwrap();
    let process = session.process().start("node report.js").await.unwrap();

    let stdout = Arc::new(Mutex::new(Vec::new()));
    let stderr = Arc::new(Mutex::new(Vec::new()));
    let stdout_sink = stdout.clone();
    let stderr_sink = stderr.clone();

    let code = process
        .stream(
            move |data| stdout_sink.lock().unwrap().extend_from_slice(&data),
            move |data| stderr_sink.lock().unwrap().extend_from_slice(&data),
        )
        .await
        .unwrap()
        .unwrap();

    assert_eq!(code, 3);
    assert_eq!(stdout.lock().unwrap().as_slice(), b"out-1out-2");
    assert_eq!(stderr.lock().unwrap().as_slice(), b"err-1");

    let _conn = server.await.unwrap();
}

#[tokio::test]
async fn test_file_write_read_roundtrip() {
    init_tracing();
    let host = MockHost::bind().await;
    let port = host.port();

    let server = tokio::spawn(async move {
        let mut conn = host.accept().await;
        conn.accept_create("s-fs").await;

        let frame = conn.recv().await;
        let stored = match &frame.message {
            Message::WriteFile { path, data } => {
                assert_eq!(path, "/data/blob.bin");
                data.clone()
            }
            other => panic!("expected WriteFile, got {:?}", other),
        };
        conn.send(Frame::new(frame.correlation_id, Message::Ok)).await;

        let frame = conn.recv().await;
        match &frame.message {
            Message::ReadFile { path } => assert_eq!(path, "/data/blob.bin"),
            other => panic!("expected ReadFile, got {:?}", other),
        }
        conn.send(Frame::new(
            frame.correlation_id,
            Message::FileData { data: stored },
        ))
        .await;
        conn
    });

    let session = Session::create(test_config(port), EnvironmentKind::Python3, "test-key")
        .await
        .unwrap();

    let payload = Bytes::from(vec![0u8, 1, 2, 255, 254]);
    let fs = session.filesystem();
    fs.write("/data/blob.bin", payload.clone()).await.unwrap();
    let read_back = fs.read("/data/blob.bin").await.unwrap();
    assert_eq!(read_back, payload);

    let _conn = server.await.unwrap();
}

#[tokio::test]
async fn test_close_is_idempotent_and_terminal() {
    init_tracing();
    let host = MockHost::bind().await;
    let port = host.port();

    let server = tokio::spawn(async move {
        let mut conn = host.accept().await;
        conn.accept_create("s-close").await;
        conn
    });

    let session = Session::create(test_config(port), EnvironmentKind::Bash, "test-key")
        .await
        .unwrap();
    let _conn = server.await.unwrap();

    session.close().await;
    assert_eq!(session.state(), SessionState::Closed);

    // Second close is a no-op
    session.close().await;
    assert_eq!(session.state(), SessionState::Closed);

    // All further operations fail fast without touching the network
    let result = session.filesystem().read("/anything").await;
    assert!(matches!(result, Err(CallError::SessionClosed)));
    let result = session.process().start("true").await;
    assert!(matches!(result, Err(CallError::SessionClosed)));
}

#[tokio::test]
async fn test_close_ends_output_streams() {
    init_tracing();
    let host = MockHost::bind().await;
    let port = host.port();

    let server = tokio::spawn(async move {
        let mut conn = host.accept().await;
        conn.accept_create("s-streams").await;

        let frame = conn.recv().await;
        assert!(matches!(frame.message, Message::StartProcess { .. }));
        conn.send(Frame::new(
            frame.correlation_id,
            Message::ProcessStarted {
                process_id: ProcessId::new(1),
            },
        ))
        .await;
        conn
    });

    let session = Session::create(test_config(port), EnvironmentKind::NodeJs, "test-key")
        .await
        .unwrap();
    let mut process = session.process().start("sleep 1000").await.unwrap();
    let _conn = server.await.unwrap();

    session.close().await;

    // The stream ends without a further event
    assert!(process.next_event().await.is_none());
}

#[tokio::test]
async fn test_environment_unavailable() {
    init_tracing();
    let host = MockHost::bind().await;
    let port = host.port();

    let server = tokio::spawn(async move {
        let mut conn = host.accept().await;
        conn.expect_auth().await;

        let frame = conn.recv().await;
        assert!(matches!(frame.message, Message::OpenEnvironment { .. }));
        conn.send(Frame::new(
            frame.correlation_id,
            Message::Error {
                code: sb_protocol::ErrorCode::EnvironmentUnavailable,
                message: "no such template".to_string(),
            },
        ))
        .await;
        conn
    });

    let result = Session::create(
        test_config(port),
        EnvironmentKind::Custom("Zig".to_string()),
        "test-key",
    )
    .await;
    let _conn = server.await.unwrap();

    assert!(matches!(
        result,
        Err(sb_client::SandboxError::Connect(
            sb_client::ConnectError::EnvironmentUnavailable(_)
        ))
    ));
}

#[tokio::test]
async fn test_auth_rejected() {
    init_tracing();
    let host = MockHost::bind().await;
    let port = host.port();

    let server = tokio::spawn(async move {
        let mut conn = host.accept().await;
        let frame = conn.recv().await;
        assert!(matches!(frame.message, Message::Auth { .. }));
        conn.send(Frame::new(
            frame.correlation_id,
            Message::Error {
                code: sb_protocol::ErrorCode::AuthFailed,
                message: "bad credential".to_string(),
            },
        ))
        .await;
        conn
    });

    let result = Session::create(test_config(port), EnvironmentKind::NodeJs, "bad-key").await;
    let _conn = server.await.unwrap();

    assert!(matches!(
        result,
        Err(sb_client::SandboxError::Connect(
            sb_client::ConnectError::AuthFailed
        ))
    ));
}

#[tokio::test]
async fn test_dropped_handle_discards_output() {
    init_tracing();
    let host = MockHost::bind().await;
    let port = host.port();

    let server = tokio::spawn(async move {
        let mut conn = host.accept().await;
        conn.accept_create("s-drop").await;

        let frame = conn.recv().await;
        assert!(matches!(frame.message, Message::StartProcess { .. }));
        let pid = ProcessId::new(9);
        conn.send(Frame::new(
            frame.correlation_id,
            Message::ProcessStarted { process_id: pid },
        ))
        .await;

        // Kill call arrives after the client dropped its handle
        let frame = conn.recv().await;
        match frame.message {
            Message::KillProcess { process_id } => assert_eq!(process_id, pid),
            other => panic!("expected KillProcess, got {:?}", other),
        }
        conn.send(Frame::new(frame.correlation_id, Message::Ok)).await;

        // Late output for the dropped handle must not break anything
        conn.send_event(Message::Stdout {
            process_id: pid,
            data: Bytes::from("late"),
        })
        .await;

        let frame = conn.recv().await;
        assert!(matches!(frame.message, Message::ReadFile { .. }));
        conn.send(Frame::new(
            frame.correlation_id,
            Message::FileData {
                data: Bytes::from("ok"),
            },
        ))
        .await;
        conn
    });

    let session = Session::create(test_config(port), EnvironmentKind::NodeJs, "test-key")
        .await
        .unwrap();

    let process = session.process().start("yes").await.unwrap();
    process.kill().await.unwrap();
    drop(process);

    // The session keeps working after the late event
    let data = session.filesystem().read("/f").await.unwrap();
    assert_eq!(data, Bytes::from("ok"));

    let _conn = server.await.unwrap();
}

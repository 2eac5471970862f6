
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use canon::bridge::{AttachTransport, Bridge, ExecTransport, ResizeEvents, Transport};
use canon::engine::{EngineError, ExecSpec};
use canon::CanonError;
use futures_util::stream::{self, StreamExt};
use rstest::*;
use test_utils::{FakeEngine, FakeTerminal};
use tokio::io::AsyncReadExt;

fn exec_transport() -> Arc<dyn Transport> {
    Arc::new(ExecTransport::new(
        "container1",
        ExecSpec {
            cmd: vec!["bash".to_string(), "-l".to_string()],
            user: "testbot:testbot".to_string(),
            working_dir: "/host".to_string(),
            env: Vec::new(),
            tty: true,
        },
    ))
}

fn no_resizes() -> ResizeEvents {
    stream::pending().boxed()
}

#[fixture]
fn engine() -> Arc<FakeEngine> {
    FakeEngine::new()
}

#[fixture]
fn terminal() -> Arc<FakeTerminal> {
    FakeTerminal::new(24, 80)
}

#[rstest]
#[tokio::test]
async fn test_output_drains_after_stdin_eof(engine: Arc<FakeEngine>, terminal: Arc<FakeTerminal>) {
    let chunks: Vec<Bytes> = (0..20).map(|i| Bytes::from(format!("line {}\n", i))).collect();
    let expected: Vec<u8> = chunks.iter().flat_map(|c| c.iter().copied()).collect();
    engine.with(|s| {
        s.session_output = chunks;
        s.session_delay = Duration::from_millis(5);
    });

    let bridge = Bridge::new(engine.clone(), terminal.clone());
    let (stdout, mut received_end) = tokio::io::duplex(64 * 1024);

    let code = bridge
        .run(
            exec_transport(),
            tokio::io::empty(),
            stdout,
            no_resizes(),
            std::future::pending(),
        )
        .await
        .unwrap();

    assert_eq!(code, Some(0));
    let mut received = Vec::new();
    received_end.read_to_end(&mut received).await.unwrap();
    assert_eq!(received, expected);
}

#[rstest]
#[tokio::test]
async fn test_stdin_reaches_remote(engine: Arc<FakeEngine>, terminal: Arc<FakeTerminal>) {
    engine.with(|s| {
        s.session_output = vec![Bytes::from_static(b"hi\n"), Bytes::from_static(b"bye\n")];
        s.session_delay = Duration::from_millis(20);
    });
    let stdin = tokio_test::io::Builder::new().read(b"echo hi\n").build();

    let bridge = Bridge::new(engine.clone(), terminal.clone());
    bridge
        .run(exec_transport(), stdin, tokio::io::sink(), no_resizes(), std::future::pending())
        .await
        .unwrap();

    let (input, closed) = engine.with(|s| (s.session_input.lock().unwrap().clone(), s.input_closed.clone()));
    assert_eq!(input, b"echo hi\n");
    assert!(closed.load(std::sync::atomic::Ordering::SeqCst));
}

#[rstest]
#[tokio::test]
async fn test_output_end_finishes_session(engine: Arc<FakeEngine>, terminal: Arc<FakeTerminal>) {
    engine.with(|s| {
        s.session_output = vec![Bytes::from_static(b"done\n")];
        s.exit_code = Some(3);
    });
    // stdin stays open for the whole session
    let (_stdin_writer, stdin) = tokio::io::duplex(64);

    let bridge = Bridge::new(engine.clone(), terminal.clone());
    let code = bridge
        .run(exec_transport(), stdin, tokio::io::sink(), no_resizes(), std::future::pending())
        .await
        .unwrap();

    assert_eq!(code, Some(3));
    assert!(!terminal.is_raw());
    assert_eq!(terminal.times_enabled(), 1);
}

#[rstest]
#[tokio::test]
async fn test_output_error_restores_terminal(engine: Arc<FakeEngine>, terminal: Arc<FakeTerminal>) {
    engine.with(|s| {
        s.session_output = vec![Bytes::from_static(b"partial\n")];
        s.session_error = Some(EngineError::Stream("connection reset".to_string()));
    });
    let (_stdin_writer, stdin) = tokio::io::duplex(64);

    let bridge = Bridge::new(engine.clone(), terminal.clone());
    let err = bridge
        .run(exec_transport(), stdin, tokio::io::sink(), no_resizes(), std::future::pending())
        .await
        .unwrap_err();

    assert!(matches!(err, CanonError::Engine(EngineError::Stream(_))));
    assert!(!terminal.is_raw());
    assert_eq!(terminal.times_enabled(), 1);
    // the exit code is never asked for once the session failed
    assert!(engine.calls_to("exec_exit_code").is_empty());
}

#[rstest]
#[tokio::test]
async fn test_cancellation_after_stdin_eof(engine: Arc<FakeEngine>, terminal: Arc<FakeTerminal>) {
    engine.with(|s| {
        s.session_output = vec![Bytes::from_static(b"still running\n")];
        s.session_never_ends = true;
    });

    let bridge = Bridge::new(engine.clone(), terminal.clone());
    let err = bridge
        .run(
            exec_transport(),
            tokio::io::empty(),
            tokio::io::sink(),
            no_resizes(),
            tokio::time::sleep(Duration::from_millis(50)),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, CanonError::Cancelled));
    assert!(!terminal.is_raw());
    assert_eq!(terminal.times_enabled(), 1);
}

#[rstest]
#[tokio::test]
async fn test_initial_resize(engine: Arc<FakeEngine>, terminal: Arc<FakeTerminal>) {
    let bridge = Bridge::new(engine.clone(), terminal.clone());
    bridge
        .run(
            exec_transport(),
            tokio::io::empty(),
            tokio::io::sink(),
            no_resizes(),
            std::future::pending(),
        )
        .await
        .unwrap();

    assert_eq!(
        engine.calls_to("resize_exec"),
        vec!["resize_exec exec-container1 24x80"]
    );
    let calls = engine.calls();
    assert_eq!(calls[0], "create_exec container1 bash -l");
    assert_eq!(calls[1], "start_exec exec-container1");
}

#[rstest]
#[tokio::test]
async fn test_resize_events_reissue_resize(engine: Arc<FakeEngine>, terminal: Arc<FakeTerminal>) {
    engine.with(|s| {
        s.session_output = vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")];
        s.session_delay = Duration::from_millis(30);
    });
    let events: ResizeEvents = stream::iter(vec![(), ()]).chain(stream::pending()).boxed();

    let bridge = Bridge::new(engine.clone(), terminal.clone());
    bridge
        .run(
            exec_transport(),
            tokio::io::empty(),
            tokio::io::sink(),
            events,
            std::future::pending(),
        )
        .await
        .unwrap();

    assert_eq!(engine.calls_to("resize_exec").len(), 3);
}

#[rstest]
#[tokio::test]
async fn test_resize_of_stopped_session_is_ignored(engine: Arc<FakeEngine>, terminal: Arc<FakeTerminal>) {
    engine.with(|s| {
        s.resize_error = Some(EngineError::from_response(409, "Cannot resize a stopped container"));
    });

    let bridge = Bridge::new(engine.clone(), terminal.clone());
    let result = bridge
        .run(
            exec_transport(),
            tokio::io::empty(),
            tokio::io::sink(),
            no_resizes(),
            std::future::pending(),
        )
        .await;

    assert!(result.is_ok());
}

#[rstest]
#[tokio::test]
async fn test_other_resize_failures_abort(engine: Arc<FakeEngine>, terminal: Arc<FakeTerminal>) {
    engine.with(|s| {
        s.resize_error = Some(EngineError::Api {
            status: 500,
            message: "daemon error".to_string(),
        });
    });

    let bridge = Bridge::new(engine.clone(), terminal.clone());
    let err = bridge
        .run(
            exec_transport(),
            tokio::io::empty(),
            tokio::io::sink(),
            no_resizes(),
            std::future::pending(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, CanonError::Engine(EngineError::Api { .. })));
    // failed before raw mode was entered
    assert_eq!(terminal.times_enabled(), 0);
}

#[rstest]
#[tokio::test]
async fn test_attach_transport_starts_container(engine: Arc<FakeEngine>, terminal: Arc<FakeTerminal>) {
    let id = engine.add_container("canon-dev", "created", HashMap::new());
    engine.with(|s| {
        s.session_output = vec![Bytes::from_static(b"hello\n")];
        s.exit_code = Some(7);
    });

    let bridge = Bridge::new(engine.clone(), terminal.clone());
    let code = bridge
        .run(
            Arc::new(AttachTransport::new(id.clone())),
            tokio::io::empty(),
            tokio::io::sink(),
            no_resizes(),
            std::future::pending(),
        )
        .await
        .unwrap();

    assert_eq!(code, Some(7));
    let calls = engine.calls();
    let attach = calls.iter().position(|c| c == &format!("attach_session {}", id)).unwrap();
    let start = calls.iter().position(|c| c == &format!("start {}", id)).unwrap();
    assert!(attach < start);
    assert_eq!(engine.calls_to("resize_container"), vec![format!("resize_container {} 24x80", id)]);
}

#[rstest]
#[tokio::test]
async fn test_start_failure_restores_terminal(engine: Arc<FakeEngine>, terminal: Arc<FakeTerminal>) {
    let bridge = Bridge::new(engine.clone(), terminal.clone());
    let err = bridge
        .run(
            Arc::new(AttachTransport::new("missing")),
            tokio::io::empty(),
            tokio::io::sink(),
            no_resizes(),
            std::future::pending(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, CanonError::Engine(EngineError::NotFound(_))));
    assert_eq!(terminal.times_enabled(), 1);
    assert!(!terminal.is_raw());
}

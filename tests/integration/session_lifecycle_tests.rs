//! End-to-end session lifecycle against fake tool scripts.
//!
//! Validates:
//! - probe → handshake → connect → channel handed to the host
//! - bytes flow both ways through the channel
//! - either end closing the channel ends the session, removes it and reaps
//!   the server process
//! - restart closes the old channel before the new one opens
//! - removal while invoking kills the probe and never launches the server
//! - removal during the handshake interrupts the server before killing it
//! - probe and handshake failures surface as transient statuses

use std::time::Duration;

use analysis_supervisor::models::workspace::Workspace;
use analysis_supervisor::supervisor::session::SessionPhase;
use analysis_supervisor::{AppError, SupervisorEvent};
use serial_test::serial;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use super::test_helpers::{
    crashing_server_script, expect_channel, expect_status, next_event, process_gone,
    server_script, silent_server_script, slow_probe_script, test_supervisor, wait_until, Fixture,
    EVENT_TIMEOUT,
};

async fn listener() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("local addr").port();
    (listener, port)
}

async fn accept(listener: &TcpListener) -> tokio::net::TcpStream {
    let (stream, _) = tokio::time::timeout(EVENT_TIMEOUT, listener.accept())
        .await
        .expect("supervisor never connected")
        .expect("accept");
    stream
}

async fn read_eof<R: AsyncRead + Unpin>(reader: &mut R) -> bool {
    let mut buf = [0u8; 64];
    matches!(
        tokio::time::timeout(EVENT_TIMEOUT, reader.read(&mut buf)).await,
        Ok(Ok(0) | Err(_))
    )
}

#[tokio::test]
#[serial]
async fn start_reaches_running_and_bridges_bytes() {
    let (listener, port) = listener().await;
    let fixture = Fixture::new("app", &server_script("0.21.0", port));
    let (supervisor, mut events) = test_supervisor();

    supervisor.start(fixture.workspace.clone()).await.expect("start");

    let starting = expect_status(&mut events, "Starting").await;
    assert_eq!(starting.message, "Starting Ruby TypeProf (typeprof 0.21.0)...");
    assert!(starting.is_transient());

    let mut server_side = accept(&listener).await;
    let (workspace, mut channel, mut diagnostics) = expect_channel(&mut events).await;
    assert_eq!(workspace, fixture.workspace);

    // The stderr line races the channel hand-over; collect both.
    let mut running = None;
    while running.is_none() || diagnostics.is_empty() {
        match next_event(&mut events).await {
            SupervisorEvent::Status(status) if status.message.contains("is running") => {
                running = Some(status);
            }
            SupervisorEvent::Diagnostic { line, .. } => diagnostics.push(line),
            _ => {}
        }
    }
    let running = running.expect("running status");
    assert_eq!(running.message, "Ruby TypeProf is running");
    assert!(!running.is_transient());
    assert_eq!(diagnostics[0], "typeprof: booting");

    let snapshot = supervisor.snapshot().await;
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].phase, SessionPhase::Running);
    assert_eq!(snapshot[0].endpoint.map(|e| e.port()), Some(port));

    server_side.write_all(b"ping").await.expect("server write");
    let mut buf = [0u8; 4];
    tokio::time::timeout(EVENT_TIMEOUT, channel.read_exact(&mut buf))
        .await
        .expect("channel read timed out")
        .expect("channel read");
    assert_eq!(&buf, b"ping");

    channel.write_all(b"pong").await.expect("channel write");
    tokio::time::timeout(EVENT_TIMEOUT, server_side.read_exact(&mut buf))
        .await
        .expect("server read timed out")
        .expect("server read");
    assert_eq!(&buf, b"pong");

    let pid = fixture.server_pid();
    supervisor.stop(&fixture.workspace).await;
    assert!(read_eof(&mut server_side).await, "stop must close the connection");
    assert!(supervisor.snapshot().await.is_empty());
    assert!(process_gone(pid).await, "server process {pid} outlived stop");
}

#[tokio::test]
#[serial]
async fn server_closing_connection_ends_session() {
    let (listener, port) = listener().await;
    let fixture = Fixture::new("app", &server_script("0.21.0", port));
    let (supervisor, mut events) = test_supervisor();

    supervisor.start(fixture.workspace.clone()).await.expect("start");
    let server_side = accept(&listener).await;
    let (_, mut channel, _) = expect_channel(&mut events).await;

    drop(server_side);

    let stopped = expect_status(&mut events, "stopped").await;
    assert_eq!(stopped.message, "Ruby TypeProf stopped");
    assert!(stopped.is_transient());
    assert!(read_eof(&mut channel).await, "host end must see EOF");
    assert!(!supervisor.is_supervised(&fixture.workspace).await);
    let pid = fixture.server_pid();
    assert!(process_gone(pid).await, "server process {pid} outlived its connection");
}

#[tokio::test]
#[serial]
async fn host_dropping_channel_ends_session() {
    let (listener, port) = listener().await;
    let fixture = Fixture::new("app", &server_script("0.21.0", port));
    let (supervisor, mut events) = test_supervisor();

    supervisor.start(fixture.workspace.clone()).await.expect("start");
    let mut server_side = accept(&listener).await;
    let (_, channel, _) = expect_channel(&mut events).await;

    drop(channel);

    expect_status(&mut events, "stopped").await;
    assert!(read_eof(&mut server_side).await, "server must see the connection close");
    assert!(!supervisor.is_supervised(&fixture.workspace).await);
    let pid = fixture.server_pid();
    assert!(process_gone(pid).await, "server process {pid} outlived its channel");
}

#[tokio::test]
#[serial]
async fn restart_closes_old_channel_before_new_one() {
    let (listener, port) = listener().await;
    let fixture = Fixture::new("app", &server_script("0.21.0", port));
    let (supervisor, mut events) = test_supervisor();

    supervisor.start(fixture.workspace.clone()).await.expect("start");
    let mut first_server = accept(&listener).await;
    let (_, mut first_channel, _) = expect_channel(&mut events).await;
    let first_attempt = supervisor.snapshot().await[0].attempt;

    supervisor.restart(&fixture.workspace).await.expect("restart");

    // stop() has returned, so the old channel is already closed.
    assert!(read_eof(&mut first_channel).await);
    assert!(read_eof(&mut first_server).await);

    let _second_server = accept(&listener).await;
    let (workspace, _second_channel, _) = expect_channel(&mut events).await;
    assert_eq!(workspace, fixture.workspace);

    let snapshot = supervisor.snapshot().await;
    assert_eq!(snapshot.len(), 1);
    assert_ne!(snapshot[0].attempt, first_attempt);

    supervisor.shutdown().await;
    assert!(supervisor.snapshot().await.is_empty());
}

#[tokio::test]
#[serial]
async fn stop_while_invoking_kills_probe_and_skips_server() {
    let fixture = Fixture::new("slow", &slow_probe_script());
    let (supervisor, mut events) = test_supervisor();

    supervisor.start(fixture.workspace.clone()).await.expect("start");
    assert!(wait_until(|| async { fixture.marker("probe-started") }).await);
    assert_eq!(supervisor.snapshot().await[0].phase, SessionPhase::Invoking);

    tokio::time::timeout(Duration::from_secs(5), supervisor.stop(&fixture.workspace))
        .await
        .expect("stop must not wait for the probe");

    assert!(!supervisor.is_supervised(&fixture.workspace).await);
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(!fixture.marker("probe-finished"));
    assert!(!fixture.marker("server-started"));

    while let Ok(event) = events.try_recv() {
        assert!(
            !matches!(event, SupervisorEvent::ChannelReady { .. }),
            "no channel may be handed over after stop"
        );
    }
}

#[tokio::test]
#[serial]
async fn stop_during_handshake_interrupts_server() {
    let fixture = Fixture::new("silent", &silent_server_script());
    let (supervisor, mut events) = test_supervisor();

    supervisor.start(fixture.workspace.clone()).await.expect("start");
    assert!(wait_until(|| async { fixture.marker("server-started") }).await);

    tokio::time::timeout(Duration::from_secs(5), supervisor.stop(&fixture.workspace))
        .await
        .expect("stop must not wait for the handshake timeout");

    assert!(fixture.marker("interrupted"), "server never saw the interrupt");
    assert!(!supervisor.is_supervised(&fixture.workspace).await);
    while let Ok(event) = events.try_recv() {
        if let SupervisorEvent::Status(status) = event {
            assert!(
                !status.message.starts_with("Failed to start"),
                "stop is not a failure: {}",
                status.message
            );
        }
    }
}

#[tokio::test]
#[serial]
async fn dropped_event_receiver_ends_session_cleanly() {
    let (listener, port) = listener().await;
    let fixture = Fixture::new("app", &server_script("0.21.0", port));
    let (supervisor, events) = test_supervisor();
    drop(events);

    supervisor.start(fixture.workspace.clone()).await.expect("start");
    let mut server_side = accept(&listener).await;

    // The host end of the channel went nowhere, so the session closes itself.
    assert!(read_eof(&mut server_side).await);
    assert!(wait_until(|| async { !supervisor.is_supervised(&fixture.workspace).await }).await);
    let pid = fixture.server_pid();
    assert!(process_gone(pid).await, "server process {pid} outlived its session");
}

#[tokio::test]
#[serial]
async fn old_tool_is_reported_with_minimum_version() {
    let fixture = Fixture::new("old", &server_script("0.19.9", 9));
    let (supervisor, mut events) = test_supervisor();

    supervisor.start(fixture.workspace.clone()).await.expect("start");

    let status = expect_status(&mut events, "outdated").await;
    assert_eq!(
        status.message,
        "Ruby TypeProf is outdated; typeprof version 0.19.9 is too old; please use 0.20.0 or later"
    );
    assert!(status.is_transient());
    assert!(wait_until(|| async { !supervisor.is_supervised(&fixture.workspace).await }).await);
    assert!(!fixture.marker("server-started"));
}

#[tokio::test]
#[serial]
async fn server_exit_before_handshake_reports_failure() {
    let fixture = Fixture::new("crash", &crashing_server_script());
    let (supervisor, mut events) = test_supervisor();

    supervisor.start(fixture.workspace.clone()).await.expect("start");

    let status = expect_status(&mut events, "Failed to start").await;
    assert_eq!(
        status.message,
        "Failed to start Ruby TypeProf: handshake failed: server exited before handshake: error code 3"
    );
    assert!(wait_until(|| async { !supervisor.is_supervised(&fixture.workspace).await }).await);
}

#[tokio::test]
#[serial]
async fn double_start_is_rejected() {
    let fixture = Fixture::new("slow", &slow_probe_script());
    let (supervisor, _events) = test_supervisor();

    supervisor.start(fixture.workspace.clone()).await.expect("first start");
    let err = supervisor
        .start(fixture.workspace.clone())
        .await
        .expect_err("second start");
    assert!(matches!(err, AppError::AlreadySupervised(_)));

    supervisor.shutdown().await;
}

#[tokio::test]
#[serial]
async fn non_local_workspace_is_unsupported() {
    let (supervisor, _events) = test_supervisor();
    let err = supervisor
        .start(Workspace::new("remote", "vscode-vfs://github/org/repo"))
        .await
        .expect_err("remote workspace");
    assert!(matches!(err, AppError::UnsupportedWorkspace(_)));
    assert!(supervisor.snapshot().await.is_empty());
}

#[tokio::test]
#[serial]
async fn stop_without_session_is_a_noop() {
    let (supervisor, _events) = test_supervisor();
    supervisor
        .stop(&Workspace::new("ghost", "file:///nowhere"))
        .await;
    assert!(supervisor.snapshot().await.is_empty());
}

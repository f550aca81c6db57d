//! Supervisor lifecycle integration tests: teardown ordering, idle timeout
//! against the full supervisor, and cleanup idempotence under racing
//! termination paths.
//!
//! Run with: cargo test --test supervisor_lifecycle

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;

use voicebridge::core::ai::{AiSession, ChannelTransport, ClientEvent, ServerEvent};
use voicebridge::session::{CallSession, SessionSupervisor, SupervisorConfig};

struct Harness {
    supervisor: SessionSupervisor,
    session: Arc<CallSession>,
    in_tx: mpsc::Sender<Bytes>,
    sent: mpsc::Receiver<ClientEvent>,
    server: mpsc::Sender<ServerEvent>,
}

fn harness(config: SupervisorConfig) -> Harness {
    let session = Arc::new(CallSession::new("caller-1", "corr-1", "arn:test"));
    let (transport, events, sent, server) = ChannelTransport::pair();
    let ai = AiSession::new(Arc::new(transport), events);
    let (in_tx, in_rx) = mpsc::channel::<Bytes>(64);
    let (out_tx, _out_rx) = mpsc::channel::<Bytes>(64);
    let supervisor = SessionSupervisor::new(session.clone(), ai, in_rx, out_tx, config);
    Harness {
        supervisor,
        session,
        in_tx,
        sent,
        server,
    }
}

fn event_tag(event: &ClientEvent) -> &'static str {
    match event {
        ClientEvent::SessionStart { .. } => "sessionStart",
        ClientEvent::PromptStart { .. } => "promptStart",
        ClientEvent::ContentStart { .. } => "contentStart",
        ClientEvent::TextInput { .. } => "textInput",
        ClientEvent::AudioInput { .. } => "audioInput",
        ClientEvent::ContentEnd { .. } => "contentEnd",
        ClientEvent::PromptEnd { .. } => "promptEnd",
        ClientEvent::SessionEnd {} => "sessionEnd",
    }
}

#[tokio::test]
async fn test_teardown_events_are_ordered() {
    let mut h = harness(SupervisorConfig::default());
    let handle = tokio::spawn(h.supervisor.run());
    tokio::time::sleep(Duration::from_millis(20)).await;

    h.server.send(ServerEvent::StreamComplete {}).await.unwrap();
    handle.await.unwrap().unwrap();

    let mut tags = Vec::new();
    while let Ok(event) = h.sent.try_recv() {
        tags.push(event_tag(&event));
    }
    // Startup sequence, then the ordered teardown tail.
    assert_eq!(
        tags,
        vec![
            "sessionStart",
            "promptStart",
            "contentStart",
            "textInput",
            "contentEnd",
            "contentStart",
            "contentEnd",
            "promptEnd",
            "sessionEnd",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_idle_timeout_closes_the_whole_call() {
    let config = SupervisorConfig {
        idle_timeout: Duration::from_secs(60),
        ..Default::default()
    };
    let mut h = harness(config);
    let handle = tokio::spawn(h.supervisor.run());
    tokio::time::sleep(Duration::from_millis(1)).await;

    tokio::time::advance(Duration::from_secs(61)).await;
    handle.await.unwrap().unwrap();

    let log = h.session.activity_log();
    assert!(log.iter().any(|r| r.tag == "idle_timeout"));
    assert!(log.iter().any(|r| r.tag == "cleanup_complete"));

    // The teardown still ran in order after the timeout.
    let tags: Vec<&'static str> = std::iter::from_fn(|| h.sent.try_recv().ok())
        .map(|e| event_tag(&e))
        .collect();
    let tail: Vec<&&str> = tags.iter().rev().take(3).collect();
    assert_eq!(tail, vec![&"sessionEnd", &"promptEnd", &"contentEnd"]);
}

#[tokio::test]
async fn test_racing_termination_paths_clean_up_once() {
    let mut h = harness(SupervisorConfig::default());
    let cancel = h.supervisor.cancel_token();
    let handle = tokio::spawn(h.supervisor.run());
    tokio::time::sleep(Duration::from_millis(20)).await;

    // Cancel, close the caller feed and report stream completion all at
    // once; whichever wins, cleanup must run exactly once.
    cancel.cancel();
    drop(h.in_tx);
    let _ = h.server.send(ServerEvent::StreamComplete {}).await;

    handle.await.unwrap().unwrap();

    let log = h.session.activity_log();
    assert_eq!(log.iter().filter(|r| r.tag == "cleanup_started").count(), 1);
    assert_eq!(
        log.iter().filter(|r| r.tag == "cleanup_complete").count(),
        1
    );
    // The single final summary reports the call duration and counts.
    let complete = log.iter().find(|r| r.tag == "cleanup_complete").unwrap();
    assert!(complete.detail.contains("duration_ms="));

    // sessionEnd was sent exactly once.
    let session_ends = std::iter::from_fn(|| h.sent.try_recv().ok())
        .filter(|e| matches!(e, ClientEvent::SessionEnd {}))
        .count();
    assert_eq!(session_ends, 1);
}

#[tokio::test]
async fn test_interruption_is_flagged_and_counted() {
    let h = harness(SupervisorConfig::default());
    let handle = tokio::spawn(h.supervisor.run());
    tokio::time::sleep(Duration::from_millis(20)).await;

    // Agent starts speaking, caller audio lands immediately after.
    h.server
        .send(ServerEvent::ContentStart {
            content_name: None,
            content_type: None,
        })
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    h.in_tx.send(Bytes::from(vec![0xFFu8; 160])).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(h.session.summary().interruptions, 1);
    assert!(h.session.activity_log().iter().any(|r| r.tag == "interruption"));

    h.server.send(ServerEvent::StreamComplete {}).await.unwrap();
    handle.await.unwrap().unwrap();
}

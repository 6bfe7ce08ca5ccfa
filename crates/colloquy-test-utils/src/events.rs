//! Event channel helpers for integration tests.

use std::time::Duration;

use colloquy_core::ChatEvent;
use tokio::sync::mpsc::UnboundedReceiver;

/// How long [`collect_request`] and [`recv_event`] wait for a single
/// event before panicking. Generous so retry backoffs fit under it.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Receive one event or panic. Keeps test bodies free of timeout
/// plumbing.
pub async fn recv_event(rx: &mut UnboundedReceiver<ChatEvent>) -> ChatEvent {
    tokio::time::timeout(EVENT_TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for chat event")
        .expect("event channel closed")
}

/// Drain events until a terminal one (`StreamEnded` or
/// `AnswerComplete`) arrives, returning everything received including
/// the terminal event.
pub async fn collect_request(rx: &mut UnboundedReceiver<ChatEvent>) -> Vec<ChatEvent> {
    let mut events = Vec::new();
    loop {
        let event = recv_event(rx).await;
        let done = event.is_terminal();
        events.push(event);
        if done {
            return events;
        }
    }
}

/// Wait for a probe outcome (`ConnectionResult` or `ModelsResult`),
/// skipping nothing: any other event arriving first is a test failure.
pub async fn recv_probe_result(rx: &mut UnboundedReceiver<ChatEvent>) -> ChatEvent {
    let event = recv_event(rx).await;
    assert!(
        matches!(
            event,
            ChatEvent::ConnectionResult { .. } | ChatEvent::ModelsResult { .. }
        ),
        "expected probe result, got {event:?}"
    );
    event
}

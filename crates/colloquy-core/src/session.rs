//! Per-request lifecycle: a pure state machine plus the async drivers
//! that feed it from the transport.
//!
//! [`RequestSession`] owns the frame buffer and the streaming
//! accumulator for one in-flight request and makes every transition
//! explicit, so the ordering rules (reasoning before answer, terminal
//! event last, nothing after a halt) are enforced in one place and
//! testable without a socket. The drivers at the bottom run inside
//! spawned tasks owned by [`ChatClient`](crate::client::ChatClient).

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::classify;
use crate::error::ClientError;
use crate::event::ChatEvent;
use crate::framing::{FrameBuffer, FramingMode};
use crate::provider::ProviderAdapter;
use crate::transport::{HttpTransport, WireRequest};
use crate::types::{ProviderSession, StreamingAccumulator};

/// Lifecycle of a single chat request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created but not yet dispatched.
    Idle,
    /// Request handed to the transport.
    Sending,
    /// Response stream open, frames arriving.
    Streaming,
    /// Blocking request sent, waiting for the full body.
    AwaitingFinal,
    /// Finished normally; terminal.
    Completed,
    /// Torn down by the user; terminal.
    Cancelled,
    /// Ended with an error event; terminal.
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }
}

/// State machine for one request, independent of any I/O.
pub struct RequestSession {
    state: SessionState,
    buffer: FrameBuffer,
    acc: StreamingAccumulator,
}

impl RequestSession {
    pub fn new(mode: FramingMode, show_reasoning: bool) -> Self {
        Self {
            state: SessionState::Idle,
            buffer: FrameBuffer::new(mode),
            acc: StreamingAccumulator::new(show_reasoning),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Read-only view of the accumulator, used by tests and the drivers.
    pub fn accumulator(&self) -> &StreamingAccumulator {
        &self.acc
    }

    pub fn begin(&mut self) {
        if self.state == SessionState::Idle {
            self.state = SessionState::Sending;
        }
    }

    pub fn on_stream_open(&mut self) {
        if self.state == SessionState::Sending {
            self.state = SessionState::Streaming;
        }
    }

    pub fn on_request_sent(&mut self) {
        if self.state == SessionState::Sending {
            self.state = SessionState::AwaitingFinal;
        }
    }

    /// Feeds raw bytes through the frame buffer and the adapter.
    ///
    /// Returns the events to deliver plus a halt flag. When a frame
    /// halts the stream, frames already buffered behind it are dropped
    /// and the session moves to `Failed`; the halting event is the last
    /// one returned.
    pub fn on_chunk(
        &mut self,
        adapter: &dyn ProviderAdapter,
        session: &mut ProviderSession,
        bytes: &[u8],
    ) -> (Vec<ChatEvent>, bool) {
        if self.state != SessionState::Streaming {
            debug!(state = ?self.state, "dropping chunk outside streaming state");
            return (Vec::new(), false);
        }
        let mut events = Vec::new();
        for frame in self.buffer.push(bytes) {
            let outcome = adapter.parse_frame(&frame, session, &mut self.acc);
            events.extend(outcome.events);
            if outcome.halt {
                self.state = SessionState::Failed;
                return (events, true);
            }
        }
        (events, false)
    }

    /// Closes the stream normally: adapter flush events, then the
    /// terminal `StreamEnded`.
    pub fn on_stream_end(&mut self, adapter: &dyn ProviderAdapter) -> Vec<ChatEvent> {
        if self.state.is_terminal() {
            return Vec::new();
        }
        let pending = self.buffer.pending();
        if pending > 0 {
            debug!(pending, "discarding incomplete trailing frame");
        }
        let mut events = adapter.finish_stream(&mut self.acc);
        events.push(ChatEvent::StreamEnded);
        self.state = SessionState::Completed;
        events
    }

    /// Records the blocking-mode outcome.
    pub fn on_final(&mut self) {
        if !self.state.is_terminal() {
            self.state = SessionState::Completed;
        }
    }

    /// Converts a transport or parse error into the user-facing
    /// terminal event.
    pub fn on_failure(&mut self, err: &ClientError) -> ChatEvent {
        warn!(%err, "request failed");
        self.state = SessionState::Failed;
        ChatEvent::error(classify::user_message(err))
    }

    /// Idempotent: cancelling twice is the same as cancelling once, and
    /// cancelling an already finished request changes nothing.
    pub fn cancel(&mut self) {
        if !self.state.is_terminal() {
            self.state = SessionState::Cancelled;
        }
    }
}

/// Everything a driver task needs, cloned out of the client before
/// spawning.
pub(crate) struct RequestContext {
    pub adapter: Arc<dyn ProviderAdapter>,
    pub transport: HttpTransport,
    pub session: Arc<Mutex<ProviderSession>>,
    pub events: mpsc::UnboundedSender<ChatEvent>,
    pub show_reasoning: bool,
}

/// Locks the shared provider session, recovering from poisoning. A
/// panicked driver task can at worst leave stale conversation ids
/// behind, which the next reset clears.
pub(crate) fn lock_session(session: &Mutex<ProviderSession>) -> MutexGuard<'_, ProviderSession> {
    session.lock().unwrap_or_else(|e| e.into_inner())
}

/// Drives one streaming request to completion, pushing events into the
/// client channel as they decode.
pub(crate) async fn run_streaming(ctx: RequestContext, wire: WireRequest) {
    let mut request = RequestSession::new(ctx.adapter.framing(), ctx.show_reasoning);
    request.begin();

    let mut stream = match ctx.transport.open_stream(wire).await {
        Ok(stream) => stream,
        Err(err) => {
            let _ = ctx.events.send(request.on_failure(&err));
            return;
        }
    };
    request.on_stream_open();

    loop {
        match stream.next_chunk().await {
            Ok(Some(chunk)) => {
                let (events, halted) = {
                    let mut session = lock_session(&ctx.session);
                    request.on_chunk(ctx.adapter.as_ref(), &mut session, &chunk)
                };
                for event in events {
                    if ctx.events.send(event).is_err() {
                        // Receiver dropped; nobody is listening anymore.
                        return;
                    }
                }
                if halted {
                    return;
                }
            }
            Ok(None) => {
                for event in request.on_stream_end(ctx.adapter.as_ref()) {
                    let _ = ctx.events.send(event);
                }
                return;
            }
            Err(err) => {
                let _ = ctx.events.send(request.on_failure(&err));
                return;
            }
        }
    }
}

/// Drives one blocking request: a single round trip, a single terminal
/// event.
pub(crate) async fn run_blocking(ctx: RequestContext, wire: WireRequest) {
    let mut request = RequestSession::new(ctx.adapter.framing(), ctx.show_reasoning);
    request.begin();
    request.on_request_sent();

    let event = match blocking_event(&ctx, wire).await {
        Ok(event) => {
            request.on_final();
            event
        }
        Err(err) => request.on_failure(&err),
    };
    let _ = ctx.events.send(event);
}

async fn blocking_event(
    ctx: &RequestContext,
    wire: WireRequest,
) -> Result<ChatEvent, ClientError> {
    let response = ctx.transport.execute(wire).await?;
    if !response.is_success() {
        return Err(response.into_error());
    }
    let mut session = lock_session(&ctx.session);
    ctx.adapter
        .parse_final(&response.body, ctx.show_reasoning, &mut session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ollama::OllamaAdapter;
    use colloquy_config::ApiKey;
    use pretty_assertions::assert_eq;

    fn session_under_test() -> (RequestSession, OllamaAdapter, ProviderSession) {
        (
            RequestSession::new(FramingMode::Ndjson, true),
            OllamaAdapter::new("http://localhost:11434", ApiKey::default()),
            ProviderSession::new(),
        )
    }

    #[test]
    fn test_normal_streaming_lifecycle() {
        let (mut request, adapter, mut provider) = session_under_test();
        assert_eq!(request.state(), SessionState::Idle);

        request.begin();
        assert_eq!(request.state(), SessionState::Sending);
        request.on_stream_open();
        assert_eq!(request.state(), SessionState::Streaming);

        let (events, halted) = request.on_chunk(
            &adapter,
            &mut provider,
            b"{\"message\":{\"content\":\"Hel\"}}\n{\"message\":{\"content\":\"lo\"}}\n",
        );
        assert!(!halted);
        assert_eq!(
            events,
            vec![
                ChatEvent::AnswerDelta("Hel".into()),
                ChatEvent::AnswerDelta("lo".into())
            ]
        );

        let events = request.on_stream_end(&adapter);
        assert_eq!(events, vec![ChatEvent::StreamEnded]);
        assert_eq!(request.state(), SessionState::Completed);
        assert_eq!(request.accumulator().answer(), "Hello");
    }

    #[test]
    fn test_chunk_split_mid_frame_is_reassembled() {
        let (mut request, adapter, mut provider) = session_under_test();
        request.begin();
        request.on_stream_open();

        let (events, _) =
            request.on_chunk(&adapter, &mut provider, b"{\"message\":{\"content\":\"a");
        assert!(events.is_empty());

        let (events, _) = request.on_chunk(&adapter, &mut provider, b"b\"}}\n");
        assert_eq!(events, vec![ChatEvent::AnswerDelta("ab".into())]);
    }

    #[test]
    fn test_halt_drops_frames_behind_it() {
        let (mut request, adapter, mut provider) = session_under_test();
        request.begin();
        request.on_stream_open();

        let (events, halted) = request.on_chunk(
            &adapter,
            &mut provider,
            b"{\"error\":\"boom\"}\n{\"message\":{\"content\":\"never\"}}\n",
        );
        assert!(halted);
        assert_eq!(events, vec![ChatEvent::error("boom")]);
        assert_eq!(request.state(), SessionState::Failed);
        assert_eq!(request.accumulator().answer(), "");

        // Nothing more comes out of a failed session.
        let (events, halted) = request.on_chunk(
            &adapter,
            &mut provider,
            b"{\"message\":{\"content\":\"late\"}}\n",
        );
        assert!(events.is_empty());
        assert!(!halted);
        assert!(request.on_stream_end(&adapter).is_empty());
    }

    #[test]
    fn test_malformed_frame_between_valid_ones_is_skipped() {
        let (mut request, adapter, mut provider) = session_under_test();
        request.begin();
        request.on_stream_open();

        let (events, halted) = request.on_chunk(
            &adapter,
            &mut provider,
            b"{\"message\":{\"content\":\"He\"}}\n### not json ###\n{\"message\":{\"content\":\"llo\"}}\n",
        );
        assert!(!halted);
        assert_eq!(
            events,
            vec![
                ChatEvent::AnswerDelta("He".into()),
                ChatEvent::AnswerDelta("llo".into())
            ]
        );

        let events = request.on_stream_end(&adapter);
        assert_eq!(events, vec![ChatEvent::StreamEnded]);
    }

    #[test]
    fn test_failure_produces_classified_event() {
        let (mut request, _, _) = session_under_test();
        request.begin();

        let event = request.on_failure(&ClientError::Timeout);
        assert_eq!(request.state(), SessionState::Failed);
        match event {
            ChatEvent::AnswerComplete { text, is_error } => {
                assert!(is_error);
                assert!(text.contains("timed out"));
            }
            other => panic!("expected error completion, got {other:?}"),
        }
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let (mut request, _, _) = session_under_test();
        request.begin();
        request.on_stream_open();

        request.cancel();
        assert_eq!(request.state(), SessionState::Cancelled);
        request.cancel();
        assert_eq!(request.state(), SessionState::Cancelled);
    }

    #[test]
    fn test_cancel_after_completion_is_a_no_op() {
        let (mut request, adapter, _) = session_under_test();
        request.begin();
        request.on_stream_open();
        request.on_stream_end(&adapter);
        assert_eq!(request.state(), SessionState::Completed);

        request.cancel();
        assert_eq!(request.state(), SessionState::Completed);
    }

    #[test]
    fn test_chunks_ignored_before_stream_opens() {
        let (mut request, adapter, mut provider) = session_under_test();
        let (events, halted) = request.on_chunk(
            &adapter,
            &mut provider,
            b"{\"message\":{\"content\":\"x\"}}\n",
        );
        assert!(events.is_empty());
        assert!(!halted);
        assert_eq!(request.state(), SessionState::Idle);
    }

    #[test]
    fn test_blocking_lifecycle_states() {
        let (mut request, _, _) = session_under_test();
        request.begin();
        request.on_request_sent();
        assert_eq!(request.state(), SessionState::AwaitingFinal);
        request.on_final();
        assert_eq!(request.state(), SessionState::Completed);
    }
}

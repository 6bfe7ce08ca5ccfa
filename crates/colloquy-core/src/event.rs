//! Normalized events delivered to the front end.
//!
//! Every provider difference is flattened into [`ChatEvent`] before it
//! crosses the channel; consumers never see wire formats, HTTP statuses,
//! or provider names.

use crate::types::ToolCallRequest;

/// One event on the client's outbound channel, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// A fragment of reasoning ("thinking") text from a streamed response.
    ReasoningDelta(String),

    /// Marks the reasoning-to-answer transition. Emitted once per request,
    /// and only when reasoning deltas were actually delivered before it.
    AnswerStarted,

    /// A fragment of answer text from a streamed response.
    AnswerDelta(String),

    /// A streamed response finished cleanly. Terminal.
    StreamEnded,

    /// A complete response (blocking mode) or a terminal failure carrying
    /// a user-facing message. Terminal.
    AnswerComplete { text: String, is_error: bool },

    /// The model asked the application to run a tool.
    ToolCallRequested(ToolCallRequest),

    /// Outcome of a connection check, after retries settled.
    ConnectionResult { ok: bool, message: String },

    /// Outcome of a model-list fetch, after retries settled.
    ModelsResult {
        ok: bool,
        models: Vec<String>,
        message: String,
    },
}

impl ChatEvent {
    /// A terminal failure with a user-facing message.
    pub fn error(text: impl Into<String>) -> Self {
        ChatEvent::AnswerComplete {
            text: text.into(),
            is_error: true,
        }
    }

    /// A successful complete (blocking-mode) answer.
    pub fn complete(text: impl Into<String>) -> Self {
        ChatEvent::AnswerComplete {
            text: text.into(),
            is_error: false,
        }
    }

    /// Whether this event ends the request it belongs to.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ChatEvent::StreamEnded | ChatEvent::AnswerComplete { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_constructor() {
        let ev = ChatEvent::error("boom");
        assert_eq!(
            ev,
            ChatEvent::AnswerComplete {
                text: "boom".into(),
                is_error: true
            }
        );
        assert!(ev.is_terminal());
    }

    #[test]
    fn test_deltas_are_not_terminal() {
        assert!(!ChatEvent::AnswerDelta("hi".into()).is_terminal());
        assert!(!ChatEvent::ReasoningDelta("hmm".into()).is_terminal());
        assert!(!ChatEvent::AnswerStarted.is_terminal());
    }
}

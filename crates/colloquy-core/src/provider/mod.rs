//! Provider integration — one trait over every chat backend.
//!
//! Each backend speaks its own wire dialect; the adapters translate both
//! directions so nothing above this module knows which provider is active.
//! Currently supported:
//!
//! - **Dify** — workflow apps with server-side conversation state
//! - **OpenAI-compatible** — `/chat/completions` gateways (DeepSeek, vLLM,
//!   LM Studio, corporate proxies)
//! - **Ollama** — a local daemon speaking NDJSON
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐  chat_request   ┌─────────────────┐   WireRequest   ┌───────────────┐
//! │ ChatClient │────────────────▶│ ProviderAdapter │────────────────▶│ HttpTransport │
//! └─────┬──────┘                 └────────┬────────┘                 └───────┬───────┘
//!       ▲                                 │ parse_frame                      │ chunks
//!       │ ChatEvent                       ▼                                  ▼
//!       └─────────────────────────── FrameOutcome ◀─────frames──────── FrameBuffer
//! ```
//!
//! Parsing is synchronous: adapters never touch the network, which keeps
//! every wire-format rule testable with plain strings.

pub mod dify;
pub mod ollama;
pub mod openai;

pub use dify::DifyAdapter;
pub use ollama::OllamaAdapter;
pub use openai::OpenAiAdapter;

use colloquy_config::{ProviderConfig, ProviderKind};

use crate::error::ClientError;
use crate::event::ChatEvent;
use crate::framing::FramingMode;
use crate::transport::WireRequest;
use crate::types::{ChatRequest, ProviderSession, StreamingAccumulator, ToolCallRequest};

/// Per-send parameters resolved by the client at call time.
#[derive(Debug, Clone, Copy)]
pub struct SendOptions<'a> {
    /// Model identifier (ignored by workflow providers).
    pub model: &'a str,
    /// Streaming or blocking response mode.
    pub stream: bool,
    /// Whether reasoning output is requested and surfaced.
    pub show_reasoning: bool,
}

/// What one parsed frame produced.
///
/// Most frames yield zero or one event; the reasoning-to-answer boundary
/// yields two ([`ChatEvent::AnswerStarted`] plus the first delta).
#[derive(Debug, Default)]
pub struct FrameOutcome {
    /// Events to deliver, in order.
    pub events: Vec<ChatEvent>,
    /// Stop reading the stream: the provider reported a terminal error
    /// in-band.
    pub halt: bool,
}

impl FrameOutcome {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn event(event: ChatEvent) -> Self {
        Self {
            events: vec![event],
            halt: false,
        }
    }

    pub fn halt(event: ChatEvent) -> Self {
        Self {
            events: vec![event],
            halt: true,
        }
    }
}

/// One chat backend dialect.
///
/// Implementations must be `Send + Sync`; the client shares them with
/// request tasks behind an `Arc`. Request-building and model parsing take
/// `&self` and must not mutate session state. Only the frame and final
/// parsers may persist ids into the [`ProviderSession`].
pub trait ProviderAdapter: Send + Sync {
    /// Which config kind this adapter serves.
    fn kind(&self) -> ProviderKind;

    /// How this backend delimits stream frames.
    fn framing(&self) -> FramingMode;

    /// Build the chat request (streaming or blocking).
    fn chat_request(
        &self,
        request: &ChatRequest,
        opts: SendOptions<'_>,
        session: &ProviderSession,
    ) -> Result<WireRequest, ClientError>;

    /// Build the cheap reachability probe.
    fn connection_request(&self) -> WireRequest;

    /// Build the model-list request.
    fn models_request(&self) -> WireRequest;

    /// Parse one complete frame payload into events.
    ///
    /// Malformed frames must come back as [`FrameOutcome::none`]; the
    /// stream carries on without them.
    fn parse_frame(
        &self,
        frame: &str,
        session: &mut ProviderSession,
        acc: &mut StreamingAccumulator,
    ) -> FrameOutcome;

    /// Flush whatever the stream left pending: a dangling `</think>` tag,
    /// an assembled tool call. Called once on clean end of stream, before
    /// [`ChatEvent::StreamEnded`].
    fn finish_stream(&self, acc: &mut StreamingAccumulator) -> Vec<ChatEvent> {
        let _ = acc;
        Vec::new()
    }

    /// Parse a complete blocking-mode body into its single event.
    fn parse_final(
        &self,
        body: &str,
        show_reasoning: bool,
        session: &mut ProviderSession,
    ) -> Result<ChatEvent, ClientError>;

    /// Parse the model-list body into model ids.
    fn parse_models(&self, body: &str) -> Result<Vec<String>, ClientError>;

    /// Build the follow-up request that feeds a tool result back to the
    /// model. Providers that execute tools server-side return
    /// [`ClientError::Unsupported`].
    fn tool_result_request(
        &self,
        call: &ToolCallRequest,
        result: &str,
        opts: SendOptions<'_>,
        session: &ProviderSession,
    ) -> Result<WireRequest, ClientError>;

    /// Build the follow-up-suggestions request, where the backend offers
    /// one.
    fn suggestions_request(&self, session: &ProviderSession) -> Result<WireRequest, ClientError> {
        let _ = session;
        Err(ClientError::Unsupported("follow-up suggestions"))
    }

    /// Parse the follow-up-suggestions body.
    fn parse_suggestions(&self, body: &str) -> Result<Vec<String>, ClientError> {
        let _ = body;
        Err(ClientError::Unsupported("follow-up suggestions"))
    }
}

/// Append the reasoning directive understood by prompt-driven backends.
pub(crate) fn think_directive(text: &str, show_reasoning: bool) -> String {
    if show_reasoning {
        format!("{text} /think")
    } else {
        format!("{text} /no_think")
    }
}

/// Wrap a raw base64 payload as a data URL, sniffing the format from the
/// encoded magic bytes.
pub(crate) fn image_data_url(base64: &str) -> String {
    let mime = if base64.starts_with("/9j/") {
        "image/jpeg"
    } else if base64.starts_with("R0lGOD") {
        "image/gif"
    } else if base64.starts_with("UklGR") {
        "image/webp"
    } else {
        "image/png"
    };
    format!("data:{mime};base64,{base64}")
}

/// Tool-call arguments arrive as a JSON string from some backends and as
/// a structured object from others; normalize to the raw JSON string.
pub(crate) fn arguments_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Create the adapter for a provider profile.
pub fn create_adapter(config: &ProviderConfig) -> Box<dyn ProviderAdapter> {
    match config.kind {
        ProviderKind::Dify => Box::new(DifyAdapter::new(&config.base_url, config.api_key.clone())),
        ProviderKind::OpenAi => {
            Box::new(OpenAiAdapter::new(&config.base_url, config.api_key.clone()))
        }
        ProviderKind::Ollama => {
            Box::new(OllamaAdapter::new(&config.base_url, config.api_key.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use colloquy_config::ApiKey;

    fn profile(kind: ProviderKind) -> ProviderConfig {
        ProviderConfig {
            kind,
            base_url: "http://localhost:9999/v1/".to_string(),
            api_key: ApiKey::new("test-key"),
            model: "test-model".to_string(),
            show_reasoning: true,
        }
    }

    #[test]
    fn test_factory_matches_kind() {
        for kind in ProviderKind::ALL {
            let adapter = create_adapter(&profile(kind));
            assert_eq!(adapter.kind(), kind);
        }
    }

    #[test]
    fn test_factory_assigns_framing() {
        assert_eq!(
            create_adapter(&profile(ProviderKind::Dify)).framing(),
            FramingMode::Sse
        );
        assert_eq!(
            create_adapter(&profile(ProviderKind::OpenAi)).framing(),
            FramingMode::SseSkipKeepAlive
        );
        assert_eq!(
            create_adapter(&profile(ProviderKind::Ollama)).framing(),
            FramingMode::Ndjson
        );
    }

    #[test]
    fn test_suggestions_default_unsupported() {
        let adapter = create_adapter(&profile(ProviderKind::OpenAi));
        let session = ProviderSession::new();
        assert!(matches!(
            adapter.suggestions_request(&session),
            Err(ClientError::Unsupported(_))
        ));
    }

    #[test]
    fn test_think_directive() {
        assert_eq!(think_directive("hello", true), "hello /think");
        assert_eq!(think_directive("hello", false), "hello /no_think");
    }

    #[test]
    fn test_image_data_url_sniffs_format() {
        assert!(image_data_url("/9j/4AAQ").starts_with("data:image/jpeg;base64,"));
        assert!(image_data_url("iVBORw0KGgo").starts_with("data:image/png;base64,"));
        assert!(image_data_url("R0lGODlh").starts_with("data:image/gif;base64,"));
        assert!(image_data_url("UklGRh").starts_with("data:image/webp;base64,"));
        assert!(image_data_url("????").starts_with("data:image/png;base64,"));
    }

    #[test]
    fn test_arguments_to_string() {
        assert_eq!(
            arguments_to_string(&serde_json::json!({"q": "x"})),
            r#"{"q":"x"}"#
        );
        assert_eq!(
            arguments_to_string(&serde_json::Value::String("{\"a\":1}".into())),
            "{\"a\":1}"
        );
        assert_eq!(arguments_to_string(&serde_json::Value::Null), "");
    }
}

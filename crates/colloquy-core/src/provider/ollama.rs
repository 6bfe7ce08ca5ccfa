//! Ollama adapter for local models.
//!
//! Ollama streams newline-delimited JSON from `/api/chat` and splits
//! reasoning into a separate `message.thinking` field. Downstream
//! consumers expect reasoning wrapped in literal `<think>` tags, so this
//! adapter injects the opening tag into the first reasoning delta and
//! prepends the closing tag to the first answer delta.

use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use colloquy_config::{ApiKey, ProviderKind};

use crate::error::ClientError;
use crate::event::ChatEvent;
use crate::framing::FramingMode;
use crate::transport::WireRequest;
use crate::types::{ChatRequest, ProviderSession, StreamingAccumulator, ToolCallRequest};

use super::arguments_to_string;
use super::{FrameOutcome, ProviderAdapter, SendOptions};

/// Adapter for a local Ollama server.
pub struct OllamaAdapter {
    base_url: String,
    api_key: ApiKey,
}

impl OllamaAdapter {
    pub fn new(base_url: &str, api_key: ApiKey) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn user_message(&self, request: &ChatRequest) -> serde_json::Value {
        let mut message = json!({
            "role": "user",
            "content": request.composed_text(),
        });
        if !request.images.is_empty() {
            // Ollama takes raw base64 strings, not data URLs.
            message["images"] = json!(request.images);
        }
        message
    }
}

impl ProviderAdapter for OllamaAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Ollama
    }

    fn framing(&self) -> FramingMode {
        FramingMode::Ndjson
    }

    fn chat_request(
        &self,
        request: &ChatRequest,
        opts: SendOptions<'_>,
        _session: &ProviderSession,
    ) -> Result<WireRequest, ClientError> {
        // Reasoning is toggled through the native `think` flag rather
        // than a prompt directive.
        let body = json!({
            "model": opts.model,
            "messages": [self.user_message(request)],
            "stream": opts.stream,
            "think": opts.show_reasoning,
        });
        debug!(model = opts.model, streaming = opts.stream, "ollama chat request");
        Ok(WireRequest::post_json(self.endpoint("/api/chat"), body).bearer(&self.api_key))
    }

    fn connection_request(&self) -> WireRequest {
        // The Ollama root answers any GET with a liveness banner.
        WireRequest::get(format!("{}/", self.base_url)).bearer(&self.api_key)
    }

    fn models_request(&self) -> WireRequest {
        WireRequest::get(self.endpoint("/api/tags")).bearer(&self.api_key)
    }

    fn parse_frame(
        &self,
        frame: &str,
        _session: &mut ProviderSession,
        acc: &mut StreamingAccumulator,
    ) -> FrameOutcome {
        let parsed: OllamaFrame = match serde_json::from_str(frame) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(%err, "skipping malformed ollama frame");
                return FrameOutcome::none();
            }
        };

        if let Some(error) = parsed.error {
            return FrameOutcome::halt(ChatEvent::error(error));
        }

        let Some(message) = parsed.message else {
            return FrameOutcome::none();
        };

        let mut events = Vec::new();

        if let Some(thinking) = message.thinking.filter(|t| !t.is_empty()) {
            if acc.reasoning_open() && acc.show_reasoning() {
                acc.note_reasoning(&thinking);
                if acc.think_tag_opened() {
                    events.push(ChatEvent::ReasoningDelta(thinking));
                } else {
                    acc.open_think_tag();
                    events.push(ChatEvent::ReasoningDelta(format!("<think>{thinking}")));
                }
            }
        }

        if let Some(content) = message.content.filter(|c| !c.is_empty()) {
            acc.close_reasoning();
            acc.note_answer(&content);
            if acc.think_tag_needs_close() {
                acc.close_think_tag();
                events.push(ChatEvent::AnswerDelta(format!("</think>{content}")));
            } else {
                events.push(ChatEvent::AnswerDelta(content));
            }
        }

        if let Some(calls) = message.tool_calls {
            // Ollama delivers complete tool calls in one frame.
            for call in calls {
                events.push(ChatEvent::ToolCallRequested(ToolCallRequest {
                    id: String::new(),
                    name: call.function.name,
                    arguments: arguments_to_string(&call.function.arguments),
                }));
            }
        }

        FrameOutcome {
            events,
            halt: false,
        }
    }

    fn finish_stream(&self, acc: &mut StreamingAccumulator) -> Vec<ChatEvent> {
        // A stream that ended mid-reasoning leaves the synthetic tag
        // dangling; close it so downstream splitting stays balanced.
        if acc.think_tag_needs_close() {
            acc.close_think_tag();
            return vec![ChatEvent::AnswerDelta("</think>".to_string())];
        }
        Vec::new()
    }

    fn parse_final(
        &self,
        body: &str,
        show_reasoning: bool,
        _session: &mut ProviderSession,
    ) -> Result<ChatEvent, ClientError> {
        let parsed: OllamaFrame =
            serde_json::from_str(body).map_err(|e| ClientError::Parse(e.to_string()))?;

        if let Some(error) = parsed.error {
            return Ok(ChatEvent::error(error));
        }

        let message = parsed.message.ok_or(ClientError::InvalidResponse)?;

        if let Some(call) = message.tool_calls.into_iter().flatten().next() {
            return Ok(ChatEvent::ToolCallRequested(ToolCallRequest {
                id: String::new(),
                name: call.function.name,
                arguments: arguments_to_string(&call.function.arguments),
            }));
        }

        let content = message.content.unwrap_or_default();
        let text = match message.thinking.filter(|t| !t.is_empty()) {
            Some(thinking) if show_reasoning => format!("<think>{thinking}</think>{content}"),
            _ => content,
        };
        Ok(ChatEvent::complete(text))
    }

    fn parse_models(&self, body: &str) -> Result<Vec<String>, ClientError> {
        let parsed: OllamaTags =
            serde_json::from_str(body).map_err(|e| ClientError::Parse(e.to_string()))?;
        Ok(parsed.models.into_iter().map(|m| m.name).collect())
    }

    fn tool_result_request(
        &self,
        call: &ToolCallRequest,
        result: &str,
        opts: SendOptions<'_>,
        _session: &ProviderSession,
    ) -> Result<WireRequest, ClientError> {
        // Ollama wants arguments back as a JSON object, not a string.
        let arguments: serde_json::Value =
            serde_json::from_str(&call.arguments).unwrap_or_else(|_| json!({}));
        let body = json!({
            "model": opts.model,
            "messages": [
                {
                    "role": "assistant",
                    "tool_calls": [{
                        "function": {"name": call.name, "arguments": arguments},
                    }],
                },
                {
                    "role": "tool",
                    "content": result,
                },
            ],
            "stream": false,
        });
        Ok(WireRequest::post_json(self.endpoint("/api/chat"), body).bearer(&self.api_key))
    }
}

// ── Ollama API types (private) ──────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct OllamaFrame {
    message: Option<OllamaMessage>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OllamaMessage {
    content: Option<String>,
    thinking: Option<String>,
    tool_calls: Option<Vec<OllamaToolCall>>,
}

#[derive(Debug, Deserialize)]
struct OllamaToolCall {
    function: OllamaFunction,
}

#[derive(Debug, Deserialize)]
struct OllamaFunction {
    name: String,
    #[serde(default)]
    arguments: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct OllamaTags {
    #[serde(default)]
    models: Vec<OllamaModel>,
}

#[derive(Debug, Deserialize)]
struct OllamaModel {
    name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn adapter() -> OllamaAdapter {
        OllamaAdapter::new("http://localhost:11434", ApiKey::default())
    }

    fn opts(stream: bool, show_reasoning: bool) -> SendOptions<'static> {
        SendOptions {
            model: "qwen3:8b",
            stream,
            show_reasoning,
        }
    }

    fn parse(
        adapter: &OllamaAdapter,
        acc: &mut StreamingAccumulator,
        frame: &str,
    ) -> FrameOutcome {
        let mut session = ProviderSession::new();
        adapter.parse_frame(frame, &mut session, acc)
    }

    #[test]
    fn test_request_body_uses_native_think_flag() {
        let wire = adapter()
            .chat_request(
                &ChatRequest::text("hello"),
                opts(true, true),
                &ProviderSession::new(),
            )
            .unwrap();
        assert_eq!(wire.url, "http://localhost:11434/api/chat");
        let body = wire.body.unwrap();
        assert_eq!(body["model"], "qwen3:8b");
        assert_eq!(body["stream"], true);
        assert_eq!(body["think"], true);
        // No prompt directive is appended.
        assert_eq!(body["messages"][0]["content"], "hello");
    }

    #[test]
    fn test_request_body_carries_raw_base64_images() {
        let wire = adapter()
            .chat_request(
                &ChatRequest::text("what is this").with_image("iVBORw0KGgo"),
                opts(true, false),
                &ProviderSession::new(),
            )
            .unwrap();
        let body = wire.body.unwrap();
        assert_eq!(body["think"], false);
        assert_eq!(body["messages"][0]["images"][0], "iVBORw0KGgo");
    }

    #[test]
    fn test_think_tags_injected_around_reasoning() {
        let adapter = adapter();
        let mut acc = StreamingAccumulator::new(true);

        let out = parse(
            &adapter,
            &mut acc,
            r#"{"message":{"thinking":"because"},"done":false}"#,
        );
        assert_eq!(
            out.events,
            vec![ChatEvent::ReasoningDelta("<think>because".into())]
        );

        let out = parse(
            &adapter,
            &mut acc,
            r#"{"message":{"content":" answer"},"done":true}"#,
        );
        assert_eq!(
            out.events,
            vec![ChatEvent::AnswerDelta("</think> answer".into())]
        );
    }

    #[test]
    fn test_opening_tag_only_on_first_reasoning_delta() {
        let adapter = adapter();
        let mut acc = StreamingAccumulator::new(true);

        parse(&adapter, &mut acc, r#"{"message":{"thinking":"one "}}"#);
        let out = parse(&adapter, &mut acc, r#"{"message":{"thinking":"two"}}"#);
        assert_eq!(out.events, vec![ChatEvent::ReasoningDelta("two".into())]);
        assert_eq!(acc.reasoning(), "one two");
    }

    #[test]
    fn test_no_tags_without_reasoning() {
        let adapter = adapter();
        let mut acc = StreamingAccumulator::new(true);
        let out = parse(&adapter, &mut acc, r#"{"message":{"content":"plain"}}"#);
        assert_eq!(out.events, vec![ChatEvent::AnswerDelta("plain".into())]);
        assert!(adapter.finish_stream(&mut acc).is_empty());
    }

    #[test]
    fn test_hidden_reasoning_drops_thinking_and_tags() {
        let adapter = adapter();
        let mut acc = StreamingAccumulator::new(false);

        let out = parse(&adapter, &mut acc, r#"{"message":{"thinking":"secret"}}"#);
        assert!(out.events.is_empty());

        let out = parse(&adapter, &mut acc, r#"{"message":{"content":"hi"}}"#);
        assert_eq!(out.events, vec![ChatEvent::AnswerDelta("hi".into())]);
    }

    #[test]
    fn test_dangling_tag_closed_at_stream_end() {
        let adapter = adapter();
        let mut acc = StreamingAccumulator::new(true);

        parse(&adapter, &mut acc, r#"{"message":{"thinking":"cut off"}}"#);
        let finish = adapter.finish_stream(&mut acc);
        assert_eq!(finish, vec![ChatEvent::AnswerDelta("</think>".into())]);
        // A second flush is a no-op.
        assert!(adapter.finish_stream(&mut acc).is_empty());
    }

    #[test]
    fn test_tool_call_emitted_directly() {
        let adapter = adapter();
        let mut acc = StreamingAccumulator::new(true);
        let out = parse(
            &adapter,
            &mut acc,
            r#"{"message":{"content":"","tool_calls":[{"function":{"name":"get_weather","arguments":{"city":"Oslo"}}}]},"done":false}"#,
        );
        assert_eq!(
            out.events,
            vec![ChatEvent::ToolCallRequested(ToolCallRequest {
                id: String::new(),
                name: "get_weather".into(),
                arguments: r#"{"city":"Oslo"}"#.into(),
            })]
        );
    }

    #[test]
    fn test_error_frame_halts() {
        let mut acc = StreamingAccumulator::new(true);
        let out = parse(&adapter(), &mut acc, r#"{"error":"model not found"}"#);
        assert!(out.halt);
        assert_eq!(out.events, vec![ChatEvent::error("model not found")]);
    }

    #[test]
    fn test_malformed_frame_skipped() {
        let mut acc = StreamingAccumulator::new(true);
        let out = parse(&adapter(), &mut acc, "###");
        assert!(out.events.is_empty());
        assert!(!out.halt);
    }

    #[test]
    fn test_blocking_wraps_thinking() {
        let ev = adapter()
            .parse_final(
                r#"{"message":{"content":"42","thinking":"six sevens"},"done":true}"#,
                true,
                &mut ProviderSession::new(),
            )
            .unwrap();
        assert_eq!(ev, ChatEvent::complete("<think>six sevens</think>42"));
    }

    #[test]
    fn test_blocking_hides_thinking_when_disabled() {
        let ev = adapter()
            .parse_final(
                r#"{"message":{"content":"42","thinking":"six sevens"},"done":true}"#,
                false,
                &mut ProviderSession::new(),
            )
            .unwrap();
        assert_eq!(ev, ChatEvent::complete("42"));
    }

    #[test]
    fn test_blocking_missing_message_is_invalid() {
        let result = adapter().parse_final(r#"{"done":true}"#, true, &mut ProviderSession::new());
        assert!(matches!(result, Err(ClientError::InvalidResponse)));
    }

    #[test]
    fn test_models_from_tags() {
        let models = adapter()
            .parse_models(r#"{"models":[{"name":"llama3:8b","size":1},{"name":"qwen3:8b"}]}"#)
            .unwrap();
        assert_eq!(models, vec!["llama3:8b", "qwen3:8b"]);
    }

    #[test]
    fn test_connection_probes_server_root() {
        let wire = adapter().connection_request();
        assert_eq!(wire.url, "http://localhost:11434/");
    }

    #[test]
    fn test_tool_result_rehydrates_arguments_object() {
        let call = ToolCallRequest {
            id: String::new(),
            name: "get_weather".into(),
            arguments: r#"{"city":"Oslo"}"#.into(),
        };
        let wire = adapter()
            .tool_result_request(&call, "snow", opts(false, false), &ProviderSession::new())
            .unwrap();
        let body = wire.body.unwrap();
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(
            messages[0]["tool_calls"][0]["function"]["arguments"]["city"],
            "Oslo"
        );
        assert_eq!(messages[1]["role"], "tool");
        assert_eq!(messages[1]["content"], "snow");
        assert_eq!(body["stream"], false);
    }
}

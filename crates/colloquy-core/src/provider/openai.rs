//! OpenAI-compatible gateway adapter.
//!
//! Covers every backend speaking the `/chat/completions` dialect:
//! DeepSeek, vLLM, LM Studio, corporate proxies. Streamed frames carry
//! `choices[0].delta`; reasoning models add a `reasoning_content` channel
//! beside `content`, which this adapter folds into the
//! reasoning-before-answer phase machine.

use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use colloquy_config::{ApiKey, ProviderKind};

use crate::error::ClientError;
use crate::event::ChatEvent;
use crate::framing::FramingMode;
use crate::transport::WireRequest;
use crate::types::{ChatRequest, ProviderSession, StreamingAccumulator, ToolCallRequest};

use super::{arguments_to_string, image_data_url, think_directive};
use super::{FrameOutcome, ProviderAdapter, SendOptions};

/// Adapter for OpenAI-compatible gateways.
pub struct OpenAiAdapter {
    base_url: String,
    api_key: ApiKey,
}

impl OpenAiAdapter {
    pub fn new(base_url: &str, api_key: ApiKey) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn user_content(&self, request: &ChatRequest, show_reasoning: bool) -> serde_json::Value {
        let text = think_directive(&request.composed_text(), show_reasoning);
        if request.images.is_empty() {
            return json!(text);
        }
        let mut parts = vec![json!({"type": "text", "text": text})];
        for b64 in &request.images {
            parts.push(json!({
                "type": "image_url",
                "image_url": {"url": image_data_url(b64)},
            }));
        }
        json!(parts)
    }
}

impl ProviderAdapter for OpenAiAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    fn framing(&self) -> FramingMode {
        FramingMode::SseSkipKeepAlive
    }

    fn chat_request(
        &self,
        request: &ChatRequest,
        opts: SendOptions<'_>,
        _session: &ProviderSession,
    ) -> Result<WireRequest, ClientError> {
        let body = json!({
            "model": opts.model,
            "messages": [{
                "role": "user",
                "content": self.user_content(request, opts.show_reasoning),
            }],
            "stream": opts.stream,
        });
        debug!(model = opts.model, streaming = opts.stream, "gateway chat request");
        Ok(WireRequest::post_json(self.endpoint("/chat/completions"), body).bearer(&self.api_key))
    }

    fn connection_request(&self) -> WireRequest {
        WireRequest::get(self.endpoint("/models")).bearer(&self.api_key)
    }

    fn models_request(&self) -> WireRequest {
        WireRequest::get(self.endpoint("/models")).bearer(&self.api_key)
    }

    fn parse_frame(
        &self,
        frame: &str,
        _session: &mut ProviderSession,
        acc: &mut StreamingAccumulator,
    ) -> FrameOutcome {
        let parsed: GatewayFrame = match serde_json::from_str(frame) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(%err, "skipping malformed gateway frame");
                return FrameOutcome::none();
            }
        };

        if let Some(error) = parsed.error {
            return FrameOutcome::halt(ChatEvent::error(error.into_message()));
        }

        // Keep-alive frames carry no choices; never index into the array.
        let Some(choice) = parsed.choices.into_iter().next() else {
            return FrameOutcome::none();
        };
        let Some(delta) = choice.delta else {
            return FrameOutcome::none();
        };

        let mut events = Vec::new();

        if let Some(calls) = delta.tool_calls {
            for call in calls {
                let function = call.function.unwrap_or_default();
                acc.merge_tool_call(
                    call.id.as_deref(),
                    function.name.as_deref(),
                    function.arguments.as_deref(),
                );
            }
        }

        if let Some(reasoning) = delta.reasoning_content.filter(|r| !r.is_empty()) {
            // Reasoning is surfaced only while the phase is open and the
            // user asked for it; anything else is dropped, including
            // stragglers arriving after the answer began.
            if acc.reasoning_open() && acc.show_reasoning() {
                acc.note_reasoning(&reasoning);
                events.push(ChatEvent::ReasoningDelta(reasoning));
            }
        }

        if let Some(content) = delta.content.filter(|c| !c.is_empty()) {
            if acc.reasoning_open() {
                acc.close_reasoning();
                if acc.reasoning_emitted() {
                    events.push(ChatEvent::AnswerStarted);
                }
            }
            acc.note_answer(&content);
            events.push(ChatEvent::AnswerDelta(content));
        }

        FrameOutcome {
            events,
            halt: false,
        }
    }

    fn finish_stream(&self, acc: &mut StreamingAccumulator) -> Vec<ChatEvent> {
        match acc.take_tool_call() {
            Some(call) => vec![ChatEvent::ToolCallRequested(call)],
            None => Vec::new(),
        }
    }

    fn parse_final(
        &self,
        body: &str,
        show_reasoning: bool,
        _session: &mut ProviderSession,
    ) -> Result<ChatEvent, ClientError> {
        let parsed: GatewayResponse =
            serde_json::from_str(body).map_err(|e| ClientError::Parse(e.to_string()))?;

        if let Some(error) = parsed.error {
            return Ok(ChatEvent::error(error.into_message()));
        }

        let message = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .ok_or(ClientError::InvalidResponse)?;

        if let Some(call) = message.tool_calls.into_iter().flatten().next() {
            let function = call.function.unwrap_or_default();
            return Ok(ChatEvent::ToolCallRequested(ToolCallRequest {
                id: call.id,
                name: function.name,
                arguments: arguments_to_string(&function.arguments),
            }));
        }

        let content = message.content.unwrap_or_default();
        let text = match message.reasoning_content.filter(|r| !r.is_empty()) {
            // Wrap blocking-mode reasoning in the same literal tags the
            // streaming path uses, so downstream splitting is uniform.
            Some(reasoning) if show_reasoning => {
                format!("<think>{reasoning}</think>{content}")
            }
            _ => content,
        };
        Ok(ChatEvent::complete(text))
    }

    fn parse_models(&self, body: &str) -> Result<Vec<String>, ClientError> {
        let parsed: GatewayModels =
            serde_json::from_str(body).map_err(|e| ClientError::Parse(e.to_string()))?;
        Ok(parsed.data.into_iter().map(|m| m.id).collect())
    }

    fn tool_result_request(
        &self,
        call: &ToolCallRequest,
        result: &str,
        opts: SendOptions<'_>,
        _session: &ProviderSession,
    ) -> Result<WireRequest, ClientError> {
        let body = json!({
            "model": opts.model,
            "messages": [
                {
                    "role": "assistant",
                    "tool_calls": [{
                        "id": call.id,
                        "type": "function",
                        "function": {"name": call.name, "arguments": call.arguments},
                    }],
                },
                {
                    "role": "tool",
                    "tool_call_id": call.id,
                    "content": result,
                },
            ],
            "stream": false,
        });
        Ok(WireRequest::post_json(self.endpoint("/chat/completions"), body).bearer(&self.api_key))
    }
}

// ── Gateway API types (private) ─────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct GatewayFrame {
    #[serde(default)]
    choices: Vec<GatewayStreamChoice>,
    error: Option<GatewayError>,
}

#[derive(Debug, Deserialize)]
struct GatewayStreamChoice {
    delta: Option<GatewayDelta>,
}

#[derive(Debug, Deserialize)]
struct GatewayDelta {
    content: Option<String>,
    reasoning_content: Option<String>,
    tool_calls: Option<Vec<GatewayToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct GatewayToolCallDelta {
    id: Option<String>,
    function: Option<GatewayFunctionDelta>,
}

#[derive(Debug, Default, Deserialize)]
struct GatewayFunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GatewayError {
    message: Option<String>,
}

impl GatewayError {
    fn into_message(self) -> String {
        self.message
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| "Unknown error from server.".to_string())
    }
}

#[derive(Debug, Deserialize)]
struct GatewayResponse {
    #[serde(default)]
    choices: Vec<GatewayFinalChoice>,
    error: Option<GatewayError>,
}

#[derive(Debug, Deserialize)]
struct GatewayFinalChoice {
    message: Option<GatewayMessage>,
}

#[derive(Debug, Deserialize)]
struct GatewayMessage {
    content: Option<String>,
    reasoning_content: Option<String>,
    tool_calls: Option<Vec<GatewayToolCall>>,
}

#[derive(Debug, Deserialize)]
struct GatewayToolCall {
    #[serde(default)]
    id: String,
    function: Option<GatewayFunction>,
}

#[derive(Debug, Default, Deserialize)]
struct GatewayFunction {
    #[serde(default)]
    name: String,
    #[serde(default)]
    arguments: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct GatewayModels {
    #[serde(default)]
    data: Vec<GatewayModel>,
}

#[derive(Debug, Deserialize)]
struct GatewayModel {
    id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn adapter() -> OpenAiAdapter {
        OpenAiAdapter::new("https://gateway.example/v1", ApiKey::new("sk-test"))
    }

    fn opts(stream: bool, show_reasoning: bool) -> SendOptions<'static> {
        SendOptions {
            model: "deepseek-chat",
            stream,
            show_reasoning,
        }
    }

    fn parse(
        adapter: &OpenAiAdapter,
        acc: &mut StreamingAccumulator,
        frame: &str,
    ) -> FrameOutcome {
        let mut session = ProviderSession::new();
        adapter.parse_frame(frame, &mut session, acc)
    }

    #[test]
    fn test_request_body_plain_text() {
        let wire = adapter()
            .chat_request(
                &ChatRequest::text("hello"),
                opts(true, true),
                &ProviderSession::new(),
            )
            .unwrap();
        assert_eq!(wire.url, "https://gateway.example/v1/chat/completions");
        let body = wire.body.unwrap();
        assert_eq!(body["model"], "deepseek-chat");
        assert_eq!(body["stream"], true);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "hello /think");
    }

    #[test]
    fn test_request_body_with_images_uses_parts() {
        let wire = adapter()
            .chat_request(
                &ChatRequest::text("describe").with_image("/9j/4AAQSkZJRg"),
                opts(false, false),
                &ProviderSession::new(),
            )
            .unwrap();
        let body = wire.body.unwrap();
        let parts = body["messages"][0]["content"].as_array().unwrap();
        assert_eq!(parts[0]["type"], "text");
        assert_eq!(parts[0]["text"], "describe /no_think");
        assert_eq!(parts[1]["type"], "image_url");
        assert_eq!(
            parts[1]["image_url"]["url"],
            "data:image/jpeg;base64,/9j/4AAQSkZJRg"
        );
    }

    #[test]
    fn test_keep_alive_frame_yields_nothing() {
        let mut acc = StreamingAccumulator::new(true);
        let out = parse(&adapter(), &mut acc, r#"{"choices":[]}"#);
        assert!(out.events.is_empty());
        assert!(!out.halt);
    }

    #[test]
    fn test_reasoning_then_answer_emits_boundary() {
        let adapter = adapter();
        let mut acc = StreamingAccumulator::new(true);

        let out = parse(
            &adapter,
            &mut acc,
            r#"{"choices":[{"delta":{"reasoning_content":"let me think"}}]}"#,
        );
        assert_eq!(
            out.events,
            vec![ChatEvent::ReasoningDelta("let me think".into())]
        );

        let out = parse(
            &adapter,
            &mut acc,
            r#"{"choices":[{"delta":{"content":"The answer"}}]}"#,
        );
        assert_eq!(
            out.events,
            vec![
                ChatEvent::AnswerStarted,
                ChatEvent::AnswerDelta("The answer".into())
            ]
        );
    }

    #[test]
    fn test_no_boundary_without_reasoning() {
        let mut acc = StreamingAccumulator::new(true);
        let out = parse(
            &adapter(),
            &mut acc,
            r#"{"choices":[{"delta":{"content":"hi"}}]}"#,
        );
        assert_eq!(out.events, vec![ChatEvent::AnswerDelta("hi".into())]);
    }

    #[test]
    fn test_hidden_reasoning_is_dropped_entirely() {
        let adapter = adapter();
        let mut acc = StreamingAccumulator::new(false);

        let out = parse(
            &adapter,
            &mut acc,
            r#"{"choices":[{"delta":{"reasoning_content":"secret"}}]}"#,
        );
        assert!(out.events.is_empty());

        // No boundary either: nothing was shown.
        let out = parse(
            &adapter,
            &mut acc,
            r#"{"choices":[{"delta":{"content":"hi"}}]}"#,
        );
        assert_eq!(out.events, vec![ChatEvent::AnswerDelta("hi".into())]);
    }

    #[test]
    fn test_late_reasoning_after_answer_is_dropped() {
        let adapter = adapter();
        let mut acc = StreamingAccumulator::new(true);

        parse(
            &adapter,
            &mut acc,
            r#"{"choices":[{"delta":{"reasoning_content":"a"}}]}"#,
        );
        parse(
            &adapter,
            &mut acc,
            r#"{"choices":[{"delta":{"content":"b"}}]}"#,
        );
        let out = parse(
            &adapter,
            &mut acc,
            r#"{"choices":[{"delta":{"reasoning_content":"straggler"}}]}"#,
        );
        assert!(out.events.is_empty());
        assert_eq!(acc.reasoning(), "a");
    }

    #[test]
    fn test_error_frame_halts() {
        let mut acc = StreamingAccumulator::new(true);
        let out = parse(
            &adapter(),
            &mut acc,
            r#"{"error":{"message":"insufficient quota"}}"#,
        );
        assert!(out.halt);
        assert_eq!(out.events, vec![ChatEvent::error("insufficient quota")]);
    }

    #[test]
    fn test_malformed_frame_skipped() {
        let mut acc = StreamingAccumulator::new(true);
        let out = parse(&adapter(), &mut acc, "data-corruption%%");
        assert!(out.events.is_empty());
        assert!(!out.halt);
    }

    #[test]
    fn test_streamed_tool_call_assembled_at_finish() {
        let adapter = adapter();
        let mut acc = StreamingAccumulator::new(true);

        parse(
            &adapter,
            &mut acc,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_9","function":{"name":"search","arguments":"{\"q\":"}}]}}]}"#,
        );
        let out = parse(
            &adapter,
            &mut acc,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"rust\"}"}}]}}]}"#,
        );
        assert!(out.events.is_empty());

        let finish = adapter.finish_stream(&mut acc);
        assert_eq!(
            finish,
            vec![ChatEvent::ToolCallRequested(ToolCallRequest {
                id: "call_9".into(),
                name: "search".into(),
                arguments: "{\"q\":\"rust\"}".into(),
            })]
        );
        // Flushing twice never duplicates the call.
        assert!(adapter.finish_stream(&mut acc).is_empty());
    }

    #[test]
    fn test_blocking_plain_content() {
        let ev = adapter()
            .parse_final(
                r#"{"choices":[{"message":{"content":"ok"}}]}"#,
                true,
                &mut ProviderSession::new(),
            )
            .unwrap();
        assert_eq!(ev, ChatEvent::complete("ok"));
    }

    #[test]
    fn test_blocking_wraps_reasoning_in_tags() {
        let ev = adapter()
            .parse_final(
                r#"{"choices":[{"message":{"content":"42","reasoning_content":"six times seven"}}]}"#,
                true,
                &mut ProviderSession::new(),
            )
            .unwrap();
        assert_eq!(ev, ChatEvent::complete("<think>six times seven</think>42"));
    }

    #[test]
    fn test_blocking_hides_reasoning_when_disabled() {
        let ev = adapter()
            .parse_final(
                r#"{"choices":[{"message":{"content":"42","reasoning_content":"six times seven"}}]}"#,
                false,
                &mut ProviderSession::new(),
            )
            .unwrap();
        assert_eq!(ev, ChatEvent::complete("42"));
    }

    #[test]
    fn test_blocking_tool_call() {
        let ev = adapter()
            .parse_final(
                r#"{"choices":[{"message":{"tool_calls":[{"id":"c1","type":"function","function":{"name":"now","arguments":"{}"}}]}}]}"#,
                true,
                &mut ProviderSession::new(),
            )
            .unwrap();
        match ev {
            ChatEvent::ToolCallRequested(call) => {
                assert_eq!(call.id, "c1");
                assert_eq!(call.name, "now");
                assert_eq!(call.arguments, "{}");
            }
            other => panic!("expected tool call, got {other:?}"),
        }
    }

    #[test]
    fn test_blocking_missing_choices_is_invalid() {
        let result = adapter().parse_final(r#"{"object":"x"}"#, true, &mut ProviderSession::new());
        assert!(matches!(result, Err(ClientError::InvalidResponse)));
    }

    #[test]
    fn test_blocking_error_body() {
        let ev = adapter()
            .parse_final(
                r#"{"error":{"message":"model overloaded"}}"#,
                true,
                &mut ProviderSession::new(),
            )
            .unwrap();
        assert_eq!(ev, ChatEvent::error("model overloaded"));
    }

    #[test]
    fn test_models_parsing() {
        let models = adapter()
            .parse_models(r#"{"object":"list","data":[{"id":"m1"},{"id":"m2"}]}"#)
            .unwrap();
        assert_eq!(models, vec!["m1", "m2"]);
        assert!(adapter().parse_models(r#"{"data":[]}"#).unwrap().is_empty());
    }

    #[test]
    fn test_tool_result_request_shape() {
        let call = ToolCallRequest {
            id: "call_1".into(),
            name: "get_time".into(),
            arguments: "{}".into(),
        };
        let wire = adapter()
            .tool_result_request(&call, "14:30", opts(false, true), &ProviderSession::new())
            .unwrap();
        let body = wire.body.unwrap();
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages[0]["role"], "assistant");
        assert_eq!(messages[0]["tool_calls"][0]["id"], "call_1");
        assert_eq!(messages[1]["role"], "tool");
        assert_eq!(messages[1]["tool_call_id"], "call_1");
        assert_eq!(messages[1]["content"], "14:30");
        assert_eq!(body["stream"], false);
    }
}

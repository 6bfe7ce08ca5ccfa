//! Dify workflow-app adapter.
//!
//! Dify keeps conversation state server-side: every response carries
//! `conversation_id` / `message_id` / `task_id`, which we persist and echo
//! back so the next turn continues the same conversation. Streamed frames
//! are SSE blocks tagged with an `event` field.

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

/// Adapter for Dify-style workflow backends.
pub struct DifyAdapter {
    base_url: String,
    api_key: ApiKey,
}

impl DifyAdapter {
    pub fn new(base_url: &str, api_key: ApiKey) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Copy whichever ids this frame carried into the session.
    fn persist_ids(session: &mut ProviderSession, frame: &DifyIds) {
        if let Some(id) = frame.conversation_id.as_deref() {
            if !id.is_empty() {
                session.conversation_id = id.to_string();
            }
        }
        if let Some(id) = frame.message_id.as_deref() {
            if !id.is_empty() {
                session.message_id = id.to_string();
            }
        }
        if let Some(id) = frame.task_id.as_deref() {
            if !id.is_empty() {
                session.task_id = id.to_string();
            }
        }
    }
}

impl ProviderAdapter for DifyAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Dify
    }

    fn framing(&self) -> FramingMode {
        FramingMode::Sse
    }

    fn chat_request(
        &self,
        request: &ChatRequest,
        opts: SendOptions<'_>,
        session: &ProviderSession,
    ) -> Result<WireRequest, ClientError> {
        let query = think_directive(&request.composed_text(), opts.show_reasoning);
        let mut body = json!({
            "inputs": {},
            "query": query,
            "response_mode": if opts.stream { "streaming" } else { "blocking" },
            "conversation_id": session.conversation_id,
            "user": session.user_id,
        });
        if !request.images.is_empty() {
            let files: Vec<serde_json::Value> = request
                .images
                .iter()
                .map(|b64| {
                    json!({
                        "type": "image",
                        "transfer_method": "remote_url",
                        "url": image_data_url(b64),
                    })
                })
                .collect();
            body["files"] = json!(files);
        }

        debug!(
            streaming = opts.stream,
            continuing = !session.conversation_id.is_empty(),
            "dify chat request"
        );
        Ok(WireRequest::post_json(self.endpoint("/chat-messages"), body).bearer(&self.api_key))
    }

    fn connection_request(&self) -> WireRequest {
        WireRequest::get(self.endpoint("/parameters")).bearer(&self.api_key)
    }

    fn models_request(&self) -> WireRequest {
        WireRequest::get(self.endpoint("/info")).bearer(&self.api_key)
    }

    fn parse_frame(
        &self,
        frame: &str,
        session: &mut ProviderSession,
        acc: &mut StreamingAccumulator,
    ) -> FrameOutcome {
        let parsed: DifyStreamFrame = match serde_json::from_str(frame) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(%err, "skipping malformed dify frame");
                return FrameOutcome::none();
            }
        };

        match parsed.event.as_str() {
            "message" => {
                Self::persist_ids(session, &parsed.ids);
                match parsed.answer {
                    Some(answer) if !answer.is_empty() => {
                        acc.note_answer(&answer);
                        FrameOutcome::event(ChatEvent::AnswerDelta(answer))
                    }
                    _ => FrameOutcome::none(),
                }
            }
            "message_end" => {
                Self::persist_ids(session, &parsed.ids);
                FrameOutcome::none()
            }
            "error" => {
                let message = parsed
                    .message
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| "Unknown error from server.".to_string());
                FrameOutcome::halt(ChatEvent::error(message))
            }
            other => {
                // Workflow noise (node_started, ping, ...) carries nothing
                // we surface.
                debug!(event = other, "ignoring dify event");
                FrameOutcome::none()
            }
        }
    }

    fn parse_final(
        &self,
        body: &str,
        _show_reasoning: bool,
        session: &mut ProviderSession,
    ) -> Result<ChatEvent, ClientError> {
        let parsed: DifyBlockingResponse =
            serde_json::from_str(body).map_err(|e| ClientError::Parse(e.to_string()))?;
        Self::persist_ids(session, &parsed.ids);

        if let Some(call) = parsed.tool_calls.into_iter().next() {
            return Ok(ChatEvent::ToolCallRequested(ToolCallRequest {
                id: call.id,
                name: call.name,
                arguments: arguments_to_string(&call.arguments),
            }));
        }
        if let Some(answer) = parsed.answer {
            return Ok(ChatEvent::complete(answer));
        }
        if let Some(message) = parsed.message.filter(|m| !m.is_empty()) {
            return Ok(ChatEvent::error(message));
        }
        Err(ClientError::InvalidResponse)
    }

    fn parse_models(&self, body: &str) -> Result<Vec<String>, ClientError> {
        let info: DifyAppInfo =
            serde_json::from_str(body).map_err(|e| ClientError::Parse(e.to_string()))?;
        // A workflow app pins its own model; the app name is the one entry
        // the picker can show.
        match info.name.filter(|n| !n.is_empty()) {
            Some(name) => Ok(vec![name]),
            None => Err(ClientError::InvalidResponse),
        }
    }

    fn tool_result_request(
        &self,
        _call: &ToolCallRequest,
        _result: &str,
        _opts: SendOptions<'_>,
        _session: &ProviderSession,
    ) -> Result<WireRequest, ClientError> {
        // Workflow apps run their tools server-side.
        Err(ClientError::Unsupported("tool result follow-ups"))
    }

    fn suggestions_request(&self, session: &ProviderSession) -> Result<WireRequest, ClientError> {
        if session.message_id.is_empty() {
            return Err(ClientError::Unsupported(
                "follow-up suggestions before the first reply",
            ));
        }
        let url = format!(
            "{}?user={}",
            self.endpoint(&format!("/messages/{}/suggested", session.message_id)),
            session.user_id
        );
        Ok(WireRequest::get(url).bearer(&self.api_key))
    }

    fn parse_suggestions(&self, body: &str) -> Result<Vec<String>, ClientError> {
        let parsed: DifySuggestions =
            serde_json::from_str(body).map_err(|e| ClientError::Parse(e.to_string()))?;
        Ok(parsed.data)
    }
}

// ── Dify API types (private) ────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct DifyIds {
    conversation_id: Option<String>,
    message_id: Option<String>,
    task_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DifyStreamFrame {
    #[serde(default)]
    event: String,
    answer: Option<String>,
    /// Error frames put their text here.
    message: Option<String>,
    #[serde(flatten)]
    ids: DifyIds,
}

#[derive(Debug, Deserialize)]
struct DifyBlockingResponse {
    answer: Option<String>,
    message: Option<String>,
    #[serde(default)]
    tool_calls: Vec<DifyToolCall>,
    #[serde(flatten)]
    ids: DifyIds,
}

#[derive(Debug, Deserialize)]
struct DifyToolCall {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    arguments: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct DifyAppInfo {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DifySuggestions {
    #[serde(default)]
    data: Vec<String>,
}

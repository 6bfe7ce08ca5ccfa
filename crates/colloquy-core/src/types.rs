//! Request and session types shared by the adapters and the client.

use uuid::Uuid;

/// A chat request as assembled by the front end.
///
/// Immutable once handed to the client; validation of size limits is the
/// caller's job.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatRequest {
    /// The user's message text.
    pub text: String,
    /// Base64-encoded image attachments, without any data-URL prefix.
    pub images: Vec<String>,
    /// Pre-extracted text of attached files, appended to the prompt.
    pub file_contexts: Vec<FileContext>,
}

/// Extracted text content of one attached file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileContext {
    pub name: String,
    pub content: String,
}

impl ChatRequest {
    /// A plain text request.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// Attach a base64-encoded image.
    pub fn with_image(mut self, base64: impl Into<String>) -> Self {
        self.images.push(base64.into());
        self
    }

    /// Attach extracted file text.
    pub fn with_file_context(
        mut self,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        self.file_contexts.push(FileContext {
            name: name.into(),
            content: content.into(),
        });
        self
    }

    /// The message text with file contexts appended, as sent to providers.
    pub fn composed_text(&self) -> String {
        if self.file_contexts.is_empty() {
            return self.text.clone();
        }
        let mut out = self.text.clone();
        for file in &self.file_contexts {
            out.push_str("\n\n[file: ");
            out.push_str(&file.name);
            out.push_str("]\n");
            out.push_str(&file.content);
        }
        out
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolCallRequest {
    /// Provider-assigned call id, echoed back with the result.
    pub id: String,
    /// Tool (function) name.
    pub name: String,
    /// Raw JSON argument string, exactly as the provider sent it.
    pub arguments: String,
}

/// Provider-scoped conversation state.
///
/// Never shared across adapters; a provider swap starts a fresh one.
#[derive(Debug, Clone)]
pub struct ProviderSession {
    /// Server-side conversation id (workflow providers).
    pub conversation_id: String,
    /// Id of the most recent completed message.
    pub message_id: String,
    /// Id of the in-flight generation task.
    pub task_id: String,
    /// Stable end-user id sent with workflow requests. Survives
    /// conversation resets.
    pub user_id: String,
    /// Ids of files uploaded for the current conversation.
    pub upload_file_ids: Vec<String>,
}

impl ProviderSession {
    pub fn new() -> Self {
        Self {
            conversation_id: String::new(),
            message_id: String::new(),
            task_id: String::new(),
            user_id: format!("colloquy-{}", Uuid::new_v4()),
            upload_file_ids: Vec::new(),
        }
    }

    /// Clear conversation state, keeping the end-user id.
    pub fn reset(&mut self) {
        self.conversation_id.clear();
        self.message_id.clear();
        self.task_id.clear();
        self.upload_file_ids.clear();
    }
}

impl Default for ProviderSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Rolling state for one streamed response.
///
/// Owns the reasoning-phase flag, the synthetic `<think>` tag bookkeeping
/// used for providers with a separate thinking channel, and the tool-call
/// fragments a gateway spreads over many frames. Constructed per request;
/// never reused.
#[derive(Debug)]
pub struct StreamingAccumulator {
    show_reasoning: bool,
    reasoning_open: bool,
    reasoning: String,
    answer: String,
    think_tag_opened: bool,
    think_tag_closed: bool,
    tool_call: Option<ToolCallRequest>,
}

impl StreamingAccumulator {
    pub fn new(show_reasoning: bool) -> Self {
        Self {
            show_reasoning,
            reasoning_open: true,
            reasoning: String::new(),
            answer: String::new(),
            think_tag_opened: false,
            think_tag_closed: false,
            tool_call: None,
        }
    }

    /// Whether reasoning output should be surfaced at all.
    pub fn show_reasoning(&self) -> bool {
        self.show_reasoning
    }

    /// Whether the reasoning phase is still open. Starts `true`; closed
    /// permanently by the first answer content.
    pub fn reasoning_open(&self) -> bool {
        self.reasoning_open
    }

    /// Close the reasoning phase. One-way: there is no reopen.
    pub fn close_reasoning(&mut self) {
        self.reasoning_open = false;
    }

    /// Record emitted reasoning text.
    pub fn note_reasoning(&mut self, text: &str) {
        self.reasoning.push_str(text);
    }

    /// Record emitted answer text.
    pub fn note_answer(&mut self, text: &str) {
        self.answer.push_str(text);
    }

    pub fn reasoning_emitted(&self) -> bool {
        !self.reasoning.is_empty()
    }

    pub fn answer_emitted(&self) -> bool {
        !self.answer.is_empty()
    }

    pub fn reasoning(&self) -> &str {
        &self.reasoning
    }

    pub fn answer(&self) -> &str {
        &self.answer
    }

    // ── Synthetic <think> tags (separate-thinking-channel providers) ──

    /// Mark the opening `<think>` tag as emitted.
    pub fn open_think_tag(&mut self) {
        self.think_tag_opened = true;
    }

    pub fn think_tag_opened(&self) -> bool {
        self.think_tag_opened
    }

    /// Whether a `</think>` closing tag still has to be emitted.
    pub fn think_tag_needs_close(&self) -> bool {
        self.think_tag_opened && !self.think_tag_closed
    }

    /// Mark the closing `</think>` tag as emitted.
    pub fn close_think_tag(&mut self) {
        self.think_tag_closed = true;
    }

    // ── Streamed tool-call fragments ──────────────────────────────────

    /// Merge one tool-call fragment. The first fragment usually carries
    /// id and name; later ones append argument text.
    pub fn merge_tool_call(&mut self, id: Option<&str>, name: Option<&str>, arguments: Option<&str>) {
        let call = self.tool_call.get_or_insert_with(ToolCallRequest::default);
        if let Some(id) = id {
            if !id.is_empty() {
                call.id = id.to_string();
            }
        }
        if let Some(name) = name {
            if !name.is_empty() {
                call.name = name.to_string();
            }
        }
        if let Some(arguments) = arguments {
            call.arguments.push_str(arguments);
        }
    }

    /// Take the assembled tool call, if any fragment ever arrived.
    pub fn take_tool_call(&mut self) -> Option<ToolCallRequest> {
        self.tool_call.take().filter(|c| !c.name.is_empty() || !c.id.is_empty())
    }
}

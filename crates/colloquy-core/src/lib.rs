#![deny(unsafe_code)]

//! Colloquy streaming chat client core.
//!
//! Implements the provider-independent chat pipeline: building wire
//! requests, reassembling streamed response frames, normalizing each
//! provider's dialect into one event vocabulary, and supervising the
//! request lifecycle with cancellation and bounded retries. The CLI
//! (and any other frontend) drives everything through [`ChatClient`]
//! and consumes [`ChatEvent`]s from its channel.

/// Compile-time build metadata (version, git hash, profile).
pub mod build_info;
/// Maps transport and provider errors to user-facing messages.
pub mod classify;
/// The long-lived client facade and its background tasks.
pub mod client;
/// Error taxonomy for the whole pipeline.
pub mod error;
/// Normalized event vocabulary shared by all providers.
pub mod event;
/// Byte-level frame reassembly for SSE and NDJSON streams.
pub mod framing;
/// Provider adapters and their shared trait.
pub mod provider;
/// Fixed-backoff retry accounting.
pub mod retry;
/// Per-request state machine and stream drivers.
pub mod session;
/// HTTP transport shared by chat requests and probes.
pub mod transport;
/// Request payloads and per-conversation state.
pub mod types;

pub use classify::user_message;
pub use client::ChatClient;
pub use error::ClientError;
pub use event::ChatEvent;
pub use framing::{FrameBuffer, FramingMode};
pub use provider::{create_adapter, ProviderAdapter};
pub use retry::{RetryContext, RetryDecision, RetryPolicy};
pub use session::{RequestSession, SessionState};
pub use transport::HttpTransport;
pub use types::{ChatRequest, FileContext, ProviderSession, ToolCallRequest};

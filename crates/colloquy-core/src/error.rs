//! Error types shared across the chat client core.

use std::error::Error as StdError;

/// Errors produced while talking to a chat backend.
///
/// Transport failures keep the full source chain as text so the
/// [classifier](crate::classify) can match on phrases like
/// "connection refused" that reqwest buries several levels deep.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Transport-level failure: DNS, TCP, TLS, or a broken stream.
    #[error("network error: {0}")]
    Network(String),

    /// The request, or a single stream read, exceeded its deadline.
    #[error("request timed out")]
    Timeout,

    /// The backend rejected our credentials (401/403).
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The backend asked us to slow down (429).
    #[error("rate limited by provider")]
    RateLimited {
        /// Parsed `Retry-After` header, if the provider sent one.
        retry_after_secs: Option<u64>,
    },

    /// Any other non-success status from the backend.
    #[error("provider error ({status}): {message}")]
    Provider { status: u16, message: String },

    /// The body arrived but could not be decoded.
    #[error("failed to parse provider response: {0}")]
    Parse(String),

    /// The body decoded but lacked the fields the contract requires.
    #[error("invalid response format from provider")]
    InvalidResponse,

    /// The request was cancelled by the caller.
    #[error("request cancelled")]
    Cancelled,

    /// The active provider has no implementation for this operation.
    #[error("not supported by this provider: {0}")]
    Unsupported(&'static str),
}

impl ClientError {
    /// Map a non-success HTTP status (plus whatever body text arrived)
    /// onto the error taxonomy.
    pub fn from_status(status: u16, body: &str, retry_after_secs: Option<u64>) -> Self {
        match status {
            401 | 403 => ClientError::Auth(format!("status {status}")),
            429 => ClientError::RateLimited { retry_after_secs },
            _ => ClientError::Provider {
                status,
                message: body.trim().to_string(),
            },
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClientError::Timeout
        } else {
            ClientError::Network(source_chain(&err))
        }
    }
}

/// Join an error with its sources into one line.
///
/// reqwest surfaces "error sending request" at the top and the useful
/// part ("Connection refused (os error 111)") two sources down.
fn source_chain(err: &dyn StdError) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let cause_text = cause.to_string();
        if !text.contains(&cause_text) {
            text.push_str(": ");
            text.push_str(&cause_text);
        }
        source = cause.source();
    }
    text
}

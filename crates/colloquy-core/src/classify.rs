//! Turns transport and provider failures into user-facing messages.
//!
//! Rules run in a fixed order: transport phrase table first, then HTTP
//! status mapping, then a reason-phrase fallback. A native status (from an
//! actual response) always wins over phrases embedded in error text.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::ClientError;

const MSG_TIMEOUT: &str = "The request timed out. The server may be busy or unreachable.";
const MSG_PERMISSION: &str =
    "Connection blocked: permission denied. Check your firewall or proxy settings.";
const MSG_REFUSED: &str =
    "Could not connect to the server. Make sure the service is running at the configured address.";
const MSG_ADDRESS: &str =
    "The server address appears to be wrong. Check the base URL in your settings.";
const MSG_AUTH: &str = "Authentication failed. Check your API key.";
const MSG_RATE: &str = "Too many requests. Wait a moment and try again.";
const MSG_BAD_REQUEST: &str =
    "The server rejected the request. Check your input and model settings.";
const MSG_UNPARSEABLE: &str = "The server sent a response that could not be understood.";
const MSG_INVALID: &str = "Invalid response format from server.";

/// One user-facing sentence for any client error.
pub fn user_message(err: &ClientError) -> String {
    match err {
        ClientError::Timeout => MSG_TIMEOUT.to_string(),
        ClientError::Auth(_) => MSG_AUTH.to_string(),
        ClientError::RateLimited { .. } => MSG_RATE.to_string(),
        ClientError::Provider { status, message } => status_message(*status, message),
        ClientError::Network(text) => network_message(text),
        ClientError::Parse(_) => MSG_UNPARSEABLE.to_string(),
        ClientError::InvalidResponse => MSG_INVALID.to_string(),
        ClientError::Cancelled => "Request cancelled.".to_string(),
        ClientError::Unsupported(op) => {
            format!("The current provider does not support {op}.")
        }
    }
}

/// Map a non-success status plus whatever body text arrived.
fn status_message(status: u16, body: &str) -> String {
    match status {
        400 => extract_api_error(body).unwrap_or_else(|| MSG_BAD_REQUEST.to_string()),
        401 | 403 => MSG_AUTH.to_string(),
        404 => MSG_ADDRESS.to_string(),
        429 => MSG_RATE.to_string(),
        _ => {
            let detail = extract_api_error(body)
                .unwrap_or_else(|| truncated(body).to_string());
            if detail.is_empty() {
                format!("The server returned an error ({status}).")
            } else {
                format!("The server returned an error ({status}): {detail}")
            }
        }
    }
}

/// Phrase table over transport error text, then the reason-phrase
/// fallback, then the raw text.
fn network_message(text: &str) -> String {
    let lower = text.to_ascii_lowercase();
    if lower.contains("timed out") || lower.contains("timeout") {
        return MSG_TIMEOUT.to_string();
    }
    if lower.contains("permission denied") {
        return MSG_PERMISSION.to_string();
    }
    if lower.contains("connection refused") {
        return MSG_REFUSED.to_string();
    }
    if lower.contains("not found") {
        return MSG_ADDRESS.to_string();
    }

    if let Some(phrase) = reason_phrase(text) {
        return match phrase.to_ascii_lowercase().as_str() {
            "not found" => MSG_ADDRESS.to_string(),
            "unauthorized" | "forbidden" => MSG_AUTH.to_string(),
            "too many requests" => MSG_RATE.to_string(),
            "bad request" => MSG_BAD_REQUEST.to_string(),
            _ => format!("The server returned an error: {phrase}"),
        };
    }

    format!("Unexpected network error: {}", truncated(text))
}

/// Extract the reason phrase from "server replied: <phrase>" error text.
fn reason_phrase(text: &str) -> Option<String> {
    static RE: LazyLock<Option<Regex>> =
        LazyLock::new(|| Regex::new(r"server replied:\s*(.+)\s*$").ok());
    RE.as_ref()?
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Probe a JSON error body for the human-readable message, wherever the
/// provider put it: `error.message`, a bare `error` string, or `message`.
fn extract_api_error(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body.trim()).ok()?;
    let candidate = value
        .get("error")
        .and_then(|e| e.get("message"))
        .and_then(|m| m.as_str())
        .or_else(|| value.get("error").and_then(|e| e.as_str()))
        .or_else(|| value.get("message").and_then(|m| m.as_str()))?;
    let candidate = candidate.trim();
    if candidate.is_empty() {
        None
    } else {
        Some(candidate.to_string())
    }
}

fn truncated(text: &str) -> &str {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(200) {
        Some((idx, _)) => &trimmed[..idx],
        None => trimmed,
    }
}

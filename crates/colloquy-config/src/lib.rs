#![deny(unsafe_code)]

//! Configuration loading and validation for Colloquy.
//!
//! Loads TOML configuration files and validates them against expected schemas.
//! Provides the [`AppConfig`] type as the central configuration structure.
//! The selectable backend kinds live here (as [`ProviderKind`]) so front ends
//! can enumerate providers without depending on the core crate.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

/// The kind of chat backend a provider profile talks to.
///
/// Serialized in lowercase in TOML (`kind = "dify"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Workflow-style provider: server-side conversation state, app-scoped
    /// API keys, SSE event frames.
    Dify,
    /// OpenAI-compatible gateway: `/chat/completions`, delta frames,
    /// keep-alive comments.
    OpenAi,
    /// Local Ollama daemon: NDJSON frames, no authentication by default.
    Ollama,
}

impl ProviderKind {
    /// All selectable kinds, in menu order.
    pub const ALL: [ProviderKind; 3] = [
        ProviderKind::Dify,
        ProviderKind::OpenAi,
        ProviderKind::Ollama,
    ];

    /// The lowercase identifier used in config files and CLI flags.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Dify => "dify",
            ProviderKind::OpenAi => "openai",
            ProviderKind::Ollama => "ollama",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dify" => Ok(ProviderKind::Dify),
            "openai" => Ok(ProviderKind::OpenAi),
            "ollama" => Ok(ProviderKind::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unknown provider kind {other:?}, expected one of \"dify\", \"openai\", \"ollama\""
            ))),
        }
    }
}

/// An API credential with automatic zeroization.
///
/// The value is cleared on drop, redacted in `Debug` output, and serialized
/// as `[REDACTED]` so `config show` and crash dumps never leak it. Only
/// [`ApiKey::expose`] yields the raw value, at the point a request header
/// is built.
#[derive(Clone, Default)]
pub struct ApiKey {
    inner: String,
}

impl ApiKey {
    /// Create a new key from a string value.
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            inner: value.into(),
        }
    }

    /// Get the raw key.
    ///
    /// Use sparingly, at the header-assembly site only.
    pub fn expose(&self) -> &str {
        &self.inner
    }

    /// Whether the key is empty (unauthenticated local backends).
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiKey")
            .field("inner", &"[REDACTED]")
            .field("len", &self.inner.len())
            .finish()
    }
}

impl Drop for ApiKey {
    fn drop(&mut self) {
        self.inner.zeroize();
    }
}

impl Serialize for ApiKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.inner.is_empty() {
            serializer.serialize_str("")
        } else {
            serializer.serialize_str("[REDACTED]")
        }
    }
}

impl<'de> Deserialize<'de> for ApiKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(ApiKey::new(raw))
    }
}

/// Top-level application configuration.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Active provider profile.
    #[serde(default)]
    pub provider: ProviderConfig,

    /// HTTP transport tuning.
    #[serde(default)]
    pub http: HttpConfig,

    /// Connectivity retry policy.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Configuration for the active chat backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Which backend kind to talk to.
    #[serde(default = "default_provider_kind")]
    pub kind: ProviderKind,

    /// Base URL of the backend API, without a trailing slash
    /// (e.g. `https://api.dify.example/v1` or `http://localhost:11434`).
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// API key, sent as `Authorization: Bearer <key>`. May be empty for
    /// unauthenticated local backends.
    #[serde(default)]
    pub api_key: ApiKey,

    /// Model identifier. Required for the openai and ollama kinds; a
    /// workflow app pins its own model, so it is ignored for dify.
    #[serde(default)]
    pub model: String,

    /// Whether reasoning ("thinking") output is requested and surfaced.
    #[serde(default = "default_show_reasoning")]
    pub show_reasoning: bool,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: default_provider_kind(),
            base_url: default_base_url(),
            api_key: ApiKey::default(),
            model: String::new(),
            show_reasoning: default_show_reasoning(),
        }
    }
}

fn default_provider_kind() -> ProviderKind {
    ProviderKind::Ollama
}

fn default_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_show_reasoning() -> bool {
    true
}

/// HTTP transport tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// TCP connect timeout in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Total deadline for non-streaming requests, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Maximum silence between streamed chunks before the stream is
    /// declared dead, in seconds.
    #[serde(default = "default_idle_read_timeout_secs")]
    pub idle_read_timeout_secs: u64,

    /// Disable TLS certificate verification. Only for compatibility
    /// testing against self-signed lab deployments; logs a warning
    /// whenever it takes effect.
    #[serde(default)]
    pub danger_disable_tls_verify: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            idle_read_timeout_secs: default_idle_read_timeout_secs(),
            danger_disable_tls_verify: false,
        }
    }
}

impl HttpConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn idle_read_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_read_timeout_secs)
    }
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_idle_read_timeout_secs() -> u64 {
    90
}

/// Connectivity retry policy for connection checks and model fetches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts per probe before reporting failure.
    #[serde(default = "default_retry_max_attempts")]
    pub max_attempts: u32,

    /// Fixed delay between attempts, in milliseconds.
    #[serde(default = "default_retry_backoff_ms")]
    pub backoff_ms: u64,

    /// Per-attempt timeout for probe requests, in seconds.
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_max_attempts(),
            backoff_ms: default_retry_backoff_ms(),
            probe_timeout_secs: default_probe_timeout_secs(),
        }
    }
}

impl RetryConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

fn default_retry_max_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    1500
}

fn default_probe_timeout_secs() -> u64 {
    10
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g. "info", "debug", "trace").
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from a TOML file at the given path using async I/O.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        let config: AppConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.provider.base_url.is_empty() {
            return Err(ConfigError::Validation(
                "provider.base_url must not be empty".to_string(),
            ));
        }
        if !self.provider.base_url.starts_with("http://")
            && !self.provider.base_url.starts_with("https://")
        {
            return Err(ConfigError::Validation(format!(
                "provider.base_url must start with http:// or https://, got {:?}",
                self.provider.base_url
            )));
        }
        // A workflow app carries its own model; the other kinds need one
        // to fill the request body.
        if self.provider.kind != ProviderKind::Dify && self.provider.model.is_empty() {
            return Err(ConfigError::Validation(format!(
                "provider.model is required for kind \"{}\"",
                self.provider.kind
            )));
        }

        if self.http.connect_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "http.connect_timeout_secs must be non-zero".to_string(),
            ));
        }
        if self.http.request_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "http.request_timeout_secs must be non-zero".to_string(),
            ));
        }
        if self.http.idle_read_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "http.idle_read_timeout_secs must be non-zero".to_string(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Validation(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry.probe_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "retry.probe_timeout_secs must be non-zero".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.provider.kind, ProviderKind::Ollama);
        assert_eq!(config.provider.base_url, "http://localhost:11434");
        assert!(config.provider.show_reasoning);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.backoff_ms, 1500);
        assert_eq!(config.logging.level, "info");
        assert!(!config.http.danger_disable_tls_verify);
    }

    #[test]
    fn test_parse_minimal_toml() {
        // Defaults must produce a valid config on their own. The default
        // kind is ollama, which requires a model, so the empty string
        // would fail validation; give it one.
        let toml = r#"
            [provider]
            model = "qwen3:8b"
        "#;
        let config = AppConfig::parse(toml).unwrap();
        assert_eq!(config.provider.kind, ProviderKind::Ollama);
        assert_eq!(config.http.request_timeout_secs, 120);
    }

    #[test]
    fn test_parse_full_toml() {
        let toml = r#"
            [provider]
            kind = "dify"
            base_url = "https://api.dify.example/v1"
            api_key = "app-secret-key"
            show_reasoning = false

            [http]
            connect_timeout_secs = 5
            request_timeout_secs = 300
            idle_read_timeout_secs = 60

            [retry]
            max_attempts = 5
            backoff_ms = 500

            [logging]
            level = "debug"
        "#;
        let config = AppConfig::parse(toml).unwrap();
        assert_eq!(config.provider.kind, ProviderKind::Dify);
        assert_eq!(config.provider.base_url, "https://api.dify.example/v1");
        assert_eq!(config.provider.api_key.expose(), "app-secret-key");
        assert!(!config.provider.show_reasoning);
        assert_eq!(config.http.request_timeout_secs, 300);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.backoff_ms, 500);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_validation_rejects_empty_base_url() {
        let toml = r#"
            [provider]
            kind = "dify"
            base_url = ""
        "#;
        let result = AppConfig::parse(toml);
        assert!(result.is_err());
    }

    #[test]
    fn test_validation_rejects_bad_scheme() {
        let toml = r#"
            [provider]
            kind = "dify"
            base_url = "ftp://api.example.com"
        "#;
        let result = AppConfig::parse(toml);
        assert!(result.is_err());
    }

    #[test]
    fn test_validation_requires_model_for_openai() {
        let toml = r#"
            [provider]
            kind = "openai"
            base_url = "https://gateway.example/v1"
        "#;
        let result = AppConfig::parse(toml);
        assert!(result.is_err());
    }

    #[test]
    fn test_dify_does_not_require_model() {
        let toml = r#"
            [provider]
            kind = "dify"
            base_url = "https://api.dify.example/v1"
        "#;
        let config = AppConfig::parse(toml).unwrap();
        assert!(config.provider.model.is_empty());
    }

    #[test]
    fn test_validation_rejects_zero_attempts() {
        let toml = r#"
            [provider]
            kind = "dify"

            [retry]
            max_attempts = 0
        "#;
        let result = AppConfig::parse(toml);
        assert!(result.is_err());
    }

    #[test]
    fn test_validation_rejects_zero_timeout() {
        let toml = r#"
            [provider]
            kind = "dify"

            [http]
            idle_read_timeout_secs = 0
        "#;
        let result = AppConfig::parse(toml);
        assert!(result.is_err());
    }

    // ── Provider kind ─────────────────────────────────────────────────

    #[test]
    fn test_provider_kind_from_str() {
        assert_eq!("dify".parse::<ProviderKind>().unwrap(), ProviderKind::Dify);
        assert_eq!(
            "OpenAI".parse::<ProviderKind>().unwrap(),
            ProviderKind::OpenAi
        );
        assert_eq!(
            " ollama ".parse::<ProviderKind>().unwrap(),
            ProviderKind::Ollama
        );
        assert!("claude".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn test_provider_kind_display_roundtrip() {
        for kind in ProviderKind::ALL {
            assert_eq!(kind.to_string().parse::<ProviderKind>().unwrap(), kind);
        }
    }

    // ── ApiKey redaction ──────────────────────────────────────────────

    #[test]
    fn test_api_key_debug_is_redacted() {
        let key = ApiKey::new("super-secret");
        let debug = format!("{key:?}");
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_api_key_serialization_is_redacted() {
        let toml = r#"
            [provider]
            kind = "dify"
            api_key = "app-secret-key"
        "#;
        let config = AppConfig::parse(toml).unwrap();
        let rendered = toml::to_string(&config).unwrap();
        assert!(!rendered.contains("app-secret-key"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[test]
    fn test_empty_api_key_serializes_empty() {
        let config = AppConfig::default();
        let rendered = toml::to_string(&config).unwrap();
        assert!(!rendered.contains("[REDACTED]"));
    }

    // ── Async file-based loading ──────────────────────────────────────

    #[tokio::test]
    async fn test_load_from_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("colloquy.toml");
        tokio::fs::write(
            &path,
            b"[provider]\nkind = \"openai\"\nbase_url = \"https://gw.example/v1\"\nmodel = \"gpt-4o\"\n",
        )
        .await
        .unwrap();

        let config = AppConfig::load(&path).await.unwrap();
        assert_eq!(config.provider.kind, ProviderKind::OpenAi);
        assert_eq!(config.provider.model, "gpt-4o");
    }

    #[tokio::test]
    async fn test_load_nonexistent_file() {
        let result = AppConfig::load(Path::new("/nonexistent/file.toml")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_load_invalid_toml_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("bad.toml");
        tokio::fs::write(&path, b"not valid toml [[[").await.unwrap();

        let result = AppConfig::load(&path).await;
        assert!(result.is_err());
    }

    // ── Error display ─────────────────────────────────────────────────

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::Validation("bad value".to_string());
        assert_eq!(err.to_string(), "validation error: bad value");
    }
}

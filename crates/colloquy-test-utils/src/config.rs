//! Configuration builders for tests.
//!
//! Use [`TestConfigBuilder`] to create customised [`AppConfig`] values
//! without repeating boilerplate across crate boundaries. Defaults are
//! tuned for tests: short timeouts and a near-zero retry backoff so
//! failure paths finish quickly.

use colloquy_config::{ApiKey, AppConfig, ProviderKind};

/// Fluent builder for [`AppConfig`] in tests.
///
/// # Example
///
/// ```ignore
/// let config = TestConfigBuilder::new()
///     .provider(ProviderKind::OpenAi)
///     .base_url(server.base_url())
///     .model("test-model")
///     .build();
/// ```
pub struct TestConfigBuilder {
    config: AppConfig,
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        let mut config = AppConfig::default();
        config.provider.model = "test-model".to_string();
        config.http.connect_timeout_secs = 5;
        config.http.request_timeout_secs = 5;
        config.http.idle_read_timeout_secs = 5;
        config.retry.backoff_ms = 25;
        config.retry.probe_timeout_secs = 5;
        Self { config }
    }

    pub fn provider(mut self, kind: ProviderKind) -> Self {
        self.config.provider.kind = kind;
        self
    }

    pub fn base_url(mut self, url: &str) -> Self {
        self.config.provider.base_url = url.to_string();
        self
    }

    pub fn api_key(mut self, key: &str) -> Self {
        self.config.provider.api_key = ApiKey::new(key);
        self
    }

    pub fn model(mut self, model: &str) -> Self {
        self.config.provider.model = model.to_string();
        self
    }

    pub fn show_reasoning(mut self, show: bool) -> Self {
        self.config.provider.show_reasoning = show;
        self
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.retry.max_attempts = attempts;
        self
    }

    pub fn backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry.backoff_ms = ms;
        self
    }

    pub fn idle_read_timeout_secs(mut self, secs: u64) -> Self {
        self.config.http.idle_read_timeout_secs = secs;
        self
    }

    pub fn log_level(mut self, level: &str) -> Self {
        self.config.logging.level = level.to_string();
        self
    }

    pub fn build(self) -> AppConfig {
        self.config
    }
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

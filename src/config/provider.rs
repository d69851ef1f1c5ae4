//! Provider Configuration
//!
//! Defines the configuration schema for the gateway and its LLM backends.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Supported LLM backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Google Gemini, native generateContent API
    Gemini,

    /// Groq, OpenAI-compatible API
    Groq,

    /// OpenRouter, OpenAI-compatible API
    OpenRouter,
}

impl Provider {
    pub const ALL: [Provider; 3] = [Provider::Gemini, Provider::Groq, Provider::OpenRouter];

    /// Lowercase identifier used in config files and link strings
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Gemini => "gemini",
            Provider::Groq => "groq",
            Provider::OpenRouter => "openrouter",
        }
    }

    /// Default environment variable holding this provider's keys
    pub fn env_var(&self) -> &'static str {
        match self {
            Provider::Gemini => "GEMINI_API_KEY",
            Provider::Groq => "GROQ_API_KEY",
            Provider::OpenRouter => "OPENROUTER_API_KEY",
        }
    }

    /// Whether the backend can serve incremental chat streams
    pub fn supports_streaming(&self) -> bool {
        match self {
            Provider::Gemini | Provider::Groq | Provider::OpenRouter => true,
        }
    }

    /// Parse a provider identifier (case-insensitive)
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "gemini" | "google" => Some(Provider::Gemini),
            "groq" => Some(Provider::Groq),
            "openrouter" => Some(Provider::OpenRouter),
            _ => None,
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Provider configurations keyed by provider
    pub providers: HashMap<Provider, ProviderConfig>,

    /// Retry policy knobs
    #[serde(default)]
    pub retry: RetryConfig,

    /// Per-call timeouts
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Number of concurrent invocations per batch wave
    #[serde(default = "default_batch_width")]
    pub batch_width: usize,
}

fn default_batch_width() -> usize {
    3
}

impl GatewayConfig {
    /// Look up a provider's configuration
    pub fn provider(&self, provider: Provider) -> Option<&ProviderConfig> {
        self.providers.get(&provider)
    }
}

/// Configuration for a single LLM provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Base URL for the API
    pub base_url: String,

    /// Environment variable holding one or more keys (comma/newline separated)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    /// Optional environment variable for custom base URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_base_env: Option<String>,

    /// Additional headers to send with requests
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
}

impl ProviderConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key_env: None,
            api_base_env: None,
            headers: HashMap::new(),
        }
    }

    /// Get the effective base URL (from env var if configured, otherwise default)
    pub fn get_base_url(&self) -> String {
        if let Some(env_var) = &self.api_base_env {
            if let Ok(url) = std::env::var(env_var) {
                if !url.trim().is_empty() {
                    return url;
                }
            }
        }
        self.base_url.clone()
    }
}

/// Retry policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per key before moving to the next one
    pub max_retries_per_key: u32,

    /// Fixed delay before retrying a rate-limited key that has no successor
    pub quota_delay_ms: u64,

    /// Attempts for single-key operations (image generation)
    pub backoff_attempts: u32,

    /// Initial backoff for single-key operations, doubled per attempt
    pub backoff_base_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries_per_key: 1,
            quota_delay_ms: 500,
            backoff_attempts: 3,
            backoff_base_ms: 2000,
        }
    }
}

impl RetryConfig {
    pub fn quota_delay(&self) -> Duration {
        Duration::from_millis(self.quota_delay_ms)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }
}

/// Timeout configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Whole-request timeout for non-streaming calls
    pub request_secs: u64,

    /// TCP/TLS connect timeout
    pub connect_secs: u64,

    /// Time allowed for a stream to return its response headers
    pub stream_open_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 120,
            connect_secs: 10,
            stream_open_secs: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_gateway_config() {
        let json = r#"{
            "providers": {
                "gemini": {
                    "base_url": "https://generativelanguage.googleapis.com/v1beta",
                    "api_key_env": "GEMINI_API_KEY"
                },
                "openrouter": {
                    "base_url": "https://openrouter.ai/api/v1",
                    "headers": { "X-Title": "llmgate" }
                }
            },
            "retry": { "max_retries_per_key": 2 }
        }"#;

        let config: GatewayConfig = serde_json::from_str(json).unwrap();
        let gemini = config.provider(Provider::Gemini).unwrap();
        assert_eq!(gemini.api_key_env.as_deref(), Some("GEMINI_API_KEY"));
        assert_eq!(
            config.provider(Provider::OpenRouter).unwrap().headers.get("X-Title"),
            Some(&"llmgate".to_string())
        );
        assert!(config.provider(Provider::Groq).is_none());

        assert_eq!(config.retry.max_retries_per_key, 2);
        assert_eq!(config.retry.quota_delay_ms, 500);
        assert_eq!(config.timeouts.request_secs, 120);
        assert_eq!(config.batch_width, 3);
    }

    #[test]
    fn test_provider_parse_and_display() {
        assert_eq!(Provider::parse("Groq"), Some(Provider::Groq));
        assert_eq!(Provider::parse("google"), Some(Provider::Gemini));
        assert_eq!(Provider::parse("anthropic"), None);
        assert_eq!(Provider::OpenRouter.to_string(), "openrouter");
    }

    #[test]
    fn test_base_url_env_override() {
        let mut config = ProviderConfig::new("https://default.example.com");
        config.api_base_env = Some("LLMGATE_TEST_BASE_URL_OVERRIDE".to_string());
        assert_eq!(config.get_base_url(), "https://default.example.com");

        std::env::set_var("LLMGATE_TEST_BASE_URL_OVERRIDE", "http://localhost:9999");
        assert_eq!(config.get_base_url(), "http://localhost:9999");
        std::env::remove_var("LLMGATE_TEST_BASE_URL_OVERRIDE");
    }
}

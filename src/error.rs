//! Gateway Error Types
//!
//! Error taxonomy shared by key pools, retry, fallback and streaming.

use crate::config::Provider;
use thiserror::Error;

/// Coarse classification driving retry, rotation and fallback decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// No credentials or invalid configuration. Never retried.
    Configuration,

    /// HTTP 429 / resource exhausted. Rotate keys, then back off.
    Quota,

    /// 401-class failure. Rotate to the next credential, no delay.
    Auth,

    /// Model unavailable at the provider. Terminal for the link.
    NotFound,

    /// Anything else: network, parse, server errors.
    Other,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorClass::Configuration => "configuration",
            ErrorClass::Quota => "quota",
            ErrorClass::Auth => "auth",
            ErrorClass::NotFound => "not_found",
            ErrorClass::Other => "other",
        };
        f.write_str(name)
    }
}

/// Main error type for gateway operations
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Configuration errors (invalid JSON, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// No usable credentials for a provider
    #[error("No API keys available for '{provider}'. Set {env_var} or add a key override in settings")]
    NoKeysAvailable { provider: Provider, env_var: String },

    /// Rate limit or quota exhausted
    #[error("Quota exhausted at '{provider}': {message}")]
    Quota { provider: Provider, message: String },

    /// Credential rejected
    #[error("Authentication failed at '{provider}': {message}. Check your API key.")]
    Auth { provider: Provider, message: String },

    /// Model not served by provider
    #[error("Model '{model}' not found at '{provider}'")]
    ModelNotFound { provider: Provider, model: String },

    /// HTTP request failed
    #[error("Request failed: {0}")]
    Request(String),

    /// Response parsing failed
    #[error("Response error: {0}")]
    Response(String),

    /// Streaming error
    #[error("Streaming error: {0}")]
    Stream(String),

    /// Timeout
    #[error("Request timeout: {0}")]
    Timeout(String),

    /// Every key of a provider was tried without success
    #[error("All {keys} key(s) for '{provider}' failed: {source}")]
    KeysExhausted {
        provider: Provider,
        keys: usize,
        #[source]
        source: Box<GatewayError>,
    },

    /// Every fallback layer of a task failed
    #[error("All {layers} fallback layer(s) for {task} failed: {source}")]
    ChainExhausted {
        task: String,
        layers: usize,
        #[source]
        source: Box<GatewayError>,
    },

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Classify this error for retry/rotation/fallback decisions
    pub fn class(&self) -> ErrorClass {
        match self {
            GatewayError::Config(_) | GatewayError::NoKeysAvailable { .. } => ErrorClass::Configuration,
            GatewayError::Quota { .. } => ErrorClass::Quota,
            GatewayError::Auth { .. } => ErrorClass::Auth,
            GatewayError::ModelNotFound { .. } => ErrorClass::NotFound,
            _ => ErrorClass::Other,
        }
    }

    pub fn is_quota(&self) -> bool {
        self.class() == ErrorClass::Quota
    }

    pub fn is_auth(&self) -> bool {
        self.class() == ErrorClass::Auth
    }

    pub fn is_configuration(&self) -> bool {
        self.class() == ErrorClass::Configuration
    }

    /// Missing credentials, as opposed to a broken configuration
    pub fn is_missing_keys(&self) -> bool {
        matches!(self, GatewayError::NoKeysAvailable { .. })
    }

    /// Missing-credentials error naming the provider's default variable
    pub fn no_keys(provider: Provider) -> Self {
        GatewayError::NoKeysAvailable {
            provider,
            env_var: provider.env_var().to_string(),
        }
    }

    /// The innermost error, unwrapping key and chain exhaustion
    pub fn root(&self) -> &GatewayError {
        match self {
            GatewayError::KeysExhausted { source, .. }
            | GatewayError::ChainExhausted { source, .. } => source.root(),
            other => other,
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::Timeout(err.to_string())
        } else if err.is_connect() {
            GatewayError::Request(format!("Connection failed: {}", err))
        } else if err.is_decode() {
            GatewayError::Response(format!("Failed to decode response: {}", err))
        } else {
            GatewayError::Request(err.to_string())
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Response(format!("JSON parsing error: {}", err))
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        GatewayError::Config(format!("IO error: {}", err))
    }
}

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let quota = GatewayError::Quota {
            provider: Provider::Gemini,
            message: "RESOURCE_EXHAUSTED".to_string(),
        };
        assert_eq!(quota.class(), ErrorClass::Quota);
        assert!(quota.is_quota());

        assert_eq!(GatewayError::no_keys(Provider::Groq).class(), ErrorClass::Configuration);
        assert!(GatewayError::no_keys(Provider::Groq).is_missing_keys());
        assert!(!GatewayError::Config("bad".into()).is_missing_keys());
        assert_eq!(
            GatewayError::ModelNotFound {
                provider: Provider::OpenRouter,
                model: "x".to_string()
            }
            .class(),
            ErrorClass::NotFound
        );
        assert_eq!(GatewayError::Timeout("t".into()).class(), ErrorClass::Other);
    }

    #[test]
    fn test_exhausted_quota_escalates_to_other() {
        let err = GatewayError::KeysExhausted {
            provider: Provider::Gemini,
            keys: 2,
            source: Box::new(GatewayError::Quota {
                provider: Provider::Gemini,
                message: "429".to_string(),
            }),
        };

        assert_eq!(err.class(), ErrorClass::Other);
        assert!(err.root().is_quota());
    }

    #[test]
    fn test_no_keys_message_names_env_var() {
        let msg = GatewayError::no_keys(Provider::OpenRouter).to_string();
        assert!(msg.contains("openrouter"));
        assert!(msg.contains("OPENROUTER_API_KEY"));

        let custom = GatewayError::NoKeysAvailable {
            provider: Provider::Groq,
            env_var: "TEAM_GROQ_KEYS".to_string(),
        };
        assert!(custom.to_string().contains("Set TEAM_GROQ_KEYS"));
        assert!(!custom.to_string().contains("GROQ_API_KEY"));
    }
}

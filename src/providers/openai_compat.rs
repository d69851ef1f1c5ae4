//! OpenAI-compatible adapter (Groq, OpenRouter)
//!
//! Both providers speak the `/chat/completions` dialect with bearer
//! authentication. They differ in error body shape: Groq sends string
//! codes such as `rate_limit_exceeded`, OpenRouter echoes the HTTP status
//! as a numeric code.

use crate::api::streaming::{openai_delta, text_deltas};
use crate::api::{CompletionRequest, CompletionResponse, DeltaStream, Invocation};
use crate::client::{classify_status, HttpClient};
use crate::config::{Provider, ProviderConfig};
use crate::error::{GatewayError, Result};
use crate::providers::{Backend, Generation};
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde::Deserialize;
use std::collections::HashMap;

/// Chat-completions adapter
#[derive(Debug, Clone)]
pub struct OpenAiCompatBackend {
    provider: Provider,
    http: HttpClient,
    base_url: String,
    headers: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,

    #[serde(default, rename = "type")]
    error_type: Option<String>,

    /// String on Groq, number on OpenRouter
    #[serde(default)]
    code: Option<serde_json::Value>,
}

impl ErrorBody {
    fn code_str(&self) -> Option<&str> {
        self.code.as_ref().and_then(|c| c.as_str())
    }
}

impl OpenAiCompatBackend {
    pub fn new(provider: Provider, http: HttpClient, config: &ProviderConfig) -> Self {
        Self {
            provider,
            http,
            base_url: config.get_base_url().trim_end_matches('/').to_string(),
            headers: config.headers.clone(),
        }
    }

    fn url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn headers(&self, api_key: &str) -> Result<HeaderMap> {
        let mut headers = HttpClient::base_headers(&self.headers);
        let (name, mut value) = HttpClient::bearer(self.provider, api_key)?;
        value.set_sensitive(true);
        headers.insert(name, value);
        Ok(headers)
    }
}

/// Map an OpenAI-style error response onto the gateway taxonomy
pub fn classify(provider: Provider, status: StatusCode, body: &str, model: &str) -> GatewayError {
    let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(body) else {
        return classify_status(provider, status, body, Some(model));
    };

    let error = envelope.error;
    let code = error.code_str().unwrap_or_default();
    let error_type = error.error_type.as_deref().unwrap_or_default();

    match code {
        "rate_limit_exceeded" | "insufficient_quota" => GatewayError::Quota {
            provider,
            message: error.message,
        },
        "invalid_api_key" => GatewayError::Auth {
            provider,
            message: error.message,
        },
        "model_not_found" | "model_decommissioned" => GatewayError::ModelNotFound {
            provider,
            model: model.to_string(),
        },
        _ if error_type == "insufficient_quota" => GatewayError::Quota {
            provider,
            message: error.message,
        },
        _ => classify_status(provider, status, &error.message, Some(model)),
    }
}

#[async_trait]
impl Backend for OpenAiCompatBackend {
    fn provider(&self) -> Provider {
        self.provider
    }

    async fn generate(&self, api_key: &str, model: &str, invocation: &Invocation) -> Result<Generation> {
        let request = CompletionRequest::from_invocation(model, invocation);
        let provider = self.provider;

        let body = self
            .http
            .post_json(provider, &self.url(), self.headers(api_key)?, &request, |status, body| {
                classify(provider, status, body, model)
            })
            .await?;

        let response: CompletionResponse = serde_json::from_str(&body).map_err(|e| {
            GatewayError::Response(format!("Failed to parse {} response: {}", provider, e))
        })?;

        match response.content() {
            Some(text) if !text.trim().is_empty() => Ok(Generation {
                text,
                images: Vec::new(),
            }),
            _ => Err(GatewayError::Response(format!(
                "{} returned an empty completion for {}",
                provider, model
            ))),
        }
    }

    async fn stream(&self, api_key: &str, model: &str, invocation: &Invocation) -> Result<DeltaStream> {
        let request = CompletionRequest::from_invocation(model, invocation).with_stream(true);
        let provider = self.provider;

        let bytes = self
            .http
            .post_stream(provider, &self.url(), self.headers(api_key)?, &request, |status, body| {
                classify(provider, status, body, model)
            })
            .await?;

        tracing::debug!(%provider, model, "stream opened");
        Ok(text_deltas(bytes, openai_delta))
    }
}

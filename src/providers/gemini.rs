//! Google Gemini adapter (native generateContent API)

use crate::api::gemini::{ErrorEnvelope, GenerateContentRequest, GenerateContentResponse};
use crate::api::streaming::{gemini_delta, text_deltas};
use crate::api::{DeltaStream, Invocation};
use crate::client::{classify_status, HttpClient};
use crate::config::{Provider, ProviderConfig};
use crate::error::{GatewayError, Result};
use crate::providers::{Backend, Generation};
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use std::collections::HashMap;

const API_KEY_HEADER: &str = "x-goog-api-key";

/// Gemini REST adapter
#[derive(Debug, Clone)]
pub struct GeminiBackend {
    http: HttpClient,
    base_url: String,
    headers: HashMap<String, String>,
}

impl GeminiBackend {
    pub fn new(http: HttpClient, config: &ProviderConfig) -> Self {
        Self {
            http,
            base_url: config.get_base_url().trim_end_matches('/').to_string(),
            headers: config.headers.clone(),
        }
    }

    fn url(&self, model: &str, method: &str) -> String {
        format!("{}/models/{}:{}", self.base_url, model, method)
    }

    fn headers(&self, api_key: &str) -> Result<HeaderMap> {
        let mut headers = HttpClient::base_headers(&self.headers);
        let (name, value) = HttpClient::key_header(Provider::Gemini, API_KEY_HEADER, api_key)?;
        headers.insert(name, value);
        Ok(headers)
    }
}

/// Map a Gemini error response onto the gateway taxonomy
///
/// Uses the canonical `error.status` and ErrorInfo reasons when the body
/// carries them; otherwise falls back to status-code classification.
pub fn classify(status: StatusCode, body: &str, model: &str) -> GatewayError {
    let provider = Provider::Gemini;
    let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(body) else {
        return classify_status(provider, status, body, Some(model));
    };

    let error = envelope.error;
    let canonical = error.status.as_deref().unwrap_or_default();
    let key_invalid = error
        .reasons()
        .any(|r| r == "API_KEY_INVALID" || r == "API_KEY_SERVICE_BLOCKED");

    if status == StatusCode::TOO_MANY_REQUESTS || canonical == "RESOURCE_EXHAUSTED" {
        return GatewayError::Quota {
            provider,
            message: error.message,
        };
    }
    if status == StatusCode::UNAUTHORIZED
        || canonical == "UNAUTHENTICATED"
        || canonical == "PERMISSION_DENIED"
        || key_invalid
    {
        return GatewayError::Auth {
            provider,
            message: error.message,
        };
    }
    if status == StatusCode::NOT_FOUND || canonical == "NOT_FOUND" {
        return GatewayError::ModelNotFound {
            provider,
            model: model.to_string(),
        };
    }

    GatewayError::Request(format!(
        "gemini returned status {} ({}): {}",
        status, canonical, error.message
    ))
}

#[async_trait]
impl Backend for GeminiBackend {
    fn provider(&self) -> Provider {
        Provider::Gemini
    }

    async fn generate(&self, api_key: &str, model: &str, invocation: &Invocation) -> Result<Generation> {
        let request = GenerateContentRequest::from_invocation(invocation);
        let body = self
            .http
            .post_json(
                Provider::Gemini,
                &self.url(model, "generateContent"),
                self.headers(api_key)?,
                &request,
                |status, body| classify(status, body, model),
            )
            .await?;

        let response: GenerateContentResponse = serde_json::from_str(&body).map_err(|e| {
            GatewayError::Response(format!("Failed to parse Gemini response: {}", e))
        })?;

        if response.candidates.is_empty() {
            let feedback = response
                .prompt_feedback
                .map(|f| f.to_string())
                .unwrap_or_else(|| "no candidates".to_string());
            return Err(GatewayError::Response(format!(
                "Gemini returned no candidates: {}",
                feedback
            )));
        }

        let generation = Generation {
            text: response.text(),
            images: response.inline_data().into_iter().cloned().collect(),
        };
        if generation.text.trim().is_empty() && generation.images.is_empty() {
            return Err(GatewayError::Response(format!(
                "Gemini returned an empty response (finish reason: {})",
                response.finish_reason().unwrap_or("unknown")
            )));
        }

        Ok(generation)
    }

    async fn stream(&self, api_key: &str, model: &str, invocation: &Invocation) -> Result<DeltaStream> {
        let request = GenerateContentRequest::from_invocation(invocation);
        let url = format!("{}?alt=sse", self.url(model, "streamGenerateContent"));

        let bytes = self
            .http
            .post_stream(
                Provider::Gemini,
                &url,
                self.headers(api_key)?,
                &request,
                |status, body| classify(status, body, model),
            )
            .await?;

        tracing::debug!(model, "gemini stream opened");
        Ok(text_deltas(bytes, gemini_delta))
    }
}

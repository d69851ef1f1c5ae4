//! HTTP Client
//!
//! Thin async wrapper over reqwest shared by every backend. It sends one
//! request and hands non-success responses to the caller's classifier;
//! retrying and key rotation happen above this layer.

use crate::api::streaming::ByteStream;
use crate::config::{Provider, TimeoutConfig};
use crate::error::{GatewayError, Result};
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;

/// HTTP client with per-call timeouts
#[derive(Debug, Clone)]
pub struct HttpClient {
    /// Inner reqwest client
    client: Client,

    /// Whole-request timeout for non-streaming calls
    request_timeout: Duration,

    /// Time allowed for a stream to deliver its response headers
    stream_open_timeout: Duration,
}

impl HttpClient {
    /// Create a new HTTP client
    pub fn new(timeouts: &TimeoutConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(timeouts.connect_secs))
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| GatewayError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            request_timeout: Duration::from_secs(timeouts.request_secs),
            stream_open_timeout: Duration::from_secs(timeouts.stream_open_secs),
        })
    }

    /// JSON content type plus configured extra headers
    pub fn base_headers(extra: &HashMap<String, String>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        for (key, value) in extra {
            if let (Ok(name), Ok(val)) = (
                HeaderName::try_from(key.as_str()),
                HeaderValue::from_str(value),
            ) {
                headers.insert(name, val);
            }
        }
        headers
    }

    /// `Authorization: Bearer <key>`
    pub fn bearer(provider: Provider, api_key: &str) -> Result<(HeaderName, HeaderValue)> {
        let value = HeaderValue::from_str(&format!("Bearer {}", api_key)).map_err(|e| {
            GatewayError::Auth {
                provider,
                message: format!("Invalid API key format: {}", e),
            }
        })?;
        Ok((AUTHORIZATION, value))
    }

    /// Arbitrary key header, e.g. `x-goog-api-key`
    pub fn key_header(
        provider: Provider,
        name: &'static str,
        api_key: &str,
    ) -> Result<(HeaderName, HeaderValue)> {
        let mut value = HeaderValue::from_str(api_key).map_err(|e| GatewayError::Auth {
            provider,
            message: format!("Invalid API key format: {}", e),
        })?;
        value.set_sensitive(true);
        Ok((HeaderName::from_static(name), value))
    }

    /// POST a JSON body and return the successful response body
    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        provider: Provider,
        url: &str,
        headers: HeaderMap,
        body: &T,
        classify: impl FnOnce(StatusCode, &str) -> GatewayError + Send,
    ) -> Result<String> {
        let response = self
            .client
            .post(url)
            .headers(headers)
            .timeout(self.request_timeout)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            return Ok(text);
        }

        tracing::debug!(%provider, status = status.as_u16(), "provider returned error status");
        Err(classify(status, &text))
    }

    /// POST a JSON body and return the response body as a byte stream
    ///
    /// The status is checked before the stream is returned, so credential
    /// and quota failures surface here, before any delta is produced.
    pub async fn post_stream<T: Serialize + ?Sized>(
        &self,
        provider: Provider,
        url: &str,
        headers: HeaderMap,
        body: &T,
        classify: impl FnOnce(StatusCode, &str) -> GatewayError + Send,
    ) -> Result<ByteStream> {
        let request = self.client.post(url).headers(headers).json(body).send();

        let response = tokio::time::timeout(self.stream_open_timeout, request)
            .await
            .map_err(|_| {
                GatewayError::Timeout(format!(
                    "{} did not open the stream within {}s",
                    provider,
                    self.stream_open_timeout.as_secs()
                ))
            })??;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            tracing::debug!(%provider, status = status.as_u16(), "stream rejected");
            return Err(classify(status, &text));
        }

        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(GatewayError::from));
        Ok(Box::pin(bytes))
    }
}

/// Status code classification shared by all backends
///
/// Structured checks run first; the body substring match is a fallback for
/// providers that report quota exhaustion with other status codes.
pub fn classify_status(provider: Provider, status: StatusCode, body: &str, model: Option<&str>) -> GatewayError {
    let message = truncate(body, 500);

    if status == StatusCode::TOO_MANY_REQUESTS || mentions_quota(body) {
        return GatewayError::Quota { provider, message };
    }

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => GatewayError::Auth { provider, message },
        StatusCode::NOT_FOUND => GatewayError::ModelNotFound {
            provider,
            model: model.unwrap_or("unknown").to_string(),
        },
        _ => GatewayError::Request(format!(
            "{} returned status {}: {}",
            provider, status, message
        )),
    }
}

/// Body text signalling rate limiting or quota exhaustion
pub fn mentions_quota(body: &str) -> bool {
    let lower = body.to_lowercase();
    lower.contains("resource_exhausted")
        || lower.contains("rate limit")
        || lower.contains("rate_limit")
        || lower.contains("too many requests")
        || lower.contains("quota exceeded")
}

fn truncate(body: &str, max: usize) -> String {
    match body.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

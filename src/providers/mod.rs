//! Backend Adapters
//!
//! One adapter per wire protocol. Each translates an [`Invocation`] into its
//! provider's request shape and maps responses and failures back into the
//! gateway's vocabulary: a [`Generation`], a [`DeltaStream`], or a
//! classified [`GatewayError`].

pub mod gemini;
pub mod openai_compat;

pub use gemini::GeminiBackend;
pub use openai_compat::OpenAiCompatBackend;

use crate::api::{DeltaStream, InlineData, Invocation};
use crate::client::HttpClient;
use crate::config::{GatewayConfig, Provider};
use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Output of a one-shot generation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Generation {
    /// Answer text, reasoning excluded
    pub text: String,

    /// Inline binary outputs such as generated images
    pub images: Vec<InlineData>,
}

/// Uniform interface over provider APIs
#[async_trait]
pub trait Backend: Send + Sync {
    /// Provider served by this adapter
    fn provider(&self) -> Provider;

    /// Whether [`Backend::stream`] is available
    fn supports_streaming(&self) -> bool {
        self.provider().supports_streaming()
    }

    /// Single request/response call
    async fn generate(&self, api_key: &str, model: &str, invocation: &Invocation) -> Result<Generation>;

    /// Open a chat stream
    ///
    /// Resolves only once the provider has accepted the request, so a
    /// rejected credential is reported here and never mid-stream.
    async fn stream(&self, api_key: &str, model: &str, invocation: &Invocation) -> Result<DeltaStream>;
}

/// Registry of adapters keyed by provider
pub type Backends = HashMap<Provider, Arc<dyn Backend>>;

/// Build an adapter for every configured provider
pub fn build_backends(config: &GatewayConfig, http: &HttpClient) -> Backends {
    let mut backends: Backends = HashMap::new();

    for (provider, provider_config) in &config.providers {
        let backend: Arc<dyn Backend> = match provider {
            Provider::Gemini => Arc::new(GeminiBackend::new(http.clone(), provider_config)),
            Provider::Groq | Provider::OpenRouter => Arc::new(OpenAiCompatBackend::new(
                *provider,
                http.clone(),
                provider_config,
            )),
        };
        backends.insert(*provider, backend);
    }

    backends
}

/// Look up an adapter, failing with a configuration error when absent
pub fn backend_for(backends: &Backends, provider: Provider) -> Result<Arc<dyn Backend>> {
    backends.get(&provider).cloned().ok_or_else(|| {
        GatewayError::Config(format!("Provider '{}' has no configuration entry", provider))
    })
}

//! llmgate - Resilient LLM Inference Gateway
//!
//! Turns a logical "generate this content" request into a reliable call
//! against several interchangeable, rate-limited LLM providers (Gemini,
//! Groq, OpenRouter). Requests rotate through multiple keys per provider,
//! retry quota errors, fail over across providers in a fixed per-task order
//! and, for chat, stream the reply as incremental text deltas.
//!
//! ```no_run
//! # async fn demo() -> llmgate::error::Result<()> {
//! use llmgate::{ChatMode, ChatTurn, Gateway};
//! use futures::StreamExt;
//! use std::sync::Arc;
//!
//! let gateway = Arc::new(Gateway::from_env()?);
//! let session = gateway.session();
//! let mut stream = session
//!     .stream_chat(&[ChatTurn::user("Explain photosynthesis")], ChatMode::Standard)
//!     .await?;
//! while let Some(delta) = stream.next().await {
//!     print!("{}", delta?);
//! }
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod batch;
pub mod chat;
pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod providers;
pub mod router;

pub use api::{Attachment, GenerationOptions, Invocation, Role};
pub use batch::BatchItem;
pub use chat::{ChatMode, ChatSession, ChatState, ChatStream, ChatTurn};
pub use config::{GatewayConfig, Provider};
pub use error::{ErrorClass, GatewayError, Result};
pub use router::{ChainOutcome, FallbackChain, LayerFailure, Link, TaskKind};

use client::HttpClient;
use config::{ConfigLoader, KeyStore};
use providers::{backend_for, build_backends, Backend, Backends, Generation};
use router::{policy, KeyPool, RandomSource, RetryPolicy};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;

const TITLE_INSTRUCTION: &str =
    "Write a short title of at most six words for the conversation below. Reply with the title only.";
const DEFAULT_TITLE: &str = "New chat";
const MAX_TITLE_CHARS: usize = 80;

/// One question of a refinement batch
#[derive(Debug, Clone)]
pub struct RefineJob {
    pub question: String,
    pub model: String,
    pub provider: Provider,
}

impl RefineJob {
    pub fn new(question: impl Into<String>, provider: Provider, model: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            model: model.into(),
            provider,
        }
    }
}

/// The inference gateway
///
/// Cheap to share behind an `Arc`; chat rotation state lives in each
/// [`ChatSession`], not here.
pub struct Gateway {
    /// Loaded configuration
    config: GatewayConfig,

    /// Credential sources, re-read per request
    keys: KeyStore,

    /// One adapter per provider
    backends: Backends,

    /// Key-pool retry policy
    retry: RetryPolicy,

    /// Shuffling and single-shot key selection
    random: Arc<RandomSource>,
}

impl Gateway {
    /// Create a gateway from built-in defaults and config files on disk
    pub fn new() -> Result<Self> {
        let loader = ConfigLoader::new()?;
        Self::from_config(loader.into_config())
    }

    /// Same as [`Gateway::new`], loading a `.env` file first if present
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::new()
    }

    /// Create a gateway with a custom config path
    pub fn with_config_path(path: impl AsRef<Path>) -> Result<Self> {
        let loader = ConfigLoader::from_path(path)?;
        Self::from_config(loader.into_config())
    }

    pub fn from_config(config: GatewayConfig) -> Result<Self> {
        let http = HttpClient::new(&config.timeouts)?;
        let random = Arc::new(RandomSource::from_entropy());

        Ok(Self {
            keys: KeyStore::from_config(&config),
            backends: build_backends(&config, &http),
            retry: RetryPolicy::new(config.retry.clone(), Arc::clone(&random)),
            random,
            config,
        })
    }

    /// Replace the random source, e.g. with a seeded one in tests
    pub fn with_random_source(mut self, random: RandomSource) -> Self {
        self.random = Arc::new(random);
        self.retry = RetryPolicy::new(self.config.retry.clone(), Arc::clone(&self.random));
        self
    }

    /// Register or replace the adapter for the backend's provider
    pub fn with_backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backends.insert(backend.provider(), backend);
        self
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn keys(&self) -> &KeyStore {
        &self.keys
    }

    /// Use keys from user settings instead of the environment
    pub fn set_key_override(&self, provider: Provider, raw: impl Into<String>) {
        self.keys.set_override(provider, raw);
    }

    pub fn clear_key_override(&self, provider: Provider) {
        self.keys.clear_override(provider);
    }

    /// Current key pool of a provider; a configuration error when empty
    pub fn pool(&self, provider: Provider) -> Result<KeyPool> {
        self.keys.pool(provider)
    }

    pub fn backend(&self, provider: Provider) -> Result<Arc<dyn Backend>> {
        backend_for(&self.backends, provider)
    }

    /// New chat session with its own rotation state
    pub fn session(self: &Arc<Self>) -> ChatSession {
        ChatSession::new(Arc::clone(self))
    }

    /// Run one link through the retry policy of its provider
    async fn execute_link(&self, link: &Link, invocation: &Invocation) -> Result<Generation> {
        let pool = self.pool(link.provider)?;
        let backend = self.backend(link.provider)?;
        let invocation = invocation.overridden(&link.overrides);

        let backend = &backend;
        let invocation = &invocation;
        let model = link.model.as_str();
        self.retry
            .execute(&pool, |key| async move { backend.generate(&key, model, invocation).await })
            .await
    }

    /// Run an invocation through a fallback chain
    pub async fn run_chain(&self, chain: &FallbackChain, invocation: &Invocation) -> Result<ChainOutcome<Generation>> {
        chain
            .run(|link| async move { self.execute_link(&link, invocation).await })
            .await
    }

    /// Extract a structured record from documents
    ///
    /// `files` are attached to the instruction; every layer runs in JSON
    /// mode and a reply that does not parse as `T` counts as a failed layer.
    pub async fn analyze<T: DeserializeOwned>(
        &self,
        instruction: &str,
        files: Vec<Attachment>,
        model_hint: Option<&str>,
    ) -> Result<ChainOutcome<T>> {
        let chain = policy::analyze_chain(model_hint)?;
        let invocation = Invocation::prompt(instruction).with_attachments(files);
        let invocation = &invocation;

        chain
            .run(|link| async move {
                let generation = self.execute_link(&link, invocation).await?;
                parse_json_document(&generation.text)
            })
            .await
    }

    /// Improve an answer with the caller's model, falling back per policy
    pub async fn refine(&self, question: &str, model: &str, provider: Provider) -> Result<ChainOutcome<String>> {
        let chain = policy::refine_chain(Link::new(provider, model));
        let outcome = self.run_chain(&chain, &Invocation::prompt(question)).await?;
        Ok(outcome.map(|generation| generation.text.trim().to_string()))
    }

    /// Refine many questions in waves of `batch_width`
    ///
    /// Always returns one item per job, in order.
    pub async fn refine_batch(&self, jobs: Vec<RefineJob>) -> Vec<BatchItem<String>> {
        batch::run_waves(jobs, self.config.batch_width, |_, job| async move {
            self.refine(&job.question, &job.model, job.provider)
                .await
                .map(ChainOutcome::into_value)
        })
        .await
    }

    /// Generate a diagram image, returned as a `data:` URI
    ///
    /// Uses one random key with backoff on quota errors.
    pub async fn generate_image(&self, description: &str) -> Result<String> {
        let link = policy::image_link();
        let (key, backend) = self.single_shot(&link)?;
        let invocation = Invocation::prompt(description).with_options(GenerationOptions {
            image_output: true,
            ..Default::default()
        });

        let generation = self
            .retry
            .with_retry(|| backend.generate(&key, &link.model, &invocation))
            .await?;

        generation
            .images
            .first()
            .map(|image| format!("data:{};base64,{}", image.mime_type, image.data))
            .ok_or_else(|| GatewayError::Response("No image in the model response".to_string()))
    }

    /// Short title for a conversation, single attempt with a random key
    pub async fn generate_title(&self, turns: &[ChatTurn]) -> Result<String> {
        if turns.iter().all(|t| t.text.trim().is_empty()) {
            return Ok(DEFAULT_TITLE.to_string());
        }

        let link = policy::title_link();
        let (key, backend) = self.single_shot(&link)?;

        let transcript = turns
            .iter()
            .map(|turn| match turn.role {
                Role::User => format!("User: {}", turn.text),
                Role::Assistant => format!("Assistant: {}", turn.text),
            })
            .collect::<Vec<_>>()
            .join("\n");
        let invocation = Invocation::prompt(transcript)
            .with_system(TITLE_INSTRUCTION)
            .with_options(link.overrides.apply(&GenerationOptions::default()));

        let generation = backend.generate(&key, &link.model, &invocation).await?;
        clean_title(&generation.text)
            .ok_or_else(|| GatewayError::Response("Model returned an empty title".to_string()))
    }

    fn single_shot(&self, link: &Link) -> Result<(String, Arc<dyn Backend>)> {
        let pool = self.pool(link.provider)?;
        let key = pool
            .pick_random(&self.random)
            .ok_or_else(|| self.keys.no_keys(link.provider))?
            .to_string();
        Ok((key, self.backend(link.provider)?))
    }
}

/// Parse a JSON reply, tolerating a surrounding markdown code fence
pub fn parse_json_document<T: DeserializeOwned>(text: &str) -> Result<T> {
    let trimmed = text.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();

    serde_json::from_str(body)
        .map_err(|e| GatewayError::Response(format!("Model reply is not the expected JSON: {}", e)))
}

/// First non-empty line without quotes, markdown markers or a trailing period
fn clean_title(raw: &str) -> Option<String> {
    let line = raw.lines().map(str::trim).find(|l| !l.is_empty())?;
    let line = line
        .trim_start_matches('#')
        .trim_start_matches("Title:")
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '*' || c == '`' || c.is_whitespace())
        .trim_end_matches('.');

    if line.is_empty() {
        return None;
    }
    Some(line.chars().take(MAX_TITLE_CHARS).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tokio_test::{assert_err, assert_ok};

    #[derive(Debug, Deserialize, PartialEq)]
    struct Record {
        title: String,
        questions: u32,
    }

    #[test]
    fn test_parse_json_document() {
        let plain: Record = assert_ok!(parse_json_document(r#"{"title":"Exam","questions":3}"#));
        assert_eq!(plain.questions, 3);

        let fenced: Record = assert_ok!(parse_json_document(
            "```json\n{\"title\":\"Exam\",\"questions\":5}\n```\n"
        ));
        assert_eq!(fenced.title, "Exam");

        let bare_fence: Record = assert_ok!(parse_json_document("```\n{\"title\":\"A\",\"questions\":1}```"));
        assert_eq!(bare_fence.questions, 1);

        let err = assert_err!(parse_json_document::<Record>("Sorry, I cannot help with that."));
        assert!(matches!(err, GatewayError::Response(_)));
    }

    #[test]
    fn test_clean_title() {
        assert_eq!(clean_title("\"Photosynthesis Basics\"\n").as_deref(), Some("Photosynthesis Basics"));
        assert_eq!(clean_title("\n## **Cell Biology Review.**").as_deref(), Some("Cell Biology Review"));
        assert_eq!(clean_title("Title: Algebra help").as_deref(), Some("Algebra help"));
        assert_eq!(clean_title("  \n \"\" "), None);
        assert_eq!(clean_title(&"x".repeat(200)).map(|t| t.len()), Some(MAX_TITLE_CHARS));
    }

    #[tokio::test]
    async fn test_empty_conversation_title_needs_no_keys() {
        let gateway = Gateway::from_config(ConfigLoader::builtin_defaults().unwrap()).unwrap();
        let title = gateway.generate_title(&[ChatTurn::user("   ")]).await.unwrap();
        assert_eq!(title, DEFAULT_TITLE);
    }

    #[test]
    fn test_default_backends_registered() {
        let gateway = Gateway::from_config(ConfigLoader::builtin_defaults().unwrap()).unwrap();
        for provider in Provider::ALL {
            assert_eq!(gateway.backend(provider).unwrap().provider(), provider);
        }
        assert_eq!(gateway.config().batch_width, 3);
    }
}

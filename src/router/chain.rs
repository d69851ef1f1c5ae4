//! Fallback Chains
//!
//! A chain is an ordered list of [`Link`]s for one task kind. Links are
//! tried in order until one succeeds; each failed layer is recorded and
//! logged so operators can see which layer finally served a request.

use crate::api::OptionOverrides;
use crate::config::Provider;
use crate::error::{ErrorClass, GatewayError, Result};
use chrono::{DateTime, Utc};
use std::future::Future;

/// Call sites that submit work to the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Analyze,
    Refine,
    Chat,
    Title,
    Image,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Analyze => "analyze",
            TaskKind::Refine => "refine",
            TaskKind::Chat => "chat",
            TaskKind::Title => "title",
            TaskKind::Image => "image",
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One layer of a fallback chain: a provider, a model and option overrides
#[derive(Debug, Clone, PartialEq)]
pub struct Link {
    /// Provider serving this layer
    pub provider: Provider,

    /// Model id as the provider expects it (may contain '/')
    pub model: String,

    /// Overrides applied to the invocation for this layer only
    pub overrides: OptionOverrides,
}

impl Link {
    pub fn new(provider: Provider, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            overrides: OptionOverrides::default(),
        }
    }

    pub fn with_overrides(mut self, overrides: OptionOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// Parse a link string in the format "provider/model"
    ///
    /// Everything after the first '/' is the model id, so OpenRouter ids
    /// such as "openrouter/meta-llama/llama-4-maverick:free" keep their slash.
    pub fn parse(link: &str) -> Result<Self> {
        let invalid = || {
            GatewayError::Config(format!(
                "Invalid model link '{}'. Expected 'provider/model'",
                link
            ))
        };

        let (provider, model) = link.split_once('/').ok_or_else(invalid)?;
        let provider = Provider::parse(provider).ok_or_else(|| {
            GatewayError::Config(format!("Unknown provider '{}' in '{}'", provider, link))
        })?;
        if model.trim().is_empty() {
            return Err(invalid());
        }

        Ok(Self::new(provider, model.trim()))
    }

    /// Same provider and model, ignoring overrides
    pub fn same_target(&self, other: &Link) -> bool {
        self.provider == other.provider && self.model == other.model
    }
}

impl std::fmt::Display for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.provider, self.model)
    }
}

/// Record of a layer that did not serve the request
#[derive(Debug, Clone)]
pub struct LayerFailure {
    pub layer: usize,
    pub link: Link,
    pub class: ErrorClass,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

/// Successful chain result plus diagnostics
#[derive(Debug, Clone)]
pub struct ChainOutcome<T> {
    pub value: T,

    /// The link that produced `value`
    pub served_by: Link,

    /// 0-based index of `served_by` in the chain
    pub layer: usize,

    /// Layers that failed before `served_by`, in order
    pub failures: Vec<LayerFailure>,
}

impl<T> ChainOutcome<T> {
    pub fn into_value(self) -> T {
        self.value
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ChainOutcome<U> {
        ChainOutcome {
            value: f(self.value),
            served_by: self.served_by,
            layer: self.layer,
            failures: self.failures,
        }
    }
}

/// Ordered list of links for one task kind
#[derive(Debug, Clone)]
pub struct FallbackChain {
    task: TaskKind,
    links: Vec<Link>,
}

impl FallbackChain {
    pub fn new(task: TaskKind, links: Vec<Link>) -> Self {
        Self { task, links }
    }

    pub fn task(&self) -> TaskKind {
        self.task
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Replace the first link
    pub fn with_primary(mut self, link: Link) -> Self {
        match self.links.first_mut() {
            Some(first) => *first = link,
            None => self.links.push(link),
        }
        self
    }

    /// Run `attempt` against each link in order until one succeeds
    ///
    /// A link whose provider has no keys is recorded as a skipped layer.
    /// Other configuration errors abort the chain immediately, and any
    /// remaining failure is recorded before the next link is tried. When
    /// every link fails the last attempted link's error is returned inside
    /// [`GatewayError::ChainExhausted`]; when no link had keys at all the
    /// first [`GatewayError::NoKeysAvailable`] is returned as is.
    pub async fn run<T, F, Fut>(&self, mut attempt: F) -> Result<ChainOutcome<T>>
    where
        F: FnMut(Link) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let task = self.task;
        if self.links.is_empty() {
            return Err(GatewayError::Config(format!(
                "No fallback layers configured for {}",
                task
            )));
        }

        let mut failures = Vec::new();
        let mut last_error = None;
        let mut missing_keys = None;

        for (layer, link) in self.links.iter().enumerate() {
            match attempt(link.clone()).await {
                Ok(value) => {
                    tracing::info!(
                        %task,
                        layer,
                        provider = %link.provider,
                        model = %link.model,
                        failed_layers = failures.len(),
                        "fallback layer served request"
                    );
                    return Ok(ChainOutcome {
                        value,
                        served_by: link.clone(),
                        layer,
                        failures,
                    });
                }
                Err(err) if err.is_missing_keys() => {
                    tracing::warn!(%task, layer, provider = %link.provider, error = %err, "fallback layer skipped");
                    failures.push(LayerFailure {
                        layer,
                        link: link.clone(),
                        class: ErrorClass::Configuration,
                        error: err.to_string(),
                        failed_at: Utc::now(),
                    });
                    if missing_keys.is_none() {
                        missing_keys = Some(err);
                    }
                }
                Err(err) if err.is_configuration() => {
                    tracing::error!(%task, layer, provider = %link.provider, error = %err, "fallback chain misconfigured");
                    return Err(err);
                }
                Err(err) => {
                    tracing::warn!(
                        %task,
                        layer,
                        provider = %link.provider,
                        model = %link.model,
                        class = %err.root().class(),
                        error = %err,
                        "fallback layer failed"
                    );
                    failures.push(LayerFailure {
                        layer,
                        link: link.clone(),
                        class: err.root().class(),
                        error: err.to_string(),
                        failed_at: Utc::now(),
                    });
                    last_error = Some(err);
                }
            }
        }

        let source = match (last_error, missing_keys) {
            (Some(err), _) => err,
            (None, Some(no_keys)) => return Err(no_keys),
            (None, None) => GatewayError::Internal("fallback loop ended without an attempt".into()),
        };
        Err(GatewayError::ChainExhausted {
            task: task.to_string(),
            layers: self.links.len(),
            source: Box::new(source),
        })
    }
}

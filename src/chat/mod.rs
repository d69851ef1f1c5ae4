//! Chat Sessions
//!
//! A [`ChatSession`] owns the per-session rotation cursors and the turn
//! state machine:
//!
//! ```text
//! Idle -> Sending -> Streaming -> Completed
//!            |           |
//!            +-> Failed <+
//! ```
//!
//! Credential rotation happens only while the stream is being opened. A
//! rejected key moves the session to the next key in round-robin order;
//! once the first delta may have been delivered no rotation takes place.

pub mod stream;

pub use stream::ChatStream;

use crate::api::{GenerationOptions, Invocation, OptionOverrides, Role, Turn};
use crate::config::Provider;
use crate::error::{GatewayError, Result};
use crate::router::key_pool::RotationCursor;
use crate::router::policy::{GEMINI_FLASH, GEMINI_PRO};
use crate::router::Link;
use crate::Gateway;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Chat turn lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatState {
    Idle,
    Sending,
    Streaming,
    Completed,
    Failed,
}

impl ChatState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChatState::Completed | ChatState::Failed)
    }
}

/// Response style of a chat turn
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatMode {
    /// Fast answers, reasoning disabled
    #[default]
    Standard,

    /// Larger model with dynamic reasoning budget
    Thinking,
}

impl ChatMode {
    /// Model and options serving this mode
    pub fn link(&self) -> Link {
        let (model, thinking_budget) = match self {
            ChatMode::Standard => (GEMINI_FLASH, 0),
            ChatMode::Thinking => (GEMINI_PRO, -1),
        };
        Link::new(Provider::Gemini, model).with_overrides(OptionOverrides {
            thinking_budget: Some(thinking_budget),
            ..Default::default()
        })
    }
}

/// One message of the chat history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub text: String,
}

impl ChatTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }
}

impl From<&ChatTurn> for Turn {
    fn from(turn: &ChatTurn) -> Self {
        match turn.role {
            Role::User => Turn::user(turn.text.clone()),
            Role::Assistant => Turn::assistant(turn.text.clone()),
        }
    }
}

/// Per-client chat handle
///
/// Sessions share the gateway's configuration and backends but never
/// share rotation state with each other.
pub struct ChatSession {
    gateway: Arc<Gateway>,
    cursors: Mutex<HashMap<Provider, Arc<RotationCursor>>>,
    state: Arc<Mutex<ChatState>>,
}

impl ChatSession {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self {
            gateway,
            cursors: Mutex::new(HashMap::new()),
            state: Arc::new(Mutex::new(ChatState::Idle)),
        }
    }

    /// State of the most recent turn
    pub fn state(&self) -> ChatState {
        *self.state.lock()
    }

    /// Start the next rotation for `provider` at `position`
    pub fn with_cursor(self, provider: Provider, position: usize) -> Self {
        self.cursors
            .lock()
            .insert(provider, Arc::new(RotationCursor::starting_at(position)));
        self
    }

    fn cursor(&self, provider: Provider) -> Arc<RotationCursor> {
        Arc::clone(self.cursors.lock().entry(provider).or_default())
    }

    fn set_state(&self, state: ChatState) {
        *self.state.lock() = state;
    }

    /// Send the full history and open a stream for the reply
    ///
    /// Each call re-sends `turns` from scratch. Fails with a configuration
    /// error before any network I/O when the provider has no keys.
    pub async fn stream_chat(&self, turns: &[ChatTurn], mode: ChatMode) -> Result<ChatStream> {
        self.set_state(ChatState::Sending);
        match self.open(turns, mode).await {
            Ok(stream) => Ok(stream),
            Err(err) => {
                self.set_state(ChatState::Failed);
                Err(err)
            }
        }
    }

    async fn open(&self, turns: &[ChatTurn], mode: ChatMode) -> Result<ChatStream> {
        let link = mode.link();
        let provider = link.provider;

        let pool = self.gateway.pool(provider)?;
        let backend = self.gateway.backend(provider)?;
        if !backend.supports_streaming() {
            return Err(GatewayError::Config(format!(
                "Provider '{}' does not support streaming",
                provider
            )));
        }

        let invocation = Invocation::conversation(turns.iter().map(Turn::from).collect())
            .with_options(link.overrides.apply(&GenerationOptions::default()));
        let cursor = self.cursor(provider);
        let mut last_error = None;

        for attempt in 1..=pool.len() {
            let Some(key) = pool.rotate(&cursor) else {
                break;
            };

            match backend.stream(key, &link.model, &invocation).await {
                Ok(deltas) => {
                    tracing::debug!(%provider, model = %link.model, attempt, "chat stream accepted");
                    return Ok(ChatStream::new(deltas, link, Arc::clone(&self.state)));
                }
                Err(err) if err.is_auth() => {
                    tracing::warn!(%provider, attempt, error = %err, "chat key rejected, rotating");
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        let source = last_error
            .unwrap_or_else(|| GatewayError::Internal("rotation ended without an attempt".into()));
        Err(GatewayError::KeysExhausted {
            provider,
            keys: pool.len(),
            source: Box::new(source),
        })
    }
}

impl std::fmt::Debug for ChatSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSession")
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{DeltaStream, InlineData};
    use crate::config::ConfigLoader;
    use crate::providers::{Backend, Generation};
    use crate::router::RandomSource;
    use async_trait::async_trait;
    use futures::{stream, StreamExt};

    /// Streams a fixed reply, rejecting a configured set of keys
    struct ScriptedBackend {
        rejected: Vec<&'static str>,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Backend for ScriptedBackend {
        fn provider(&self) -> Provider {
            Provider::Gemini
        }

        async fn generate(&self, _: &str, _: &str, _: &Invocation) -> Result<Generation> {
            Ok(Generation {
                text: "unused".into(),
                images: Vec::<InlineData>::new(),
            })
        }

        async fn stream(&self, api_key: &str, _: &str, invocation: &Invocation) -> Result<DeltaStream> {
            self.seen.lock().push(api_key.to_string());
            if self.rejected.iter().any(|r| *r == api_key) {
                return Err(GatewayError::Auth {
                    provider: Provider::Gemini,
                    message: "API key not valid".into(),
                });
            }
            let echo = invocation.turns().len().to_string();
            let deltas: Vec<Result<String>> = vec![Ok("Hel".into()), Ok("lo".into()), Ok(echo)];
            Ok(Box::pin(stream::iter(deltas)))
        }
    }

    fn session(keys: &str, rejected: Vec<&'static str>) -> (ChatSession, Arc<ScriptedBackend>) {
        let backend = Arc::new(ScriptedBackend {
            rejected,
            seen: Mutex::new(Vec::new()),
        });
        let mut config = ConfigLoader::builtin_defaults().unwrap();
        if let Some(gemini) = config.providers.get_mut(&Provider::Gemini) {
            gemini.api_key_env = Some("LLMGATE_CHAT_TEST_GEMINI_KEYS".to_string());
        }
        let gateway = Gateway::from_config(config)
            .unwrap()
            .with_random_source(RandomSource::seeded(1))
            .with_backend(backend.clone());
        gateway.set_key_override(Provider::Gemini, keys);
        (Arc::new(gateway).session(), backend)
    }

    #[test]
    fn test_mode_links() {
        let standard = ChatMode::Standard.link();
        assert_eq!(standard.model, GEMINI_FLASH);
        assert_eq!(standard.overrides.thinking_budget, Some(0));
        assert_eq!(ChatMode::Thinking.link().model, GEMINI_PRO);
    }

    #[tokio::test]
    async fn test_stream_chat_happy_path() {
        let (session, backend) = session("k1,k2", vec![]);
        assert_eq!(session.state(), ChatState::Idle);

        let turns = vec![ChatTurn::user("hi"), ChatTurn::assistant("hello"), ChatTurn::user("again")];
        let mut stream = session.stream_chat(&turns, ChatMode::Standard).await.unwrap();
        assert_eq!(session.state(), ChatState::Streaming);

        let deltas: Vec<String> = stream.by_ref().map(|d| d.unwrap()).collect().await;
        assert_eq!(deltas, vec!["Hel", "lo", "3"]);
        assert_eq!(session.state(), ChatState::Completed);
        assert_eq!(backend.seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_auth_failure_rotates_to_next_key() {
        let (session, backend) = session("bad,good", vec!["bad"]);
        let session = session.with_cursor(Provider::Gemini, 0);

        let mut stream = session.stream_chat(&[ChatTurn::user("hi")], ChatMode::Standard).await.unwrap();
        assert_eq!(stream.collect_text().await.unwrap(), "Hello1");
        assert_eq!(*backend.seen.lock(), vec!["bad", "good"]);
    }

    #[tokio::test]
    async fn test_all_keys_rejected() {
        let (session, backend) = session("a,b,c", vec!["a", "b", "c"]);

        let err = session.stream_chat(&[ChatTurn::user("hi")], ChatMode::Thinking).await.unwrap_err();
        assert!(matches!(err, GatewayError::KeysExhausted { keys: 3, .. }));
        assert!(err.root().is_auth());
        assert_eq!(session.state(), ChatState::Failed);
        assert_eq!(backend.seen.lock().len(), 3);
    }

    #[tokio::test]
    async fn test_rotation_continues_across_turns() {
        let (session, backend) = session("k1,k2,k3", vec![]);
        let session = session.with_cursor(Provider::Gemini, 0);

        for _ in 0..4 {
            let mut stream = session.stream_chat(&[ChatTurn::user("hi")], ChatMode::Standard).await.unwrap();
            stream.collect_text().await.unwrap();
        }
        assert_eq!(*backend.seen.lock(), vec!["k1", "k2", "k3", "k1"]);
    }

    #[tokio::test]
    async fn test_no_keys_fails_before_streaming() {
        let (session, backend) = session("  ", vec![]);

        let err = session.stream_chat(&[ChatTurn::user("hi")], ChatMode::Standard).await.unwrap_err();
        assert!(matches!(
            &err,
            GatewayError::NoKeysAvailable { provider: Provider::Gemini, env_var }
                if env_var == "LLMGATE_CHAT_TEST_GEMINI_KEYS"
        ));
        assert!(backend.seen.lock().is_empty());
        assert_eq!(session.state(), ChatState::Failed);
    }
}

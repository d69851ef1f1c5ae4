//! Credential Sources
//!
//! Resolves the raw key material for each provider from, in priority order,
//! a runtime override (user settings) and the provider's environment variable.
//! Sources are never merged: the first non-empty one wins.

use crate::config::provider::{GatewayConfig, Provider};
use crate::error::{GatewayError, Result};
use crate::router::key_pool::{parse_keys, KeyPool};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Per-provider credential sources, re-read on every request
#[derive(Debug, Default)]
pub struct KeyStore {
    /// Runtime overrides, e.g. keys entered in a settings screen
    overrides: RwLock<HashMap<Provider, String>>,

    /// Environment variable name per provider
    env_vars: HashMap<Provider, String>,
}

impl KeyStore {
    /// Build a key store using the env var names from the config
    pub fn from_config(config: &GatewayConfig) -> Self {
        let env_vars = Provider::ALL
            .iter()
            .map(|provider| {
                let var = config
                    .provider(*provider)
                    .and_then(|p| p.api_key_env.clone())
                    .unwrap_or_else(|| provider.env_var().to_string());
                (*provider, var)
            })
            .collect();

        Self {
            overrides: RwLock::new(HashMap::new()),
            env_vars,
        }
    }

    /// Set a runtime override for a provider (raw comma/newline separated keys)
    pub fn set_override(&self, provider: Provider, raw: impl Into<String>) {
        self.overrides.write().insert(provider, raw.into());
    }

    /// Remove a runtime override, falling back to the environment
    pub fn clear_override(&self, provider: Provider) {
        self.overrides.write().remove(&provider);
    }

    /// Load the ordered credentials for a provider. First non-empty source wins.
    pub fn load_keys(&self, provider: Provider) -> Vec<String> {
        if let Some(raw) = self.overrides.read().get(&provider) {
            let keys = parse_keys(raw);
            if !keys.is_empty() {
                return keys;
            }
        }

        self.env_vars
            .get(&provider)
            .and_then(|var| std::env::var(var).ok())
            .map(|raw| parse_keys(&raw))
            .unwrap_or_default()
    }

    /// Environment variable read for a provider's keys
    pub fn env_var(&self, provider: Provider) -> &str {
        self.env_vars
            .get(&provider)
            .map(String::as_str)
            .unwrap_or_else(|| provider.env_var())
    }

    /// Build a key pool for a provider, failing fast when it has no keys
    pub fn pool(&self, provider: Provider) -> Result<KeyPool> {
        let keys = self.load_keys(provider);
        if keys.is_empty() {
            return Err(self.no_keys(provider));
        }
        Ok(KeyPool::new(provider, keys))
    }

    /// Missing-credentials error naming the variable actually consulted
    pub fn no_keys(&self, provider: Provider) -> GatewayError {
        GatewayError::NoKeysAvailable {
            provider,
            env_var: self.env_var(provider).to_string(),
        }
    }
}

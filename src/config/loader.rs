//! Configuration Loader
//!
//! Loads the gateway configuration from built-in defaults and override files.

use crate::config::provider::GatewayConfig;
use crate::error::{GatewayError, Result};
use std::path::{Path, PathBuf};

/// Configuration loader with support for multiple sources
pub struct ConfigLoader {
    config: GatewayConfig,
}

impl ConfigLoader {
    /// Create a new config loader and load from default locations
    pub fn new() -> Result<Self> {
        let mut loader = Self {
            config: Self::builtin_defaults()?,
        };

        // Files on disk can override built-ins
        loader.load_from_default_paths()?;

        Ok(loader)
    }

    /// Create a loader with a specific config file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let mut loader = Self {
            config: Self::builtin_defaults()?,
        };

        loader.load_from_file(path)?;

        Ok(loader)
    }

    /// Parse the embedded provider defaults
    pub fn builtin_defaults() -> Result<GatewayConfig> {
        let defaults = include_str!("../../gateway.json");
        serde_json::from_str(defaults).map_err(|e| {
            GatewayError::Config(format!("Failed to parse built-in gateway.json: {}", e))
        })
    }

    /// Load configuration from default paths
    fn load_from_default_paths(&mut self) -> Result<()> {
        for path in Self::get_config_paths() {
            if path.exists() {
                tracing::debug!(path = %path.display(), "loading gateway config");
                self.load_from_file(&path)?;
            }
        }

        Ok(())
    }

    /// Get list of config paths to check, lowest priority first
    fn get_config_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        // 1. User config directory
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("llmgate").join("config.json"));
        }

        // 2. Current directory
        paths.push(PathBuf::from("llmgate.json"));

        // 3. Environment variable
        if let Ok(custom_path) = std::env::var("LLMGATE_CONFIG_PATH") {
            paths.push(PathBuf::from(custom_path));
        }

        paths
    }

    /// Load configuration from a specific file
    fn load_from_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let value: serde_json::Value = serde_json::from_str(&content).map_err(|e| {
            GatewayError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })?;

        self.merge_value(value).map_err(|e| {
            GatewayError::Config(format!("Invalid config in {}: {}", path.display(), e))
        })
    }

    /// Merge a partial JSON document into the current config (later wins)
    fn merge_value(&mut self, overrides: serde_json::Value) -> Result<()> {
        let mut base = serde_json::to_value(&self.config)?;
        merge_json(&mut base, overrides);
        self.config = serde_json::from_value(base)?;
        Ok(())
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Take ownership of the configuration
    pub fn into_config(self) -> GatewayConfig {
        self.config
    }
}

/// Recursively overlay `overrides` onto `base`; objects merge, everything else replaces
fn merge_json(base: &mut serde_json::Value, overrides: serde_json::Value) {
    match (base, overrides) {
        (serde_json::Value::Object(base_map), serde_json::Value::Object(over_map)) => {
            for (key, value) in over_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overrides) => *base = overrides,
    }
}

//! Configuration Module
//!
//! Gateway configuration loading and credential sources.

pub mod credentials;
pub mod loader;
pub mod provider;

pub use credentials::KeyStore;
pub use loader::ConfigLoader;
pub use provider::{GatewayConfig, Provider, ProviderConfig, RetryConfig, TimeoutConfig};

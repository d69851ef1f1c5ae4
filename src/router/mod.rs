//! Router Module
//!
//! Key pools, retry policy and ordered fallback across providers.

pub mod chain;
pub mod key_pool;
pub mod policy;
pub mod retry;

pub use chain::{ChainOutcome, FallbackChain, LayerFailure, Link, TaskKind};
pub use key_pool::{parse_keys, KeyPool, RandomSource, RotationCursor};
pub use retry::RetryPolicy;

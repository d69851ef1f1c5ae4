//! Retry Policy
//!
//! Two primitives:
//! - [`RetryPolicy::execute`] runs an operation across a shuffled key pool,
//!   failing over to the next key on quota errors instead of waiting.
//! - [`RetryPolicy::with_retry`] retries a single-key operation on quota
//!   errors with exponential backoff.

use crate::config::RetryConfig;
use crate::error::{ErrorClass, GatewayError, Result};
use crate::router::key_pool::{KeyPool, RandomSource};
use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Key-aware retry policy
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
    random: Arc<RandomSource>,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig, random: Arc<RandomSource>) -> Self {
        Self { config, random }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `op` against the pool with the configured per-key retry budget
    pub async fn execute<T, F, Fut>(&self, pool: &KeyPool, op: F) -> Result<T>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.execute_with(pool, self.config.max_retries_per_key, op)
            .await
    }

    /// Run `op` against the pool, trying each key at most `max_retries_per_key` times
    ///
    /// The first success is returned immediately. A quota error moves on to
    /// the next key without delay; only the last key in the shuffled order
    /// is retried after `quota_delay`. A missing model is returned at once
    /// since no other key can serve it. Any other error moves on to the next
    /// key. When every key fails, the last observed error is returned wrapped
    /// in [`GatewayError::KeysExhausted`].
    pub async fn execute_with<T, F, Fut>(
        &self,
        pool: &KeyPool,
        max_retries_per_key: u32,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let provider = pool.provider();
        if pool.is_empty() {
            return Err(GatewayError::no_keys(provider));
        }

        let keys = pool.shuffled(&self.random);
        let total = keys.len();
        let budget = max_retries_per_key.max(1);
        let mut last_error = None;

        for (index, key) in keys.into_iter().enumerate() {
            let has_next_key = index + 1 < total;

            for attempt in 1..=budget {
                match op(key.clone()).await {
                    Ok(value) => {
                        if index > 0 || attempt > 1 {
                            tracing::debug!(%provider, key_index = index, attempt, "succeeded after retry");
                        }
                        return Ok(value);
                    }
                    Err(err) if err.is_quota() => {
                        tracing::warn!(%provider, key_index = index, attempt, error = %err, "key rate limited");
                        last_error = Some(err);

                        if has_next_key || attempt == budget {
                            break;
                        }
                        tokio::time::sleep(self.config.quota_delay()).await;
                    }
                    Err(err) if err.class() == ErrorClass::NotFound => {
                        tracing::warn!(%provider, key_index = index, error = %err, "model not served, skipping remaining keys");
                        return Err(err);
                    }
                    Err(err) => {
                        tracing::warn!(%provider, key_index = index, attempt, error = %err, "key attempt failed");
                        last_error = Some(err);
                        break;
                    }
                }
            }
        }

        let source = last_error
            .unwrap_or_else(|| GatewayError::Internal("retry loop ended without an attempt".into()));
        Err(GatewayError::KeysExhausted {
            provider,
            keys: total,
            source: Box::new(source),
        })
    }

    /// Retry a single-key operation on quota errors with exponential backoff
    ///
    /// Uses `backoff_attempts` attempts starting at `backoff_base`, doubling
    /// per attempt. Any non-quota error is returned immediately.
    pub async fn with_retry<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.config.backoff_attempts.max(1);
        let mut schedule = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.config.backoff_base())
            .with_randomization_factor(0.0)
            .with_multiplier(2.0)
            .with_max_interval(Duration::from_secs(300))
            .with_max_elapsed_time(None)
            .build();

        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_quota() && attempt < attempts => {
                    let wait = schedule
                        .next_backoff()
                        .unwrap_or_else(|| self.config.backoff_base());
                    tracing::warn!(attempt, wait_ms = wait.as_millis() as u64, error = %err, "rate limited, backing off");
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

//! API Key Pool Management
//!
//! Holds the credentials of one provider and offers the three selection
//! modes the gateway needs: uniform random pick, full shuffle, and
//! round-robin rotation driven by a caller-owned cursor.

use crate::config::Provider;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Split a raw credential value on commas and newlines, dropping blanks
pub fn parse_keys(raw: &str) -> Vec<String> {
    raw.split([',', '\n', '\r'])
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(String::from)
        .collect()
}

/// Injectable random source for key selection
///
/// Seed it in tests to make shuffles and random picks reproducible.
#[derive(Debug)]
pub struct RandomSource {
    rng: Mutex<StdRng>,
}

impl RandomSource {
    /// Random source seeded from OS entropy
    pub fn from_entropy() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic random source
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Shuffle a slice in place (Fisher-Yates)
    pub fn shuffle<T>(&self, items: &mut [T]) {
        items.shuffle(&mut *self.rng.lock());
    }

    /// Uniform choice from a slice
    pub fn choose<'a, T>(&self, items: &'a [T]) -> Option<&'a T> {
        items.choose(&mut *self.rng.lock())
    }
}

impl Default for RandomSource {
    fn default() -> Self {
        Self::from_entropy()
    }
}

/// Round-robin position owned by a client session
#[derive(Debug, Default)]
pub struct RotationCursor {
    position: AtomicUsize,
}

impl RotationCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start at a fixed position
    pub fn starting_at(position: usize) -> Self {
        Self {
            position: AtomicUsize::new(position),
        }
    }

    /// Return the current slot for a pool of `len` keys and advance
    pub fn advance(&self, len: usize) -> usize {
        if len == 0 {
            return 0;
        }
        self.position.fetch_add(1, Ordering::Relaxed) % len
    }
}

/// Credentials of one provider, in configured order
#[derive(Debug, Clone)]
pub struct KeyPool {
    /// Provider name this pool belongs to
    provider: Provider,

    /// Available keys
    keys: Vec<String>,
}

impl KeyPool {
    /// Create a new key pool
    pub fn new(provider: Provider, keys: Vec<String>) -> Self {
        Self { provider, keys }
    }

    /// Build a pool from a raw comma/newline separated value
    pub fn from_raw(provider: Provider, raw: &str) -> Self {
        Self::new(provider, parse_keys(raw))
    }

    /// Get the provider this pool belongs to
    pub fn provider(&self) -> Provider {
        self.provider
    }

    /// Check if the pool is empty
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Get the number of keys in the pool
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Uniform random key, for single-shot calls
    pub fn pick_random(&self, random: &RandomSource) -> Option<&str> {
        random.choose(&self.keys).map(String::as_str)
    }

    /// All keys in a random order
    pub fn shuffled(&self, random: &RandomSource) -> Vec<String> {
        let mut keys = self.keys.clone();
        random.shuffle(&mut keys);
        keys
    }

    /// Next key in round-robin order for the given cursor
    pub fn rotate(&self, cursor: &RotationCursor) -> Option<&str> {
        if self.keys.is_empty() {
            return None;
        }
        let idx = cursor.advance(self.keys.len());
        Some(self.keys[idx].as_str())
    }
}

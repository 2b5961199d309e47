// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Short-TTL, single-use key-value holder.
//!
//! Backs the CSRF nonce store and the exchange→commit token hand-off. Entries
//! are never returned after their expiry and are removed on first read.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

/// Concurrent map of values that expire and can be taken once.
pub struct TransientStore<V> {
    entries: Arc<DashMap<String, Entry<V>>>,
    ttl: Duration,
}

impl<V> Clone for TransientStore<V> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
            ttl: self.ttl,
        }
    }
}

impl<V> TransientStore<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Store `value` under `key` for the configured TTL.
    pub fn put(&self, key: impl Into<String>, value: V) {
        self.entries.insert(
            key.into(),
            Entry {
                value,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    /// Remove and return the value if present and unexpired.
    ///
    /// The entry is deleted either way.
    pub fn take(&self, key: &str) -> Option<V> {
        let (_, entry) = self.entries.remove(key)?;
        if Instant::now() >= entry.expires_at {
            tracing::debug!("Transient entry expired before use");
            return None;
        }
        Some(entry.value)
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

//! In-memory prediction result cache

use crate::cache::stats::CacheStats;
use crate::model::InputKey;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Maps input keys to backend payloads.
///
/// Unbounded: entries only leave through [`ResultCache::clear`].
pub struct ResultCache {
    entries: RwLock<HashMap<InputKey, Bytes>>,
    stats: Arc<CacheStats>,
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            stats: Arc::new(CacheStats::new()),
        }
    }

    pub fn stats(&self) -> Arc<CacheStats> {
        Arc::clone(&self.stats)
    }

    /// Look up a payload, counting the hit or miss.
    pub fn get(&self, key: &InputKey) -> Option<Bytes> {
        let entries = self.entries.read();
        match entries.get(key) {
            Some(payload) => {
                self.stats.hit();
                metrics::counter!("iris_prediction_cache_hits_total").increment(1);
                Some(payload.clone())
            }
            None => {
                self.stats.miss();
                metrics::counter!("iris_prediction_cache_misses_total").increment(1);
                None
            }
        }
    }

    /// Look up a payload without touching the statistics.
    pub fn peek(&self, key: &InputKey) -> Option<Bytes> {
        self.entries.read().get(key).cloned()
    }

    /// Insert or overwrite the payload for `key`.
    pub fn put(&self, key: InputKey, payload: Bytes) {
        let mut entries = self.entries.write();
        entries.insert(key, payload);
        self.stats.insert();
        metrics::gauge!("iris_cache_entries").set(entries.len() as f64);
    }

    /// Drop every entry under a single write lock. Returns how many were removed.
    pub fn clear(&self) -> usize {
        let mut entries = self.entries.write();
        let removed = entries.len();
        *entries = HashMap::new();
        self.stats.invalidate();
        metrics::gauge!("iris_cache_entries").set(0.0);
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn hit_rate(&self) -> f64 {
        self.stats.hit_rate()
    }
}

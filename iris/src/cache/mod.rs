//! Cache module for Irisgate
//!
//! Holds backend prediction payloads keyed by image URL. The cache is
//! invalidated as a whole whenever the active model changes.

mod result;
mod stats;

pub use result::ResultCache;
pub use stats::{CacheStats, CacheStatsSnapshot};

use serde::{Deserialize, Serialize};

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Coalesce concurrent misses for the same image URL into one backend call
    #[serde(default = "default_single_flight")]
    pub single_flight: bool,
}

fn default_single_flight() -> bool {
    true
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            single_flight: default_single_flight(),
        }
    }
}

//! Result cache boundary.
//!
//! The fingerprint is the key: same URL, device, level and bounds mean
//! the same result within a cache's lifetime. The trait is the contract
//! an external store would implement; the in-memory map is the default.

use std::time::Duration;

use dashmap::DashMap;
use tracing::debug;

use crate::report::AnalysisResult;

pub trait AnalysisCache: Send + Sync {
    fn lookup(&self, fingerprint: &str) -> Option<AnalysisResult>;
    fn store(&self, result: &AnalysisResult);
}

/// In-process cache with a fixed time-to-live per entry.
pub struct InMemoryCache {
    entries: DashMap<String, (std::time::Instant, AnalysisResult)>,
    ttl: Duration,
}

impl InMemoryCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(15 * 60))
    }
}

impl AnalysisCache for InMemoryCache {
    fn lookup(&self, fingerprint: &str) -> Option<AnalysisResult> {
        let entry = self.entries.get(fingerprint)?;
        let (stored_at, result) = entry.value();
        if stored_at.elapsed() > self.ttl {
            drop(entry);
            self.entries.remove(fingerprint);
            debug!(target: "pagecarbon", fingerprint, "cache entry expired");
            return None;
        }
        Some(result.clone())
    }

    fn store(&self, result: &AnalysisResult) {
        self.entries.insert(
            result.fingerprint.clone(),
            (std::time::Instant::now(), result.clone()),
        );
    }
}

/// Disables caching without branching at the call sites.
pub struct NoopCache;

impl AnalysisCache for NoopCache {
    fn lookup(&self, _fingerprint: &str) -> Option<AnalysisResult> {
        None
    }

    fn store(&self, _result: &AnalysisResult) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::AnalysisResult;

    fn result(fingerprint: &str) -> AnalysisResult {
        AnalysisResult {
            fingerprint: fingerprint.to_string(),
            ..AnalysisResult::empty("https://example.com")
        }
    }

    #[test]
    fn store_then_lookup_round_trips() {
        let cache = InMemoryCache::default();
        cache.store(&result("a|desktop|default|i5|s8"));

        let hit = cache.lookup("a|desktop|default|i5|s8").expect("hit");
        assert_eq!(hit.fingerprint, "a|desktop|default|i5|s8");
        assert!(cache.lookup("a|mobile|default|i5|s8").is_none());
    }

    #[test]
    fn expired_entries_are_evicted_on_lookup() {
        let cache = InMemoryCache::new(Duration::ZERO);
        cache.store(&result("k"));

        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.lookup("k").is_none());
        assert!(cache.is_empty());
    }
}

//! Per-tenant TTL cache for field accuracy aggregates.
//!
//! Advisory only: a stale read at worst ranks a problem field one request late.
//! Every write for a tenant invalidates that tenant's entry.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::feedback::models::FieldAccuracy;

pub const DEFAULT_ACCURACY_TTL: Duration = Duration::from_secs(60);

struct CacheEntry {
    accuracy: Vec<FieldAccuracy>,
    inserted_at: Instant,
}

/// Thread-safe accuracy cache keyed by tenant id.
pub struct AccuracyCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl AccuracyCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Returns the cached aggregates, or `None` on miss or expiry.
    pub fn get(&self, tenant: &str) -> Option<Vec<FieldAccuracy>> {
        let mut entries = self.entries.lock();
        match entries.get(tenant) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => Some(entry.accuracy.clone()),
            Some(_) => {
                entries.remove(tenant);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, tenant: &str, accuracy: Vec<FieldAccuracy>) {
        self.entries.lock().insert(
            tenant.to_string(),
            CacheEntry {
                accuracy,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn invalidate(&self, tenant: &str) {
        self.entries.lock().remove(tenant);
    }
}

impl Default for AccuracyCache {
    fn default() -> Self {
        Self::new(DEFAULT_ACCURACY_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accuracy(field: &str) -> Vec<FieldAccuracy> {
        vec![FieldAccuracy {
            field: field.to_string(),
            total: 10,
            corrected: 1,
            accuracy: 0.9,
        }]
    }

    #[test]
    fn test_cache_hit_and_miss() {
        let cache = AccuracyCache::default();
        assert!(cache.get("acme").is_none());
        cache.put("acme", accuracy("email"));
        assert_eq!(cache.get("acme").unwrap()[0].field, "email");
        assert!(cache.get("other").is_none());
    }

    #[test]
    fn test_invalidate_is_per_tenant() {
        let cache = AccuracyCache::default();
        cache.put("a", accuracy("email"));
        cache.put("b", accuracy("phone"));
        cache.invalidate("a");
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
    }

    #[test]
    fn test_cache_ttl_expiry() {
        let cache = AccuracyCache::new(Duration::from_millis(1));
        cache.put("acme", accuracy("email"));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("acme").is_none());
    }
}

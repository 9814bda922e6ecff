use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use serde_json::Value;

use crate::config::CachePolicy;

#[derive(Debug)]
struct CacheEntry {
    value: Value,
    stored_at: Instant,
}

/// Last successful result per call identity.
#[derive(Debug, Default)]
pub struct ResultCache {
    policy: CachePolicy,
    entries: HashMap<String, CacheEntry>,
    // insertion order, oldest first
    order: VecDeque<String>,
}

impl ResultCache {
    pub fn new(policy: CachePolicy) -> Self {
        Self {
            policy,
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// Look up a result. Expired entries are removed and reported as missing.
    pub fn get(&mut self, key: &str, now: Instant) -> Option<Value> {
        let expired = match (self.entries.get(key), self.policy.ttl) {
            (None, _) => return None,
            (Some(entry), Some(ttl)) => now.saturating_duration_since(entry.stored_at) >= ttl,
            (Some(_), None) => false,
        };

        if expired {
            self.remove(key);
            return None;
        }
        self.entries.get(key).map(|entry| entry.value.clone())
    }

    /// Store a result, replacing any previous one for the key.
    pub fn insert(&mut self, key: String, value: Value, now: Instant) {
        if self.policy.max_entries == Some(0) {
            return;
        }

        if self.entries.contains_key(&key) {
            self.order.retain(|existing| existing != &key);
        }
        self.order.push_back(key.clone());
        self.entries.insert(
            key,
            CacheEntry {
                value,
                stored_at: now,
            },
        );

        if let Some(max) = self.policy.max_entries {
            while self.entries.len() > max {
                let Some(oldest) = self.order.pop_front() else {
                    break;
                };
                self.entries.remove(&oldest);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn remove(&mut self, key: &str) {
        self.entries.remove(key);
        self.order.retain(|existing| existing != key);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;

    #[test]
    fn unbounded_by_default() {
        let mut cache = ResultCache::default();
        let now = Instant::now();
        for n in 0..100 {
            cache.insert(format!("k{n}"), json!(n), now);
        }
        assert_eq!(cache.len(), 100);
        assert_eq!(cache.get("k0", now + Duration::from_secs(86_400)), Some(json!(0)));
    }

    #[test]
    fn insert_replaces_value() {
        let mut cache = ResultCache::default();
        let now = Instant::now();
        cache.insert("k".into(), json!(1), now);
        cache.insert("k".into(), json!(2), now);
        assert_eq!(cache.get("k", now), Some(json!(2)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn max_entries_evicts_oldest_insertion() {
        let mut cache = ResultCache::new(CachePolicy {
            max_entries: Some(2),
            ttl: None,
        });
        let now = Instant::now();
        cache.insert("a".into(), json!(1), now);
        cache.insert("b".into(), json!(2), now);
        cache.insert("a".into(), json!(3), now);
        cache.insert("c".into(), json!(4), now);

        assert_eq!(cache.get("b", now), None);
        assert_eq!(cache.get("a", now), Some(json!(3)));
        assert_eq!(cache.get("c", now), Some(json!(4)));
    }

    #[test]
    fn zero_capacity_stores_nothing() {
        let mut cache = ResultCache::new(CachePolicy {
            max_entries: Some(0),
            ttl: None,
        });
        cache.insert("a".into(), json!(1), Instant::now());
        assert!(cache.is_empty());
    }

    #[test]
    fn ttl_expires_entries() {
        let mut cache = ResultCache::new(CachePolicy {
            max_entries: None,
            ttl: Some(Duration::from_secs(30)),
        });
        let start = Instant::now();
        cache.insert("a".into(), json!(1), start);

        assert_eq!(cache.get("a", start + Duration::from_secs(29)), Some(json!(1)));
        assert_eq!(cache.get("a", start + Duration::from_secs(30)), None);
        assert!(cache.is_empty());
    }
}

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tracing::debug;

use crate::flow::snapshot::OrderFlowSnapshot;

/// TTL memoization for order-flow snapshots, keyed by (symbol, window).
///
/// Entries expire by TTL and by a maximum entry count (oldest-inserted
/// evicted first) so memory stays bounded however many symbols rotate
/// through.
pub struct MetricsCache {
    ttl: Duration,
    max_entries: usize,
    entries: HashMap<(String, usize), CachedSnapshot>,
}

struct CachedSnapshot {
    snapshot: OrderFlowSnapshot,
    inserted_at: DateTime<Utc>,
}

impl MetricsCache {
    pub fn new(ttl_secs: i64, max_entries: usize) -> Self {
        Self {
            ttl: Duration::seconds(ttl_secs.max(1)),
            max_entries: max_entries.max(1),
            entries: HashMap::new(),
        }
    }

    pub fn get(&self, symbol: &str, window: usize) -> Option<&OrderFlowSnapshot> {
        self.get_at(symbol, window, Utc::now())
    }

    pub fn get_at(
        &self,
        symbol: &str,
        window: usize,
        now: DateTime<Utc>,
    ) -> Option<&OrderFlowSnapshot> {
        let entry = self.entries.get(&(symbol.to_string(), window))?;
        if now - entry.inserted_at > self.ttl {
            return None;
        }
        Some(&entry.snapshot)
    }

    pub fn insert(&mut self, window: usize, snapshot: OrderFlowSnapshot) {
        self.insert_at(window, snapshot, Utc::now());
    }

    pub fn insert_at(&mut self, window: usize, snapshot: OrderFlowSnapshot, now: DateTime<Utc>) {
        // Drop expired entries first, then the oldest if still full
        self.entries.retain(|_, e| now - e.inserted_at <= self.ttl);

        if self.entries.len() >= self.max_entries {
            if let Some(oldest) = self
                .entries
                .iter()
                .min_by_key(|(_, e)| e.inserted_at)
                .map(|(k, _)| k.clone())
            {
                debug!("metrics cache full, evicting {}/{}", oldest.0, oldest.1);
                self.entries.remove(&oldest);
            }
        }

        self.entries.insert(
            (snapshot.symbol.clone(), window),
            CachedSnapshot {
                snapshot,
                inserted_at: now,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::make_snapshot;

    #[test]
    fn hit_within_ttl_miss_after() {
        let mut cache = MetricsCache::new(5, 16);
        let t0 = Utc::now();
        cache.insert_at(50, make_snapshot("BTC-USD"), t0);

        assert!(cache.get_at("BTC-USD", 50, t0 + Duration::seconds(3)).is_some());
        assert!(cache.get_at("BTC-USD", 50, t0 + Duration::seconds(6)).is_none());
    }

    #[test]
    fn keyed_by_symbol_and_window() {
        let mut cache = MetricsCache::new(5, 16);
        let t0 = Utc::now();
        cache.insert_at(50, make_snapshot("BTC-USD"), t0);

        assert!(cache.get_at("BTC-USD", 100, t0).is_none());
        assert!(cache.get_at("ETH-USD", 50, t0).is_none());
    }

    #[test]
    fn max_entries_evicts_oldest() {
        let mut cache = MetricsCache::new(60, 2);
        let t0 = Utc::now();
        cache.insert_at(50, make_snapshot("A"), t0);
        cache.insert_at(50, make_snapshot("B"), t0 + Duration::seconds(1));
        cache.insert_at(50, make_snapshot("C"), t0 + Duration::seconds(2));

        assert_eq!(cache.len(), 2);
        assert!(cache.get_at("A", 50, t0 + Duration::seconds(2)).is_none());
        assert!(cache.get_at("C", 50, t0 + Duration::seconds(2)).is_some());
    }
}

/*
 * This file is a part of dscached, a disk-store object cache core
 * derived in the spirit of Skytable (https://github.com/skytable/skytable).
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

//! # Negative cache (C2)
//!
//! Remembers keys that were *just* confirmed absent from disk so a burst
//! of repeat lookups for a missing key doesn't re-trigger a LOAD job each
//! time (§4.2, grounded on `cacheSetKeyMayExist` /
//! `cacheSetKeyDoesNotExist` / `negativeCacheEvictOneEntry` in
//! `dscache.c`). Entries expire after a short TTL and are evicted
//! oldest-first once the cache exceeds its capacity.

use crate::keyval::Key;
use std::collections::HashMap;

/// Default number of entries the negative cache holds before it starts
/// evicting (`original_source` used a flat 10000-entry budget per db).
pub const DEFAULT_CAPACITY: usize = 10_000;

struct Entry {
    /// unix-ms timestamp the absence was recorded
    stamped_at: i64,
}

pub struct NegativeCache {
    capacity: usize,
    entries: HashMap<Key, Entry>,
    ttl_ms: i64,
}

impl NegativeCache {
    pub fn new(capacity: usize, ttl_ms: i64) -> Self {
        Self {
            capacity,
            entries: HashMap::new(),
            ttl_ms,
        }
    }

    /// Record that `key` was just confirmed absent from disk.
    pub fn set_does_not_exist(&mut self, key: Key, now_ms: i64) {
        if self.entries.len() >= self.capacity && !self.entries.contains_key(&key) {
            self.evict_one(now_ms);
        }
        self.entries.insert(key, Entry { stamped_at: now_ms });
    }

    /// A key just came into existence (client write, or a LOAD that found
    /// it after all): drop any stale negative entry so future lookups
    /// don't short-circuit past real data (the eager-DEL open question
    /// from §9).
    pub fn clear(&mut self, key: &Key) {
        self.entries.remove(key);
    }

    /// True if we can *skip* touching disk for this key: either we know
    /// it doesn't exist and that memo hasn't expired, or there's no memo
    /// at all (caller must still try the real path in that case).
    pub fn may_exist(&mut self, key: &Key, now_ms: i64) -> bool {
        match self.entries.get(key) {
            Some(e) if now_ms - e.stamped_at < self.ttl_ms => false,
            Some(_) => {
                self.entries.remove(key);
                true
            }
            None => true,
        }
    }

    /// Evict the entry with the oldest stamp among a handful of random
    /// samples, mirroring `negativeCacheEvictOneEntry`'s 3-sample
    /// approximate-LRU instead of scanning the whole map.
    fn evict_one(&mut self, _now_ms: i64) {
        const SAMPLES: usize = 3;
        let victim = self
            .entries
            .iter()
            .take(SAMPLES)
            .min_by_key(|(_, e)| e.stamped_at)
            .map(|(k, _)| k.clone());
        if let Some(k) = victim {
            self.entries.remove(&k);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drive the 3-sample eviction pass directly; this is what C9's
    /// `neg_cache.evict_one()` calls every cron tick once over budget.
    pub fn force_evict_one(&mut self) -> bool {
        let before = self.entries.len();
        self.evict_one(crate::util::now_ms());
        self.entries.len() < before
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_absence_short_circuits() {
        let mut nc = NegativeCache::new(10, 1000);
        let k = Key::from("missing");
        nc.set_does_not_exist(k.clone(), 0);
        assert!(!nc.may_exist(&k, 500));
    }

    #[test]
    fn expired_absence_allows_retry() {
        let mut nc = NegativeCache::new(10, 1000);
        let k = Key::from("missing");
        nc.set_does_not_exist(k.clone(), 0);
        assert!(nc.may_exist(&k, 1500));
        assert_eq!(nc.len(), 0);
    }

    #[test]
    fn clear_removes_memo_eagerly() {
        let mut nc = NegativeCache::new(10, 1000);
        let k = Key::from("k");
        nc.set_does_not_exist(k.clone(), 0);
        nc.clear(&k);
        assert!(nc.may_exist(&k, 0));
    }

    #[test]
    fn eviction_keeps_capacity_bounded() {
        let mut nc = NegativeCache::new(4, 100_000);
        for i in 0..10 {
            nc.set_does_not_exist(Key::from(format!("k{i}")), i as i64);
        }
        assert!(nc.len() <= 4);
    }
}

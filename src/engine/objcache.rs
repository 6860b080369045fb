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

//! # Object cache (C3)
//!
//! The in-memory resident set: a per-DB map from key to value, plus the
//! approximate-LRU sampling eviction routine (`cacheFreeOneEntry` in
//! `dscache.c`, §4.3). Owned exclusively by the engine's main thread —
//! nothing here takes a lock, because nothing here is ever touched from a
//! worker thread.

use crate::keyval::{Key, StoredValue};
use rand::{seq::IteratorRandom, Rng};
use std::{collections::HashMap, sync::Arc};

/// How many entries `try_evict_one` samples per DB before moving on.
const SAMPLES_PER_DB: usize = 5;
/// Global cap on retries across *all* DBs before giving up on this pass,
/// mirroring `cacheFreeOneEntry`'s `maxtries`.
const MAX_TRIES: usize = 100;

pub struct ObjectCache {
    live: HashMap<Key, Arc<StoredValue>>,
}

impl ObjectCache {
    pub fn new() -> Self {
        Self {
            live: HashMap::new(),
        }
    }

    pub fn lookup(&self, key: &Key) -> Option<&Arc<StoredValue>> {
        self.live.get(key)
    }

    pub fn contains(&self, key: &Key) -> bool {
        self.live.contains_key(key)
    }

    /// Insert only if absent; returns `false` if the key was already
    /// resident (used by the LOAD-completion path, §4.6, which must not
    /// clobber a value a concurrent client write already installed).
    pub fn add(&mut self, key: Key, value: Arc<StoredValue>) -> bool {
        if self.live.contains_key(&key) {
            return false;
        }
        self.live.insert(key, value);
        true
    }

    /// Unconditional insert/replace, used by the client-write path (§6
    /// `set`).
    pub fn overwrite(&mut self, key: Key, value: Arc<StoredValue>) {
        self.live.insert(key, value);
    }

    pub fn delete(&mut self, key: &Key) -> Option<Arc<StoredValue>> {
        self.live.remove(key)
    }

    pub fn random_entry(&self) -> Option<(&Key, &Arc<StoredValue>)> {
        let mut rng = rand::thread_rng();
        self.live.iter().choose(&mut rng)
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Sum of resident payload sizes, used by C9 as a memory-budget proxy.
    pub fn total_bytes(&self) -> u64 {
        self.live.values().map(|v| v.payload().len() as u64).sum()
    }

    fn sample(&self, n: usize, rng: &mut impl Rng) -> Vec<Key> {
        self.live
            .keys()
            .choose_multiple(rng, n)
            .into_iter()
            .cloned()
            .collect()
    }
}

impl Default for ObjectCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-DB sampling pass: caller provides a closure telling us whether a key
/// currently has any I/O flag set (so in-flight keys are never evicted —
/// evicting a key mid SAVE would orphan the snapshot handle).
pub fn sample_victim(
    caches: &[(u16, &ObjectCache)],
    has_io_flag: impl Fn(u16, &Key) -> bool,
) -> (Option<(u16, Key, u32)>, usize) {
    let mut rng = rand::thread_rng();
    let mut best: Option<(u16, Key, u32)> = None;
    let mut tries = 0usize;

    'dbs: for &(db, cache) in caches {
        if cache.is_empty() {
            continue;
        }
        for key in cache.sample(SAMPLES_PER_DB, &mut rng) {
            tries += 1;
            if tries > MAX_TRIES {
                break 'dbs;
            }
            if has_io_flag(db, &key) {
                continue;
            }
            let idle = cache
                .lookup(&key)
                .map(|v| v.idle_minutes())
                .unwrap_or(0);
            let better = match &best {
                Some((_, _, best_idle)) => idle > *best_idle,
                None => true,
            };
            if better {
                best = Some((db, key, idle));
            }
        }
    }
    (best, tries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn val(payload: &'static str) -> Arc<StoredValue> {
        Arc::new(StoredValue::new(Bytes::from_static(payload.as_bytes()), None))
    }

    #[test]
    fn add_does_not_clobber_existing() {
        let mut oc = ObjectCache::new();
        let k = Key::from("k");
        assert!(oc.add(k.clone(), val("first")));
        assert!(!oc.add(k.clone(), val("second")));
        assert_eq!(oc.lookup(&k).unwrap().payload().as_ref(), b"first");
    }

    #[test]
    fn overwrite_always_replaces() {
        let mut oc = ObjectCache::new();
        let k = Key::from("k");
        oc.overwrite(k.clone(), val("first"));
        oc.overwrite(k.clone(), val("second"));
        assert_eq!(oc.lookup(&k).unwrap().payload().as_ref(), b"second");
    }

    #[test]
    fn sample_victim_skips_in_flight_keys() {
        let mut oc = ObjectCache::new();
        oc.overwrite(Key::from("locked"), val("v"));
        oc.overwrite(Key::from("free"), val("v"));
        let caches = [(0u16, &oc)];
        let (victim, _) = sample_victim(&caches, |_db, k| k == &Key::from("locked"));
        assert_eq!(victim.map(|(_, k, _)| k), Some(Key::from("free")));
    }

    #[test]
    fn sample_victim_empty_cache_is_none() {
        let oc = ObjectCache::new();
        let caches = [(0u16, &oc)];
        let (victim, tries) = sample_victim(&caches, |_, _| false);
        assert!(victim.is_none());
        assert_eq!(tries, 0);
    }
}

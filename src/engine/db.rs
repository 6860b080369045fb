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

//! One logical database (§3 *Database*): a resident set, its
//! negative cache, and the lock/waiter bookkeeping scoped to it.

use crate::{
    engine::{blocking::BlockingRegistry, locks::KeyLocks, negcache::NegativeCache, objcache::ObjectCache},
    keyval::DbId,
};

pub struct Database {
    pub id: DbId,
    pub live: ObjectCache,
    pub neg_cache: NegativeCache,
    pub waiters: BlockingRegistry,
    pub locks: KeyLocks,
}

impl Database {
    pub fn new(id: DbId, neg_cache_capacity: usize, neg_cache_ttl_ms: i64) -> Self {
        Self {
            id,
            live: ObjectCache::new(),
            neg_cache: NegativeCache::new(neg_cache_capacity, neg_cache_ttl_ms),
            waiters: BlockingRegistry::new(),
            locks: KeyLocks::new(),
        }
    }
}

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

//! # Blocking-key registry (C7)
//!
//! Suspends a client until a key it needs becomes resident, grounded on
//! `waitForSwappedKey` / `waitForMultipleSwappedKeys` /
//! `handleClientsBlockedOnSwappedKey` in `dscache.c` (§4.7). Whether a key
//! is already resident or known-absent is decided by the caller (the
//! engine, which owns the object cache and negative cache) — this module
//! only tracks who is waiting on what.

use crate::{
    engine::client::ClientId,
    keyval::{DbId, Key},
};
use std::collections::{HashMap, VecDeque};

pub enum WaitFor {
    NotBlocked,
    /// `schedule_load` is true the first time anyone starts waiting on
    /// this key, telling the caller to kick off a LOAD.
    Blocked { schedule_load: bool },
}

#[derive(Default)]
pub struct BlockingRegistry {
    waiters: HashMap<(DbId, Key), VecDeque<ClientId>>,
    waited_keys: HashMap<ClientId, Vec<(DbId, Key)>>,
}

impl BlockingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// §4.7 `wait_for`. `already_resident` and `may_exist` are computed by
    /// the caller against C3/C2 before this is called.
    pub fn wait_for(
        &mut self,
        client: ClientId,
        db: DbId,
        key: Key,
        already_resident: bool,
        may_exist: bool,
    ) -> WaitFor {
        if already_resident || !may_exist {
            return WaitFor::NotBlocked;
        }
        self.waited_keys
            .entry(client)
            .or_default()
            .push((db, key.clone()));
        let entry = self.waiters.entry((db, key)).or_default();
        let schedule_load = entry.is_empty();
        entry.push_back(client);
        WaitFor::Blocked { schedule_load }
    }

    /// §4.7 `release_key`. Returns true if the client has no more keys to
    /// wait for (i.e. it's ready to be re-dispatched).
    pub fn release_key(&mut self, client: ClientId, db: DbId, key: &Key) -> bool {
        if let Some(waited) = self.waited_keys.get_mut(&client) {
            waited.retain(|(d, k)| !(*d == db && k == key));
        }
        let dk = (db, key.clone());
        if let Some(q) = self.waiters.get_mut(&dk) {
            q.retain(|c| *c != client);
            if q.is_empty() {
                self.waiters.remove(&dk);
            }
        }
        self.waited_keys
            .get(&client)
            .map(|w| w.is_empty())
            .unwrap_or(true)
    }

    /// §4.7 `on_key_loaded`. Returns the clients now fully unblocked
    /// (every key they waited on has resolved).
    pub fn on_key_loaded(&mut self, db: DbId, key: &Key) -> Vec<ClientId> {
        let snapshot: Vec<ClientId> = self
            .waiters
            .get(&(db, key.clone()))
            .cloned()
            .into_iter()
            .flatten()
            .collect();
        snapshot
            .into_iter()
            .filter(|&c| self.release_key(c, db, key))
            .collect()
    }

    /// §7 *Disconnect while blocked*: purge every trace of a client.
    pub fn purge_client(&mut self, client: ClientId) {
        if let Some(keys) = self.waited_keys.remove(&client) {
            for (db, key) in keys {
                let dk = (db, key);
                if let Some(q) = self.waiters.get_mut(&dk) {
                    q.retain(|c| *c != client);
                    if q.is_empty() {
                        self.waiters.remove(&dk);
                    }
                }
            }
        }
    }

    pub fn waited_keys(&self, client: ClientId) -> &[(DbId, Key)] {
        self.waited_keys
            .get(&client)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn waiter_count(&self, db: DbId, key: &Key) -> usize {
        self.waiters
            .get(&(db, key.clone()))
            .map(VecDeque::len)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn already_resident_never_blocks() {
        let mut reg = BlockingRegistry::new();
        let outcome = reg.wait_for(ClientId(1), 0, Key::from("k"), true, true);
        assert!(matches!(outcome, WaitFor::NotBlocked));
    }

    #[test]
    fn first_waiter_triggers_load_subsequent_do_not() {
        let mut reg = BlockingRegistry::new();
        let a = reg.wait_for(ClientId(1), 0, Key::from("k"), false, true);
        assert!(matches!(a, WaitFor::Blocked { schedule_load: true }));
        let b = reg.wait_for(ClientId(2), 0, Key::from("k"), false, true);
        assert!(matches!(b, WaitFor::Blocked { schedule_load: false }));
    }

    #[test]
    fn on_key_loaded_resumes_only_fully_satisfied_clients() {
        let mut reg = BlockingRegistry::new();
        reg.wait_for(ClientId(1), 0, Key::from("k1"), false, true);
        reg.wait_for(ClientId(1), 0, Key::from("k2"), false, true);
        reg.wait_for(ClientId(2), 0, Key::from("k1"), false, true);

        let ready = reg.on_key_loaded(0, &Key::from("k1"));
        // client 2 only waited on k1, so it's ready; client 1 still waits on k2.
        assert_eq!(ready, vec![ClientId(2)]);

        let ready2 = reg.on_key_loaded(0, &Key::from("k2"));
        assert_eq!(ready2, vec![ClientId(1)]);
    }

    #[test]
    fn purge_removes_client_from_every_waiter_list() {
        let mut reg = BlockingRegistry::new();
        reg.wait_for(ClientId(1), 0, Key::from("k"), false, true);
        reg.purge_client(ClientId(1));
        assert_eq!(reg.waiter_count(0, &Key::from("k")), 0);
    }
}

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

//! # Key locks (C8)
//!
//! The advisory GRAB/RELEASE protocol, grounded on `grabLockForKey` /
//! `releaseLockForKey` / `handOffLock` in `locking.c` (§4.8). Whether the
//! key needs a placeholder value created is decided by the caller (it
//! owns the object cache); this module only tracks ownership and the
//! FIFO of waiters.

use crate::{
    engine::client::ClientId,
    keyval::{DbId, Key},
};
use std::collections::{HashMap, VecDeque};

#[derive(Debug, PartialEq, Eq)]
pub enum GrabOutcome {
    Owned,
    AlreadyOwner,
    Blocked,
}

#[derive(Debug, PartialEq, Eq)]
pub enum ReleaseOutcome {
    NotOwner,
    HandedOffTo(ClientId),
    /// no waiters; caller should delete the placeholder and touch WATCH.
    ReleasedNoWaiters,
}

#[derive(Default)]
pub struct KeyLocks {
    owners: HashMap<(DbId, Key), ClientId>,
    block_queue: HashMap<(DbId, Key), VecDeque<(ClientId, Option<i64>)>>,
    held_locks: HashMap<ClientId, Vec<(DbId, Key)>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// §4.8 `GRAB`. `deadline_ms` is the wait timeout if the client ends
    /// up queued; re-entrant grab by the current owner is a no-op OK.
    pub fn grab(
        &mut self,
        client: ClientId,
        db: DbId,
        key: Key,
        deadline_ms: Option<i64>,
    ) -> GrabOutcome {
        let dk = (db, key.clone());
        match self.owners.get(&dk) {
            None => {
                self.owners.insert(dk, client);
                self.held_locks.entry(client).or_default().push((db, key));
                GrabOutcome::Owned
            }
            Some(&owner) if owner == client => GrabOutcome::AlreadyOwner,
            Some(_) => {
                self.block_queue
                    .entry(dk)
                    .or_default()
                    .push_back((client, deadline_ms));
                GrabOutcome::Blocked
            }
        }
    }

    /// §4.8 `RELEASE`.
    pub fn release(&mut self, client: ClientId, db: DbId, key: &Key) -> ReleaseOutcome {
        let dk = (db, key.clone());
        match self.owners.get(&dk) {
            Some(&owner) if owner == client => {
                self.owners.remove(&dk);
                if let Some(held) = self.held_locks.get_mut(&client) {
                    held.retain(|(d, k)| !(*d == db && k == key));
                }
                self.handoff(db, key)
            }
            _ => ReleaseOutcome::NotOwner,
        }
    }

    fn handoff(&mut self, db: DbId, key: &Key) -> ReleaseOutcome {
        let dk = (db, key.clone());
        if let Some(q) = self.block_queue.get_mut(&dk) {
            if let Some((next, _deadline)) = q.pop_front() {
                if q.is_empty() {
                    self.block_queue.remove(&dk);
                }
                self.owners.insert(dk, next);
                self.held_locks
                    .entry(next)
                    .or_default()
                    .push((db, key.clone()));
                return ReleaseOutcome::HandedOffTo(next);
            }
            self.block_queue.remove(&dk);
        }
        ReleaseOutcome::ReleasedNoWaiters
    }

    /// §4.8 disconnect cleanup: release every lock the client held,
    /// running handoff for each.
    pub fn release_all_for_client(&mut self, client: ClientId) -> Vec<(DbId, Key, ReleaseOutcome)> {
        let held = self.held_locks.remove(&client).unwrap_or_default();
        held.into_iter()
            .map(|(db, key)| {
                self.owners.remove(&(db, key.clone()));
                let outcome = self.handoff(db, &key);
                (db, key, outcome)
            })
            .collect()
    }

    /// §7 lock-timeout: drop a waiter from `block_queue` without touching
    /// the owner.
    pub fn cancel_wait(&mut self, client: ClientId, db: DbId, key: &Key) {
        let dk = (db, key.clone());
        if let Some(q) = self.block_queue.get_mut(&dk) {
            q.retain(|(c, _)| *c != client);
            if q.is_empty() {
                self.block_queue.remove(&dk);
            }
        }
    }

    pub fn owner(&self, db: DbId, key: &Key) -> Option<ClientId> {
        self.owners.get(&(db, key.clone())).copied()
    }

    pub fn queue_len(&self, db: DbId, key: &Key) -> usize {
        self.block_queue
            .get(&(db, key.clone()))
            .map(VecDeque::len)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_grab_owns_immediately() {
        let mut locks = KeyLocks::new();
        let outcome = locks.grab(ClientId(1), 0, Key::from("k"), None);
        assert_eq!(outcome, GrabOutcome::Owned);
    }

    #[test]
    fn reentrant_grab_by_owner_is_ok() {
        let mut locks = KeyLocks::new();
        locks.grab(ClientId(1), 0, Key::from("k"), None);
        let outcome = locks.grab(ClientId(1), 0, Key::from("k"), None);
        assert_eq!(outcome, GrabOutcome::AlreadyOwner);
    }

    #[test]
    fn fifo_handoff_across_abcd() {
        let mut locks = KeyLocks::new();
        let (a, b, c, d) = (ClientId(1), ClientId(2), ClientId(3), ClientId(4));
        let key = Key::from("k");
        assert_eq!(locks.grab(d, 0, key.clone(), None), GrabOutcome::Owned);
        assert_eq!(locks.grab(a, 0, key.clone(), None), GrabOutcome::Blocked);
        assert_eq!(locks.grab(b, 0, key.clone(), None), GrabOutcome::Blocked);
        assert_eq!(locks.grab(c, 0, key.clone(), None), GrabOutcome::Blocked);

        assert_eq!(locks.release(d, 0, &key), ReleaseOutcome::HandedOffTo(a));
        assert_eq!(locks.release(a, 0, &key), ReleaseOutcome::HandedOffTo(b));
        assert_eq!(locks.release(b, 0, &key), ReleaseOutcome::HandedOffTo(c));
        assert_eq!(locks.release(c, 0, &key), ReleaseOutcome::ReleasedNoWaiters);
    }

    #[test]
    fn non_owner_release_is_rejected() {
        let mut locks = KeyLocks::new();
        let key = Key::from("k");
        locks.grab(ClientId(1), 0, key.clone(), None);
        assert_eq!(locks.release(ClientId(2), 0, &key), ReleaseOutcome::NotOwner);
    }

    #[test]
    fn disconnect_hands_off_every_held_lock() {
        let mut locks = KeyLocks::new();
        let key = Key::from("k");
        locks.grab(ClientId(1), 0, key.clone(), None);
        locks.grab(ClientId(2), 0, key.clone(), None);
        let results = locks.release_all_for_client(ClientId(1));
        assert_eq!(results, vec![(0, key, ReleaseOutcome::HandedOffTo(ClientId(2)))]);
    }
}

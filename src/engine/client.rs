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

//! Per-client state the engine tracks: which database it's using, and
//! (denormalized, for cheap lookups) its held locks and block deadline.
//! The command buffer and transaction state (opaque `MULTI` plumbing)
//! live above the core, not here.

use crate::keyval::{DbId, Key};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ClientId(pub u64);

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

impl ClientId {
    pub fn next() -> Self {
        Self(NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Ready,
    /// waiting on one or more keys to load (C7)
    WaitingOnKeys,
    /// waiting in a lock's `block_queue` (C8)
    WaitingOnLock,
}

#[derive(Debug)]
pub struct ClientInfo {
    pub id: ClientId,
    pub db: DbId,
    pub state: ClientState,
    /// unix-ms deadline after which a blocked client is resumed with a
    /// timeout reply; `None` means block forever.
    pub block_deadline_ms: Option<i64>,
    /// the key this client is queued on while `state` is `WaitingOnLock`,
    /// so the cron sweep knows which `block_queue` to drop it from.
    pub blocked_key: Option<Key>,
}

impl ClientInfo {
    pub fn new(id: ClientId, db: DbId) -> Self {
        Self {
            id,
            db,
            state: ClientState::Ready,
            block_deadline_ms: None,
            blocked_key: None,
        }
    }
}

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

//! The shapes shared by the object cache, the I/O pipeline and the disk
//! store: keys, the opaque value payload and the database id. A thin
//! `Bytes` wrapper generalized to a hashable key type.

use bytes::Bytes;
use std::{
    fmt,
    hash::{Hash, Hasher},
    sync::atomic::{AtomicU32, Ordering},
};

/// Small integer database id (§3 *Database*).
pub type DbId = u16;

/// A key: an opaque byte blob, cheap to clone (an `Arc`-backed `Bytes`
/// refcount bump, not a copy).
#[derive(Clone, Eq)]
pub struct Key(Bytes);

impl Key {
    pub fn new(b: impl Into<Bytes>) -> Self {
        Self(b.into())
    }
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
    /// A filesystem-safe rendering of this key, used as the on-disk file
    /// name (§4.1): plain hex, so arbitrary binary keys never escape the
    /// data directory.
    pub fn to_hex(&self) -> String {
        use fmt::Write;
        let mut s = String::with_capacity(self.0.len() * 2);
        for b in self.0.iter() {
            write!(s, "{b:02x}").expect("write! to String never fails");
        }
        s
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state)
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) => write!(f, "Key({s:?})"),
            Err(_) => write!(f, "Key({:?})", self.0),
        }
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Self(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Self(Bytes::from(s.into_bytes()))
    }
}

impl From<Vec<u8>> for Key {
    fn from(v: Vec<u8>) -> Self {
        Self(Bytes::from(v))
    }
}

/// The 24-bit wrapping minute-resolution idle clock (§3 *Value*).
pub const LRU_CLOCK_BITS: u32 = 24;
pub const LRU_CLOCK_MASK: u32 = (1 << LRU_CLOCK_BITS) - 1;

/// Take the current unix-minute clock, wrapped to 24 bits.
pub fn lru_clock_now() -> u32 {
    ((crate::util::now_secs() / 60) as u32) & LRU_CLOCK_MASK
}

/// An opaque payload plus the bookkeeping the object cache needs. Created
/// on LOAD completion or on a client write; freed once the last handle —
/// a resident-set entry, or an in-flight SAVE job's snapshot — is dropped
/// (*Value* lifecycle; Rust's `Arc` gives us this for free instead
/// of the original's manual `incrRefCount`/`decrRefCount`).
#[derive(Debug)]
pub struct StoredValue {
    payload: Bytes,
    expires_at: Option<i64>,
    lru_clock: AtomicU32,
}

impl StoredValue {
    pub fn new(payload: impl Into<Bytes>, expires_at: Option<i64>) -> Self {
        Self {
            payload: payload.into(),
            expires_at,
            lru_clock: AtomicU32::new(lru_clock_now()),
        }
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn expires_at(&self) -> Option<i64> {
        self.expires_at
    }

    pub fn is_expired(&self, now_ms: i64) -> bool {
        matches!(self.expires_at, Some(deadline) if deadline <= now_ms)
    }

    /// Touch the idle clock on access, the way a GET bumps `lru_clock` in
    /// `t_string.c`-adjacent commands.
    pub fn touch(&self) {
        self.lru_clock.store(lru_clock_now(), Ordering::Relaxed);
    }

    /// Approximate idle time in minutes, honoring the 24-bit wraparound
    /// (§4.3 eviction metric).
    pub fn idle_minutes(&self) -> u32 {
        let now = lru_clock_now();
        let then = self.lru_clock.load(Ordering::Relaxed);
        now.wrapping_sub(then) & LRU_CLOCK_MASK
    }
}

impl Clone for StoredValue {
    fn clone(&self) -> Self {
        Self {
            payload: self.payload.clone(),
            expires_at: self.expires_at,
            lru_clock: AtomicU32::new(self.lru_clock.load(Ordering::Relaxed)),
        }
    }
}

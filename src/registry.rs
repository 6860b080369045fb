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

//! # System-wide registry
//!
//! Global, process-wide flags that don't belong to any one `Database`.
//! `ds_poisoned` is flipped when a worker reports a [`crate::util::error::Error::Fatal`]
//! disk failure (§7 *Transient I/O*): once poisoned, the scheduler stops
//! pushing new SAVE jobs so we never silently drop a write, while reads
//! already resident in the object cache keep being served.

use core::sync::atomic::{AtomicBool, Ordering};

const ORD_ACQ: Ordering = Ordering::Acquire;
const ORD_REL: Ordering = Ordering::Release;

static DS_POISONED: AtomicBool = AtomicBool::new(false);

/// True once a worker has reported a fatal, unrecoverable disk failure.
pub fn ds_poisoned() -> bool {
    DS_POISONED.load(ORD_ACQ)
}

pub fn poison_ds() {
    DS_POISONED.store(true, ORD_REL);
}

#[cfg(test)]
pub fn unpoison_ds() {
    DS_POISONED.store(false, ORD_REL);
}

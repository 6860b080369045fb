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

//! # IO Scheduler (C4)
//!
//! Owns the global `schedule` FIFO and the per-`(db,key)` pending-op
//! flags, grounded on `cacheScheduleIO` / `cacheScheduleIOPushJobs` in
//! `dscache.c` (§4.4). Pure bookkeeping: this module never touches the
//! disk or the I/O thread pool directly, it only decides *which* jobs are
//! ready to hand off.

use crate::keyval::{DbId, Key};
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};

/// Cap on how many jobs may sit in `new_jobs` at once (§4.4).
pub const JOB_QUEUE_CAP: usize = 10;

pub mod ioflags {
    pub const LOAD: u8 = 1;
    pub const SAVE: u8 = 2;
    pub const LOAD_IN_PROGRESS: u8 = 4;
    pub const SAVE_IN_PROGRESS: u8 = 8;
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum IoKind {
    Load,
    Save,
}

struct ScheduledOp {
    db: DbId,
    key: Key,
    kind: IoKind,
    creation_ts: i64,
}

/// `None` snapshot on a `Save` job encodes a delete (*IO Job*).
#[derive(Debug, Clone)]
pub enum IoJobKind {
    Load,
    Save { snapshot: Option<(Bytes, Option<i64>)> },
}

#[derive(Debug, Clone)]
pub struct IoJob {
    pub db: DbId,
    pub key: Key,
    pub kind: IoJobKind,
}

#[derive(Default)]
pub struct Scheduler {
    io_flags: HashMap<(DbId, Key), u8>,
    schedule: VecDeque<ScheduledOp>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flags(&self, db: DbId, key: &Key) -> u8 {
        self.io_flags.get(&(db, key.clone())).copied().unwrap_or(0)
    }

    pub fn schedule_len(&self) -> usize {
        self.schedule.len()
    }

    fn set_flag(&mut self, db: DbId, key: &Key, bit: u8) {
        *self.io_flags.entry((db, key.clone())).or_insert(0) |= bit;
    }

    fn clear_flag(&mut self, db: DbId, key: &Key, bit: u8) {
        if let Some(f) = self.io_flags.get_mut(&(db, key.clone())) {
            *f &= !bit;
            if *f == 0 {
                self.io_flags.remove(&(db, key.clone()));
            }
        }
    }

    /// Register intent to do I/O on a key. Returns `true` when the caller
    /// should immediately attempt a load-priority push (a fresh LOAD with
    /// no competing SAVE).
    pub fn schedule_io(&mut self, db: DbId, key: Key, kind: IoKind, now_ms: i64) -> bool {
        let existing = self.flags(db, &key);
        let bit = match kind {
            IoKind::Load => ioflags::LOAD,
            IoKind::Save => ioflags::SAVE,
        };
        if existing & bit != 0 {
            return false;
        }
        self.set_flag(db, &key, bit);
        let head_priority = kind == IoKind::Load && existing & ioflags::SAVE == 0;
        let op = ScheduledOp {
            db,
            key,
            kind,
            creation_ts: now_ms,
        };
        if head_priority {
            self.schedule.push_front(op);
        } else {
            self.schedule.push_back(op);
        }
        head_priority
    }

    /// Move as many ready scheduled ops as room allows into concrete I/O
    /// jobs (§4.4), never more than `limit`. `lookup` snapshots the
    /// current value for a SAVE (`None` meaning the key is gone, i.e. a
    /// delete).
    #[allow(clippy::too_many_arguments)]
    pub fn push_jobs(
        &mut self,
        only_loads: bool,
        asap: bool,
        new_jobs_len: usize,
        now_ms: i64,
        flush_delay_ms: i64,
        snapshotting: bool,
        limit: usize,
        lookup: impl Fn(DbId, &Key) -> Option<(Bytes, Option<i64>)>,
    ) -> Vec<IoJob> {
        if snapshotting {
            return Vec::new();
        }
        let mut room = JOB_QUEUE_CAP
            .saturating_sub(new_jobs_len)
            .min(self.schedule.len())
            .min(limit);
        let mut jobs = Vec::with_capacity(room);
        let total = self.schedule.len();
        let mut examined = 0usize;

        while room > 0 && examined < total {
            let Some(op) = self.schedule.pop_front() else {
                break;
            };
            examined += 1;

            if only_loads && op.kind == IoKind::Save {
                self.schedule.push_front(op);
                break;
            }
            if op.kind == IoKind::Save
                && !asap
                && now_ms - op.creation_ts < flush_delay_ms
            {
                self.schedule.push_front(op);
                break;
            }
            if op.kind == IoKind::Save
                && self.flags(op.db, &op.key) & ioflags::SAVE_IN_PROGRESS != 0
            {
                let other_work_remains = !self.schedule.is_empty();
                self.schedule.push_back(op);
                if other_work_remains {
                    continue;
                } else {
                    break;
                }
            }

            let (clear_bit, progress_bit, job_kind) = match op.kind {
                IoKind::Load => (ioflags::LOAD, ioflags::LOAD_IN_PROGRESS, IoJobKind::Load),
                IoKind::Save => (
                    ioflags::SAVE,
                    ioflags::SAVE_IN_PROGRESS,
                    IoJobKind::Save {
                        snapshot: lookup(op.db, &op.key),
                    },
                ),
            };
            self.clear_flag(op.db, &op.key, clear_bit);
            self.set_flag(op.db, &op.key, progress_bit);
            jobs.push(IoJob {
                db: op.db,
                key: op.key,
                kind: job_kind,
            });
            room -= 1;
        }
        jobs
    }

    /// Clear an `_IN_PROGRESS` bit once C6 has applied the completion.
    pub fn clear_in_progress(&mut self, db: DbId, key: &Key, kind: IoKind) {
        let bit = match kind {
            IoKind::Load => ioflags::LOAD_IN_PROGRESS,
            IoKind::Save => ioflags::SAVE_IN_PROGRESS,
        };
        self.clear_flag(db, key, bit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_gets_head_priority_over_pending_save() {
        let mut s = Scheduler::new();
        s.schedule_io(0, Key::from("k"), IoKind::Save, 0);
        let pushed_now = s.schedule_io(0, Key::from("k"), IoKind::Load, 0);
        assert!(pushed_now);
        // LOAD should be at the head despite arriving second.
        let jobs = s.push_jobs(true, true, 0, 0, 0, false, usize::MAX, |_, _| None);
        assert_eq!(jobs.len(), 1);
        assert!(matches!(jobs[0].kind, IoJobKind::Load));
    }

    #[test]
    fn duplicate_schedule_is_a_no_op() {
        let mut s = Scheduler::new();
        s.schedule_io(0, Key::from("k"), IoKind::Load, 0);
        s.schedule_io(0, Key::from("k"), IoKind::Load, 0);
        assert_eq!(s.schedule_len(), 1);
    }

    #[test]
    fn save_is_deferred_until_flush_delay_elapses() {
        let mut s = Scheduler::new();
        s.schedule_io(0, Key::from("k"), IoKind::Save, 1_000);
        let jobs = s.push_jobs(false, false, 0, 1_200, 1_000, false, usize::MAX, |_, _| {
            Some((Bytes::from_static(b"v"), None))
        });
        assert!(jobs.is_empty());
        let jobs = s.push_jobs(false, false, 0, 2_200, 1_000, false, usize::MAX, |_, _| {
            Some((Bytes::from_static(b"v"), None))
        });
        assert_eq!(jobs.len(), 1);
    }

    #[test]
    fn snapshotting_blocks_all_pushes() {
        let mut s = Scheduler::new();
        s.schedule_io(0, Key::from("k"), IoKind::Load, 0);
        let jobs = s.push_jobs(false, true, 0, 0, 0, true, usize::MAX, |_, _| None);
        assert!(jobs.is_empty());
        assert_eq!(s.schedule_len(), 1);
    }

    #[test]
    fn queue_cap_bounds_a_single_push() {
        let mut s = Scheduler::new();
        for i in 0..(JOB_QUEUE_CAP + 5) {
            s.schedule_io(0, Key::from(format!("k{i}")), IoKind::Load, 0);
        }
        let jobs = s.push_jobs(true, true, 0, 0, 0, false, usize::MAX, |_, _| None);
        assert_eq!(jobs.len(), JOB_QUEUE_CAP);
    }

    #[test]
    fn limit_bounds_a_single_push_below_the_queue_cap() {
        let mut s = Scheduler::new();
        for i in 0..3 {
            s.schedule_io(0, Key::from(format!("k{i}")), IoKind::Load, 0);
        }
        let jobs = s.push_jobs(true, true, 0, 0, 0, false, 1, |_, _| None);
        assert_eq!(jobs.len(), 1);
        assert_eq!(s.schedule_len(), 2);
    }
}

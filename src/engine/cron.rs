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

//! # Cache cron (C9)
//!
//! The only routine allowed to initiate eviction, grounded on `cacheCron`
//! in `dscache.c` (§4.9). The engine's event loop (C10) calls
//! [`cron_tick`] on a timer; it is never invoked from a command handler.

use crate::engine::{db::Database, iopool::IoPool, objcache, scheduler::Scheduler};

/// Run `try_evict_one` once across every database passed in, honoring the
/// sampling/maxtries budget in §4.3. Returns `true` if something was
/// accomplished: either a key was evicted, or — when every sampled key
/// came back flagged in-flight — a pending I/O job was pushed ASAP and
/// handed to the pool so the pipeline keeps draining. Mirrors
/// `cacheFreeOneEntry`'s fallback in `dscache.c`: when no candidate is
/// evictable but jobs remain scheduled, it calls
/// `cacheScheduleIOPushJobs(REDIS_IO_ASAP)` and `processActiveIOJobs(1)`
/// rather than give up.
pub fn try_evict_one(dbs: &mut [Database], scheduler: &mut Scheduler, io_pool: &IoPool) -> bool {
    let caches: Vec<(u16, &objcache::ObjectCache)> =
        dbs.iter().map(|d| (d.id, &d.live)).collect();
    let (victim, _tries) = objcache::sample_victim(&caches, |db, key| {
        let flags = scheduler.flags(db, key);
        flags != 0
    });

    if let Some((db_id, key, _idle)) = victim {
        if let Some(db) = dbs.iter_mut().find(|d| d.id == db_id) {
            db.live.delete(&key);
        }
        return true;
    }

    if scheduler.schedule_len() == 0 {
        return false;
    }
    let new_jobs_len = io_pool.new_jobs_len();
    let now = crate::util::now_ms();
    let dbs_ro = &*dbs;
    let jobs = scheduler.push_jobs(false, true, new_jobs_len, now, 0, false, 1, |db, key| {
        dbs_ro[db as usize]
            .live
            .lookup(key)
            .map(|v| (v.payload().clone(), v.expires_at()))
    });
    let pushed = !jobs.is_empty();
    io_pool.submit(jobs);
    pushed
}

/// §4.9 step 2 body: keep evicting from C3/C2 until both report no
/// progress or memory drops below budget. Returns the number of
/// progress-making iterations (for observability/tests).
pub fn drain_over_budget(
    dbs: &mut [Database],
    scheduler: &mut Scheduler,
    io_pool: &IoPool,
    over_budget: impl Fn(&[Database]) -> bool,
) -> usize {
    let mut rounds = 0;
    while over_budget(dbs) {
        let object_progress = try_evict_one(dbs, scheduler, io_pool);
        let neg_progress = dbs.iter_mut().any(|d| d.neg_cache.force_evict_one());
        if !object_progress && !neg_progress {
            break;
        }
        rounds += 1;
    }
    rounds
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        diskstore::DiskStore,
        engine::scheduler::{IoKind, Scheduler},
        keyval::{Key, StoredValue},
    };
    use bytes::Bytes;
    use std::sync::Arc;

    fn pool() -> (tempfile::TempDir, IoPool) {
        let dir = tempfile::tempdir().unwrap();
        let disk = DiskStore::open(dir.path()).unwrap();
        (dir, IoPool::new(disk, 1))
    }

    #[test]
    fn evicts_most_idle_when_all_flags_clear() {
        let mut db = Database::new(0, 100, 1000);
        db.live.overwrite(
            Key::from("k"),
            Arc::new(StoredValue::new(Bytes::from_static(b"v"), None)),
        );
        let mut sched = Scheduler::new();
        let (_dir, io_pool) = pool();
        let mut dbs = [db];
        assert!(try_evict_one(&mut dbs, &mut sched, &io_pool));
        assert!(dbs[0].live.is_empty());
        io_pool.shutdown();
    }

    #[test]
    fn drain_over_budget_stops_when_empty() {
        let db = Database::new(0, 100, 1000);
        let mut sched = Scheduler::new();
        let (_dir, io_pool) = pool();
        let mut dbs = [db];
        let rounds = drain_over_budget(&mut dbs, &mut sched, &io_pool, |_| true);
        assert_eq!(rounds, 0);
        io_pool.shutdown();
    }

    #[test]
    fn all_keys_in_flight_pushes_a_job_instead_of_evicting() {
        let mut db = Database::new(0, 100, 1000);
        let key = Key::from("k");
        db.live.overwrite(
            key.clone(),
            Arc::new(StoredValue::new(Bytes::from_static(b"v"), None)),
        );
        let mut sched = Scheduler::new();
        // flag the only resident key as in-flight so sample_victim never
        // picks it, the way a SAVE-in-progress key can't be evicted.
        sched.schedule_io(0, key.clone(), IoKind::Save, 0);
        let (_dir, io_pool) = pool();
        let mut dbs = [db];

        assert!(try_evict_one(&mut dbs, &mut sched, &io_pool));
        assert!(dbs[0].live.contains(&key));
        io_pool.shutdown();
    }

    #[test]
    fn no_victim_and_empty_schedule_makes_no_progress() {
        let mut db = Database::new(0, 100, 1000);
        let key = Key::from("k");
        db.live.overwrite(
            key.clone(),
            Arc::new(StoredValue::new(Bytes::from_static(b"v"), None)),
        );
        let mut sched = Scheduler::new();
        sched.schedule_io(0, key.clone(), IoKind::Save, 0);
        // schedule_io both flags the key and enqueues it; push it out of
        // the schedule so the flag lingers with nothing left to drain.
        let (_dir, io_pool) = pool();
        let _ = sched.push_jobs(false, true, 0, 0, 0, false, usize::MAX, |_, _| None);
        let mut dbs = [db];
        assert!(!try_evict_one(&mut dbs, &mut sched, &io_pool));
        assert!(dbs[0].live.contains(&key));
        io_pool.shutdown();
    }
}

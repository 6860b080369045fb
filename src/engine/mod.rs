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

//! # The engine
//!
//! Ties C1 through C9 into the single handle the reactor (C10, in
//! `main.rs`) drives. Everything in this module except [`IoPool`] runs on
//! one thread; the engine is `Send` but deliberately not `Sync` in spirit
//! — callers are expected to own it on a dedicated thread and talk to it
//! over channels, not share it behind a lock (§9's "avoid
//! ambient globals" note, applied to the core as a whole).

pub mod blocking;
pub mod client;
pub mod commands;
pub mod cron;
pub mod db;
pub mod dispatch;
pub mod iopool;
pub mod locks;
pub mod negcache;
pub mod objcache;
pub mod scheduler;

use crate::{
    config::Config,
    diskstore::DiskStore,
    engine::{
        blocking::WaitFor,
        client::{ClientId, ClientInfo, ClientState},
        db::Database,
        iopool::IoPool,
        locks::{GrabOutcome, ReleaseOutcome},
        negcache::DEFAULT_CAPACITY as NEG_CACHE_CAPACITY,
        scheduler::{IoKind, Scheduler},
    },
    keyval::{DbId, Key, StoredValue},
    registry,
    util::error::DscResult,
};
use crossbeam_channel::Receiver;
use std::sync::Arc;

/// Negative-cache TTL: how long a "confirmed absent" memo is trusted
/// before a repeat lookup is allowed to hit disk again (§4.2).
const NEG_CACHE_TTL_MS: i64 = 2_000;

pub enum LookupOutcome {
    Value(Arc<StoredValue>),
    /// only returned when called outside the preload path (§6)
    NeedsLoad,
    Absent,
}

pub enum GrabReply {
    Ok,
    Blocked,
}

pub enum ReleaseReply {
    Ok,
    NotOwner,
}

pub struct Engine {
    dbs: Vec<Database>,
    scheduler: Scheduler,
    io_pool: IoPool,
    clients: std::collections::HashMap<ClientId, ClientInfo>,
    ready_clients: Vec<ClientId>,
    timed_out_clients: Vec<ClientId>,
    cfg: Config,
    snapshotting: bool,
}

impl Engine {
    pub fn new(cfg: Config) -> DscResult<Self> {
        let disk = DiskStore::open(&cfg.data_dir)?;
        let io_pool = IoPool::new(disk, cfg.io_threads_max);
        let dbs = (0..cfg.db_count as DbId)
            .map(|id| Database::new(id, NEG_CACHE_CAPACITY, NEG_CACHE_TTL_MS))
            .collect();
        Ok(Self {
            dbs,
            scheduler: Scheduler::new(),
            io_pool,
            clients: std::collections::HashMap::new(),
            ready_clients: Vec::new(),
            timed_out_clients: Vec::new(),
            cfg,
            snapshotting: false,
        })
    }

    /// The I/O pool's completion-notification channel; the reactor (C10)
    /// selects on this alongside client sockets and the cron timer.
    pub fn io_notifications(&self) -> Receiver<()> {
        self.io_pool.notifications()
    }

    pub fn register_client(&mut self, db: DbId) -> ClientId {
        let id = ClientId::next();
        self.clients.insert(id, ClientInfo::new(id, db));
        id
    }

    /// §7 disconnect cleanup: purge blocking state and hand off any held
    /// locks.
    pub fn disconnect_client(&mut self, client: ClientId) {
        if let Some(info) = self.clients.remove(&client) {
            let db = info.db;
            if (db as usize) < self.dbs.len() {
                self.dbs[db as usize].waiters.purge_client(client);
                let handoffs = self.dbs[db as usize].locks.release_all_for_client(client);
                for (_, _, outcome) in handoffs {
                    self.apply_handoff_outcome(outcome);
                }
            }
        }
    }

    fn apply_handoff_outcome(&mut self, outcome: ReleaseOutcome) {
        if let ReleaseOutcome::HandedOffTo(next) = outcome {
            if let Some(info) = self.clients.get_mut(&next) {
                info.state = ClientState::Ready;
                info.block_deadline_ms = None;
                info.blocked_key = None;
            }
            self.ready_clients.push(next);
        }
    }

    fn db_mut(&mut self, db: DbId) -> &mut Database {
        &mut self.dbs[db as usize]
    }

    fn db(&self, db: DbId) -> &Database {
        &self.dbs[db as usize]
    }

    // ---- §6 core command surface -----------------------------------

    pub fn lookup(&mut self, db: DbId, key: &Key) -> LookupOutcome {
        let now = crate::util::now_ms();
        if let Some(v) = self.db(db).live.lookup(key) {
            v.touch();
            return LookupOutcome::Value(Arc::clone(v));
        }
        if !self.db_mut(db).neg_cache.may_exist(key, now) {
            return LookupOutcome::Absent;
        }
        LookupOutcome::NeedsLoad
    }

    pub fn set(&mut self, db: DbId, key: Key, value: impl Into<bytes::Bytes>, expiry: Option<i64>) {
        let now = crate::util::now_ms();
        let stored = Arc::new(StoredValue::new(value, expiry));
        let d = self.db_mut(db);
        d.live.overwrite(key.clone(), stored);
        d.neg_cache.clear(&key);
        self.scheduler.schedule_io(db, key, IoKind::Save, now);
    }

    pub fn delete(&mut self, db: DbId, key: Key) {
        let now = crate::util::now_ms();
        let d = self.db_mut(db);
        d.live.delete(&key);
        // eager negative caching on DEL (§9 open question): a DEL racing an
        // unfinished SAVE must not let a GET serve stale disk state in between.
        d.neg_cache.set_does_not_exist(key.clone(), now);
        self.scheduler.schedule_io(db, key, IoKind::Save, now);
    }

    /// §4.7 `wait_for`. Kicks off a LOAD immediately when this is the
    /// first client waiting on the key.
    pub fn wait_for(&mut self, client: ClientId, db: DbId, key: Key) -> WaitFor {
        let now = crate::util::now_ms();
        let already_resident = self.db(db).live.contains(&key);
        let may_exist = self.db_mut(db).neg_cache.may_exist(&key, now);
        let outcome = self.db_mut(db).waiters.wait_for(
            client,
            db,
            key.clone(),
            already_resident,
            may_exist,
        );
        if let WaitFor::Blocked { schedule_load: true } = outcome {
            let push_now = self.scheduler.schedule_io(db, key, IoKind::Load, now);
            if push_now {
                self.push_load_jobs_now();
            }
        }
        if let Some(info) = self.clients.get_mut(&client) {
            if matches!(outcome, WaitFor::Blocked { .. }) {
                info.state = ClientState::WaitingOnKeys;
            }
        }
        outcome
    }

    /// §4.7 `block_multi`: preload every key a command touches.
    pub fn block_multi(
        &mut self,
        client: ClientId,
        desc: &commands::CommandDescriptor,
        argv: &[bytes::Bytes],
    ) -> bool {
        let db = self.clients[&client].db;
        let mut blocked = false;
        for idx in commands::key_indices(desc, argv) {
            let key = Key::from(argv[idx].to_vec());
            if matches!(self.wait_for(client, db, key), WaitFor::Blocked { .. }) {
                blocked = true;
            }
        }
        blocked
    }

    pub fn grab(&mut self, client: ClientId, db: DbId, key: Key, timeout_ms: Option<i64>) -> GrabReply {
        let deadline = timeout_ms.map(|t| crate::util::now_ms() + t);
        // locks require the key to exist as a string; create a placeholder.
        if !self.db(db).live.contains(&key) {
            self.db_mut(db)
                .live
                .overwrite(key.clone(), Arc::new(StoredValue::new(bytes::Bytes::new(), None)));
        }
        match self.db_mut(db).locks.grab(client, db, key.clone(), deadline) {
            GrabOutcome::Owned | GrabOutcome::AlreadyOwner => GrabReply::Ok,
            GrabOutcome::Blocked => {
                if let Some(info) = self.clients.get_mut(&client) {
                    info.state = ClientState::WaitingOnLock;
                    info.block_deadline_ms = deadline;
                    info.blocked_key = Some(key);
                }
                GrabReply::Blocked
            }
        }
    }

    pub fn release(&mut self, client: ClientId, db: DbId, key: Key) -> ReleaseReply {
        match self.db_mut(db).locks.release(client, db, &key) {
            ReleaseOutcome::NotOwner => ReleaseReply::NotOwner,
            // no placeholder cleanup on `ReleasedNoWaiters`: whether the
            // value `grab` placed is still the empty placeholder or has
            // since been overwritten by a real SET is a command-layer
            // concern (WATCH/dirty bookkeeping is out of core scope).
            outcome => {
                self.apply_handoff_outcome(outcome);
                ReleaseReply::Ok
            }
        }
    }

    // ---- C6/C9 plumbing, driven by the reactor ----------------------

    /// Drain one notification's worth of completions and apply them.
    /// Returns the clients newly unblocked (to be re-dispatched by the
    /// caller, §4.7).
    pub fn drain_completions(&mut self) -> Vec<ClientId> {
        let total = self.io_pool.processed_len();
        let toprocess = dispatch::toprocess_count(total);
        if toprocess == 0 {
            return Vec::new();
        }
        let now = crate::util::now_ms();
        let mut resumed = Vec::new();
        for job in self.io_pool.drain_processed(toprocess) {
            let db_id = job.db;
            let kind = match &job.outcome {
                iopool::IoOutcome::Load(_) => IoKind::Load,
                iopool::IoOutcome::Save(_) => IoKind::Save,
            };
            let res = dispatch::apply_completion(
                &mut self.dbs[db_id as usize],
                &mut self.scheduler,
                job,
                now,
            );
            if matches!(kind, IoKind::Load) {
                let ready = self.dbs[db_id as usize].waiters.on_key_loaded(db_id, &res.key);
                for c in ready {
                    if let Some(info) = self.clients.get_mut(&c) {
                        info.state = ClientState::Ready;
                    }
                    resumed.push(c);
                }
            }
        }
        self.ready_clients.extend(resumed.iter().copied());
        resumed
    }

    /// Take and clear the global `ready_clients` list (§3).
    pub fn take_ready_clients(&mut self) -> Vec<ClientId> {
        std::mem::take(&mut self.ready_clients)
    }

    fn push_load_jobs_now(&mut self) {
        let new_jobs_len = self.io_pool.new_jobs_len();
        let now = crate::util::now_ms();
        let snapshotting = self.snapshotting;
        let dbs = &self.dbs;
        let jobs = self.scheduler.push_jobs(
            true,
            true,
            new_jobs_len,
            now,
            0,
            snapshotting,
            usize::MAX,
            |db, key| Self::snapshot_value(dbs, db, key),
        );
        self.io_pool.submit(jobs);
    }

    fn snapshot_value(dbs: &[Database], db: DbId, key: &Key) -> Option<(bytes::Bytes, Option<i64>)> {
        dbs[db as usize]
            .live
            .lookup(key)
            .map(|v| (v.payload().clone(), v.expires_at()))
    }

    /// §4.9 `cacheCron`, called from the reactor's timer source.
    pub fn cron_tick(&mut self) {
        if registry::ds_poisoned() {
            return;
        }
        let new_jobs_len = self.io_pool.new_jobs_len();
        let flush_delay_ms = (self.cfg.cache_flush_delay as i64) * 1000;
        let now = crate::util::now_ms();
        let snapshotting = self.snapshotting;
        let dbs = &self.dbs;
        let jobs = self.scheduler.push_jobs(
            false,
            false,
            new_jobs_len,
            now,
            flush_delay_ms,
            snapshotting,
            usize::MAX,
            |db, key| Self::snapshot_value(dbs, db, key),
        );
        self.io_pool.submit(jobs);

        let budget = self.cfg.cache_max_memory;
        cron::drain_over_budget(&mut self.dbs, &mut self.scheduler, &self.io_pool, |dbs| {
            estimated_memory(dbs) > budget
        });

        self.sweep_lock_timeouts(now);
    }

    /// §5/§7 lock-timeout sweep: resume every `WaitingOnLock` client past
    /// its deadline with a timeout, dropping it from the lock's
    /// `block_queue` without disturbing the current owner.
    fn sweep_lock_timeouts(&mut self, now_ms: i64) {
        let expired: Vec<(ClientId, DbId, Option<Key>)> = self
            .clients
            .values()
            .filter(|info| info.state == ClientState::WaitingOnLock)
            .filter(|info| matches!(info.block_deadline_ms, Some(deadline) if now_ms >= deadline))
            .map(|info| (info.id, info.db, info.blocked_key.clone()))
            .collect();

        for (client, db, key) in expired {
            if let Some(key) = &key {
                self.dbs[db as usize].locks.cancel_wait(client, db, key);
            }
            if let Some(info) = self.clients.get_mut(&client) {
                info.state = ClientState::Ready;
                info.block_deadline_ms = None;
                info.blocked_key = None;
            }
            self.timed_out_clients.push(client);
        }
    }

    /// Take and clear the clients resumed with a timeout reply since the
    /// last call (lock-wait or, in future, key-wait deadlines).
    pub fn take_timed_out_clients(&mut self) -> Vec<ClientId> {
        std::mem::take(&mut self.timed_out_clients)
    }

    /// §5 snapshot interaction: while a background snapshot runs,
    /// `push_jobs` is a no-op for new work; drain in-flight jobs so the
    /// engine reaches a quiescent, point-in-time state.
    pub fn begin_snapshot(&mut self) {
        self.snapshotting = true;
    }

    pub fn end_snapshot(&mut self) {
        self.snapshotting = false;
    }

    pub fn is_snapshotting(&self) -> bool {
        self.snapshotting
    }

    pub fn schedule_is_empty(&self) -> bool {
        self.scheduler.schedule_len() == 0
    }

    pub fn io_pool_idle(&self) -> bool {
        self.io_pool.pending_and_inflight() == 0
    }

    pub fn shutdown(&mut self) {
        self.io_pool.shutdown();
    }

    /// Number of keys resident in a database's object cache.
    pub fn resident_count(&self, db: DbId) -> usize {
        self.db(db).live.len()
    }

    /// How many I/O workers are currently spawned for this engine.
    pub fn io_active_threads(&self) -> usize {
        self.io_pool.active_threads()
    }

    /// `cacheForcePointInTime`: flush every pending op ASAP and block the
    /// calling thread until the schedule and the pool both drain, so the
    /// engine reaches a quiescent, point-in-time state a snapshot can read
    /// from. Callers wrap this in [`Engine::begin_snapshot`]/[`Engine::end_snapshot`].
    pub fn force_point_in_time(&mut self) {
        loop {
            let new_jobs_len = self.io_pool.new_jobs_len();
            let now = crate::util::now_ms();
            let dbs = &self.dbs;
            let jobs = self.scheduler.push_jobs(
                false,
                true,
                new_jobs_len,
                now,
                0,
                false,
                usize::MAX,
                |db, key| Self::snapshot_value(dbs, db, key),
            );
            self.io_pool.submit(jobs);
            if self.scheduler.schedule_len() == 0 && self.io_pool.pending_and_inflight() == 0 {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
    }
}

/// A rough stand-in for RSS: total bytes held by resident values. Good
/// enough to drive the cron's budget comparison (§4.9); the original
/// keyed off `zmalloc` accounting, which has no equivalent here.
fn estimated_memory(dbs: &[Database]) -> u64 {
    dbs.iter().map(|d| d.live.total_bytes()).sum()
}

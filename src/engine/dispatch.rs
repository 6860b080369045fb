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

//! # Completion dispatcher (C6)
//!
//! Applies a drained `processed` job to `live`/`neg_cache` and clears its
//! `_IN_PROGRESS` flag. Grounded on `vmThreadedIOCompletedJob` in
//! `dscache.c` (§4.6). Runs exclusively on the engine's main thread — it
//! never holds the I/O pool's internal mutex while touching `Database`.

use crate::{
    engine::{
        db::Database,
        iopool::{CompletedJob, IoOutcome},
        scheduler::{ioflags, IoKind, Scheduler},
    },
    keyval::{DbId, Key, StoredValue},
    registry,
};
use std::sync::Arc;

/// `toprocess = ceil(|processed| * 10%)`, floor 1 (§4.6 step 1).
pub fn toprocess_count(processed_len: usize) -> usize {
    if processed_len == 0 {
        return 0;
    }
    (((processed_len as f64) * 0.10).ceil() as usize).max(1)
}

#[derive(Debug)]
pub struct ApplyResult {
    pub db: DbId,
    pub key: Key,
    pub kind: IoKind,
    /// for a LOAD: did a value get installed into `live`?
    pub value_installed: bool,
}

/// Apply one completed job. Caller is responsible for feeding
/// `ApplyResult` into the blocking registry (`on_key_loaded`) and the
/// client re-dispatch walk (§4.6 step 4 / §4.7).
pub fn apply_completion(
    db: &mut Database,
    scheduler: &mut Scheduler,
    job: CompletedJob,
    now_ms: i64,
) -> ApplyResult {
    let CompletedJob {
        db: job_db,
        key,
        outcome,
    } = job;

    match outcome {
        IoOutcome::Load(Ok(Some((value, expiry)))) => {
            let installed = if !db.live.contains(&key) {
                db.live.add(key.clone(), Arc::new(StoredValue::new(value, expiry)));
                true
            } else {
                false
            };
            scheduler.clear_in_progress(job_db, &key, IoKind::Load);
            ApplyResult {
                db: job_db,
                key,
                kind: IoKind::Load,
                value_installed: installed,
            }
        }
        IoOutcome::Load(Ok(None)) => {
            let flags = scheduler.flags(job_db, &key);
            let save_pending = flags & (ioflags::SAVE | ioflags::SAVE_IN_PROGRESS) != 0;
            if !db.live.contains(&key) && !save_pending {
                db.neg_cache.set_does_not_exist(key.clone(), now_ms);
            }
            scheduler.clear_in_progress(job_db, &key, IoKind::Load);
            ApplyResult {
                db: job_db,
                key,
                kind: IoKind::Load,
                value_installed: false,
            }
        }
        IoOutcome::Load(Err(msg)) => {
            log::error!("disk LOAD failed for db={job_db} key={key:?}: {msg}");
            registry::poison_ds();
            scheduler.clear_in_progress(job_db, &key, IoKind::Load);
            ApplyResult {
                db: job_db,
                key,
                kind: IoKind::Load,
                value_installed: false,
            }
        }
        IoOutcome::Save(Ok(())) => {
            scheduler.clear_in_progress(job_db, &key, IoKind::Save);
            ApplyResult {
                db: job_db,
                key,
                kind: IoKind::Save,
                value_installed: false,
            }
        }
        IoOutcome::Save(Err(msg)) => {
            log::error!("disk SAVE failed for db={job_db} key={key:?}: {msg}");
            registry::poison_ds();
            scheduler.clear_in_progress(job_db, &key, IoKind::Save);
            ApplyResult {
                db: job_db,
                key,
                kind: IoKind::Save,
                value_installed: false,
            }
        }
    }
}

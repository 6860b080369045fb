//! End-to-end scenarios driving [`dscached::Engine`] through its public
//! surface, one process per test, a real temp disk store underneath.

use dscached::{
    config::Config,
    engine::{GrabReply, LookupOutcome, ReleaseReply},
    keyval::Key,
    Engine,
};
use std::time::{Duration, Instant};

fn engine_with(dir: &std::path::Path, db_count: usize, io_threads: usize) -> Engine {
    let mut cfg = Config::default();
    cfg.data_dir = dir.to_string_lossy().into_owned();
    cfg.db_count = db_count;
    cfg.io_threads_max = io_threads;
    cfg.cache_flush_delay = 1;
    Engine::new(cfg).expect("engine boots against a fresh temp dir")
}

/// Poll the engine's I/O notification channel and drain completions until
/// `lookup` stops returning `NeedsLoad`, or the deadline passes.
fn wait_for_value(engine: &mut Engine, db: dscached::keyval::DbId, key: &Key, timeout: Duration) -> LookupOutcome {
    let rx = engine.io_notifications();
    let deadline = Instant::now() + timeout;
    loop {
        match engine.lookup(db, key) {
            LookupOutcome::NeedsLoad => {
                if Instant::now() >= deadline {
                    return LookupOutcome::NeedsLoad;
                }
                if rx.recv_timeout(Duration::from_millis(25)).is_ok() {
                    engine.drain_completions();
                }
            }
            other => return other,
        }
    }
}

#[test]
fn miss_then_load_then_serve() {
    let dir = tempfile::tempdir().unwrap();
    // seed the disk directly, bypassing the engine, so the first GET is a
    // genuine miss against a cold cache.
    {
        let disk = dscached::diskstore::DiskStore::open(dir.path()).unwrap();
        disk.set(0, &Key::from("K"), b"v", None).unwrap();
    }
    let mut engine = engine_with(dir.path(), 1, 2);
    let client = engine.register_client(0);

    match engine.lookup(0, &Key::from("K")) {
        LookupOutcome::NeedsLoad => {}
        other => panic!("expected a cold miss, got {}", debug_outcome(&other)),
    }
    engine.wait_for(client, 0, Key::from("K"));
    match wait_for_value(&mut engine, 0, &Key::from("K"), Duration::from_secs(2)) {
        LookupOutcome::Value(v) => assert_eq!(v.payload().as_ref(), b"v"),
        other => panic!("load never completed: {}", debug_outcome(&other)),
    }
    assert_eq!(engine.resident_count(0), 1);
    engine.shutdown();
}

#[test]
fn coalesced_writes_flush_only_the_latest_value() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = engine_with(dir.path(), 1, 2);
    engine.set(0, Key::from("K"), bytes::Bytes::from_static(b"v1"), None);
    engine.set(0, Key::from("K"), bytes::Bytes::from_static(b"v2"), None);
    // both SETs collapse into a single pending SAVE op (dedup on io_flags).
    assert!(!engine.schedule_is_empty());

    engine.force_point_in_time();
    assert!(engine.schedule_is_empty());
    assert!(engine.io_pool_idle());

    let disk = dscached::diskstore::DiskStore::open(dir.path()).unwrap();
    let rec = disk.get(0, &Key::from("K")).unwrap().unwrap();
    assert_eq!(rec.value, b"v2");
    engine.shutdown();
}

#[test]
fn negative_cache_short_circuits_repeat_misses() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = engine_with(dir.path(), 1, 2);
    let client = engine.register_client(0);

    assert!(matches!(engine.lookup(0, &Key::from("nope")), LookupOutcome::NeedsLoad));
    engine.wait_for(client, 0, Key::from("nope"));
    match wait_for_value(&mut engine, 0, &Key::from("nope"), Duration::from_secs(2)) {
        LookupOutcome::Absent => {}
        other => panic!("expected an authoritative miss, got {}", debug_outcome(&other)),
    }

    // second lookup must short-circuit: no load needed, straight to Absent.
    assert!(matches!(engine.lookup(0, &Key::from("nope")), LookupOutcome::Absent));
    engine.shutdown();
}

#[test]
fn lock_handoff_is_fifo_across_four_clients() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = engine_with(dir.path(), 1, 1);
    let (a, b, c, d) = (
        engine.register_client(0),
        engine.register_client(0),
        engine.register_client(0),
        engine.register_client(0),
    );
    let key = Key::from("K");

    assert!(matches!(engine.grab(d, 0, key.clone(), Some(1000)), GrabReply::Ok));
    assert!(matches!(engine.grab(a, 0, key.clone(), Some(1000)), GrabReply::Blocked));
    assert!(matches!(engine.grab(b, 0, key.clone(), Some(5000)), GrabReply::Blocked));
    assert!(matches!(engine.grab(c, 0, key.clone(), Some(5000)), GrabReply::Blocked));

    assert!(matches!(engine.release(d, 0, key.clone()), ReleaseReply::Ok));
    assert_eq!(engine.take_ready_clients(), vec![a]);

    assert!(matches!(engine.grab(a, 0, key.clone(), Some(100)), GrabReply::Ok));
    assert!(matches!(engine.release(a, 0, key.clone()), ReleaseReply::Ok));
    assert_eq!(engine.take_ready_clients(), vec![b]);

    assert!(matches!(engine.grab(b, 0, key.clone(), Some(100)), GrabReply::Ok));
    assert!(matches!(engine.release(b, 0, key.clone()), ReleaseReply::Ok));
    assert_eq!(engine.take_ready_clients(), vec![c]);

    engine.shutdown();
}

#[test]
fn lock_wait_past_its_deadline_is_timed_out_without_disturbing_the_owner() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = engine_with(dir.path(), 1, 1);
    let (owner, waiter) = (engine.register_client(0), engine.register_client(0));
    let key = Key::from("K");

    assert!(matches!(engine.grab(owner, 0, key.clone(), None), GrabReply::Ok));
    assert!(matches!(
        engine.grab(waiter, 0, key.clone(), Some(-1)),
        GrabReply::Blocked
    ));

    engine.cron_tick();

    assert_eq!(engine.take_timed_out_clients(), vec![waiter]);
    // the owner still holds the lock; a later release has nobody left to hand off to.
    assert!(matches!(engine.release(owner, 0, key), ReleaseReply::Ok));
    assert!(engine.take_ready_clients().is_empty());

    engine.shutdown();
}

#[test]
fn snapshot_quiesce_blocks_new_pushes_until_ended() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = engine_with(dir.path(), 1, 2);
    engine.set(0, Key::from("K"), bytes::Bytes::from_static(b"v"), None);

    engine.begin_snapshot();
    assert!(engine.is_snapshotting());
    // a tick while snapshotting must not push the pending SAVE.
    engine.cron_tick();
    assert!(!engine.schedule_is_empty());

    engine.end_snapshot();
    engine.force_point_in_time();
    assert!(engine.schedule_is_empty());
    engine.shutdown();
}

fn debug_outcome(o: &LookupOutcome) -> &'static str {
    match o {
        LookupOutcome::Value(_) => "Value",
        LookupOutcome::NeedsLoad => "NeedsLoad",
        LookupOutcome::Absent => "Absent",
    }
}

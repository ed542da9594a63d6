//! Pipeline integration tests: cascade gating, offline resume,
//! conflict recovery, snapshot lockstep, and persistence round-trips.

use proptest::prelude::*;
use riptide_core::{
    Cascade, CacheMode, DatabaseOptions, Key, LiveChannel, LocalStore, Model, ModelEvent,
    ModelStatus, Outcome, Registry, RemoteError, RemoteService, SyncError,
};
use riptide_testkit::prelude::*;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct Harness {
    registry: Registry,
    remote: Arc<ScriptedRemote>,
    store: Arc<TrackingStore>,
    live: Arc<RecordingLive>,
}

fn harness_with(options: DatabaseOptions) -> Harness {
    let remote = scripted_remote();
    let store = tracking_store();
    let live = recording_live();
    let registry = Registry::builder()
        .database(options)
        .remote(Arc::clone(&remote) as Arc<dyn RemoteService>)
        .store(Arc::clone(&store) as Arc<dyn LocalStore>)
        .live(Arc::clone(&live) as Arc<dyn LiveChannel>)
        .build()
        .unwrap();
    Harness {
        registry,
        remote,
        store,
        live,
    }
}

fn harness() -> Harness {
    harness_with(DatabaseOptions::new("task"))
}

#[test]
fn save_walks_local_then_remote_then_synced() {
    let h = harness();
    let db = h.registry.database("task").unwrap();

    let (task, promise) = db.create(rec(json!({"id": "t1", "name": "one"}))).unwrap();
    assert_eq!(promise.outcome(), Some(Outcome::Resolved));
    assert_eq!(task.status(), ModelStatus::Synced);
    assert!(task.is_saved_remotely());

    let calls = h.remote.calls();
    assert_eq!(calls.len(), 1);
    assert!(matches!(
        &calls[0],
        RemoteCall::Create { kind, key, .. } if kind == "task" && key == "t1"
    ));
    // Local envelope persisted and marked synced.
    let envelope = h.store.peek("task/t1").expect("cached");
    assert_eq!(envelope.get("$status"), Some(&json!(0)));
}

#[test]
fn second_save_sends_only_the_diff() {
    let h = harness();
    let db = h.registry.database("task").unwrap();
    let (task, _) = db.create(rec(json!({"id": "t1", "name": "one", "done": false}))).unwrap();
    h.remote.take_calls();

    task.set("done", true);
    let promise = task.save();
    assert_eq!(promise.outcome(), Some(Outcome::Resolved));

    let calls = h.remote.calls();
    assert_eq!(calls.len(), 1);
    match &calls[0] {
        RemoteCall::Update { payload, .. } => {
            assert_eq!(payload.get("done"), Some(&json!(true)));
            assert!(payload.get("name").is_none(), "unchanged field in diff");
        }
        other => panic!("expected update, got {other:?}"),
    }
}

#[test]
fn unchanged_save_skips_the_wire() {
    let h = harness();
    let db = h.registry.database("task").unwrap();
    let (task, _) = db.create(rec(json!({"id": "t1", "name": "one"}))).unwrap();
    h.remote.take_calls();

    let promise = task.save();
    assert_eq!(promise.outcome(), Some(Outcome::Resolved));
    assert!(h.remote.calls().is_empty(), "empty diff must not round-trip");
}

#[test]
fn saved_snapshots_stay_in_lockstep() {
    let h = harness();
    let db = h.registry.database("task").unwrap();
    let (task, _) = db.create(rec(json!({"id": "t1", "name": "one"}))).unwrap();

    let saved = task.saved_snapshot().expect("remote snapshot");
    let local_saved = task.local_saved_snapshot().expect("cached snapshot");
    assert!(Arc::ptr_eq(&saved, &local_saved));

    // A later confirmation swaps both to a new shared allocation.
    task.set("name", "two");
    task.save();
    let saved2 = task.saved_snapshot().unwrap();
    let local_saved2 = task.local_saved_snapshot().unwrap();
    assert!(Arc::ptr_eq(&saved2, &local_saved2));
    assert!(!Arc::ptr_eq(&saved, &saved2));
}

#[test]
fn conflict_applies_server_state_and_resolves() {
    let h = harness();
    let db = h.registry.database("task").unwrap();
    let (task, _) = db.create(rec(json!({"id": "t1", "name": "mine"}))).unwrap();
    h.remote.take_calls();

    let conflicts = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&conflicts);
    let _sub = task.events().subscribe(move |event| {
        if matches!(event, ModelEvent::SaveConflict { .. }) {
            seen.fetch_add(1, Ordering::SeqCst);
        }
    });

    task.set("name", "edited");
    h.remote.push_response(Err(RemoteError::Conflict {
        record: rec(json!({"name": "theirs"})),
    }));
    let promise = task.save();

    // The authoritative server state wins and the save still counts.
    assert_eq!(promise.outcome(), Some(Outcome::Resolved));
    assert_eq!(task.get("name"), Some(json!("theirs")));
    assert_eq!(task.status(), ModelStatus::Synced);
    assert_eq!(conflicts.load(Ordering::SeqCst), 1);
}

#[test]
fn remote_404_destroys_the_local_model() {
    let h = harness();
    let db = h.registry.database("task").unwrap();
    let (task, _) = db.create(rec(json!({"id": "t1"}))).unwrap();
    assert!(h.store.peek("task/t1").is_some());

    h.remote.push_response(Err(RemoteError::NotFound { status: 404 }));
    task.set("name", "still here?");
    let promise = task.save();

    assert_eq!(
        promise.outcome(),
        Some(Outcome::Rejected(SyncError::NotFound { status: 404 }))
    );
    assert!(task.is_removed());
    assert!(db.get(&Key::from("t1")).is_none());
    assert!(h.store.peek("task/t1").is_none());
}

#[test]
fn remote_failure_keeps_the_pending_save() {
    let h = harness();
    let db = h.registry.database("task").unwrap();
    let (task, _) = db.create(rec(json!({"id": "t1"}))).unwrap();

    let failures = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&failures);
    let _sub = task.events().subscribe(move |event| {
        if matches!(event, ModelEvent::RemoteSaveFailure(_)) {
            seen.fetch_add(1, Ordering::SeqCst);
        }
    });

    task.set("name", "v2");
    h.remote.push_response(Err(RemoteError::Status {
        status: 500,
        message: "boom".into(),
    }));
    let promise = task.save();

    assert!(matches!(promise.outcome(), Some(Outcome::Rejected(_))));
    assert_eq!(failures.load(Ordering::SeqCst), 1);
    // Still pending: the change survives for a later retry.
    assert_eq!(task.status(), ModelStatus::SavePending);
    assert_eq!(task.get("name"), Some(json!("v2")));
}

#[test]
fn offline_parks_and_resumes_exactly_once() {
    let h = harness();
    let db = h.registry.database("task").unwrap();

    h.remote.set_offline(true);
    let (task, promise) = db.create(rec(json!({"id": "t1", "name": "offline"}))).unwrap();

    assert_eq!(promise.outcome(), Some(Outcome::Offline));
    assert_eq!(task.status(), ModelStatus::SavePending);
    assert!(!h.registry.is_online());
    // One attempt went out and failed with status 0.
    assert_eq!(
        h.remote.calls().iter().filter(|c| c.is_save()).count(),
        1
    );
    // The pending envelope survived locally.
    let envelope = h.store.peek("task/t1").expect("cached while offline");
    assert_eq!(envelope.get("$status"), Some(&json!(1)));

    h.remote.set_offline(false);
    h.registry.set_online(true);

    assert_eq!(task.status(), ModelStatus::Synced);
    assert!(task.is_saved_remotely());
    assert_eq!(
        h.remote.calls().iter().filter(|c| c.is_save()).count(),
        2
    );

    // A second online transition must not replay anything.
    h.registry.set_online(false);
    h.registry.set_online(true);
    assert_eq!(
        h.remote.calls().iter().filter(|c| c.is_save()).count(),
        2
    );
}

#[test]
fn operations_from_listeners_run_after_the_current_chain() {
    let h = harness();
    let db = h.registry.database("task").unwrap();
    let task = db.instantiate(rec(json!({"id": "t1"}))).unwrap();

    // Request removal the moment the save confirms remotely.
    let observer = task.clone();
    let _sub = task.events().subscribe(move |event| {
        if matches!(event, ModelEvent::Saved { remote: true }) {
            observer.remove();
        }
    });
    task.save();

    assert!(task.is_removed());
    let calls = h.remote.calls();
    assert!(matches!(calls[0], RemoteCall::Create { .. }));
    assert!(
        calls.iter().any(|c| matches!(c, RemoteCall::Remove { .. })),
        "removal ran after the save chain: {calls:?}"
    );
}

#[test]
fn remove_walks_local_then_remote() {
    let h = harness();
    let db = h.registry.database("task").unwrap();
    let (task, _) = db.create(rec(json!({"id": "t1"}))).unwrap();
    h.remote.take_calls();

    let promise = task.remove();
    assert_eq!(promise.outcome(), Some(Outcome::Resolved));
    assert!(task.is_removed());
    assert!(db.get(&Key::from("t1")).is_none());
    assert!(h.store.peek("task/t1").is_none());
    assert!(matches!(h.remote.calls()[0], RemoteCall::Remove { .. }));
    assert!(h
        .live
        .broadcasts()
        .iter()
        .any(|b| matches!(b, Broadcast::Remove { .. })));
}

#[test]
fn remove_of_uncached_model_skips_the_local_leg() {
    let h = harness();
    let db = h.registry.database("task").unwrap();
    let task = db.instantiate(rec(json!({"id": "t1"}))).unwrap();

    let promise = task.remove();
    assert_eq!(promise.outcome(), Some(Outcome::Resolved));
    assert!(task.is_removed());
    assert!(h.store.take_ops().iter().all(|op| !matches!(op, StoreOp::Put(_))));
}

#[test]
fn store_failure_logs_and_proceeds() {
    let h = harness();
    let db = h.registry.database("task").unwrap();

    let errors = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&errors);
    h.registry
        .errors()
        .subscribe(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        })
        .forget();

    h.store.set_failing(true);
    let (task, promise) = db.create(rec(json!({"id": "t1"}))).unwrap();

    // The broken cache never blocks remote consistency.
    assert_eq!(promise.outcome(), Some(Outcome::Resolved));
    assert!(task.is_saved_remotely());
    assert!(errors.load(Ordering::SeqCst) >= 1);
}

#[test]
fn pending_cache_mode_evicts_after_confirmation() {
    let h = harness_with(DatabaseOptions::new("task").with_cache(CacheMode::Pending));
    let db = h.registry.database("task").unwrap();

    h.remote.set_offline(true);
    let (task, _) = db.create(rec(json!({"id": "t1"}))).unwrap();
    assert!(
        h.store.peek("task/t1").is_some(),
        "pending work stays cached"
    );

    h.remote.set_offline(false);
    h.registry.set_online(true);
    assert_eq!(task.status(), ModelStatus::Synced);
    assert!(
        h.store.peek("task/t1").is_none(),
        "confirmed work is evicted"
    );
}

#[test]
fn boot_restores_and_resumes_pending_work() {
    let remote = scripted_remote();
    let store = tracking_store();

    {
        let registry = task_registry_with_store(Arc::clone(&remote), Arc::clone(&store));
        let db = registry.database("task").unwrap();
        remote.set_offline(true);
        let (_, promise) = db.create(rec(json!({"id": "t1", "name": "parked"}))).unwrap();
        assert_eq!(promise.outcome(), Some(Outcome::Offline));
    }
    remote.set_offline(false);
    remote.take_calls();

    let registry = task_registry_with_store(Arc::clone(&remote), store);
    assert_eq!(registry.boot().unwrap(), 1);
    let db = registry.database("task").unwrap();
    let task = db.get(&Key::from("t1")).expect("restored");

    // The deferred remote leg ran during boot.
    assert_eq!(task.status(), ModelStatus::Synced);
    assert!(task.is_saved_remotely());
    assert_eq!(remote.calls().iter().filter(|c| c.is_save()).count(), 1);
}

#[test]
fn live_broadcast_carries_publish_always_fields() {
    let h = harness_with(DatabaseOptions::new("task").with_publish_always(["name"]));
    let db = h.registry.database("task").unwrap();
    let (task, _) = db.create(rec(json!({"id": "t1", "name": "one", "done": false}))).unwrap();

    task.set("done", true);
    task.save();

    let broadcasts = h.live.broadcasts();
    match broadcasts.last().expect("broadcast") {
        Broadcast::Save { published, .. } => {
            assert_eq!(published.get("done"), Some(&json!(true)));
            assert_eq!(published.get("name"), Some(&json!("one")));
        }
        other => panic!("expected save broadcast, got {other:?}"),
    }
}

#[test]
fn inbound_live_events_route_like_refreshes() {
    let h = harness();
    let db = h.registry.database("task").unwrap();

    let task = db
        .live_save("t1", rec(json!({"name": "from the wire"})))
        .unwrap();
    assert_eq!(task.status(), ModelStatus::Synced);
    assert!(task.is_saved_remotely());
    assert!(Model::same(&db.get(&Key::from("t1")).unwrap(), &task));

    let removed = db.live_remove("t1").unwrap();
    assert!(Model::same(&removed, &task));
    assert!(db.get(&Key::from("t1")).is_none());
}

#[test]
fn replaying_an_identical_remote_echo_changes_nothing() {
    let h = harness();
    let db = h.registry.database("task").unwrap();
    let (task, _) = db.create(rec(json!({"id": "t1", "name": "one"}))).unwrap();

    db.live_save("t1", rec(json!({"name": "one", "done": true}))).unwrap();
    let fields = task.fields();
    let saved = task.saved_snapshot().expect("remote snapshot");

    db.live_save("t1", rec(json!({"name": "one", "done": true}))).unwrap();

    assert_eq!(task.fields(), fields);
    assert_eq!(*task.saved_snapshot().unwrap(), *saved);
    let local_saved = task.local_saved_snapshot().expect("cached snapshot");
    assert!(Arc::ptr_eq(&task.saved_snapshot().unwrap(), &local_saved));
}

#[test]
fn fetch_falls_through_the_cache_to_the_remote() {
    let h = harness();
    let db = h.registry.database("task").unwrap();

    h.remote
        .push_response(Ok(rec(json!({"id": "t9", "name": "fetched"}))));
    let (task, promise) = db.fetch(Key::from("t9"));

    assert_eq!(promise.outcome(), Some(Outcome::Resolved));
    assert_eq!(task.status(), ModelStatus::Synced);
    assert_eq!(task.get("name"), Some(json!("fetched")));
    assert!(matches!(h.remote.calls()[0], RemoteCall::Get { .. }));
    // The remote result was written through to the cache.
    assert!(h.store.peek("task/t9").is_some());

    // A second fetch is an identity-map hit, no I/O.
    h.remote.take_calls();
    let (again, promise) = db.fetch(Key::from("t9"));
    assert!(Model::same(&again, &task));
    assert_eq!(promise.outcome(), Some(Outcome::Resolved));
    assert!(h.remote.calls().is_empty());
}

#[test]
fn refresh_404_destroys_the_model() {
    let h = harness();
    let db = h.registry.database("task").unwrap();
    let (task, _) = db.create(rec(json!({"id": "t1"}))).unwrap();

    h.remote.push_response(Err(RemoteError::NotFound { status: 410 }));
    let promise = task.refresh();

    assert_eq!(
        promise.outcome(),
        Some(Outcome::Rejected(SyncError::NotFound { status: 410 }))
    );
    assert!(task.is_removed());
    assert!(db.get(&Key::from("t1")).is_none());
}

#[test]
fn cancel_rolls_back_a_pending_save() {
    let h = harness();
    let db = h.registry.database("task").unwrap();
    let (task, _) = db.create(rec(json!({"id": "t1"}))).unwrap();

    h.remote.set_offline(true);
    task.set("name", "never sent");
    let promise = task.save();
    assert_eq!(promise.outcome(), Some(Outcome::Offline));
    assert_eq!(task.status(), ModelStatus::SavePending);

    task.cancel(true);
    assert_eq!(task.status(), ModelStatus::Synced);

    // The disarmed resume listener must not fire.
    h.remote.set_offline(false);
    let before = h.remote.call_count();
    h.registry.set_online(true);
    assert_eq!(h.remote.call_count(), before);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Stage I/O happens exactly when the matching cascade bit is
    /// present; in-memory state converges regardless.
    #[test]
    fn cascade_bits_gate_stage_io(cascade in arb_cascade()) {
        let h = harness();
        let db = h.registry.database("task").unwrap();
        let task = db.instantiate(rec(json!({"id": "p1", "name": "gated"}))).unwrap();

        let promise = task.save_cascade(cascade);
        prop_assert!(promise.outcome().is_some());

        let wrote_locally = h.store.ops().iter().any(|op| matches!(op, StoreOp::Put(_)));
        let called_remote = h.remote.calls().iter().any(RemoteCall::is_save);
        let broadcast = !h.live.is_empty();

        prop_assert_eq!(wrote_locally, cascade.contains(Cascade::LOCAL));
        prop_assert_eq!(called_remote, cascade.contains(Cascade::REST));
        prop_assert_eq!(broadcast, cascade.contains(Cascade::LIVE));

        if !cascade.is_none() {
            prop_assert_eq!(task.status(), ModelStatus::Synced);
            prop_assert_eq!(task.is_saved_remotely(), cascade.intersects(Cascade::REMOTE));
        }
    }
}

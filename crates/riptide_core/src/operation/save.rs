//! Save stages: SaveLocal, SaveNow, SaveRemote.

use super::{arm_resume, chain, requeue, OpKind, Operation};
use crate::cascade::Cascade;
use crate::config::CacheMode;
use crate::database::Database;
use crate::error::SyncError;
use crate::model::{LocalSnapshot, Model, ModelEvent, ModelStatus};
use crate::record;
use crate::record::Record;
use crate::remote::RemoteError;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Marks SavePending, persists the merged local envelope, and chains
/// the remote leg (or SaveNow when no remote bit is requested).
pub(super) fn save_local(db: &Database, model: &Model, op: &Operation) {
    if model.status().is_removing() {
        op.promise.cancel();
        return;
    }
    let key = match db.ensure_registered(model) {
        Ok(key) => key,
        Err(err) => {
            op.promise.reject(err);
            return;
        }
    };

    let encoded = db.encode(model, false);
    let envelope = {
        let mut state = model.inner.state.write();
        state.status = ModelStatus::SavePending;
        let saved = state.saved.clone();
        state.local = Some(LocalSnapshot {
            saved: saved.clone(),
        });
        record::encode_local(&encoded, state.status.code(), saved.as_deref())
    };

    if op.cascade.contains(Cascade::LOCAL) && db.cache_enabled() {
        if let Some(store) = db.store() {
            if let Err(err) = store.put(&db.store_key(&key), &envelope) {
                local_failure(db, model, &err.0);
            }
        }
    }

    if op.cascade.intersects(Cascade::REMOTE) {
        chain(model, op, OpKind::SaveRemote);
    } else {
        chain(model, op, OpKind::SaveNow);
    }
}

/// Unconditional local write of the current snapshot. Does not
/// recompute diffs; clears a pending save when no remote leg ran.
pub(super) fn save_now(db: &Database, model: &Model, op: &Operation) {
    let Some(key) = model.key() else {
        op.promise.resolve();
        return;
    };
    let (envelope, status) = {
        let mut state = model.inner.state.write();
        if state.status == ModelStatus::SavePending {
            state.status = ModelStatus::Synced;
        }
        let saved = state.saved.clone();
        state.local = Some(LocalSnapshot {
            saved: saved.clone(),
        });
        (
            record::encode_local(&state.fields, state.status.code(), saved.as_deref()),
            state.status,
        )
    };

    if op.cascade.contains(Cascade::LOCAL) && db.cache_enabled() {
        let queue_empty = model.inner.queue.lock().pending.is_empty();
        let evict = db.options().cache == CacheMode::Pending
            && status == ModelStatus::Synced
            && queue_empty;
        if let Some(store) = db.store() {
            let result = if evict {
                model.inner.state.write().local = None;
                store.remove(&db.store_key(&key)).map(|_| ())
            } else {
                store.put(&db.store_key(&key), &envelope)
            };
            if let Err(err) = result {
                local_failure(db, model, &err.0);
            }
        }
    }

    model.events().emit(&ModelEvent::Saved { remote: false });
    op.promise.resolve();
}

/// Pushes the save to the remote service, honoring dependency
/// ordering, offline resume, and the 404/409 recovery rules.
pub(super) fn save_remote(db: &Database, model: &Model, op: &Operation) {
    if model.status().is_removing() {
        op.promise.cancel();
        return;
    }

    // Foreign keys must reference resources that exist remotely, so
    // an unsaved dependency parks this stage until it saves.
    let unsaved = model.unsaved_dependents();
    if !unsaved.is_empty() {
        park_for_dependencies(model, op, unsaved);
        return;
    }

    let Some(key) = model.key() else {
        op.promise.reject(SyncError::MissingKey);
        return;
    };

    let encoded = db.encode(model, true);
    let (creating, payload) = {
        let mut state = model.inner.state.write();
        let payload = match &state.saved {
            Some(saved) => record::diff(&encoded, saved, &db.options().save_always),
            None => encoded.clone(),
        };
        state.saving = Some(payload.clone());
        (state.saved.is_none(), payload)
    };

    // Nothing to send, or the Rest bit is absent: an immediate local
    // success that may still publish over Live.
    if !op.cascade.contains(Cascade::REST) || (!creating && payload.is_empty()) {
        finish_save_success(db, model, op, None, &payload);
        return;
    }
    let Some(remote) = db.remote() else {
        finish_save_success(db, model, op, None, &payload);
        return;
    };

    let result = if creating {
        remote.create(db.name(), &key, &payload, &op.options)
    } else {
        remote.update(db.name(), &key, &payload, &op.options)
    };

    match result {
        Ok(returned) => finish_save_success(db, model, op, Some(returned), &payload),
        Err(RemoteError::Conflict { record }) => {
            // Conflict: the authoritative server state wins.
            model.events().emit(&ModelEvent::SaveConflict {
                record: record.clone(),
            });
            finish_save_success(db, model, op, Some(record), &payload);
        }
        Err(RemoteError::NotFound { status }) => {
            let err = SyncError::NotFound { status };
            model
                .events()
                .emit(&ModelEvent::RemoteSaveFailure(err.clone()));
            db.destroy_local(model, true);
            op.promise.reject(err);
        }
        Err(RemoteError::Offline) => {
            arm_resume(model, op);
            model.events().emit(&ModelEvent::Offline);
            op.promise.offline();
        }
        Err(other) => {
            let err = other.to_sync_error();
            model
                .events()
                .emit(&ModelEvent::RemoteSaveFailure(err.clone()));
            op.promise.reject(err);
        }
    }
}

/// Merges a confirmed save back into the model, refreshes the shared
/// `$saved` snapshot, publishes over Live, and chains cache cleanup.
fn finish_save_success(
    db: &Database,
    model: &Model,
    op: &Operation,
    returned: Option<Record>,
    sent: &Record,
) {
    let publish = {
        let mut state = model.inner.state.write();
        if let Some(returned) = &returned {
            record::merge(&mut state.fields, returned);
        }
        let snapshot = Arc::new(state.fields.clone());
        state.saved = Some(Arc::clone(&snapshot));
        if let Some(local) = &mut state.local {
            local.saved = Some(snapshot);
        }
        state.status = ModelStatus::Synced;
        state.saving = None;

        let mut publish = sent.clone();
        for field in &db.options().publish_always {
            if let Some(value) = state.fields.get(field) {
                publish.insert(field.clone(), value.clone());
            }
        }
        publish
    };

    // The server may have assigned or changed the key.
    db.refresh_key(model);
    db.resort();

    if op.cascade.contains(Cascade::LIVE) {
        if let (Some(live), Some(key)) = (db.live(), model.key()) {
            live.save(db.name(), &key, &publish);
        }
    }

    model.events().emit(&ModelEvent::Saved { remote: true });

    if db.options().cache == CacheMode::Pending {
        chain(model, op, OpKind::RemoveCache);
    } else {
        chain(model, op, OpKind::SaveNow);
    }
    op.promise.resolve();
}

/// Re-arms SaveRemote once every unsaved dependency has either saved
/// or been removed. The original promise rides along.
fn park_for_dependencies(model: &Model, op: &Operation, dependencies: Vec<Model>) {
    let remaining = Arc::new(AtomicUsize::new(dependencies.len()));
    let replay = Arc::new(Mutex::new(Some(Operation {
        kind: op.kind,
        cascade: op.cascade,
        options: op.options.clone(),
        promise: op.promise.clone(),
    })));
    let weak = Arc::downgrade(&model.inner);

    for dependency in dependencies {
        let remaining = Arc::clone(&remaining);
        let replay = Arc::clone(&replay);
        let weak = weak.clone();
        let slot: Arc<Mutex<Option<crate::events::Subscription>>> = Arc::new(Mutex::new(None));
        let slot_inner = Arc::clone(&slot);

        let subscription = dependency.events().subscribe(move |event| {
            if !matches!(
                event,
                ModelEvent::Saved { .. } | ModelEvent::Removed { .. }
            ) {
                return;
            }
            if let Some(subscription) = slot_inner.lock().take() {
                subscription.unsubscribe();
            }
            if remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
                if let (Some(inner), Some(op)) = (weak.upgrade(), replay.lock().take()) {
                    requeue(&Model { inner }, op);
                }
            }
        });
        *slot.lock() = Some(subscription);
    }
}

fn local_failure(db: &Database, model: &Model, message: &str) {
    warn!(db = db.name(), %message, "local store failure, cascade proceeds");
    model
        .events()
        .emit(&ModelEvent::LocalSaveFailure(message.to_string()));
    if let Some(registry) = db.registry() {
        registry.emit_error(db.name(), message);
    }
}

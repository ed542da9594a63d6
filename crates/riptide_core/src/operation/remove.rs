//! Remove stages: RemoveLocal, RemoveNow, RemoveRemote, RemoveCache.

use super::{arm_resume, chain, OpKind, Operation};
use crate::cascade::Cascade;
use crate::database::Database;
use crate::error::SyncError;
use crate::model::{Model, ModelEvent, ModelStatus};
use crate::record;
use crate::remote::RemoteError;
use tracing::warn;

/// Marks RemovePending and persists removal intent. A model that was
/// never cached locally skips straight to the remote leg.
pub(super) fn remove_local(db: &Database, model: &Model, op: &Operation) {
    if model.status() == ModelStatus::Removed {
        op.promise.cancel();
        return;
    }
    let Some(key) = model.key() else {
        op.promise.reject(SyncError::MissingKey);
        return;
    };

    let was_cached = model.is_cached_locally();
    model.inner.state.write().status = ModelStatus::RemovePending;

    if !was_cached {
        chain(model, op, OpKind::RemoveRemote);
        return;
    }

    if op.cascade.contains(Cascade::LOCAL) && db.cache_enabled() {
        let envelope = {
            let state = model.inner.state.read();
            record::encode_local(
                &state.fields,
                ModelStatus::RemovePending.code(),
                state.saved.as_deref(),
            )
        };
        if let Some(store) = db.store() {
            if let Err(err) = store.put(&db.store_key(&key), &envelope) {
                warn!(db = db.name(), message = %err.0, "failed to persist removal intent");
                if let Some(registry) = db.registry() {
                    registry.emit_error(db.name(), &err.0);
                }
            }
        }
    }

    if op.cascade.intersects(Cascade::REMOTE) {
        chain(model, op, OpKind::RemoveRemote);
    } else {
        chain(model, op, OpKind::RemoveNow);
    }
}

/// Unconditional local delete plus bookkeeping teardown.
pub(super) fn remove_now(db: &Database, model: &Model, op: &Operation) {
    if let Some(key) = model.key() {
        if op.cascade.contains(Cascade::LOCAL) && db.cache_enabled() {
            if let Some(store) = db.store() {
                if let Err(err) = store.remove(&db.store_key(&key)) {
                    warn!(db = db.name(), message = %err.0, "local delete failed");
                    if let Some(registry) = db.registry() {
                        registry.emit_error(db.name(), &err.0);
                    }
                }
            }
        }
    }
    {
        let mut state = model.inner.state.write();
        state.saved = None;
        state.local = None;
        state.saving = None;
        state.status = ModelStatus::Removed;
    }
    db.detach(model);
    db.teardown_relations(model);
    model.events().emit(&ModelEvent::Removed { remote: false });
    op.promise.resolve();
}

/// Pushes the removal to the remote service. 404/410 counts as
/// success (already gone); offline parks the stage; other failures
/// leave the model RemovePending for a later retry.
pub(super) fn remove_remote(db: &Database, model: &Model, op: &Operation) {
    let Some(key) = model.key() else {
        op.promise.reject(SyncError::MissingKey);
        return;
    };

    if op.cascade.contains(Cascade::REST) {
        if let Some(remote) = db.remote() {
            match remote.remove(db.name(), &key, &op.options) {
                Ok(_) | Err(RemoteError::NotFound { .. }) => {}
                Err(RemoteError::Offline) => {
                    arm_resume(model, op);
                    model.events().emit(&ModelEvent::Offline);
                    op.promise.offline();
                    return;
                }
                Err(other) => {
                    let err = other.to_sync_error();
                    model
                        .events()
                        .emit(&ModelEvent::RemoteRemoveFailure(err.clone()));
                    op.promise.reject(err);
                    return;
                }
            }
        }
    }

    if op.cascade.contains(Cascade::LIVE) {
        if let Some(live) = db.live() {
            live.remove(db.name(), &key);
        }
    }
    db.detach(model);
    chain(model, op, OpKind::RemoveNow);
    op.promise.resolve();
}

/// Evicts a pending-mode cache entry once the model is Synced and no
/// further work is queued.
pub(super) fn remove_cache(db: &Database, model: &Model, op: &Operation) {
    let queue_empty = model.inner.queue.lock().pending.is_empty();
    if model.status() == ModelStatus::Synced && queue_empty {
        if let Some(key) = model.key() {
            if let Some(store) = db.store() {
                if let Err(err) = store.remove(&db.store_key(&key)) {
                    warn!(db = db.name(), message = %err.0, "cache eviction failed");
                }
            }
        }
        model.inner.state.write().local = None;
    }
    op.promise.resolve();
}

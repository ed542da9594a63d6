//! Get stages: GetLocal and GetRemote.

use super::{arm_resume, chain, OpKind, Operation};
use crate::cascade::Cascade;
use crate::database::Database;
use crate::error::SyncError;
use crate::model::{LocalSnapshot, Model, ModelEvent, ModelStatus};
use crate::record;
use crate::remote::RemoteError;
use std::sync::Arc;
use tracing::warn;

/// Reads the model from the local store; on miss, store failure, or a
/// disabled cache, chains to GetRemote.
pub(super) fn get_local(db: &Database, model: &Model, op: &Operation) {
    if !op.cascade.contains(Cascade::LOCAL) || !db.cache_enabled() {
        chain(model, op, OpKind::GetRemote);
        return;
    }
    let Some(key) = model.key() else {
        op.promise.reject(SyncError::MissingKey);
        return;
    };
    let Some(store) = db.store() else {
        chain(model, op, OpKind::GetRemote);
        return;
    };

    match store.get(&db.store_key(&key)) {
        Ok(Some(envelope)) => {
            let status = apply_envelope(model, envelope);
            db.resort();
            // A restored pending status re-issues its deferred remote
            // leg when the cascade reaches remotely.
            if op.cascade.contains(Cascade::REST) {
                match status {
                    ModelStatus::SavePending => chain(model, op, OpKind::SaveRemote),
                    ModelStatus::RemovePending => chain(model, op, OpKind::RemoveRemote),
                    _ => {}
                }
            }
            op.promise.resolve();
        }
        Ok(None) => chain(model, op, OpKind::GetRemote),
        Err(err) => {
            warn!(db = db.name(), message = %err.0, "local get failed, falling back to remote");
            if let Some(registry) = db.registry() {
                registry.emit_error(db.name(), &err.0);
            }
            chain(model, op, OpKind::GetRemote);
        }
    }
}

fn apply_envelope(model: &Model, envelope: crate::record::Record) -> ModelStatus {
    let (fields, status_code, saved) = record::decode_local(envelope);
    let status = status_code
        .and_then(ModelStatus::from_code)
        .unwrap_or(ModelStatus::Synced);
    let mut state = model.inner.state.write();
    state.fields = fields;
    state.status = status;
    let saved = saved.map(Arc::new);
    state.saved = saved.clone();
    state.local = Some(LocalSnapshot { saved });
    status
}

/// Fetches the model from the remote service. 404/410 destroys the
/// model locally; status 0 parks the stage until reconnect.
pub(super) fn get_remote(db: &Database, model: &Model, op: &Operation) {
    if !op.cascade.contains(Cascade::REST) {
        op.promise.resolve();
        return;
    }
    let Some(key) = model.key() else {
        op.promise.reject(SyncError::MissingKey);
        return;
    };
    let Some(remote) = db.remote() else {
        op.promise.resolve();
        return;
    };

    match remote.get(db.name(), &key, &op.options) {
        Ok(returned) => {
            db.apply_remote(model, returned);
            if op.cascade.contains(Cascade::LOCAL) && db.cache_enabled() {
                chain(model, op, OpKind::SaveNow);
            }
            op.promise.resolve();
        }
        Err(RemoteError::NotFound { status }) => {
            db.destroy_local(model, true);
            op.promise.reject(SyncError::NotFound { status });
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
                .emit(&ModelEvent::RemoteGetFailure(err.clone()));
            op.promise.reject(err);
        }
    }
}

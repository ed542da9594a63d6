//! The per-model operation pipeline.
//!
//! Every mutation becomes a chain of state-machine stages executed
//! strictly serially per model. Stages are gated by the cascade mask:
//! a stage whose capability bit is absent performs no I/O but still
//! transitions in-memory state and chains its successor, so in-memory
//! consistency is never a function of the cascade.
//!
//! The promise returned to the caller is threaded through the whole
//! chain and settled by the last gated stage (Rest beats Local).

mod get;
mod remove;
mod save;

use crate::cascade::Cascade;
use crate::config::RequestOptions;
use crate::error::SyncError;
use crate::model::Model;
use crate::promise::Promise;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error};

/// One step of the save/remove/get state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    /// Read from the local store, falling back to GetRemote.
    GetLocal,
    /// Fetch from the remote service.
    GetRemote,
    /// Record the save locally and mark SavePending.
    SaveLocal,
    /// Unconditional local write of the current snapshot.
    SaveNow,
    /// Push the save to the remote service and publish live.
    SaveRemote,
    /// Record removal intent locally and mark RemovePending.
    RemoveLocal,
    /// Unconditional local delete; marks Removed.
    RemoveNow,
    /// Push the removal to the remote service and publish live.
    RemoveRemote,
    /// Evict a pending-mode cache entry after remote confirmation.
    RemoveCache,
}

impl OpKind {
    /// The cascade bits this stage's I/O requires.
    pub fn required(self) -> Cascade {
        match self {
            OpKind::GetLocal
            | OpKind::SaveLocal
            | OpKind::SaveNow
            | OpKind::RemoveLocal
            | OpKind::RemoveNow => Cascade::LOCAL,
            OpKind::GetRemote | OpKind::SaveRemote | OpKind::RemoveRemote => Cascade::REST,
            OpKind::RemoveCache => Cascade::NONE,
        }
    }

    /// Remove-family stages jump the queue so removals are never
    /// starved behind a backlog of saves.
    pub fn interrupting(self) -> bool {
        matches!(
            self,
            OpKind::RemoveLocal | OpKind::RemoveNow | OpKind::RemoveRemote | OpKind::RemoveCache
        )
    }
}

/// A queued pipeline step bound to one model.
pub(crate) struct Operation {
    pub kind: OpKind,
    pub cascade: Cascade,
    pub options: RequestOptions,
    pub promise: Promise,
}

/// The per-model queue of pending operations.
#[derive(Default)]
pub(crate) struct OpQueue {
    pub pending: VecDeque<Operation>,
    pub running: bool,
}

/// Enqueues an operation and runs the queue if it is idle.
///
/// Returns the promise settled by the last gated stage of the chain
/// this operation spawns.
pub(crate) fn enqueue(
    model: &Model,
    kind: OpKind,
    cascade: Cascade,
    options: RequestOptions,
) -> Promise {
    let promise = Promise::new();
    push(
        model,
        Operation {
            kind,
            cascade,
            options,
            promise: promise.clone(),
        },
    );
    pump(model);
    promise
}

/// Re-enqueues an operation carrying its original promise (used when
/// a parked stage re-arms, e.g. after a dependency saves).
pub(crate) fn requeue(model: &Model, op: Operation) {
    push(model, op);
    pump(model);
}

fn push(model: &Model, op: Operation) {
    let mut queue = model.inner.queue.lock();
    if op.kind.interrupting() {
        queue.pending.push_front(op);
    } else {
        queue.pending.push_back(op);
    }
}

/// Chains a successor stage carrying the current operation's cascade,
/// options, and promise. Skipped if a stage of the same kind is
/// already queued, preventing duplicate remote round-trips.
pub(crate) fn chain(model: &Model, op: &Operation, kind: OpKind) {
    let mut queue = model.inner.queue.lock();
    if queue.pending.iter().any(|pending| pending.kind == kind) {
        return;
    }
    queue.pending.push_front(Operation {
        kind,
        cascade: op.cascade,
        options: op.options.clone(),
        promise: op.promise.clone(),
    });
}

/// Cancels every queued (not yet started) operation.
pub(crate) fn cancel_queued(model: &Model) {
    let drained: Vec<Operation> = model.inner.queue.lock().pending.drain(..).collect();
    for op in drained {
        op.promise.cancel();
    }
}

/// Runs queued operations to completion.
///
/// Reentrant calls (from listeners or collaborator callbacks) return
/// immediately; the outermost pump drains everything, which is what
/// guarantees the strict per-model serialization of mutations.
pub(crate) fn pump(model: &Model) {
    {
        let mut queue = model.inner.queue.lock();
        if queue.running {
            return;
        }
        queue.running = true;
    }
    loop {
        let op = {
            let mut queue = model.inner.queue.lock();
            match queue.pending.pop_front() {
                Some(op) => op,
                None => {
                    queue.running = false;
                    return;
                }
            }
        };
        execute(model, op);
    }
}

fn execute(model: &Model, op: Operation) {
    let Some(db) = model.database() else {
        op.promise.cancel();
        return;
    };
    debug!(
        kind = ?op.kind,
        cascade = ?op.cascade,
        db = db.name(),
        key = %model.key().map(|k| k.to_string()).unwrap_or_default(),
        "executing operation"
    );

    let outcome = catch_unwind(AssertUnwindSafe(|| match op.kind {
        OpKind::GetLocal => get::get_local(&db, model, &op),
        OpKind::GetRemote => get::get_remote(&db, model, &op),
        OpKind::SaveLocal => save::save_local(&db, model, &op),
        OpKind::SaveNow => save::save_now(&db, model, &op),
        OpKind::SaveRemote => save::save_remote(&db, model, &op),
        OpKind::RemoveLocal => remove::remove_local(&db, model, &op),
        OpKind::RemoveNow => remove::remove_now(&db, model, &op),
        OpKind::RemoveRemote => remove::remove_remote(&db, model, &op),
        OpKind::RemoveCache => remove::remove_cache(&db, model, &op),
    }));

    if let Err(panic) = outcome {
        // A synchronous programming error in a listener must not
        // deadlock the queue; the operation is marked finished and the
        // failure surfaces as a global error event.
        let message = panic_message(&panic);
        error!(kind = ?op.kind, db = db.name(), %message, "listener panicked during operation");
        if let Some(registry) = db.registry() {
            registry.emit_error(db.name(), &message);
        }
        op.promise.reject(SyncError::Internal(message));
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Arms a one-shot online-resume listener replaying the given stage
/// with its original cascade and options once connectivity returns.
pub(crate) fn arm_resume(model: &Model, op: &Operation) {
    {
        let mut state = model.inner.state.write();
        if state.resume_armed {
            return;
        }
        state.resume_armed = true;
    }
    let Some(registry) = model.database().and_then(|db| db.registry()) else {
        return;
    };
    // Status 0 is the connectivity signal: the registry goes offline
    // so the listener parks instead of replaying inline.
    registry.set_online(false);
    let weak = Arc::downgrade(&model.inner);
    let kind = op.kind;
    let cascade = op.cascade;
    let options = op.options.clone();
    registry.on_online_once(move || {
        let Some(inner) = weak.upgrade() else { return };
        let model = Model { inner };
        let armed = {
            let mut state = model.inner.state.write();
            std::mem::replace(&mut state.resume_armed, false)
        };
        if armed {
            let _ = enqueue(&model, kind, cascade, options);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_bits() {
        assert_eq!(OpKind::GetLocal.required(), Cascade::LOCAL);
        assert_eq!(OpKind::GetRemote.required(), Cascade::REST);
        assert_eq!(OpKind::SaveLocal.required(), Cascade::LOCAL);
        assert_eq!(OpKind::SaveRemote.required(), Cascade::REST);
        assert_eq!(OpKind::RemoveRemote.required(), Cascade::REST);
        assert_eq!(OpKind::RemoveCache.required(), Cascade::NONE);
    }

    #[test]
    fn interrupting_kinds() {
        assert!(OpKind::RemoveLocal.interrupting());
        assert!(OpKind::RemoveRemote.interrupting());
        assert!(!OpKind::SaveLocal.interrupting());
        assert!(!OpKind::GetRemote.interrupting());
    }
}

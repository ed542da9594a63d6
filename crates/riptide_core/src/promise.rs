//! Single-outcome futures for pipeline results.
//!
//! A [`Promise`] settles exactly once into one of four terminal
//! states. Settlement is idempotent: once settled, later attempts are
//! no-ops, including cancellation. [`PromiseGroup`] aggregates several
//! promises (including ones registered while earlier members were
//! completing) into one externally observable future.

use crate::error::SyncError;
use parking_lot::Mutex;
use std::sync::Arc;

/// Terminal state of a promise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The operation succeeded.
    Resolved,
    /// The operation failed.
    Rejected(SyncError),
    /// The remote leg was deferred for lack of connectivity.
    Offline,
    /// The operation was canceled before settling.
    Canceled,
}

impl Outcome {
    /// Returns true for [`Outcome::Resolved`].
    pub fn is_resolved(&self) -> bool {
        matches!(self, Outcome::Resolved)
    }

    /// Aggregation priority: failures dominate offline, offline
    /// dominates cancellation, cancellation dominates success.
    fn rank(&self) -> u8 {
        match self {
            Outcome::Rejected(_) => 3,
            Outcome::Offline => 2,
            Outcome::Canceled => 1,
            Outcome::Resolved => 0,
        }
    }
}

type SettleCallback = Box<dyn FnOnce(&Outcome) + Send>;

struct PromiseState {
    outcome: Option<Outcome>,
    listeners: Vec<SettleCallback>,
}

/// A single-outcome future. Cloning shares the same settlement cell.
#[derive(Clone)]
pub struct Promise {
    inner: Arc<Mutex<PromiseState>>,
}

impl Default for Promise {
    fn default() -> Self {
        Self::new()
    }
}

impl Promise {
    /// Creates a pending promise.
    pub fn new() -> Promise {
        Promise {
            inner: Arc::new(Mutex::new(PromiseState {
                outcome: None,
                listeners: Vec::new(),
            })),
        }
    }

    /// Creates an already-settled promise.
    pub fn settled(outcome: Outcome) -> Promise {
        Promise {
            inner: Arc::new(Mutex::new(PromiseState {
                outcome: Some(outcome),
                listeners: Vec::new(),
            })),
        }
    }

    /// Creates an already-resolved promise.
    pub fn resolved() -> Promise {
        Promise::settled(Outcome::Resolved)
    }

    /// Settles the promise. Returns false if it was already settled.
    pub fn settle(&self, outcome: Outcome) -> bool {
        let listeners = {
            let mut state = self.inner.lock();
            if state.outcome.is_some() {
                return false;
            }
            state.outcome = Some(outcome.clone());
            std::mem::take(&mut state.listeners)
        };
        for listener in listeners {
            listener(&outcome);
        }
        true
    }

    /// Settles with [`Outcome::Resolved`].
    pub fn resolve(&self) -> bool {
        self.settle(Outcome::Resolved)
    }

    /// Settles with [`Outcome::Rejected`].
    pub fn reject(&self, error: SyncError) -> bool {
        self.settle(Outcome::Rejected(error))
    }

    /// Settles with [`Outcome::Offline`].
    pub fn offline(&self) -> bool {
        self.settle(Outcome::Offline)
    }

    /// Cancels the promise if still pending. Settled promises are
    /// unaffected.
    pub fn cancel(&self) -> bool {
        self.settle(Outcome::Canceled)
    }

    /// The terminal outcome, or `None` while pending.
    pub fn outcome(&self) -> Option<Outcome> {
        self.inner.lock().outcome.clone()
    }

    /// Returns true while unsettled.
    pub fn is_pending(&self) -> bool {
        self.inner.lock().outcome.is_none()
    }

    /// Registers a settle listener. If the promise is already
    /// settled, the listener runs inline before this returns.
    pub fn on_settle<F>(&self, callback: F)
    where
        F: FnOnce(&Outcome) + Send + 'static,
    {
        let outcome = {
            let mut state = self.inner.lock();
            match state.outcome.clone() {
                Some(outcome) => outcome,
                None => {
                    state.listeners.push(Box::new(callback));
                    return;
                }
            }
        };
        callback(&outcome);
    }
}

impl std::fmt::Debug for Promise {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Promise")
            .field("outcome", &self.outcome())
            .finish()
    }
}

struct GroupState {
    open: bool,
    pending: usize,
    worst: Outcome,
}

/// Aggregates many promises into one.
///
/// The group's promise settles only after `seal` has been called and
/// every added promise has settled, including promises added from
/// within other members' settle callbacks. The aggregate outcome is
/// the worst member outcome (rejection > offline > canceled >
/// resolved).
pub struct PromiseGroup {
    state: Arc<Mutex<GroupState>>,
    promise: Promise,
}

impl Default for PromiseGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl PromiseGroup {
    /// Creates an open, empty group.
    pub fn new() -> PromiseGroup {
        PromiseGroup {
            state: Arc::new(Mutex::new(GroupState {
                open: true,
                pending: 0,
                worst: Outcome::Resolved,
            })),
            promise: Promise::new(),
        }
    }

    /// The aggregate promise.
    pub fn promise(&self) -> Promise {
        self.promise.clone()
    }

    /// Adds a member promise.
    pub fn add(&self, member: &Promise) {
        self.state.lock().pending += 1;
        let state = Arc::clone(&self.state);
        let promise = self.promise.clone();
        member.on_settle(move |outcome| {
            Self::member_settled(&state, &promise, outcome);
        });
    }

    /// Seals the group; once every member settles, the aggregate
    /// promise settles.
    pub fn seal(&self) -> Promise {
        let aggregate = {
            let mut state = self.state.lock();
            state.open = false;
            finished_outcome(&state)
        };
        if let Some(outcome) = aggregate {
            self.promise.settle(outcome);
        }
        self.promise.clone()
    }

    fn member_settled(state: &Arc<Mutex<GroupState>>, promise: &Promise, outcome: &Outcome) {
        let aggregate = {
            let mut state = state.lock();
            state.pending -= 1;
            if outcome.rank() > state.worst.rank() {
                state.worst = outcome.clone();
            }
            finished_outcome(&state)
        };
        if let Some(outcome) = aggregate {
            promise.settle(outcome);
        }
    }
}

fn finished_outcome(state: &GroupState) -> Option<Outcome> {
    if !state.open && state.pending == 0 {
        Some(state.worst.clone())
    } else {
        None
    }
}

//! Ordered, keyed, live model containers.
//!
//! [`ModelCollection`] backs both the per-type sorted collection and
//! relation collections. Sorting can be suspended with
//! [`ModelCollection::delay_sorting`] so bulk mutations re-sort once.
//! [`FilteredCollection`] is a live-filtered view over a source
//! collection, kept consistent through collection events.

use crate::events::{Listeners, Subscription};
use crate::key::Key;
use crate::model::Model;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

/// Orders two JSON values for comparator purposes.
///
/// Nulls sort first, then booleans, numbers, strings; structured
/// values compare equal.
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(v: Option<&Value>) -> u8 {
        match v {
            None | Some(Value::Null) => 0,
            Some(Value::Bool(_)) => 1,
            Some(Value::Number(_)) => 2,
            Some(Value::String(_)) => 3,
            Some(Value::Array(_)) | Some(Value::Object(_)) => 4,
        }
    }
    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

type CompareFn = Arc<dyn Fn(&Model, &Model) -> Ordering + Send + Sync>;

/// Comparator for model ordering within a collection.
#[derive(Clone, Default)]
pub struct Comparator {
    cmp: Option<CompareFn>,
}

impl Comparator {
    /// No ordering; insertion order is kept.
    pub fn none() -> Comparator {
        Comparator { cmp: None }
    }

    /// Orders by a list of `(field, descending)` pairs, tie-broken by
    /// key for determinism.
    pub fn by_fields(fields: Vec<(String, bool)>) -> Comparator {
        if fields.is_empty() {
            return Comparator::none();
        }
        Comparator {
            cmp: Some(Arc::new(move |a, b| {
                for (field, descending) in &fields {
                    let ord = compare_values(a.get(field).as_ref(), b.get(field).as_ref());
                    let ord = if *descending { ord.reverse() } else { ord };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            })),
        }
    }

    /// Custom comparison function.
    pub fn custom<F>(cmp: F) -> Comparator
    where
        F: Fn(&Model, &Model) -> Ordering + Send + Sync + 'static,
    {
        Comparator {
            cmp: Some(Arc::new(cmp)),
        }
    }

    /// Returns true if an ordering is defined.
    pub fn is_ordered(&self) -> bool {
        self.cmp.is_some()
    }

    /// Compares two models, tie-breaking by key.
    pub fn compare(&self, a: &Model, b: &Model) -> Ordering {
        let primary = match &self.cmp {
            Some(cmp) => cmp(a, b),
            None => Ordering::Equal,
        };
        primary.then_with(|| a.key().cmp(&b.key()))
    }
}

impl std::fmt::Debug for Comparator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Comparator")
            .field("ordered", &self.is_ordered())
            .finish()
    }
}

/// Change notifications emitted by a collection.
#[derive(Clone)]
pub enum CollectionEvent {
    /// A model was inserted.
    Added(Model),
    /// A model was removed.
    Removed(Model),
    /// The collection was re-sorted or bulk-replaced.
    Resorted,
}

struct CollectionInner {
    ordered: RwLock<Vec<Model>>,
    by_key: RwLock<HashMap<Key, Model>>,
    comparator: Mutex<Comparator>,
    delay_sort: AtomicBool,
    pending_sort: AtomicBool,
    events: Listeners<CollectionEvent>,
}

/// An ordered, keyed collection of models. Cloning shares contents.
#[derive(Clone)]
pub struct ModelCollection {
    inner: Arc<CollectionInner>,
}

impl Default for ModelCollection {
    fn default() -> Self {
        Self::new(Comparator::none())
    }
}

impl ModelCollection {
    /// Creates an empty collection with the given comparator.
    pub fn new(comparator: Comparator) -> ModelCollection {
        ModelCollection {
            inner: Arc::new(CollectionInner {
                ordered: RwLock::new(Vec::new()),
                by_key: RwLock::new(HashMap::new()),
                comparator: Mutex::new(comparator),
                delay_sort: AtomicBool::new(false),
                pending_sort: AtomicBool::new(false),
                events: Listeners::new(),
            }),
        }
    }

    /// Collection change events.
    pub fn events(&self) -> &Listeners<CollectionEvent> {
        &self.inner.events
    }

    /// Inserts a model keyed by `key`. Returns false (and leaves the
    /// collection untouched) when the key is already present.
    pub fn insert(&self, key: Key, model: Model) -> bool {
        {
            let mut by_key = self.inner.by_key.write();
            if by_key.contains_key(&key) {
                return false;
            }
            by_key.insert(key, model.clone());
            self.inner.ordered.write().push(model.clone());
        }
        self.sort();
        self.inner.events.emit(&CollectionEvent::Added(model));
        true
    }

    /// Removes the model under `key`.
    pub fn remove(&self, key: &Key) -> Option<Model> {
        let removed = {
            let mut by_key = self.inner.by_key.write();
            let removed = by_key.remove(key)?;
            self.inner
                .ordered
                .write()
                .retain(|m| !Model::same(m, &removed));
            removed
        };
        self.inner
            .events
            .emit(&CollectionEvent::Removed(removed.clone()));
        Some(removed)
    }

    /// Re-registers a model under a new key after a key change.
    pub fn rekey(&self, old: &Key, new: Key) {
        let mut by_key = self.inner.by_key.write();
        if let Some(model) = by_key.remove(old) {
            by_key.insert(new, model);
        }
    }

    /// Looks up a model by key.
    pub fn get(&self, key: &Key) -> Option<Model> {
        self.inner.by_key.read().get(key).cloned()
    }

    /// Returns true if `key` is present.
    pub fn contains(&self, key: &Key) -> bool {
        self.inner.by_key.read().contains_key(key)
    }

    /// Number of models.
    pub fn len(&self) -> usize {
        self.inner.ordered.read().len()
    }

    /// Returns true if empty.
    pub fn is_empty(&self) -> bool {
        self.inner.ordered.read().is_empty()
    }

    /// The models in comparator order.
    pub fn to_vec(&self) -> Vec<Model> {
        self.inner.ordered.read().clone()
    }

    /// The keys currently present, unordered.
    pub fn keys(&self) -> Vec<Key> {
        self.inner.by_key.read().keys().cloned().collect()
    }

    /// Replaces the comparator and re-sorts.
    pub fn set_comparator(&self, comparator: Comparator) {
        *self.inner.comparator.lock() = comparator;
        self.sort();
    }

    /// Sorts the collection now, unless sorting is delayed.
    ///
    /// Returns true if a sort was performed.
    pub fn sort(&self) -> bool {
        if self.inner.delay_sort.load(AtomicOrdering::SeqCst) {
            self.inner.pending_sort.store(true, AtomicOrdering::SeqCst);
            return false;
        }
        let comparator = self.inner.comparator.lock().clone();
        if !comparator.is_ordered() {
            return false;
        }
        {
            let mut ordered = self.inner.ordered.write();
            ordered.sort_by(|a, b| comparator.compare(a, b));
        }
        self.inner.events.emit(&CollectionEvent::Resorted);
        true
    }

    /// Runs `f` with sorting suspended, then sorts once if any sort
    /// was requested meanwhile.
    pub fn delay_sorting<R>(&self, f: impl FnOnce() -> R) -> R {
        let was_delayed = self.inner.delay_sort.swap(true, AtomicOrdering::SeqCst);
        let result = f();
        if !was_delayed {
            self.inner.delay_sort.store(false, AtomicOrdering::SeqCst);
            if self.inner.pending_sort.swap(false, AtomicOrdering::SeqCst) {
                self.sort();
            }
        }
        result
    }

    /// Removes every model.
    pub fn clear(&self) {
        let drained: Vec<Model> = {
            let mut by_key = self.inner.by_key.write();
            let mut ordered = self.inner.ordered.write();
            by_key.clear();
            std::mem::take(&mut *ordered)
        };
        for model in drained {
            self.inner.events.emit(&CollectionEvent::Removed(model));
        }
    }
}

impl std::fmt::Debug for ModelCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelCollection")
            .field("len", &self.len())
            .finish()
    }
}

type FilterFn = Arc<dyn Fn(&Model) -> bool + Send + Sync>;

/// A live-filtered view over a source collection.
///
/// Membership follows the source: models added to or removed from the
/// source are re-evaluated against the filter as they change.
pub struct FilteredCollection {
    view: ModelCollection,
    source: ModelCollection,
    filter: FilterFn,
    _subscription: Subscription,
}

impl FilteredCollection {
    /// Creates a filtered view of `source`.
    pub fn new<F>(source: &ModelCollection, filter: F) -> Arc<FilteredCollection>
    where
        F: Fn(&Model) -> bool + Send + Sync + 'static,
    {
        let filter: FilterFn = Arc::new(filter);
        let view = ModelCollection::new(source.inner.comparator.lock().clone());

        let view_clone = view.clone();
        let filter_clone = Arc::clone(&filter);
        let subscription = source.events().subscribe(move |event| match event {
            CollectionEvent::Added(model) => {
                if filter_clone(model) {
                    if let Some(key) = model.key() {
                        view_clone.insert(key, model.clone());
                    }
                }
            }
            CollectionEvent::Removed(model) => {
                if let Some(key) = model.key() {
                    view_clone.remove(&key);
                }
            }
            CollectionEvent::Resorted => {
                view_clone.sort();
            }
        });

        let filtered = Arc::new(FilteredCollection {
            view,
            source: source.clone(),
            filter,
            _subscription: subscription,
        });
        filtered.refresh();
        filtered
    }

    /// The filtered view contents.
    pub fn collection(&self) -> &ModelCollection {
        &self.view
    }

    /// Re-derives the view from the source, re-testing every model.
    pub fn refresh(&self) {
        self.view.clear();
        self.view.delay_sorting(|| {
            for model in self.source.to_vec() {
                if (self.filter)(&model) {
                    if let Some(key) = model.key() {
                        self.view.insert(key, model);
                    }
                }
            }
        });
    }
}

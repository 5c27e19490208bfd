//! Signal Implementation
//!
//! A Signal is the fundamental reactive primitive. It holds a value and
//! tracks which computations depend on it.
//!
//! # How Signals Work
//!
//! 1. When a signal is read within a reactive context (computed/effect), the
//!    signal registers that context as a dependent.
//!
//! 2. When a signal's value changes, dependent computeds are marked dirty and
//!    dependent effects are scheduled. Nothing re-runs inside the setter.
//!
//! 3. Writing a value equal to the current one does nothing at all: no
//!    dependent is visited.
//!
//! # Thread Safety
//!
//! Signals are `Send + Sync`. The value is protected by a RwLock and the
//! dependents set by a Mutex; neither lock is held while other nodes are
//! notified.

use std::fmt::Debug;
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use smallvec::SmallVec;

use super::runtime::{Runtime, RuntimeInner};
use super::subscriber::Subscriber;
use crate::graph::{Dependency, NodeId, NodeKind, SourceNode};

/// Options accepted when creating a signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalOptions {
    /// Whether the signal may appear in a snapshot.
    pub serializable: bool,
    /// Stable key used in snapshots. Defaults to one derived from the id.
    pub key: Option<String>,
}

impl SignalOptions {
    /// Options for a signal that must never leave the process.
    pub fn local() -> Self {
        Self {
            serializable: false,
            key: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn serializable(mut self, serializable: bool) -> Self {
        self.serializable = serializable;
        self
    }
}

impl Default for SignalOptions {
    fn default() -> Self {
        Self {
            serializable: true,
            key: None,
        }
    }
}

pub(crate) struct SignalInner<T> {
    id: NodeId,
    key: String,
    runtime: Weak<RuntimeInner>,
    value: RwLock<T>,
    dependents: Mutex<IndexMap<NodeId, Subscriber>>,
    serializable: bool,
}

impl<T> SourceNode for SignalInner<T>
where
    T: Send + Sync + 'static,
{
    fn id(&self) -> NodeId {
        self.id
    }

    fn key(&self) -> &str {
        &self.key
    }

    fn add_dependent(&self, subscriber: Subscriber) {
        self.dependents.lock().insert(subscriber.id(), subscriber);
    }

    fn remove_dependent(&self, id: NodeId) {
        self.dependents.lock().shift_remove(&id);
    }

    fn dependents(&self) -> SmallVec<[Subscriber; 4]> {
        self.dependents.lock().values().cloned().collect()
    }
}

/// A reactive signal holding a value of type T.
///
/// # Type Parameters
///
/// - `T`: The type of value stored in the signal. Must be Clone + Send + Sync.
///   Writing requires `PartialEq` so unchanged writes can be skipped.
///
/// # Example
///
/// ```rust,ignore
/// let count = Signal::new(0);
///
/// // Read the value
/// let value = count.get();
///
/// // Update the value (schedules dependents)
/// count.set(5);
/// ```
pub struct Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    inner: Arc<SignalInner<T>>,
}

impl<T> Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a new signal in the current runtime.
    pub fn new(value: T) -> Self {
        Self::new_in(&Runtime::current(), value, SignalOptions::default())
    }

    /// Create a new signal in the current runtime with options.
    pub fn with_options(value: T, options: SignalOptions) -> Self {
        Self::new_in(&Runtime::current(), value, options)
    }

    /// Create a new signal in `runtime`.
    pub fn new_in(runtime: &Runtime, value: T, options: SignalOptions) -> Self {
        let id = NodeId::new();
        Self {
            inner: Arc::new(SignalInner {
                id,
                key: options.key.unwrap_or_else(|| id.key(NodeKind::Signal)),
                runtime: runtime.downgrade(),
                value: RwLock::new(value),
                dependents: Mutex::new(IndexMap::new()),
                serializable: options.serializable,
            }),
        }
    }

    /// Get the signal's unique ID.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Get the key this signal is recorded under in snapshots.
    pub fn key(&self) -> &str {
        &self.inner.key
    }

    /// Whether the signal may be captured into a snapshot.
    pub fn is_serializable(&self) -> bool {
        self.inner.serializable
    }

    /// The runtime this signal belongs to, if it is still alive.
    pub fn runtime(&self) -> Option<Runtime> {
        Runtime::upgrade(&self.inner.runtime)
    }

    /// Get the current value.
    ///
    /// If called within a reactive context, this also registers the
    /// current computation as a dependent.
    pub fn get(&self) -> T {
        self.track();
        self.inner.value.read().clone()
    }

    /// Read the current value by reference, tracking like [`get`](Self::get).
    ///
    /// The closure must not write to this signal.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.track();
        f(&*self.inner.value.read())
    }

    /// Get the current value without tracking dependencies.
    pub fn get_untracked(&self) -> T {
        self.inner.value.read().clone()
    }

    /// Get the number of dependents.
    pub fn dependent_count(&self) -> usize {
        self.inner.dependents.lock().len()
    }

    /// Keys of the computeds and effects that currently read this signal.
    pub fn dependent_keys(&self) -> Vec<String> {
        self.inner
            .dependents()
            .iter()
            .filter_map(Subscriber::key)
            .collect()
    }

    pub(crate) fn as_dependency(&self) -> Dependency {
        let node: Arc<dyn SourceNode> = self.inner.clone();
        Dependency::Signal(Arc::downgrade(&node))
    }

    fn track(&self) {
        if let Some(runtime) = self.runtime() {
            runtime.track(&*self.inner, self.as_dependency());
        }
    }
}

impl<T> Signal<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    /// Set a new value and notify dependents.
    ///
    /// Does nothing if `value` equals the current value under `PartialEq`.
    /// For floats that is IEEE equality: writing `NaN` always notifies, and
    /// `0.0` and `-0.0` count as the same value, so switching between them
    /// notifies nobody. Wrap floats in a type with its own `PartialEq` if
    /// that matters.
    pub fn set(&self, value: T) {
        {
            let mut guard = self.inner.value.write();
            if *guard == value {
                return;
            }
            *guard = value;
        }

        let dependents = self.inner.dependents();
        tracing::trace!(signal = %self.inner.key, dependents = dependents.len(), "signal changed");
        if let Some(runtime) = self.runtime() {
            runtime.propagate(dependents);
        }
    }

    /// Update the value using a function.
    ///
    /// This is useful for updates that depend on the current value.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        let new_value = {
            let guard = self.inner.value.read();
            f(&*guard)
        };
        self.set(new_value);
    }
}

impl<T> Clone for Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Signal<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("key", &self.inner.key)
            .field("value", &self.get_untracked())
            .field("dependent_count", &self.dependent_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[test]
    fn signal_get_and_set() {
        let signal = Signal::new(0);
        assert_eq!(signal.get(), 0);

        signal.set(42);
        assert_eq!(signal.get(), 42);
    }

    #[test]
    fn signal_update() {
        let signal = Signal::new(10);
        signal.update(|v| v + 5);
        assert_eq!(signal.get(), 15);
    }

    #[test]
    fn signal_with_borrows_value() {
        let signal = Signal::new(vec![1, 2, 3]);
        assert_eq!(signal.with(|v| v.len()), 3);
    }

    #[test]
    fn signal_schedules_effect_dependents() {
        let runtime = Runtime::new();
        let signal = runtime.signal(0);
        let call_count = Arc::new(AtomicI32::new(0));

        let (signal_clone, count_clone) = (signal.clone(), call_count.clone());
        let _effect = runtime.effect(move || {
            signal_clone.get();
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(signal.dependent_count(), 1);
        assert_eq!(call_count.load(Ordering::SeqCst), 1);

        // Nothing runs inside the setter.
        signal.set(1);
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
        assert_eq!(runtime.scheduler().pending_effects(), 1);

        runtime.flush_sync();
        assert_eq!(call_count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn equal_write_is_a_no_op() {
        let runtime = Runtime::new();
        let signal = runtime.signal(7);
        let signal_clone = signal.clone();
        let _effect = runtime.effect(move || {
            signal_clone.get();
        });

        signal.set(7);
        assert!(runtime.scheduler().is_idle());
        assert_eq!(runtime.pending_microtasks(), 0);
    }

    #[test]
    fn options_control_key_and_serializability() {
        let keyed = Signal::with_options(1, SignalOptions::default().with_key("count"));
        assert_eq!(keyed.key(), "count");
        assert!(keyed.is_serializable());

        let local = Signal::with_options(1, SignalOptions::local());
        assert!(!local.is_serializable());
        assert!(local.key().starts_with('s'));
    }

    #[test]
    fn signal_clone_shares_state() {
        let signal1 = Signal::new(0);
        let signal2 = signal1.clone();

        signal1.set(42);
        assert_eq!(signal2.get(), 42);

        signal2.set(100);
        assert_eq!(signal1.get(), 100);
    }

    #[test]
    fn signal_ids_are_unique() {
        let s1 = Signal::new(0);
        let s2 = Signal::new(0);
        let s3 = Signal::new(0);

        assert_ne!(s1.id(), s2.id());
        assert_ne!(s2.id(), s3.id());
        assert_ne!(s1.id(), s3.id());
    }

    #[test]
    fn float_writes_follow_partial_eq() {
        let runtime = Runtime::new();
        let signal = runtime.signal(0.0f64);
        let signal_clone = signal.clone();
        let _effect = runtime.effect(move || {
            signal_clone.get();
        });

        signal.set(-0.0);
        assert!(runtime.scheduler().is_idle());

        signal.set(f64::NAN);
        runtime.flush_sync();
        signal.set(f64::NAN);
        assert_eq!(runtime.scheduler().pending_effects(), 1);
    }

    #[test]
    fn signal_outlives_its_runtime() {
        let signal = {
            let runtime = Runtime::new();
            runtime.signal(1)
        };
        assert!(signal.runtime().is_none());
        signal.set(2);
        assert_eq!(signal.get(), 2);
    }
}

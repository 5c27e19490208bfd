//! Computed Implementation
//!
//! A Computed is a cached derived value that re-evaluates only when one of
//! its dependencies changes.
//!
//! # How Computeds Work
//!
//! 1. On construction, the computed runs its derivation once to establish a
//!    value and a dependency set.
//!
//! 2. When a dependency changes, the computed is marked dirty and scheduled.
//!    Nothing is recomputed at that point.
//!
//! 3. The next read of a dirty computed (from user code, or from the
//!    scheduler's flush) re-runs the derivation, replacing the old
//!    dependency edges with the ones read this time.
//!
//! 4. After recomputing, the computed notifies the dependents it had before
//!    the run. There is no equality check on the new value: a recompute
//!    always notifies.
//!
//! # Cycles
//!
//! A derivation that reads its own computed, directly or through other
//! computeds, is detected with an in-progress flag. [`Computed::try_get`]
//! reports it as [`GraphError::CyclicDependency`]; [`Computed::get`] panics.

use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use smallvec::SmallVec;

use super::context::FlagGuard;
use super::runtime::{Runtime, RuntimeInner};
use super::subscriber::Subscriber;
use crate::error::GraphError;
use crate::graph::{ComputedNode, Dependency, NodeId, NodeKind, SourceNode};

/// Options accepted when creating a computed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputedOptions {
    /// Whether the computed may appear in a snapshot.
    pub serializable: bool,
    /// Stable key used in snapshots. Defaults to one derived from the id.
    pub key: Option<String>,
    /// Source text of the derivation, shipped only when the serializer is
    /// configured to include functions. Filled in by [`computed!`](crate::computed!).
    pub source: Option<String>,
}

impl ComputedOptions {
    /// Options for a computed that must never leave the process.
    pub fn local() -> Self {
        Self {
            serializable: false,
            ..Self::default()
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn serializable(mut self, serializable: bool) -> Self {
        self.serializable = serializable;
        self
    }
}

impl Default for ComputedOptions {
    fn default() -> Self {
        Self {
            serializable: true,
            key: None,
            source: None,
        }
    }
}

pub(crate) struct ComputedInner<T> {
    id: NodeId,
    key: String,
    runtime: Weak<RuntimeInner>,
    derive: Box<dyn Fn() -> T + Send + Sync>,
    value: RwLock<Option<T>>,
    dirty: AtomicBool,
    evaluating: AtomicBool,
    dependencies: Mutex<IndexMap<NodeId, Dependency>>,
    dependents: Mutex<IndexMap<NodeId, Subscriber>>,
    serializable: bool,
    source: Option<String>,
}

impl<T> ComputedInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// The up-to-date value, recomputing first if dirty.
    fn current(self: &Arc<Self>) -> Result<T, GraphError> {
        if !self.dirty.load(Ordering::Acquire) {
            if let Some(value) = self.value.read().clone() {
                return Ok(value);
            }
        }
        self.recompute()
    }

    fn recompute(self: &Arc<Self>) -> Result<T, GraphError> {
        let Some(_evaluating) = FlagGuard::acquire(&self.evaluating) else {
            return Err(GraphError::CyclicDependency {
                key: self.key.clone(),
            });
        };

        let notify = SourceNode::dependents(&**self);
        self.clear_dependencies();

        let value = match Runtime::upgrade(&self.runtime) {
            Some(runtime) => {
                let node: Arc<dyn ComputedNode> = self.clone();
                let _slot = runtime.context().enter_computed(node);
                (self.derive)()
            }
            None => (self.derive)(),
        };

        *self.value.write() = Some(value.clone());
        self.dirty.store(false, Ordering::Release);
        tracing::trace!(computed = %self.key, dependents = notify.len(), "computed re-evaluated");

        if let Some(runtime) = Runtime::upgrade(&self.runtime) {
            runtime.propagate(notify);
        }
        Ok(value)
    }

    fn clear_dependencies(&self) {
        let old = std::mem::take(&mut *self.dependencies.lock());
        for dependency in old.values() {
            dependency.detach(self.id);
        }
    }
}

impl<T> SourceNode for ComputedInner<T>
where
    T: Clone + Send + Sync + 'static,
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

impl<T> ComputedNode for ComputedInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    fn mark_dirty(&self) -> bool {
        !self.dirty.swap(true, Ordering::AcqRel)
    }

    fn add_dependency(&self, id: NodeId, dependency: Dependency) {
        self.dependencies.lock().insert(id, dependency);
    }

    fn refresh(self: Arc<Self>) {
        if let Err(err) = self.current() {
            tracing::error!(computed = %self.key, error = %err, "computed could not be refreshed");
        }
    }
}

/// A cached derived value that recomputes only when dependencies change.
///
/// # Type Parameters
///
/// - `T`: The type of the computed value. Must be Clone + Send + Sync.
pub struct Computed<T>
where
    T: Clone + Send + Sync + 'static,
{
    inner: Arc<ComputedInner<T>>,
}

impl<T> Computed<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a computed in the current runtime.
    ///
    /// The derivation runs once, immediately.
    pub fn new<F>(derive: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::new_in(&Runtime::current(), derive, ComputedOptions::default())
    }

    /// Create a computed in the current runtime with options.
    pub fn with_options<F>(derive: F, options: ComputedOptions) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::new_in(&Runtime::current(), derive, options)
    }

    /// Create a computed in `runtime`.
    pub fn new_in<F>(runtime: &Runtime, derive: F, options: ComputedOptions) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let id = NodeId::new();
        let inner = Arc::new(ComputedInner {
            id,
            key: options.key.unwrap_or_else(|| id.key(NodeKind::Computed)),
            runtime: runtime.downgrade(),
            derive: Box::new(derive),
            value: RwLock::new(None),
            dirty: AtomicBool::new(true),
            evaluating: AtomicBool::new(false),
            dependencies: Mutex::new(IndexMap::new()),
            dependents: Mutex::new(IndexMap::new()),
            serializable: options.serializable,
            source: options.source,
        });

        if let Err(err) = inner.recompute() {
            tracing::error!(computed = %inner.key, error = %err, "initial evaluation failed");
        }
        Self { inner }
    }

    /// Get the computed's unique ID.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Get the key this computed is recorded under in snapshots.
    pub fn key(&self) -> &str {
        &self.inner.key
    }

    /// Whether the computed may be captured into a snapshot.
    pub fn is_serializable(&self) -> bool {
        self.inner.serializable
    }

    /// Source text of the derivation, if it was captured.
    pub fn source(&self) -> Option<&str> {
        self.inner.source.as_deref()
    }

    /// The runtime this computed belongs to, if it is still alive.
    pub fn runtime(&self) -> Option<Runtime> {
        Runtime::upgrade(&self.inner.runtime)
    }

    /// Get the current value, recomputing if necessary.
    ///
    /// # Panics
    ///
    /// Panics if the computed is read from inside its own derivation.
    pub fn get(&self) -> T {
        match self.try_get() {
            Ok(value) => value,
            Err(err) => panic!("{err}"),
        }
    }

    /// Get the current value, reporting a cyclic read instead of panicking.
    pub fn try_get(&self) -> Result<T, GraphError> {
        if self.inner.evaluating.load(Ordering::Acquire) {
            return Err(GraphError::CyclicDependency {
                key: self.inner.key.clone(),
            });
        }
        self.track();
        self.inner.current()
    }

    /// Get the current value without tracking, recomputing if necessary.
    pub fn get_untracked(&self) -> Result<T, GraphError> {
        self.inner.current()
    }

    /// True when the cached value may be stale.
    pub fn is_dirty(&self) -> bool {
        self.inner.is_dirty()
    }

    /// Number of nodes read during the last evaluation.
    pub fn dependency_count(&self) -> usize {
        self.inner.dependencies.lock().len()
    }

    /// Number of computeds and effects reading this computed.
    pub fn dependent_count(&self) -> usize {
        self.inner.dependents.lock().len()
    }

    /// Keys of the nodes read during the last evaluation.
    pub fn dependency_keys(&self) -> Vec<String> {
        self.inner
            .dependencies
            .lock()
            .values()
            .filter_map(Dependency::key)
            .collect()
    }

    /// Keys of the computeds and effects reading this computed.
    pub fn dependent_keys(&self) -> Vec<String> {
        SourceNode::dependents(&*self.inner)
            .iter()
            .filter_map(Subscriber::key)
            .collect()
    }

    pub(crate) fn as_node(&self) -> Arc<dyn ComputedNode> {
        self.inner.clone()
    }

    fn track(&self) {
        if let Some(runtime) = self.runtime() {
            let node = self.as_node();
            let dependency = Dependency::Computed(Arc::downgrade(&node));
            runtime.track(&*self.inner, dependency);
        }
    }
}

impl<T> Clone for Computed<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Computed<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Computed")
            .field("key", &self.inner.key)
            .field("dirty", &self.is_dirty())
            .field("value", &*self.inner.value.read())
            .field("dependent_count", &self.dependent_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects signals, computeds,
//! and effects. It owns the tracking context, the update scheduler, and the
//! microtask queue that defers flushes.
//!
//! # How It Works
//!
//! 1. When a computed or effect evaluates, the runtime's context records it
//!    as the active reader.
//!
//! 2. When a signal or computed is read, the runtime records the edge in
//!    both directions.
//!
//! 3. When a signal's value changes, the runtime:
//!    a. Marks dependent computeds dirty, recursively
//!    b. Hands dirty computeds and affected effects to the scheduler
//!    c. Queues a flush as a microtask if none is queued yet
//!
//! 4. When the host drains the microtask queue (or calls
//!    [`flush_sync`](Runtime::flush_sync)), dirty computeds resolve first and
//!    effects run after.
//!
//! # Threading
//!
//! Node handles are `Send + Sync`, but a runtime is driven by one thread at a
//! time. Each thread gets its own default runtime through
//! [`Runtime::current`], which is what the free functions use. Explicit
//! runtimes can be created for isolation, e.g. one per request on a server.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;

use super::computed::{Computed, ComputedOptions};
use super::context::ReactiveContext;
use super::effect::{Cleanup, Effect, EffectInner};
use super::signal::{Signal, SignalOptions};
use super::subscriber::Subscriber;
use crate::graph::{ComputedNode, Dependency, NodeId, SourceNode, UpdateScheduler};

/// Upper bound on consecutive flushes performed by one `flush_sync` call.
const MAX_FLUSH_ROUNDS: usize = 100;

/// A deferred unit of work, run when the host drains the microtask queue.
pub type Microtask = Box<dyn FnOnce() + Send>;

pub(crate) struct RuntimeInner {
    context: ReactiveContext,
    scheduler: UpdateScheduler,
    microtasks: Mutex<VecDeque<Microtask>>,
    /// Active effects are owned here so that dropping an `Effect` handle does
    /// not cancel it.
    effects: Mutex<IndexMap<NodeId, Arc<EffectInner>>>,
}

thread_local! {
    static CURRENT: RefCell<Option<Runtime>> = const { RefCell::new(None) };
}

/// Handle to a reactive runtime. Cloning shares the runtime.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    /// Create a new, empty runtime.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RuntimeInner {
                context: ReactiveContext::new(),
                scheduler: UpdateScheduler::new(),
                microtasks: Mutex::new(VecDeque::new()),
                effects: Mutex::new(IndexMap::new()),
            }),
        }
    }

    /// The runtime current on this thread, created on first use.
    pub fn current() -> Self {
        CURRENT.with(|current| {
            current
                .borrow_mut()
                .get_or_insert_with(Runtime::new)
                .clone()
        })
    }

    /// Make this runtime current on this thread until the guard drops.
    pub fn enter(&self) -> RuntimeGuard {
        let previous = CURRENT.with(|current| current.borrow_mut().replace(self.clone()));
        RuntimeGuard { previous }
    }

    /// True if both handles refer to the same runtime.
    pub fn ptr_eq(&self, other: &Runtime) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn downgrade(&self) -> Weak<RuntimeInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn upgrade(inner: &Weak<RuntimeInner>) -> Option<Self> {
        inner.upgrade().map(|inner| Self { inner })
    }

    pub(crate) fn context(&self) -> &ReactiveContext {
        &self.inner.context
    }

    /// The scheduler's bookkeeping, mostly useful for diagnostics.
    pub fn scheduler(&self) -> &UpdateScheduler {
        &self.inner.scheduler
    }

    // ------------------------------------------------------------------
    // Node construction
    // ------------------------------------------------------------------

    /// Create a signal owned by this runtime.
    pub fn signal<T>(&self, value: T) -> Signal<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        Signal::new_in(self, value, SignalOptions::default())
    }

    /// Create a computed owned by this runtime.
    pub fn computed<T, F>(&self, derive: F) -> Computed<T>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        Computed::new_in(self, derive, ComputedOptions::default())
    }

    /// Create an effect owned by this runtime. It runs once immediately.
    pub fn effect<F>(&self, run: F) -> Effect
    where
        F: Fn() + Send + Sync + 'static,
    {
        Effect::new_in(self, move || {
            run();
            None
        })
    }

    /// Create an effect whose runs may return a cleanup.
    pub fn effect_with_cleanup<F>(&self, run: F) -> Effect
    where
        F: Fn() -> Option<Cleanup> + Send + Sync + 'static,
    {
        Effect::new_in(self, run)
    }

    // ------------------------------------------------------------------
    // Tracking
    // ------------------------------------------------------------------

    /// Check if a computation is currently being tracked.
    pub fn is_tracking(&self) -> bool {
        self.inner.context.is_active()
    }

    /// Run `f` without recording any dependencies.
    pub fn untrack<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.inner.context.enter_untracked();
        f()
    }

    /// Record that the active reader (if any) read `source`.
    pub(crate) fn track(&self, source: &dyn SourceNode, dependency: Dependency) {
        if let Some(observer) = self.inner.context.observer() {
            tracing::trace!(reader = %observer.id(), source = source.key(), "dependency recorded");
            source.add_dependent(observer.subscriber());
            observer.add_dependency(source.id(), dependency);
        }
    }

    // ------------------------------------------------------------------
    // Propagation
    // ------------------------------------------------------------------

    /// Notify `dependents` that a value they read has changed.
    pub(crate) fn propagate(&self, dependents: impl IntoIterator<Item = Subscriber>) {
        for subscriber in dependents {
            match subscriber {
                Subscriber::Computed { node, .. } => {
                    if let Some(node) = node.upgrade() {
                        self.mark_computed_dirty(node);
                    }
                }
                Subscriber::Effect { id, node } => self.schedule_effect(id, node),
            }
        }
    }

    /// Mark `node` dirty and walk its dependents. A node that is already
    /// dirty stops the walk, which keeps diamonds from being visited twice.
    pub(crate) fn mark_computed_dirty(&self, node: Arc<dyn ComputedNode>) {
        if !node.mark_dirty() {
            return;
        }
        self.schedule_computed(node.id(), Arc::downgrade(&node));
        self.propagate(node.dependents());
    }

    fn schedule_computed(&self, id: NodeId, node: Weak<dyn ComputedNode>) {
        if self.inner.scheduler.schedule_computed(id, node) {
            self.queue_flush();
        }
    }

    pub(crate) fn schedule_effect(&self, id: NodeId, node: Weak<EffectInner>) {
        if self.inner.scheduler.schedule_effect(id, node) {
            self.queue_flush();
        }
    }

    // ------------------------------------------------------------------
    // Effect ownership
    // ------------------------------------------------------------------

    pub(crate) fn adopt_effect(&self, effect: Arc<EffectInner>) {
        self.inner.effects.lock().insert(effect.id(), effect);
    }

    pub(crate) fn release_effect(&self, id: NodeId) {
        let released = self.inner.effects.lock().shift_remove(&id);
        drop(released);
    }

    /// Number of effects that have not been stopped.
    pub fn active_effect_count(&self) -> usize {
        self.inner.effects.lock().len()
    }

    // ------------------------------------------------------------------
    // Flushing
    // ------------------------------------------------------------------

    fn queue_flush(&self) {
        let runtime = self.downgrade();
        self.queue_microtask(Box::new(move || {
            if let Some(runtime) = Runtime::upgrade(&runtime) {
                runtime.flush();
            }
        }));
    }

    /// One scheduler pass: every pending computed, then every pending effect.
    fn flush(&self) {
        let scheduler = &self.inner.scheduler;
        scheduler.begin_flush();

        let mut computeds = 0usize;
        while let Some(node) = scheduler.next_computed() {
            if let Some(node) = node.upgrade() {
                if node.is_dirty() {
                    node.refresh();
                    computeds += 1;
                }
            }
        }

        let mut effects = 0usize;
        for (_, effect) in scheduler.take_effects() {
            let Some(effect) = effect.upgrade() else {
                continue;
            };
            if effect.is_active() {
                effect.run();
                effects += 1;
            }
        }

        tracing::trace!(computeds, effects, "flush complete");
    }

    /// Flush pending work synchronously instead of waiting for the microtask.
    ///
    /// Flushes repeat until nothing is pending, so effects scheduled by other
    /// effects have also run when this returns.
    pub fn flush_sync(&self) {
        for _ in 0..MAX_FLUSH_ROUNDS {
            if self.inner.scheduler.is_idle() {
                return;
            }
            self.flush();
        }
        if !self.inner.scheduler.is_idle() {
            tracing::error!(
                rounds = MAX_FLUSH_ROUNDS,
                pending_computeds = self.inner.scheduler.pending_computeds(),
                pending_effects = self.inner.scheduler.pending_effects(),
                "updates did not settle; leaving the rest for the next flush"
            );
        }
    }

    /// Run `f`. Writes are already deferred to the next flush, so this does
    /// not change scheduling today; it marks the place where a batch ends.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        f()
    }

    // ------------------------------------------------------------------
    // Microtasks
    // ------------------------------------------------------------------

    /// Queue `task` to run at the end of the current turn.
    pub fn queue_microtask(&self, task: Microtask) {
        self.inner.microtasks.lock().push_back(task);
    }

    /// Run queued microtasks until the queue is empty, including tasks queued
    /// while draining. Returns how many ran.
    ///
    /// Hosts call this once their current turn of synchronous work is done.
    pub fn run_microtasks(&self) -> usize {
        let mut ran = 0;
        loop {
            let task = self.inner.microtasks.lock().pop_front();
            let Some(task) = task else {
                return ran;
            };
            task();
            ran += 1;
        }
    }

    /// Number of microtasks waiting to run.
    pub fn pending_microtasks(&self) -> usize {
        self.inner.microtasks.lock().len()
    }

    /// End the current turn: yield to the async executor once, then drain the
    /// microtask queue.
    pub async fn tick(&self) -> usize {
        tokio::task::yield_now().await;
        self.run_microtasks()
    }
}

impl Drop for RuntimeInner {
    fn drop(&mut self) {
        // Effects cannot outlive the runtime that schedules them.
        for (_, effect) in self.effects.get_mut().drain(..) {
            effect.stop();
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("active_effects", &self.active_effect_count())
            .field("pending_computeds", &self.inner.scheduler.pending_computeds())
            .field("pending_effects", &self.inner.scheduler.pending_effects())
            .field("pending_microtasks", &self.pending_microtasks())
            .finish()
    }
}

/// Restores the previously current runtime when dropped.
pub struct RuntimeGuard {
    previous: Option<Runtime>,
}

impl Drop for RuntimeGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT.with(|current| *current.borrow_mut() = previous);
    }
}

// ----------------------------------------------------------------------------
// Free functions over the current runtime
// ----------------------------------------------------------------------------

/// Create a signal in the current runtime.
pub fn signal<T>(value: T) -> Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    Runtime::current().signal(value)
}

/// Create a signal in the current runtime with explicit options.
pub fn signal_with<T>(value: T, options: SignalOptions) -> Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    Signal::new_in(&Runtime::current(), value, options)
}

/// Create a computed in the current runtime.
pub fn computed<T, F>(derive: F) -> Computed<T>
where
    T: Clone + Send + Sync + 'static,
    F: Fn() -> T + Send + Sync + 'static,
{
    Runtime::current().computed(derive)
}

/// Create an effect in the current runtime.
pub fn effect<F>(run: F) -> Effect
where
    F: Fn() + Send + Sync + 'static,
{
    Runtime::current().effect(run)
}

/// Flush the current runtime synchronously.
pub fn flush_sync() {
    Runtime::current().flush_sync();
}

/// Run `f` as one batch in the current runtime.
pub fn batch<R>(f: impl FnOnce() -> R) -> R {
    Runtime::current().batch(f)
}

/// Run `f` without tracking in the current runtime.
pub fn untrack<R>(f: impl FnOnce() -> R) -> R {
    Runtime::current().untrack(f)
}

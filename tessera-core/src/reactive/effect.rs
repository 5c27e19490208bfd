//! Effect Implementation
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its function immediately to establish
//!    initial dependencies.
//!
//! 2. When any dependency changes, the effect is handed to the scheduler and
//!    re-runs during the next flush, after dirty computeds have resolved.
//!
//! 3. Before re-running, the effect runs the cleanup returned by its previous
//!    run, clears its old dependencies, and tracks new ones during execution.
//!
//! # Differences from Computed
//!
//! - Computeds return a value; effects do not.
//! - Computeds are lazy (compute on access); effects are eager (run on flush).
//!
//! # Ownership
//!
//! An active effect is owned by its runtime, so dropping the [`Effect`]
//! handle does not cancel it. Call [`Effect::stop`] to cancel.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;

use super::context::FlagGuard;
use super::runtime::{Runtime, RuntimeInner};
use crate::graph::{Dependency, NodeId, NodeKind};

/// Returned by an effect run; called before the next run and on stop.
pub type Cleanup = Box<dyn FnOnce() + Send>;

pub(crate) struct EffectInner {
    id: NodeId,
    key: String,
    runtime: Weak<RuntimeInner>,
    run: Box<dyn Fn() -> Option<Cleanup> + Send + Sync>,
    cleanup: Mutex<Option<Cleanup>>,
    dependencies: Mutex<IndexMap<NodeId, Dependency>>,
    active: AtomicBool,
    running: AtomicBool,
    run_count: AtomicUsize,
}

impl EffectInner {
    pub(crate) fn id(&self) -> NodeId {
        self.id
    }

    pub(crate) fn key(&self) -> &str {
        &self.key
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn add_dependency(&self, id: NodeId, dependency: Dependency) {
        self.dependencies.lock().insert(id, dependency);
    }

    /// Run the effect function within a tracking context.
    pub(crate) fn run(self: &Arc<Self>) {
        if !self.is_active() {
            return;
        }
        let Some(_running) = FlagGuard::acquire(&self.running) else {
            tracing::warn!(effect = %self.key, "effect triggered itself while running; skipped");
            return;
        };

        self.run_cleanup();
        self.clear_dependencies();

        let cleanup = match Runtime::upgrade(&self.runtime) {
            Some(runtime) => {
                let _slot = runtime.context().enter_effect(self.clone());
                (self.run)()
            }
            None => (self.run)(),
        };
        self.run_count.fetch_add(1, Ordering::Relaxed);

        if self.is_active() {
            if let Some(cleanup) = cleanup {
                *self.cleanup.lock() = Some(cleanup);
            }
            return;
        }

        // Stopped from inside its own run: reads made after the stop were
        // tracked again and must be dropped.
        self.clear_dependencies();
        if let Some(cleanup) = cleanup {
            cleanup();
        }
    }

    /// Stop the effect. Idempotent.
    pub(crate) fn stop(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        self.run_cleanup();
        self.clear_dependencies();
        if let Some(runtime) = Runtime::upgrade(&self.runtime) {
            runtime.release_effect(self.id);
        }
        tracing::debug!(effect = %self.key, "effect stopped");
    }

    fn run_cleanup(&self) {
        let cleanup = self.cleanup.lock().take();
        if let Some(cleanup) = cleanup {
            cleanup();
        }
    }

    fn clear_dependencies(&self) {
        let old = std::mem::take(&mut *self.dependencies.lock());
        for dependency in old.values() {
            dependency.detach(self.id);
        }
    }
}

/// A side-effecting computation that runs when dependencies change.
///
/// # Example
///
/// ```rust,ignore
/// let count = Signal::new(0);
///
/// let effect = Effect::new(move || {
///     println!("Count is: {}", count.get());
/// });
///
/// count.set(5);
/// flush_sync(); // Prints: "Count is: 5"
/// ```
pub struct Effect {
    inner: Arc<EffectInner>,
}

impl Effect {
    /// Create an effect in the current runtime.
    ///
    /// The function runs immediately to establish initial dependencies.
    pub fn new<F>(run: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Runtime::current().effect(run)
    }

    /// Create an effect in the current runtime whose runs may return a cleanup.
    pub fn with_cleanup<F>(run: F) -> Self
    where
        F: Fn() -> Option<Cleanup> + Send + Sync + 'static,
    {
        Self::new_in(&Runtime::current(), run)
    }

    /// Create an effect in `runtime`.
    pub fn new_in<F>(runtime: &Runtime, run: F) -> Self
    where
        F: Fn() -> Option<Cleanup> + Send + Sync + 'static,
    {
        let id = NodeId::new();
        let inner = Arc::new(EffectInner {
            id,
            key: id.key(NodeKind::Effect),
            runtime: runtime.downgrade(),
            run: Box::new(run),
            cleanup: Mutex::new(None),
            dependencies: Mutex::new(IndexMap::new()),
            active: AtomicBool::new(true),
            running: AtomicBool::new(false),
            run_count: AtomicUsize::new(0),
        });

        runtime.adopt_effect(inner.clone());
        inner.run();
        Self { inner }
    }

    /// Get the effect's unique ID.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    pub fn key(&self) -> &str {
        &self.inner.key
    }

    /// Stop the effect: run its pending cleanup, drop its dependencies, and
    /// never run it again. Calling this more than once has no further effect.
    pub fn stop(&self) {
        self.inner.stop();
    }

    /// False once the effect has been stopped.
    pub fn is_active(&self) -> bool {
        self.inner.is_active()
    }

    /// Get the number of times the effect has run.
    pub fn run_count(&self) -> usize {
        self.inner.run_count.load(Ordering::Relaxed)
    }

    /// Get the number of dependencies read during the last run.
    pub fn dependency_count(&self) -> usize {
        self.inner.dependencies.lock().len()
    }

    pub(crate) fn inner(&self) -> &Arc<EffectInner> {
        &self.inner
    }
}

impl Clone for Effect {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl std::fmt::Debug for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Effect")
            .field("key", &self.inner.key)
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .field("active", &self.is_active())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI32;

    #[test]
    fn effect_runs_on_creation() {
        let run_count = Arc::new(AtomicI32::new(0));
        let run_count_clone = run_count.clone();

        let effect = Effect::new(move || {
            run_count_clone.fetch_add(1, Ordering::SeqCst);
        });

        // Effect should have run once on creation
        assert_eq!(run_count.load(Ordering::SeqCst), 1);
        assert_eq!(effect.run_count(), 1);
    }

    #[test]
    fn effect_reruns_on_flush() {
        let runtime = Runtime::new();
        let source = runtime.signal(0);
        let source_clone = source.clone();
        let effect = runtime.effect(move || {
            source_clone.get();
        });

        source.set(1);
        assert_eq!(effect.run_count(), 1);
        runtime.flush_sync();
        assert_eq!(effect.run_count(), 2);

        source.set(2);
        runtime.flush_sync();
        assert_eq!(effect.run_count(), 3);
    }

    #[test]
    fn effect_does_not_run_after_stop() {
        let runtime = Runtime::new();
        let source = runtime.signal(0);
        let source_clone = source.clone();
        let effect = runtime.effect(move || {
            source_clone.get();
        });

        effect.stop();
        assert!(!effect.is_active());
        assert_eq!(effect.dependency_count(), 0);
        assert_eq!(source.dependent_count(), 0);
        assert_eq!(runtime.active_effect_count(), 0);

        source.set(1);
        runtime.flush_sync();
        assert_eq!(effect.run_count(), 1);
    }

    #[test]
    fn stop_after_scheduling_skips_the_run() {
        let runtime = Runtime::new();
        let source = runtime.signal(0);
        let source_clone = source.clone();
        let effect = runtime.effect(move || {
            source_clone.get();
        });

        source.set(1);
        effect.stop();
        runtime.flush_sync();
        assert_eq!(effect.run_count(), 1);
    }

    #[test]
    fn cleanup_runs_before_rerun_and_on_stop() {
        let runtime = Runtime::new();
        let source = runtime.signal(0);
        let cleanups = Arc::new(AtomicI32::new(0));

        let (source_clone, cleanups_clone) = (source.clone(), cleanups.clone());
        let effect = runtime.effect_with_cleanup(move || {
            source_clone.get();
            let cleanups = cleanups_clone.clone();
            Some(Box::new(move || {
                cleanups.fetch_add(1, Ordering::SeqCst);
            }) as Cleanup)
        });
        assert_eq!(cleanups.load(Ordering::SeqCst), 0);

        source.set(1);
        runtime.flush_sync();
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);

        effect.stop();
        assert_eq!(cleanups.load(Ordering::SeqCst), 2);

        // A second stop is a no-op.
        effect.stop();
        assert_eq!(cleanups.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn dropping_the_handle_keeps_the_effect_alive() {
        let runtime = Runtime::new();
        let source = runtime.signal(0);
        let seen = Arc::new(AtomicI32::new(0));

        let (source_clone, seen_clone) = (source.clone(), seen.clone());
        drop(runtime.effect(move || {
            seen_clone.store(source_clone.get(), Ordering::SeqCst);
        }));

        source.set(9);
        runtime.flush_sync();
        assert_eq!(seen.load(Ordering::SeqCst), 9);
        assert_eq!(runtime.active_effect_count(), 1);
    }

    #[test]
    fn effect_reads_through_computed() {
        let runtime = Runtime::new();
        let source = runtime.signal(2);
        let source_clone = source.clone();
        let squared = runtime.computed(move || source_clone.get() * source_clone.get());

        let seen = Arc::new(AtomicI32::new(0));
        let (squared_clone, seen_clone) = (squared.clone(), seen.clone());
        let effect = runtime.effect(move || {
            seen_clone.store(squared_clone.get(), Ordering::SeqCst);
        });
        assert_eq!(seen.load(Ordering::SeqCst), 4);
        assert_eq!(effect.dependency_count(), 1);

        source.set(3);
        runtime.flush_sync();
        assert_eq!(seen.load(Ordering::SeqCst), 9);
    }

    #[test]
    fn stopping_itself_mid_run_leaves_no_dependencies() {
        let runtime = Runtime::new();
        let trigger = runtime.signal(0);
        let later = runtime.signal(0);
        let handle: Arc<Mutex<Option<Effect>>> = Arc::new(Mutex::new(None));

        let (trigger_clone, later_clone, handle_clone) =
            (trigger.clone(), later.clone(), handle.clone());
        let effect = runtime.effect(move || {
            if trigger_clone.get() > 0 {
                if let Some(me) = handle_clone.lock().as_ref() {
                    me.stop();
                }
            }
            later_clone.get();
        });
        *handle.lock() = Some(effect.clone());
        assert_eq!(later.dependent_count(), 1);

        trigger.set(1);
        runtime.flush_sync();

        assert!(!effect.is_active());
        assert_eq!(effect.run_count(), 2);
        assert_eq!(effect.dependency_count(), 0);
        assert_eq!(trigger.dependent_count(), 0);
        assert_eq!(later.dependent_count(), 0);

        // Later writes schedule nothing.
        later.set(5);
        assert!(runtime.scheduler().is_idle());
    }

    #[test]
    fn effect_clone_shares_state() {
        let effect1 = Effect::new(|| {});
        let effect2 = effect1.clone();

        assert_eq!(effect1.id(), effect2.id());
        assert_eq!(effect2.run_count(), 1);

        effect1.stop();
        assert!(!effect2.is_active());
    }
}

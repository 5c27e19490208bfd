//! Update Scheduler
//!
//! The scheduler batches invalidations into a single deferred flush.
//!
//! # Algorithm
//!
//! 1. A signal write marks dependent computeds dirty and hands both the
//!    dirty computeds and the affected effects to the scheduler.
//!
//! 2. The first item scheduled while no flush is queued asks the runtime to
//!    queue one (as a microtask) and sets the latch. Later items in the same
//!    turn just join the pending sets.
//!
//! 3. A flush clears the latch first, so anything scheduled while the flush
//!    runs queues a fresh flush instead of being dropped.
//!
//! 4. Pending computeds are drained before any effect runs. Reading a dirty
//!    computed may dirty more computeds, which join the same drain.
//!
//! 5. The effect set is then taken as a whole and every still-active effect
//!    runs once. Stopped effects are skipped here rather than removed when
//!    they are stopped.
//!
//! The scheduler itself only holds the bookkeeping; the runtime drives the
//! passes because it owns the tracking context the passes need.

use std::collections::{HashSet, VecDeque};
use std::sync::Weak;

use indexmap::IndexMap;
use parking_lot::Mutex;

use super::node::{ComputedNode, NodeId};
use crate::reactive::EffectInner;

#[derive(Default)]
struct PendingWork {
    /// Drain order of dirty computeds; `queued` mirrors its ids so a
    /// computed is only queued once until it is popped.
    computeds: VecDeque<(NodeId, Weak<dyn ComputedNode>)>,
    queued: HashSet<NodeId>,
    effects: IndexMap<NodeId, Weak<EffectInner>>,
    flush_queued: bool,
}

impl PendingWork {
    /// Set the latch. Returns true if it was clear, meaning a flush has to be
    /// queued by the caller.
    fn latch(&mut self) -> bool {
        !std::mem::replace(&mut self.flush_queued, true)
    }
}

/// Pending work for one runtime.
pub struct UpdateScheduler {
    pending: Mutex<PendingWork>,
}

impl UpdateScheduler {
    /// Create a new idle scheduler.
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(PendingWork::default()),
        }
    }

    /// Add a dirty computed to the pending set.
    ///
    /// Returns true when the caller must queue a flush.
    pub(crate) fn schedule_computed(&self, id: NodeId, node: Weak<dyn ComputedNode>) -> bool {
        let mut pending = self.pending.lock();
        if pending.queued.insert(id) {
            pending.computeds.push_back((id, node));
        }
        pending.latch()
    }

    /// Add an effect to the pending set.
    ///
    /// Returns true when the caller must queue a flush.
    pub(crate) fn schedule_effect(&self, id: NodeId, node: Weak<EffectInner>) -> bool {
        let mut pending = self.pending.lock();
        pending.effects.entry(id).or_insert(node);
        pending.latch()
    }

    /// Start a flush by clearing the latch.
    pub(crate) fn begin_flush(&self) {
        self.pending.lock().flush_queued = false;
    }

    /// Pop the oldest pending computed.
    pub(crate) fn next_computed(&self) -> Option<Weak<dyn ComputedNode>> {
        let mut pending = self.pending.lock();
        let (id, node) = pending.computeds.pop_front()?;
        pending.queued.remove(&id);
        Some(node)
    }

    /// Take every pending effect, leaving the set empty.
    pub(crate) fn take_effects(&self) -> IndexMap<NodeId, Weak<EffectInner>> {
        std::mem::take(&mut self.pending.lock().effects)
    }

    /// True when neither set holds any work.
    pub fn is_idle(&self) -> bool {
        let pending = self.pending.lock();
        pending.computeds.is_empty() && pending.effects.is_empty()
    }

    /// True while a flush is queued and has not started yet.
    pub fn is_flush_queued(&self) -> bool {
        self.pending.lock().flush_queued
    }

    /// Number of computeds waiting for the next flush.
    pub fn pending_computeds(&self) -> usize {
        self.pending.lock().computeds.len()
    }

    /// Number of effects waiting for the next flush.
    pub fn pending_effects(&self) -> usize {
        self.pending.lock().effects.len()
    }
}

impl Default for UpdateScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use smallvec::SmallVec;

    use crate::graph::node::{Dependency, SourceNode};
    use crate::reactive::Subscriber;

    struct MockComputed {
        id: NodeId,
        key: String,
        dirty: AtomicBool,
    }

    impl MockComputed {
        fn new() -> Arc<Self> {
            let id = NodeId::new();
            Arc::new(Self {
                id,
                key: format!("mock{}", id.raw()),
                dirty: AtomicBool::new(true),
            })
        }
    }

    impl SourceNode for MockComputed {
        fn id(&self) -> NodeId {
            self.id
        }

        fn key(&self) -> &str {
            &self.key
        }

        fn add_dependent(&self, _subscriber: Subscriber) {}

        fn remove_dependent(&self, _id: NodeId) {}

        fn dependents(&self) -> SmallVec<[Subscriber; 4]> {
            SmallVec::new()
        }
    }

    impl ComputedNode for MockComputed {
        fn is_dirty(&self) -> bool {
            self.dirty.load(Ordering::SeqCst)
        }

        fn mark_dirty(&self) -> bool {
            !self.dirty.swap(true, Ordering::SeqCst)
        }

        fn add_dependency(&self, _id: NodeId, _dependency: Dependency) {}

        fn refresh(self: Arc<Self>) {
            self.dirty.store(false, Ordering::SeqCst);
        }
    }

    fn weak(node: &Arc<MockComputed>) -> Weak<dyn ComputedNode> {
        let node: Arc<dyn ComputedNode> = node.clone();
        Arc::downgrade(&node)
    }

    #[test]
    fn first_schedule_requests_a_flush() {
        let scheduler = UpdateScheduler::new();
        let a = MockComputed::new();
        let b = MockComputed::new();

        assert!(scheduler.schedule_computed(a.id, weak(&a)));
        assert!(!scheduler.schedule_computed(b.id, weak(&b)));
        assert!(scheduler.is_flush_queued());
        assert_eq!(scheduler.pending_computeds(), 2);
    }

    #[test]
    fn duplicate_schedules_coalesce() {
        let scheduler = UpdateScheduler::new();
        let a = MockComputed::new();

        scheduler.schedule_computed(a.id, weak(&a));
        scheduler.schedule_computed(a.id, weak(&a));
        scheduler.schedule_computed(a.id, weak(&a));

        assert_eq!(scheduler.pending_computeds(), 1);
    }

    #[test]
    fn begin_flush_clears_latch() {
        let scheduler = UpdateScheduler::new();
        let a = MockComputed::new();
        let b = MockComputed::new();

        scheduler.schedule_computed(a.id, weak(&a));
        scheduler.begin_flush();
        assert!(!scheduler.is_flush_queued());

        // Work scheduled mid-flush asks for a new flush.
        assert!(scheduler.schedule_computed(b.id, weak(&b)));
    }

    #[test]
    fn computeds_drain_in_insertion_order() {
        let scheduler = UpdateScheduler::new();
        let nodes: Vec<_> = (0..3).map(|_| MockComputed::new()).collect();
        for node in &nodes {
            scheduler.schedule_computed(node.id, weak(node));
        }

        let mut order = Vec::new();
        while let Some(node) = scheduler.next_computed() {
            order.push(node.upgrade().unwrap().id());
        }

        let expected: Vec<_> = nodes.iter().map(|n| n.id).collect();
        assert_eq!(order, expected);
        assert!(scheduler.is_idle());
    }

    #[test]
    fn popped_computed_can_be_queued_again() {
        let scheduler = UpdateScheduler::new();
        let a = MockComputed::new();
        let b = MockComputed::new();
        scheduler.schedule_computed(a.id, weak(&a));
        scheduler.schedule_computed(b.id, weak(&b));

        let first = scheduler.next_computed().unwrap().upgrade().unwrap();
        assert_eq!(first.id(), a.id);

        // Re-dirtied during the same drain: queued behind b, not dropped.
        scheduler.schedule_computed(a.id, weak(&a));
        scheduler.schedule_computed(b.id, weak(&b));
        assert_eq!(scheduler.pending_computeds(), 2);

        let order: Vec<_> = std::iter::from_fn(|| scheduler.next_computed())
            .map(|node| node.upgrade().unwrap().id())
            .collect();
        assert_eq!(order, vec![b.id, a.id]);
    }

    #[test]
    fn large_fan_out_drains_completely() {
        let scheduler = UpdateScheduler::new();
        let nodes: Vec<_> = (0..10_000).map(|_| MockComputed::new()).collect();
        for node in &nodes {
            scheduler.schedule_computed(node.id, weak(node));
        }

        let drained = std::iter::from_fn(|| scheduler.next_computed()).count();
        assert_eq!(drained, nodes.len());
        assert!(scheduler.is_idle());
    }

    #[test]
    fn take_effects_empties_the_set() {
        let scheduler = UpdateScheduler::new();
        let effects = scheduler.take_effects();
        assert!(effects.is_empty());
        assert!(scheduler.is_idle());
    }
}

//! Reactive Context
//!
//! The reactive context tracks which computation is currently running.
//! This enables automatic dependency tracking: when a signal is read,
//! we can register the current computation as a dependent.
//!
//! # Implementation
//!
//! The context has exactly two slots: the active computed and the active
//! effect. Entering a computation saves the previous slots and returns a
//! guard that restores them when dropped, so nesting works without a stack.
//! A computed evaluated from inside an effect occupies the computed slot
//! while the effect slot stays set; reads are attributed to the computed.
//!
//! The context lives on a [`Runtime`](super::Runtime) rather than in a
//! global, so separate runtimes never see each other's readers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::effect::EffectInner;
use super::subscriber::Observer;
use crate::graph::ComputedNode;

#[derive(Clone, Default)]
struct Slots {
    computed: Option<Arc<dyn ComputedNode>>,
    effect: Option<Arc<EffectInner>>,
}

/// The tracking context for one runtime.
#[derive(Default)]
pub struct ReactiveContext {
    slots: Mutex<Slots>,
}

impl ReactiveContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if a computation is currently being tracked.
    pub fn is_active(&self) -> bool {
        let slots = self.slots.lock();
        slots.computed.is_some() || slots.effect.is_some()
    }

    /// The reader that should receive the next dependency edge, if any.
    ///
    /// The computed slot wins when both are set.
    pub(crate) fn observer(&self) -> Option<Observer> {
        let slots = self.slots.lock();
        if let Some(computed) = &slots.computed {
            return Some(Observer::Computed(computed.clone()));
        }
        slots.effect.clone().map(Observer::Effect)
    }

    /// Make `node` the active computed until the guard drops.
    pub(crate) fn enter_computed(&self, node: Arc<dyn ComputedNode>) -> ContextGuard<'_> {
        self.swap(|slots| Slots {
            computed: Some(node),
            effect: slots.effect.clone(),
        })
    }

    /// Make `node` the active effect until the guard drops. The computed slot
    /// is cleared for the duration so the effect's reads are its own.
    pub(crate) fn enter_effect(&self, node: Arc<EffectInner>) -> ContextGuard<'_> {
        self.swap(|_| Slots {
            computed: None,
            effect: Some(node),
        })
    }

    /// Clear both slots until the guard drops.
    pub(crate) fn enter_untracked(&self) -> ContextGuard<'_> {
        self.swap(|_| Slots::default())
    }

    fn swap(&self, next: impl FnOnce(&Slots) -> Slots) -> ContextGuard<'_> {
        let saved = {
            let mut slots = self.slots.lock();
            let next = next(&slots);
            std::mem::replace(&mut *slots, next)
        };
        ContextGuard {
            context: self,
            saved: Some(saved),
        }
    }
}

/// Restores the previous slots when dropped, including on unwind.
pub(crate) struct ContextGuard<'a> {
    context: &'a ReactiveContext,
    saved: Option<Slots>,
}

impl Drop for ContextGuard<'_> {
    fn drop(&mut self) {
        if let Some(saved) = self.saved.take() {
            let current = std::mem::replace(&mut *self.context.slots.lock(), saved);
            // Release node handles outside the lock.
            drop(current);
        }
    }
}

/// Clears an in-progress flag when dropped.
pub(crate) struct FlagGuard<'a>(&'a AtomicBool);

impl<'a> FlagGuard<'a> {
    /// Set `flag`. Returns `None` if it was already set.
    pub(crate) fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        if flag.swap(true, Ordering::AcqRel) {
            None
        } else {
            Some(Self(flag))
        }
    }
}

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

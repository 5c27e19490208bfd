//! Reactive Primitives
//!
//! This module implements the core reactive system: signals, computeds, and
//! effects, coordinated by a [`Runtime`].
//!
//! # Concepts
//!
//! ## Signals
//!
//! A Signal is a container for mutable state. When a signal's value is read
//! within a tracking context (such as a computed or effect), the signal
//! registers that context as a dependent. When the signal's value changes,
//! dependents are marked dirty or scheduled.
//!
//! ## Computeds
//!
//! A Computed is a derived value that caches its result. It re-evaluates only
//! when one of its dependencies changed and someone reads it, or when the
//! scheduler flushes.
//!
//! ## Effects
//!
//! An Effect is a side-effecting computation that re-runs, on the next
//! flush, whenever its dependencies change.
//!
//! # Scheduling
//!
//! Writes never run user code directly. They queue at most one flush as a
//! microtask on the runtime; the host drains the queue with
//! [`Runtime::run_microtasks`] or [`Runtime::tick`], or forces the work with
//! [`flush_sync`].

mod computed;
mod context;
mod effect;
mod runtime;
mod signal;
mod subscriber;

pub use computed::{Computed, ComputedOptions};
pub use context::ReactiveContext;
pub use effect::{Cleanup, Effect};
pub use runtime::{
    batch, computed, effect, flush_sync, signal, signal_with, untrack, Microtask, Runtime,
    RuntimeGuard,
};
pub use signal::{Signal, SignalOptions};

pub(crate) use effect::EffectInner;
pub(crate) use subscriber::Subscriber;

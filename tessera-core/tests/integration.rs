//! Integration Tests for Reactive System
//!
//! These tests verify that signals, computeds, and effects work together
//! through the scheduler.

use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tessera_core::reactive::{Computed, Runtime, Signal};

/// Test that a computed tracks signal dependencies without manual marking.
#[test]
fn computed_tracks_signal_dependency() {
    let runtime = Runtime::new();
    let signal = runtime.signal(10);

    // Create a computed that reads from the signal
    let signal_clone = signal.clone();
    let computed = runtime.computed(move || signal_clone.get() * 2);

    assert_eq!(computed.get(), 20);
    assert_eq!(signal.dependent_count(), 1);

    // The write marks the computed dirty; the next read recomputes
    signal.set(5);
    assert!(computed.is_dirty());
    assert_eq!(computed.get(), 10);
}

/// Test that an effect re-runs on flush after a dependency changes.
#[test]
fn effect_tracks_signal_dependency() {
    let runtime = Runtime::new();
    let signal = runtime.signal(0);
    let observed_value = Arc::new(AtomicI32::new(-1));
    let observed_clone = observed_value.clone();

    let signal_clone = signal.clone();
    let _effect = runtime.effect(move || {
        observed_clone.store(signal_clone.get(), Ordering::SeqCst);
    });

    // Effect runs on creation, captures initial value
    assert_eq!(observed_value.load(Ordering::SeqCst), 0);

    // The setter does not run the effect
    signal.set(42);
    assert_eq!(observed_value.load(Ordering::SeqCst), 0);

    // Draining the microtask queue does
    runtime.run_microtasks();
    assert_eq!(observed_value.load(Ordering::SeqCst), 42);
}

/// Diamond: base feeds left and right, both feed top.
#[test]
fn diamond_recomputes_sink_once() {
    let runtime = Runtime::new();
    let base = runtime.signal(1);
    let top_runs = Arc::new(AtomicUsize::new(0));

    let b = base.clone();
    let left = runtime.computed(move || b.get() + 1);
    let b = base.clone();
    let right = runtime.computed(move || b.get() * 2);

    let (l, r, runs) = (left.clone(), right.clone(), top_runs.clone());
    let top = runtime.computed(move || {
        runs.fetch_add(1, Ordering::SeqCst);
        l.get() + r.get()
    });
    assert_eq!(top.get(), 4);
    assert_eq!(top_runs.load(Ordering::SeqCst), 1);

    base.set(2);
    runtime.flush_sync();

    assert_eq!(top.get(), 7);
    assert_eq!(top_runs.load(Ordering::SeqCst), 2);
}

/// Several writes before a flush produce one effect run.
#[test]
fn writes_in_one_turn_are_batched() {
    let runtime = Runtime::new();
    let signal = runtime.signal(0);
    let signal_clone = signal.clone();
    let effect = runtime.effect(move || {
        signal_clone.get();
    });

    runtime.batch(|| {
        signal.set(1);
        signal.set(2);
        signal.set(3);
    });
    runtime.flush_sync();

    assert_eq!(effect.run_count(), 2);
}

/// Effects observe computeds only after they have resolved.
#[test]
fn effects_never_see_stale_computeds() {
    let runtime = Runtime::new();
    let first = runtime.signal("Ada".to_owned());
    let last = runtime.signal("Lovelace".to_owned());

    let (f, l) = (first.clone(), last.clone());
    let full_name = runtime.computed(move || format!("{} {}", f.get(), l.get()));

    let seen = Arc::new(Mutex::new(Vec::new()));
    let (name, f, seen_clone) = (full_name.clone(), first.clone(), seen.clone());
    let _effect = runtime.effect(move || {
        let first = f.get();
        let full = name.get();
        seen_clone.lock().unwrap().push((first, full));
    });

    first.set("Augusta".to_owned());
    runtime.flush_sync();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[1], ("Augusta".to_owned(), "Augusta Lovelace".to_owned()));
}

/// An effect that writes a signal read by another effect settles in one
/// `flush_sync` call.
#[test]
fn cascading_effects_settle() {
    let runtime = Runtime::new();
    let input = runtime.signal(1);
    let mirrored = runtime.signal(0);
    let observed = Arc::new(AtomicI32::new(0));

    let (i, m) = (input.clone(), mirrored.clone());
    let _copy = runtime.effect(move || m.set(i.get() * 100));

    let (m, observed_clone) = (mirrored.clone(), observed.clone());
    let _watch = runtime.effect(move || observed_clone.store(m.get(), Ordering::SeqCst));
    assert_eq!(observed.load(Ordering::SeqCst), 100);

    input.set(2);
    runtime.flush_sync();
    assert_eq!(observed.load(Ordering::SeqCst), 200);
    assert!(runtime.scheduler().is_idle());
}

/// Test effect stop prevents execution.
#[test]
fn stopped_effect_does_not_run() {
    let runtime = Runtime::new();
    let signal = runtime.signal(0);
    let run_count = Arc::new(AtomicI32::new(0));

    let (signal_clone, run_clone) = (signal.clone(), run_count.clone());
    let effect = runtime.effect(move || {
        signal_clone.get();
        run_clone.fetch_add(1, Ordering::SeqCst);
    });

    // Schedule, then stop before the flush
    signal.set(1);
    effect.stop();
    effect.stop();
    runtime.flush_sync();

    assert_eq!(run_count.load(Ordering::SeqCst), 1);
    assert_eq!(signal.dependent_count(), 0);
}

/// Reads inside `untrack` do not become dependencies.
#[test]
fn untracked_reads_do_not_subscribe() {
    let runtime = Runtime::new();
    let tracked = runtime.signal(1);
    let ignored = runtime.signal(10);

    let (t, i, rt) = (tracked.clone(), ignored.clone(), runtime.clone());
    let sum = runtime.computed(move || t.get() + rt.untrack(|| i.get()));
    assert_eq!(sum.get(), 11);

    ignored.set(20);
    assert!(!sum.is_dirty());
    assert_eq!(sum.get(), 11);

    tracked.set(2);
    assert_eq!(sum.get(), 22);
}

/// The thread's current runtime backs the free functions.
#[test]
fn free_functions_use_the_current_runtime() {
    let runtime = Runtime::new();
    let _guard = runtime.enter();

    let count = tessera_core::signal(3);
    let c = count.clone();
    let tripled = tessera_core::computed!(move || c.get() * 3);
    assert!(tripled.source().unwrap().contains("c.get() * 3"));
    assert!(count.runtime().unwrap().ptr_eq(&runtime));

    count.set(4);
    tessera_core::flush_sync();
    assert_eq!(tripled.get(), 12);
}

/// Separate runtimes do not share scheduling.
#[test]
fn runtimes_are_isolated() {
    let a = Runtime::new();
    let b = Runtime::new();
    let in_a: Signal<i32> = a.signal(0);
    let a_clone = in_a.clone();
    let _doubled: Computed<i32> = a.computed(move || a_clone.get() * 2);

    in_a.set(1);
    assert_eq!(a.pending_microtasks(), 1);
    assert_eq!(b.pending_microtasks(), 0);
}

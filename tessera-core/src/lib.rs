//! Tessera Core
//!
//! This crate provides the core runtime for the Tessera web framework.
//! It implements:
//!
//! - Reactive primitives (signals, computeds, effects)
//! - A batched update scheduler driven by a microtask queue
//! - Resumability: capturing reactive state on the server and restoring it,
//!   together with its event wiring, on the client
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: Core reactive primitives and dependency tracking
//! - `graph`: Node identity, edge variants and the update scheduler
//! - `resume`: Snapshot schema, serializer and client bootstrap
//! - `error`: Error types shared by the modules above
//!
//! # Example
//!
//! ```rust,ignore
//! use tessera_core::reactive::{effect, flush_sync, signal};
//! use tessera_core::computed;
//!
//! // Create a signal
//! let count = signal(0);
//!
//! // Create a derived value
//! let c = count.clone();
//! let doubled = computed!(move || c.get() * 2);
//!
//! // Create an effect
//! let (c, d) = (count.clone(), doubled.clone());
//! effect(move || {
//!     println!("Count: {}, Doubled: {}", c.get(), d.get());
//! });
//!
//! // Update the signal; the effect runs on the next flush
//! count.set(5);
//! flush_sync();
//! // Prints: "Count: 5, Doubled: 10"
//! ```

pub mod error;
pub mod graph;
pub mod reactive;
pub mod resume;

pub use error::{GraphError, ResumeError, SerializeError};
pub use reactive::{
    batch, computed, effect, flush_sync, signal, untrack, Computed, Effect, Runtime, Signal,
};
pub use resume::{Bootstrap, Serializer, Snapshot};

/// Create a computed in the current runtime, keeping the closure's source
/// text so it can be shipped when `serializeFunctions` is enabled.
///
/// ```rust,ignore
/// let total = computed!(move || price.get() * quantity.get());
/// assert!(total.source().unwrap().contains("price.get()"));
/// ```
#[macro_export]
macro_rules! computed {
    ($($derive:tt)+) => {
        $crate::reactive::Computed::with_options(
            $($derive)+,
            $crate::reactive::ComputedOptions::default().with_source(stringify!($($derive)+)),
        )
    };
}

//! Restored node table.
//!
//! [`RestoredState`] holds the signals and computeds a [`Bootstrap`]
//! rebuilt, keyed by their snapshot keys. Cloning shares the table, so
//! application code can take a clone before calling
//! [`Bootstrap::resume`](super::Bootstrap::resume) and move it into event
//! handlers; a rewired listener then drives the restored graph directly.
//!
//! [`Bootstrap`]: super::Bootstrap

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::reactive::{Computed, Signal};

#[derive(Default)]
struct Nodes {
    signals: IndexMap<String, Signal<Value>>,
    computeds: IndexMap<String, Computed<Value>>,
}

/// Signals and computeds rebuilt from a snapshot. Cloning shares the table.
#[derive(Clone, Default)]
pub struct RestoredState {
    nodes: Arc<RwLock<Nodes>>,
}

impl RestoredState {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert_signal(&self, key: String, signal: Signal<Value>) {
        self.nodes.write().signals.insert(key, signal);
    }

    pub(crate) fn insert_computed(&self, key: String, computed: Computed<Value>) {
        self.nodes.write().computeds.insert(key, computed);
    }

    /// Drop every restored node.
    pub(crate) fn clear(&self) {
        let mut nodes = self.nodes.write();
        nodes.signals.clear();
        nodes.computeds.clear();
    }

    /// A restored signal by key.
    pub fn signal(&self, key: &str) -> Option<Signal<Value>> {
        self.nodes.read().signals.get(key).cloned()
    }

    /// A restored computed by key.
    pub fn computed(&self, key: &str) -> Option<Computed<Value>> {
        self.nodes.read().computeds.get(key).cloned()
    }

    /// The current value of a restored signal, decoded as `T`.
    pub fn value_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.signal(key)?.get_untracked();
        match serde_json::from_value(value) {
            Ok(decoded) => Some(decoded),
            Err(err) => {
                tracing::warn!(signal = %key, error = %err, "restored value has an unexpected shape");
                None
            }
        }
    }

    /// Write `value` to a restored signal. Returns false if no signal is
    /// restored under `key`.
    pub fn set(&self, key: &str, value: Value) -> bool {
        match self.signal(key) {
            Some(signal) => {
                signal.set(value);
                true
            }
            None => {
                tracing::warn!(signal = %key, "write to a signal that was not restored");
                false
            }
        }
    }

    /// Keys of the restored signals, in snapshot order.
    pub fn signal_keys(&self) -> Vec<String> {
        self.nodes.read().signals.keys().cloned().collect()
    }

    pub fn signal_count(&self) -> usize {
        self.nodes.read().signals.len()
    }

    pub fn computed_count(&self) -> usize {
        self.nodes.read().computeds.len()
    }

    pub fn is_empty(&self) -> bool {
        let nodes = self.nodes.read();
        nodes.signals.is_empty() && nodes.computeds.is_empty()
    }
}

impl std::fmt::Debug for RestoredState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestoredState")
            .field("signals", &self.signal_count())
            .field("computeds", &self.computed_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{Runtime, SignalOptions};
    use serde_json::json;

    fn restore(state: &RestoredState, runtime: &Runtime, key: &str, value: Value) {
        let signal = Signal::new_in(runtime, value, SignalOptions::default().with_key(key));
        state.insert_signal(key.to_owned(), signal);
    }

    #[test]
    fn clones_share_the_table() {
        let runtime = Runtime::new();
        let state = RestoredState::new();
        let handle = state.clone();

        restore(&state, &runtime, "count", json!(1));
        assert_eq!(handle.value_as::<i64>("count"), Some(1));

        assert!(handle.set("count", json!(2)));
        assert_eq!(state.signal("count").unwrap().get_untracked(), json!(2));
    }

    #[test]
    fn writes_to_unknown_keys_are_refused() {
        let state = RestoredState::new();
        assert!(!state.set("missing", json!(1)));
        assert!(state.is_empty());
    }

    #[test]
    fn keys_keep_restore_order() {
        let runtime = Runtime::new();
        let state = RestoredState::new();
        for key in ["b", "a", "c"] {
            restore(&state, &runtime, key, json!(null));
        }
        assert_eq!(state.signal_keys(), vec!["b", "a", "c"]);

        state.clear();
        assert_eq!(state.signal_count(), 0);
    }

    #[test]
    fn unexpected_shape_decodes_to_none() {
        let runtime = Runtime::new();
        let state = RestoredState::new();
        restore(&state, &runtime, "title", json!("hello"));
        assert_eq!(state.value_as::<i64>("title"), None);
        assert_eq!(state.value_as::<String>("title").as_deref(), Some("hello"));
    }
}

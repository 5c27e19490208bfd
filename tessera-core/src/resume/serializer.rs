//! Server-side Capture
//!
//! The serializer keeps a registry of the signals and computeds a render
//! wants to ship, reads them when asked, and turns the result into a
//! [`Snapshot`] that can be embedded in the page.
//!
//! # Capture Rules
//!
//! - Only nodes created with `serializable: true` are registered.
//! - A node whose value does not encode to JSON is left out and logged.
//!   Capture never fails as a whole.
//! - Reads are untracked, so capturing inside an effect does not subscribe
//!   the effect to everything in the registry.
//! - The nodes, components and islands tables are left empty; the DOM
//!   binding layer records those.
//!
//! # Embedding
//!
//! The JSON is placed in a script element with a non-executable type. `<`,
//! `>` and `&` are written as JSON unicode escapes, so no value can close the
//! element or open markup, and the text still parses as the same JSON.

use std::fmt::Write as _;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

use super::config::SerializerConfig;
use super::snapshot::{
    SerializedComputed, SerializedSignal, Snapshot, SnapshotMeta, STATE_MIME_TYPE,
    STATE_SCRIPT_ID,
};
use crate::error::SerializeResult;
use crate::reactive::{Computed, Signal};

/// A signal as seen by the serializer.
pub trait CaptureSignal: Send + Sync {
    fn key(&self) -> &str;

    fn is_serializable(&self) -> bool;

    /// The current value as JSON, read without tracking.
    fn capture(&self) -> SerializeResult<Value>;

    fn dependent_keys(&self) -> Vec<String>;
}

/// A computed as seen by the serializer.
pub trait CaptureComputed: Send + Sync {
    fn key(&self) -> &str;

    fn is_serializable(&self) -> bool;

    /// The current value as JSON, recomputing first if dirty.
    fn capture(&self) -> SerializeResult<Value>;

    fn is_dirty(&self) -> bool;

    fn dependency_keys(&self) -> Vec<String>;

    fn source(&self) -> Option<&str>;
}

impl<T> CaptureSignal for Signal<T>
where
    T: Clone + Send + Sync + Serialize + 'static,
{
    fn key(&self) -> &str {
        Signal::key(self)
    }

    fn is_serializable(&self) -> bool {
        Signal::is_serializable(self)
    }

    fn capture(&self) -> SerializeResult<Value> {
        Ok(serde_json::to_value(self.get_untracked())?)
    }

    fn dependent_keys(&self) -> Vec<String> {
        Signal::dependent_keys(self)
    }
}

impl<T> CaptureComputed for Computed<T>
where
    T: Clone + Send + Sync + Serialize + 'static,
{
    fn key(&self) -> &str {
        Computed::key(self)
    }

    fn is_serializable(&self) -> bool {
        Computed::is_serializable(self)
    }

    fn capture(&self) -> SerializeResult<Value> {
        Ok(serde_json::to_value(self.get_untracked()?)?)
    }

    fn is_dirty(&self) -> bool {
        Computed::is_dirty(self)
    }

    fn dependency_keys(&self) -> Vec<String> {
        Computed::dependency_keys(self)
    }

    fn source(&self) -> Option<&str> {
        Computed::source(self)
    }
}

/// True when `value` encodes to JSON.
pub fn is_serializable<T: Serialize + ?Sized>(value: &T) -> bool {
    serde_json::to_value(value).is_ok()
}

/// Captures registered nodes into snapshots.
pub struct Serializer {
    config: SerializerConfig,
    signals: IndexMap<String, Arc<dyn CaptureSignal>>,
    computeds: IndexMap<String, Arc<dyn CaptureComputed>>,
}

impl Serializer {
    pub fn new(config: SerializerConfig) -> Self {
        if config.serialize_functions {
            tracing::warn!(
                "serializeFunctions is enabled: computed source text will be embedded in the page; \
                 never enable this for code that must stay private"
            );
        }
        Self {
            config,
            signals: IndexMap::new(),
            computeds: IndexMap::new(),
        }
    }

    pub fn config(&self) -> &SerializerConfig {
        &self.config
    }

    /// Add `signal` to the registry. Returns false if it was not added.
    pub fn register_signal<T>(&mut self, signal: &Signal<T>) -> bool
    where
        T: Clone + Send + Sync + Serialize + 'static,
    {
        self.register_signal_dyn(Arc::new(signal.clone()))
    }

    pub fn register_signal_dyn(&mut self, signal: Arc<dyn CaptureSignal>) -> bool {
        if !self.config.enabled || !signal.is_serializable() {
            return false;
        }
        self.signals.insert(signal.key().to_owned(), signal);
        true
    }

    /// Add `computed` to the registry. Returns false if it was not added.
    pub fn register_computed<T>(&mut self, computed: &Computed<T>) -> bool
    where
        T: Clone + Send + Sync + Serialize + 'static,
    {
        self.register_computed_dyn(Arc::new(computed.clone()))
    }

    pub fn register_computed_dyn(&mut self, computed: Arc<dyn CaptureComputed>) -> bool {
        if !self.config.enabled || !computed.is_serializable() {
            return false;
        }
        self.computeds.insert(computed.key().to_owned(), computed);
        true
    }

    pub fn signal_count(&self) -> usize {
        self.signals.len()
    }

    pub fn computed_count(&self) -> usize {
        self.computeds.len()
    }

    pub fn capture_signals(&self) -> IndexMap<String, SerializedSignal> {
        let mut captured = IndexMap::with_capacity(self.signals.len());
        for (key, signal) in &self.signals {
            match signal.capture() {
                Ok(value) => {
                    captured.insert(
                        key.clone(),
                        SerializedSignal {
                            id: key.clone(),
                            value,
                            dependents: signal.dependent_keys(),
                            is_serializable: true,
                        },
                    );
                }
                Err(err) => {
                    tracing::warn!(signal = %key, error = %err, "signal left out of snapshot");
                }
            }
        }
        captured
    }

    pub fn capture_computeds(&self) -> IndexMap<String, SerializedComputed> {
        let mut captured = IndexMap::with_capacity(self.computeds.len());
        for (key, computed) in &self.computeds {
            match computed.capture() {
                Ok(value) => {
                    let fn_source = if self.config.serialize_functions {
                        computed.source().map(str::to_owned)
                    } else {
                        None
                    };
                    captured.insert(
                        key.clone(),
                        SerializedComputed {
                            id: key.clone(),
                            value,
                            dependencies: computed.dependency_keys(),
                            is_dirty: computed.is_dirty(),
                            fn_source,
                        },
                    );
                }
                Err(err) => {
                    tracing::warn!(computed = %key, error = %err, "computed left out of snapshot");
                }
            }
        }
        captured
    }

    /// Capture every registered node into a fresh snapshot.
    pub fn create_snapshot(&self, meta: SnapshotMeta) -> Snapshot {
        let mut snapshot = Snapshot::new(meta);
        snapshot.signals = self.capture_signals();
        snapshot.computeds = self.capture_computeds();
        tracing::debug!(
            signals = snapshot.signals.len(),
            computeds = snapshot.computeds.len(),
            route = %snapshot.meta.route,
            "snapshot created"
        );
        snapshot
    }

    /// Encode `snapshot` as JSON. Exceeding `max_snapshot_size` only warns.
    pub fn serialize_to_json(&self, snapshot: &Snapshot) -> SerializeResult<String> {
        let json = serde_json::to_string(snapshot)?;
        if json.len() > self.config.max_snapshot_size {
            tracing::warn!(
                size = json.len(),
                limit = self.config.max_snapshot_size,
                "snapshot exceeds the configured size"
            );
        }
        Ok(json)
    }

    /// Encode `snapshot` as a state script element ready to be written into
    /// the page.
    pub fn embed_in_html(&self, snapshot: &Snapshot) -> SerializeResult<String> {
        let json = self.serialize_to_json(snapshot)?;
        Ok(format!(
            r#"<script id="{STATE_SCRIPT_ID}" type="{STATE_MIME_TYPE}">{}</script>"#,
            escape_for_script(&json)
        ))
    }
}

impl Default for Serializer {
    fn default() -> Self {
        Self::new(SerializerConfig::default())
    }
}

impl std::fmt::Debug for Serializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Serializer")
            .field("config", &self.config)
            .field("signals", &self.signals.keys().collect::<Vec<_>>())
            .field("computeds", &self.computeds.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Replace `<`, `>` and `&` in JSON text with unicode escapes.
pub fn escape_for_script(json: &str) -> String {
    let mut out = String::with_capacity(json.len());
    for ch in json.chars() {
        match ch {
            '<' | '>' | '&' => {
                // Writing to a String cannot fail.
                let _ = write!(out, "\\u{:04x}", ch as u32);
            }
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{ComputedOptions, Runtime, SignalOptions};
    use serde::ser::Error as _;
    use serde_json::json;

    #[derive(Clone)]
    struct Unencodable;

    impl Serialize for Unencodable {
        fn serialize<S: serde::Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
            Err(S::Error::custom("handles cannot be encoded"))
        }
    }

    #[test]
    fn only_serializable_nodes_are_registered() {
        let runtime = Runtime::new();
        let shared = Signal::new_in(&runtime, 1, SignalOptions::default().with_key("shared"));
        let local = Signal::new_in(&runtime, 2, SignalOptions::local());

        let mut serializer = Serializer::default();
        assert!(serializer.register_signal(&shared));
        assert!(!serializer.register_signal(&local));
        assert_eq!(serializer.signal_count(), 1);
    }

    #[test]
    fn disabled_serializer_registers_nothing() {
        let runtime = Runtime::new();
        let count = runtime.signal(1);
        let mut serializer = Serializer::new(SerializerConfig {
            enabled: false,
            ..Default::default()
        });
        assert!(!serializer.register_signal(&count));
        assert!(serializer.capture_signals().is_empty());
    }

    #[test]
    fn unencodable_values_are_left_out() {
        let runtime = Runtime::new();
        let good = Signal::new_in(&runtime, "ok", SignalOptions::default().with_key("good"));
        let bad = Signal::new_in(&runtime, Unencodable, SignalOptions::default().with_key("bad"));

        let mut serializer = Serializer::default();
        serializer.register_signal(&good);
        serializer.register_signal(&bad);

        let captured = serializer.capture_signals();
        assert_eq!(captured.len(), 1);
        assert_eq!(captured["good"].value, json!("ok"));
    }

    #[test]
    fn computed_capture_records_dependencies() {
        let runtime = Runtime::new();
        let price = Signal::new_in(&runtime, 10, SignalOptions::default().with_key("price"));
        let price_clone = price.clone();
        let total = Computed::new_in(
            &runtime,
            move || price_clone.get() * 3,
            ComputedOptions::default()
                .with_key("total")
                .with_source("price.get() * 3"),
        );

        let mut serializer = Serializer::default();
        serializer.register_signal(&price);
        serializer.register_computed(&total);
        let snapshot = serializer.create_snapshot(SnapshotMeta::new("/"));

        let captured = &snapshot.computeds["total"];
        assert_eq!(captured.value, json!(30));
        assert_eq!(captured.dependencies, vec!["price".to_owned()]);
        assert!(!captured.is_dirty);
        assert!(captured.fn_source.is_none());
        assert_eq!(snapshot.signals["price"].dependents, vec!["total".to_owned()]);
        assert!(snapshot.nodes.is_empty());
    }

    #[test]
    fn sources_are_shipped_only_when_enabled() {
        let runtime = Runtime::new();
        let total = Computed::new_in(
            &runtime,
            || 1,
            ComputedOptions::default().with_key("one").with_source("|| 1"),
        );
        let mut serializer = Serializer::new(SerializerConfig {
            serialize_functions: true,
            ..Default::default()
        });
        serializer.register_computed(&total);
        let captured = serializer.capture_computeds();
        assert_eq!(captured["one"].fn_source.as_deref(), Some("|| 1"));
    }

    #[test]
    fn escape_replaces_markup_characters() {
        let escaped = escape_for_script(r#"{"x":"</script><b>&"}"#);
        assert!(!escaped.contains('<'));
        assert!(!escaped.contains('>'));
        assert!(!escaped.contains('&'));

        let decoded: Value = serde_json::from_str(&escaped).unwrap();
        assert_eq!(decoded["x"], "</script><b>&");
    }

    #[test]
    fn embed_wraps_in_state_script() {
        let serializer = Serializer::default();
        let html = serializer
            .embed_in_html(&Snapshot::new(SnapshotMeta::new("/")))
            .unwrap();
        assert!(html.starts_with(&format!(r#"<script id="{STATE_SCRIPT_ID}""#)));
        assert!(html.contains(STATE_MIME_TYPE));
        assert!(html.ends_with("</script>"));
    }

    #[test]
    fn is_serializable_checks_encoding() {
        assert!(is_serializable(&json!({"a": [1, 2]})));
        assert!(is_serializable("text"));
        assert!(!is_serializable(&Unencodable));
    }
}

//! Resumability
//!
//! Moves the live state of a reactive graph from the process that rendered a
//! page to the client that displays it, without re-running setup code on the
//! client.
//!
//! # Flow
//!
//! 1. On the server, a [`Serializer`] captures registered signals and
//!    computeds into a [`Snapshot`] and embeds it in the page as a
//!    non-executable script element.
//!
//! 2. The DOM binding layer records which elements carry which event
//!    listeners, by handler id, in the same snapshot.
//!
//! 3. On the client, a [`Bootstrap`] reads the script back out of the
//!    [`Document`], rebuilds the signals and computeds, and re-attaches the
//!    listeners through a [`HandlerRegistry`]. Handlers reach the rebuilt
//!    signals through a shared [`RestoredState`].

mod bootstrap;
mod config;
mod document;
mod handlers;
mod serializer;
mod snapshot;
mod state;

pub use bootstrap::{
    Bootstrap, ErrorHook, Fallback, ProgressHook, ResumeHooks, ResumeMetrics, ResumeResult,
};
pub use config::{BootstrapConfig, SerializerConfig, DEFAULT_MAX_SNAPSHOT_SIZE};
pub use document::{Document, ElementHandle, Event, Handler, ScriptElement, StaticDocument};
pub use handlers::{register_handler, HandlerRegistry};
pub use serializer::{escape_for_script, is_serializable, CaptureComputed, CaptureSignal, Serializer};
pub use snapshot::{
    ComponentRecord, IslandRecord, ListenerOptions, ListenerRecord, NodeRecord,
    SerializedComputed, SerializedSignal, Snapshot, SnapshotMeta, VersionStrategy,
    NODE_ID_ATTRIBUTE, SCHEMA_VERSION, STATE_MIME_TYPE, STATE_SCRIPT_ID,
};
pub use state::RestoredState;

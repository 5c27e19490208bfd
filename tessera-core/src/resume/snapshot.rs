//! Snapshot Schema
//!
//! The wire types that carry a reactive graph's state from the server to the
//! client, and the policy deciding which schema versions a client accepts.
//!
//! Field names are camelCase on the wire. Every map keeps insertion order so
//! that the same graph always produces byte-identical JSON.
//!
//! Signal and computed entries are decoded one at a time: an entry that does
//! not match its schema is logged and left out, and the rest of the snapshot
//! still loads.

use std::time::{SystemTime, UNIX_EPOCH};

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{LoadResult, ResumeError, SerializeResult};

/// Schema version written into every snapshot.
pub const SCHEMA_VERSION: &str = "1.0.0";

/// `id` of the script element holding the snapshot.
pub const STATE_SCRIPT_ID: &str = "__TESSERA_STATE__";

/// `type` of the script element holding the snapshot. Browsers do not
/// execute scripts of unknown types.
pub const STATE_MIME_TYPE: &str = "application/tessera-state+json";

/// Attribute carrying an element's stable identity across server and client.
pub const NODE_ID_ATTRIBUTE: &str = "data-tessera-id";

/// The captured state of one server render.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub version: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    #[serde(deserialize_with = "skip_malformed_entries")]
    pub signals: IndexMap<String, SerializedSignal>,
    #[serde(deserialize_with = "skip_malformed_entries")]
    pub computeds: IndexMap<String, SerializedComputed>,
    pub nodes: IndexMap<String, NodeRecord>,
    pub components: IndexMap<String, ComponentRecord>,
    pub islands: IndexMap<String, IslandRecord>,
    pub meta: SnapshotMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedSignal {
    pub id: String,
    pub value: Value,
    /// Keys of the computeds and effects that read the signal at capture.
    pub dependents: Vec<String>,
    pub is_serializable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedComputed {
    pub id: String,
    pub value: Value,
    pub dependencies: Vec<String>,
    pub is_dirty: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fn_source: Option<String>,
}

fn skip_malformed_entries<'de, D, T>(deserializer: D) -> Result<IndexMap<String, T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let raw = IndexMap::<String, Value>::deserialize(deserializer)?;
    let entries = raw
        .into_iter()
        .filter_map(|(key, value)| match serde_json::from_value(value) {
            Ok(entry) => Some((key, entry)),
            Err(err) => {
                tracing::warn!(entry = %key, error = %err, "malformed snapshot entry; skipped");
                None
            }
        })
        .collect();
    Ok(entries)
}

/// An element whose event listeners must be re-attached on the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRecord {
    pub node_id: String,
    pub tag_name: String,
    #[serde(default)]
    pub data_attrs: IndexMap<String, String>,
    #[serde(default)]
    pub listeners: Vec<ListenerRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenerRecord {
    pub event: String,
    pub handler_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<ListenerOptions>,
}

/// Options passed along when a listener is attached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ListenerOptions {
    pub capture: bool,
    pub once: bool,
    pub passive: bool,
}

/// A component instance rendered on the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentRecord {
    pub component_id: String,
    pub name: String,
    #[serde(default)]
    pub props: Value,
    /// Keys of the signals the component owns.
    #[serde(default)]
    pub signals: Vec<String>,
}

/// An independently resumable region of the page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IslandRecord {
    pub island_id: String,
    pub component: String,
    #[serde(default)]
    pub props: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMeta {
    pub route: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom: Option<IndexMap<String, Value>>,
}

impl SnapshotMeta {
    pub fn new(route: impl Into<String>) -> Self {
        Self {
            route: route.into(),
            ..Self::default()
        }
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    pub fn with_custom(mut self, key: impl Into<String>, value: Value) -> Self {
        self.custom
            .get_or_insert_with(IndexMap::new)
            .insert(key.into(), value);
        self
    }
}

impl Snapshot {
    /// An empty snapshot at the current schema version, stamped now.
    pub fn new(meta: SnapshotMeta) -> Self {
        Self {
            version: SCHEMA_VERSION.to_owned(),
            timestamp: now_millis(),
            signals: IndexMap::new(),
            computeds: IndexMap::new(),
            nodes: IndexMap::new(),
            components: IndexMap::new(),
            islands: IndexMap::new(),
            meta,
        }
    }

    /// Record an element whose listeners must be restored.
    pub fn record_node(&mut self, node: NodeRecord) {
        self.nodes.insert(node.node_id.clone(), node);
    }

    pub fn record_component(&mut self, component: ComponentRecord) {
        self.components
            .insert(component.component_id.clone(), component);
    }

    pub fn record_island(&mut self, island: IslandRecord) {
        self.islands.insert(island.island_id.clone(), island);
    }

    /// Total number of listeners across every recorded node.
    pub fn listener_count(&self) -> usize {
        self.nodes.values().map(|node| node.listeners.len()).sum()
    }

    /// Check the snapshot's version against [`SCHEMA_VERSION`].
    pub fn check_version(&self, strategy: VersionStrategy) -> LoadResult<()> {
        if strategy.accepts(&self.version, SCHEMA_VERSION) {
            Ok(())
        } else {
            Err(ResumeError::IncompatibleVersion {
                found: self.version.clone(),
                expected: SCHEMA_VERSION.to_owned(),
            })
        }
    }

    /// Encode as MessagePack, keeping field names so the form stays
    /// self-describing.
    pub fn to_msgpack(&self) -> SerializeResult<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    pub fn from_msgpack(bytes: &[u8]) -> LoadResult<Self> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

/// Which snapshot versions a client accepts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionStrategy {
    /// Same major version.
    #[default]
    Compatible,
    /// Exactly the same version.
    Strict,
}

impl VersionStrategy {
    /// Whether a snapshot written at `found` may be read by schema
    /// `expected`. Versions that do not parse are never accepted.
    pub fn accepts(&self, found: &str, expected: &str) -> bool {
        let (Ok(found), Ok(expected)) = (
            semver::Version::parse(found),
            semver::Version::parse(expected),
        ) else {
            return false;
        };
        match self {
            VersionStrategy::Compatible => found.major == expected.major,
            VersionStrategy::Strict => found == expected,
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

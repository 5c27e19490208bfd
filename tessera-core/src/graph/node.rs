//! Graph Nodes
//!
//! This module defines node identity and the capabilities the propagation
//! code relies on.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use smallvec::SmallVec;

use crate::reactive::Subscriber;

/// Unique identifier for a node in the reactive graph.
///
/// Ids are process-unique: signals, computeds and effects all draw from the
/// same counter, across every runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }

    /// The default snapshot key for a node of `kind` with this id.
    pub fn key(&self, kind: NodeKind) -> String {
        format!("{}{}", kind.prefix(), self.0)
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The kind of node in the reactive graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// A signal. Signals are the roots of the graph: they have dependents
    /// but never dependencies.
    Signal,

    /// A computed value. Computeds have both dependencies and dependents.
    Computed,

    /// An effect. Effects are leaves: they have dependencies but nothing
    /// can depend on them.
    Effect,
}

impl NodeKind {
    /// Prefix used when deriving a default key from a node id.
    pub fn prefix(&self) -> &'static str {
        match self {
            NodeKind::Signal => "s",
            NodeKind::Computed => "c",
            NodeKind::Effect => "e",
        }
    }
}

/// A node that can be read inside a tracking scope, and therefore has
/// dependents.
pub(crate) trait SourceNode: Send + Sync {
    fn id(&self) -> NodeId;

    fn key(&self) -> &str;

    fn add_dependent(&self, subscriber: Subscriber);

    fn remove_dependent(&self, id: NodeId);

    /// A copy of the current dependents, in insertion order.
    fn dependents(&self) -> SmallVec<[Subscriber; 4]>;
}

/// The type-erased view of a computed value used by propagation and the
/// scheduler.
pub(crate) trait ComputedNode: SourceNode {
    fn is_dirty(&self) -> bool;

    /// Set the dirty flag. Returns `false` if it was already set.
    fn mark_dirty(&self) -> bool;

    fn add_dependency(&self, id: NodeId, dependency: Dependency);

    /// Recompute if dirty. Performs no tracking.
    fn refresh(self: Arc<Self>);
}

/// The read side of a dependency edge, as stored by the reader.
#[derive(Clone)]
pub(crate) enum Dependency {
    Signal(Weak<dyn SourceNode>),
    Computed(Weak<dyn ComputedNode>),
}

impl Dependency {
    pub(crate) fn kind(&self) -> NodeKind {
        match self {
            Dependency::Signal(_) => NodeKind::Signal,
            Dependency::Computed(_) => NodeKind::Computed,
        }
    }

    /// Remove `reader` from the dependency's dependents.
    pub(crate) fn detach(&self, reader: NodeId) {
        match self {
            Dependency::Signal(node) => {
                if let Some(node) = node.upgrade() {
                    node.remove_dependent(reader);
                }
            }
            Dependency::Computed(node) => {
                if let Some(node) = node.upgrade() {
                    node.remove_dependent(reader);
                }
            }
        }
    }

    /// The key of the node on the other end, if it is still alive.
    pub(crate) fn key(&self) -> Option<String> {
        match self {
            Dependency::Signal(node) => node.upgrade().map(|n| n.key().to_owned()),
            Dependency::Computed(node) => node.upgrade().map(|n| n.key().to_owned()),
        }
    }
}

impl fmt::Debug for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Dependency")
            .field(&self.kind())
            .field(&self.key())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_ids_are_unique() {
        let id1 = NodeId::new();
        let id2 = NodeId::new();
        assert_ne!(id1, id2);
        assert!(id2 > id1);
    }

    #[test]
    fn keys_carry_kind_prefix() {
        let id = NodeId::new();
        assert_eq!(id.key(NodeKind::Signal), format!("s{}", id.raw()));
        assert_eq!(id.key(NodeKind::Computed), format!("c{}", id.raw()));
        assert_eq!(id.key(NodeKind::Effect), format!("e{}", id.raw()));
    }

    #[test]
    fn dead_dependency_has_no_key() {
        let dependency = {
            let signal = crate::reactive::Signal::new(1);
            signal.as_dependency()
        };
        assert_eq!(dependency.kind(), NodeKind::Signal);
        assert!(dependency.key().is_none());
        // Detaching from a dropped node is a no-op.
        dependency.detach(NodeId::new());
    }
}

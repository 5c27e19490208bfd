//! Subscriber types for the reactive system.
//!
//! A subscriber is anything that reads reactive values and must hear about
//! changes to them: computeds and effects. Signals never subscribe.

use std::sync::{Arc, Weak};

use crate::graph::{ComputedNode, Dependency, NodeId, NodeKind, SourceNode};

use super::effect::EffectInner;

/// The write side of a dependency edge, as stored in a dependents set.
///
/// Propagation matches on this exhaustively: a computed is marked dirty and
/// walked further, an effect is handed to the scheduler.
#[derive(Clone)]
pub(crate) enum Subscriber {
    Computed {
        id: NodeId,
        node: Weak<dyn ComputedNode>,
    },
    Effect {
        id: NodeId,
        node: Weak<EffectInner>,
    },
}

impl Subscriber {
    pub(crate) fn id(&self) -> NodeId {
        match self {
            Subscriber::Computed { id, .. } | Subscriber::Effect { id, .. } => *id,
        }
    }

    pub(crate) fn kind(&self) -> NodeKind {
        match self {
            Subscriber::Computed { .. } => NodeKind::Computed,
            Subscriber::Effect { .. } => NodeKind::Effect,
        }
    }

    /// Snapshot key of the subscriber, if it is still alive.
    pub(crate) fn key(&self) -> Option<String> {
        match self {
            Subscriber::Computed { node, .. } => node.upgrade().map(|n| n.key().to_owned()),
            Subscriber::Effect { node, .. } => node.upgrade().map(|n| n.key().to_owned()),
        }
    }
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.id())
            .field("kind", &self.kind())
            .finish()
    }
}

/// The computation currently evaluating, as held by the tracking context.
#[derive(Clone)]
pub(crate) enum Observer {
    Computed(Arc<dyn ComputedNode>),
    Effect(Arc<EffectInner>),
}

impl Observer {
    pub(crate) fn id(&self) -> NodeId {
        match self {
            Observer::Computed(node) => node.id(),
            Observer::Effect(node) => node.id(),
        }
    }

    /// The weak form stored in a source's dependents.
    pub(crate) fn subscriber(&self) -> Subscriber {
        match self {
            Observer::Computed(node) => Subscriber::Computed {
                id: node.id(),
                node: Arc::downgrade(node),
            },
            Observer::Effect(node) => Subscriber::Effect {
                id: node.id(),
                node: Arc::downgrade(node),
            },
        }
    }

    pub(crate) fn add_dependency(&self, id: NodeId, dependency: Dependency) {
        match self {
            Observer::Computed(node) => node.add_dependency(id, dependency),
            Observer::Effect(node) => node.add_dependency(id, dependency),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{Computed, Effect, Runtime};

    #[test]
    fn observer_round_trips_to_subscriber() {
        let runtime = Runtime::new();
        let effect = Effect::new_in(&runtime, || None);
        let observer = Observer::Effect(effect.inner().clone());

        let subscriber = observer.subscriber();
        assert_eq!(subscriber.id(), observer.id());
        assert_eq!(subscriber.kind(), NodeKind::Effect);
        assert_eq!(subscriber.key(), Some(effect.key().to_owned()));
    }

    #[test]
    fn dropped_subscriber_has_no_key() {
        let runtime = Runtime::new();
        let subscriber = {
            let memo = Computed::new_in(&runtime, || 1, Default::default());
            Observer::Computed(memo.as_node()).subscriber()
        };
        assert_eq!(subscriber.kind(), NodeKind::Computed);
        assert!(subscriber.key().is_none());
    }
}

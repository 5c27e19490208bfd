//! Event handler table.
//!
//! Listeners travel in a snapshot only as handler ids. The client maps ids
//! back to closures through a [`HandlerRegistry`], which application code
//! must fill before calling [`Bootstrap::resume`](super::Bootstrap::resume).

use std::sync::{Arc, OnceLock};

use dashmap::DashMap;

use super::document::{Event, Handler};

/// Handlers keyed by id. Cloning shares the table.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: Arc<DashMap<String, Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide table used by [`register_handler`].
    pub fn global() -> &'static HandlerRegistry {
        static GLOBAL: OnceLock<HandlerRegistry> = OnceLock::new();
        GLOBAL.get_or_init(HandlerRegistry::new)
    }

    /// Register `handler` under `id`, replacing any previous one.
    pub fn register<F>(&self, id: impl Into<String>, handler: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = id.into();
        if self.handlers.insert(id.clone(), Arc::new(handler)).is_some() {
            tracing::debug!(handler = %id, "handler replaced");
        }
    }

    pub fn get(&self, id: &str) -> Option<Handler> {
        self.handlers.get(id).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.handlers.contains_key(id)
    }

    pub fn unregister(&self, id: &str) -> bool {
        self.handlers.remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.len())
            .finish()
    }
}

/// Register a handler in the process-wide table.
pub fn register_handler<F>(id: impl Into<String>, handler: F)
where
    F: Fn(&Event) + Send + Sync + 'static,
{
    HandlerRegistry::global().register(id, handler);
}

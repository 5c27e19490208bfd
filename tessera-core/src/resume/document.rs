//! Document Model
//!
//! Restoring needs three things from the page: the state script, elements
//! looked up by their stable id, and a way to attach listeners. The
//! [`Document`] trait is that surface. A browser binding implements it over
//! the real DOM.
//!
//! [`StaticDocument`] is the in-memory implementation. It can be assembled
//! by hand or scanned out of server-rendered HTML, and it can dispatch
//! events to the listeners attached to it, which makes the whole
//! serialize-embed-resume loop runnable outside a browser.
//!
//! # Scanning
//!
//! [`StaticDocument::parse`] is not an HTML parser. It walks start tags,
//! keeps every `<script>` that has an `id` (with its raw text), and every
//! element carrying [`NODE_ID_ATTRIBUTE`]. Everything else is ignored.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::Value;

use super::snapshot::{ListenerOptions, NODE_ID_ATTRIBUTE};

/// Callback attached to an element for one event type.
pub type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

/// The contents of a script element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptElement {
    pub mime_type: String,
    pub text: String,
}

/// A reference to an element found by its stable id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementHandle {
    node_id: String,
    tag_name: String,
}

impl ElementHandle {
    pub fn new(node_id: impl Into<String>, tag_name: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            tag_name: tag_name.into(),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn tag_name(&self) -> &str {
        &self.tag_name
    }
}

/// An event delivered to a handler.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub event_type: String,
    /// Stable id of the element the event is dispatched to.
    pub target: String,
    pub detail: Value,
}

impl Event {
    pub fn new(event_type: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            target: target.into(),
            detail: Value::Null,
        }
    }

    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = detail;
        self
    }
}

/// The page operations the restore path needs.
pub trait Document {
    /// The script element with the given `id`, if any.
    fn script_element(&self, id: &str) -> Option<ScriptElement>;

    /// The element whose [`NODE_ID_ATTRIBUTE`] equals `node_id`, if any.
    fn element(&self, node_id: &str) -> Option<ElementHandle>;

    fn add_event_listener(
        &self,
        element: &ElementHandle,
        event: &str,
        handler: Handler,
        options: ListenerOptions,
    );
}

struct AttachedListener {
    node_id: String,
    event: String,
    handler: Handler,
    options: ListenerOptions,
}

/// An in-memory [`Document`].
#[derive(Default)]
pub struct StaticDocument {
    scripts: IndexMap<String, ScriptElement>,
    elements: IndexMap<String, ElementHandle>,
    listeners: Mutex<Vec<AttachedListener>>,
}

impl StaticDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(
        mut self,
        id: impl Into<String>,
        mime_type: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        self.scripts.insert(
            id.into(),
            ScriptElement {
                mime_type: mime_type.into(),
                text: text.into(),
            },
        );
        self
    }

    pub fn with_element(mut self, node_id: impl Into<String>, tag_name: impl Into<String>) -> Self {
        let element = ElementHandle::new(node_id, tag_name);
        self.elements.insert(element.node_id.clone(), element);
        self
    }

    /// Scan server-rendered HTML for id'd scripts and elements carrying
    /// [`NODE_ID_ATTRIBUTE`].
    pub fn parse(html: &str) -> Self {
        let mut document = Self::new();
        let mut rest = html;

        while let Some(open) = rest.find('<') {
            rest = &rest[open + 1..];

            if let Some(comment) = rest.strip_prefix("!--") {
                rest = comment.find("-->").map_or("", |end| &comment[end + 3..]);
                continue;
            }
            if rest.starts_with('/') || rest.starts_with('!') || rest.starts_with('?') {
                rest = rest.find('>').map_or("", |end| &rest[end + 1..]);
                continue;
            }

            let Some(end) = tag_end(rest) else {
                break;
            };
            let (name, attributes) = parse_tag(&rest[..end]);
            rest = &rest[end + 1..];
            if name.is_empty() {
                continue;
            }

            if name == "script" {
                let close = rest
                    .to_ascii_lowercase()
                    .find("</script")
                    .unwrap_or(rest.len());
                if let Some(id) = attributes.get("id") {
                    document.scripts.insert(
                        id.clone(),
                        ScriptElement {
                            mime_type: attributes.get("type").cloned().unwrap_or_default(),
                            text: rest[..close].to_owned(),
                        },
                    );
                }
                rest = &rest[close..];
            }

            if let Some(node_id) = attributes.get(NODE_ID_ATTRIBUTE) {
                document
                    .elements
                    .insert(node_id.clone(), ElementHandle::new(node_id.clone(), name));
            }
        }

        tracing::debug!(
            scripts = document.scripts.len(),
            elements = document.elements.len(),
            "scanned document"
        );
        document
    }

    /// Deliver `event` to every listener on its target for its type.
    /// Listeners attached with `once` are removed. Returns how many ran.
    pub fn dispatch(&self, event: &Event) -> usize {
        let fired: Vec<Handler> = {
            let mut listeners = self.listeners.lock();
            let mut fired = Vec::new();
            listeners.retain(|listener| {
                if listener.node_id != event.target || listener.event != event.event_type {
                    return true;
                }
                fired.push(listener.handler.clone());
                !listener.options.once
            });
            fired
        };

        for handler in &fired {
            handler(event);
        }
        fired.len()
    }

    /// Number of listeners attached to the element with `node_id`.
    pub fn listener_count(&self, node_id: &str) -> usize {
        self.listeners
            .lock()
            .iter()
            .filter(|listener| listener.node_id == node_id)
            .count()
    }

    pub fn total_listeners(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Options the first listener for `event` on `node_id` was attached with.
    pub fn listener_options(&self, node_id: &str, event: &str) -> Option<ListenerOptions> {
        self.listeners
            .lock()
            .iter()
            .find(|listener| listener.node_id == node_id && listener.event == event)
            .map(|listener| listener.options)
    }

    pub fn element_count(&self) -> usize {
        self.elements.len()
    }
}

impl Document for StaticDocument {
    fn script_element(&self, id: &str) -> Option<ScriptElement> {
        self.scripts.get(id).cloned()
    }

    fn element(&self, node_id: &str) -> Option<ElementHandle> {
        self.elements.get(node_id).cloned()
    }

    fn add_event_listener(
        &self,
        element: &ElementHandle,
        event: &str,
        handler: Handler,
        options: ListenerOptions,
    ) {
        self.listeners.lock().push(AttachedListener {
            node_id: element.node_id.clone(),
            event: event.to_owned(),
            handler,
            options,
        });
    }
}

impl std::fmt::Debug for StaticDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticDocument")
            .field("scripts", &self.scripts.keys().collect::<Vec<_>>())
            .field("elements", &self.elements.len())
            .field("listeners", &self.total_listeners())
            .finish()
    }
}

/// Index of the `>` closing a start tag, skipping quoted attribute values.
fn tag_end(tag: &str) -> Option<usize> {
    let mut quote = None;
    for (index, ch) in tag.char_indices() {
        match (quote, ch) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(ch),
            (None, '>') => return Some(index),
            (None, _) => {}
        }
    }
    None
}

/// Split a start tag's inside into a lowercase name and its attributes.
fn parse_tag(tag: &str) -> (String, IndexMap<String, String>) {
    let tag = tag.trim_end_matches('/');
    let name_end = tag
        .find(|c: char| c.is_ascii_whitespace())
        .unwrap_or(tag.len());
    let name = tag[..name_end].to_ascii_lowercase();

    let mut attributes = IndexMap::new();
    let mut rest = tag[name_end..].trim_start();
    while !rest.is_empty() {
        let key_end = rest
            .find(|c: char| c.is_ascii_whitespace() || c == '=')
            .unwrap_or(rest.len());
        let key = rest[..key_end].to_ascii_lowercase();
        if key.is_empty() {
            // Stray `=`; skip it to make progress.
            rest = rest[1..].trim_start();
            continue;
        }
        rest = rest[key_end..].trim_start();

        let mut value = String::new();
        if let Some(after_eq) = rest.strip_prefix('=') {
            let after_eq = after_eq.trim_start();
            let (raw, remaining) = match after_eq.chars().next() {
                Some(q @ ('"' | '\'')) => {
                    let body = &after_eq[1..];
                    let close = body.find(q).unwrap_or(body.len());
                    (&body[..close], body.get(close + 1..).unwrap_or(""))
                }
                _ => {
                    let end = after_eq
                        .find(|c: char| c.is_ascii_whitespace())
                        .unwrap_or(after_eq.len());
                    (&after_eq[..end], &after_eq[end..])
                }
            };
            value = decode_entities(raw);
            rest = remaining.trim_start();
        }

        attributes.entry(key).or_insert(value);
    }
    (name, attributes)
}

fn decode_entities(raw: &str) -> String {
    if !raw.contains('&') {
        return raw.to_owned();
    }
    raw.replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

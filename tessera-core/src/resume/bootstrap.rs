//! Client-side Restore
//!
//! The bootstrap reads the snapshot a server embedded in the page and
//! rebuilds live state from it without running application setup code.
//!
//! # Pipeline
//!
//! [`Bootstrap::resume`] runs four phases in a fixed order, reporting
//! progress after each:
//!
//! | progress | phase                                      |
//! |----------|--------------------------------------------|
//! | 0.1      | load and version-check the snapshot        |
//! | 0.2      | restore signals                            |
//! | 0.4      | restore computeds                          |
//! | 0.6      | re-attach event listeners                  |
//! | 1.0      | done                                       |
//!
//! Per-entry failures (a malformed entry, a missing element, an unknown
//! handler) are logged and skipped. Only a missing or unusable snapshot,
//! or running past the configured timeout, fails the pipeline; that failure
//! goes through `on_error` once and then through the fallback decision, and
//! whatever was restored before it is dropped again.
//!
//! A bootstrap resumes its document at most once.
//!
//! # Reaching restored state from handlers
//!
//! Restored nodes land in a [`RestoredState`]. Take a clone with
//! [`Bootstrap::state`] before resuming and move it into the handlers you
//! register; when a re-attached listener fires it can read and write the
//! restored signals by key.
//!
//! # Computeds
//!
//! Derivations do not travel in the snapshot. A restored computed returns
//! the value captured on the server and never recomputes. Signals restore
//! fully.

use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::config::BootstrapConfig;
use super::document::Document;
use super::handlers::HandlerRegistry;
use super::snapshot::{Snapshot, STATE_MIME_TYPE, STATE_SCRIPT_ID};
use super::state::RestoredState;
use crate::error::{LoadResult, ResumeError};
use crate::reactive::{Computed, ComputedOptions, Runtime, Signal, SignalOptions};

pub type ErrorHook = Box<dyn Fn(&ResumeError) + Send + Sync>;
pub type ProgressHook = Box<dyn Fn(&str, f64) + Send + Sync>;

/// Callbacks invoked by [`Bootstrap::resume`].
#[derive(Default)]
pub struct ResumeHooks {
    on_error: Option<ErrorHook>,
    on_progress: Option<ProgressHook>,
}

impl ResumeHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called once when the pipeline fails, before the fallback decision.
    pub fn on_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ResumeError) + Send + Sync + 'static,
    {
        self.on_error = Some(Box::new(hook));
        self
    }

    /// Called with a phase label and a fraction in `0.0..=1.0`.
    pub fn on_progress<F>(mut self, hook: F) -> Self
    where
        F: Fn(&str, f64) + Send + Sync + 'static,
    {
        self.on_progress = Some(Box::new(hook));
        self
    }

    fn error(&self, err: &ResumeError) {
        if let Some(hook) = &self.on_error {
            hook(err);
        }
    }

    fn progress(&self, label: &str, fraction: f64) {
        if let Some(hook) = &self.on_progress {
            hook(label, fraction);
        }
    }
}

impl std::fmt::Debug for ResumeHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResumeHooks")
            .field("on_error", &self.on_error.is_some())
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

/// How a failed resume wants the caller to continue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fallback {
    /// Re-render and hydrate the page the conventional way.
    PartialHydration,
}

impl Fallback {
    pub fn as_str(&self) -> &'static str {
        match self {
            Fallback::PartialHydration => "partial-hydration",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResumeMetrics {
    pub resume_time: Duration,
    pub signals_restored: usize,
    pub computeds_restored: usize,
    pub listeners_restored: usize,
    pub components_resumed: usize,
}

/// Outcome of [`Bootstrap::resume`].
///
/// With fallback enabled a failure still reports `success: true`, carrying
/// the error and [`Fallback::PartialHydration`].
#[derive(Debug)]
pub struct ResumeResult {
    pub success: bool,
    pub fallback: Option<Fallback>,
    pub error: Option<ResumeError>,
    pub metrics: ResumeMetrics,
}

/// Wall-clock budget for one resume.
struct Deadline {
    started: Instant,
    limit: Option<Duration>,
}

impl Deadline {
    fn start(limit: Option<Duration>) -> Self {
        Self {
            started: Instant::now(),
            limit,
        }
    }

    fn unbounded() -> Self {
        Self::start(None)
    }

    fn check(&self, phase: &'static str) -> LoadResult<()> {
        let elapsed = self.started.elapsed();
        match self.limit {
            Some(limit) if elapsed >= limit => Err(ResumeError::Timeout { elapsed, phase }),
            _ => Ok(()),
        }
    }
}

/// Restores a snapshot embedded in a [`Document`].
pub struct Bootstrap<D: Document> {
    document: D,
    config: BootstrapConfig,
    hooks: ResumeHooks,
    handlers: HandlerRegistry,
    runtime: Runtime,
    state: RestoredState,
    resumed: bool,
}

impl<D: Document> Bootstrap<D> {
    /// A bootstrap over `document` that restores into the current runtime
    /// and resolves handlers through the global table.
    pub fn new(document: D, config: BootstrapConfig) -> Self {
        Self {
            document,
            config,
            hooks: ResumeHooks::default(),
            handlers: HandlerRegistry::global().clone(),
            runtime: Runtime::current(),
            state: RestoredState::new(),
            resumed: false,
        }
    }

    pub fn with_hooks(mut self, hooks: ResumeHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn with_runtime(mut self, runtime: Runtime) -> Self {
        self.runtime = runtime;
        self
    }

    /// Restore into `state` instead of a fresh table.
    pub fn with_state(mut self, state: RestoredState) -> Self {
        self.state = state;
        self
    }

    pub fn document(&self) -> &D {
        &self.document
    }

    pub fn config(&self) -> &BootstrapConfig {
        &self.config
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// The table restored nodes are written to. Clones share it.
    pub fn state(&self) -> &RestoredState {
        &self.state
    }

    /// Read the state script and check its version.
    pub fn try_load_snapshot(&self) -> LoadResult<Snapshot> {
        let script = self
            .document
            .script_element(STATE_SCRIPT_ID)
            .ok_or(ResumeError::NoSnapshot)?;
        if script.mime_type != STATE_MIME_TYPE {
            return Err(ResumeError::WrongMimeType {
                found: script.mime_type,
            });
        }
        let snapshot: Snapshot = serde_json::from_str(&script.text)?;
        snapshot.check_version(self.config.version_strategy)?;
        Ok(snapshot)
    }

    /// Like [`try_load_snapshot`](Self::try_load_snapshot), collapsing every
    /// failure to `None` after logging it.
    pub fn load_snapshot(&self) -> Option<Snapshot> {
        match self.try_load_snapshot() {
            Ok(snapshot) => Some(snapshot),
            Err(err) => {
                log_load_failure(&err);
                None
            }
        }
    }

    /// Create one live signal per entry. Returns how many were restored.
    pub fn restore_signals(&self, snapshot: &Snapshot) -> usize {
        self.restore_signals_within(snapshot, &Deadline::unbounded())
            .unwrap_or_default()
    }

    fn restore_signals_within(
        &self,
        snapshot: &Snapshot,
        deadline: &Deadline,
    ) -> LoadResult<usize> {
        let mut restored = 0;
        for (key, entry) in &snapshot.signals {
            deadline.check("restoring signals")?;
            if entry.id != *key {
                tracing::warn!(key = %key, id = %entry.id, "signal entry id does not match its key; skipped");
                continue;
            }
            if !entry.is_serializable {
                tracing::warn!(signal = %key, "signal entry is marked non-serializable; skipped");
                continue;
            }
            let signal = Signal::new_in(
                &self.runtime,
                entry.value.clone(),
                SignalOptions::default().with_key(key.clone()),
            );
            self.state.insert_signal(key.clone(), signal);
            restored += 1;
        }
        tracing::debug!(restored, total = snapshot.signals.len(), "signals restored");
        Ok(restored)
    }

    /// Create one computed per entry, each returning its captured value.
    pub fn restore_computeds(&self, snapshot: &Snapshot) -> usize {
        self.restore_computeds_within(snapshot, &Deadline::unbounded())
            .unwrap_or_default()
    }

    fn restore_computeds_within(
        &self,
        snapshot: &Snapshot,
        deadline: &Deadline,
    ) -> LoadResult<usize> {
        let mut restored = 0;
        for (key, entry) in &snapshot.computeds {
            deadline.check("restoring computeds")?;
            if entry.id != *key {
                tracing::warn!(key = %key, id = %entry.id, "computed entry id does not match its key; skipped");
                continue;
            }
            let mut options = ComputedOptions::default().with_key(key.clone());
            if let Some(source) = &entry.fn_source {
                options = options.with_source(source.clone());
            }
            let value = entry.value.clone();
            let computed = Computed::new_in(&self.runtime, move || value.clone(), options);
            self.state.insert_computed(key.clone(), computed);
            restored += 1;
        }
        tracing::debug!(restored, total = snapshot.computeds.len(), "computeds restored");
        Ok(restored)
    }

    /// Attach every recorded listener whose element and handler are found.
    /// Returns how many were attached.
    pub fn restore_listeners(&self, snapshot: &Snapshot) -> usize {
        self.restore_listeners_within(snapshot, &Deadline::unbounded())
            .unwrap_or_default()
    }

    fn restore_listeners_within(
        &self,
        snapshot: &Snapshot,
        deadline: &Deadline,
    ) -> LoadResult<usize> {
        let mut attached = 0;
        for record in snapshot.nodes.values() {
            deadline.check("restoring listeners")?;
            let Some(element) = self.document.element(&record.node_id) else {
                tracing::warn!(node = %record.node_id, "element not found; listeners skipped");
                continue;
            };
            for listener in &record.listeners {
                let Some(handler) = self.handlers.get(&listener.handler_id) else {
                    tracing::warn!(
                        node = %record.node_id,
                        handler = %listener.handler_id,
                        "handler not registered; listener skipped"
                    );
                    continue;
                };
                self.document.add_event_listener(
                    &element,
                    &listener.event,
                    handler,
                    listener.options.unwrap_or_default(),
                );
                attached += 1;
            }
        }
        tracing::debug!(attached, expected = snapshot.listener_count(), "listeners restored");
        Ok(attached)
    }

    /// Load the snapshot and restore everything from it.
    ///
    /// Only the first call does any work. Later calls return
    /// [`ResumeError::AlreadyResumed`] without touching the document or the
    /// hooks, so listeners are never attached twice.
    pub fn resume(&mut self) -> ResumeResult {
        if std::mem::replace(&mut self.resumed, true) {
            tracing::warn!("document already resumed; ignoring repeat call");
            return ResumeResult {
                success: false,
                fallback: None,
                error: Some(ResumeError::AlreadyResumed),
                metrics: ResumeMetrics::default(),
            };
        }
        let deadline = Deadline::start(self.config.timeout());

        match self.run(&deadline) {
            Ok(metrics) => {
                tracing::debug!(
                    elapsed = ?metrics.resume_time,
                    signals = metrics.signals_restored,
                    listeners = metrics.listeners_restored,
                    "resume complete"
                );
                ResumeResult {
                    success: true,
                    fallback: None,
                    error: None,
                    metrics,
                }
            }
            Err(err) => {
                self.state.clear();
                self.hooks.error(&err);
                if self.config.fallback_to_hydration {
                    tracing::warn!(error = %err, "resume failed; falling back to hydration");
                    ResumeResult {
                        success: true,
                        fallback: Some(Fallback::PartialHydration),
                        error: Some(err),
                        metrics: ResumeMetrics::default(),
                    }
                } else {
                    tracing::error!(error = %err, "resume failed");
                    ResumeResult {
                        success: false,
                        fallback: None,
                        error: Some(err),
                        metrics: ResumeMetrics::default(),
                    }
                }
            }
        }
    }

    fn run(&mut self, deadline: &Deadline) -> LoadResult<ResumeMetrics> {
        self.hooks.progress("loading snapshot", 0.1);
        let snapshot = self.try_load_snapshot().inspect_err(log_load_failure)?;
        deadline.check("loading snapshot")?;

        self.hooks.progress("restoring signals", 0.2);
        let signals_restored = self.restore_signals_within(&snapshot, deadline)?;

        self.hooks.progress("restoring computeds", 0.4);
        let computeds_restored = self.restore_computeds_within(&snapshot, deadline)?;

        self.hooks.progress("restoring listeners", 0.6);
        let listeners_restored = self.restore_listeners_within(&snapshot, deadline)?;

        self.hooks.progress("complete", 1.0);
        Ok(ResumeMetrics {
            resume_time: deadline.started.elapsed(),
            signals_restored,
            computeds_restored,
            listeners_restored,
            components_resumed: snapshot.components.len(),
        })
    }

    /// A restored signal by key.
    pub fn signal(&self, key: &str) -> Option<Signal<Value>> {
        self.state.signal(key)
    }

    /// A restored computed by key.
    pub fn computed(&self, key: &str) -> Option<Computed<Value>> {
        self.state.computed(key)
    }

    /// The current value of a restored signal, decoded as `T`.
    pub fn value_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.state.value_as(key)
    }
}

fn log_load_failure(err: &ResumeError) {
    match err {
        ResumeError::NoSnapshot => tracing::debug!("no snapshot in document"),
        ResumeError::IncompatibleVersion { found, expected } => tracing::warn!(
            found = %found,
            expected = %expected,
            "snapshot version is incompatible; ignoring it"
        ),
        other => tracing::warn!(error = %other, "snapshot could not be loaded"),
    }
}

impl<D: Document + std::fmt::Debug> std::fmt::Debug for Bootstrap<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bootstrap")
            .field("document", &self.document)
            .field("config", &self.config)
            .field("hooks", &self.hooks)
            .field("state", &self.state)
            .field("resumed", &self.resumed)
            .finish()
    }
}

use std::sync::atomic::{AtomicUsize, Ordering};

use folio_contracts::events::{EventPayload, EventWriter};
use serde_json::Value;
use tracing::{info, warn};

/// Receives run progress. `completed` never decreases within a run.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, completed: usize, total: usize, message: &str);

    /// A page-level problem the operator should see; the run continues.
    fn on_warning(&self, _message: &str) {}
}

/// Reports through `tracing`.
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn on_progress(&self, completed: usize, total: usize, message: &str) {
        info!(completed, total, "{message}");
    }

    fn on_warning(&self, message: &str) {
        warn!("{message}");
    }
}

/// Appends `progress` / `warning` events to the run's event log.
pub struct EventProgress {
    events: EventWriter,
}

impl EventProgress {
    pub fn new(events: EventWriter) -> Self {
        Self { events }
    }

    fn emit(&self, event_type: &str, payload: EventPayload) {
        if let Err(err) = self.events.emit(event_type, payload) {
            warn!(path = %self.events.path().display(), "failed writing event: {err:#}");
        }
    }
}

impl ProgressSink for EventProgress {
    fn on_progress(&self, completed: usize, total: usize, message: &str) {
        let mut payload = EventPayload::new();
        payload.insert("completed".to_string(), Value::Number(completed.into()));
        payload.insert("total".to_string(), Value::Number(total.into()));
        payload.insert("message".to_string(), Value::String(message.to_string()));
        self.emit("progress", payload);
    }

    fn on_warning(&self, message: &str) {
        let mut payload = EventPayload::new();
        payload.insert("message".to_string(), Value::String(message.to_string()));
        self.emit("warning", payload);
    }
}

#[derive(Default)]
pub struct FanoutProgress {
    sinks: Vec<Box<dyn ProgressSink>>,
}

impl FanoutProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<S: ProgressSink + 'static>(mut self, sink: S) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }
}

impl ProgressSink for FanoutProgress {
    fn on_progress(&self, completed: usize, total: usize, message: &str) {
        for sink in &self.sinks {
            sink.on_progress(completed, total, message);
        }
    }

    fn on_warning(&self, message: &str) {
        for sink in &self.sinks {
            sink.on_warning(message);
        }
    }
}

/// Shared counter the pipeline stages advance; safe to use from upload workers.
pub(crate) struct ProgressTracker<'a> {
    sink: &'a dyn ProgressSink,
    completed: AtomicUsize,
    total: usize,
}

impl<'a> ProgressTracker<'a> {
    pub(crate) fn new(sink: &'a dyn ProgressSink, total: usize) -> Self {
        Self {
            sink,
            completed: AtomicUsize::new(0),
            total,
        }
    }

    pub(crate) fn advance(&self, message: &str) {
        let completed = (self.completed.fetch_add(1, Ordering::SeqCst) + 1).min(self.total);
        self.sink.on_progress(completed, self.total, message);
    }

    /// Re-reports the current position with a new message.
    pub(crate) fn note(&self, message: &str) {
        let completed = self.completed.load(Ordering::SeqCst).min(self.total);
        self.sink.on_progress(completed, self.total, message);
    }

    pub(crate) fn finish(&self, message: &str) {
        self.completed.store(self.total, Ordering::SeqCst);
        self.sink.on_progress(self.total, self.total, message);
    }

    pub(crate) fn warn(&self, message: &str) {
        self.sink.on_warning(message);
    }
}

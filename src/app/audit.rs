use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::info;

use crate::app::models::{CommandEvent, CommandLogEntry};

/// Append-only timestamped line sink for command diagnostics. Injected
/// rather than reached through a global so tests can capture the stream.
pub trait AuditSink: Send + Sync {
    fn log_immediate(&self, message: &str);
}

/// Production sink: forwards to the tracing pipeline.
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn log_immediate(&self, message: &str) {
        info!(audit = true, "{message}");
    }
}

/// Capturing sink for tests and the smoke binary.
#[derive(Default)]
pub struct MemoryAuditSink {
    lines: Mutex<Vec<String>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

impl AuditSink for MemoryAuditSink {
    fn log_immediate(&self, message: &str) {
        if let Ok(mut guard) = self.lines.lock() {
            guard.push(format!("{} {message}", Utc::now().format("%Y-%m-%d %H:%M:%S%.3f")));
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditChange {
    EntryAdded,
    EntryUpdated,
    Cleared,
}

pub type AuditSubscriber = Arc<dyn Fn(AuditChange) + Send + Sync>;
pub type EventEmitter = Arc<dyn Fn(CommandEvent) + Send + Sync>;

pub const MAX_HISTORY: usize = 50;

/// Bounded command-history ring buffer shared between command-completion
/// callbacks and UI reads. All queue access happens under one lock; read
/// accessors return point-in-time snapshots.
pub struct CommandAuditLog {
    entries: Mutex<VecDeque<CommandLogEntry>>,
    capacity: usize,
    subscribers: Mutex<Vec<AuditSubscriber>>,
    visible: AtomicBool,
    expanded: AtomicBool,
}

impl CommandAuditLog {
    pub fn new() -> Self {
        Self::with_capacity(MAX_HISTORY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity: capacity.clamp(1, MAX_HISTORY),
            subscribers: Mutex::new(Vec::new()),
            visible: AtomicBool::new(false),
            expanded: AtomicBool::new(false),
        }
    }

    /// Consumes one runner lifecycle event: updates the matching
    /// `(command, start_time)` entry in place, or enqueues a new one and
    /// evicts oldest-first past capacity.
    pub fn record(&self, event: CommandEvent) {
        let change = {
            let mut entries = match self.entries.lock() {
                Ok(guard) => guard,
                Err(_) => return,
            };
            let position = entries.iter().position(|entry| {
                entry.command == event.command && entry.start_time == event.start_time
            });
            match position {
                Some(index) => {
                    if let Some(entry) = entries.get_mut(index) {
                        entry.status = event.status;
                        entry.end_time = event.end_time;
                        entry.duration = event.duration;
                        entry.output = event.output;
                        entry.error = event.error;
                        entry.exit_code = event.exit_code;
                    }
                    AuditChange::EntryUpdated
                }
                None => {
                    entries.push_back(event.into_entry());
                    while entries.len() > self.capacity {
                        entries.pop_front();
                    }
                    AuditChange::EntryAdded
                }
            }
        };
        self.notify(change);
    }

    /// Oldest-first snapshot of the retained history.
    pub fn history(&self) -> Vec<CommandLogEntry> {
        self.entries
            .lock()
            .map(|entries| entries.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn latest(&self) -> Option<CommandLogEntry> {
        self.entries
            .lock()
            .ok()
            .and_then(|entries| entries.back().cloned())
    }

    pub fn count(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
        self.notify(AuditChange::Cleared);
    }

    pub fn subscribe(&self, subscriber: AuditSubscriber) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.push(subscriber);
        }
    }

    /// Emitter handed to a `CommandRunner` to wire its lifecycle events
    /// into this log.
    pub fn event_emitter(self: &Arc<Self>) -> EventEmitter {
        let log = Arc::clone(self);
        Arc::new(move |event| log.record(event))
    }

    pub fn is_visible(&self) -> bool {
        self.visible.load(Ordering::Relaxed)
    }

    pub fn show(&self) {
        self.visible.store(true, Ordering::Relaxed);
    }

    pub fn hide(&self) {
        self.visible.store(false, Ordering::Relaxed);
    }

    pub fn toggle_visibility(&self) -> bool {
        !self.visible.fetch_xor(true, Ordering::Relaxed)
    }

    pub fn is_expanded(&self) -> bool {
        self.expanded.load(Ordering::Relaxed)
    }

    pub fn expand(&self) {
        self.expanded.store(true, Ordering::Relaxed);
    }

    pub fn collapse(&self) {
        self.expanded.store(false, Ordering::Relaxed);
    }

    pub fn toggle_expanded(&self) -> bool {
        !self.expanded.fetch_xor(true, Ordering::Relaxed)
    }

    fn notify(&self, change: AuditChange) {
        let subscribers = match self.subscribers.lock() {
            Ok(guard) => guard.clone(),
            Err(_) => return,
        };
        for subscriber in subscribers {
            subscriber(change);
        }
    }
}

impl Default for CommandAuditLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::models::CommandStatus;
    use chrono::{Duration as ChronoDuration, Utc};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn starting_event(command: &str, offset_ms: i64) -> CommandEvent {
        CommandEvent {
            command: command.to_string(),
            start_time: Utc::now() + ChronoDuration::milliseconds(offset_ms),
            end_time: None,
            duration: None,
            status: CommandStatus::Starting,
            output: None,
            error: None,
            exit_code: None,
        }
    }

    #[test]
    fn updates_matching_entry_in_place() {
        let log = CommandAuditLog::new();
        let start = starting_event("adb devices -l", 0);
        log.record(start.clone());
        assert_eq!(log.count(), 1);
        assert_eq!(log.latest().map(|entry| entry.status), Some(CommandStatus::Starting));

        let mut done = start;
        done.status = CommandStatus::Success;
        done.end_time = Some(Utc::now());
        done.duration = Some(Duration::from_millis(12));
        done.exit_code = Some(0);
        log.record(done);

        assert_eq!(log.count(), 1);
        let latest = log.latest().expect("entry");
        assert_eq!(latest.status, CommandStatus::Success);
        assert_eq!(latest.exit_code, Some(0));
    }

    #[test]
    fn evicts_oldest_beyond_capacity() {
        let log = CommandAuditLog::new();
        for index in 0..60 {
            log.record(starting_event(&format!("cmd-{index}"), index));
        }
        let history = log.history();
        assert_eq!(history.len(), 50);
        assert_eq!(history[0].command, "cmd-10");
        assert_eq!(history[49].command, "cmd-59");
    }

    #[test]
    fn notifies_subscribers_on_add_update_clear() {
        let log = CommandAuditLog::new();
        let adds = Arc::new(AtomicUsize::new(0));
        let updates = Arc::new(AtomicUsize::new(0));
        let clears = Arc::new(AtomicUsize::new(0));
        let (adds_sub, updates_sub, clears_sub) =
            (Arc::clone(&adds), Arc::clone(&updates), Arc::clone(&clears));
        log.subscribe(Arc::new(move |change| match change {
            AuditChange::EntryAdded => {
                adds_sub.fetch_add(1, Ordering::SeqCst);
            }
            AuditChange::EntryUpdated => {
                updates_sub.fetch_add(1, Ordering::SeqCst);
            }
            AuditChange::Cleared => {
                clears_sub.fetch_add(1, Ordering::SeqCst);
            }
        }));

        let start = starting_event("adb version", 0);
        log.record(start.clone());
        let mut done = start;
        done.status = CommandStatus::Failed;
        log.record(done);
        log.clear();

        assert_eq!(adds.load(Ordering::SeqCst), 1);
        assert_eq!(updates.load(Ordering::SeqCst), 1);
        assert_eq!(clears.load(Ordering::SeqCst), 1);
        assert_eq!(log.count(), 0);
    }

    #[test]
    fn visibility_and_expansion_toggles() {
        let log = CommandAuditLog::new();
        assert!(!log.is_visible());
        assert!(log.toggle_visibility());
        assert!(log.is_visible());
        log.hide();
        assert!(!log.is_visible());
        log.expand();
        assert!(log.is_expanded());
        assert!(!log.toggle_expanded());
    }

    #[test]
    fn memory_sink_prefixes_timestamps() {
        let sink = MemoryAuditSink::new();
        sink.log_immediate("Executing: adb version");
        let lines = sink.lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].ends_with("Executing: adb version"));
        assert!(lines[0].len() > "Executing: adb version".len());
    }
}

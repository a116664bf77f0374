use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::trace;

/// The kinds of events a session emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Thinking,
    ToolCall,
    ToolResult,
    TaskUpdate,
    Message,
    Review,
    Complete,
    Error,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventKind::Thinking => "thinking",
            EventKind::ToolCall => "tool_call",
            EventKind::ToolResult => "tool_result",
            EventKind::TaskUpdate => "task_update",
            EventKind::Message => "message",
            EventKind::Review => "review",
            EventKind::Complete => "complete",
            EventKind::Error => "error",
        };
        f.write_str(s)
    }
}

/// One entry of a session's event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEvent {
    /// Position in the log, starting at 0.
    pub seq: u64,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

/// Append-only, time-ordered event log with live fan-out.
///
/// Entries are never rewritten. Live observers subscribe to a broadcast
/// channel; late observers replay with [`EventLog::since`].
pub struct EventLog {
    entries: RwLock<Vec<AgentEvent>>,
    sender: broadcast::Sender<AgentEvent>,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            entries: RwLock::new(Vec::new()),
            sender,
        }
    }

    /// Append an event and publish it to live subscribers.
    pub fn emit(&self, kind: EventKind, data: Value) -> AgentEvent {
        let event = {
            let mut entries = self.entries.write();
            let now = Utc::now();
            // Clock adjustments must not reorder the log.
            let timestamp = match entries.last() {
                Some(last) if last.timestamp > now => last.timestamp,
                _ => now,
            };
            let event = AgentEvent {
                seq: entries.len() as u64,
                kind,
                data,
                timestamp,
            };
            entries.push(event.clone());
            event
        };
        match self.sender.send(event.clone()) {
            Ok(receivers) => trace!(seq = event.seq, kind = ?event.kind, receivers, "event emitted"),
            Err(_) => trace!(seq = event.seq, kind = ?event.kind, "event emitted with no subscribers"),
        }
        event
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.sender.subscribe()
    }

    /// All events in emitted order.
    pub fn snapshot(&self) -> Vec<AgentEvent> {
        self.entries.read().clone()
    }

    /// Events with `seq >= from`, in emitted order.
    pub fn since(&self, from: u64) -> Vec<AgentEvent> {
        let entries = self.entries.read();
        let start = (from as usize).min(entries.len());
        entries[start..].to_vec()
    }

    pub fn last(&self) -> Option<AgentEvent> {
        self.entries.read().last().cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.entries.read().iter().filter(|e| e.kind == kind).count()
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl std::fmt::Debug for EventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLog").field("len", &self.len()).finish()
    }
}

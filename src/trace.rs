//! Event tracing and state snapshots for diagnostics.
//!
//! A ring buffer keeps the most recent events the engine handled. The
//! dump-state action serializes the full manager state plus this buffer
//! through the log, which is usually enough to reconstruct what happened
//! without attaching a debugger to a running session.

use std::collections::VecDeque;

use serde::Serialize;

use crate::layout::LayoutMode;
use crate::registry::Mode;
use crate::types::Rect;

/// Maximum number of events kept in the trace buffer.
const DEFAULT_MAX_ENTRIES: usize = 256;

/// One traced event.
#[derive(Debug, Clone, Serialize)]
pub struct TraceEntry {
    pub sequence: u64,
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window: Option<u32>,
    pub details: String,
}

/// Ring buffer of recent events.
#[derive(Debug)]
pub struct EventTrace {
    entries: VecDeque<TraceEntry>,
    max_entries: usize,
    sequence: u64,
}

impl EventTrace {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_ENTRIES)
    }

    pub fn with_capacity(max_entries: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(max_entries),
            max_entries,
            sequence: 0,
        }
    }

    pub fn record(&mut self, event: &str, window: Option<u32>, details: String) {
        if self.entries.len() >= self.max_entries {
            self.entries.pop_front();
        }
        self.sequence += 1;
        self.entries.push_back(TraceEntry {
            sequence: self.sequence,
            event: event.to_string(),
            window,
            details,
        });
    }

    /// The last `n` entries, oldest first.
    pub fn recent(&self, n: usize) -> Vec<TraceEntry> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for EventTrace {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializable snapshot of one managed client.
#[derive(Debug, Clone, Serialize)]
pub struct ClientSnapshot {
    pub id: u32,
    pub class: String,
    pub mode: Mode,
    pub mapped: bool,
    pub sticky: bool,
    pub geometry: Rect,
}

/// Serializable snapshot of one workspace.
#[derive(Debug, Clone, Serialize)]
pub struct WorkspaceSnapshot {
    pub id: usize,
    pub mode: LayoutMode,
    pub windows: Vec<ClientSnapshot>,
}

/// Full manager state, as dumped by the dump-state action.
#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub focused: Option<u32>,
    pub active_workspace: usize,
    pub workspaces: Vec<WorkspaceSnapshot>,
    pub recent_events: Vec<TraceEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_and_recent() {
        let mut trace = EventTrace::new();
        trace.record("map_request", Some(42), String::new());

        let entries = trace.recent(10);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].event, "map_request");
        assert_eq!(entries[0].window, Some(42));
        assert_eq!(entries[0].sequence, 1);
    }

    #[test]
    fn ring_buffer_drops_oldest() {
        let mut trace = EventTrace::with_capacity(3);
        for i in 0..5 {
            trace.record(&format!("event{}", i), None, String::new());
        }

        let entries = trace.recent(10);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].event, "event2");
        assert_eq!(entries[2].event, "event4");
        // Sequence numbers keep counting across evictions.
        assert_eq!(entries[2].sequence, 5);
    }

    #[test]
    fn recent_limits_to_n() {
        let mut trace = EventTrace::new();
        for i in 0..10 {
            trace.record(&format!("event{}", i), None, String::new());
        }

        let last = trace.recent(2);
        assert_eq!(last.len(), 2);
        assert_eq!(last[0].event, "event8");
        assert_eq!(last[1].event, "event9");
    }

    #[test]
    fn snapshot_serializes() {
        let snapshot = StateSnapshot {
            focused: Some(7),
            active_workspace: 0,
            workspaces: vec![WorkspaceSnapshot {
                id: 0,
                mode: LayoutMode::MasterStack,
                windows: vec![ClientSnapshot {
                    id: 7,
                    class: "xterm".to_string(),
                    mode: Mode::Tiled,
                    mapped: true,
                    sticky: false,
                    geometry: Rect::new(0, 0, 600, 800),
                }],
            }],
            recent_events: Vec::new(),
        };

        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("\"focused\":7"));
        assert!(json.contains("master-stack"));
        assert!(json.contains("tiled"));
    }
}

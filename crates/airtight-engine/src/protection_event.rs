//! Structured audit events shared by the freezer, the guard and the policy
//! runner.
//!
//! Events accumulate in memory and are drained by the caller; nothing is
//! written to stdout or stderr from library code.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Structured event emitted by enforcement operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectionEvent {
    pub trace_id: String,
    pub component: String,
    pub event: String,
    pub outcome: String,
    /// Root binding name or object handle the event concerns.
    pub subject: String,
    pub error_code: Option<String>,
}

/// Accumulated events plus per-event counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLog {
    events: Vec<ProtectionEvent>,
    event_counts: BTreeMap<String, u64>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful event.
    pub fn pass(&mut self, trace_id: &str, component: &str, event: &str, subject: &str) {
        self.push(trace_id, component, event, "pass", subject, None);
    }

    /// Record a skipped or refused step that is not a failure.
    pub fn skip(
        &mut self,
        trace_id: &str,
        component: &str,
        event: &str,
        subject: &str,
        error_code: &str,
    ) {
        self.push(
            trace_id,
            component,
            event,
            "skip",
            subject,
            Some(error_code),
        );
    }

    /// Record a failed step.
    pub fn fail(
        &mut self,
        trace_id: &str,
        component: &str,
        event: &str,
        subject: &str,
        error_code: &str,
    ) {
        self.push(
            trace_id,
            component,
            event,
            "fail",
            subject,
            Some(error_code),
        );
    }

    /// Events recorded so far.
    pub fn events(&self) -> &[ProtectionEvent] {
        &self.events
    }

    /// Drain accumulated events.
    pub fn drain_events(&mut self) -> Vec<ProtectionEvent> {
        std::mem::take(&mut self.events)
    }

    /// Event counters, keyed by event name. Not reset by draining.
    pub fn event_counts(&self) -> &BTreeMap<String, u64> {
        &self.event_counts
    }

    /// Move every event and counter of `other` into this log.
    pub fn absorb(&mut self, other: &mut EventLog) {
        self.events.append(&mut other.events);
        for (event, count) in std::mem::take(&mut other.event_counts) {
            *self.event_counts.entry(event).or_insert(0) += count;
        }
    }

    fn push(
        &mut self,
        trace_id: &str,
        component: &str,
        event: &str,
        outcome: &str,
        subject: &str,
        error_code: Option<&str>,
    ) {
        self.events.push(ProtectionEvent {
            trace_id: trace_id.to_string(),
            component: component.to_string(),
            event: event.to_string(),
            outcome: outcome.to_string(),
            subject: subject.to_string(),
            error_code: error_code.map(str::to_string),
        });
        *self.event_counts.entry(event.to_string()).or_insert(0) += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_empties_events_but_keeps_counts() {
        let mut log = EventLog::new();
        log.pass("t", "graph_freezer", "node_frozen", "object#0");
        log.pass("t", "graph_freezer", "node_frozen", "object#1");
        log.skip("t", "graph_freezer", "host_refused", "object#1.slot", "FE-FREEZE-0001");

        let drained = log.drain_events();
        assert_eq!(drained.len(), 3);
        assert_eq!(drained[2].outcome, "skip");
        assert_eq!(drained[2].error_code.as_deref(), Some("FE-FREEZE-0001"));
        assert!(log.events().is_empty());
        assert_eq!(log.event_counts().get("node_frozen"), Some(&2));
    }

    #[test]
    fn absorb_merges_counters() {
        let mut a = EventLog::new();
        let mut b = EventLog::new();
        a.pass("t", "c", "e", "s");
        b.pass("t", "c", "e", "s");
        b.fail("t", "c", "f", "s", "FE-X");
        a.absorb(&mut b);
        assert_eq!(a.events().len(), 3);
        assert_eq!(a.event_counts().get("e"), Some(&2));
        assert!(b.events().is_empty());
        assert!(b.event_counts().is_empty());
    }

    #[test]
    fn event_serde_shape() {
        let mut log = EventLog::new();
        log.pass("trace-1", "protection_policy", "protection_complete", "*");
        let json = serde_json::to_value(&log.events()[0]).unwrap();
        assert_eq!(json["component"], "protection_policy");
        assert_eq!(json["error_code"], serde_json::Value::Null);
    }
}

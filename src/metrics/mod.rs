use crate::logging::{LogEvent, LogFields, LogLevel};
use serde_json::json;
use std::time::Duration;

#[derive(Debug, Default, Clone)]
pub struct StageMetrics {
    events: u64,
    evaluations: u64,
    evaluations_skipped: u64,
    pin_actions: u64,
    pin_actions_dropped: u64,
    layout_changes: u64,
    waiting_shown: u64,
    waiting_expired: u64,
}

impl StageMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_event(&mut self) {
        self.events = self.events.saturating_add(1);
    }

    /// `evaluated` is false when the controller skipped because its key did not change.
    pub fn record_evaluation(&mut self, evaluated: bool) {
        if evaluated {
            self.evaluations = self.evaluations.saturating_add(1);
        } else {
            self.evaluations_skipped = self.evaluations_skipped.saturating_add(1);
        }
    }

    pub fn record_pin_action(&mut self, delivered: bool) {
        self.pin_actions = self.pin_actions.saturating_add(1);
        if !delivered {
            self.pin_actions_dropped = self.pin_actions_dropped.saturating_add(1);
        }
    }

    pub fn record_layout_change(&mut self) {
        self.layout_changes = self.layout_changes.saturating_add(1);
    }

    pub fn record_waiting_shown(&mut self) {
        self.waiting_shown = self.waiting_shown.saturating_add(1);
    }

    pub fn record_waiting_expired(&mut self) {
        self.waiting_expired = self.waiting_expired.saturating_add(1);
    }

    pub fn snapshot(&self, uptime: Duration) -> MetricSnapshot {
        MetricSnapshot {
            uptime_ms: uptime.as_millis() as u64,
            events: self.events,
            evaluations: self.evaluations,
            evaluations_skipped: self.evaluations_skipped,
            pin_actions: self.pin_actions,
            pin_actions_dropped: self.pin_actions_dropped,
            layout_changes: self.layout_changes,
            waiting_shown: self.waiting_shown,
            waiting_expired: self.waiting_expired,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricSnapshot {
    pub uptime_ms: u64,
    pub events: u64,
    pub evaluations: u64,
    pub evaluations_skipped: u64,
    pub pin_actions: u64,
    pub pin_actions_dropped: u64,
    pub layout_changes: u64,
    pub waiting_shown: u64,
    pub waiting_expired: u64,
}

impl MetricSnapshot {
    pub fn to_log_event(&self, target: &str) -> LogEvent {
        LogEvent::with_fields(LogLevel::Info, target, "stage_metrics", self.as_fields())
    }

    pub fn as_fields(&self) -> LogFields {
        let mut map = LogFields::new();
        map.insert("uptime_ms".to_string(), json!(self.uptime_ms));
        map.insert("events".to_string(), json!(self.events));
        map.insert("evaluations".to_string(), json!(self.evaluations));
        map.insert(
            "evaluations_skipped".to_string(),
            json!(self.evaluations_skipped),
        );
        map.insert("pin_actions".to_string(), json!(self.pin_actions));
        map.insert(
            "pin_actions_dropped".to_string(),
            json!(self.pin_actions_dropped),
        );
        map.insert("layout_changes".to_string(), json!(self.layout_changes));
        map.insert("waiting_shown".to_string(), json!(self.waiting_shown));
        map.insert("waiting_expired".to_string(), json!(self.waiting_expired));
        map
    }
}

//! Stage lifecycle audit hooks.
//!
//! Records capture a stage checkpoint plus structured details so callers can
//! log, buffer, or replay what the runtime decided without reaching into the
//! dispatch loop.

use std::sync::Mutex;
use std::time::SystemTime;

use serde_json::Value;

/// Checkpoints emitted by `StageRuntime`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageAuditStage {
    SessionStarted,
    /// Pin store mounted or unmounted.
    PinStoreMounted,
    PinStoreUnmounted,
    /// Controller ran its policy on a new derived key.
    SnapshotEvaluated,
    PinActionIssued,
    /// Action produced while no pin store was mounted.
    PinActionDropped,
    LayoutChanged,
    WaitingScheduled,
    WaitingExpired,
    WaitingCleared,
    SessionStopped,
}

#[derive(Debug, Clone)]
pub struct StageAuditEvent {
    pub timestamp: SystemTime,
    pub stage: StageAuditStage,
    pub details: Vec<(String, Value)>,
}

impl StageAuditEvent {
    fn new(stage: StageAuditStage) -> Self {
        Self {
            timestamp: SystemTime::now(),
            stage,
            details: Vec::new(),
        }
    }

    pub fn detail(&self, key: &str) -> Option<&Value> {
        self.details.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }
}

pub struct StageAuditEventBuilder {
    event: StageAuditEvent,
}

impl StageAuditEventBuilder {
    pub fn new(stage: StageAuditStage) -> Self {
        Self {
            event: StageAuditEvent::new(stage),
        }
    }

    pub fn detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.event.details.push((key.into(), value.into()));
        self
    }

    pub fn finish(self) -> StageAuditEvent {
        self.event
    }
}

pub trait StageAudit: Send + Sync {
    fn record(&self, event: StageAuditEvent);
}

#[derive(Debug, Default)]
pub struct NullStageAudit;

impl StageAudit for NullStageAudit {
    fn record(&self, _event: StageAuditEvent) {}
}

/// Keeps every record in memory, in arrival order.
#[derive(Debug, Default)]
pub struct BufferedStageAudit {
    events: Mutex<Vec<StageAuditEvent>>,
}

impl BufferedStageAudit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<StageAuditEvent> {
        self.events
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    pub fn stages(&self) -> Vec<StageAuditStage> {
        self.events().into_iter().map(|e| e.stage).collect()
    }
}

impl StageAudit for BufferedStageAudit {
    fn record(&self, event: StageAuditEvent) {
        if let Ok(mut guard) = self.events.lock() {
            guard.push(event);
        }
    }
}

//! Transient waiting-room notification and the waiting-room counter.
//!
//! The notifier is a deadline, not a thread: the owner polls it with the
//! current instant on every turn. Replacing or clearing the message drops the
//! old deadline, so at most one expiry is ever pending.

use std::time::{Duration, Instant};

/// How long a waiting notification stays up after its latest `set_message`.
pub const WAITING_NOTIFICATION_DELAY: Duration = Duration::from_millis(3000);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitingNotification {
    pub message: String,
    pub expires_at: Instant,
}

#[derive(Debug)]
pub struct WaitingNotifier {
    delay: Duration,
    enabled: bool,
    active: Option<WaitingNotification>,
}

impl Default for WaitingNotifier {
    fn default() -> Self {
        Self::new(WAITING_NOTIFICATION_DELAY, true)
    }
}

impl WaitingNotifier {
    pub fn new(delay: Duration, enabled: bool) -> Self {
        Self {
            delay,
            enabled,
            active: None,
        }
    }

    /// Capability gate, driven by whether the participant panel is offered.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Show `message` until `now + delay`, replacing any pending one.
    /// Returns false without touching state when the gate is closed.
    pub fn set_message(&mut self, message: impl Into<String>, now: Instant) -> bool {
        if !self.enabled {
            return false;
        }
        self.active = Some(WaitingNotification {
            message: message.into(),
            expires_at: now + self.delay,
        });
        true
    }

    /// Expire the notification if its deadline has passed. Returns the expired one.
    pub fn poll(&mut self, now: Instant) -> Option<WaitingNotification> {
        match &self.active {
            Some(active) if now >= active.expires_at => self.active.take(),
            _ => None,
        }
    }

    /// Cancel any pending expiry and go idle. Returns true if something was shown.
    pub fn clear(&mut self) -> bool {
        self.active.take().is_some()
    }

    pub fn current(&self) -> Option<&WaitingNotification> {
        self.active.as_ref()
    }

    pub fn message(&self) -> Option<&str> {
        self.active.as_ref().map(|n| n.message.as_str())
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.active.as_ref().map(|n| n.expires_at)
    }
}

/// Pass-through store for the waiting-room size. No clamping.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WaitingRoomCounter {
    count: i64,
}

impl WaitingRoomCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the count. Returns true when the value changed.
    pub fn update_count(&mut self, count: i64) -> bool {
        let changed = self.count != count;
        self.count = count;
        changed
    }

    pub fn count(&self) -> i64 {
        self.count
    }
}

//! Automatic pinning of screen shares.
//!
//! The controller watches each snapshot and pins the first live screen share
//! when it has not pinned one itself, and clears the pin once the share it
//! pinned goes away. It only remembers what it wrote; a pin set by anyone else
//! is invisible to it except through that identity check.

use blake3::{Hash, Hasher};

use super::pin::PinAction;
use crate::tracks::{TrackReference, TrackSnapshot};

/// Digest of the ordered screen-share ids plus the pinned id.
///
/// Two snapshots that rebuild identical track values produce the same key, so
/// the controller does not re-run on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenShareKey(Hash);

impl ScreenShareKey {
    pub fn derive(snapshot: &TrackSnapshot, pinned_id: Option<&str>) -> Self {
        let mut hasher = Hasher::new();
        for track in snapshot.screen_shares() {
            write_field(&mut hasher, track.track_id.as_bytes());
        }
        match pinned_id {
            Some(id) => {
                hasher.update(&[1]);
                write_field(&mut hasher, id.as_bytes());
            }
            None => {
                hasher.update(&[0]);
            }
        }
        Self(hasher.finalize())
    }
}

// Length prefix keeps ["ab", "c"] and ["a", "bc"] apart.
fn write_field(hasher: &mut Hasher, bytes: &[u8]) {
    hasher.update(&(bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

/// Result of offering a snapshot to the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evaluation {
    /// Derived key unchanged since the last evaluation.
    Skipped,
    /// Policy ran; at most one action to dispatch.
    Evaluated(Option<PinAction>),
}

impl Evaluation {
    pub fn action(&self) -> Option<&PinAction> {
        match self {
            Evaluation::Evaluated(action) => action.as_ref(),
            Evaluation::Skipped => None,
        }
    }

    pub fn into_action(self) -> Option<PinAction> {
        match self {
            Evaluation::Evaluated(action) => action,
            Evaluation::Skipped => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct AutoFocusController {
    last_auto_pinned: Option<String>,
    last_key: Option<ScreenShareKey>,
}

impl AutoFocusController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the policy if the derived key moved since the previous call.
    pub fn observe(
        &mut self,
        snapshot: &TrackSnapshot,
        current_pin: Option<&TrackReference>,
    ) -> Evaluation {
        let key = ScreenShareKey::derive(snapshot, current_pin.map(|t| t.track_id.as_str()));
        if self.last_key == Some(key) {
            return Evaluation::Skipped;
        }
        self.last_key = Some(key);
        Evaluation::Evaluated(self.decide(snapshot))
    }

    /// The policy itself; exactly one branch applies.
    ///
    /// Rule 1 does not look at the current pin, so it replaces a pin set by
    /// the user whenever the controller holds no auto-pin of its own.
    pub fn decide(&mut self, snapshot: &TrackSnapshot) -> Option<PinAction> {
        let shares = snapshot.screen_shares();

        if self.last_auto_pinned.is_none() {
            if let Some(first) = shares.first() {
                self.last_auto_pinned = Some(first.track_id.clone());
                return Some(PinAction::set((*first).clone()));
            }
        }

        if let Some(pinned) = self.last_auto_pinned.as_deref() {
            if !shares.iter().any(|t| t.track_id == pinned) {
                self.last_auto_pinned = None;
                return Some(PinAction::ClearPin);
            }
        }

        None
    }

    pub fn last_auto_pinned(&self) -> Option<&str> {
        self.last_auto_pinned.as_deref()
    }

    /// Forget both the auto-pin and the last key.
    pub fn reset(&mut self) {
        self.last_auto_pinned = None;
        self.last_key = None;
    }
}

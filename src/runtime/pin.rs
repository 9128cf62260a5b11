use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::tracks::TrackReference;

/// Messages accepted on the pin channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "msg", rename_all = "snake_case")]
pub enum PinAction {
    SetPin {
        #[serde(rename = "trackReference")]
        track_reference: TrackReference,
    },
    ClearPin,
}

impl PinAction {
    pub fn set(track: TrackReference) -> Self {
        Self::SetPin {
            track_reference: track,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PinAction::SetPin { .. } => "set_pin",
            PinAction::ClearPin => "clear_pin",
        }
    }
}

/// Anything that consumes pin actions.
pub trait PinSink: Send + Sync {
    fn dispatch(&self, action: PinAction);
}

/// Holds zero or one pinned track.
#[derive(Debug, Default)]
pub struct PinStore {
    inner: RwLock<Option<TrackReference>>,
}

impl PinStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_pin(&self, track: TrackReference) {
        if let Ok(mut guard) = self.inner.write() {
            *guard = Some(track);
        }
    }

    pub fn clear_pin(&self) {
        if let Ok(mut guard) = self.inner.write() {
            *guard = None;
        }
    }

    pub fn current(&self) -> Option<TrackReference> {
        self.inner.read().ok().and_then(|guard| guard.clone())
    }

    pub fn pinned_id(&self) -> Option<String> {
        self.current().map(|track| track.track_id)
    }
}

impl PinSink for PinStore {
    fn dispatch(&self, action: PinAction) {
        match action {
            PinAction::SetPin { track_reference } => self.set_pin(track_reference),
            PinAction::ClearPin => self.clear_pin(),
        }
    }
}

pub type SharedPin = Arc<PinStore>;

/// Send `action` to `sink` if one is ready. Returns whether it was delivered;
/// an absent sink drops the action without queueing it.
pub fn dispatch_pin(sink: Option<&dyn PinSink>, action: PinAction) -> bool {
    match sink {
        Some(sink) => {
            sink.dispatch(action);
            true
        }
        None => false,
    }
}

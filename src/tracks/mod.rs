//! Track references and the snapshot source contract.
//!
//! The stage never talks to the media transport. It receives an ordered
//! [`TrackSnapshot`] from a [`TrackSnapshotSource`] whenever one of the room
//! events in that source's refresh set fires, or pushed directly by a
//! collaborator.

use std::sync::RwLock;

use serde::{Deserialize, Serialize};

/// Kind of publication a track reference points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackSource {
    Camera,
    ScreenShare,
}

/// One tile's worth of media: a live publication, or a placeholder for a
/// participant that has nothing published for `source`.
///
/// Equality compares every field, so a re-published track with a fresh id is
/// a different reference even for the same participant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackReference {
    pub source: TrackSource,
    pub track_id: String,
    #[serde(default)]
    pub participant: String,
    #[serde(default)]
    pub is_placeholder: bool,
}

impl TrackReference {
    pub fn camera(participant: impl Into<String>, track_id: impl Into<String>) -> Self {
        Self {
            source: TrackSource::Camera,
            track_id: track_id.into(),
            participant: participant.into(),
            is_placeholder: false,
        }
    }

    pub fn screen_share(participant: impl Into<String>, track_id: impl Into<String>) -> Self {
        Self {
            source: TrackSource::ScreenShare,
            track_id: track_id.into(),
            participant: participant.into(),
            is_placeholder: false,
        }
    }

    /// Camera slot for a participant with no active camera publication.
    pub fn placeholder(participant: impl Into<String>) -> Self {
        let participant = participant.into();
        Self {
            source: TrackSource::Camera,
            track_id: format!("placeholder:{participant}"),
            participant,
            is_placeholder: true,
        }
    }

    /// Placeholders never count, whatever their source says.
    pub fn is_screen_share(&self) -> bool {
        self.source == TrackSource::ScreenShare && !self.is_placeholder
    }
}

/// Tracks in arrival/publish order. No other ordering is applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackSnapshot {
    tracks: Vec<TrackReference>,
}

impl TrackSnapshot {
    pub fn new(tracks: Vec<TrackReference>) -> Self {
        Self { tracks }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TrackReference> {
        self.tracks.iter()
    }

    pub fn as_slice(&self) -> &[TrackReference] {
        &self.tracks
    }

    pub fn contains(&self, track: &TrackReference) -> bool {
        self.tracks.iter().any(|t| t == track)
    }

    /// Live screen-share tracks, preserving snapshot order.
    pub fn screen_shares(&self) -> Vec<&TrackReference> {
        self.tracks.iter().filter(|t| t.is_screen_share()).collect()
    }

    pub fn into_vec(self) -> Vec<TrackReference> {
        self.tracks
    }
}

impl FromIterator<TrackReference> for TrackSnapshot {
    fn from_iter<I: IntoIterator<Item = TrackReference>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a TrackSnapshot {
    type Item = &'a TrackReference;
    type IntoIter = std::slice::Iter<'a, TrackReference>;

    fn into_iter(self) -> Self::IntoIter {
        self.tracks.iter()
    }
}

/// Room-level notifications that may invalidate the current snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomEvent {
    ActiveSpeakersChanged,
    TrackPublished,
    TrackUnpublished,
    TrackMuted,
    TrackUnmuted,
    ParticipantConnected,
    ParticipantDisconnected,
    ConnectionStateChanged,
}

/// Events that trigger a refresh unless a source overrides `refreshes_on`.
pub const DEFAULT_REFRESH_EVENTS: &[RoomEvent] = &[
    RoomEvent::ActiveSpeakersChanged,
    RoomEvent::TrackPublished,
    RoomEvent::TrackUnpublished,
    RoomEvent::ParticipantConnected,
    RoomEvent::ParticipantDisconnected,
];

/// Supplies the current track list on demand.
pub trait TrackSnapshotSource: Send + Sync {
    fn snapshot(&self) -> TrackSnapshot;

    fn refreshes_on(&self, event: &RoomEvent) -> bool {
        DEFAULT_REFRESH_EVENTS.contains(event)
    }
}

/// In-memory source. Embedders replace the snapshot as their transport
/// reports changes and let the runtime pull it on the next room event.
#[derive(Debug, Default)]
pub struct StaticTrackSource {
    current: RwLock<TrackSnapshot>,
    refresh_on: Option<Vec<RoomEvent>>,
}

impl StaticTrackSource {
    pub fn new(snapshot: TrackSnapshot) -> Self {
        Self {
            current: RwLock::new(snapshot),
            refresh_on: None,
        }
    }

    pub fn with_refresh_on(mut self, events: impl IntoIterator<Item = RoomEvent>) -> Self {
        self.refresh_on = Some(events.into_iter().collect());
        self
    }

    pub fn replace(&self, snapshot: TrackSnapshot) {
        if let Ok(mut guard) = self.current.write() {
            *guard = snapshot;
        }
    }
}

impl TrackSnapshotSource for StaticTrackSource {
    fn snapshot(&self) -> TrackSnapshot {
        self.current
            .read()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    fn refreshes_on(&self, event: &RoomEvent) -> bool {
        match &self.refresh_on {
            Some(events) => events.contains(event),
            None => DEFAULT_REFRESH_EVENTS.contains(event),
        }
    }
}

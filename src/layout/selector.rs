use serde::Serialize;

use crate::tracks::{TrackReference, TrackSnapshot};

/// Which of the two presentations is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutMode {
    Grid,
    Focus,
}

/// Layout decision handed to the rendering collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum StageLayout {
    /// Every track, placeholders included, in snapshot order.
    Grid { tracks: Vec<TrackReference> },
    /// One large track plus the secondary strip, which never holds `focus`.
    Focus {
        focus: TrackReference,
        carousel: Vec<TrackReference>,
    },
}

impl StageLayout {
    pub fn mode(&self) -> LayoutMode {
        match self {
            StageLayout::Grid { .. } => LayoutMode::Grid,
            StageLayout::Focus { .. } => LayoutMode::Focus,
        }
    }

    pub fn focus_track(&self) -> Option<&TrackReference> {
        match self {
            StageLayout::Grid { .. } => None,
            StageLayout::Focus { focus, .. } => Some(focus),
        }
    }

    /// Secondary strip; `None` in grid mode where the strip does not exist.
    pub fn secondary_tracks(&self) -> Option<&[TrackReference]> {
        match self {
            StageLayout::Grid { .. } => None,
            StageLayout::Focus { carousel, .. } => Some(carousel),
        }
    }

    /// Number of tiles the renderers will draw.
    pub fn tile_count(&self) -> usize {
        match self {
            StageLayout::Grid { tracks } => tracks.len(),
            StageLayout::Focus { carousel, .. } => carousel.len() + 1,
        }
    }
}

/// Derive the layout from the pin and the snapshot. Pure and idempotent.
///
/// The pinned track does not have to be present in the snapshot: a pin that
/// outlives its publication still yields focus mode until someone clears it.
pub fn select_layout(pin: Option<&TrackReference>, snapshot: &TrackSnapshot) -> StageLayout {
    match pin {
        None => StageLayout::Grid {
            tracks: snapshot.as_slice().to_vec(),
        },
        Some(focus) => StageLayout::Focus {
            focus: focus.clone(),
            carousel: snapshot.iter().filter(|t| *t != focus).cloned().collect(),
        },
    }
}

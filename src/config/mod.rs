//! Host-facing configuration surface of the stage.
//!
//! Props arrive as JSON from the embedding view. Only the two button flags
//! are read by the core; everything else is carried through to collaborators.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;

fn default_true() -> bool {
    true
}

fn default_leave_button() -> String {
    "Leave".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageProps {
    /// Offer the invite-link trigger in the control bar.
    #[serde(default = "default_true")]
    pub show_share_button: bool,
    /// Offer the participant list; also gates waiting notifications.
    #[serde(default = "default_true")]
    pub show_participant_button: bool,
    #[serde(default = "default_leave_button")]
    pub leave_button: String,
    /// Container attributes, opaque to the core.
    #[serde(default, flatten)]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl Default for StageProps {
    fn default() -> Self {
        Self {
            show_share_button: true,
            show_participant_button: true,
            leave_button: default_leave_button(),
            attributes: BTreeMap::new(),
        }
    }
}

impl StageProps {
    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn waiting_enabled(&self) -> bool {
        self.show_participant_button
    }

    pub fn control_bar(&self) -> ControlBarSpec {
        ControlBarSpec {
            invite: self.show_share_button,
            participants: self.show_participant_button,
            leave_label: self.leave_button.clone(),
        }
    }
}

/// What the control-bar collaborator should expose.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlBarSpec {
    pub invite: bool,
    pub participants: bool,
    pub leave_label: String,
}

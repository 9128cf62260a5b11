use std::sync::RwLock;

use serde::{Deserialize, Serialize};

/// Side panel requested by the panel container. Exclusive-select.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WidgetPanel {
    #[default]
    #[serde(rename = "none")]
    Hidden,
    ShowInvite,
    ShowUsers,
}

impl WidgetPanel {
    pub fn as_str(&self) -> &'static str {
        match self {
            WidgetPanel::Hidden => "none",
            WidgetPanel::ShowInvite => "show_invite",
            WidgetPanel::ShowUsers => "show_users",
        }
    }
}

/// Single visibility cell. Last writer wins; readers compare against their own panel.
#[derive(Debug, Default)]
pub struct WidgetVisibility {
    visible: RwLock<WidgetPanel>,
}

impl WidgetVisibility {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when the stored panel actually changed.
    pub fn set_visible(&self, panel: WidgetPanel) -> bool {
        match self.visible.write() {
            Ok(mut guard) if *guard != panel => {
                *guard = panel;
                true
            }
            _ => false,
        }
    }

    pub fn visible(&self) -> WidgetPanel {
        self.visible.read().map(|guard| *guard).unwrap_or_default()
    }

    pub fn is_visible(&self, panel: WidgetPanel) -> bool {
        self.visible() == panel
    }
}

use crossbeam_channel::{Receiver, Sender, unbounded};

use super::StageEvent;
use super::widgets::WidgetPanel;
use crate::tracks::{RoomEvent, TrackReference, TrackSnapshot};
use crate::{Result, StageError};

/// Create a handle and the receiver that [`super::StageRuntime::run`] drains.
pub fn stage_channel() -> (StageHandle, Receiver<StageEvent>) {
    let (sender, receiver) = unbounded();
    (StageHandle { sender }, receiver)
}

/// Cloneable entry point for collaborators living on other threads. Every
/// call becomes one event on the runtime's owner thread.
#[derive(Clone, Debug)]
pub struct StageHandle {
    sender: Sender<StageEvent>,
}

impl StageHandle {
    pub fn send(&self, event: StageEvent) -> Result<()> {
        self.sender
            .send(event)
            .map_err(|_| StageError::ChannelClosed)
    }

    pub fn on_widget_change(&self, panel: WidgetPanel) -> Result<()> {
        self.send(StageEvent::WidgetChange { panel })
    }

    pub fn set_waiting(&self, message: impl Into<String>) -> Result<()> {
        self.send(StageEvent::SetWaiting {
            message: message.into(),
        })
    }

    pub fn on_waiting_room_change(&self, count: i64) -> Result<()> {
        self.send(StageEvent::WaitingRoomChange { count })
    }

    pub fn refresh(&self, tracks: TrackSnapshot) -> Result<()> {
        self.send(StageEvent::Snapshot { tracks })
    }

    pub fn room_event(&self, event: RoomEvent) -> Result<()> {
        self.send(StageEvent::Room { event })
    }

    pub fn pin(&self, track: TrackReference) -> Result<()> {
        self.send(StageEvent::UserPin { track })
    }

    pub fn unpin(&self) -> Result<()> {
        self.send(StageEvent::UserUnpin)
    }

    pub fn teardown(&self) -> Result<()> {
        self.send(StageEvent::Teardown)
    }
}

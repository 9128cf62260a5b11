//! Stage coordination core for a video-conference screen.
//!
//! The crate decides which track is in focus, which tracks fill the
//! secondary strip, which side panel is open, and how long a waiting-room
//! notification stays up. Rendering, transport and the panels themselves are
//! collaborators that observe the [`StageRuntime`] and feed it events.
//!
//! ```text
//! TrackSnapshotSource ─► AutoFocusController ─► PinStore ─► select_layout ─► observers
//!                                   WidgetVisibility / WaitingNotifier ─────┘
//! ```

pub mod config;
pub mod error;
pub mod layout;
pub mod logging;
pub mod metrics;
pub mod runtime;
pub mod tracks;

pub use config::{ControlBarSpec, StageProps};
pub use error::{Result, StageError};
pub use layout::{LayoutMode, StageLayout, select_layout};
pub use logging::{
    FileSink, LogEvent, LogFields, LogLevel, LogSink, Logger, LoggingError, LoggingResult,
    MemorySink,
};
pub use metrics::{MetricSnapshot, StageMetrics};
pub use runtime::audit::{
    BufferedStageAudit, NullStageAudit, StageAudit, StageAuditEvent, StageAuditEventBuilder,
    StageAuditStage,
};
pub use runtime::auto_focus::{AutoFocusController, Evaluation, ScreenShareKey};
pub use runtime::diagnostics::{LifecycleLoggerObserver, MetricsSnapshotObserver};
pub use runtime::driver::{ScriptDriver, ScriptLine};
pub use runtime::handle::{StageHandle, stage_channel};
pub use runtime::pin::{PinAction, PinSink, PinStore, SharedPin, dispatch_pin};
pub use runtime::stores::{SessionStores, StoreError};
pub use runtime::waiting::{
    WAITING_NOTIFICATION_DELAY, WaitingNotification, WaitingNotifier, WaitingRoomCounter,
};
pub use runtime::widgets::{WidgetPanel, WidgetVisibility};
pub use runtime::{
    EventFlow, RuntimeConfig, StageContext, StageEvent, StageObserver, StageRuntime,
};
pub use tracks::{
    DEFAULT_REFRESH_EVENTS, RoomEvent, StaticTrackSource, TrackReference, TrackSnapshot,
    TrackSnapshotSource, TrackSource,
};

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::{ControlBarSpec, StageProps};
use crate::layout::{StageLayout, select_layout};
use crate::logging::{LogLevel, Logger, event_with_fields, json_kv, json_str};
use crate::metrics::StageMetrics;
use crate::tracks::{RoomEvent, TrackReference, TrackSnapshot, TrackSnapshotSource};
use crate::{Result, StageError};

pub mod audit;
pub mod auto_focus;
pub mod diagnostics;
pub mod driver;
pub mod handle;
pub mod pin;
pub mod stores;
pub mod waiting;
pub mod widgets;

#[cfg(test)]
mod tests;

use audit::{NullStageAudit, StageAudit, StageAuditEventBuilder, StageAuditStage};
use auto_focus::{AutoFocusController, Evaluation};
use pin::{PinAction, PinSink, PinStore, dispatch_pin};
use stores::SessionStores;
use waiting::{WAITING_NOTIFICATION_DELAY, WaitingNotifier, WaitingRoomCounter};
use widgets::{WidgetPanel, WidgetVisibility};

/// Follow-up events observers may queue within one dispatch before the rest are dropped.
const MAX_FOLLOW_UPS: usize = 64;

/// Controller passes per turn: a clear, the re-pin it unblocks, and a final
/// pass that records the settled pin in the key.
const MAX_CONTROLLER_PASSES: usize = 3;

/// Configuration knobs for the stage runtime.
#[derive(Clone)]
pub struct RuntimeConfig {
    /// Interval between synthetic tick events in [`StageRuntime::run`].
    pub tick_interval: Duration,
    /// Lifetime of a waiting notification after its latest update.
    pub waiting_delay: Duration,
    /// Mount the pin store during bootstrap. When false the pin channel stays
    /// absent until a `MountPinStore` event arrives.
    pub mount_pin_store: bool,
    /// Optional structured logger used by the runtime.
    pub logger: Option<Logger>,
    /// Metrics accumulator used for periodic snapshots.
    pub metrics: Option<Arc<Mutex<StageMetrics>>>,
    /// Interval between metrics snapshot emissions. Zero disables snapshots.
    pub metrics_interval: Duration,
    /// Target field used when emitting metrics snapshots.
    pub metrics_target: String,
    pub audit: Arc<dyn StageAudit>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(200),
            waiting_delay: WAITING_NOTIFICATION_DELAY,
            mount_pin_store: true,
            logger: None,
            metrics: None,
            metrics_interval: Duration::from_secs(5),
            metrics_target: "stage::runtime.metrics".to_string(),
            audit: Arc::new(NullStageAudit),
        }
    }
}

impl RuntimeConfig {
    /// Enable metrics collection if it has not already been configured.
    pub fn enable_metrics(&mut self) {
        if self.metrics.is_none() {
            self.metrics = Some(Arc::new(Mutex::new(StageMetrics::new())));
        }
    }

    pub fn disable_metrics(&mut self) {
        self.metrics = None;
    }

    pub fn metrics_handle(&self) -> Option<Arc<Mutex<StageMetrics>>> {
        self.metrics.as_ref().map(Arc::clone)
    }
}

/// One logical turn's worth of input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StageEvent {
    /// Lets time pass; expires the waiting notification when due.
    Tick,
    /// Pulls a fresh snapshot when the source refreshes on this event.
    Room { event: RoomEvent },
    /// Push-style snapshot refresh.
    Snapshot { tracks: TrackSnapshot },
    /// A user clicked a tile.
    UserPin { track: TrackReference },
    UserUnpin,
    WidgetChange { panel: WidgetPanel },
    SetWaiting { message: String },
    ClearWaiting,
    WaitingRoomChange { count: i64 },
    MountPinStore,
    UnmountPinStore,
    Teardown,
}

impl StageEvent {
    pub fn describe(&self) -> &'static str {
        match self {
            StageEvent::Tick => "tick",
            StageEvent::Room { .. } => "room",
            StageEvent::Snapshot { .. } => "snapshot",
            StageEvent::UserPin { .. } => "user_pin",
            StageEvent::UserUnpin => "user_unpin",
            StageEvent::WidgetChange { .. } => "widget_change",
            StageEvent::SetWaiting { .. } => "set_waiting",
            StageEvent::ClearWaiting => "clear_waiting",
            StageEvent::WaitingRoomChange { .. } => "waiting_room_change",
            StageEvent::MountPinStore => "mount_pin_store",
            StageEvent::UnmountPinStore => "unmount_pin_store",
            StageEvent::Teardown => "teardown",
        }
    }
}

/// Control the propagation of an event across observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventFlow {
    Continue,
    Consumed,
}

/// Read-only view of the stage handed to observers, plus a queue of requests
/// that the runtime applies once the observer returns.
pub struct StageContext<'a> {
    snapshot: &'a TrackSnapshot,
    layout: &'a StageLayout,
    pinned: Option<&'a TrackReference>,
    widget: WidgetPanel,
    waiting: Option<&'a str>,
    waiting_room: i64,
    control_bar: &'a ControlBarSpec,
    requests: Vec<StageEvent>,
    exit_requested: bool,
}

impl<'a> StageContext<'a> {
    pub fn snapshot(&self) -> &TrackSnapshot {
        self.snapshot
    }

    pub fn layout(&self) -> &StageLayout {
        self.layout
    }

    pub fn pinned(&self) -> Option<&TrackReference> {
        self.pinned
    }

    pub fn widget(&self) -> WidgetPanel {
        self.widget
    }

    pub fn is_widget_visible(&self, panel: WidgetPanel) -> bool {
        self.widget == panel
    }

    pub fn waiting_message(&self) -> Option<&str> {
        self.waiting
    }

    pub fn waiting_room_count(&self) -> i64 {
        self.waiting_room
    }

    pub fn control_bar(&self) -> &ControlBarSpec {
        self.control_bar
    }

    pub fn request_pin(&mut self, track: TrackReference) {
        self.requests.push(StageEvent::UserPin { track });
    }

    pub fn request_unpin(&mut self) {
        self.requests.push(StageEvent::UserUnpin);
    }

    pub fn set_widget(&mut self, panel: WidgetPanel) {
        self.requests.push(StageEvent::WidgetChange { panel });
    }

    pub fn set_waiting(&mut self, message: impl Into<String>) {
        self.requests.push(StageEvent::SetWaiting {
            message: message.into(),
        });
    }

    pub fn request_exit(&mut self) {
        self.exit_requested = true;
    }

    fn into_outcome(self) -> ContextOutcome {
        ContextOutcome {
            requests: self.requests,
            exit_requested: self.exit_requested,
        }
    }
}

struct ContextOutcome {
    requests: Vec<StageEvent>,
    exit_requested: bool,
}

/// Rendering collaborators and diagnostics hook in here. Every hook defaults
/// to a no-op; change hooks fire only when the value actually changed.
pub trait StageObserver: Send {
    fn name(&self) -> &str {
        "stage_observer"
    }

    fn init(&mut self, _ctx: &mut StageContext<'_>) -> Result<()> {
        Ok(())
    }

    fn on_event(&mut self, _ctx: &mut StageContext<'_>, _event: &StageEvent) -> Result<EventFlow> {
        Ok(EventFlow::Continue)
    }

    fn on_layout(&mut self, _ctx: &mut StageContext<'_>, _layout: &StageLayout) -> Result<()> {
        Ok(())
    }

    fn on_pin_action(
        &mut self,
        _ctx: &mut StageContext<'_>,
        _action: &PinAction,
        _delivered: bool,
    ) -> Result<()> {
        Ok(())
    }

    fn on_widget(&mut self, _ctx: &mut StageContext<'_>, _panel: WidgetPanel) -> Result<()> {
        Ok(())
    }

    fn on_waiting(&mut self, _ctx: &mut StageContext<'_>, _message: Option<&str>) -> Result<()> {
        Ok(())
    }

    fn on_waiting_room(&mut self, _ctx: &mut StageContext<'_>, _count: i64) -> Result<()> {
        Ok(())
    }

    fn on_teardown(&mut self, _ctx: &mut StageContext<'_>) -> Result<()> {
        Ok(())
    }
}

/// Single owner of every stage store. All mutation happens inside
/// [`StageRuntime::dispatch`], one event per turn.
pub struct StageRuntime {
    config: RuntimeConfig,
    props: StageProps,
    control_bar: ControlBarSpec,
    stores: SessionStores,
    widgets: Arc<WidgetVisibility>,
    source: Option<Arc<dyn TrackSnapshotSource>>,
    snapshot: TrackSnapshot,
    controller: AutoFocusController,
    last_pin: Option<TrackReference>,
    layout: StageLayout,
    waiting: WaitingNotifier,
    waiting_room: WaitingRoomCounter,
    observers: Vec<Box<dyn StageObserver>>,
    pending: VecDeque<StageEvent>,
    started: bool,
    torn_down: bool,
    should_exit: bool,
    start_instant: Option<Instant>,
    last_metrics_emit: Option<Instant>,
}

impl StageRuntime {
    pub fn new(props: StageProps) -> Self {
        Self::with_config(props, RuntimeConfig::default())
    }

    pub fn with_config(props: StageProps, config: RuntimeConfig) -> Self {
        let stores = SessionStores::new();
        let widgets = Arc::new(WidgetVisibility::new());
        // A fresh map cannot already hold the widget store.
        let _ = stores.mount(Arc::clone(&widgets));
        let waiting = WaitingNotifier::new(config.waiting_delay, props.waiting_enabled());
        let snapshot = TrackSnapshot::empty();
        let layout = select_layout(None, &snapshot);

        Self {
            control_bar: props.control_bar(),
            props,
            config,
            stores,
            widgets,
            source: None,
            snapshot,
            controller: AutoFocusController::new(),
            last_pin: None,
            layout,
            waiting,
            waiting_room: WaitingRoomCounter::new(),
            observers: Vec::new(),
            pending: VecDeque::new(),
            started: false,
            torn_down: false,
            should_exit: false,
            start_instant: None,
            last_metrics_emit: None,
        }
    }

    pub fn with_source<S>(mut self, source: Arc<S>) -> Self
    where
        S: TrackSnapshotSource + 'static,
    {
        self.source = Some(source as Arc<dyn TrackSnapshotSource>);
        self
    }

    pub fn set_source(&mut self, source: Arc<dyn TrackSnapshotSource>) {
        self.source = Some(source);
    }

    pub fn config_mut(&mut self) -> &mut RuntimeConfig {
        &mut self.config
    }

    pub fn register_observer<O>(&mut self, observer: O)
    where
        O: StageObserver + 'static,
    {
        self.observers.push(Box::new(observer));
    }

    /// Replace the props, re-deriving the control bar and the waiting gate.
    /// A notification already on screen keeps its deadline.
    pub fn set_props(&mut self, props: StageProps) {
        self.waiting.set_enabled(props.waiting_enabled());
        self.control_bar = props.control_bar();
        self.props = props;
    }

    pub fn props(&self) -> &StageProps {
        &self.props
    }

    pub fn control_bar(&self) -> &ControlBarSpec {
        &self.control_bar
    }

    pub fn stores(&self) -> &SessionStores {
        &self.stores
    }

    pub fn snapshot(&self) -> &TrackSnapshot {
        &self.snapshot
    }

    pub fn layout(&self) -> &StageLayout {
        &self.layout
    }

    pub fn pinned(&self) -> Option<TrackReference> {
        self.current_pin()
    }

    pub fn last_auto_pinned(&self) -> Option<&str> {
        self.controller.last_auto_pinned()
    }

    pub fn widget(&self) -> WidgetPanel {
        self.widgets.visible()
    }

    pub fn is_widget_visible(&self, panel: WidgetPanel) -> bool {
        self.widgets.is_visible(panel)
    }

    pub fn waiting_message(&self) -> Option<&str> {
        self.waiting.message()
    }

    pub fn waiting_room_count(&self) -> i64 {
        self.waiting_room.count()
    }

    /// Earliest instant at which the runtime has time-bound work.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.waiting.deadline()
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    pub fn should_exit(&self) -> bool {
        self.should_exit
    }

    /// Panel container callback.
    pub fn on_widget_change(&mut self, panel: WidgetPanel) -> Result<()> {
        self.dispatch(StageEvent::WidgetChange { panel }, Instant::now())
    }

    /// Participant-panel request for a transient notification.
    pub fn set_waiting(&mut self, message: impl Into<String>) -> Result<()> {
        let message = message.into();
        self.dispatch(StageEvent::SetWaiting { message }, Instant::now())
    }

    /// Participant-panel push of the waiting-room size.
    pub fn on_waiting_room_change(&mut self, count: i64) -> Result<()> {
        self.dispatch(StageEvent::WaitingRoomChange { count }, Instant::now())
    }

    /// Mount stores, pull the initial snapshot, and initialise observers.
    /// Called implicitly by the first dispatch.
    pub fn start(&mut self, now: Instant) -> Result<()> {
        if self.started {
            return Ok(());
        }
        self.started = true;
        self.should_exit = false;
        self.ensure_metrics_initialized();
        self.start_instant = Some(now);
        self.last_metrics_emit = Some(now);

        if self.config.mount_pin_store {
            self.mount_pin_store()?;
        }
        if let Some(source) = self.source.as_ref() {
            self.snapshot = source.snapshot();
        }

        self.log_stage_event(
            LogLevel::Info,
            "session_started",
            [
                json_kv("observers", json!(self.observers.len())),
                json_kv("tracks", json!(self.snapshot.len())),
                json_kv("pin_store", json!(self.config.mount_pin_store)),
            ],
        );
        self.audit(StageAuditEventBuilder::new(StageAuditStage::SessionStarted));

        self.notify(|observer, ctx| observer.init(ctx).map(|_| EventFlow::Continue))?;
        self.reconcile(true)?;
        let layout = self.layout.clone();
        self.notify(|observer, ctx| {
            observer
                .on_layout(ctx, &layout)
                .map(|_| EventFlow::Continue)
        })?;
        self.drain_pending(now)
    }

    /// Run one event, plus any follow-ups observers queue, as a turn at `now`.
    /// Events after teardown are ignored.
    pub fn dispatch(&mut self, event: StageEvent, now: Instant) -> Result<()> {
        if self.torn_down {
            return Ok(());
        }
        self.start(now)?;
        self.pending.push_back(event);
        self.drain_pending(now)?;
        self.maybe_emit_metrics(now);
        Ok(())
    }

    /// Drive the runtime from `(offset from start, event)` pairs.
    pub fn run_scripted<I>(&mut self, start: Instant, events: I) -> Result<()>
    where
        I: IntoIterator<Item = (Duration, StageEvent)>,
    {
        self.start(start)?;
        for (offset, event) in events {
            self.dispatch(event, start + offset)?;
            if self.should_exit {
                break;
            }
        }
        Ok(())
    }

    /// Blocking loop fed by a [`handle::StageHandle`]. Wakes for ticks and for
    /// the waiting deadline; a disconnected channel tears the session down.
    pub fn run(&mut self, receiver: &Receiver<StageEvent>) -> Result<()> {
        let start = Instant::now();
        self.start(start)?;
        let mut next_tick = start + self.config.tick_interval;

        while !self.should_exit {
            let wake = match self.next_deadline() {
                Some(deadline) => deadline.min(next_tick),
                None => next_tick,
            };
            let timeout = wake.saturating_duration_since(Instant::now());

            match receiver.recv_timeout(timeout) {
                Ok(event) => self.dispatch(event, Instant::now())?,
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    self.dispatch(StageEvent::Teardown, Instant::now())?;
                    break;
                }
            }

            let now = Instant::now();
            if now >= wake {
                if now >= next_tick {
                    next_tick = now + self.config.tick_interval;
                }
                self.dispatch(StageEvent::Tick, now)?;
            }
        }
        Ok(())
    }

    fn drain_pending(&mut self, now: Instant) -> Result<()> {
        let mut processed = 0usize;
        while let Some(event) = self.pending.pop_front() {
            processed += 1;
            if processed > MAX_FOLLOW_UPS {
                let dropped = self.pending.len() + 1;
                self.pending.clear();
                self.log_stage_event(
                    LogLevel::Warn,
                    "follow_ups_dropped",
                    [json_kv("dropped", json!(dropped))],
                );
                break;
            }
            self.turn(event, now)?;
            if self.torn_down {
                self.pending.clear();
                break;
            }
        }
        Ok(())
    }

    fn turn(&mut self, event: StageEvent, now: Instant) -> Result<()> {
        self.record_metric(|m| m.record_event());
        let mut snapshot_changed = false;

        match &event {
            StageEvent::Tick => {}
            StageEvent::Room { event: room_event } => {
                let refreshed = self
                    .source
                    .as_ref()
                    .filter(|source| source.refreshes_on(room_event))
                    .map(|source| source.snapshot());
                if let Some(snapshot) = refreshed {
                    snapshot_changed = self.replace_snapshot(snapshot);
                }
            }
            StageEvent::Snapshot { tracks } => {
                snapshot_changed = self.replace_snapshot(tracks.clone());
            }
            StageEvent::UserPin { track } => {
                let delivered = self.pin_store().map(|store| store.set_pin(track.clone()));
                if delivered.is_none() {
                    self.log_stage_event(
                        LogLevel::Debug,
                        "user_pin_dropped",
                        [json_str("track_id", track.track_id.clone())],
                    );
                }
            }
            StageEvent::UserUnpin => {
                if let Some(store) = self.pin_store() {
                    store.clear_pin();
                }
            }
            StageEvent::WidgetChange { panel } => {
                if self.widgets.set_visible(*panel) {
                    self.log_stage_event(
                        LogLevel::Debug,
                        "widget_changed",
                        [json_str("panel", panel.as_str())],
                    );
                    let panel = *panel;
                    self.notify(|observer, ctx| {
                        observer.on_widget(ctx, panel).map(|_| EventFlow::Continue)
                    })?;
                }
            }
            StageEvent::SetWaiting { message } => self.schedule_waiting(message, now)?,
            StageEvent::ClearWaiting => self.clear_waiting()?,
            StageEvent::WaitingRoomChange { count } => {
                if self.waiting_room.update_count(*count) {
                    let count = *count;
                    self.notify(|observer, ctx| {
                        observer
                            .on_waiting_room(ctx, count)
                            .map(|_| EventFlow::Continue)
                    })?;
                }
            }
            StageEvent::MountPinStore => self.mount_pin_store()?,
            StageEvent::UnmountPinStore => {
                if self.stores.unmount::<PinStore>()?.is_some() {
                    self.audit(StageAuditEventBuilder::new(
                        StageAuditStage::PinStoreUnmounted,
                    ));
                }
            }
            StageEvent::Teardown => return self.teardown(now),
        }

        self.reconcile(snapshot_changed)?;
        self.expire_waiting(now)?;
        self.notify(|observer, ctx| observer.on_event(ctx, &event))
    }

    fn replace_snapshot(&mut self, snapshot: TrackSnapshot) -> bool {
        if snapshot == self.snapshot {
            return false;
        }
        self.snapshot = snapshot;
        true
    }

    /// Run the controller when the snapshot or the pin moved, then re-derive
    /// the layout and broadcast it if it changed.
    fn reconcile(&mut self, snapshot_changed: bool) -> Result<()> {
        let mut pin_before = self.current_pin();
        if snapshot_changed || pin_before != self.last_pin {
            // The pinned id is part of the controller's key, so a pin it moved
            // itself is observed again before the layout is derived.
            for _ in 0..MAX_CONTROLLER_PASSES {
                let evaluation = self.controller.observe(&self.snapshot, pin_before.as_ref());
                let evaluated = !matches!(evaluation, Evaluation::Skipped);
                self.record_metric(|m| m.record_evaluation(evaluated));
                if evaluated {
                    self.audit(
                        StageAuditEventBuilder::new(StageAuditStage::SnapshotEvaluated)
                            .detail("screen_shares", self.snapshot.screen_shares().len())
                            .detail("acted", evaluation.action().is_some()),
                    );
                }
                let Some(action) = evaluation.into_action() else {
                    break;
                };
                self.apply_pin_action(action)?;
                let pin_after = self.current_pin();
                if pin_after == pin_before {
                    break;
                }
                pin_before = pin_after;
            }
        }

        let pinned = self.current_pin();
        let layout = select_layout(pinned.as_ref(), &self.snapshot);
        self.last_pin = pinned;
        if layout != self.layout {
            self.layout = layout;
            self.record_metric(|m| m.record_layout_change());
            let mode = self.layout.mode();
            let tiles = self.layout.tile_count();
            self.log_stage_event(
                LogLevel::Debug,
                "layout_changed",
                [json_kv("mode", json!(mode)), json_kv("tiles", json!(tiles))],
            );
            self.audit(
                StageAuditEventBuilder::new(StageAuditStage::LayoutChanged)
                    .detail("mode", json!(mode))
                    .detail("tiles", tiles),
            );
            let layout = self.layout.clone();
            self.notify(|observer, ctx| {
                observer
                    .on_layout(ctx, &layout)
                    .map(|_| EventFlow::Continue)
            })?;
        }
        Ok(())
    }

    fn apply_pin_action(&mut self, action: PinAction) -> Result<()> {
        let store = self.pin_store();
        let delivered = dispatch_pin(
            store.as_deref().map(|store| store as &dyn PinSink),
            action.clone(),
        );
        self.record_metric(|m| m.record_pin_action(delivered));

        let track_id = match &action {
            PinAction::SetPin { track_reference } => json!(track_reference.track_id),
            PinAction::ClearPin => json!(null),
        };
        let (message, stage) = if delivered {
            ("pin_action", StageAuditStage::PinActionIssued)
        } else {
            ("pin_action_dropped", StageAuditStage::PinActionDropped)
        };
        self.log_stage_event(
            LogLevel::Info,
            message,
            [
                json_str("action", action.label()),
                json_kv("track_id", track_id.clone()),
            ],
        );
        self.audit(
            StageAuditEventBuilder::new(stage)
                .detail("action", action.label())
                .detail("track_id", track_id),
        );
        self.notify(|observer, ctx| {
            observer
                .on_pin_action(ctx, &action, delivered)
                .map(|_| EventFlow::Continue)
        })
    }

    fn schedule_waiting(&mut self, message: &str, now: Instant) -> Result<()> {
        if !self.waiting.set_message(message, now) {
            self.log_stage_event(LogLevel::Debug, "waiting_ignored", std::iter::empty());
            return Ok(());
        }
        self.record_metric(|m| m.record_waiting_shown());
        let delay_ms = self.waiting.delay().as_millis() as u64;
        self.log_stage_event(
            LogLevel::Debug,
            "waiting_scheduled",
            [json_kv("expires_in_ms", json!(delay_ms))],
        );
        self.audit(
            StageAuditEventBuilder::new(StageAuditStage::WaitingScheduled)
                .detail("expires_in_ms", delay_ms),
        );
        let message = message.to_string();
        self.notify(|observer, ctx| {
            observer
                .on_waiting(ctx, Some(&message))
                .map(|_| EventFlow::Continue)
        })
    }

    fn expire_waiting(&mut self, now: Instant) -> Result<()> {
        if self.waiting.poll(now).is_none() {
            return Ok(());
        }
        self.record_metric(|m| m.record_waiting_expired());
        self.log_stage_event(LogLevel::Debug, "waiting_expired", std::iter::empty());
        self.audit(StageAuditEventBuilder::new(StageAuditStage::WaitingExpired));
        self.notify(|observer, ctx| observer.on_waiting(ctx, None).map(|_| EventFlow::Continue))
    }

    fn clear_waiting(&mut self) -> Result<()> {
        if !self.waiting.clear() {
            return Ok(());
        }
        self.audit(StageAuditEventBuilder::new(StageAuditStage::WaitingCleared));
        self.notify(|observer, ctx| observer.on_waiting(ctx, None).map(|_| EventFlow::Continue))
    }

    fn teardown(&mut self, now: Instant) -> Result<()> {
        self.clear_waiting()?;
        self.notify(|observer, ctx| observer.on_teardown(ctx).map(|_| EventFlow::Continue))?;
        self.torn_down = true;
        self.should_exit = true;
        self.pending.clear();

        let uptime_ms = self
            .start_instant
            .map(|start| now.saturating_duration_since(start).as_millis() as u64)
            .unwrap_or(0);
        self.log_stage_event(
            LogLevel::Info,
            "session_stopped",
            [json_kv("uptime_ms", json!(uptime_ms))],
        );
        self.audit(StageAuditEventBuilder::new(StageAuditStage::SessionStopped));
        Ok(())
    }

    fn mount_pin_store(&mut self) -> Result<()> {
        if self.stores.is_mounted::<PinStore>() {
            return Ok(());
        }
        self.stores.mount_with(PinStore::new)?;
        self.audit(StageAuditEventBuilder::new(StageAuditStage::PinStoreMounted));
        Ok(())
    }

    fn pin_store(&self) -> Option<Arc<PinStore>> {
        self.stores.try_get::<PinStore>()
    }

    fn current_pin(&self) -> Option<TrackReference> {
        self.pin_store().and_then(|store| store.current())
    }

    /// Hand each observer a fresh context; queued requests run after the hook.
    fn notify<F>(&mut self, mut hook: F) -> Result<()>
    where
        F: FnMut(&mut dyn StageObserver, &mut StageContext<'_>) -> Result<EventFlow>,
    {
        if self.observers.is_empty() {
            return Ok(());
        }
        let pinned = self.current_pin();
        let widget = self.widgets.visible();
        let waiting = self.waiting.message().map(str::to_string);
        let waiting_room = self.waiting_room.count();
        let mut outcomes = Vec::new();

        for observer in self.observers.iter_mut() {
            let mut ctx = StageContext {
                snapshot: &self.snapshot,
                layout: &self.layout,
                pinned: pinned.as_ref(),
                widget,
                waiting: waiting.as_deref(),
                waiting_room,
                control_bar: &self.control_bar,
                requests: Vec::new(),
                exit_requested: false,
            };
            let flow = hook(observer.as_mut(), &mut ctx).map_err(|err| match err {
                StageError::Observer { .. } => err,
                other => StageError::observer(observer.name(), other.to_string()),
            })?;
            outcomes.push(ctx.into_outcome());
            if flow == EventFlow::Consumed {
                break;
            }
        }

        for outcome in outcomes {
            self.apply_outcome(outcome);
        }
        Ok(())
    }

    fn apply_outcome(&mut self, outcome: ContextOutcome) {
        let ContextOutcome {
            requests,
            exit_requested,
        } = outcome;
        self.pending.extend(requests);
        if exit_requested && !self.should_exit {
            self.should_exit = true;
            self.log_stage_event(LogLevel::Info, "exit_requested", std::iter::empty());
        }
    }

    fn ensure_metrics_initialized(&mut self) {
        if self.config.metrics.is_none() && self.config.metrics_interval > Duration::ZERO {
            self.config.enable_metrics();
        }
    }

    fn record_metric(&self, record: impl FnOnce(&mut StageMetrics)) {
        if let Some(metrics) = self.config.metrics.as_ref() {
            if let Ok(mut guard) = metrics.lock() {
                record(&mut *guard);
            }
        }
    }

    fn maybe_emit_metrics(&mut self, now: Instant) {
        if self.config.metrics.is_none() || self.config.metrics_interval == Duration::ZERO {
            return;
        }

        match self.last_metrics_emit {
            Some(last) if now.saturating_duration_since(last) < self.config.metrics_interval => {
                return;
            }
            _ => {
                self.last_metrics_emit = Some(now);
            }
        }

        let uptime = self
            .start_instant
            .map(|start| now.saturating_duration_since(start))
            .unwrap_or_default();

        if let (Some(logger), Some(metrics)) =
            (self.config.logger.as_ref(), self.config.metrics.as_ref())
        {
            if let Ok(guard) = metrics.lock() {
                let event = guard
                    .snapshot(uptime)
                    .to_log_event(&self.config.metrics_target);
                let _ = logger.log_event(event);
            }
        }
    }

    fn audit(&self, builder: StageAuditEventBuilder) {
        self.config.audit.record(builder.finish());
    }

    fn log_stage_event<I>(&self, level: LogLevel, message: &str, fields: I)
    where
        I: IntoIterator<Item = (String, serde_json::Value)>,
    {
        if let Some(logger) = self.config.logger.as_ref() {
            let event = event_with_fields(level, "stage::runtime", message, fields);
            let _ = logger.log_event(event);
        }
    }
}

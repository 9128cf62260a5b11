use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::json;

use crate::Result;
use crate::layout::StageLayout;
use crate::logging::{LogLevel, Logger, event_with_fields, json_kv};
use crate::metrics::StageMetrics;

use super::pin::PinAction;
use super::widgets::WidgetPanel;
use super::{EventFlow, StageContext, StageEvent, StageObserver};

/// Logs what the stage decided, for observability/debugging.
pub struct LifecycleLoggerObserver {
    logger: Logger,
    level: LogLevel,
    log_ticks: bool,
    log_snapshots: bool,
    log_layout: bool,
}

impl LifecycleLoggerObserver {
    pub fn new(logger: Logger) -> Self {
        Self {
            logger,
            level: LogLevel::Debug,
            log_ticks: false,
            log_snapshots: true,
            log_layout: true,
        }
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn log_ticks(mut self, enabled: bool) -> Self {
        self.log_ticks = enabled;
        self
    }

    pub fn log_snapshots(mut self, enabled: bool) -> Self {
        self.log_snapshots = enabled;
        self
    }

    pub fn log_layout(mut self, enabled: bool) -> Self {
        self.log_layout = enabled;
        self
    }

    fn emit(&self, message: &str, fields: impl IntoIterator<Item = (String, serde_json::Value)>) {
        let event = event_with_fields(self.level, "stage::lifecycle", message, fields);
        let _ = self.logger.log_event(event);
    }
}

impl StageObserver for LifecycleLoggerObserver {
    fn name(&self) -> &str {
        "diagnostics.lifecycle_logger"
    }

    fn init(&mut self, ctx: &mut StageContext<'_>) -> Result<()> {
        self.emit(
            "observer_initialized",
            [
                json_kv("logger_level", json!(self.level)),
                json_kv("control_bar", json!(ctx.control_bar())),
            ],
        );
        Ok(())
    }

    fn on_event(&mut self, ctx: &mut StageContext<'_>, event: &StageEvent) -> Result<EventFlow> {
        match event {
            StageEvent::Tick if self.log_ticks => {
                self.emit("event.tick", std::iter::empty());
            }
            StageEvent::Snapshot { tracks } if self.log_snapshots => {
                self.emit(
                    "event.snapshot",
                    [
                        json_kv("tracks", json!(tracks.len())),
                        json_kv("screen_shares", json!(tracks.screen_shares().len())),
                    ],
                );
            }
            StageEvent::Room { event: room_event } if self.log_snapshots => {
                self.emit(
                    "event.room",
                    [
                        json_kv("room_event", json!(room_event)),
                        json_kv("tracks", json!(ctx.snapshot().len())),
                    ],
                );
            }
            StageEvent::UserPin { track } => {
                self.emit("event.user_pin", [json_kv("track_id", json!(track.track_id))]);
            }
            StageEvent::UserUnpin => {
                self.emit("event.user_unpin", std::iter::empty());
            }
            StageEvent::Teardown => {
                self.emit("event.teardown", std::iter::empty());
            }
            _ => {}
        }
        Ok(EventFlow::Continue)
    }

    fn on_layout(&mut self, _ctx: &mut StageContext<'_>, layout: &StageLayout) -> Result<()> {
        if self.log_layout {
            self.emit(
                "layout",
                [
                    json_kv("mode", json!(layout.mode())),
                    json_kv(
                        "focus",
                        json!(layout.focus_track().map(|t| t.track_id.as_str())),
                    ),
                    json_kv("tiles", json!(layout.tile_count())),
                ],
            );
        }
        Ok(())
    }

    fn on_pin_action(
        &mut self,
        _ctx: &mut StageContext<'_>,
        action: &PinAction,
        delivered: bool,
    ) -> Result<()> {
        self.emit(
            "auto_focus",
            [
                json_kv("action", json!(action)),
                json_kv("delivered", json!(delivered)),
            ],
        );
        Ok(())
    }

    fn on_widget(&mut self, _ctx: &mut StageContext<'_>, panel: WidgetPanel) -> Result<()> {
        self.emit("widget", [json_kv("panel", json!(panel))]);
        Ok(())
    }

    fn on_waiting(&mut self, _ctx: &mut StageContext<'_>, message: Option<&str>) -> Result<()> {
        self.emit("waiting", [json_kv("message", json!(message))]);
        Ok(())
    }

    fn on_waiting_room(&mut self, _ctx: &mut StageContext<'_>, count: i64) -> Result<()> {
        self.emit("waiting_room", [json_kv("count", json!(count))]);
        Ok(())
    }
}

/// Periodically emits stage metrics snapshots through the provided logger.
pub struct MetricsSnapshotObserver {
    logger: Logger,
    metrics: Arc<Mutex<StageMetrics>>,
    target: String,
    interval: Duration,
    last_emit: Option<Instant>,
    started_at: Instant,
}

impl MetricsSnapshotObserver {
    pub fn new(logger: Logger, metrics: Arc<Mutex<StageMetrics>>) -> Self {
        Self {
            logger,
            metrics,
            target: "stage::runtime.metrics".to_string(),
            interval: Duration::from_secs(5),
            last_emit: None,
            started_at: Instant::now(),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    fn emit_snapshot(&mut self, force: bool) {
        if self.interval == Duration::ZERO && !force {
            return;
        }

        let now = Instant::now();
        if let Some(last) = self.last_emit {
            if !force && now.duration_since(last) < self.interval {
                return;
            }
        }

        self.last_emit = Some(now);
        let uptime = now.duration_since(self.started_at);

        if let Ok(guard) = self.metrics.lock() {
            let event = guard.snapshot(uptime).to_log_event(&self.target);
            let _ = self.logger.log_event(event);
        }
    }
}

impl StageObserver for MetricsSnapshotObserver {
    fn name(&self) -> &str {
        "diagnostics.metrics_snapshot"
    }

    fn init(&mut self, _ctx: &mut StageContext<'_>) -> Result<()> {
        self.started_at = Instant::now();
        self.last_emit = None;
        Ok(())
    }

    fn on_event(&mut self, _ctx: &mut StageContext<'_>, event: &StageEvent) -> Result<EventFlow> {
        if matches!(event, StageEvent::Tick) {
            self.emit_snapshot(false);
        }
        Ok(EventFlow::Continue)
    }

    /// Final snapshot regardless of the interval.
    fn on_teardown(&mut self, _ctx: &mut StageContext<'_>) -> Result<()> {
        self.emit_snapshot(true);
        Ok(())
    }
}

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::audit::{BufferedStageAudit, StageAuditStage};
use super::handle::stage_channel;
use super::pin::{PinAction, PinStore};
use super::widgets::WidgetPanel;
use super::*;
use crate::layout::{LayoutMode, StageLayout};
use crate::logging::{Logger, MemorySink};
use crate::tracks::{RoomEvent, StaticTrackSource, TrackReference, TrackSnapshot};
use crate::{StageError, StageProps};

fn cam(participant: &str, id: &str) -> TrackReference {
    TrackReference::camera(participant, id)
}

fn share(participant: &str, id: &str) -> TrackReference {
    TrackReference::screen_share(participant, id)
}

fn snap(tracks: Vec<TrackReference>) -> StageEvent {
    StageEvent::Snapshot {
        tracks: TrackSnapshot::new(tracks),
    }
}

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

#[derive(Default)]
struct Recorded {
    layouts: Vec<StageLayout>,
    actions: Vec<(PinAction, bool)>,
    widgets: Vec<WidgetPanel>,
    waiting: Vec<Option<String>>,
    counts: Vec<i64>,
    events: Vec<&'static str>,
    teardowns: usize,
}

#[derive(Clone, Default)]
struct Recorder {
    inner: Arc<Mutex<Recorded>>,
}

impl Recorder {
    fn with<R>(&self, read: impl FnOnce(&Recorded) -> R) -> R {
        read(&self.inner.lock().unwrap())
    }

    fn actions(&self) -> Vec<PinAction> {
        self.with(|r| r.actions.iter().map(|(a, _)| a.clone()).collect())
    }
}

impl StageObserver for Recorder {
    fn name(&self) -> &str {
        "test.recorder"
    }

    fn on_event(&mut self, _ctx: &mut StageContext<'_>, event: &StageEvent) -> Result<EventFlow> {
        self.inner.lock().unwrap().events.push(event.describe());
        Ok(EventFlow::Continue)
    }

    fn on_layout(&mut self, _ctx: &mut StageContext<'_>, layout: &StageLayout) -> Result<()> {
        self.inner.lock().unwrap().layouts.push(layout.clone());
        Ok(())
    }

    fn on_pin_action(
        &mut self,
        _ctx: &mut StageContext<'_>,
        action: &PinAction,
        delivered: bool,
    ) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .actions
            .push((action.clone(), delivered));
        Ok(())
    }

    fn on_widget(&mut self, _ctx: &mut StageContext<'_>, panel: WidgetPanel) -> Result<()> {
        self.inner.lock().unwrap().widgets.push(panel);
        Ok(())
    }

    fn on_waiting(&mut self, _ctx: &mut StageContext<'_>, message: Option<&str>) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .waiting
            .push(message.map(str::to_string));
        Ok(())
    }

    fn on_waiting_room(&mut self, _ctx: &mut StageContext<'_>, count: i64) -> Result<()> {
        self.inner.lock().unwrap().counts.push(count);
        Ok(())
    }

    fn on_teardown(&mut self, _ctx: &mut StageContext<'_>) -> Result<()> {
        self.inner.lock().unwrap().teardowns += 1;
        Ok(())
    }
}

fn runtime_with_recorder() -> (StageRuntime, Recorder) {
    let mut runtime = StageRuntime::new(StageProps::default());
    let recorder = Recorder::default();
    runtime.register_observer(recorder.clone());
    (runtime, recorder)
}

#[test]
fn share_start_and_stop_scenario() {
    let (mut runtime, recorder) = runtime_with_recorder();
    let t0 = Instant::now();

    runtime.dispatch(snap(vec![cam("ann", "c1")]), t0).unwrap();
    assert_eq!(runtime.layout().mode(), LayoutMode::Grid);
    assert_eq!(runtime.layout().tile_count(), 1);
    assert!(recorder.actions().is_empty());

    runtime
        .dispatch(snap(vec![cam("ann", "c1"), share("ann", "s1")]), t0 + ms(10))
        .unwrap();
    assert_eq!(recorder.actions(), vec![PinAction::set(share("ann", "s1"))]);
    assert_eq!(runtime.layout().mode(), LayoutMode::Focus);
    assert_eq!(runtime.layout().focus_track(), Some(&share("ann", "s1")));
    assert_eq!(
        runtime.layout().secondary_tracks(),
        Some(&[cam("ann", "c1")][..])
    );

    runtime
        .dispatch(snap(vec![cam("ann", "c1")]), t0 + ms(20))
        .unwrap();
    assert_eq!(
        recorder.actions(),
        vec![PinAction::set(share("ann", "s1")), PinAction::ClearPin]
    );
    assert_eq!(runtime.layout().mode(), LayoutMode::Grid);
    assert!(runtime.layout().secondary_tracks().is_none());
    assert!(runtime.pinned().is_none());
}

#[test]
fn first_share_is_pinned() {
    let (mut runtime, _) = runtime_with_recorder();
    runtime
        .dispatch(
            snap(vec![
                TrackReference::placeholder("ann"),
                share("bo", "s7"),
                share("cy", "s3"),
            ]),
            Instant::now(),
        )
        .unwrap();
    let store = runtime.stores().get::<PinStore>().unwrap();
    assert_eq!(store.current(), Some(share("bo", "s7")));
    assert_eq!(runtime.last_auto_pinned(), Some("s7"));
}

#[test]
fn auto_pin_clears_when_share_leaves_even_with_cameras() {
    let (mut runtime, recorder) = runtime_with_recorder();
    let t0 = Instant::now();
    runtime
        .dispatch(snap(vec![cam("a", "c1"), share("a", "s1")]), t0)
        .unwrap();
    runtime
        .dispatch(snap(vec![cam("a", "c1"), cam("b", "c2")]), t0 + ms(5))
        .unwrap();
    assert_eq!(recorder.actions().last(), Some(&PinAction::ClearPin));
    assert_eq!(runtime.last_auto_pinned(), None);
    assert!(runtime.pinned().is_none());
}

#[test]
fn repeated_snapshot_issues_no_second_action() {
    let (mut runtime, recorder) = runtime_with_recorder();
    let t0 = Instant::now();
    let event = snap(vec![cam("a", "c1"), share("a", "s1")]);
    runtime.dispatch(event.clone(), t0).unwrap();
    runtime.dispatch(event.clone(), t0 + ms(1)).unwrap();
    runtime.dispatch(event, t0 + ms(2)).unwrap();
    assert_eq!(recorder.actions().len(), 1);
}

#[test]
fn camera_churn_skips_reevaluation() {
    let mut runtime = StageRuntime::new(StageProps::default());
    runtime.config_mut().enable_metrics();
    let metrics = runtime.config_mut().metrics_handle().unwrap();
    let t0 = Instant::now();

    runtime
        .dispatch(snap(vec![cam("a", "c1"), share("a", "s1")]), t0)
        .unwrap();
    runtime
        .dispatch(
            snap(vec![cam("a", "c1"), cam("b", "c2"), share("a", "s1")]),
            t0 + ms(1),
        )
        .unwrap();
    runtime
        .dispatch(
            snap(vec![
                cam("a", "c1"),
                cam("b", "c2"),
                cam("c", "c3"),
                share("a", "s1"),
            ]),
            t0 + ms(2),
        )
        .unwrap();

    let snapshot = metrics.lock().unwrap().snapshot(Duration::ZERO);
    // Bootstrap, the pin, and the pass that records the pin in the key.
    assert_eq!(snapshot.evaluations, 3);
    assert_eq!(snapshot.evaluations_skipped, 2);
    assert_eq!(snapshot.pin_actions, 1);
    assert_eq!(runtime.layout().tile_count(), 4);
}

#[test]
fn share_handoff_pins_remaining_share() {
    let (mut runtime, recorder) = runtime_with_recorder();
    let t0 = Instant::now();
    runtime
        .dispatch(
            snap(vec![cam("a", "c1"), share("a", "s1"), share("b", "s2")]),
            t0,
        )
        .unwrap();
    runtime
        .dispatch(snap(vec![cam("a", "c1"), share("b", "s2")]), t0 + ms(5))
        .unwrap();

    assert_eq!(
        recorder.actions(),
        vec![
            PinAction::set(share("a", "s1")),
            PinAction::ClearPin,
            PinAction::set(share("b", "s2")),
        ]
    );
    assert_eq!(runtime.pinned(), Some(share("b", "s2")));
    assert_eq!(runtime.last_auto_pinned(), Some("s2"));
    assert_eq!(runtime.layout().mode(), LayoutMode::Focus);
    assert_eq!(runtime.layout().focus_track(), Some(&share("b", "s2")));
    assert_eq!(
        runtime.layout().secondary_tracks(),
        Some(&[cam("a", "c1")][..])
    );

    // Settled: a quiet tick issues nothing further.
    runtime.dispatch(StageEvent::Tick, t0 + ms(10)).unwrap();
    assert_eq!(recorder.actions().len(), 3);
    // Bootstrap grid, then focus on s1, then straight to focus on s2.
    recorder.with(|r| {
        assert_eq!(r.layouts.len(), 3);
        assert!(r.layouts[1..].iter().all(|l| l.mode() == LayoutMode::Focus));
    });
}

#[test]
fn session_uptime_follows_turn_clock() {
    let sink = MemorySink::new();
    let mut runtime = StageRuntime::new(StageProps::default());
    runtime.config_mut().logger = Some(Logger::new(sink.clone()));
    let t0 = Instant::now();
    runtime
        .run_scripted(
            t0,
            vec![
                (ms(0), snap(vec![cam("a", "c1")])),
                (ms(2_500), StageEvent::Teardown),
            ],
        )
        .unwrap();

    let stopped = sink
        .events()
        .into_iter()
        .find(|e| e.message == "session_stopped")
        .unwrap();
    assert_eq!(
        stopped.field("uptime_ms").and_then(|v| v.as_u64()),
        Some(2_500)
    );
}

#[test]
fn pinned_track_never_in_secondary_strip() {
    let (mut runtime, recorder) = runtime_with_recorder();
    let t0 = Instant::now();
    let script = vec![
        snap(vec![cam("a", "c1"), share("a", "s1"), cam("b", "c2")]),
        StageEvent::UserPin {
            track: cam("b", "c2"),
        },
        snap(vec![share("a", "s1"), cam("b", "c2"), share("c", "s2")]),
        StageEvent::UserUnpin,
        StageEvent::UserPin {
            track: share("c", "s2"),
        },
    ];
    for (i, event) in script.into_iter().enumerate() {
        runtime.dispatch(event, t0 + ms(i as u64)).unwrap();
    }
    recorder.with(|r| {
        for layout in &r.layouts {
            if let StageLayout::Focus { focus, carousel } = layout {
                assert!(!carousel.contains(focus));
            }
        }
        assert!(r.layouts.iter().any(|l| l.mode() == LayoutMode::Focus));
    });
}

#[test]
fn waiting_replacement_restarts_delay() {
    let (mut runtime, recorder) = runtime_with_recorder();
    let t0 = Instant::now();
    runtime
        .dispatch(
            StageEvent::SetWaiting {
                message: "A".to_string(),
            },
            t0,
        )
        .unwrap();
    runtime
        .dispatch(
            StageEvent::SetWaiting {
                message: "B".to_string(),
            },
            t0 + ms(1000),
        )
        .unwrap();

    runtime.dispatch(StageEvent::Tick, t0 + ms(3001)).unwrap();
    assert_eq!(runtime.waiting_message(), Some("B"));
    runtime.dispatch(StageEvent::Tick, t0 + ms(3999)).unwrap();
    assert_eq!(runtime.waiting_message(), Some("B"));
    runtime.dispatch(StageEvent::Tick, t0 + ms(4001)).unwrap();
    assert_eq!(runtime.waiting_message(), None);

    recorder.with(|r| {
        assert_eq!(
            r.waiting,
            vec![Some("A".to_string()), Some("B".to_string()), None]
        );
    });
}

#[test]
fn waiting_is_gated_by_participant_button() {
    let props = StageProps {
        show_participant_button: false,
        ..StageProps::default()
    };
    let mut runtime = StageRuntime::new(props);
    runtime
        .dispatch(
            StageEvent::SetWaiting {
                message: "ignored".to_string(),
            },
            Instant::now(),
        )
        .unwrap();
    assert_eq!(runtime.waiting_message(), None);
    assert!(runtime.next_deadline().is_none());
}

#[test]
fn closing_the_gate_keeps_visible_message_until_expiry() {
    let mut runtime = StageRuntime::new(StageProps::default());
    let t0 = Instant::now();
    runtime
        .dispatch(
            StageEvent::SetWaiting {
                message: "A".to_string(),
            },
            t0,
        )
        .unwrap();
    runtime.set_props(StageProps {
        show_participant_button: false,
        ..StageProps::default()
    });
    runtime
        .dispatch(
            StageEvent::SetWaiting {
                message: "B".to_string(),
            },
            t0 + ms(100),
        )
        .unwrap();
    assert_eq!(runtime.waiting_message(), Some("A"));
    assert!(!runtime.control_bar().participants);
    runtime.dispatch(StageEvent::Tick, t0 + ms(3000)).unwrap();
    assert_eq!(runtime.waiting_message(), None);
}

#[test]
fn missing_pin_store_drops_actions() {
    let mut runtime = StageRuntime::new(StageProps::default());
    runtime.config_mut().mount_pin_store = false;
    let recorder = Recorder::default();
    runtime.register_observer(recorder.clone());
    let t0 = Instant::now();

    runtime
        .dispatch(snap(vec![cam("a", "c1"), share("a", "s1")]), t0)
        .unwrap();
    assert_eq!(
        recorder.with(|r| r.actions.clone()),
        vec![(PinAction::set(share("a", "s1")), false)]
    );
    assert_eq!(runtime.last_auto_pinned(), Some("s1"));
    assert_eq!(runtime.layout().mode(), LayoutMode::Grid);

    // Mounting later does not replay the dropped action.
    runtime.dispatch(StageEvent::MountPinStore, t0 + ms(1)).unwrap();
    assert!(runtime.stores().is_mounted::<PinStore>());
    assert!(runtime.pinned().is_none());
    assert_eq!(runtime.layout().mode(), LayoutMode::Grid);

    // User pins are dropped the same way once the store is gone again.
    runtime
        .dispatch(StageEvent::UnmountPinStore, t0 + ms(2))
        .unwrap();
    runtime
        .dispatch(
            StageEvent::UserPin {
                track: cam("a", "c1"),
            },
            t0 + ms(3),
        )
        .unwrap();
    assert!(runtime.pinned().is_none());
}

#[test]
fn unmounting_pinned_store_returns_to_grid() {
    let mut runtime = StageRuntime::new(StageProps::default());
    let t0 = Instant::now();
    runtime
        .dispatch(snap(vec![cam("a", "c1"), share("a", "s1")]), t0)
        .unwrap();
    assert_eq!(runtime.layout().mode(), LayoutMode::Focus);
    runtime
        .dispatch(StageEvent::UnmountPinStore, t0 + ms(1))
        .unwrap();
    assert_eq!(runtime.layout().mode(), LayoutMode::Grid);
}

#[test]
fn empty_snapshot_stays_in_empty_grid() {
    let (mut runtime, recorder) = runtime_with_recorder();
    runtime.dispatch(snap(vec![]), Instant::now()).unwrap();
    assert_eq!(runtime.layout(), &StageLayout::Grid { tracks: vec![] });
    assert!(recorder.actions().is_empty());
}

#[test]
fn user_unpin_during_share_sticks() {
    let (mut runtime, recorder) = runtime_with_recorder();
    let t0 = Instant::now();
    let tracks = snap(vec![cam("a", "c1"), share("a", "s1")]);
    runtime.dispatch(tracks.clone(), t0).unwrap();
    runtime.dispatch(StageEvent::UserUnpin, t0 + ms(1)).unwrap();
    runtime.dispatch(tracks, t0 + ms(2)).unwrap();
    assert!(runtime.pinned().is_none());
    assert_eq!(recorder.actions().len(), 1);
}

#[test]
fn share_arrival_overrides_manual_pin() {
    let (mut runtime, recorder) = runtime_with_recorder();
    let t0 = Instant::now();
    runtime
        .dispatch(snap(vec![cam("a", "c1"), cam("b", "c2")]), t0)
        .unwrap();
    runtime
        .dispatch(
            StageEvent::UserPin {
                track: cam("b", "c2"),
            },
            t0 + ms(1),
        )
        .unwrap();
    assert_eq!(runtime.pinned(), Some(cam("b", "c2")));

    runtime
        .dispatch(
            snap(vec![cam("a", "c1"), cam("b", "c2"), share("a", "s1")]),
            t0 + ms(2),
        )
        .unwrap();
    assert_eq!(runtime.pinned(), Some(share("a", "s1")));
    assert_eq!(recorder.actions(), vec![PinAction::set(share("a", "s1"))]);
}

#[test]
fn share_end_clears_manual_pin_made_during_share() {
    let (mut runtime, _) = runtime_with_recorder();
    let t0 = Instant::now();
    runtime
        .dispatch(snap(vec![cam("a", "c1"), share("a", "s1")]), t0)
        .unwrap();
    runtime
        .dispatch(
            StageEvent::UserPin {
                track: cam("a", "c1"),
            },
            t0 + ms(1),
        )
        .unwrap();
    assert_eq!(runtime.pinned(), Some(cam("a", "c1")));
    runtime
        .dispatch(snap(vec![cam("a", "c1")]), t0 + ms(2))
        .unwrap();
    assert!(runtime.pinned().is_none());
}

#[test]
fn room_events_pull_from_source_refresh_set() {
    let source = Arc::new(StaticTrackSource::new(TrackSnapshot::new(vec![cam(
        "a", "c1",
    )])));
    let mut runtime =
        StageRuntime::new(StageProps::default()).with_source(Arc::clone(&source));
    let t0 = Instant::now();
    runtime.start(t0).unwrap();
    assert_eq!(runtime.snapshot().len(), 1);

    source.replace(TrackSnapshot::new(vec![cam("a", "c1"), share("a", "s1")]));
    runtime
        .dispatch(
            StageEvent::Room {
                event: RoomEvent::TrackMuted,
            },
            t0 + ms(1),
        )
        .unwrap();
    assert_eq!(runtime.snapshot().len(), 1);

    runtime
        .dispatch(
            StageEvent::Room {
                event: RoomEvent::ActiveSpeakersChanged,
            },
            t0 + ms(2),
        )
        .unwrap();
    assert_eq!(runtime.snapshot().len(), 2);
    assert_eq!(runtime.layout().mode(), LayoutMode::Focus);
}

#[test]
fn widget_changes_broadcast_once() {
    let (mut runtime, recorder) = runtime_with_recorder();
    runtime.on_widget_change(WidgetPanel::ShowInvite).unwrap();
    runtime.on_widget_change(WidgetPanel::ShowInvite).unwrap();
    runtime.on_widget_change(WidgetPanel::ShowUsers).unwrap();
    runtime.on_widget_change(WidgetPanel::Hidden).unwrap();
    assert_eq!(
        recorder.with(|r| r.widgets.clone()),
        vec![
            WidgetPanel::ShowInvite,
            WidgetPanel::ShowUsers,
            WidgetPanel::Hidden
        ]
    );
    assert!(runtime.is_widget_visible(WidgetPanel::Hidden));
    let shared = runtime.stores().get::<WidgetVisibility>().unwrap();
    assert_eq!(shared.visible(), WidgetPanel::Hidden);
}

#[test]
fn waiting_room_count_passes_through() {
    let (mut runtime, recorder) = runtime_with_recorder();
    runtime.on_waiting_room_change(4).unwrap();
    runtime.on_waiting_room_change(4).unwrap();
    runtime.on_waiting_room_change(-1).unwrap();
    assert_eq!(runtime.waiting_room_count(), -1);
    assert_eq!(recorder.with(|r| r.counts.clone()), vec![4, -1]);
}

#[test]
fn teardown_cancels_waiting_and_ignores_later_events() {
    let audit = Arc::new(BufferedStageAudit::new());
    let config = RuntimeConfig {
        audit: audit.clone(),
        ..RuntimeConfig::default()
    };
    let mut runtime = StageRuntime::with_config(StageProps::default(), config);
    let recorder = Recorder::default();
    runtime.register_observer(recorder.clone());
    let t0 = Instant::now();

    runtime
        .dispatch(
            StageEvent::SetWaiting {
                message: "A".to_string(),
            },
            t0,
        )
        .unwrap();
    runtime.dispatch(StageEvent::Teardown, t0 + ms(10)).unwrap();
    assert!(runtime.is_torn_down());
    assert!(runtime.waiting_message().is_none());
    assert!(runtime.next_deadline().is_none());

    runtime
        .dispatch(snap(vec![share("a", "s1")]), t0 + ms(20))
        .unwrap();
    runtime.dispatch(StageEvent::Tick, t0 + ms(5000)).unwrap();
    assert!(runtime.snapshot().is_empty());
    assert_eq!(recorder.with(|r| r.teardowns), 1);
    assert_eq!(
        recorder.with(|r| r.waiting.clone()),
        vec![Some("A".to_string()), None]
    );

    let stages = audit.stages();
    assert_eq!(
        &stages[..2],
        &[
            StageAuditStage::PinStoreMounted,
            StageAuditStage::SessionStarted
        ]
    );
    assert!(stages.contains(&StageAuditStage::WaitingCleared));
    assert!(!stages.contains(&StageAuditStage::WaitingExpired));
    assert_eq!(stages.last(), Some(&StageAuditStage::SessionStopped));
}

struct TileClicker {
    target: TrackReference,
}

impl StageObserver for TileClicker {
    fn on_layout(&mut self, ctx: &mut StageContext<'_>, layout: &StageLayout) -> Result<()> {
        if layout.mode() == LayoutMode::Grid && ctx.snapshot().contains(&self.target) {
            ctx.request_pin(self.target.clone());
        }
        Ok(())
    }
}

#[test]
fn observer_requests_run_in_same_dispatch() {
    let mut runtime = StageRuntime::new(StageProps::default());
    runtime.register_observer(TileClicker {
        target: cam("b", "c2"),
    });
    runtime
        .dispatch(snap(vec![cam("a", "c1"), cam("b", "c2")]), Instant::now())
        .unwrap();
    assert_eq!(runtime.pinned(), Some(cam("b", "c2")));
    assert_eq!(
        runtime.layout().secondary_tracks(),
        Some(&[cam("a", "c1")][..])
    );
}

struct Swallow;

impl StageObserver for Swallow {
    fn on_event(&mut self, _ctx: &mut StageContext<'_>, _event: &StageEvent) -> Result<EventFlow> {
        Ok(EventFlow::Consumed)
    }
}

#[test]
fn consumed_event_stops_propagation() {
    let mut runtime = StageRuntime::new(StageProps::default());
    let recorder = Recorder::default();
    runtime.register_observer(Swallow);
    runtime.register_observer(recorder.clone());
    runtime.dispatch(StageEvent::Tick, Instant::now()).unwrap();
    assert!(recorder.with(|r| r.events.is_empty()));
}

struct Failing;

impl StageObserver for Failing {
    fn name(&self) -> &str {
        "test.failing"
    }

    fn on_widget(&mut self, _ctx: &mut StageContext<'_>, _panel: WidgetPanel) -> Result<()> {
        Err(StageError::ChannelClosed)
    }
}

#[test]
fn observer_failure_names_the_observer() {
    let mut runtime = StageRuntime::new(StageProps::default());
    runtime.register_observer(Failing);
    let err = runtime.on_widget_change(WidgetPanel::ShowUsers).unwrap_err();
    match err {
        StageError::Observer { name, .. } => assert_eq!(name, "test.failing"),
        other => panic!("unexpected error: {other:?}"),
    }
}

struct Echo;

impl StageObserver for Echo {
    fn on_event(&mut self, ctx: &mut StageContext<'_>, _event: &StageEvent) -> Result<EventFlow> {
        ctx.set_waiting("again");
        Ok(EventFlow::Continue)
    }
}

#[test]
fn runaway_follow_ups_are_capped() {
    let sink = MemorySink::new();
    let mut runtime = StageRuntime::new(StageProps::default());
    runtime.config_mut().logger = Some(Logger::new(sink.clone()));
    runtime.register_observer(Echo);
    runtime.dispatch(StageEvent::Tick, Instant::now()).unwrap();
    assert_eq!(sink.count("follow_ups_dropped"), 1);
    assert_eq!(runtime.waiting_message(), Some("again"));
}

#[test]
fn runtime_logs_pin_actions() {
    let sink = MemorySink::new();
    let mut runtime = StageRuntime::new(StageProps::default());
    runtime.config_mut().logger = Some(Logger::new(sink.clone()));
    let t0 = Instant::now();
    runtime.dispatch(snap(vec![share("a", "s1")]), t0).unwrap();
    runtime.dispatch(snap(vec![]), t0 + ms(1)).unwrap();

    let pins: Vec<_> = sink
        .events()
        .into_iter()
        .filter(|e| e.message == "pin_action")
        .collect();
    assert_eq!(pins.len(), 2);
    assert_eq!(pins[0].field("action").unwrap(), "set_pin");
    assert_eq!(pins[0].field("track_id").unwrap(), "s1");
    assert_eq!(pins[1].field("action").unwrap(), "clear_pin");
    assert_eq!(sink.count("session_started"), 1);
}

#[test]
fn handle_feeds_run_loop_until_teardown() {
    let (handle, receiver) = stage_channel();
    let mut runtime = StageRuntime::new(StageProps::default());

    handle
        .refresh(TrackSnapshot::new(vec![cam("a", "c1"), share("a", "s1")]))
        .unwrap();
    handle.on_widget_change(WidgetPanel::ShowUsers).unwrap();
    handle.on_waiting_room_change(3).unwrap();
    handle.teardown().unwrap();

    runtime.run(&receiver).unwrap();
    assert!(runtime.is_torn_down());
    assert_eq!(runtime.layout().mode(), LayoutMode::Focus);
    assert_eq!(runtime.widget(), WidgetPanel::ShowUsers);
    assert_eq!(runtime.waiting_room_count(), 3);
}

#[test]
fn dropped_handle_tears_down_run_loop() {
    let (handle, receiver) = stage_channel();
    let mut runtime = StageRuntime::new(StageProps::default());
    handle.set_waiting("Ann is waiting").unwrap();
    drop(handle);
    runtime.run(&receiver).unwrap();
    assert!(runtime.is_torn_down());
    assert!(runtime.waiting_message().is_none());
}

#[test]
fn stage_events_round_trip_through_json() {
    let event: StageEvent =
        serde_json::from_str(r#"{"type":"widget_change","panel":"show_users"}"#).unwrap();
    assert_eq!(
        event,
        StageEvent::WidgetChange {
            panel: WidgetPanel::ShowUsers
        }
    );
    let room: StageEvent =
        serde_json::from_str(r#"{"type":"room","event":"active_speakers_changed"}"#).unwrap();
    assert_eq!(room.describe(), "room");
}

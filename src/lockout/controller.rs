use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    clock::Clock,
    lock::{AlarmSettings, LockState},
    monitor::{MonitorContext, MonitorController},
    overlay::AlarmRinger,
    scheduler::AlarmScheduler,
    settings::SettingsStore,
};

use super::events::Event;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LockoutStatus {
    Idle,
    Locked,
}

enum LockStart {
    Started(LockState),
    AlreadyActive(LockState),
    NoApps,
}

/// Two-state machine (idle/locked) driven by [`Event`]s.
///
/// The controller is the only writer that starts or ends lock windows, and
/// the only owner of the monitor task.
pub struct LockoutController {
    store: Arc<dyn SettingsStore>,
    clock: Arc<dyn Clock>,
    scheduler: AlarmScheduler,
    ringer: Arc<dyn AlarmRinger>,
    monitor_ctx: MonitorContext,
    monitor: MonitorController,
    events_tx: mpsc::UnboundedSender<Event>,
}

impl LockoutController {
    /// `events_tx` is where the monitor reports expiry; it should feed the
    /// receiver later passed to [`Self::run`].
    pub fn new(
        store: Arc<dyn SettingsStore>,
        clock: Arc<dyn Clock>,
        scheduler: AlarmScheduler,
        ringer: Arc<dyn AlarmRinger>,
        monitor_ctx: MonitorContext,
        events_tx: mpsc::UnboundedSender<Event>,
    ) -> Self {
        Self {
            store,
            clock,
            scheduler,
            ringer,
            monitor_ctx,
            monitor: MonitorController::new(),
            events_tx,
        }
    }

    pub async fn status(&self) -> Result<LockoutStatus> {
        let state = self.store.read_lock_state().await?;
        Ok(if state.is_expired(self.clock.now()) {
            LockoutStatus::Idle
        } else {
            LockoutStatus::Locked
        })
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitor.is_running()
    }

    pub async fn handle(&mut self, event: Event) -> Result<()> {
        match event {
            Event::WakeFired => self.on_wake_fired().await,
            Event::SettingsChanged(settings) => self.on_settings_changed(settings).await,
            Event::UserDisabled => self.on_user_disabled().await,
            Event::LockExpired { window_id } => self.on_lock_expired(window_id).await,
        }
    }

    /// Processes events until `shutdown` fires or every sender is gone, then
    /// stops the monitor. An active lock stays in the store for the next
    /// [`Self::recover`].
    pub async fn run(mut self, mut events_rx: mpsc::UnboundedReceiver<Event>, shutdown: CancellationToken) {
        loop {
            let event = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                event = events_rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            let name = event.name();
            log_debug!("handling {name}");
            if let Err(err) = self.handle(event).await {
                log_error!("{name} failed: {err:?}");
            }
        }

        if let Err(err) = self.monitor.stop().await {
            log_error!("failed to stop monitor on shutdown: {err:?}");
        }
        log_info!("lockout controller stopped");
    }

    /// Startup pass: re-arms an enabled alarm and picks up a lock window that
    /// was in progress when the process went away.
    pub async fn recover(&mut self) -> Result<()> {
        let settings = self
            .store
            .read_alarm_settings()
            .await
            .context("failed to read alarm settings during recovery")?;
        if settings.is_enabled {
            self.rearm(&settings);
        }

        let state = self
            .store
            .read_lock_state()
            .await
            .context("failed to read lock state during recovery")?;
        if !state.is_active {
            return Ok(());
        }

        let now = self.clock.now();
        if state.is_expired(now) {
            log_info!("lock window {:?} ended while not running, clearing", state.window_id);
            self.mark_ended(state.window_id).await?;
        } else if state.locked_apps.is_empty() {
            log_info!("active lock window has no apps, nothing to monitor");
        } else {
            log_info!("resuming lock window {:?} until {}", state.window_id, state.end_time);
            self.start_monitor(state).await?;
        }
        Ok(())
    }

    async fn on_wake_fired(&mut self) -> Result<()> {
        let settings = self
            .store
            .read_alarm_settings()
            .await
            .context("failed to read alarm settings on wake")?;
        if !settings.is_enabled {
            log_info!("wake ignored: alarm is disabled");
            return Ok(());
        }

        let now = self.clock.now();
        let (started, lock_error) = match self.begin_lock(&settings, now).await {
            Ok(LockStart::AlreadyActive(state)) => {
                log_info!("duplicate wake ignored: window {:?} already active", state.window_id);
                if !self.monitor.is_running() && !state.locked_apps.is_empty() {
                    self.start_monitor(state).await?;
                }
                return Ok(());
            }
            Ok(LockStart::Started(state)) => (Some(state), None),
            Ok(LockStart::NoApps) => (None, None),
            Err(err) => (None, Some(err)),
        };

        if let Err(err) = self.ringer.ring(&settings) {
            log_warn!("alarm ringer failed: {err:?}");
        }
        self.rearm(&settings);

        if let Some(err) = lock_error {
            return Err(err.context("lock did not start"));
        }

        match started {
            Some(state) => {
                log_info!(
                    "lock window {:?} started, {} apps until {}",
                    state.window_id,
                    state.locked_apps.len(),
                    state.end_time
                );
                self.start_monitor(state).await
            }
            None => {
                log_info!("alarm fired with no apps selected, no lock started");
                Ok(())
            }
        }
    }

    /// Writes a new window unless one is already running. The check and the
    /// write are a single store update, so two racing wakes start at most one
    /// window.
    async fn begin_lock(&self, settings: &AlarmSettings, now: DateTime<Utc>) -> Result<LockStart> {
        if settings.selected_apps.is_empty() {
            return Ok(LockStart::NoApps);
        }
        settings
            .validate()
            .context("refusing to start a lock from invalid settings")?;

        let candidate = LockState::begin(now, settings.lockout_duration(), settings.selected_apps.clone());
        let proposed = candidate.clone();
        let stored = self
            .store
            .update_lock_state(Box::new(move |current: &LockState| {
                if current.is_expired(now) {
                    Some(proposed)
                } else {
                    None
                }
            }))
            .await
            .context("failed to persist lock state")?;

        if stored.window_id == candidate.window_id {
            Ok(LockStart::Started(stored))
        } else {
            Ok(LockStart::AlreadyActive(stored))
        }
    }

    async fn on_settings_changed(&mut self, settings: AlarmSettings) -> Result<()> {
        if settings.is_enabled {
            self.scheduler
                .schedule_alarm(&settings, &self.clock.local_now())
                .context("failed to reschedule alarm after settings change")?;
            return Ok(());
        }

        self.scheduler.cancel_alarm();
        self.end_lock("alarm disabled").await
    }

    async fn on_user_disabled(&mut self) -> Result<()> {
        self.store
            .update_alarm_settings(Box::new(|current: &AlarmSettings| AlarmSettings {
                is_enabled: false,
                ..current.clone()
            }))
            .await
            .context("failed to disable alarm")?;
        self.scheduler.cancel_alarm();
        self.end_lock("disabled by user").await
    }

    async fn on_lock_expired(&mut self, window_id: Option<String>) -> Result<()> {
        if self.monitor.window_id() != window_id.as_deref() {
            log_debug!("ignoring expiry for stale window {window_id:?}");
            return Ok(());
        }

        self.stop_monitor().await;
        self.mark_ended(window_id).await
    }

    async fn end_lock(&mut self, reason: &str) -> Result<()> {
        self.stop_monitor().await;

        let stored = self
            .store
            .update_lock_state(Box::new(|current: &LockState| {
                current.is_active.then(|| LockState {
                    is_active: false,
                    ..current.clone()
                })
            }))
            .await
            .context("failed to clear lock state")?;
        log_info!("lock ended ({reason}), window {:?}", stored.window_id);
        Ok(())
    }

    /// Marks the stored window inactive only if it is still `window_id`, so a
    /// late report never ends a newer window.
    async fn mark_ended(&self, window_id: Option<String>) -> Result<()> {
        let expected = window_id.clone();
        let stored = self
            .store
            .update_lock_state(Box::new(move |current: &LockState| {
                (current.is_active && current.is_same_window(expected.as_deref())).then(|| LockState {
                    is_active: false,
                    ..current.clone()
                })
            }))
            .await
            .context("failed to mark lock window ended")?;

        if stored.is_same_window(window_id.as_deref()) {
            log_info!("lock window {window_id:?} ended");
        } else {
            log_info!("window {window_id:?} already replaced by {:?}", stored.window_id);
        }
        Ok(())
    }

    /// A monitor that died in a presenter or probe still counts as stopped.
    async fn stop_monitor(&mut self) {
        if let Err(err) = self.monitor.stop().await {
            log_error!("monitor ended abnormally: {err:?}");
        }
    }

    async fn start_monitor(&mut self, state: LockState) -> Result<()> {
        self.stop_monitor().await;

        let events_tx = self.events_tx.clone();
        self.monitor
            .start(self.monitor_ctx.clone(), state, move |window_id| {
                let _ = events_tx.send(Event::LockExpired { window_id });
            })
            .context("failed to start monitor")
    }

    fn rearm(&self, settings: &AlarmSettings) {
        if let Err(err) = self.scheduler.schedule_alarm(settings, &self.clock.local_now()) {
            log_error!("failed to schedule next alarm: {err:?}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::EngineConfig,
        scheduler::{WakePrecision, ALARM_CALLBACK_ID},
        settings::MemoryStore,
        testing::{
            CountingRinger, FailingStore, FakeWakeTimer, RecordingPresenter, ScriptedProbe,
            VirtualClock,
        },
    };
    use chrono::{Duration, TimeZone};
    use std::collections::BTreeSet;
    use tokio::time::Duration as StdDuration;

    fn at(d: u32, h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, d, h, m, s).unwrap()
    }

    fn apps(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    fn morning(selected: &[&str]) -> AlarmSettings {
        AlarmSettings {
            is_enabled: true,
            alarm_hour: 7,
            alarm_minute: 0,
            lockout_duration_minutes: 30,
            selected_apps: apps(selected),
        }
    }

    struct Harness {
        controller: LockoutController,
        events_rx: mpsc::UnboundedReceiver<Event>,
        store: Arc<dyn SettingsStore>,
        timer: Arc<FakeWakeTimer>,
        ringer: Arc<CountingRinger>,
        presenter: Arc<RecordingPresenter>,
    }

    fn harness_with_store(store: Arc<dyn SettingsStore>, clock_at: DateTime<Utc>) -> Harness {
        let clock = Arc::new(VirtualClock::starting_at(clock_at));
        let timer = Arc::new(FakeWakeTimer::default());
        let ringer = Arc::new(CountingRinger::default());
        let presenter = Arc::new(RecordingPresenter::default());
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let monitor_ctx = MonitorContext::new(
            &EngineConfig::default(),
            store.clone(),
            clock.clone(),
            Arc::new(ScriptedProbe::showing("com.x.social")),
            presenter.clone(),
        );
        let controller = LockoutController::new(
            store.clone(),
            clock,
            AlarmScheduler::new(timer.clone()),
            ringer.clone(),
            monitor_ctx,
            events_tx,
        );

        Harness {
            controller,
            events_rx,
            store,
            timer,
            ringer,
            presenter,
        }
    }

    fn harness(settings: AlarmSettings, lock: LockState, clock_at: DateTime<Utc>) -> Harness {
        harness_with_store(Arc::new(MemoryStore::new(settings, lock)), clock_at)
    }

    #[tokio::test(start_paused = true)]
    async fn wake_at_seven_starts_a_thirty_minute_window() {
        let mut h = harness(morning(&["com.x.social"]), LockState::default(), at(19, 7, 0, 0));

        h.controller.handle(Event::WakeFired).await.unwrap();

        let state = h.store.read_lock_state().await.unwrap();
        assert!(state.is_active);
        assert_eq!(state.start_time, at(19, 7, 0, 0));
        assert_eq!(state.end_time, at(19, 7, 30, 0));
        assert_eq!(state.locked_apps, apps(&["com.x.social"]));
        assert_eq!(h.controller.status().await.unwrap(), LockoutStatus::Locked);
        assert!(h.controller.is_monitoring());
        assert_eq!(h.ringer.rings(), 1);

        let pending = h.timer.pending();
        assert_eq!(pending[ALARM_CALLBACK_ID], (at(20, 7, 0, 0), WakePrecision::Exact));

        tokio::time::sleep(StdDuration::from_millis(10)).await;
        assert_eq!(h.presenter.presented(), vec!["com.x.social".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_selection_rings_without_locking() {
        let mut h = harness(morning(&[]), LockState::default(), at(19, 7, 0, 0));

        h.controller.handle(Event::WakeFired).await.unwrap();

        assert!(!h.store.read_lock_state().await.unwrap().is_active);
        assert!(!h.controller.is_monitoring());
        assert_eq!(h.ringer.rings(), 1);
        assert_eq!(h.timer.pending().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_alarm_ignores_wake() {
        let settings = AlarmSettings {
            is_enabled: false,
            ..morning(&["com.x.social"])
        };
        let mut h = harness(settings, LockState::default(), at(19, 7, 0, 0));

        h.controller.handle(Event::WakeFired).await.unwrap();

        assert!(!h.store.read_lock_state().await.unwrap().is_active);
        assert_eq!(h.ringer.rings(), 0);
        assert!(h.timer.pending().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_wake_is_a_no_op() {
        let mut h = harness(morning(&["com.x.social"]), LockState::default(), at(19, 7, 0, 0));

        h.controller.handle(Event::WakeFired).await.unwrap();
        let first = h.store.read_lock_state().await.unwrap();

        tokio::time::sleep(StdDuration::from_secs(5)).await;
        h.controller.handle(Event::WakeFired).await.unwrap();

        assert_eq!(h.store.read_lock_state().await.unwrap(), first);
        assert_eq!(h.ringer.rings(), 1);
        assert!(h.controller.is_monitoring());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_lock_write_still_rings_but_does_not_lock() {
        let store: Arc<dyn SettingsStore> =
            Arc::new(FailingStore::rejecting_lock_writes(morning(&["com.x.social"])));
        let mut h = harness_with_store(store, at(19, 7, 0, 0));

        let result = h.controller.handle(Event::WakeFired).await;

        assert!(result.is_err());
        assert_eq!(h.ringer.rings(), 1);
        assert!(!h.controller.is_monitoring());
        assert!(!h.store.read_lock_state().await.unwrap().is_active);
        assert_eq!(h.timer.pending().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn user_disable_ends_lock_and_cancels_alarm() {
        let mut h = harness(morning(&["com.x.social"]), LockState::default(), at(19, 7, 0, 0));
        h.controller.handle(Event::WakeFired).await.unwrap();
        tokio::time::sleep(StdDuration::from_millis(10)).await;

        h.controller.handle(Event::UserDisabled).await.unwrap();
        let attempts = h.presenter.attempts();

        assert!(!h.store.read_alarm_settings().await.unwrap().is_enabled);
        assert!(!h.store.read_lock_state().await.unwrap().is_active);
        assert!(h.timer.pending().is_empty());
        assert!(!h.controller.is_monitoring());
        assert_eq!(h.controller.status().await.unwrap(), LockoutStatus::Idle);

        tokio::time::sleep(StdDuration::from_secs(10)).await;
        assert_eq!(h.presenter.attempts(), attempts);
    }

    #[tokio::test(start_paused = true)]
    async fn user_disable_clears_lock_after_monitor_crashed() {
        let mut h = harness(morning(&["com.x.social"]), LockState::default(), at(19, 7, 0, 0));
        h.presenter.panic_on_present();
        h.controller.handle(Event::WakeFired).await.unwrap();
        tokio::time::sleep(StdDuration::from_millis(10)).await;
        assert_eq!(h.presenter.attempts(), 1);

        h.controller.handle(Event::UserDisabled).await.unwrap();

        assert!(!h.store.read_lock_state().await.unwrap().is_active);
        assert!(!h.controller.is_monitoring());
        assert_eq!(h.controller.status().await.unwrap(), LockoutStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn disabling_through_settings_ends_lock() {
        let mut h = harness(morning(&["com.x.social"]), LockState::default(), at(19, 7, 0, 0));
        h.controller.handle(Event::WakeFired).await.unwrap();

        let disabled = AlarmSettings {
            is_enabled: false,
            ..morning(&["com.x.social"])
        };
        h.controller
            .handle(Event::SettingsChanged(disabled))
            .await
            .unwrap();

        assert!(h.timer.pending().is_empty());
        assert!(!h.store.read_lock_state().await.unwrap().is_active);
        assert!(!h.controller.is_monitoring());
    }

    #[tokio::test(start_paused = true)]
    async fn enabling_through_settings_schedules_next_occurrence() {
        let mut h = harness(AlarmSettings::default(), LockState::default(), at(19, 22, 0, 0));

        h.controller
            .handle(Event::SettingsChanged(morning(&[])))
            .await
            .unwrap();

        assert_eq!(h.timer.pending()[ALARM_CALLBACK_ID].0, at(20, 7, 0, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_expiry_report_is_ignored() {
        let mut h = harness(morning(&["com.x.social"]), LockState::default(), at(19, 7, 0, 0));
        h.controller.handle(Event::WakeFired).await.unwrap();

        h.controller
            .handle(Event::LockExpired {
                window_id: Some("some-older-window".into()),
            })
            .await
            .unwrap();

        assert!(h.store.read_lock_state().await.unwrap().is_active);
        assert!(h.controller.is_monitoring());
    }

    #[tokio::test(start_paused = true)]
    async fn monitor_expiry_returns_controller_to_idle() {
        let settings = AlarmSettings {
            lockout_duration_minutes: 1,
            ..morning(&["com.x.social"])
        };
        let h = harness(settings, LockState::default(), at(19, 7, 0, 0));
        let Harness {
            controller,
            events_rx,
            store,
            ..
        } = h;
        let events_tx = controller.events_tx.clone();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(controller.run(events_rx, shutdown.clone()));

        events_tx.send(Event::WakeFired).unwrap();
        tokio::time::sleep(StdDuration::from_secs(30)).await;
        assert!(store.read_lock_state().await.unwrap().is_active);

        tokio::time::sleep(StdDuration::from_secs(31)).await;
        let state = store.read_lock_state().await.unwrap();
        assert!(!state.is_active);
        assert_eq!(state.end_time, at(19, 7, 1, 0));

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn recover_resumes_an_unexpired_window() {
        let window = LockState::begin(at(19, 7, 0, 0), Duration::minutes(30), apps(&["com.x.social"]));
        let mut h = harness(morning(&["com.x.social"]), window.clone(), at(19, 7, 10, 0));

        h.controller.recover().await.unwrap();

        assert!(h.controller.is_monitoring());
        assert_eq!(h.timer.pending()[ALARM_CALLBACK_ID].0, at(20, 7, 0, 0));
        assert_eq!(h.store.read_lock_state().await.unwrap(), window);
        assert_eq!(h.ringer.rings(), 0);

        tokio::time::sleep(StdDuration::from_millis(10)).await;
        assert_eq!(h.presenter.presented().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn recover_clears_a_window_that_ran_out() {
        let window = LockState::begin(at(19, 7, 0, 0), Duration::minutes(30), apps(&["com.x.social"]));
        let settings = AlarmSettings {
            is_enabled: false,
            ..morning(&["com.x.social"])
        };
        let mut h = harness(settings, window.clone(), at(19, 9, 0, 0));

        h.controller.recover().await.unwrap();

        let state = h.store.read_lock_state().await.unwrap();
        assert!(!state.is_active);
        assert_eq!(state.window_id, window.window_id);
        assert!(!h.controller.is_monitoring());
        assert!(h.timer.pending().is_empty());
        assert!(h.events_rx.try_recv().is_err());
    }
}

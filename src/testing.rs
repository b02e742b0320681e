//! Fakes for the injected capabilities.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex,
    },
};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, TimeZone, Utc};
use tokio::{sync::watch, time::Instant};

use crate::{
    clock::Clock,
    lock::{AlarmSettings, LockState},
    monitor::ForegroundProbe,
    overlay::{AlarmRinger, BlockPresenter},
    scheduler::{WakeError, WakePrecision, WakeTimer},
    settings::{AlarmSettingsUpdate, LockStateUpdate, MemoryStore, SettingsStore},
};

/// Wall clock that follows tokio's (possibly paused) clock from a fixed start.
pub struct VirtualClock {
    base: DateTime<Utc>,
    origin: Instant,
}

impl VirtualClock {
    pub fn starting_at(base: DateTime<Utc>) -> Self {
        Self {
            base,
            origin: Instant::now(),
        }
    }

    pub fn starting_at_utc(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Self {
        Self::starting_at(Utc.with_ymd_and_hms(year, month, day, hour, min, sec).unwrap())
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> DateTime<Utc> {
        self.base + Duration::from_std(self.origin.elapsed()).unwrap()
    }

    fn local_now(&self) -> DateTime<FixedOffset> {
        self.now().fixed_offset()
    }
}

#[derive(Debug, Clone)]
enum ProbeScript {
    App(Option<String>),
    Fail,
    Hang,
}

pub struct ScriptedProbe {
    script: Mutex<ProbeScript>,
    calls: AtomicUsize,
}

impl ScriptedProbe {
    pub fn showing(app_id: &str) -> Self {
        Self {
            script: Mutex::new(ProbeScript::App(Some(app_id.to_string()))),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_app(&self, app_id: Option<&str>) {
        *self.script.lock().unwrap() = ProbeScript::App(app_id.map(str::to_string));
    }

    pub fn fail(&self) {
        *self.script.lock().unwrap() = ProbeScript::Fail;
    }

    pub fn hang(&self) {
        *self.script.lock().unwrap() = ProbeScript::Hang;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ForegroundProbe for ScriptedProbe {
    async fn query_foreground_app(
        &self,
        _window_start: DateTime<Utc>,
        _window_end: DateTime<Utc>,
    ) -> Result<Option<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let script = self.script.lock().unwrap().clone();
        match script {
            ProbeScript::App(app) => Ok(app),
            ProbeScript::Fail => Err(anyhow!("usage access revoked")),
            ProbeScript::Hang => std::future::pending().await,
        }
    }
}

#[derive(Default)]
pub struct RecordingPresenter {
    presented: Mutex<Vec<String>>,
    attempts: AtomicUsize,
    failing: AtomicBool,
    panicking: AtomicBool,
}

impl RecordingPresenter {
    pub fn presented(&self) -> Vec<String> {
        self.presented.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn fail_with_permission_error(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    pub fn panic_on_present(&self) {
        self.panicking.store(true, Ordering::SeqCst);
    }
}

impl BlockPresenter for RecordingPresenter {
    fn present(&self, app_id: &str) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.panicking.load(Ordering::SeqCst) {
            panic!("overlay host crashed");
        }
        if self.failing.load(Ordering::SeqCst) {
            bail!("overlay permission missing");
        }
        self.presented.lock().unwrap().push(app_id.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct CountingRinger {
    rings: AtomicUsize,
}

impl CountingRinger {
    pub fn rings(&self) -> usize {
        self.rings.load(Ordering::SeqCst)
    }
}

impl AlarmRinger for CountingRinger {
    fn ring(&self, _settings: &AlarmSettings) -> Result<()> {
        self.rings.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Records wakes instead of firing them.
#[derive(Default)]
pub struct FakeWakeTimer {
    pending: Mutex<HashMap<String, (DateTime<Utc>, WakePrecision)>>,
    exact_denied: AtomicBool,
    refuse_exact: AtomicBool,
}

impl FakeWakeTimer {
    pub fn pending(&self) -> HashMap<String, (DateTime<Utc>, WakePrecision)> {
        self.pending.lock().unwrap().clone()
    }

    /// Reports no exact permission up front.
    pub fn deny_exact(&self) {
        self.exact_denied.store(true, Ordering::SeqCst);
    }

    /// Claims exact permission but refuses exact requests, as when the
    /// permission is revoked between the check and the request.
    pub fn refuse_exact_requests(&self) {
        self.refuse_exact.store(true, Ordering::SeqCst);
    }
}

impl WakeTimer for FakeWakeTimer {
    fn can_schedule_exact(&self) -> bool {
        !self.exact_denied.load(Ordering::SeqCst)
    }

    fn schedule_wake(
        &self,
        at: DateTime<Utc>,
        callback_id: &str,
        precision: WakePrecision,
    ) -> Result<(), WakeError> {
        if precision == WakePrecision::Exact
            && (!self.can_schedule_exact() || self.refuse_exact.load(Ordering::SeqCst))
        {
            return Err(WakeError::PermissionDenied);
        }
        self.pending
            .lock()
            .unwrap()
            .insert(callback_id.to_string(), (at, precision));
        Ok(())
    }

    fn cancel_wake(&self, callback_id: &str) {
        self.pending.lock().unwrap().remove(callback_id);
    }
}

/// [`MemoryStore`] with switchable failures.
pub struct FailingStore {
    inner: MemoryStore,
    fail_reads: AtomicBool,
    fail_lock_writes: AtomicBool,
}

impl FailingStore {
    /// Every read and lock write fails; observers still see `state`.
    pub fn with_lock_state(state: LockState) -> Self {
        Self {
            inner: MemoryStore::new(AlarmSettings::default(), state),
            fail_reads: AtomicBool::new(true),
            fail_lock_writes: AtomicBool::new(true),
        }
    }

    /// Reads succeed; lock state writes fail.
    pub fn rejecting_lock_writes(settings: AlarmSettings) -> Self {
        Self {
            inner: MemoryStore::new(settings, LockState::default()),
            fail_reads: AtomicBool::new(false),
            fail_lock_writes: AtomicBool::new(true),
        }
    }

    fn check_read(&self) -> Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            bail!("disk I/O error");
        }
        Ok(())
    }
}

#[async_trait]
impl SettingsStore for FailingStore {
    async fn read_alarm_settings(&self) -> Result<AlarmSettings> {
        self.check_read()?;
        self.inner.read_alarm_settings().await
    }

    fn observe_alarm_settings(&self) -> watch::Receiver<AlarmSettings> {
        self.inner.observe_alarm_settings()
    }

    async fn update_alarm_settings(&self, update: AlarmSettingsUpdate) -> Result<AlarmSettings> {
        self.inner.update_alarm_settings(update).await
    }

    async fn read_lock_state(&self) -> Result<LockState> {
        self.check_read()?;
        self.inner.read_lock_state().await
    }

    fn observe_lock_state(&self) -> watch::Receiver<LockState> {
        self.inner.observe_lock_state()
    }

    async fn update_lock_state(&self, update: LockStateUpdate) -> Result<LockState> {
        if self.fail_lock_writes.load(Ordering::SeqCst) {
            bail!("database is locked");
        }
        self.inner.update_lock_state(update).await
    }
}

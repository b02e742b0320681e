use std::sync::{Mutex, MutexGuard};

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::watch;

use crate::lock::{AlarmSettings, LockState};

/// Read-modify-write step applied to the alarm settings record.
pub type AlarmSettingsUpdate = Box<dyn FnOnce(&AlarmSettings) -> AlarmSettings + Send>;

/// Read-modify-write step applied to the lock state record. Returning `None`
/// leaves the stored record untouched.
pub type LockStateUpdate = Box<dyn FnOnce(&LockState) -> Option<LockState> + Send>;

/// Durable storage for the two engine records.
///
/// Reads return the last written value, or the defaults if nothing was ever
/// written. Every write replaces a whole record; implementations serialize
/// writes so concurrent writers never interleave fields, and an `update_*`
/// call runs its closure and the write as one atomic step.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn read_alarm_settings(&self) -> Result<AlarmSettings>;

    /// Receiver that sees every committed alarm settings write.
    fn observe_alarm_settings(&self) -> watch::Receiver<AlarmSettings>;

    async fn update_alarm_settings(&self, update: AlarmSettingsUpdate) -> Result<AlarmSettings>;

    async fn write_alarm_settings(&self, settings: AlarmSettings) -> Result<()> {
        self.update_alarm_settings(Box::new(move |_: &AlarmSettings| settings))
            .await
            .map(|_| ())
    }

    async fn read_lock_state(&self) -> Result<LockState>;

    /// Receiver that sees every committed lock state write.
    fn observe_lock_state(&self) -> watch::Receiver<LockState>;

    /// Returns the record as stored after the update (unchanged if the
    /// closure declined).
    async fn update_lock_state(&self, update: LockStateUpdate) -> Result<LockState>;

    async fn write_lock_state(&self, state: LockState) -> Result<()> {
        self.update_lock_state(Box::new(move |_: &LockState| Some(state)))
            .await
            .map(|_| ())
    }
}

#[derive(Debug, Default, Clone)]
struct StoredRecords {
    alarm: AlarmSettings,
    lock: LockState,
}

/// Process-local store; nothing survives a restart. Useful for embedding
/// hosts that persist elsewhere, and for tests.
pub struct MemoryStore {
    data: Mutex<StoredRecords>,
    alarm_tx: watch::Sender<AlarmSettings>,
    lock_tx: watch::Sender<LockState>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(AlarmSettings::default(), LockState::default())
    }
}

impl MemoryStore {
    pub fn new(alarm: AlarmSettings, lock: LockState) -> Self {
        let (alarm_tx, _) = watch::channel(alarm.clone());
        let (lock_tx, _) = watch::channel(lock.clone());
        Self {
            data: Mutex::new(StoredRecords { alarm, lock }),
            alarm_tx,
            lock_tx,
        }
    }

    fn records(&self) -> MutexGuard<'_, StoredRecords> {
        match self.data.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl SettingsStore for MemoryStore {
    async fn read_alarm_settings(&self) -> Result<AlarmSettings> {
        Ok(self.records().alarm.clone())
    }

    fn observe_alarm_settings(&self) -> watch::Receiver<AlarmSettings> {
        self.alarm_tx.subscribe()
    }

    async fn update_alarm_settings(&self, update: AlarmSettingsUpdate) -> Result<AlarmSettings> {
        let mut guard = self.records();
        let next = update(&guard.alarm);
        guard.alarm = next.clone();
        self.alarm_tx.send_replace(next.clone());
        Ok(next)
    }

    async fn read_lock_state(&self) -> Result<LockState> {
        Ok(self.records().lock.clone())
    }

    fn observe_lock_state(&self) -> watch::Receiver<LockState> {
        self.lock_tx.subscribe()
    }

    async fn update_lock_state(&self, update: LockStateUpdate) -> Result<LockState> {
        let mut guard = self.records();
        if let Some(next) = update(&guard.lock) {
            guard.lock = next;
            self.lock_tx.send_replace(guard.lock.clone());
        }
        Ok(guard.lock.clone())
    }
}

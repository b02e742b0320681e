use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::{watch, Mutex};

use crate::{
    db::Database,
    lock::{AlarmSettings, LockState},
    settings::{AlarmSettingsUpdate, LockStateUpdate, SettingsStore},
};

/// [`SettingsStore`] persisted in SQLite. Observers are fed after each
/// committed transaction, never before, and in commit order: an update holds
/// `publish_lock` from its transaction until its notification is sent.
pub struct SqliteSettingsStore {
    db: Database,
    publish_lock: Mutex<()>,
    alarm_tx: watch::Sender<AlarmSettings>,
    lock_tx: watch::Sender<LockState>,
}

impl SqliteSettingsStore {
    pub async fn open(path: PathBuf) -> Result<Self> {
        let db = Database::new(path)?;
        Self::from_database(db).await
    }

    pub async fn from_database(db: Database) -> Result<Self> {
        let alarm = db
            .load_alarm_settings()
            .await
            .context("failed to load alarm settings")?;
        let lock = db
            .load_lock_state()
            .await
            .context("failed to load lock state")?;

        let (alarm_tx, _) = watch::channel(alarm);
        let (lock_tx, _) = watch::channel(lock);
        Ok(Self {
            db,
            publish_lock: Mutex::new(()),
            alarm_tx,
            lock_tx,
        })
    }
}

#[async_trait]
impl SettingsStore for SqliteSettingsStore {
    async fn read_alarm_settings(&self) -> Result<AlarmSettings> {
        self.db.load_alarm_settings().await
    }

    fn observe_alarm_settings(&self) -> watch::Receiver<AlarmSettings> {
        self.alarm_tx.subscribe()
    }

    async fn update_alarm_settings(&self, update: AlarmSettingsUpdate) -> Result<AlarmSettings> {
        let _publishing = self.publish_lock.lock().await;
        let next = self
            .db
            .apply_alarm_settings_update(update)
            .await
            .context("failed to persist alarm settings")?;
        self.alarm_tx.send_replace(next.clone());
        Ok(next)
    }

    async fn read_lock_state(&self) -> Result<LockState> {
        self.db.load_lock_state().await
    }

    fn observe_lock_state(&self) -> watch::Receiver<LockState> {
        self.lock_tx.subscribe()
    }

    async fn update_lock_state(&self, update: LockStateUpdate) -> Result<LockState> {
        let _publishing = self.publish_lock.lock().await;
        let (stored, written) = self
            .db
            .apply_lock_state_update(update)
            .await
            .context("failed to persist lock state")?;
        if written {
            self.lock_tx.send_replace(stored.clone());
        }
        Ok(stored)
    }
}

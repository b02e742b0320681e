use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const DEFAULT_ALARM_HOUR: u32 = 7;
pub const DEFAULT_ALARM_MINUTE: u32 = 0;
pub const DEFAULT_LOCKOUT_MINUTES: u32 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettingsError {
    #[error("alarm hour {0} is out of range (0-23)")]
    HourOutOfRange(u32),
    #[error("alarm minute {0} is out of range (0-59)")]
    MinuteOutOfRange(u32),
    #[error("lockout duration must be greater than zero minutes")]
    ZeroDuration,
}

/// Alarm configuration as edited by the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlarmSettings {
    pub is_enabled: bool,
    pub alarm_hour: u32,
    pub alarm_minute: u32,
    pub lockout_duration_minutes: u32,
    /// Application identifiers to lock. May be empty, in which case the alarm
    /// still rings but no lock window is started.
    pub selected_apps: BTreeSet<String>,
}

impl Default for AlarmSettings {
    fn default() -> Self {
        Self {
            is_enabled: false,
            alarm_hour: DEFAULT_ALARM_HOUR,
            alarm_minute: DEFAULT_ALARM_MINUTE,
            lockout_duration_minutes: DEFAULT_LOCKOUT_MINUTES,
            selected_apps: BTreeSet::new(),
        }
    }
}

impl AlarmSettings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.alarm_hour > 23 {
            return Err(SettingsError::HourOutOfRange(self.alarm_hour));
        }
        if self.alarm_minute > 59 {
            return Err(SettingsError::MinuteOutOfRange(self.alarm_minute));
        }
        if self.lockout_duration_minutes == 0 {
            return Err(SettingsError::ZeroDuration);
        }
        Ok(())
    }

    pub fn lockout_duration(&self) -> Duration {
        Duration::minutes(i64::from(self.lockout_duration_minutes))
    }
}

/// Persisted description of the current (or last) lock window.
///
/// `locked_apps` is a snapshot of the selection taken when the window began;
/// later edits to [`AlarmSettings`] never reach an in-progress window.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockState {
    pub is_active: bool,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub locked_apps: BTreeSet<String>,
    /// Identifies the window so late expiry reports can be matched against it.
    #[serde(default)]
    pub window_id: Option<String>,
}

impl LockState {
    /// Opens a new window at `now` lasting `duration`. The caller guarantees a
    /// positive duration (see [`AlarmSettings::validate`]), which keeps
    /// `end_time > start_time` for every active state.
    pub fn begin(now: DateTime<Utc>, duration: Duration, locked_apps: BTreeSet<String>) -> Self {
        Self {
            is_active: true,
            start_time: now,
            end_time: now + duration,
            locked_apps,
            window_id: Some(Uuid::new_v4().to_string()),
        }
    }

    pub fn inactive() -> Self {
        Self::default()
    }

    /// Always evaluated against the supplied wall-clock time; nothing here is
    /// cached, so the answer can only move from `false` to `true` as `now`
    /// advances.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        !self.is_active || now >= self.end_time
    }

    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        if self.is_expired(now) {
            Duration::zero()
        } else {
            (self.end_time - now).max(Duration::zero())
        }
    }

    pub fn is_app_locked(&self, app_id: &str, now: DateTime<Utc>) -> bool {
        !self.is_expired(now) && self.locked_apps.contains(app_id)
    }

    pub fn is_same_window(&self, window_id: Option<&str>) -> bool {
        self.window_id.as_deref() == window_id
    }
}

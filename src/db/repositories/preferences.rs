use std::collections::BTreeSet;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::Connection;

use crate::{
    db::{
        helpers::{get_value, get_value_or, put_value},
        Database,
    },
    lock::{AlarmSettings, LockState},
    settings::{AlarmSettingsUpdate, LockStateUpdate},
};

const ALARM_ENABLED: &str = "alarm_enabled";
const ALARM_HOUR: &str = "alarm_hour";
const ALARM_MINUTE: &str = "alarm_minute";
const LOCKOUT_DURATION: &str = "lockout_duration";
const SELECTED_APPS: &str = "selected_apps";

const LOCK_ACTIVE: &str = "lock_active";
const LOCK_START_TIME: &str = "lock_start_time";
const LOCK_END_TIME: &str = "lock_end_time";
const LOCKED_APPS: &str = "locked_apps";
const LOCK_WINDOW_ID: &str = "lock_window_id";

fn read_alarm_settings(conn: &Connection) -> Result<AlarmSettings> {
    let defaults = AlarmSettings::default();
    Ok(AlarmSettings {
        is_enabled: get_value_or(conn, ALARM_ENABLED, defaults.is_enabled)?,
        alarm_hour: get_value_or(conn, ALARM_HOUR, defaults.alarm_hour)?,
        alarm_minute: get_value_or(conn, ALARM_MINUTE, defaults.alarm_minute)?,
        lockout_duration_minutes: get_value_or(
            conn,
            LOCKOUT_DURATION,
            defaults.lockout_duration_minutes,
        )?,
        selected_apps: get_value_or(conn, SELECTED_APPS, defaults.selected_apps)?,
    })
}

fn write_alarm_settings(conn: &Connection, settings: &AlarmSettings) -> Result<()> {
    put_value(conn, ALARM_ENABLED, &settings.is_enabled)?;
    put_value(conn, ALARM_HOUR, &settings.alarm_hour)?;
    put_value(conn, ALARM_MINUTE, &settings.alarm_minute)?;
    put_value(conn, LOCKOUT_DURATION, &settings.lockout_duration_minutes)?;
    put_value(conn, SELECTED_APPS, &settings.selected_apps)?;
    Ok(())
}

fn read_lock_state(conn: &Connection) -> Result<LockState> {
    Ok(LockState {
        is_active: get_value_or(conn, LOCK_ACTIVE, false)?,
        start_time: get_value_or(conn, LOCK_START_TIME, DateTime::<Utc>::default())?,
        end_time: get_value_or(conn, LOCK_END_TIME, DateTime::<Utc>::default())?,
        locked_apps: get_value_or(conn, LOCKED_APPS, BTreeSet::new())?,
        window_id: get_value::<Option<String>>(conn, LOCK_WINDOW_ID)?.flatten(),
    })
}

fn write_lock_state(conn: &Connection, state: &LockState) -> Result<()> {
    put_value(conn, LOCK_ACTIVE, &state.is_active)?;
    put_value(conn, LOCK_START_TIME, &state.start_time)?;
    put_value(conn, LOCK_END_TIME, &state.end_time)?;
    put_value(conn, LOCKED_APPS, &state.locked_apps)?;
    put_value(conn, LOCK_WINDOW_ID, &state.window_id)?;
    Ok(())
}

impl Database {
    pub async fn load_alarm_settings(&self) -> Result<AlarmSettings> {
        self.execute(|conn| read_alarm_settings(conn)).await
    }

    pub async fn load_lock_state(&self) -> Result<LockState> {
        self.execute(|conn| read_lock_state(conn)).await
    }

    /// Reads, applies `update`, and writes back within one transaction.
    pub async fn apply_alarm_settings_update(
        &self,
        update: AlarmSettingsUpdate,
    ) -> Result<AlarmSettings> {
        self.transaction(move |tx| {
            let current = read_alarm_settings(tx)?;
            let next = update(&current);
            write_alarm_settings(tx, &next)?;
            Ok(next)
        })
        .await
    }

    /// Like [`Self::apply_alarm_settings_update`]; returns the stored record,
    /// which is the previous one when `update` declines.
    pub async fn apply_lock_state_update(&self, update: LockStateUpdate) -> Result<(LockState, bool)> {
        self.transaction(move |tx| {
            let current = read_lock_state(tx)?;
            match update(&current) {
                Some(next) => {
                    write_lock_state(tx, &next)?;
                    Ok((next, true))
                }
                None => Ok((current, false)),
            }
        })
        .await
    }
}

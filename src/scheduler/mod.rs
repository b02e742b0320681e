pub mod wake;

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Days, Duration, TimeZone, Utc};

use crate::lock::{AlarmSettings, SettingsError};

pub use wake::{TokioWakeTimer, WakeError, WakeFired, WakePrecision, WakeTimer};

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

/// Wake identity of the daily alarm. There is only ever one.
pub const ALARM_CALLBACK_ID: &str = "sleeplock.alarm";

/// Next wall-clock occurrence of `hour:minute` in `now`'s zone, strictly
/// after `now`.
///
/// A slot that falls in a DST gap moves forward by an hour; an ambiguous slot
/// resolves to its earlier instant.
pub fn next_trigger<Tz: TimeZone>(hour: u32, minute: u32, now: &DateTime<Tz>) -> Result<DateTime<Tz>> {
    if hour > 23 {
        return Err(SettingsError::HourOutOfRange(hour).into());
    }
    if minute > 59 {
        return Err(SettingsError::MinuteOutOfRange(minute).into());
    }

    let zone = now.timezone();
    let today = now.date_naive();

    for offset in 0..=2 {
        let Some(slot) = today
            .checked_add_days(Days::new(offset))
            .and_then(|date| date.and_hms_opt(hour, minute, 0))
        else {
            continue;
        };

        let candidate = zone
            .from_local_datetime(&slot)
            .earliest()
            .or_else(|| zone.from_local_datetime(&(slot + Duration::hours(1))).earliest());

        if let Some(candidate) = candidate {
            if candidate > *now {
                return Ok(candidate);
            }
        }
    }

    anyhow::bail!("no valid local time for {hour:02}:{minute:02} after {now:?}")
}

/// Keeps at most one alarm wake outstanding on the injected [`WakeTimer`].
#[derive(Clone)]
pub struct AlarmScheduler {
    timer: Arc<dyn WakeTimer>,
}

impl AlarmScheduler {
    pub fn new(timer: Arc<dyn WakeTimer>) -> Self {
        Self { timer }
    }

    /// Replaces any pending alarm wake with one at the next occurrence of the
    /// configured time. Falls back to an inexact wake if exact timing is
    /// refused.
    pub fn schedule_alarm<Tz: TimeZone>(
        &self,
        settings: &AlarmSettings,
        now: &DateTime<Tz>,
    ) -> Result<DateTime<Utc>> {
        let trigger = next_trigger(settings.alarm_hour, settings.alarm_minute, now)?
            .with_timezone(&Utc);

        self.timer.cancel_wake(ALARM_CALLBACK_ID);

        let precision = if self.timer.can_schedule_exact() {
            WakePrecision::Exact
        } else {
            WakePrecision::Inexact
        };

        match self.timer.schedule_wake(trigger, ALARM_CALLBACK_ID, precision) {
            Ok(()) => {
                log_info!("alarm scheduled for {trigger} ({precision:?})");
            }
            Err(WakeError::PermissionDenied) if precision == WakePrecision::Exact => {
                log_warn!("exact alarm refused, falling back to inexact wake for {trigger}");
                self.timer
                    .schedule_wake(trigger, ALARM_CALLBACK_ID, WakePrecision::Inexact)
                    .context("failed to schedule inexact alarm")?;
            }
            Err(err) => return Err(err).context("failed to schedule alarm"),
        }

        Ok(trigger)
    }

    pub fn cancel_alarm(&self) {
        self.timer.cancel_wake(ALARM_CALLBACK_ID);
    }
}

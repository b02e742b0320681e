//! Human-readable text for the block surface and dashboard.

use std::fmt::Display;

use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};

use super::{AlarmSettings, LockState};

/// Text shown on the blocking surface for one locked application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockNotice {
    pub app_label: String,
    /// e.g. `7:30 AM on Oct 19`
    pub unlock_at: String,
    /// Empty once the window has ended.
    pub remaining: String,
}

impl BlockNotice {
    /// Times are rendered in the zone of `now`.
    pub fn new<Tz>(app_label: &str, state: &LockState, now: &DateTime<Tz>) -> Self
    where
        Tz: TimeZone,
        Tz::Offset: Display,
    {
        let now_utc = now.with_timezone(&Utc);
        let remaining = if state.is_expired(now_utc) {
            String::new()
        } else {
            format_countdown(state.remaining(now_utc))
        };

        Self {
            app_label: app_label.to_string(),
            unlock_at: format_unlock_time(&state.end_time.with_timezone(&now.timezone())),
            remaining,
        }
    }
}

pub fn format_unlock_time<Tz>(end: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    end.format("%-I:%M %p on %b %d").to_string()
}

/// `1h 5m`, `5m 3s`, or `3s`.
pub fn format_countdown(remaining: Duration) -> String {
    let total_seconds = remaining.num_seconds().max(0);
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{hours}h {minutes}m")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}

/// Dashboard summary of an in-progress window; empty when nothing is locked.
pub fn format_dashboard_remaining(state: &LockState, now: DateTime<Utc>) -> String {
    if state.is_expired(now) {
        return String::new();
    }

    let total_minutes = state.remaining(now).num_minutes();
    let hours = total_minutes / 60;
    let minutes = total_minutes % 60;

    if hours > 0 {
        format!("{hours}h {minutes}m remaining")
    } else {
        format!("{minutes}m remaining")
    }
}

pub fn format_alarm_time(hour: u32, minute: u32) -> String {
    match NaiveTime::from_hms_opt(hour, minute, 0) {
        Some(time) => time.format("%-I:%M %p").to_string(),
        None => format!("{hour:02}:{minute:02}"),
    }
}

/// Time of day at which a window opened by this alarm would end. Wraps past
/// midnight.
pub fn unlock_time_of_day(settings: &AlarmSettings) -> String {
    let Some(alarm) = NaiveTime::from_hms_opt(settings.alarm_hour, settings.alarm_minute, 0) else {
        return format_alarm_time(settings.alarm_hour, settings.alarm_minute);
    };
    let (unlock, _) = alarm.overflowing_add_signed(settings.lockout_duration());
    unlock.format("%-I:%M %p").to_string()
}

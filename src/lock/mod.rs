pub mod format;
pub mod state;

pub use format::{
    format_alarm_time, format_countdown, format_dashboard_remaining, unlock_time_of_day,
    BlockNotice,
};
pub use state::{AlarmSettings, LockState, SettingsError};

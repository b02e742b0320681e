use crate::lock::AlarmSettings;

/// Inputs to the lockout state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The alarm wake fired. May arrive more than once per occurrence.
    WakeFired,
    /// A committed alarm settings write.
    SettingsChanged(AlarmSettings),
    /// The user turned the alarm off, ending any lock in progress.
    UserDisabled,
    /// The monitor saw the window it was watching run out.
    LockExpired { window_id: Option<String> },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::WakeFired => "wake_fired",
            Event::SettingsChanged(_) => "settings_changed",
            Event::UserDisabled => "user_disabled",
            Event::LockExpired { .. } => "lock_expired",
        }
    }
}

use tokio::time::{Duration, Instant};

use crate::lock::LockState;

/// What a single tick decided to do with the foreground app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickAction {
    /// Show the block surface for this app.
    Present(String),
    /// Locked app, but the surface was shown for it too recently.
    Cooldown,
    /// Foreground app is not locked.
    Allowed,
    /// The engine's own app or its block surface.
    Exempt,
    /// Foreground could not be determined this tick.
    Unknown,
}

/// Loop-local debounce state. Never persisted; dropped with the monitor task.
#[derive(Debug, Default)]
pub struct MonitorSession {
    last_blocked_app: Option<String>,
    last_block_shown_at: Option<Instant>,
}

impl MonitorSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_blocked_app(&self) -> Option<&str> {
        self.last_blocked_app.as_deref()
    }

    pub fn evaluate(
        &mut self,
        foreground: Option<&str>,
        state: &LockState,
        own_app_id: &str,
        now: Instant,
        cooldown: Duration,
    ) -> TickAction {
        let Some(app) = foreground else {
            return TickAction::Unknown;
        };

        if is_own_app(app, own_app_id) {
            self.reset();
            return TickAction::Exempt;
        }

        if !state.locked_apps.contains(app) {
            self.reset();
            return TickAction::Allowed;
        }

        let same_app = self.last_blocked_app.as_deref() == Some(app);
        let cooled_down = self
            .last_block_shown_at
            .map_or(true, |shown_at| now.saturating_duration_since(shown_at) > cooldown);

        if same_app && !cooled_down {
            return TickAction::Cooldown;
        }

        self.last_blocked_app = Some(app.to_string());
        self.last_block_shown_at = Some(now);
        TickAction::Present(app.to_string())
    }

    pub fn reset(&mut self) {
        self.last_blocked_app = None;
        self.last_block_shown_at = None;
    }
}

/// The host app and anything nested under its identifier (such as its block
/// surface) is never blocked.
pub fn is_own_app(app_id: &str, own_app_id: &str) -> bool {
    app_id == own_app_id
        || app_id
            .strip_prefix(own_app_id)
            .is_some_and(|rest| rest.starts_with('.'))
}

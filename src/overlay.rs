use std::sync::Arc;

use anyhow::Result;
use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{
    clock::Clock,
    lock::{format_alarm_time, AlarmSettings},
    settings::SettingsStore,
};

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

/// Shows the blocking surface over a locked app.
///
/// The surface runs outside the monitor task and is expected to watch the
/// lock itself (see [`watch_until_expired`]) and close when it ends. Errors
/// are logged by the caller and otherwise ignored.
pub trait BlockPresenter: Send + Sync {
    fn present(&self, app_id: &str) -> Result<()>;
}

/// Sound, vibration or notification for a fired alarm.
pub trait AlarmRinger: Send + Sync {
    fn ring(&self, settings: &AlarmSettings) -> Result<()>;
}

/// Ringer for hosts that handle the alarm sound elsewhere.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogRinger;

impl AlarmRinger for LogRinger {
    fn ring(&self, settings: &AlarmSettings) -> Result<()> {
        log_info!(
            "alarm ringing ({})",
            format_alarm_time(settings.alarm_hour, settings.alarm_minute)
        );
        Ok(())
    }
}

/// Waits until the stored lock is expired, then calls `on_expired` exactly
/// once and returns `true`. Returns `false` without calling it if `cancel`
/// fires first.
///
/// Expiry is checked on every `poll` tick and on every committed lock state
/// write, so the surface closes even when no write happens at the end time.
pub async fn watch_until_expired<F>(
    store: Arc<dyn SettingsStore>,
    clock: Arc<dyn Clock>,
    poll: Duration,
    cancel: CancellationToken,
    on_expired: F,
) -> bool
where
    F: FnOnce() + Send,
{
    let mut changes = store.observe_lock_state();
    let mut watching = true;
    let mut ticker = tokio::time::interval(poll.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let state = match store.read_lock_state().await {
            Ok(state) => state,
            Err(err) => {
                log_warn!("lock state read failed, using last observed state: {err:?}");
                changes.borrow().clone()
            }
        };

        if state.is_expired(clock.now()) {
            on_expired();
            return true;
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return false,
            changed = changes.changed(), if watching => {
                if changed.is_err() {
                    watching = false;
                }
            }
            _ = ticker.tick() => {}
        }
    }
}

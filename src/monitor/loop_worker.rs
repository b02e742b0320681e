use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{
    clock::Clock,
    config::EngineConfig,
    lock::LockState,
    overlay::BlockPresenter,
    settings::SettingsStore,
};

use super::{
    probe::ForegroundProbe,
    session::{MonitorSession, TickAction},
};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

/// Everything the monitor loop needs, cloned into its task.
#[derive(Clone)]
pub struct MonitorContext {
    pub store: Arc<dyn SettingsStore>,
    pub clock: Arc<dyn Clock>,
    pub probe: Arc<dyn ForegroundProbe>,
    pub presenter: Arc<dyn BlockPresenter>,
    pub own_app_id: String,
    pub tick_interval: Duration,
    pub block_cooldown: Duration,
    pub probe_lookback: Duration,
    pub probe_timeout: Duration,
}

impl MonitorContext {
    pub fn new(
        config: &EngineConfig,
        store: Arc<dyn SettingsStore>,
        clock: Arc<dyn Clock>,
        probe: Arc<dyn ForegroundProbe>,
        presenter: Arc<dyn BlockPresenter>,
    ) -> Self {
        Self {
            store,
            clock,
            probe,
            presenter,
            own_app_id: config.own_app_id.clone(),
            tick_interval: config.tick_interval(),
            block_cooldown: config.block_cooldown(),
            probe_lookback: config.probe_lookback(),
            probe_timeout: config.probe_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorExit {
    /// The lock window ended; carries the id of the window that was watched.
    Expired { window_id: Option<String> },
    Cancelled,
}

/// Polls the foreground app until the lock window expires or `cancel_token`
/// fires. `initial_state` stands in for the stored state whenever a store
/// read fails.
pub async fn monitor_loop(
    ctx: MonitorContext,
    initial_state: LockState,
    cancel_token: CancellationToken,
) -> MonitorExit {
    let mut ticker = tokio::time::interval(ctx.tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut session = MonitorSession::new();
    let mut last_known = initial_state;

    log_info!(
        "monitor started for window {:?} ({} apps, until {})",
        last_known.window_id,
        last_known.locked_apps.len(),
        last_known.end_time
    );

    loop {
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => {
                log_info!("monitor loop cancelled");
                return MonitorExit::Cancelled;
            }
            _ = ticker.tick() => {}
        }

        match ctx.store.read_lock_state().await {
            Ok(state) => last_known = state,
            Err(err) => log_warn!("lock state read failed, using last known state: {err:?}"),
        }

        let now = ctx.clock.now();
        if last_known.is_expired(now) {
            log_info!("lock window {:?} expired at {now}", last_known.window_id);
            return MonitorExit::Expired {
                window_id: last_known.window_id.clone(),
            };
        }

        let foreground = query_foreground(&ctx, now).await;
        let action = session.evaluate(
            foreground.as_deref(),
            &last_known,
            &ctx.own_app_id,
            Instant::now(),
            ctx.block_cooldown,
        );

        if let TickAction::Present(app_id) = action {
            if cancel_token.is_cancelled() {
                return MonitorExit::Cancelled;
            }
            log_info!("blocking {app_id}");
            if let Err(err) = ctx.presenter.present(&app_id) {
                log_warn!("block surface for {app_id} failed: {err:?}");
            }
        }
    }
}

async fn query_foreground(ctx: &MonitorContext, now: DateTime<Utc>) -> Option<String> {
    let lookback = chrono::Duration::from_std(ctx.probe_lookback).unwrap_or_else(|_| chrono::Duration::zero());
    let fut = ctx.probe.query_foreground_app(now - lookback, now);

    match tokio::time::timeout(ctx.probe_timeout, fut).await {
        Ok(Ok(app)) => app,
        Ok(Err(err)) => {
            log_debug!("foreground query failed: {err:?}");
            None
        }
        Err(_) => {
            log_warn!(
                "foreground query timed out (> {}ms)",
                ctx.probe_timeout.as_millis()
            );
            None
        }
    }
}

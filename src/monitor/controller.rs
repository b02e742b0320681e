use anyhow::{bail, Context, Result};
use log::info;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::lock::LockState;

use super::loop_worker::{monitor_loop, MonitorContext, MonitorExit};

/// Owns the single monitor task. Stopping is safe from any task and returns
/// only after the loop has exited.
#[derive(Default)]
pub struct MonitorController {
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
    window_id: Option<String>,
}

impl MonitorController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns the loop for `state`. `on_expired` runs on the monitor task
    /// with the watched window id once the window ends on its own; it is not
    /// called when the monitor is stopped.
    pub fn start<F>(&mut self, ctx: MonitorContext, state: LockState, on_expired: F) -> Result<()>
    where
        F: FnOnce(Option<String>) + Send + 'static,
    {
        if self.is_running() {
            bail!("monitor already running");
        }

        let cancel_token = CancellationToken::new();
        let token_clone = cancel_token.clone();
        self.window_id = state.window_id.clone();

        let handle = tokio::spawn(async move {
            if let MonitorExit::Expired { window_id } = monitor_loop(ctx, state, token_clone).await {
                on_expired(window_id);
            }
        });

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Window the current (or last) monitor was started for.
    pub fn window_id(&self) -> Option<&str> {
        self.window_id.as_deref()
    }

    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }
        self.window_id = None;

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .context("monitor task failed to join")?;
            info!("Monitor stopped");
        }
        Ok(())
    }
}

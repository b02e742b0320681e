pub mod apps;
pub mod clock;
pub mod config;
pub mod db;
pub mod lock;
pub mod lockout;
pub mod monitor;
pub mod overlay;
pub mod permissions;
pub mod scheduler;
pub mod settings;
pub mod utils;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use apps::sanitize_selection;
use clock::Clock;
use config::EngineConfig;
use db::SqliteSettingsStore;
use lock::AlarmSettings;
use lockout::{Event, LockoutController};
use monitor::{ForegroundProbe, MonitorContext};
use overlay::{AlarmRinger, BlockPresenter};
use scheduler::{AlarmScheduler, TokioWakeTimer, WakeFired, ALARM_CALLBACK_ID};
use settings::SettingsStore;

pub use utils::init_logging;

const ENABLE_LOGS: bool = true;

/// Platform pieces the engine is built from.
pub struct Collaborators {
    pub store: Arc<dyn SettingsStore>,
    pub clock: Arc<dyn Clock>,
    pub probe: Arc<dyn ForegroundProbe>,
    pub presenter: Arc<dyn BlockPresenter>,
    pub ringer: Arc<dyn AlarmRinger>,
}

/// Opens (creating if needed) the SQLite store under `config.data_dir`.
pub async fn open_store(config: &EngineConfig) -> Result<Arc<dyn SettingsStore>> {
    let store = SqliteSettingsStore::open(config.database_path())
        .await
        .context("failed to open settings store")?;
    Ok(Arc::new(store))
}

pub struct Engine;

impl Engine {
    /// Wires the wake timer, the settings observer and the lockout
    /// controller, runs startup recovery, and starts processing events.
    pub async fn start(config: EngineConfig, deps: Collaborators) -> Result<EngineHandle> {
        log_info!("sleeplock engine starting (tick {}ms)", config.tick_interval_ms);

        let shutdown = CancellationToken::new();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (fired_tx, fired_rx) = mpsc::unbounded_channel();

        let wake_timer = Arc::new(TokioWakeTimer::new(deps.clock.clone(), fired_tx)?);
        let monitor_ctx = MonitorContext::new(
            &config,
            deps.store.clone(),
            deps.clock.clone(),
            deps.probe,
            deps.presenter,
        );
        let mut controller = LockoutController::new(
            deps.store.clone(),
            deps.clock,
            AlarmScheduler::new(wake_timer.clone()),
            deps.ringer,
            monitor_ctx,
            events_tx.clone(),
        );

        // Subscribe before recovery so no settings write is missed.
        let settings_rx = deps.store.observe_alarm_settings();

        if let Err(err) = controller.recover().await {
            log_error!("startup recovery failed: {err:?}");
        }

        let tasks = vec![
            tokio::spawn(forward_wakes(fired_rx, events_tx.clone(), shutdown.clone())),
            tokio::spawn(forward_settings(settings_rx, events_tx.clone(), shutdown.clone())),
            tokio::spawn(controller.run(events_rx, shutdown.clone())),
        ];

        Ok(EngineHandle {
            events_tx,
            store: deps.store,
            wake_timer,
            own_app_id: config.own_app_id,
            shutdown,
            tasks,
        })
    }
}

async fn forward_wakes(
    mut fired_rx: mpsc::UnboundedReceiver<WakeFired>,
    events_tx: mpsc::UnboundedSender<Event>,
    shutdown: CancellationToken,
) {
    loop {
        let fired = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            fired = fired_rx.recv() => match fired {
                Some(fired) => fired,
                None => break,
            },
        };

        if fired.callback_id != ALARM_CALLBACK_ID {
            log_debug!("ignoring wake {}", fired.callback_id);
            continue;
        }
        if events_tx.send(Event::WakeFired).is_err() {
            break;
        }
    }
}

async fn forward_settings(
    mut settings_rx: tokio::sync::watch::Receiver<AlarmSettings>,
    events_tx: mpsc::UnboundedSender<Event>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            changed = settings_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }

        let settings = settings_rx.borrow_and_update().clone();
        if events_tx.send(Event::SettingsChanged(settings)).is_err() {
            break;
        }
    }
}

/// Control surface for the embedding app.
pub struct EngineHandle {
    events_tx: mpsc::UnboundedSender<Event>,
    store: Arc<dyn SettingsStore>,
    wake_timer: Arc<TokioWakeTimer>,
    own_app_id: String,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl EngineHandle {
    pub fn send(&self, event: Event) -> Result<()> {
        self.events_tx
            .send(event)
            .map_err(|_| anyhow!("lockout controller is not running"))
    }

    /// Validates and persists new alarm settings. Protected apps are dropped
    /// from the selection. The controller picks the change up from the store.
    pub async fn set_alarm(&self, settings: AlarmSettings) -> Result<AlarmSettings> {
        settings.validate()?;

        let selected_apps = sanitize_selection(&settings.selected_apps, &self.own_app_id);
        if selected_apps.len() != settings.selected_apps.len() {
            log_info!(
                "dropped {} protected apps from selection",
                settings.selected_apps.len() - selected_apps.len()
            );
        }
        let sanitized = AlarmSettings {
            selected_apps,
            ..settings
        };

        let next = sanitized.clone();
        self.store
            .update_alarm_settings(Box::new(move |_: &AlarmSettings| next))
            .await
            .context("failed to save alarm settings")
    }

    /// Turns the alarm off and ends any lock in progress.
    pub fn disable(&self) -> Result<()> {
        self.send(Event::UserDisabled)
    }

    pub fn store(&self) -> Arc<dyn SettingsStore> {
        self.store.clone()
    }

    pub fn wake_timer(&self) -> &TokioWakeTimer {
        &self.wake_timer
    }

    /// Stops all engine tasks. A lock in progress stays stored and is resumed
    /// by the next [`Engine::start`].
    pub async fn shutdown(self) -> Result<()> {
        self.shutdown.cancel();
        for task in self.tasks {
            task.await.context("engine task failed to join")?;
        }
        log_info!("sleeplock engine stopped");
        Ok(())
    }
}

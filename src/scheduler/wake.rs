use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
    time::Duration,
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::{runtime::Handle, sync::mpsc, task::JoinHandle};

use crate::clock::Clock;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info};

/// Longest single sleep of an exact wake before re-reading the wall clock.
/// Keeps exact wakes honest when the wall clock jumps (suspend, NTP).
const EXACT_RESYNC_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakePrecision {
    Exact,
    /// The platform may deliver late; never early.
    Inexact,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WakeError {
    #[error("exact wake scheduling is not permitted")]
    PermissionDenied,
    #[error("wake timer unavailable: {0}")]
    Unavailable(String),
}

/// Delivered when a scheduled wake fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WakeFired {
    pub callback_id: String,
    pub fired_at: DateTime<Utc>,
}

/// Platform facility for waking the engine at a wall-clock time. Delivery is
/// at-least-once; consumers tolerate duplicates.
pub trait WakeTimer: Send + Sync {
    fn can_schedule_exact(&self) -> bool {
        true
    }

    /// Installs a wake for `callback_id`, replacing any pending wake with the
    /// same id.
    fn schedule_wake(
        &self,
        at: DateTime<Utc>,
        callback_id: &str,
        precision: WakePrecision,
    ) -> Result<(), WakeError>;

    /// No-op when nothing is pending for `callback_id`.
    fn cancel_wake(&self, callback_id: &str);
}

struct PendingWake {
    generation: u64,
    handle: JoinHandle<()>,
}

type PendingWakes = Arc<Mutex<HashMap<String, PendingWake>>>;

fn lock_pending(pending: &Mutex<HashMap<String, PendingWake>>) -> MutexGuard<'_, HashMap<String, PendingWake>> {
    match pending.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// In-process [`WakeTimer`] built on tokio sleeps. Fired wakes are sent on
/// the channel given at construction. Wakes do not survive the process; the
/// engine re-arms on start.
pub struct TokioWakeTimer {
    clock: Arc<dyn Clock>,
    fired_tx: mpsc::UnboundedSender<WakeFired>,
    pending: PendingWakes,
    next_generation: AtomicU64,
    exact_permitted: AtomicBool,
    runtime: Handle,
}

impl TokioWakeTimer {
    /// Must be called from inside a tokio runtime.
    pub fn new(clock: Arc<dyn Clock>, fired_tx: mpsc::UnboundedSender<WakeFired>) -> Result<Self> {
        let runtime = Handle::try_current().context("wake timer needs a tokio runtime")?;
        Ok(Self {
            clock,
            fired_tx,
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
            exact_permitted: AtomicBool::new(true),
            runtime,
        })
    }

    /// Mirrors the platform's exact-alarm permission.
    pub fn set_exact_permitted(&self, permitted: bool) {
        self.exact_permitted.store(permitted, Ordering::SeqCst);
    }

    pub fn pending_count(&self) -> usize {
        lock_pending(&self.pending).len()
    }
}

impl WakeTimer for TokioWakeTimer {
    fn can_schedule_exact(&self) -> bool {
        self.exact_permitted.load(Ordering::SeqCst)
    }

    fn schedule_wake(
        &self,
        at: DateTime<Utc>,
        callback_id: &str,
        precision: WakePrecision,
    ) -> Result<(), WakeError> {
        if precision == WakePrecision::Exact && !self.can_schedule_exact() {
            return Err(WakeError::PermissionDenied);
        }
        if self.fired_tx.is_closed() {
            return Err(WakeError::Unavailable("wake receiver dropped".into()));
        }

        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let clock = self.clock.clone();
        let fired_tx = self.fired_tx.clone();
        let pending = self.pending.clone();
        let id = callback_id.to_string();

        // Hold the lock across spawn so the task cannot finish and look for
        // its entry before it is inserted.
        let mut guard = lock_pending(&self.pending);
        let handle = self.runtime.spawn(async move {
            sleep_until_wall(clock.as_ref(), at, precision).await;

            let owned = {
                let mut guard = lock_pending(&pending);
                match guard.get(&id) {
                    Some(entry) if entry.generation == generation => {
                        guard.remove(&id);
                        true
                    }
                    _ => false,
                }
            };
            if !owned {
                return;
            }

            let fired_at = clock.now();
            log_debug!("wake {id} fired at {fired_at} (requested {at})");
            let _ = fired_tx.send(WakeFired {
                callback_id: id,
                fired_at,
            });
        });

        if let Some(previous) = guard.insert(
            callback_id.to_string(),
            PendingWake { generation, handle },
        ) {
            previous.handle.abort();
        }
        drop(guard);

        log_info!("wake {callback_id} scheduled for {at} ({precision:?})");
        Ok(())
    }

    fn cancel_wake(&self, callback_id: &str) {
        if let Some(previous) = lock_pending(&self.pending).remove(callback_id) {
            previous.handle.abort();
            log_info!("wake {callback_id} cancelled");
        }
    }
}

async fn sleep_until_wall(clock: &dyn Clock, at: DateTime<Utc>, precision: WakePrecision) {
    match precision {
        WakePrecision::Exact => loop {
            let Ok(remaining) = (at - clock.now()).to_std() else {
                break;
            };
            if remaining.is_zero() {
                break;
            }
            tokio::time::sleep(remaining.min(EXACT_RESYNC_INTERVAL)).await;
        },
        WakePrecision::Inexact => {
            if let Ok(remaining) = (at - clock.now()).to_std() {
                tokio::time::sleep(remaining).await;
            }
        }
    }
}

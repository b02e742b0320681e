use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

const ENABLE_LOGS: bool = true;

use crate::log_warn;

pub const DEFAULT_OWN_APP_ID: &str = "com.example.sleeplock";
pub const DATABASE_FILE_NAME: &str = "sleeplock.sqlite3";

/// Engine tunables. Defaults can be overridden through `SLEEPLOCK_*`
/// environment variables, see [`EngineConfig::from_env`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    pub tick_interval_ms: u64,
    pub block_cooldown_ms: u64,
    /// How far back each foreground query looks for activity.
    pub probe_lookback_ms: u64,
    pub probe_timeout_ms: u64,
    /// Identifier of the host application; never blocked.
    pub own_app_id: String,
    pub data_dir: PathBuf,
    pub debug: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 500,
            block_cooldown_ms: 1_000,
            probe_lookback_ms: 2_000,
            probe_timeout_ms: 250,
            own_app_id: DEFAULT_OWN_APP_ID.to_string(),
            data_dir: PathBuf::from("."),
            debug: false,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::default().with_overrides(|name| std::env::var(name).ok())
    }

    /// Applies overrides from `lookup`; unparsable numbers keep the current
    /// value and are reported.
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        override_ms(&lookup, "SLEEPLOCK_TICK_MS", &mut self.tick_interval_ms);
        override_ms(&lookup, "SLEEPLOCK_COOLDOWN_MS", &mut self.block_cooldown_ms);
        override_ms(&lookup, "SLEEPLOCK_LOOKBACK_MS", &mut self.probe_lookback_ms);
        override_ms(&lookup, "SLEEPLOCK_PROBE_TIMEOUT_MS", &mut self.probe_timeout_ms);

        if let Some(app_id) = lookup("SLEEPLOCK_APP_ID").filter(|value| !value.trim().is_empty()) {
            self.own_app_id = app_id.trim().to_string();
        }
        if let Some(dir) = lookup("SLEEPLOCK_DATA_DIR").filter(|value| !value.is_empty()) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(value) = lookup("SLEEPLOCK_DEBUG") {
            self.debug = value == "1" || value.eq_ignore_ascii_case("true");
        }

        self
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn block_cooldown(&self) -> Duration {
        Duration::from_millis(self.block_cooldown_ms)
    }

    pub fn probe_lookback(&self) -> Duration {
        Duration::from_millis(self.probe_lookback_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms.max(1))
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE_NAME)
    }
}

fn override_ms<F>(lookup: &F, name: &str, target: &mut u64)
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(name) else {
        return;
    };
    match raw.trim().parse::<u64>() {
        Ok(value) => *target = value,
        Err(_) => log_warn!("ignoring {name}={raw:?}: expected milliseconds"),
    }
}

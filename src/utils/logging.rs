//! Per-module switchable logging on top of the `log` facade.
//!
//! A module opts in by declaring the flag and importing the macros, which are
//! exported at the crate root:
//! ```ignore
//! const ENABLE_LOGS: bool = true;
//! use crate::{log_info, log_warn};
//!
//! log_info!("lock window started until {}", end_time);
//! ```
//! Setting the flag to `false` silences a noisy module (the monitor ticks
//! twice a second) without touching `RUST_LOG`.

use env_logger::Env;
use log::LevelFilter;

/// Logs at `info` when the calling module's `ENABLE_LOGS` is set.
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::info!($($arg)*);
        }
    };
}

/// Logs at `warn` when the calling module's `ENABLE_LOGS` is set.
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::warn!($($arg)*);
        }
    };
}

/// Logs at `error` when the calling module's `ENABLE_LOGS` is set.
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::error!($($arg)*);
        }
    };
}

/// Logs at `debug` when the calling module's `ENABLE_LOGS` is set.
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::debug!($($arg)*);
        }
    };
}

/// Installs `env_logger`, honouring `RUST_LOG` when set. Safe to call more
/// than once; later calls are ignored.
pub fn init_logging(debug: bool) {
    let default_level = if debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    let _ = env_logger::Builder::from_env(Env::default().default_filter_or(default_level.as_str()))
        .format_timestamp_millis()
        .try_init();
}

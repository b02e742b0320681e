use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Platform query for the foreground application.
///
/// Implementations look at OS activity between `window_start` and
/// `window_end` and report the app most recently brought to the foreground,
/// or `None` when nothing in that window identifies one. Blocking platform
/// calls belong in `spawn_blocking` inside the implementation; the monitor
/// bounds each call with a timeout.
#[async_trait]
pub trait ForegroundProbe: Send + Sync {
    async fn query_foreground_app(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<Option<String>>;
}

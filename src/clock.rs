use chrono::{DateTime, FixedOffset, Local, Utc};

/// Wall-clock source. Injected so lock expiry and alarm slots can be driven
/// by a fake in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Current time in the zone alarm hour/minute slots are expressed in.
    fn local_now(&self) -> DateTime<FixedOffset> {
        self.now().with_timezone(&Local).fixed_offset()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

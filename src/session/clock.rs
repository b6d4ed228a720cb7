use chrono::{DateTime, Utc};

/// Wall-clock source for session timestamps and durations.
///
/// Durations are wall time so that `end_time - start_time` and
/// `duration_minutes` agree even across a host suspend. The timeout timer
/// runs on the monotonic clock separately.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

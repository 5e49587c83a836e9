use chrono::{DateTime, Utc};

/// A source for the current time.
pub trait TimeProvider: Send + Sync + 'static {
    fn current_time(&self) -> DateTime<Utc>;
}

/// A time provider that uses the system clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClockTimeProvider;

impl TimeProvider for SystemClockTimeProvider {
    fn current_time(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

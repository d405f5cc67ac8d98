use chrono::{DateTime, Duration, Utc};

/// Roughly six months, counted as six 30-day months.
pub const DEFAULT_ROTATION_DAYS: i64 = 180;

/// Decides when a master key is old enough to be replaced.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RotationPolicy {
    threshold: Duration,
}

impl RotationPolicy {
    pub fn new(threshold: Duration) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// True once strictly more than `threshold` has passed since
    /// `created_at`. A key exactly at the threshold is not due yet.
    pub fn is_due(&self, created_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(created_at) > self.threshold
    }
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self::new(Duration::days(DEFAULT_ROTATION_DAYS))
    }
}

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Timestamp in Unix epoch seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub u64);

impl Timestamp {
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(duration.as_secs())
    }

    pub fn from_secs(secs: u64) -> Self {
        Self(secs)
    }

    pub fn as_secs(&self) -> u64 {
        self.0
    }

    pub fn elapsed(&self) -> Duration {
        let now = Self::now();
        Duration::from_secs(now.0.saturating_sub(self.0))
    }

    /// Whether more than `ttl` has passed since this timestamp
    pub fn is_older_than(&self, ttl: Duration) -> bool {
        self.elapsed() > ttl
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp() {
        let ts1 = Timestamp::now();
        let ts2 = Timestamp::from_secs(ts1.as_secs() - 10);
        let elapsed = ts2.elapsed();
        assert!(elapsed.as_secs() >= 10);
    }

    #[test]
    fn test_timestamp_age() {
        let old = Timestamp::from_secs(Timestamp::now().as_secs() - 100);
        assert!(old.is_older_than(Duration::from_secs(50)));
        assert!(!Timestamp::now().is_older_than(Duration::from_secs(50)));
    }
}

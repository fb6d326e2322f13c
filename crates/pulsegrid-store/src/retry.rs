//! Capped exponential backoff for transaction retry loops.

use std::time::Duration;

/// Delay sequence for retrying conflicted transactions.
///
/// Starts small and doubles up to a cap, mirroring the backing store's
/// own retry discipline. Create one per retry loop; drop it when the
/// loop succeeds.
#[derive(Debug)]
pub struct RetryBackoff {
    current: Duration,
    max: Duration,
}

impl RetryBackoff {
    /// Default backoff: 10ms doubling up to 1s.
    pub fn new() -> Self {
        Self::with_limits(Duration::from_millis(10), Duration::from_secs(1))
    }

    /// Backoff with custom base and cap.
    pub fn with_limits(base: Duration, max: Duration) -> Self {
        Self { current: base, max }
    }

    /// The next delay to wait, doubling the one after it.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    /// Sleep for the next delay.
    pub async fn pause(&mut self) {
        tokio::time::sleep(self.next_delay()).await;
    }
}

impl Default for RetryBackoff {
    fn default() -> Self {
        Self::new()
    }
}

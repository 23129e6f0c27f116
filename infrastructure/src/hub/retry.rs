use std::time::Duration;

/// Delays to wait before each reconnect attempt. The attempt count is the
/// number of delays; an empty policy never reconnects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    delays: Vec<Duration>,
}

impl ReconnectPolicy {
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    pub fn disabled() -> Self {
        Self { delays: Vec::new() }
    }

    pub fn max_attempts(&self) -> usize {
        self.delays.len()
    }

    /// Delay before the zero-based `attempt`, or `None` once attempts are exhausted.
    pub fn next_delay(&self, attempt: usize) -> Option<Duration> {
        self.delays.get(attempt).copied()
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(vec![
            Duration::ZERO,
            Duration::from_secs(2),
            Duration::from_secs(10),
            Duration::from_secs(30),
        ])
    }
}

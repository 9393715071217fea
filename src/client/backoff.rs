use std::time::Duration;

/// Exponential reconnect backoff: `base * factor^(attempt-1)`, capped.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub backoff_factor: u32,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            backoff_factor: 2,
            max_delay: Duration::from_millis(30_000),
            max_attempts: 10,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let multiplier = (self.backoff_factor as u64).checked_pow(exponent);
        let millis = multiplier
            .and_then(|m| (self.base_delay.as_millis() as u64).checked_mul(m))
            .unwrap_or(u64::MAX);
        Duration::from_millis(millis.min(self.max_delay.as_millis() as u64))
    }

    pub fn exhausted(&self, attempt: u32) -> bool {
        attempt > self.max_attempts
    }
}

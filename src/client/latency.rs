/// Exponential moving average over heartbeat round-trip samples:
/// `avg = avg * 0.8 + sample * 0.2`, starting from zero.
#[derive(Debug, Default)]
pub struct LatencyTracker {
    average_ms: f64,
    samples: u64,
}

impl LatencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, sample_ms: f64) {
        self.average_ms = self.average_ms * 0.8 + sample_ms * 0.2;
        self.samples += 1;
    }

    pub fn average_ms(&self) -> f64 {
        self.average_ms
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }
}

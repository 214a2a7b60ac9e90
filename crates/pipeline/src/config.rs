use std::time::Duration;

/// Tuning for one pipeline instance.
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineConfig {
    /// Wall-clock time the materialize drain may spend per frame.
    pub frame_budget: Duration,
    /// How long a materialize phase waits for its decoded data before the
    /// resource is given up on.
    pub materialize_timeout: Duration,
    /// Sleep between passes when shutdown is only waiting on stalled items.
    pub stall_poll_interval: Duration,
    /// Name of the decode worker thread.
    pub worker_name: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            frame_budget: Duration::from_millis(8),
            materialize_timeout: Duration::from_secs(5),
            stall_poll_interval: Duration::from_millis(1),
            worker_name: "resources".to_owned(),
        }
    }
}

impl PipelineConfig {
    pub fn with_frame_budget(mut self, budget: Duration) -> Self {
        self.frame_budget = budget;
        self
    }

    pub fn with_materialize_timeout(mut self, timeout: Duration) -> Self {
        self.materialize_timeout = timeout;
        self
    }

    pub fn with_worker_name(mut self, name: impl Into<String>) -> Self {
        self.worker_name = name.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fit_inside_a_60hz_frame() {
        let config = PipelineConfig::default();
        assert!(config.frame_budget < Duration::from_micros(16_667));
        assert_eq!(config.materialize_timeout, Duration::from_secs(5));
        assert_eq!(config.worker_name, "resources");
    }
}

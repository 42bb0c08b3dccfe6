use std::time::Duration;

/// Timing knobs for idle detection.
///
/// The defaults are tuned empirically; nothing in the monitor assumes the
/// specific values, and tests run with much smaller windows.
#[derive(Clone, Copy, Debug)]
pub struct TapConfig {
    /// How long the page must stay silent before it counts as idle.
    pub quiet_window: Duration,
    /// Hard ceiling on any single `wait_idle` call.
    pub max_wait: Duration,
    /// Granularity of the idle poll loop.
    pub poll_interval: Duration,
}

impl Default for TapConfig {
    fn default() -> Self {
        Self {
            quiet_window: Duration::from_secs(2),
            max_wait: Duration::from_secs(10),
            poll_interval: Duration::from_millis(100),
        }
    }
}

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How many times `isShowing` is checked before a CMP is abandoned.
    pub poll_attempts: u32,
    pub poll_interval: Duration,
    /// Post-click pause under `clickDelay` when the click sets no timeout.
    pub click_delay: Duration,
    /// Gap between the synthesized pointer events of a slide.
    pub slide_step: Duration,
    /// Reconnect observation after a CMP was handled instead of stopping.
    pub keep_observing: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_attempts: 10,
            poll_interval: Duration::from_millis(250),
            click_delay: Duration::from_millis(250),
            slide_step: Duration::from_millis(10),
            keep_observing: false,
        }
    }
}

impl EngineConfig {
    pub fn with_polling(mut self, attempts: u32, interval_ms: u64) -> Self {
        self.poll_attempts = attempts;
        self.poll_interval = Duration::from_millis(interval_ms);
        self
    }

    pub fn with_click_delay(mut self, ms: u64) -> Self {
        self.click_delay = Duration::from_millis(ms);
        self
    }

    pub fn with_slide_step(mut self, ms: u64) -> Self {
        self.slide_step = Duration::from_millis(ms);
        self
    }

    pub fn keep_observing(mut self, keep: bool) -> Self {
        self.keep_observing = keep;
        self
    }

    /// Time spent polling a CMP that never shows: the gaps between its checks.
    pub fn poll_budget(&self) -> Duration {
        self.poll_interval * self.poll_attempts.saturating_sub(1)
    }
}

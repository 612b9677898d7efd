use std::time::Duration;

/// Wall-clock budgets for one visit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeoutConfig {
    pub navigation: Duration,
    pub page_stable: Duration,
    pub check_interval: Duration,
    pub settle_delay: Duration,
    /// How long the finder waits for the first handled CMP.
    pub detection_budget: Duration,
    pub detection_interval: Duration,
    /// Grace period after a detection so the lifecycle can finish clicking.
    pub post_detection_wait: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            navigation: Duration::from_millis(30000),
            page_stable: Duration::from_millis(15000),
            check_interval: Duration::from_millis(300),
            settle_delay: Duration::from_millis(1000),
            detection_budget: Duration::from_millis(6000),
            detection_interval: Duration::from_millis(300),
            post_detection_wait: Duration::from_millis(2500),
        }
    }
}

impl TimeoutConfig {
    pub fn with_navigation(mut self, ms: u64) -> Self {
        self.navigation = Duration::from_millis(ms);
        self
    }

    pub fn with_page_stable(mut self, ms: u64) -> Self {
        self.page_stable = Duration::from_millis(ms);
        self
    }

    pub fn with_detection(mut self, budget_ms: u64, interval_ms: u64) -> Self {
        self.detection_budget = Duration::from_millis(budget_ms);
        self.detection_interval = Duration::from_millis(interval_ms);
        self
    }

    pub fn with_post_detection_wait(mut self, ms: u64) -> Self {
        self.post_detection_wait = Duration::from_millis(ms);
        self
    }

    pub fn fast() -> Self {
        Self {
            navigation: Duration::from_millis(20000),
            page_stable: Duration::from_millis(8000),
            check_interval: Duration::from_millis(200),
            settle_delay: Duration::from_millis(500),
            detection_budget: Duration::from_millis(3000),
            detection_interval: Duration::from_millis(200),
            post_detection_wait: Duration::from_millis(1000),
        }
    }

    pub fn patient() -> Self {
        Self {
            navigation: Duration::from_millis(60000),
            page_stable: Duration::from_millis(30000),
            check_interval: Duration::from_millis(500),
            settle_delay: Duration::from_millis(2000),
            detection_budget: Duration::from_millis(12000),
            detection_interval: Duration::from_millis(500),
            post_detection_wait: Duration::from_millis(5000),
        }
    }
}

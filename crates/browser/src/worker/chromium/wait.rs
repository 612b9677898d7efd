use chromiumoxide::page::Page;
use std::time::Duration;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, info, warn};

use crate::shared::{BrowserError, TimeoutConfig, js};

const REQUIRED_STABLE_CHECKS: u32 = 5;

pub struct WaitStrategy {
    config: TimeoutConfig,
}

impl WaitStrategy {
    pub fn new(config: TimeoutConfig) -> Self {
        Self { config }
    }

    /// Navigates and waits for the load to finish within the navigation budget.
    pub async fn navigate(&self, page: &Page, url: &str) -> Result<(), BrowserError> {
        info!(url, "navigating");
        let loaded = timeout(self.config.navigation, async {
            page.goto(url).await?;
            page.wait_for_navigation().await?;
            Ok::<_, chromiumoxide::error::CdpError>(())
        })
        .await;

        match loaded {
            Ok(Ok(())) => self.wait_for_stable(page).await,
            Ok(Err(e)) => Err(BrowserError::Navigation {
                url: url.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(BrowserError::NavigationTimeout { url: url.to_string() }),
        }
    }

    /// Polls until the document is complete with no pending resources, several
    /// checks in a row. Never fails on timeout: a busy page is still worth scanning.
    pub async fn wait_for_stable(&self, page: &Page) -> Result<(), BrowserError> {
        let start = Instant::now();
        let mut stable_checks = 0;

        loop {
            if start.elapsed() > self.config.page_stable {
                warn!("page did not stabilize in time, continuing");
                return Ok(());
            }

            let js = js::build_js_call(js::wait::CHECK_LOADING, &[]);

            let state = match page.evaluate_expression(js).await {
                Ok(result) => result.value().cloned(),
                Err(e) => {
                    let err_str = e.to_string();
                    if err_str.contains("Cannot find context") || err_str.contains("Execution context was destroyed") {
                        debug!("page context changed while waiting, retrying");
                        stable_checks = 0;
                        sleep(Duration::from_millis(1000)).await;
                        continue;
                    }
                    return Err(BrowserError::Navigation {
                        url: page.url().await.ok().flatten().unwrap_or_default(),
                        reason: err_str,
                    });
                }
            };

            if let Some(obj) = state.as_ref().and_then(|v| v.as_object()) {
                let ready = obj.get("readyState").and_then(|v| v.as_str()) == Some("complete");
                let active = obj.get("activeRequests").and_then(|v| v.as_u64()).unwrap_or(0);

                if ready && active == 0 {
                    stable_checks += 1;
                    if stable_checks >= REQUIRED_STABLE_CHECKS {
                        debug!(elapsed_ms = start.elapsed().as_millis() as u64, "page stabilized");
                        sleep(self.config.settle_delay).await;
                        return Ok(());
                    }
                } else {
                    stable_checks = 0;
                }
            }

            sleep(self.config.check_interval).await;
        }
    }
}

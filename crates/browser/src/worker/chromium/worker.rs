use chromiumoxide::browser::{Browser, BrowserConfig as ChromeConfig, HeadlessMode};
use cmpilot_core::{CmpAction, DebugFlags, RuleCatalog};
use cmpilot_engine::EngineConfig;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::document::ChromiumDocument;
use super::finder::{CmpFinder, VisitResult};
use super::wait::WaitStrategy;
use crate::shared::{BrowserError, TimeoutConfig};

/// One page to scan and what to do with the CMP found there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitJob {
    pub url: String,
    #[serde(default)]
    pub cmp_action: CmpAction,
}

impl VisitJob {
    pub fn new(url: impl Into<String>, cmp_action: CmpAction) -> Self {
        Self {
            url: url.into(),
            cmp_action,
        }
    }
}

struct LaunchedBrowser {
    browser: Browser,
    handler: JoinHandle<()>,
    profile: PathBuf,
}

/// Launches a fresh Chromium per visit and runs a [`CmpFinder`] on the loaded page.
pub struct ChromiumWorker {
    finder: CmpFinder,
    headless: bool,
}

impl ChromiumWorker {
    pub fn new(catalog: RuleCatalog) -> Self {
        Self {
            finder: CmpFinder::new(catalog),
            headless: true,
        }
    }

    pub fn headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    pub fn with_timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.finder = self.finder.with_timeouts(timeouts);
        self
    }

    pub fn with_flags(mut self, flags: DebugFlags) -> Self {
        self.finder = self.finder.with_flags(flags);
        self
    }

    pub fn with_engine_config(mut self, config: EngineConfig) -> Self {
        self.finder = self.finder.with_engine_config(config);
        self
    }

    async fn launch_browser(&self) -> Result<LaunchedBrowser, BrowserError> {
        let headless_mode = if self.headless { HeadlessMode::True } else { HeadlessMode::False };

        // A unique profile per browser avoids SingletonLock conflicts between visits.
        let profile = std::env::temp_dir().join(format!("chromium-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&profile)?;

        let chromium_cfg = ChromeConfig::builder()
            .headless_mode(headless_mode)
            .user_data_dir(&profile)
            .build()
            .map_err(BrowserError::Launch)?;

        let (browser, mut handler) = Browser::launch(chromium_cfg)
            .await
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        let handler = tokio::spawn(async move { while handler.next().await.is_some() {} });

        Ok(LaunchedBrowser {
            browser,
            handler,
            profile,
        })
    }

    pub async fn visit(&self, job: &VisitJob) -> Result<VisitResult, BrowserError> {
        info!(url = %job.url, action = ?job.cmp_action, "visiting");
        let LaunchedBrowser {
            mut browser,
            handler,
            profile,
        } = self.launch_browser().await?;

        let outcome = self.scan(&browser, job).await;

        if let Err(e) = browser.close().await {
            debug!(error = %e, "browser close failed");
        }
        if let Err(e) = browser.wait().await {
            debug!(error = %e, "browser process did not exit cleanly");
        }
        handler.abort();
        if let Err(e) = std::fs::remove_dir_all(&profile) {
            debug!(profile = %profile.display(), error = %e, "could not remove profile directory");
        }

        outcome
    }

    async fn scan(&self, browser: &Browser, job: &VisitJob) -> Result<VisitResult, BrowserError> {
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| BrowserError::Launch(format!("new page failed: {}", e)))?;

        WaitStrategy::new(self.finder.timeouts().clone())
            .navigate(&page, &job.url)
            .await?;
        let url = page.url().await.ok().flatten().unwrap_or_else(|| job.url.clone());

        let doc = ChromiumDocument::attach(page).await?;
        Ok(self.finder.find(&url, Arc::new(doc), job.cmp_action).await)
    }
}

use cmpilot_core::{CmpAction, DebugFlags, Document, HandledCmp, RuleCatalog};
use cmpilot_engine::{ConsentEngine, EngineConfig};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use crate::shared::TimeoutConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitResult {
    pub url: String,
    pub cmp_action: CmpAction,
    /// Name of the first CMP the engine reported, if any.
    pub detected: Option<String>,
    pub elapsed_ms: u64,
}

/// Runs the consent engine against a loaded document for a bounded time.
#[derive(Debug, Clone)]
pub struct CmpFinder {
    catalog: RuleCatalog,
    flags: DebugFlags,
    engine_config: EngineConfig,
    timeouts: TimeoutConfig,
}

impl CmpFinder {
    pub fn new(catalog: RuleCatalog) -> Self {
        Self {
            catalog,
            flags: DebugFlags::default(),
            engine_config: EngineConfig::default(),
            timeouts: TimeoutConfig::default(),
        }
    }

    pub fn with_flags(mut self, flags: DebugFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_engine_config(mut self, config: EngineConfig) -> Self {
        self.engine_config = config;
        self
    }

    pub fn with_timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn timeouts(&self) -> &TimeoutConfig {
        &self.timeouts
    }

    /// Starts the engine on `doc` and waits for its first handled CMP.
    ///
    /// After a detection the engine keeps running for `post_detection_wait`
    /// so the chosen action can complete; it is stopped when this returns.
    pub async fn find(&self, url: &str, doc: Arc<dyn Document>, action: CmpAction) -> VisitResult {
        let started = Instant::now();
        let (tx, mut handled) = mpsc::unbounded_channel::<HandledCmp>();

        let engine = ConsentEngine::new(doc, &self.catalog, action.policy(), action.debug_flags(self.flags))
            .with_config(self.engine_config.clone())
            .on_handled(move |cmp| {
                let _ = tx.send(cmp);
            });
        let task = tokio::spawn(engine.run());

        let mut detected = None;
        loop {
            if let Ok(cmp) = handled.try_recv() {
                info!(url, cmp = %cmp.cmp_name, "CMP detected");
                detected = Some(cmp.cmp_name);
                break;
            }
            if task.is_finished() || started.elapsed() >= self.timeouts.detection_budget {
                break;
            }
            sleep(self.timeouts.detection_interval).await;
        }

        // The engine may have reported and finished between the last check and exit.
        if detected.is_none() {
            detected = handled.try_recv().ok().map(|cmp| cmp.cmp_name);
        }

        if detected.is_some() {
            sleep(self.timeouts.post_detection_wait).await;
        } else {
            debug!(url, "no CMP detected within budget");
        }

        if task.is_finished() {
            match task.await {
                Ok(Ok(report)) => debug!(url, tried = ?report.tried, "engine finished"),
                Ok(Err(e)) => warn!(url, error = %e, "engine stopped with an error"),
                Err(e) => warn!(url, error = %e, "engine task failed"),
            }
        } else {
            task.abort();
        }

        VisitResult {
            url: url.to_string(),
            cmp_action: action,
            detected,
            elapsed_ms: started.elapsed().as_millis() as u64,
        }
    }
}

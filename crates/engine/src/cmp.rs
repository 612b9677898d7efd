use cmpilot_core::{CmpConfig, ConsentPolicy, Detector, DomError, LifecycleMethod};
use tracing::debug;

use crate::Runtime;
use crate::action::{HiddenTargets, Interpreter};
use crate::matcher::matches;
use crate::query::Scope;
use crate::trace_step;

/// Runtime side of one vendor: its immutable rules plus the elements its `hide` actions concealed.
#[derive(Debug)]
pub struct Cmp {
    config: CmpConfig,
    hidden: HiddenTargets,
}

impl Cmp {
    pub fn new(config: CmpConfig) -> Self {
        Self {
            config,
            hidden: HiddenTargets::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &CmpConfig {
        &self.config
    }

    pub fn hidden(&self) -> &HiddenTargets {
        &self.hidden
    }

    pub fn has_method(&self, method: LifecycleMethod) -> bool {
        self.config.methods.contains_key(&method)
    }

    /// True when any detector's present matcher matches.
    pub async fn detect(&self, rt: &Runtime<'_>) -> Result<bool, DomError> {
        Ok(self.present_detector(rt).await?.is_some())
    }

    /// Asks the showing matcher of whichever detector is present right now.
    ///
    /// This re-runs detection instead of remembering the detector `detect`
    /// picked, so a page that changed in between can answer for a different variant.
    pub async fn is_showing(&self, rt: &Runtime<'_>) -> Result<bool, DomError> {
        match self.present_detector(rt).await? {
            Some(detector) => matches(rt, &detector.showing, &Scope::root()).await,
            None => Ok(false),
        }
    }

    async fn present_detector(&self, rt: &Runtime<'_>) -> Result<Option<&Detector>, DomError> {
        let scope = Scope::root();
        for detector in &self.config.detectors {
            if matches(rt, &detector.present, &scope).await? {
                return Ok(Some(detector));
            }
        }
        Ok(None)
    }

    /// Runs `method` if this vendor supplies it. A missing method still suspends once.
    pub async fn run_method(
        &self,
        rt: &Runtime<'_>,
        method: LifecycleMethod,
        policy: &ConsentPolicy,
    ) -> Result<(), DomError> {
        let Some(action) = self.config.methods.get(&method) else {
            trace_step!(rt.flags, cmp = self.name(), %method, "method not defined");
            tokio::task::yield_now().await;
            return Ok(());
        };

        trace_step!(rt.flags, cmp = self.name(), %method, "running method");
        Interpreter::new(*rt, &self.hidden)
            .execute(action, &mut Scope::root(), policy)
            .await
    }

    /// Reveals every element hidden so far and forgets them.
    pub async fn unhide_all(&self, rt: &Runtime<'_>) {
        for element in self.hidden.drain() {
            if let Err(e) = rt.doc.set_hidden(element, false).await {
                debug!(cmp = self.name(), element = %element, error = %e, "could not unhide element");
            }
        }
    }
}

//! Detection loop and lifecycle orchestration.
//!
//! The engine is an explicit state machine. Observation of the page is a
//! [`MutationObserver`] held only while the engine is looking for CMPs: it is
//! dropped (disconnected) before a candidate is polled and handled, and
//! reconnected only when a candidate is abandoned, so a CMP is never handled
//! twice by re-entrant notifications.

use cmpilot_core::{
    CmpConfig, ConfigError, ConsentPolicy, DebugFlags, Document, DomError, HandledCmp, LifecycleMethod,
    MutationObserver, RuleCatalog,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::cmp::Cmp;
use crate::config::EngineConfig;
use crate::{Runtime, trace_step};

const PROGRESS_MESSAGE: &str = "Applying your consent choices...";

type HandledCallback = Box<dyn Fn(HandledCmp) + Send + Sync>;

/// Outcome of one [`ConsentEngine::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineReport {
    /// CMPs handled, in the order their callbacks fired.
    pub handled: Vec<String>,
    /// Every CMP that was ever picked as a candidate, in order.
    pub tried: Vec<String>,
}

/// Live view of the CMPs an engine has picked as candidates, in the order
/// they were tried. Clones share the same list.
#[derive(Debug, Clone, Default)]
pub struct TriedCmps(Arc<Mutex<Vec<String>>>);

impl TriedCmps {
    pub fn snapshot(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.lock().iter().any(|tried| tried == name)
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }

    fn push(&self, name: String) {
        self.0.lock().push(name);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EngineState {
    /// One pass over every untried CMP's present matchers.
    Detecting,
    /// Connected, waiting for the next batch of mutations.
    Observing,
    /// Disconnected, polling the candidate's showing matcher.
    Polling(usize),
    /// The candidate never showed; reconnect and look again.
    Abandoned(usize),
    Handling(usize),
    Handled(usize),
    Finished,
}

pub struct ConsentEngine {
    doc: Arc<dyn Document>,
    cmps: Vec<Cmp>,
    policy: ConsentPolicy,
    flags: DebugFlags,
    config: EngineConfig,
    tried: TriedCmps,
    on_handled: Option<HandledCallback>,
}

impl ConsentEngine {
    /// Builds every vendor in `catalog`. A vendor whose rules fail to build is
    /// logged and left out; the rest are kept in declaration order.
    pub fn new(doc: Arc<dyn Document>, catalog: &RuleCatalog, policy: ConsentPolicy, flags: DebugFlags) -> Self {
        let configs = catalog
            .build()
            .into_iter()
            .filter_map(|(name, result)| match result {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!(cmp = %name, error = %e, "skipping vendor with invalid rules");
                    None
                }
            })
            .collect();
        Self::from_configs(doc, configs, policy, flags)
    }

    /// Like [`ConsentEngine::new`] but fails on the first vendor that does not build.
    pub fn try_new(
        doc: Arc<dyn Document>,
        catalog: &RuleCatalog,
        policy: ConsentPolicy,
        flags: DebugFlags,
    ) -> Result<Self, ConfigError> {
        let configs = catalog
            .build()
            .into_iter()
            .map(|(_, result)| result)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_configs(doc, configs, policy, flags))
    }

    pub fn from_configs(
        doc: Arc<dyn Document>,
        configs: Vec<CmpConfig>,
        policy: ConsentPolicy,
        flags: DebugFlags,
    ) -> Self {
        Self {
            doc,
            cmps: configs.into_iter().map(Cmp::new).collect(),
            policy,
            flags,
            config: EngineConfig::default(),
            tried: TriedCmps::default(),
            on_handled: None,
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Called once per handled CMP with `{cmpName}`.
    pub fn on_handled<F>(mut self, callback: F) -> Self
    where
        F: Fn(HandledCmp) + Send + Sync + 'static,
    {
        self.on_handled = Some(Box::new(callback));
        self
    }

    pub fn cmp_names(&self) -> Vec<&str> {
        self.cmps.iter().map(Cmp::name).collect()
    }

    /// Handle on the tried set that stays valid while [`ConsentEngine::run`] owns the engine.
    pub fn tried(&self) -> TriedCmps {
        self.tried.clone()
    }

    /// Runs until a CMP is handled (or, with `keep_observing`, until the
    /// document stops delivering mutations).
    ///
    /// Only failing to subscribe to mutations is an error. Detection failures
    /// count as "not present" and handling failures are logged and swallowed.
    pub async fn run(self) -> Result<EngineReport, DomError> {
        let ConsentEngine {
            doc,
            cmps,
            policy,
            flags,
            config,
            tried,
            on_handled,
        } = self;
        let rt = Runtime::new(doc.as_ref(), flags, &config);
        let mut handled = Vec::new();

        let mut observer: Option<MutationObserver> = Some(doc.observe().await?);
        let mut state = EngineState::Detecting;

        loop {
            trace_step!(flags, ?state, "engine state");
            state = match state {
                EngineState::Detecting => match next_candidate(&rt, &cmps, &tried).await {
                    Some(index) => {
                        observer = None;
                        tried.push(cmps[index].name().to_string());
                        EngineState::Polling(index)
                    }
                    None => EngineState::Observing,
                },

                EngineState::Observing => match observer.as_mut() {
                    Some(subscription) => match subscription.next().await {
                        Some(batch) => {
                            let records = batch.records + subscription.drain();
                            trace_step!(flags, records, "mutations observed");
                            EngineState::Detecting
                        }
                        None => EngineState::Finished,
                    },
                    None => EngineState::Finished,
                },

                EngineState::Polling(index) => {
                    if poll_showing(&rt, &cmps[index]).await {
                        EngineState::Handling(index)
                    } else {
                        EngineState::Abandoned(index)
                    }
                }

                EngineState::Abandoned(index) => {
                    info!(cmp = cmps[index].name(), "CMP never showed, giving up on it");
                    observer = Some(doc.observe().await?);
                    EngineState::Detecting
                }

                EngineState::Handling(index) => {
                    tokio::task::yield_now().await;
                    let cmp = &cmps[index];
                    let acted = handle(&rt, cmp, &policy).await;
                    if let Some(callback) = &on_handled {
                        callback(HandledCmp {
                            cmp_name: cmp.name().to_string(),
                        });
                    }
                    if acted {
                        clean_up(&rt, cmp).await;
                    }
                    handled.push(cmp.name().to_string());
                    EngineState::Handled(index)
                }

                EngineState::Handled(index) => {
                    trace_step!(flags, cmp = cmps[index].name(), "CMP handled");
                    if config.keep_observing {
                        observer = Some(doc.observe().await?);
                        EngineState::Detecting
                    } else {
                        EngineState::Finished
                    }
                }

                EngineState::Finished => break,
            };
        }

        Ok(EngineReport {
            handled,
            tried: tried.snapshot(),
        })
    }
}

/// First untried CMP that is present, by declaration order.
async fn next_candidate(rt: &Runtime<'_>, cmps: &[Cmp], tried: &TriedCmps) -> Option<usize> {
    let mut candidates = Vec::new();
    for (index, cmp) in cmps.iter().enumerate() {
        if tried.contains(cmp.name()) {
            continue;
        }
        match cmp.detect(rt).await {
            Ok(true) => candidates.push(index),
            Ok(false) => {}
            Err(e) => warn!(cmp = cmp.name(), error = %e, "detection failed, treating CMP as absent"),
        }
    }

    if candidates.len() > 1 {
        let names: Vec<&str> = candidates.iter().map(|&index| cmps[index].name()).collect();
        warn!(candidates = ?names, "more than one CMP detected, handling the first");
    }
    if let Some(&index) = candidates.first() {
        trace_step!(rt.flags, cmp = cmps[index].name(), "CMP detected");
    }
    candidates.first().copied()
}

async fn poll_showing(rt: &Runtime<'_>, cmp: &Cmp) -> bool {
    for attempt in 1..=rt.config.poll_attempts {
        match cmp.is_showing(rt).await {
            Ok(true) => {
                trace_step!(rt.flags, cmp = cmp.name(), attempt, "CMP is showing");
                return true;
            }
            Ok(false) => {}
            Err(e) => warn!(cmp = cmp.name(), attempt, error = %e, "showing check failed"),
        }
        if attempt < rt.config.poll_attempts {
            sleep(rt.config.poll_interval).await;
        }
    }
    false
}

/// Best-effort lifecycle run. Never fails. Returns whether anything was done
/// to the page, which is when [`clean_up`] has to follow.
async fn handle(rt: &Runtime<'_>, cmp: &Cmp, policy: &ConsentPolicy) -> bool {
    if rt.flags.skip_actions {
        trace_step!(rt.flags, cmp = cmp.name(), "skipping actions");
        return false;
    }

    if let Err(e) = rt.doc.show_progress(PROGRESS_MESSAGE).await {
        warn!(cmp = cmp.name(), error = %e, "could not show progress indicator");
    }
    if let Err(e) = run_lifecycle(rt, cmp, policy).await {
        warn!(cmp = cmp.name(), error = %e, "handling failed, continuing with cleanup");
    }
    true
}

async fn clean_up(rt: &Runtime<'_>, cmp: &Cmp) {
    cmp.unhide_all(rt).await;
    if let Err(e) = rt.doc.hide_progress().await {
        warn!(cmp = cmp.name(), error = %e, "could not remove progress indicator");
    }
}

async fn run_lifecycle(rt: &Runtime<'_>, cmp: &Cmp, policy: &ConsentPolicy) -> Result<(), DomError> {
    if !rt.flags.skip_hide_method {
        cmp.run_method(rt, LifecycleMethod::HideCmp, policy).await?;
    }
    cmp.run_method(rt, LifecycleMethod::OpenOptions, policy).await?;
    if !rt.flags.skip_hide_method {
        cmp.run_method(rt, LifecycleMethod::HideCmp, policy).await?;
    }
    cmp.run_method(rt, LifecycleMethod::DoConsent, policy).await?;
    if !rt.flags.skip_submit {
        cmp.run_method(rt, LifecycleMethod::SaveConsent, policy).await?;
    }
    Ok(())
}

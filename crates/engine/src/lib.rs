//! Rule interpreter: resolves queries, runs action trees and drives the
//! detection loop that hands each detected CMP its lifecycle methods.

use cmpilot_core::{DebugFlags, Document};

pub mod action;
pub mod cmp;
pub mod config;
pub mod consent;
pub mod engine;
pub mod matcher;
pub mod query;

pub use action::{HiddenTargets, Interpreter, WaitOutcome};
pub use cmp::Cmp;
pub use config::EngineConfig;
pub use engine::{ConsentEngine, EngineReport, TriedCmps};
pub use query::{QueryEngine, QueryResult, Scope, ScopeGuard};

/// Logs at `info` when `debugLog` is set, at `debug` otherwise.
#[macro_export]
macro_rules! trace_step {
    ($flags:expr, $($arg:tt)+) => {
        if $flags.debug_log {
            ::tracing::info!($($arg)+);
        } else {
            ::tracing::debug!($($arg)+);
        }
    };
}

/// What every interpreter component needs to reach the page.
#[derive(Clone, Copy)]
pub struct Runtime<'a> {
    pub doc: &'a dyn Document,
    pub flags: DebugFlags,
    pub config: &'a EngineConfig,
}

impl<'a> Runtime<'a> {
    pub fn new(doc: &'a dyn Document, flags: DebugFlags, config: &'a EngineConfig) -> Self {
        Self { doc, flags, config }
    }

    pub fn query(&self) -> QueryEngine<'a> {
        QueryEngine::new(self.doc)
    }
}

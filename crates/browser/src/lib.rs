//! Live Chromium binding for the consent engine.
//!
//! [`ChromiumDocument`] exposes a `chromiumoxide` page through the
//! [`cmpilot_core::Document`] seam, [`ChromiumWorker`] launches a browser and
//! visits one URL, and [`CmpFinder`] drives the engine against any document.

pub mod shared;
pub mod worker;

pub use shared::{BrowserError, TimeoutConfig};
pub use worker::chromium::{ChromiumDocument, ChromiumWorker, CmpFinder, VisitJob, VisitResult};

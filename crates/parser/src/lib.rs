//! Static-snapshot [`Document`](cmpilot_core::Document) backed by `scraper`.
//!
//! Used as the test fixture for the interpreter and for offline detection
//! audits of fetched pages, where no browser is available.

mod document;
mod error;
mod style;

pub use document::{DocumentEvent, HtmlDocument};
pub use error::SnapshotError;

use chromiumoxide::error::CdpError;
use cmpilot_core::{DomError, ElementHandle};
use thiserror::Error;

/// Prefix of the message the page runtime throws for a detached or unknown handle.
pub(crate) const STALE_MARKER: &str = "cmpilot:stale:";

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("browser launch failed: {0}")]
    Launch(String),

    #[error("could not prepare profile directory: {0}")]
    Profile(#[from] std::io::Error),

    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("navigation to {url} timed out")]
    NavigationTimeout { url: String },

    #[error("page runtime unavailable: {0}")]
    Runtime(#[from] DomError),
}

/// Classifies a CDP failure of the document operation `op`.
pub fn to_dom_error(e: CdpError, op: &str) -> DomError {
    match e {
        CdpError::JavascriptException(details) => {
            let message = details
                .exception
                .as_ref()
                .and_then(|object| object.description.clone())
                .unwrap_or_else(|| details.text.clone());
            match stale_handle(&message) {
                Some(handle) => DomError::StaleElement(handle),
                None => DomError::Script(format!("{}: {}", op, first_line(&message))),
            }
        }
        CdpError::Timeout => DomError::Protocol(format!("{} timed out", op)),
        CdpError::ChannelSendError(_) | CdpError::NoResponse => DomError::Closed,
        other => {
            let s = other.to_string();
            if s.contains("Target closed") || s.contains("Session closed") {
                DomError::Closed
            } else if s.contains("Cannot find context") || s.contains("Execution context was destroyed") {
                DomError::Protocol(format!("{}: page navigated away", op))
            } else {
                DomError::Protocol(format!("{} failed: {}", op, s))
            }
        }
    }
}

fn stale_handle(message: &str) -> Option<ElementHandle> {
    let (_, rest) = message.split_once(STALE_MARKER)?;
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok().map(ElementHandle::new)
}

fn first_line(message: &str) -> &str {
    message.lines().next().unwrap_or(message)
}

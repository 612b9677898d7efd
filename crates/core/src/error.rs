use thiserror::Error;

use crate::dom::ElementHandle;

/// Raised while turning catalog JSON into rule trees.
///
/// The factory never swallows these; the engine decides per vendor whether
/// to skip the entry.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown action type `{tag}`")]
    UnknownAction { tag: String },

    #[error("unknown matcher type `{tag}`")]
    UnknownMatcher { tag: String },

    #[error("`{node}` node is missing required field `{field}`")]
    MissingField { node: &'static str, field: &'static str },

    #[error("invalid `{node}` node: {source}")]
    InvalidNode {
        node: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("consent `{category}` has neither matcher+toggleAction nor trueAction/falseAction")]
    InvalidConsent { category: String },

    #[error("malformed catalog: {0}")]
    Catalog(#[from] serde_json::Error),
}

impl ConfigError {
    pub fn invalid(node: &'static str, source: serde_json::Error) -> Self {
        Self::InvalidNode { node, source }
    }
}

/// Failure of a single document operation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DomError {
    #[error("invalid selector `{selector}`: {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("element {0} is no longer attached to the document")]
    StaleElement(ElementHandle),

    #[error("script failed: {0}")]
    Script(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("document is closed")]
    Closed,
}

impl DomError {
    pub fn invalid_selector(selector: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidSelector {
            selector: selector.into(),
            reason: reason.to_string(),
        }
    }
}

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub mod dom;
pub mod error;
pub mod query;
pub mod rules;

pub use dom::{Document, ElementHandle, MutationBatch, MutationObserver, Point, PointerPhase, Rect};
pub use error::{ConfigError, DomError};
pub use query::{QuerySpec, StyleFilter, TextFilter};
pub use rules::{
    Action, Axis, ClickAction, CmpConfig, Consent, ConsentBinding, Detector, ForEachAction, IfCssAction,
    LifecycleMethod, Matcher, RuleCatalog, SlideAction, WaitCssAction,
};

/// Data-processing purposes a consent dialog can ask about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    /// Information storage and access
    D,
    /// Preferences and functionality
    A,
    /// Performance and analytics
    B,
    /// Content selection, delivery and reporting
    E,
    /// Ad selection, delivery and reporting
    F,
    /// Other purposes
    X,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::D,
        Category::A,
        Category::B,
        Category::E,
        Category::F,
        Category::X,
    ];

    pub fn code(self) -> &'static str {
        match self {
            Category::D => "D",
            Category::A => "A",
            Category::B => "B",
            Category::E => "E",
            Category::F => "F",
            Category::X => "X",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Category::D => "Information storage and access",
            Category::A => "Preferences and functionality",
            Category::B => "Performance and analytics",
            Category::E => "Content selection, delivery and reporting",
            Category::F => "Ad selection, delivery and reporting",
            Category::X => "Other purposes",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|category| category.code() == s)
            .ok_or_else(|| format!("unknown consent category `{}`", s))
    }
}

/// Requested state per category. Categories that are not listed are denied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConsentPolicy(BTreeMap<Category, bool>);

impl ConsentPolicy {
    pub fn reject_all() -> Self {
        Self(Category::ALL.into_iter().map(|c| (c, false)).collect())
    }

    pub fn accept_all() -> Self {
        Self(Category::ALL.into_iter().map(|c| (c, true)).collect())
    }

    pub fn with(mut self, category: Category, allowed: bool) -> Self {
        self.0.insert(category, allowed);
        self
    }

    pub fn set(&mut self, category: Category, allowed: bool) {
        self.0.insert(category, allowed);
    }

    pub fn allows(&self, category: Category) -> bool {
        self.0.get(&category).copied().unwrap_or(false)
    }
}

/// What the crawler asks the engine to do with a detected CMP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CmpAction {
    /// Detect only, never interact.
    #[default]
    NoAction,
    AcceptAll,
    RejectAll,
}

impl CmpAction {
    pub fn policy(self) -> ConsentPolicy {
        match self {
            CmpAction::AcceptAll => ConsentPolicy::accept_all(),
            CmpAction::NoAction | CmpAction::RejectAll => ConsentPolicy::reject_all(),
        }
    }

    pub fn debug_flags(self, base: DebugFlags) -> DebugFlags {
        DebugFlags {
            skip_actions: base.skip_actions || self == CmpAction::NoAction,
            ..base
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DebugFlags {
    /// Human-like pacing: scroll targets into view and pause after clicks.
    pub click_delay: bool,
    /// Do everything except the final save.
    pub skip_submit: bool,
    /// Detect only.
    pub skip_actions: bool,
    /// Outline matcher targets green/red after consents are applied.
    pub paint_matchers: bool,
    pub debug_clicks: bool,
    pub debug_log: bool,
    /// Never run `HIDE_CMP`.
    pub skip_hide_method: bool,
}

/// Payload of the handled notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandledCmp {
    pub cmp_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_categories_are_denied() {
        let policy = ConsentPolicy::default().with(Category::B, true);
        assert!(policy.allows(Category::B));
        assert!(!policy.allows(Category::F));
    }

    #[test]
    fn test_policy_round_trips_as_plain_map() {
        let policy: ConsentPolicy = serde_json::from_value(json!({ "A": true, "F": false })).unwrap();
        assert!(policy.allows(Category::A));
        assert_eq!(serde_json::to_value(&policy).unwrap(), json!({ "A": true, "F": false }));
    }

    #[test]
    fn test_no_action_forces_skip_actions() {
        let flags = CmpAction::NoAction.debug_flags(DebugFlags::default());
        assert!(flags.skip_actions);
        assert!(!CmpAction::AcceptAll.debug_flags(DebugFlags::default()).skip_actions);
        assert!(CmpAction::AcceptAll.policy().allows(Category::X));
        assert!(!CmpAction::RejectAll.policy().allows(Category::D));
    }

    #[test]
    fn test_debug_flags_use_camel_case_keys() {
        let flags: DebugFlags = serde_json::from_value(json!({
            "clickDelay": true,
            "skipHideMethod": true
        }))
        .unwrap();
        assert!(flags.click_delay && flags.skip_hide_method);
        assert!(!flags.paint_matchers);
    }

    #[test]
    fn test_handled_payload_shape() {
        let handled = HandledCmp { cmp_name: "cookiebot".into() };
        assert_eq!(serde_json::to_value(handled).unwrap(), json!({ "cmpName": "cookiebot" }));
    }
}

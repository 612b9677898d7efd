//! Rule trees built from the vendor catalog.
//!
//! Every node in the catalog is a JSON object tagged by `type`. Construction
//! goes through a tag -> constructor table; an unknown tag is a
//! [`ConfigError`] and is returned to the caller untouched.

use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::Category;
use crate::error::ConfigError;
use crate::query::QuerySpec;

pub const DEFAULT_WAIT_RETRIES: u32 = 10;
pub const DEFAULT_WAIT_TIME: Duration = Duration::from_millis(250);

/// Boolean predicate over one resolved query. Evaluated on demand, never cached.
#[derive(Debug, Clone, PartialEq)]
pub enum Matcher {
    /// Matches when the target resolves to an element.
    Css(QuerySpec),
    /// Matches when the target resolves and is checked.
    Checkbox(QuerySpec),
}

type MatcherBuilder = fn(QuerySpec) -> Matcher;

const MATCHER_FACTORY: &[(&str, MatcherBuilder)] =
    &[("css", Matcher::Css), ("checkbox", Matcher::Checkbox)];

impl Matcher {
    pub fn from_config(node: &Value) -> Result<Self, ConfigError> {
        let tag = node_type(node, "matcher")?;
        let build = MATCHER_FACTORY
            .iter()
            .find(|(name, _)| *name == tag)
            .map(|(_, build)| *build)
            .ok_or_else(|| ConfigError::UnknownMatcher { tag: tag.to_string() })?;
        Ok(build(target(node, "matcher")?))
    }

    pub fn target(&self) -> &QuerySpec {
        match self {
            Matcher::Css(target) | Matcher::Checkbox(target) => target,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Matcher::Css(_) => "css",
            Matcher::Checkbox(_) => "checkbox",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClickAction {
    pub target: QuerySpec,
    pub open_in_tab: bool,
    /// Explicit post-click wait; falls back to the engine's click delay.
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfCssAction {
    pub target: QuerySpec,
    pub on_true: Option<Box<Action>>,
    pub on_false: Option<Box<Action>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WaitCssAction {
    pub target: QuerySpec,
    pub negated: bool,
    pub retries: u32,
    pub wait_time: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForEachAction {
    pub target: QuerySpec,
    pub action: Box<Action>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SlideAction {
    pub target: QuerySpec,
    pub drag_target: QuerySpec,
    pub axis: Option<Axis>,
}

/// Executable step of a lifecycle method. Trees are immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Click(ClickAction),
    List(Vec<Action>),
    Consent(Vec<Consent>),
    IfCss(IfCssAction),
    WaitCss(WaitCssAction),
    ForEach(ForEachAction),
    Hide(QuerySpec),
    Slide(SlideAction),
    Close,
    Wait(Duration),
}

type ActionBuilder = fn(&Value) -> Result<Action, ConfigError>;

const ACTION_FACTORY: &[(&str, ActionBuilder)] = &[
    ("click", build_click),
    ("list", build_list),
    ("consent", build_consent),
    ("ifcss", build_ifcss),
    ("waitcss", build_waitcss),
    ("foreach", build_foreach),
    ("hide", build_hide),
    ("slide", build_slide),
    ("close", build_close),
    ("wait", build_wait),
];

impl Action {
    pub fn from_config(node: &Value) -> Result<Self, ConfigError> {
        let tag = node_type(node, "action")?;
        let build = ACTION_FACTORY
            .iter()
            .find(|(name, _)| *name == tag)
            .map(|(_, build)| *build)
            .ok_or_else(|| ConfigError::UnknownAction { tag: tag.to_string() })?;
        build(node)
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Action::Click(_) => "click",
            Action::List(_) => "list",
            Action::Consent(_) => "consent",
            Action::IfCss(_) => "ifcss",
            Action::WaitCss(_) => "waitcss",
            Action::ForEach(_) => "foreach",
            Action::Hide(_) => "hide",
            Action::Slide(_) => "slide",
            Action::Close => "close",
            Action::Wait(_) => "wait",
        }
    }

    pub fn click(target: QuerySpec) -> Self {
        Action::Click(ClickAction {
            target,
            open_in_tab: false,
            timeout: None,
        })
    }
}

fn build_click(node: &Value) -> Result<Action, ConfigError> {
    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Fields {
        #[serde(default)]
        open_in_tab: bool,
        timeout: Option<u64>,
    }

    let fields: Fields = fields(node, "click")?;
    Ok(Action::Click(ClickAction {
        target: target(node, "click")?,
        open_in_tab: fields.open_in_tab,
        timeout: fields.timeout.map(Duration::from_millis),
    }))
}

fn build_list(node: &Value) -> Result<Action, ConfigError> {
    let actions = array(node, "list", "actions")?
        .iter()
        .map(Action::from_config)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Action::List(actions))
}

fn build_consent(node: &Value) -> Result<Action, ConfigError> {
    let consents = array(node, "consent", "consents")?
        .iter()
        .map(Consent::from_config)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Action::Consent(consents))
}

fn build_ifcss(node: &Value) -> Result<Action, ConfigError> {
    Ok(Action::IfCss(IfCssAction {
        target: target(node, "ifcss")?,
        on_true: nested(node, "trueAction")?,
        on_false: nested(node, "falseAction")?,
    }))
}

fn build_waitcss(node: &Value) -> Result<Action, ConfigError> {
    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Fields {
        #[serde(default)]
        negated: bool,
        retries: Option<u32>,
        wait_time: Option<u64>,
    }

    let fields: Fields = fields(node, "waitcss")?;
    Ok(Action::WaitCss(WaitCssAction {
        target: target(node, "waitcss")?,
        negated: fields.negated,
        retries: fields.retries.unwrap_or(DEFAULT_WAIT_RETRIES),
        wait_time: fields
            .wait_time
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_WAIT_TIME),
    }))
}

fn build_foreach(node: &Value) -> Result<Action, ConfigError> {
    let action = nested(node, "action")?.ok_or(ConfigError::MissingField {
        node: "foreach",
        field: "action",
    })?;
    Ok(Action::ForEach(ForEachAction {
        target: target(node, "foreach")?,
        action,
    }))
}

fn build_hide(node: &Value) -> Result<Action, ConfigError> {
    Ok(Action::Hide(target(node, "hide")?))
}

fn build_slide(node: &Value) -> Result<Action, ConfigError> {
    let drag_target = node.get("dragTarget").ok_or(ConfigError::MissingField {
        node: "slide",
        field: "dragTarget",
    })?;
    let drag_target: QuerySpec =
        serde_json::from_value(drag_target.clone()).map_err(|e| ConfigError::invalid("slide", e))?;

    let axis = match node.get("axis").and_then(Value::as_str) {
        Some(axis) if axis.eq_ignore_ascii_case("x") => Some(Axis::X),
        Some(axis) if axis.eq_ignore_ascii_case("y") => Some(Axis::Y),
        _ => None,
    };

    Ok(Action::Slide(SlideAction {
        target: target(node, "slide")?,
        drag_target,
        axis,
    }))
}

fn build_close(_node: &Value) -> Result<Action, ConfigError> {
    Ok(Action::Close)
}

fn build_wait(node: &Value) -> Result<Action, ConfigError> {
    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Fields {
        wait_time: Option<u64>,
    }

    let fields: Fields = fields(node, "wait")?;
    Ok(Action::Wait(
        fields
            .wait_time
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_WAIT_TIME),
    ))
}

/// How a consent category is switched on or off.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsentBinding {
    /// Read the state through `matcher`, run `toggle` only when it differs.
    Toggle { matcher: Matcher, toggle: Box<Action> },
    /// Run the branch for the requested state, whatever the page shows.
    Branch {
        on_true: Option<Box<Action>>,
        on_false: Option<Box<Action>>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Consent {
    pub category: Category,
    pub description: Option<String>,
    pub binding: ConsentBinding,
}

impl Consent {
    pub fn from_config(node: &Value) -> Result<Self, ConfigError> {
        let code = node_type(node, "consent")?;
        let category = Category::from_str(code).map_err(|_| ConfigError::InvalidConsent {
            category: code.to_string(),
        })?;

        let matcher = match node.get("matcher") {
            Some(Value::Null) | None => None,
            Some(matcher) => Some(Matcher::from_config(matcher)?),
        };
        let toggle = nested(node, "toggleAction")?;
        let on_true = nested(node, "trueAction")?;
        let on_false = nested(node, "falseAction")?;

        let binding = match (matcher, toggle) {
            (Some(matcher), Some(toggle)) => ConsentBinding::Toggle { matcher, toggle },
            _ if on_true.is_some() || on_false.is_some() => ConsentBinding::Branch { on_true, on_false },
            _ => {
                return Err(ConfigError::InvalidConsent {
                    category: category.to_string(),
                });
            }
        };

        Ok(Self {
            category,
            description: node
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_string),
            binding,
        })
    }

    pub fn toggle(category: Category, matcher: Matcher, toggle: Action) -> Self {
        Self {
            category,
            description: None,
            binding: ConsentBinding::Toggle {
                matcher,
                toggle: Box::new(toggle),
            },
        }
    }

    pub fn branch(category: Category, on_true: Option<Action>, on_false: Option<Action>) -> Self {
        Self {
            category,
            description: None,
            binding: ConsentBinding::Branch {
                on_true: on_true.map(Box::new),
                on_false: on_false.map(Box::new),
            },
        }
    }

    pub fn matcher(&self) -> Option<&Matcher> {
        match &self.binding {
            ConsentBinding::Toggle { matcher, .. } => Some(matcher),
            ConsentBinding::Branch { .. } => None,
        }
    }
}

/// Identifies one variant of a CMP: is its markup present, and is it on screen.
#[derive(Debug, Clone, PartialEq)]
pub struct Detector {
    pub present: Matcher,
    pub showing: Matcher,
}

impl Detector {
    pub fn from_config(node: &Value) -> Result<Self, ConfigError> {
        let matcher = |field: &'static str| {
            node.get(field)
                .ok_or(ConfigError::MissingField {
                    node: "detector",
                    field,
                })
                .and_then(Matcher::from_config)
        };
        Ok(Self {
            present: matcher("presentMatcher")?,
            showing: matcher("showingMatcher")?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LifecycleMethod {
    HideCmp,
    OpenOptions,
    DoConsent,
    SaveConsent,
}

impl LifecycleMethod {
    pub const ALL: [LifecycleMethod; 4] = [
        LifecycleMethod::HideCmp,
        LifecycleMethod::OpenOptions,
        LifecycleMethod::DoConsent,
        LifecycleMethod::SaveConsent,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleMethod::HideCmp => "HIDE_CMP",
            LifecycleMethod::OpenOptions => "OPEN_OPTIONS",
            LifecycleMethod::DoConsent => "DO_CONSENT",
            LifecycleMethod::SaveConsent => "SAVE_CONSENT",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|method| method.as_str() == name)
    }
}

impl fmt::Display for LifecycleMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One vendor's rules: its detectors and whichever lifecycle methods it supplies.
#[derive(Debug, Clone, PartialEq)]
pub struct CmpConfig {
    pub name: String,
    pub detectors: Vec<Detector>,
    pub methods: BTreeMap<LifecycleMethod, Action>,
}

impl CmpConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            detectors: Vec::new(),
            methods: BTreeMap::new(),
        }
    }

    pub fn with_detector(mut self, present: Matcher, showing: Matcher) -> Self {
        self.detectors.push(Detector { present, showing });
        self
    }

    pub fn with_method(mut self, method: LifecycleMethod, action: Action) -> Self {
        self.methods.insert(method, action);
        self
    }

    pub fn from_config(name: &str, node: &Value) -> Result<Self, ConfigError> {
        let detectors = array(node, "cmp", "detectors")?
            .iter()
            .map(Detector::from_config)
            .collect::<Result<Vec<_>, _>>()?;

        let mut methods = BTreeMap::new();
        let entries = match node.get("methods") {
            Some(Value::Array(entries)) => entries.as_slice(),
            Some(Value::Null) | None => &[],
            Some(_) => {
                return Err(ConfigError::MissingField {
                    node: "cmp",
                    field: "methods",
                });
            }
        };
        for entry in entries {
            let method_name = entry.get("name").and_then(Value::as_str).ok_or(ConfigError::MissingField {
                node: "method",
                field: "name",
            })?;
            let Some(method) = LifecycleMethod::from_name(method_name) else {
                warn!(cmp = name, method = method_name, "ignoring unknown lifecycle method");
                continue;
            };
            match entry.get("action") {
                Some(Value::Null) | None => {}
                Some(action) => {
                    methods.insert(method, Action::from_config(action)?);
                }
            }
        }

        Ok(Self {
            name: name.to_string(),
            detectors,
            methods,
        })
    }
}

/// Vendor entries in declaration order, still unparsed.
///
/// Entries are turned into [`CmpConfig`]s one at a time so a single malformed
/// vendor does not take the others down with it.
#[derive(Debug, Clone, Default)]
pub struct RuleCatalog {
    entries: Vec<(String, Value)>,
}

impl RuleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let root: Map<String, Value> = serde_json::from_str(json)?;
        Ok(Self {
            entries: root.into_iter().collect(),
        })
    }

    pub fn from_value(value: Value) -> Result<Self, ConfigError> {
        let root: Map<String, Value> = serde_json::from_value(value)?;
        Ok(Self {
            entries: root.into_iter().collect(),
        })
    }

    pub fn push(&mut self, name: impl Into<String>, node: Value) {
        self.entries.push((name.into(), node));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(name, node)| (name.as_str(), node))
    }

    /// Builds every vendor, pairing each with its own outcome.
    pub fn build(&self) -> Vec<(String, Result<CmpConfig, ConfigError>)> {
        self.entries()
            .map(|(name, node)| (name.to_string(), CmpConfig::from_config(name, node)))
            .collect()
    }
}

fn node_type<'a>(node: &'a Value, kind: &'static str) -> Result<&'a str, ConfigError> {
    node.get("type")
        .and_then(Value::as_str)
        .ok_or(ConfigError::MissingField { node: kind, field: "type" })
}

/// Reads `target`, folding a sibling `parent` into it when the target has none.
fn target(node: &Value, kind: &'static str) -> Result<QuerySpec, ConfigError> {
    let raw = node.get("target").ok_or(ConfigError::MissingField {
        node: kind,
        field: "target",
    })?;
    let mut spec: QuerySpec = serde_json::from_value(raw.clone()).map_err(|e| ConfigError::invalid(kind, e))?;

    if spec.parent.is_none() {
        if let Some(parent) = node.get("parent").filter(|p| !p.is_null()) {
            let parent: QuerySpec =
                serde_json::from_value(parent.clone()).map_err(|e| ConfigError::invalid(kind, e))?;
            spec.parent = Some(Box::new(parent));
        }
    }
    Ok(spec)
}

fn nested(node: &Value, key: &str) -> Result<Option<Box<Action>>, ConfigError> {
    match node.get(key) {
        Some(Value::Null) | None => Ok(None),
        Some(action) => Ok(Some(Box::new(Action::from_config(action)?))),
    }
}

fn array<'a>(node: &'a Value, kind: &'static str, field: &'static str) -> Result<&'a [Value], ConfigError> {
    node.get(field)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .ok_or(ConfigError::MissingField { node: kind, field })
}

fn fields<T: for<'de> Deserialize<'de>>(node: &Value, kind: &'static str) -> Result<T, ConfigError> {
    serde_json::from_value(node.clone()).map_err(|e| ConfigError::invalid(kind, e))
}

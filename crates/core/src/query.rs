use serde::{Deserialize, Deserializer, Serialize};

/// Declarative element location: a selector narrowed by filters, optionally
/// resolved inside the matches of a parent spec.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuerySpec {
    pub selector: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_filter: Option<TextFilter>,
    #[serde(
        default,
        alias = "styleFilter",
        deserialize_with = "one_or_many",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub style_filters: Vec<StyleFilter>,
    /// `true` keeps rendered elements (non-zero height), `false` keeps unrendered ones.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_filter: Option<bool>,
    /// `true` keeps elements inside a nested browsing context, `false` outside.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iframe_filter: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_filter: Option<Box<QuerySpec>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<Box<QuerySpec>>,
}

impl QuerySpec {
    pub fn new(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            ..Default::default()
        }
    }

    pub fn with_text(mut self, filter: impl Into<TextFilter>) -> Self {
        self.text_filter = Some(filter.into());
        self
    }

    pub fn with_style(mut self, filter: StyleFilter) -> Self {
        self.style_filters.push(filter);
        self
    }

    pub fn displayed(mut self, displayed: bool) -> Self {
        self.display_filter = Some(displayed);
        self
    }

    pub fn in_iframe(mut self, nested: bool) -> Self {
        self.iframe_filter = Some(nested);
        self
    }

    pub fn with_child(mut self, child: QuerySpec) -> Self {
        self.child_filter = Some(Box::new(child));
        self
    }

    pub fn within(mut self, parent: QuerySpec) -> Self {
        self.parent = Some(Box::new(parent));
        self
    }
}

/// Case-insensitive substring filter; a list matches if any entry does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TextFilter {
    One(String),
    Any(Vec<String>),
}

impl TextFilter {
    pub fn matches(&self, text: &str) -> bool {
        let haystack = text.to_lowercase();
        match self {
            TextFilter::One(needle) => haystack.contains(&needle.to_lowercase()),
            TextFilter::Any(needles) => needles
                .iter()
                .any(|needle| haystack.contains(&needle.to_lowercase())),
        }
    }
}

impl From<&str> for TextFilter {
    fn from(value: &str) -> Self {
        TextFilter::One(value.to_string())
    }
}

impl From<Vec<&str>> for TextFilter {
    fn from(values: Vec<&str>) -> Self {
        TextFilter::Any(values.into_iter().map(str::to_string).collect())
    }
}

/// Computed-style comparison: `option` must equal `value` (or differ, when negated).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StyleFilter {
    pub option: String,
    pub value: String,
    #[serde(default)]
    pub negated: bool,
}

impl StyleFilter {
    pub fn equals(option: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            option: option.into(),
            value: value.into(),
            negated: false,
        }
    }

    pub fn not_equals(option: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            negated: true,
            ..Self::equals(option, value)
        }
    }

    pub fn accepts(&self, actual: &str) -> bool {
        (actual == self.value) != self.negated
    }
}

fn one_or_many<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany<T> {
        One(T),
        Many(Vec<T>),
    }

    Ok(match Option::<OneOrMany<T>>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(item)) => vec![item],
        Some(OneOrMany::Many(items)) => items,
    })
}

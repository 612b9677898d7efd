use cmpilot_core::{DomError, Matcher};

use crate::Runtime;
use crate::query::Scope;

/// Evaluates `matcher` against the current page. Nothing is cached.
pub async fn matches(rt: &Runtime<'_>, matcher: &Matcher, scope: &Scope) -> Result<bool, DomError> {
    let result = rt.query().find(matcher.target(), scope).await?;
    match (matcher, result.target) {
        (_, None) => Ok(false),
        (Matcher::Css(_), Some(_)) => Ok(true),
        (Matcher::Checkbox(_), Some(target)) => rt.doc.is_checked(target).await,
    }
}

/// Outlines the matcher's target as passed when its state equals `expected`, failed otherwise.
pub async fn debug_matcher(
    rt: &Runtime<'_>,
    matcher: &Matcher,
    scope: &Scope,
    expected: bool,
) -> Result<(), DomError> {
    let Some(target) = rt.query().find(matcher.target(), scope).await?.target else {
        return Ok(());
    };
    let actual = match matcher {
        Matcher::Css(_) => true,
        Matcher::Checkbox(_) => rt.doc.is_checked(target).await?,
    };
    rt.doc.paint(target, actual == expected).await
}

use cmpilot_core::{Consent, ConsentBinding, ConsentPolicy, DomError};

use crate::action::Interpreter;
use crate::matcher::{debug_matcher, matches};
use crate::query::Scope;
use crate::trace_step;

/// Drives one consent category to `enabled`.
///
/// A matcher+toggle binding reads the current state first and only toggles
/// when it differs, so repeated calls never double-toggle. A branch binding
/// has no way to read state and runs the matching branch every time.
pub async fn set_consent(
    interpreter: &Interpreter<'_>,
    consent: &Consent,
    enabled: bool,
    scope: &mut Scope,
    policy: &ConsentPolicy,
) -> Result<(), DomError> {
    let rt = interpreter.runtime();

    match &consent.binding {
        ConsentBinding::Toggle { matcher, toggle } => {
            let current = matches(rt, matcher, scope).await?;
            trace_step!(
                rt.flags,
                category = %consent.category,
                current,
                requested = enabled,
                "setting consent"
            );
            if current != enabled {
                interpreter.execute(toggle, scope, policy).await?;
            }
        }
        ConsentBinding::Branch { on_true, on_false } => {
            trace_step!(rt.flags, category = %consent.category, requested = enabled, "setting consent");
            let branch = if enabled { on_true } else { on_false };
            if let Some(action) = branch {
                interpreter.execute(action, scope, policy).await?;
            }
        }
    }

    if rt.flags.paint_matchers {
        if let Some(matcher) = consent.matcher() {
            debug_matcher(rt, matcher, scope, enabled).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::HiddenTargets;
    use crate::{EngineConfig, Runtime};
    use cmpilot_core::{Action, Category, DebugFlags, Matcher, QuerySpec};
    use cmpilot_parser::{DocumentEvent, HtmlDocument};

    fn clicks(doc: &HtmlDocument) -> usize {
        doc.events()
            .iter()
            .filter(|event| matches!(event, DocumentEvent::Click { .. }))
            .count()
    }

    fn stats_toggle() -> Consent {
        Consent::toggle(
            Category::B,
            Matcher::Checkbox(QuerySpec::new("#stats")),
            Action::click(QuerySpec::new("#stats")),
        )
    }

    #[tokio::test]
    async fn test_toggle_binding_is_idempotent() {
        let doc = HtmlDocument::parse(r#"<input type="checkbox" id="stats">"#);
        let config = EngineConfig::default();
        let hidden = HiddenTargets::default();
        let interpreter = Interpreter::new(Runtime::new(&doc, DebugFlags::default(), &config), &hidden);
        let policy = ConsentPolicy::default();
        let consent = stats_toggle();

        set_consent(&interpreter, &consent, true, &mut Scope::root(), &policy).await.unwrap();
        set_consent(&interpreter, &consent, true, &mut Scope::root(), &policy).await.unwrap();

        assert_eq!(clicks(&doc), 1);
        assert_eq!(doc.checked("#stats"), Some(true));

        set_consent(&interpreter, &consent, false, &mut Scope::root(), &policy).await.unwrap();
        assert_eq!(clicks(&doc), 2);
        assert_eq!(doc.checked("#stats"), Some(false));
    }

    #[tokio::test]
    async fn test_branch_binding_runs_unconditionally() {
        let doc = HtmlDocument::parse(r#"<button id="ads-on">On</button><button id="ads-off">Off</button>"#);
        let config = EngineConfig::default();
        let hidden = HiddenTargets::default();
        let interpreter = Interpreter::new(Runtime::new(&doc, DebugFlags::default(), &config), &hidden);
        let policy = ConsentPolicy::default();
        let consent = Consent::branch(
            Category::F,
            Some(Action::click(QuerySpec::new("#ads-on"))),
            Some(Action::click(QuerySpec::new("#ads-off"))),
        );

        set_consent(&interpreter, &consent, false, &mut Scope::root(), &policy).await.unwrap();
        set_consent(&interpreter, &consent, false, &mut Scope::root(), &policy).await.unwrap();
        assert_eq!(clicks(&doc), 2);
    }

    #[tokio::test]
    async fn test_paint_matchers_marks_result() {
        let doc = HtmlDocument::parse(r#"<input type="checkbox" id="stats">"#);
        let config = EngineConfig::default();
        let hidden = HiddenTargets::default();
        let flags = DebugFlags {
            paint_matchers: true,
            ..DebugFlags::default()
        };
        let interpreter = Interpreter::new(Runtime::new(&doc, flags, &config), &hidden);

        set_consent(&interpreter, &stats_toggle(), true, &mut Scope::root(), &ConsentPolicy::default())
            .await
            .unwrap();

        let painted = doc.painted();
        assert_eq!(painted.len(), 1);
        assert!(painted[0].1);
    }
}

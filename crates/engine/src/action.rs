use async_recursion::async_recursion;
use cmpilot_core::{
    Action, Axis, ClickAction, ConsentPolicy, DomError, ElementHandle, Matcher, PointerPhase, QuerySpec, SlideAction,
    WaitCssAction,
};
use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::consent::set_consent;
use crate::matcher::matches;
use crate::query::Scope;
use crate::{Runtime, trace_step};

/// Elements a CMP's `hide` actions concealed, kept so cleanup can reveal them again.
#[derive(Debug, Default)]
pub struct HiddenTargets {
    elements: Mutex<Vec<ElementHandle>>,
}

impl HiddenTargets {
    pub fn record(&self, element: ElementHandle) {
        self.elements.lock().push(element);
    }

    pub fn drain(&self) -> Vec<ElementHandle> {
        std::mem::take(&mut *self.elements.lock())
    }

    pub fn len(&self) -> usize {
        self.elements.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.lock().is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOutcome {
    /// The awaited condition held when polling stopped.
    pub satisfied: bool,
    /// Re-checks performed after the first one.
    pub retries: u32,
}

/// Walks action trees against the page. Steps run strictly one after another.
#[derive(Clone, Copy)]
pub struct Interpreter<'a> {
    rt: Runtime<'a>,
    hidden: &'a HiddenTargets,
}

impl<'a> Interpreter<'a> {
    pub fn new(rt: Runtime<'a>, hidden: &'a HiddenTargets) -> Self {
        Self { rt, hidden }
    }

    pub fn runtime(&self) -> &Runtime<'a> {
        &self.rt
    }

    #[async_recursion]
    pub async fn execute(&self, action: &Action, scope: &mut Scope, policy: &ConsentPolicy) -> Result<(), DomError> {
        trace_step!(self.rt.flags, action = action.tag(), depth = scope.depth(), "executing action");

        match action {
            Action::Click(click) => self.click(click, scope).await,
            Action::List(actions) => {
                for action in actions {
                    self.execute(action, scope, policy).await?;
                }
                Ok(())
            }
            Action::Consent(consents) => {
                for consent in consents {
                    set_consent(self, consent, policy.allows(consent.category), scope, policy).await?;
                }
                Ok(())
            }
            Action::IfCss(ifcss) => {
                let present = matches(&self.rt, &Matcher::Css(ifcss.target.clone()), scope).await?;
                let branch = if present { &ifcss.on_true } else { &ifcss.on_false };
                match branch {
                    Some(action) => self.execute(action, scope, policy).await,
                    None => Ok(()),
                }
            }
            Action::WaitCss(wait) => {
                self.wait_for_css(wait, scope).await;
                Ok(())
            }
            Action::ForEach(foreach) => {
                let results = self.rt.query().find_all(&foreach.target, scope).await?;
                for target in results.into_iter().filter_map(|result| result.target) {
                    let mut inner = scope.enter(target);
                    self.execute(&foreach.action, &mut inner, policy).await?;
                }
                Ok(())
            }
            Action::Hide(target) => self.hide(target, scope).await,
            Action::Slide(slide) => self.slide(slide, scope).await,
            Action::Close => self.rt.doc.close().await,
            Action::Wait(duration) => {
                sleep(*duration).await;
                Ok(())
            }
        }
    }

    async fn click(&self, click: &ClickAction, scope: &Scope) -> Result<(), DomError> {
        let result = self.rt.query().find(&click.target, scope).await?;

        if let Some(target) = result.target {
            if self.rt.flags.click_delay {
                self.rt.doc.scroll_into_view(target).await?;
                self.rt.doc.focus(target).await?;
            }
            if self.rt.flags.debug_clicks {
                info!(
                    target = %target,
                    selector = %click.target.selector,
                    open_in_tab = click.open_in_tab,
                    "clicking"
                );
            }
            self.rt.doc.click(target, click.open_in_tab).await?;
        } else {
            trace_step!(self.rt.flags, selector = %click.target.selector, "click target not found");
        }

        let pause = click.timeout.unwrap_or(if self.rt.flags.click_delay {
            self.rt.config.click_delay
        } else {
            Duration::ZERO
        });
        if !pause.is_zero() {
            sleep(pause).await;
        }
        Ok(())
    }

    /// Checks once, then up to `retries` more times `wait_time` apart. Never fails:
    /// a check that errors counts as unsatisfied.
    pub async fn wait_for_css(&self, wait: &WaitCssAction, scope: &Scope) -> WaitOutcome {
        let matcher = Matcher::Css(wait.target.clone());
        let mut retries = 0;
        loop {
            let satisfied = match matches(&self.rt, &matcher, scope).await {
                Ok(present) => present != wait.negated,
                Err(e) => {
                    warn!(selector = %wait.target.selector, retries, error = %e, "waitcss check failed");
                    false
                }
            };
            if satisfied {
                return WaitOutcome {
                    satisfied: true,
                    retries,
                };
            }
            if retries >= wait.retries {
                trace_step!(
                    self.rt.flags,
                    selector = %wait.target.selector,
                    retries,
                    "gave up waiting"
                );
                return WaitOutcome {
                    satisfied: false,
                    retries,
                };
            }
            retries += 1;
            sleep(wait.wait_time).await;
        }
    }

    async fn hide(&self, target: &QuerySpec, scope: &Scope) -> Result<(), DomError> {
        let Some(element) = self.rt.query().find(target, scope).await?.target else {
            return Ok(());
        };
        self.hidden.record(element);
        self.rt.doc.set_hidden(element, true).await
    }

    async fn slide(&self, slide: &SlideAction, scope: &Scope) -> Result<(), DomError> {
        let query = self.rt.query();
        let Some(target) = query.find(&slide.target, scope).await?.target else {
            return Ok(());
        };
        let Some(drag_target) = query.find(&slide.drag_target, scope).await?.target else {
            return Ok(());
        };

        let from = self.rt.doc.bounding_rect(target).await?;
        let to = self.rt.doc.bounding_rect(drag_target).await?;
        let (mut dx, mut dy) = (to.x - from.x, to.y - from.y);
        match slide.axis {
            Some(Axis::X) => dy = 0.0,
            Some(Axis::Y) => dx = 0.0,
            None => {}
        }

        let start = from.center();
        let end = start.offset(dx, dy);
        self.rt.doc.dispatch_pointer(target, PointerPhase::Down, start).await?;
        sleep(self.rt.config.slide_step).await;
        self.rt.doc.dispatch_pointer(target, PointerPhase::Move, end).await?;
        sleep(self.rt.config.slide_step).await;
        self.rt.doc.dispatch_pointer(target, PointerPhase::Up, end).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EngineConfig;
    use cmpilot_core::{Category, DebugFlags, Document, ForEachAction, IfCssAction, Point};
    use cmpilot_parser::{DocumentEvent, HtmlDocument};
    use tokio::time::Instant;

    fn waitcss(selector: &str, negated: bool, retries: u32, wait_ms: u64) -> WaitCssAction {
        WaitCssAction {
            target: QuerySpec::new(selector),
            negated,
            retries,
            wait_time: Duration::from_millis(wait_ms),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_waitcss_present_target_needs_no_retries() {
        let doc = HtmlDocument::parse(r#"<div id="panel"></div>"#);
        let config = EngineConfig::default();
        let hidden = HiddenTargets::default();
        let interpreter = Interpreter::new(Runtime::new(&doc, DebugFlags::default(), &config), &hidden);

        let started = Instant::now();
        let outcome = interpreter
            .wait_for_css(&waitcss("#panel", false, 10, 250), &Scope::root())
            .await;
        assert_eq!(outcome, WaitOutcome { satisfied: true, retries: 0 });
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waitcss_exhausts_retries_without_failing() {
        let doc = HtmlDocument::parse(r#"<div id="panel"></div>"#);
        let config = EngineConfig::default();
        let hidden = HiddenTargets::default();
        let interpreter = Interpreter::new(Runtime::new(&doc, DebugFlags::default(), &config), &hidden);

        let started = Instant::now();
        let outcome = interpreter
            .wait_for_css(&waitcss("#never", false, 2, 10), &Scope::root())
            .await;
        let elapsed = started.elapsed();
        assert_eq!(outcome, WaitOutcome { satisfied: false, retries: 2 });
        assert!(elapsed >= Duration::from_millis(20), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(30), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_negated_waitcss_resolves_on_absence() {
        let doc = HtmlDocument::parse(r#"<div id="spinner"></div>"#);
        let config = EngineConfig::default();
        let hidden = HiddenTargets::default();
        let interpreter = Interpreter::new(Runtime::new(&doc, DebugFlags::default(), &config), &hidden);

        let outcome = interpreter
            .wait_for_css(&waitcss("#overlay", true, 5, 100), &Scope::root())
            .await;
        assert!(outcome.satisfied);

        let outcome = interpreter
            .wait_for_css(&waitcss("#spinner", true, 1, 100), &Scope::root())
            .await;
        assert_eq!(outcome, WaitOutcome { satisfied: false, retries: 1 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_click_pause_follows_timeout_then_delay_flag() {
        let doc = HtmlDocument::parse(r#"<button id="ok">OK</button>"#);
        let config = EngineConfig::default().with_click_delay(250);
        let hidden = HiddenTargets::default();
        let policy = ConsentPolicy::default();

        let plain = Interpreter::new(Runtime::new(&doc, DebugFlags::default(), &config), &hidden);
        let started = Instant::now();
        plain
            .execute(&Action::click(QuerySpec::new("#ok")), &mut Scope::root(), &policy)
            .await
            .unwrap();
        assert_eq!(started.elapsed(), Duration::ZERO);

        let paced_flags = DebugFlags {
            click_delay: true,
            ..DebugFlags::default()
        };
        let paced = Interpreter::new(Runtime::new(&doc, paced_flags, &config), &hidden);
        let started = Instant::now();
        paced
            .execute(&Action::click(QuerySpec::new("#ok")), &mut Scope::root(), &policy)
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(250));

        let explicit = Action::Click(ClickAction {
            target: QuerySpec::new("#ok"),
            open_in_tab: true,
            timeout: Some(Duration::from_millis(40)),
        });
        let started = Instant::now();
        paced.execute(&explicit, &mut Scope::root(), &policy).await.unwrap();
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(40) && elapsed < Duration::from_millis(250));

        let clicks: Vec<_> = doc
            .events()
            .into_iter()
            .filter_map(|event| match event {
                DocumentEvent::Click { open_in_tab, .. } => Some(open_in_tab),
                _ => None,
            })
            .collect();
        assert_eq!(clicks, vec![false, false, true]);
        assert!(doc.events().iter().any(|e| matches!(e, DocumentEvent::ScrollIntoView(_))));
        assert!(doc.events().iter().any(|e| matches!(e, DocumentEvent::Focus(_))));
    }

    #[tokio::test]
    async fn test_ifcss_branches_on_presence() {
        let doc = HtmlDocument::parse(
            r#"<div id="banner"><input type="checkbox" id="yes"><input type="checkbox" id="no"></div>"#,
        );
        let config = EngineConfig::default();
        let hidden = HiddenTargets::default();
        let interpreter = Interpreter::new(Runtime::new(&doc, DebugFlags::default(), &config), &hidden);

        let branch = |selector: &str| {
            Action::IfCss(IfCssAction {
                target: QuerySpec::new(selector),
                on_true: Some(Box::new(Action::click(QuerySpec::new("#yes")))),
                on_false: Some(Box::new(Action::click(QuerySpec::new("#no")))),
            })
        };
        let policy = ConsentPolicy::default();
        interpreter.execute(&branch("#banner"), &mut Scope::root(), &policy).await.unwrap();
        interpreter.execute(&branch("#missing"), &mut Scope::root(), &policy).await.unwrap();

        assert_eq!(doc.checked("#yes"), Some(true));
        assert_eq!(doc.checked("#no"), Some(true));
    }

    #[tokio::test]
    async fn test_foreach_scopes_each_iteration() {
        let doc = HtmlDocument::parse(
            r#"<ul>
                <li class="row"><input type="checkbox" class="opt"></li>
                <li class="row"><input type="checkbox" class="opt" checked></li>
                <li class="row"><input type="checkbox" class="opt"></li>
            </ul>"#,
        );
        let config = EngineConfig::default();
        let hidden = HiddenTargets::default();
        let interpreter = Interpreter::new(Runtime::new(&doc, DebugFlags::default(), &config), &hidden);

        let action = Action::ForEach(ForEachAction {
            target: QuerySpec::new("li.row"),
            action: Box::new(Action::click(QuerySpec::new("input.opt"))),
        });
        let mut scope = Scope::root();
        interpreter.execute(&action, &mut scope, &ConsentPolicy::default()).await.unwrap();

        assert_eq!(scope.depth(), 0);
        assert_eq!(doc.checked_all("input.opt"), vec![true, false, true]);
    }

    #[tokio::test]
    async fn test_hide_records_target_and_keeps_it_in_tree() {
        let doc = HtmlDocument::parse(r#"<div id="cmp">Banner</div><div id="backdrop"></div>"#);
        let config = EngineConfig::default();
        let hidden = HiddenTargets::default();
        let interpreter = Interpreter::new(Runtime::new(&doc, DebugFlags::default(), &config), &hidden);

        let action = Action::List(vec![
            Action::Hide(QuerySpec::new("#cmp")),
            Action::Hide(QuerySpec::new("#backdrop")),
            Action::Hide(QuerySpec::new("#absent")),
        ]);
        interpreter.execute(&action, &mut Scope::root(), &ConsentPolicy::default()).await.unwrap();

        assert_eq!(hidden.len(), 2);
        assert_eq!(doc.hidden().len(), 2);
        assert_eq!(
            doc.query_selector_all(None, "#cmp").await.unwrap().len(),
            1,
            "hide must not remove the element"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_slide_dispatches_pointer_sequence_along_axis() {
        let doc = HtmlDocument::parse(r#"<div id="handle">&gt;</div><p>track</p><div id="end">|</div>"#);
        let config = EngineConfig::default().with_slide_step(10);
        let hidden = HiddenTargets::default();
        let interpreter = Interpreter::new(Runtime::new(&doc, DebugFlags::default(), &config), &hidden);

        let from = doc.bounding_rect(doc.query_selector_all(None, "#handle").await.unwrap()[0]).await.unwrap();
        let to = doc.bounding_rect(doc.query_selector_all(None, "#end").await.unwrap()[0]).await.unwrap();
        let action = Action::Slide(SlideAction {
            target: QuerySpec::new("#handle"),
            drag_target: QuerySpec::new("#end"),
            axis: Some(Axis::Y),
        });

        let started = Instant::now();
        interpreter.execute(&action, &mut Scope::root(), &ConsentPolicy::default()).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(20));

        let pointer: Vec<(PointerPhase, Point)> = doc
            .events()
            .into_iter()
            .filter_map(|event| match event {
                DocumentEvent::Pointer { phase, at, .. } => Some((phase, at)),
                _ => None,
            })
            .collect();
        let start = from.center();
        assert_ne!(to.y, from.y);
        let end = start.offset(0.0, to.y - from.y);
        assert_eq!(
            pointer,
            vec![
                (PointerPhase::Down, start),
                (PointerPhase::Move, end),
                (PointerPhase::Up, end),
            ]
        );
    }

    #[tokio::test]
    async fn test_consent_action_defaults_missing_categories_to_false() {
        let doc = HtmlDocument::parse(r#"<input type="checkbox" id="ads" checked><input type="checkbox" id="stats">"#);
        let config = EngineConfig::default();
        let hidden = HiddenTargets::default();
        let interpreter = Interpreter::new(Runtime::new(&doc, DebugFlags::default(), &config), &hidden);

        let toggle = |category, selector: &str| {
            cmpilot_core::Consent::toggle(
                category,
                Matcher::Checkbox(QuerySpec::new(selector)),
                Action::click(QuerySpec::new(selector)),
            )
        };
        let action = Action::Consent(vec![toggle(Category::F, "#ads"), toggle(Category::B, "#stats")]);
        let policy = ConsentPolicy::default().with(Category::B, true);
        interpreter.execute(&action, &mut Scope::root(), &policy).await.unwrap();

        assert_eq!(doc.checked("#ads"), Some(false));
        assert_eq!(doc.checked("#stats"), Some(true));
    }

    #[tokio::test]
    async fn test_close_and_wait() {
        let doc = HtmlDocument::parse("<p>bye</p>");
        let config = EngineConfig::default();
        let hidden = HiddenTargets::default();
        let interpreter = Interpreter::new(Runtime::new(&doc, DebugFlags::default(), &config), &hidden);

        let action = Action::List(vec![Action::Wait(Duration::from_millis(1)), Action::Close]);
        interpreter.execute(&action, &mut Scope::root(), &ConsentPolicy::default()).await.unwrap();
        assert!(doc.is_closed());
    }
}

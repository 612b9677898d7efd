use cmpilot_core::{
    Action, Category, CmpAction, CmpConfig, Consent, ConsentPolicy, DebugFlags, Document, HandledCmp, LifecycleMethod,
    Matcher, QuerySpec, RuleCatalog,
};
use cmpilot_engine::{ConsentEngine, EngineConfig, EngineReport};
use cmpilot_parser::{DocumentEvent, HtmlDocument};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, sleep};

fn css(selector: &str) -> Matcher {
    Matcher::Css(QuerySpec::new(selector))
}

fn shown(selector: &str) -> Matcher {
    Matcher::Css(QuerySpec::new(selector).displayed(true))
}

fn default_engine(doc: &Arc<HtmlDocument>, cmps: Vec<CmpConfig>) -> ConsentEngine {
    ConsentEngine::from_configs(doc.clone(), cmps, ConsentPolicy::default(), DebugFlags::default())
}

fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(HandledCmp) + Send + Sync + 'static) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    (seen, move |handled: HandledCmp| sink.lock().push(handled.cmp_name))
}

fn banner_cmp() -> CmpConfig {
    CmpConfig::new("bannerco")
        .with_detector(css("#banner"), css("#banner"))
        .with_method(
            LifecycleMethod::DoConsent,
            Action::Consent(vec![Consent::toggle(
                Category::B,
                Matcher::Checkbox(QuerySpec::new("#banner input.analytics")),
                Action::click(QuerySpec::new("#banner input.analytics")),
            )]),
        )
        .with_method(LifecycleMethod::SaveConsent, Action::click(QuerySpec::new("#banner .save")))
}

const BANNER: &str = r#"
    <div id="banner">
      <label>Analytics <input type="checkbox" class="analytics"></label>
      <button class="save">Save</button>
    </div>
"#;

fn clicks(doc: &HtmlDocument) -> usize {
    doc.events()
        .iter()
        .filter(|event| matches!(event, DocumentEvent::Click { .. }))
        .count()
}

#[tokio::test(start_paused = true)]
async fn test_banner_checkbox_is_enabled_end_to_end() {
    let doc = Arc::new(HtmlDocument::parse(BANNER));
    let (seen, on_handled) = recorder();
    let policy = ConsentPolicy::reject_all().with(Category::B, true);

    let report = ConsentEngine::from_configs(doc.clone(), vec![banner_cmp()], policy, DebugFlags::default())
        .on_handled(on_handled)
        .run()
        .await
        .unwrap();

    assert_eq!(doc.checked("#banner input.analytics"), Some(true));
    assert_eq!(*seen.lock(), vec!["bannerco".to_string()]);
    assert_eq!(
        report,
        EngineReport {
            handled: vec!["bannerco".into()],
            tried: vec!["bannerco".into()],
        }
    );
    assert_eq!(clicks(&doc), 2, "one toggle and one save");
    assert_eq!(doc.progress(), None, "progress indicator removed after handling");
}

#[tokio::test(start_paused = true)]
async fn test_only_the_showing_cmp_is_handled() {
    let doc = Arc::new(HtmlDocument::parse(
        r#"<div id="ghost" hidden>ghost</div><div id="real">real</div>"#,
    ));
    let ghost = CmpConfig::new("ghost").with_detector(css("#ghost"), shown("#ghost"));
    let real = CmpConfig::new("real").with_detector(css("#real"), shown("#real"));
    let (seen, on_handled) = recorder();

    let started = Instant::now();
    let report = default_engine(&doc, vec![ghost, real])
        .on_handled(on_handled)
        .run()
        .await
        .unwrap();

    assert_eq!(report.tried, vec!["ghost".to_string(), "real".to_string()]);
    assert_eq!(report.handled, vec!["real".to_string()]);
    assert_eq!(*seen.lock(), vec!["real".to_string()]);
    assert!(started.elapsed() >= EngineConfig::default().poll_budget());
}

#[tokio::test(start_paused = true)]
async fn test_cmp_inserted_later_is_detected_from_mutations() {
    let doc = Arc::new(HtmlDocument::parse("<main>content</main>"));
    let (seen, on_handled) = recorder();
    let engine = ConsentEngine::from_configs(
        doc.clone(),
        vec![banner_cmp()],
        ConsentPolicy::reject_all().with(Category::B, true),
        DebugFlags::default(),
    )
    .on_handled(on_handled);

    let task = tokio::spawn(engine.run());
    sleep(Duration::from_millis(500)).await;
    assert!(seen.lock().is_empty());
    assert_eq!(doc.observer_count(), 1);

    doc.append_html("body", BANNER).unwrap();
    let report = task.await.unwrap().unwrap();

    assert_eq!(report.handled, vec!["bannerco".to_string()]);
    assert_eq!(doc.checked("#banner input.analytics"), Some(true));
}

#[tokio::test(start_paused = true)]
async fn test_observation_is_disconnected_while_polling() {
    let doc = Arc::new(HtmlDocument::parse(r#"<div id="late" hidden></div>"#));
    let late = CmpConfig::new("late").with_detector(css("#late"), shown("#late"));
    let config = EngineConfig::default().with_polling(4, 100);
    let engine = default_engine(&doc, vec![late]).with_config(config);

    let task = tokio::spawn(engine.run());
    sleep(Duration::from_millis(150)).await;
    assert_eq!(doc.observer_count(), 0, "no subscription while polling");

    sleep(Duration::from_millis(400)).await;
    assert_eq!(doc.observer_count(), 1, "reconnected after giving up");

    // The abandoned CMP is never tried again, even once it shows.
    doc.remove("#late").unwrap();
    doc.append_html("body", r#"<div id="late">now visible</div>"#).unwrap();
    sleep(Duration::from_millis(500)).await;
    assert_eq!(doc.observer_count(), 1);

    doc.close().await.unwrap();
    let report = task.await.unwrap().unwrap();
    assert_eq!(report.tried, vec!["late".to_string()]);
    assert!(report.handled.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_engine_stops_after_first_handled_cmp_by_default() {
    let doc = Arc::new(HtmlDocument::parse(r#"<div id="first"></div>"#));
    let first = CmpConfig::new("first").with_detector(css("#first"), css("#first"));
    let second = CmpConfig::new("second").with_detector(css("#second"), css("#second"));

    let report = default_engine(&doc, vec![first, second])
        .run()
        .await
        .unwrap();
    assert_eq!(report.handled, vec!["first".to_string()]);
    assert_eq!(doc.observer_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_keep_observing_handles_later_cmps() {
    let doc = Arc::new(HtmlDocument::parse(r#"<div id="first"></div>"#));
    let first = CmpConfig::new("first").with_detector(css("#first"), css("#first"));
    let second = CmpConfig::new("second").with_detector(css("#second"), css("#second"));
    let (seen, on_handled) = recorder();

    let engine = default_engine(&doc, vec![first, second])
        .with_config(EngineConfig::default().keep_observing(true))
        .on_handled(on_handled);
    let task = tokio::spawn(engine.run());

    sleep(Duration::from_millis(100)).await;
    assert_eq!(*seen.lock(), vec!["first".to_string()]);

    doc.append_html("body", r#"<div id="second"></div>"#).unwrap();
    sleep(Duration::from_millis(100)).await;
    assert_eq!(*seen.lock(), vec!["first".to_string(), "second".to_string()]);

    doc.close().await.unwrap();
    let report = task.await.unwrap().unwrap();
    assert_eq!(report.handled.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_skip_actions_detects_without_touching_the_page() {
    let doc = Arc::new(HtmlDocument::parse(BANNER));
    let (seen, on_handled) = recorder();
    let flags = DebugFlags {
        skip_actions: true,
        ..DebugFlags::default()
    };

    ConsentEngine::from_configs(doc.clone(), vec![banner_cmp()], ConsentPolicy::accept_all(), flags)
        .on_handled(on_handled)
        .run()
        .await
        .unwrap();

    assert_eq!(*seen.lock(), vec!["bannerco".to_string()]);
    assert!(doc.events().is_empty());
    assert_eq!(doc.checked("#banner input.analytics"), Some(false));
}

#[tokio::test(start_paused = true)]
async fn test_skip_submit_and_skip_hide_method() {
    let doc = Arc::new(HtmlDocument::parse(BANNER));
    let cmp = banner_cmp().with_method(LifecycleMethod::HideCmp, Action::Hide(QuerySpec::new("#banner")));
    let flags = DebugFlags {
        skip_submit: true,
        skip_hide_method: true,
        ..DebugFlags::default()
    };

    ConsentEngine::from_configs(doc.clone(), vec![cmp], ConsentPolicy::accept_all(), flags)
        .run()
        .await
        .unwrap();

    assert_eq!(clicks(&doc), 1, "toggle only, no save");
    assert!(!doc.events().iter().any(|e| matches!(e, DocumentEvent::Hidden { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_hidden_elements_are_revealed_after_handling() {
    let doc = Arc::new(HtmlDocument::parse(BANNER));
    let cmp = banner_cmp().with_method(LifecycleMethod::HideCmp, Action::Hide(QuerySpec::new("#banner")));

    ConsentEngine::from_configs(doc.clone(), vec![cmp], ConsentPolicy::accept_all(), DebugFlags::default())
        .run()
        .await
        .unwrap();

    let hides: Vec<bool> = doc
        .events()
        .into_iter()
        .filter_map(|event| match event {
            DocumentEvent::Hidden { hidden, .. } => Some(hidden),
            _ => None,
        })
        .collect();
    assert_eq!(hides, vec![true, true, false, false]);
    assert!(doc.hidden().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_failing_lifecycle_still_cleans_up_and_notifies() {
    let doc = Arc::new(HtmlDocument::parse(BANNER));
    let cmp = banner_cmp()
        .with_method(LifecycleMethod::HideCmp, Action::Hide(QuerySpec::new("#banner")))
        .with_method(LifecycleMethod::OpenOptions, Action::click(QuerySpec::new("button[[")));
    let (seen, on_handled) = recorder();

    ConsentEngine::from_configs(doc.clone(), vec![cmp], ConsentPolicy::accept_all(), DebugFlags::default())
        .on_handled(on_handled)
        .run()
        .await
        .unwrap();

    assert_eq!(*seen.lock(), vec!["bannerco".to_string()]);
    assert_eq!(doc.checked("#banner input.analytics"), Some(false), "DO_CONSENT never ran");
    assert!(doc.hidden().is_empty());
    assert_eq!(doc.progress(), None);
}

#[tokio::test(start_paused = true)]
async fn test_catalog_json_drives_the_engine() {
    let catalog = RuleCatalog::from_value(json!({
        "broken": {
            "detectors": [{
                "presentMatcher": { "type": "css", "target": { "selector": "#banner" } },
                "showingMatcher": { "type": "css", "target": { "selector": "#banner" } }
            }],
            "methods": [{ "name": "DO_CONSENT", "action": { "type": "summon" } }]
        },
        "bannerco": {
            "detectors": [{
                "presentMatcher": { "type": "css", "target": { "selector": "#banner" } },
                "showingMatcher": { "type": "css", "target": { "selector": "#banner", "displayFilter": true } }
            }],
            "methods": [
                { "name": "HIDE_CMP", "action": { "type": "hide", "target": { "selector": "#banner" } } },
                { "name": "OPEN_OPTIONS", "action": null },
                { "name": "DO_CONSENT", "action": {
                    "type": "consent",
                    "consents": [{
                        "type": "B",
                        "matcher": { "type": "checkbox", "parent": { "selector": "#banner" },
                                     "target": { "selector": "input.analytics" } },
                        "toggleAction": { "type": "click", "parent": { "selector": "#banner" },
                                          "target": { "selector": "input.analytics" } }
                    }]
                }},
                { "name": "SAVE_CONSENT", "action": {
                    "type": "click", "target": { "selector": "button", "textFilter": ["save", "confirm"] }
                }}
            ]
        }
    }))
    .unwrap();

    let doc = Arc::new(HtmlDocument::parse(BANNER));
    let engine = ConsentEngine::new(doc.clone(), &catalog, CmpAction::AcceptAll.policy(), DebugFlags::default());
    assert_eq!(engine.cmp_names(), vec!["bannerco"]);

    let report = engine.run().await.unwrap();
    assert_eq!(report.handled, vec!["bannerco".to_string()]);
    assert_eq!(doc.checked("#banner input.analytics"), Some(true));
}

#[tokio::test(start_paused = true)]
async fn test_tried_handle_is_live_during_run() {
    let doc = Arc::new(HtmlDocument::parse(
        r#"<div id="ghost" hidden>ghost</div><div id="real">real</div>"#,
    ));
    let ghost = CmpConfig::new("ghost").with_detector(css("#ghost"), shown("#ghost"));
    let real = CmpConfig::new("real").with_detector(css("#real"), shown("#real"));
    let at_callback = Arc::new(Mutex::new(Vec::new()));

    let engine = default_engine(&doc, vec![ghost, real]).with_config(EngineConfig::default().with_polling(4, 100));
    let tried = engine.tried();
    let in_callback = tried.clone();
    let sink = at_callback.clone();
    let engine = engine.on_handled(move |_| *sink.lock() = in_callback.snapshot());
    assert!(tried.is_empty());

    let task = tokio::spawn(engine.run());
    sleep(Duration::from_millis(50)).await;
    assert_eq!(tried.snapshot(), vec!["ghost".to_string()], "ghost is being polled");
    assert!(!tried.contains("real"));

    let report = task.await.unwrap().unwrap();
    assert_eq!(*at_callback.lock(), vec!["ghost".to_string(), "real".to_string()]);
    assert_eq!(tried.snapshot(), report.tried);
    assert_eq!(tried.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_cmp_does_not_wait_after_its_last_check() {
    let doc = Arc::new(HtmlDocument::parse(r#"<div id="late" hidden></div>"#));
    let late = CmpConfig::new("late").with_detector(css("#late"), shown("#late"));
    let config = EngineConfig::default().with_polling(4, 100);
    assert_eq!(config.poll_budget(), Duration::from_millis(300));
    let engine = default_engine(&doc, vec![late]).with_config(config);

    let task = tokio::spawn(engine.run());
    sleep(Duration::from_millis(250)).await;
    assert_eq!(doc.observer_count(), 0, "still polling");

    // Checks run at 0, 100, 200 and 300ms; the engine is observing again right after the last one.
    sleep(Duration::from_millis(100)).await;
    assert_eq!(doc.observer_count(), 1);

    doc.close().await.unwrap();
    let report = task.await.unwrap().unwrap();
    assert!(report.handled.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_callback_runs_before_the_page_is_cleaned_up() {
    let doc = Arc::new(HtmlDocument::parse(BANNER));
    let cmp = banner_cmp().with_method(LifecycleMethod::HideCmp, Action::Hide(QuerySpec::new("#banner")));
    let page = doc.clone();
    let at_callback = Arc::new(Mutex::new(None));
    let sink = at_callback.clone();

    ConsentEngine::from_configs(doc.clone(), vec![cmp], ConsentPolicy::accept_all(), DebugFlags::default())
        .on_handled(move |_| *sink.lock() = Some((page.progress().is_some(), page.hidden().len())))
        .run()
        .await
        .unwrap();

    assert_eq!(*at_callback.lock(), Some((true, 1)), "banner still hidden and progress shown");
    assert!(doc.hidden().is_empty());
    assert_eq!(doc.progress(), None);
}

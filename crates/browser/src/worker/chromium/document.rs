use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::cdp::js_protocol::runtime::{AddBindingParams, EventBindingCalled};
use chromiumoxide::page::Page;
use cmpilot_core::{Document, DomError, ElementHandle, MutationBatch, MutationObserver, Point, PointerPhase, Rect};
use futures::StreamExt;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::shared::{BrowserError, js, to_dom_error};

type Subscribers = Arc<Mutex<Vec<mpsc::UnboundedSender<MutationBatch>>>>;

#[derive(Deserialize)]
struct QueryReply {
    handles: Vec<ElementHandle>,
    invalid: Option<String>,
}

/// A live tab seen through the [`Document`] seam.
///
/// Elements are handles into a registry the page-side runtime keeps; a
/// navigation installs a fresh runtime and every older handle turns stale.
pub struct ChromiumDocument {
    page: Page,
    subscribers: Subscribers,
    closed: AtomicBool,
    listener: JoinHandle<()>,
}

impl ChromiumDocument {
    /// Installs the page runtime on `page` and on every document it loads later.
    pub async fn attach(page: Page) -> Result<Self, BrowserError> {
        let install = js::build_js_call(
            js::runtime::INSTALL,
            &[json!(js::runtime::BINDING_NAME), json!(js::runtime::HIDER_CLASS)],
        );

        let mut events = page
            .event_listener::<EventBindingCalled>()
            .await
            .map_err(|e| to_dom_error(e, "listen"))?;
        page.execute(AddBindingParams::new(js::runtime::BINDING_NAME))
            .await
            .map_err(|e| to_dom_error(e, "addBinding"))?;
        page.execute(AddScriptToEvaluateOnNewDocumentParams::new(install.clone()))
            .await
            .map_err(|e| to_dom_error(e, "addScript"))?;
        page.evaluate_expression(install)
            .await
            .map_err(|e| to_dom_error(e, "installRuntime"))?;

        let subscribers: Subscribers = Arc::default();
        let forward = Arc::clone(&subscribers);
        let listener = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if event.name != js::runtime::BINDING_NAME {
                    continue;
                }
                let records = event.payload.parse().unwrap_or(1);
                forward
                    .lock()
                    .await
                    .retain(|tx| tx.send(MutationBatch { records }).is_ok());
            }
            debug!("binding stream ended, disconnecting observers");
            forward.lock().await.clear();
        });

        Ok(Self {
            page,
            subscribers,
            closed: AtomicBool::new(false),
            listener,
        })
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    fn ensure_open(&self) -> Result<(), DomError> {
        if self.closed.load(Ordering::SeqCst) || self.listener.is_finished() {
            return Err(DomError::Closed);
        }
        Ok(())
    }

    async fn call<T: DeserializeOwned>(&self, op: &str, func: &str, args: &[Value]) -> Result<T, DomError> {
        self.ensure_open()?;
        let result = self
            .page
            .evaluate_expression(js::build_js_call(func, args))
            .await
            .map_err(|e| to_dom_error(e, op))?;
        result
            .into_value()
            .map_err(|e| DomError::Protocol(format!("{} returned an unexpected value: {}", op, e)))
    }

    async fn run(&self, op: &str, func: &str, args: &[Value]) -> Result<(), DomError> {
        self.call::<bool>(op, func, args).await.map(|_| ())
    }
}

impl Drop for ChromiumDocument {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

#[async_trait]
impl Document for ChromiumDocument {
    async fn query_selector_all(
        &self,
        scope: Option<ElementHandle>,
        selector: &str,
    ) -> Result<Vec<ElementHandle>, DomError> {
        let scope = scope.map_or(Value::Null, |el| json!(el.id()));
        let reply: QueryReply = self
            .call("querySelectorAll", js::element::QUERY, &[scope, json!(selector)])
            .await?;
        match reply.invalid {
            Some(reason) => Err(DomError::invalid_selector(selector, reason)),
            None => Ok(reply.handles),
        }
    }

    async fn text_content(&self, element: ElementHandle) -> Result<String, DomError> {
        self.call("textContent", js::element::TEXT, &[json!(element.id())]).await
    }

    async fn computed_style(&self, element: ElementHandle, property: &str) -> Result<String, DomError> {
        self.call("computedStyle", js::element::STYLE, &[json!(element.id()), json!(property)])
            .await
    }

    async fn bounding_rect(&self, element: ElementHandle) -> Result<Rect, DomError> {
        self.call("boundingRect", js::element::RECT, &[json!(element.id())]).await
    }

    async fn in_nested_context(&self, element: ElementHandle) -> Result<bool, DomError> {
        self.call("nestedContext", js::element::NESTED, &[json!(element.id())]).await
    }

    async fn is_checked(&self, element: ElementHandle) -> Result<bool, DomError> {
        self.call("checked", js::element::CHECKED, &[json!(element.id())]).await
    }

    async fn scroll_into_view(&self, element: ElementHandle) -> Result<(), DomError> {
        self.run("scrollIntoView", js::element::SCROLL_INTO_VIEW, &[json!(element.id())])
            .await
    }

    async fn focus(&self, element: ElementHandle) -> Result<(), DomError> {
        self.run("focus", js::element::FOCUS, &[json!(element.id())]).await
    }

    async fn click(&self, element: ElementHandle, open_in_tab: bool) -> Result<(), DomError> {
        self.run("click", js::element::CLICK, &[json!(element.id()), json!(open_in_tab)])
            .await
    }

    async fn dispatch_pointer(&self, element: ElementHandle, phase: PointerPhase, at: Point) -> Result<(), DomError> {
        self.run(
            phase.event_name(),
            js::element::POINTER,
            &[json!(element.id()), json!(phase.event_name()), json!(at.x), json!(at.y)],
        )
        .await
    }

    async fn set_hidden(&self, element: ElementHandle, hidden: bool) -> Result<(), DomError> {
        self.run(
            "setHidden",
            js::element::SET_HIDDEN,
            &[json!(element.id()), json!(hidden), json!(js::runtime::HIDER_CLASS)],
        )
        .await
    }

    async fn paint(&self, element: ElementHandle, passed: bool) -> Result<(), DomError> {
        self.run("paint", js::element::PAINT, &[json!(element.id()), json!(passed)])
            .await
    }

    async fn show_progress(&self, message: &str) -> Result<(), DomError> {
        self.run("showProgress", js::overlay::SHOW_PROGRESS, &[json!(message)])
            .await
    }

    async fn hide_progress(&self) -> Result<(), DomError> {
        self.run("hideProgress", js::overlay::HIDE_PROGRESS, &[]).await
    }

    async fn close(&self) -> Result<(), DomError> {
        let result = self.run("close", js::runtime::CLOSE_WINDOW, &[]).await;
        self.closed.store(true, Ordering::SeqCst);
        self.subscribers.lock().await.clear();
        match result {
            // The tab may already be gone by the time the reply would arrive.
            Err(DomError::Closed) => Ok(()),
            other => other,
        }
    }

    async fn observe(&self) -> Result<MutationObserver, DomError> {
        let (tx, observer) = MutationObserver::channel();
        if self.ensure_open().is_ok() {
            self.subscribers.lock().await.push(tx);
        }
        Ok(observer)
    }
}

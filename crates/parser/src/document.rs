use async_trait::async_trait;
use cmpilot_core::{Document, DomError, ElementHandle, MutationBatch, MutationObserver, Point, PointerPhase, Rect};
use ego_tree::{NodeId, NodeRef, Tree};
use parking_lot::Mutex;
use reqwest::Client;
use scraper::{ElementRef, Html, Node, Selector};
use std::collections::{BTreeSet, HashMap};
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::error::SnapshotError;
use crate::style;

const ROW_HEIGHT: f64 = 20.0;
const INDENT: f64 = 8.0;
const VIEWPORT_WIDTH: f64 = 1280.0;

/// Side effect the interpreter asked the snapshot to perform.
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentEvent {
    Click { element: ElementHandle, open_in_tab: bool },
    ScrollIntoView(ElementHandle),
    Focus(ElementHandle),
    Pointer { element: ElementHandle, phase: PointerPhase, at: Point },
    Hidden { element: ElementHandle, hidden: bool },
    Painted { element: ElementHandle, passed: bool },
    ProgressShown(String),
    ProgressHidden,
    Closed,
}

struct Snapshot {
    html: Html,
    handles: Vec<NodeId>,
    ids: HashMap<NodeId, ElementHandle>,
    checked: HashMap<NodeId, bool>,
    hidden: BTreeSet<ElementHandle>,
    painted: Vec<(ElementHandle, bool)>,
    events: Vec<DocumentEvent>,
    progress: Option<String>,
    closed: bool,
    observers: Vec<UnboundedSender<MutationBatch>>,
}

impl Snapshot {
    fn new(html: Html) -> Self {
        Self {
            html,
            handles: Vec::new(),
            ids: HashMap::new(),
            checked: HashMap::new(),
            hidden: BTreeSet::new(),
            painted: Vec::new(),
            events: Vec::new(),
            progress: None,
            closed: false,
            observers: Vec::new(),
        }
    }

    fn ensure_open(&self) -> Result<(), DomError> {
        if self.closed { Err(DomError::Closed) } else { Ok(()) }
    }

    fn handle(&mut self, id: NodeId) -> ElementHandle {
        if let Some(handle) = self.ids.get(&id) {
            return *handle;
        }
        let handle = ElementHandle::new(self.handles.len() as u64);
        self.handles.push(id);
        self.ids.insert(id, handle);
        handle
    }

    fn node(&self, handle: ElementHandle) -> Result<NodeRef<'_, Node>, DomError> {
        self.ensure_open()?;
        let root = self.html.tree.root().id();
        self.handles
            .get(handle.id() as usize)
            .and_then(|id| self.html.tree.get(*id))
            .filter(|node| node.ancestors().any(|ancestor| ancestor.id() == root))
            .ok_or(DomError::StaleElement(handle))
    }

    fn element(&self, handle: ElementHandle) -> Result<ElementRef<'_>, DomError> {
        self.node(handle)
            .and_then(|node| ElementRef::wrap(node).ok_or(DomError::StaleElement(handle)))
    }

    /// Matches in document order. Scoped queries exclude the scope element.
    fn select(&mut self, scope: Option<ElementHandle>, selector: &str) -> Result<Vec<ElementHandle>, DomError> {
        self.ensure_open()?;
        let parsed = Selector::parse(selector).map_err(|e| DomError::invalid_selector(selector, e))?;
        let ids = {
            let origin = match scope {
                Some(handle) => self.node(handle)?,
                None => self.html.tree.root(),
            };
            matching(origin, &parsed)
        };
        Ok(ids.into_iter().map(|id| self.handle(id)).collect())
    }

    fn is_checked(&self, id: NodeId) -> bool {
        self.checked.get(&id).copied().unwrap_or_else(|| {
            self.html
                .tree
                .get(id)
                .and_then(|node| node.value().as_element())
                .is_some_and(|element| element.attr("checked").is_some())
        })
    }

    /// Runs the activation behaviour of a click: checkboxes toggle, radios become checked.
    fn activate(&mut self, handle: ElementHandle) -> Result<(), DomError> {
        let node = self.node(handle)?;
        let Some(control) = self.control_for(node) else {
            return Ok(());
        };
        let Some(element) = self.html.tree.get(control).and_then(|node| node.value().as_element()) else {
            return Ok(());
        };

        match input_type(element).as_deref() {
            Some("checkbox") => {
                let state = !self.is_checked(control);
                self.checked.insert(control, state);
            }
            Some("radio") => {
                let group = element.attr("name").map(str::to_string);
                if let Some(name) = group {
                    let peers: Vec<NodeId> = self
                        .html
                        .tree
                        .root()
                        .descendants()
                        .filter(|node| {
                            node.value().as_element().is_some_and(|el| {
                                input_type(el).as_deref() == Some("radio") && el.attr("name") == Some(name.as_str())
                            })
                        })
                        .map(|node| node.id())
                        .collect();
                    for peer in peers {
                        self.checked.insert(peer, false);
                    }
                }
                self.checked.insert(control, true);
            }
            _ => {}
        }
        Ok(())
    }

    /// The checkbox or radio a click on `node` activates, directly or through a `<label>`.
    fn control_for(&self, node: NodeRef<'_, Node>) -> Option<NodeId> {
        if node.value().as_element().and_then(input_type).is_some_and(|t| t == "checkbox" || t == "radio") {
            return Some(node.id());
        }

        let label = std::iter::once(node)
            .chain(node.ancestors())
            .find(|n| n.value().as_element().is_some_and(|el| el.name() == "label"))?;
        let element = label.value().as_element()?;

        match element.attr("for") {
            Some(target) => self
                .html
                .tree
                .root()
                .descendants()
                .find(|n| n.value().as_element().and_then(|el| el.id()) == Some(target))
                .map(|n| n.id()),
            None => label
                .descendants()
                .find(|n| n.value().as_element().and_then(input_type).is_some_and(|t| t == "checkbox" || t == "radio"))
                .map(|n| n.id()),
        }
    }

    fn layout(&self, handle: ElementHandle) -> Result<Rect, DomError> {
        let node = self.node(handle)?;
        let rendered = std::iter::once(node)
            .chain(node.ancestors())
            .filter_map(|n| n.value().as_element())
            .all(style::renders);
        if !rendered {
            return Ok(Rect::default());
        }

        let depth = node.ancestors().count() as f64;
        let row = self
            .html
            .tree
            .root()
            .descendants()
            .filter(|n| n.value().is_element())
            .position(|n| n.id() == node.id())
            .unwrap_or(0) as f64;
        let x = INDENT * depth;
        Ok(Rect {
            x,
            y: ROW_HEIGHT * row,
            width: (VIEWPORT_WIDTH - 2.0 * x).max(0.0),
            height: ROW_HEIGHT,
        })
    }

    fn notify(&mut self, records: usize) {
        self.observers
            .retain(|observer| observer.send(MutationBatch { records }).is_ok());
        debug!(records, observers = self.observers.len(), "snapshot mutated");
    }
}

fn matching(origin: NodeRef<'_, Node>, selector: &Selector) -> Vec<NodeId> {
    origin
        .descendants()
        .skip(1)
        .filter_map(ElementRef::wrap)
        .filter(|element| selector.matches(element))
        .map(|element| element.id())
        .collect()
}

fn input_type(element: &scraper::node::Element) -> Option<String> {
    if element.name() != "input" {
        return None;
    }
    Some(element.attr("type").unwrap_or("text").to_ascii_lowercase())
}

/// Copies the children of `source` under `parent`, depth first.
fn graft(tree: &mut Tree<Node>, parent: NodeId, source: NodeRef<'_, Node>) -> usize {
    let mut copied = 0;
    for child in source.children() {
        let Some(mut target) = tree.get_mut(parent) else {
            return copied;
        };
        let id = target.append(child.value().clone()).id();
        copied += 1 + graft(tree, id, child);
    }
    copied
}

/// A parsed, in-memory page.
///
/// Clicks run checkbox, radio and label activation; hides, paints, the
/// progress overlay and pointer events are recorded instead of rendered.
/// Geometry is a naive one-row-per-element layout, enough for display
/// filters and slide deltas.
pub struct HtmlDocument {
    snapshot: Mutex<Snapshot>,
    nested: bool,
}

impl HtmlDocument {
    pub fn parse(html: &str) -> Self {
        Self {
            snapshot: Mutex::new(Snapshot::new(Html::parse_document(html))),
            nested: false,
        }
    }

    /// Loads `url` and parses the body as it was served. Scripts do not run.
    pub async fn fetch(url: &str) -> Result<Self, SnapshotError> {
        Self::fetch_with(&Client::new(), url).await
    }

    pub async fn fetch_with(client: &Client, url: &str) -> Result<Self, SnapshotError> {
        debug!(url, "fetching snapshot");
        let response = client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SnapshotError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let body = response.text().await?;
        Ok(Self::parse(&body))
    }

    /// Treats the whole snapshot as the document of an iframe.
    pub fn nested(mut self, nested: bool) -> Self {
        self.nested = nested;
        self
    }

    /// Parses `fragment` and appends it to the first element matching `parent`.
    pub fn append_html(&self, parent: &str, fragment: &str) -> Result<(), DomError> {
        let mut snapshot = self.snapshot.lock();
        let target = snapshot
            .select(None, parent)?
            .first()
            .copied()
            .ok_or_else(|| DomError::Script(format!("`{parent}` matched nothing to append to")))?;
        let parent_id = snapshot.node(target)?.id();

        let parsed = Html::parse_fragment(fragment);
        let Some(wrapper) = parsed.tree.root().children().find(|n| n.value().is_element()) else {
            return Ok(());
        };
        let copied = graft(&mut snapshot.html.tree, parent_id, wrapper);
        snapshot.notify(copied);
        Ok(())
    }

    /// Detaches every element matching `selector`. Returns how many were removed.
    pub fn remove(&self, selector: &str) -> Result<usize, DomError> {
        let mut snapshot = self.snapshot.lock();
        let matched = snapshot.select(None, selector)?;
        let ids: Vec<NodeId> = matched
            .into_iter()
            .filter_map(|handle| snapshot.node(handle).ok().map(|node| node.id()))
            .collect();

        let mut removed = 0;
        for id in ids {
            if let Some(mut node) = snapshot.html.tree.get_mut(id) {
                node.detach();
                removed += 1;
            }
        }
        if removed > 0 {
            snapshot.notify(removed);
        }
        Ok(removed)
    }

    pub fn events(&self) -> Vec<DocumentEvent> {
        self.snapshot.lock().events.clone()
    }

    /// Elements currently hidden through [`Document::set_hidden`].
    pub fn hidden(&self) -> Vec<ElementHandle> {
        self.snapshot.lock().hidden.iter().copied().collect()
    }

    pub fn painted(&self) -> Vec<(ElementHandle, bool)> {
        self.snapshot.lock().painted.clone()
    }

    pub fn progress(&self) -> Option<String> {
        self.snapshot.lock().progress.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.snapshot.lock().closed
    }

    /// Live observers. Dropped subscriptions stop counting immediately.
    pub fn observer_count(&self) -> usize {
        let mut snapshot = self.snapshot.lock();
        snapshot.observers.retain(|observer| !observer.is_closed());
        snapshot.observers.len()
    }

    /// Checked state of the first element matching `selector`.
    pub fn checked(&self, selector: &str) -> Option<bool> {
        self.checked_all(selector).first().copied()
    }

    pub fn checked_all(&self, selector: &str) -> Vec<bool> {
        let mut snapshot = self.snapshot.lock();
        let Ok(handles) = snapshot.select(None, selector) else {
            return Vec::new();
        };
        handles
            .into_iter()
            .filter_map(|handle| snapshot.node(handle).ok().map(|node| node.id()))
            .map(|id| snapshot.is_checked(id))
            .collect()
    }
}

#[async_trait]
impl Document for HtmlDocument {
    async fn query_selector_all(
        &self,
        scope: Option<ElementHandle>,
        selector: &str,
    ) -> Result<Vec<ElementHandle>, DomError> {
        self.snapshot.lock().select(scope, selector)
    }

    async fn text_content(&self, element: ElementHandle) -> Result<String, DomError> {
        Ok(self.snapshot.lock().element(element)?.text().collect())
    }

    async fn computed_style(&self, element: ElementHandle, property: &str) -> Result<String, DomError> {
        let snapshot = self.snapshot.lock();
        Ok(style::computed(snapshot.element(element)?.value(), property))
    }

    async fn bounding_rect(&self, element: ElementHandle) -> Result<Rect, DomError> {
        self.snapshot.lock().layout(element)
    }

    async fn in_nested_context(&self, element: ElementHandle) -> Result<bool, DomError> {
        self.snapshot.lock().node(element)?;
        Ok(self.nested)
    }

    async fn is_checked(&self, element: ElementHandle) -> Result<bool, DomError> {
        let snapshot = self.snapshot.lock();
        let id = snapshot.node(element)?.id();
        Ok(snapshot.is_checked(id))
    }

    async fn scroll_into_view(&self, element: ElementHandle) -> Result<(), DomError> {
        let mut snapshot = self.snapshot.lock();
        snapshot.node(element)?;
        snapshot.events.push(DocumentEvent::ScrollIntoView(element));
        Ok(())
    }

    async fn focus(&self, element: ElementHandle) -> Result<(), DomError> {
        let mut snapshot = self.snapshot.lock();
        snapshot.node(element)?;
        snapshot.events.push(DocumentEvent::Focus(element));
        Ok(())
    }

    async fn click(&self, element: ElementHandle, open_in_tab: bool) -> Result<(), DomError> {
        let mut snapshot = self.snapshot.lock();
        snapshot.activate(element)?;
        snapshot.events.push(DocumentEvent::Click { element, open_in_tab });
        Ok(())
    }

    async fn dispatch_pointer(&self, element: ElementHandle, phase: PointerPhase, at: Point) -> Result<(), DomError> {
        let mut snapshot = self.snapshot.lock();
        snapshot.node(element)?;
        snapshot.events.push(DocumentEvent::Pointer { element, phase, at });
        Ok(())
    }

    async fn set_hidden(&self, element: ElementHandle, hidden: bool) -> Result<(), DomError> {
        let mut snapshot = self.snapshot.lock();
        snapshot.node(element)?;
        if hidden {
            snapshot.hidden.insert(element);
        } else {
            snapshot.hidden.remove(&element);
        }
        snapshot.events.push(DocumentEvent::Hidden { element, hidden });
        Ok(())
    }

    async fn paint(&self, element: ElementHandle, passed: bool) -> Result<(), DomError> {
        let mut snapshot = self.snapshot.lock();
        snapshot.node(element)?;
        snapshot.painted.push((element, passed));
        snapshot.events.push(DocumentEvent::Painted { element, passed });
        Ok(())
    }

    async fn show_progress(&self, message: &str) -> Result<(), DomError> {
        let mut snapshot = self.snapshot.lock();
        snapshot.ensure_open()?;
        snapshot.progress = Some(message.to_string());
        snapshot.events.push(DocumentEvent::ProgressShown(message.to_string()));
        Ok(())
    }

    async fn hide_progress(&self) -> Result<(), DomError> {
        let mut snapshot = self.snapshot.lock();
        snapshot.ensure_open()?;
        snapshot.progress = None;
        snapshot.events.push(DocumentEvent::ProgressHidden);
        Ok(())
    }

    async fn close(&self) -> Result<(), DomError> {
        let mut snapshot = self.snapshot.lock();
        if !snapshot.closed {
            snapshot.closed = true;
            snapshot.observers.clear();
            snapshot.events.push(DocumentEvent::Closed);
        }
        Ok(())
    }

    async fn observe(&self) -> Result<MutationObserver, DomError> {
        let (sender, observer) = MutationObserver::channel();
        let mut snapshot = self.snapshot.lock();
        if !snapshot.closed {
            snapshot.observers.push(sender);
        }
        Ok(observer)
    }
}

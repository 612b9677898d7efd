use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;

use crate::error::DomError;

/// Opaque, stable identity of an element within one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ElementHandle(u64);

impl ElementHandle {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ElementHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn offset(self, dx: f64, dy: f64) -> Self {
        Self::new(self.x + dx, self.y + dy)
    }
}

/// Client-space bounding rectangle, as `getBoundingClientRect` reports it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointerPhase {
    Down,
    Move,
    Up,
}

impl PointerPhase {
    pub fn event_name(self) -> &'static str {
        match self {
            PointerPhase::Down => "mousedown",
            PointerPhase::Move => "mousemove",
            PointerPhase::Up => "mouseup",
        }
    }
}

/// One delivery of structural changes. Individual records are not exposed;
/// the engine only reacts to "something changed".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MutationBatch {
    pub records: usize,
}

/// Subscription to a document's mutation notifications.
///
/// Dropping the observer disconnects it. A closed channel means the document
/// went away.
#[derive(Debug)]
pub struct MutationObserver {
    receiver: mpsc::UnboundedReceiver<MutationBatch>,
}

impl MutationObserver {
    pub fn channel() -> (mpsc::UnboundedSender<MutationBatch>, Self) {
        let (tx, receiver) = mpsc::unbounded_channel();
        (tx, Self { receiver })
    }

    pub async fn next(&mut self) -> Option<MutationBatch> {
        self.receiver.recv().await
    }

    /// Folds every batch that is already queued into one.
    pub fn drain(&mut self) -> usize {
        let mut records = 0;
        while let Ok(batch) = self.receiver.try_recv() {
            records += batch.records;
        }
        records
    }
}

/// The page the interpreter works against: a live browser tab or a static snapshot.
#[async_trait]
pub trait Document: Send + Sync {
    /// Matches `selector` inside `scope` (the whole document when `None`), in document order.
    async fn query_selector_all(
        &self,
        scope: Option<ElementHandle>,
        selector: &str,
    ) -> Result<Vec<ElementHandle>, DomError>;

    async fn text_content(&self, element: ElementHandle) -> Result<String, DomError>;

    async fn computed_style(&self, element: ElementHandle, property: &str) -> Result<String, DomError>;

    async fn bounding_rect(&self, element: ElementHandle) -> Result<Rect, DomError>;

    /// Whether the element lives in a nested browsing context (an iframe document).
    async fn in_nested_context(&self, element: ElementHandle) -> Result<bool, DomError>;

    async fn is_checked(&self, element: ElementHandle) -> Result<bool, DomError>;

    async fn scroll_into_view(&self, element: ElementHandle) -> Result<(), DomError>;

    async fn focus(&self, element: ElementHandle) -> Result<(), DomError>;

    async fn click(&self, element: ElementHandle, open_in_tab: bool) -> Result<(), DomError>;

    async fn dispatch_pointer(
        &self,
        element: ElementHandle,
        phase: PointerPhase,
        at: Point,
    ) -> Result<(), DomError>;

    /// CSS-level hide. The element stays in the tree and keeps its layout.
    async fn set_hidden(&self, element: ElementHandle, hidden: bool) -> Result<(), DomError>;

    async fn paint(&self, element: ElementHandle, passed: bool) -> Result<(), DomError>;

    async fn show_progress(&self, message: &str) -> Result<(), DomError>;

    async fn hide_progress(&self) -> Result<(), DomError>;

    async fn close(&self) -> Result<(), DomError>;

    async fn observe(&self) -> Result<MutationObserver, DomError>;
}

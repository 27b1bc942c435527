//! Host document model: an element tree with attributes, inline style,
//! click handlers and document-wide childList mutation records.
//!
//! Parents own their children (`Arc`), children point back with `Weak`, so a
//! subtree removed from the document is freed once nothing else holds it.
//! Everything downstream (dedup, batch queue, overlays) keeps only `Weak`
//! references to media elements.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::warn;

static NEXT_ELEMENT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique element identity. Never reused, so a stale id can not
/// alias a newer element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementId(u64);

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "el#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerEvents {
    Auto,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Display {
    Block,
    Flex,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Position {
    #[default]
    Static,
    Relative,
    Absolute,
}

/// Inline style. `None` means "not set", i.e. the host default applies.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Style {
    pub opacity: Option<f32>,
    pub pointer_events: Option<PointerEvents>,
    pub display: Option<Display>,
    pub position: Option<Position>,
    pub background: Option<String>,
    pub color: Option<String>,
}

impl Style {
    pub fn is_visible(&self) -> bool {
        self.display != Some(Display::None) && self.opacity.unwrap_or(1.0) > 0.0
    }

    pub fn is_interactive(&self) -> bool {
        self.pointer_events != Some(PointerEvents::None)
    }
}

pub type ClickHandler = Arc<dyn Fn() + Send + Sync>;

pub struct Element {
    id: ElementId,
    tag: String,
    attributes: RwLock<HashMap<String, String>>,
    style: RwLock<Style>,
    text: RwLock<String>,
    children: RwLock<Vec<Arc<Element>>>,
    parent: RwLock<Weak<Element>>,
    click_handlers: RwLock<Vec<ClickHandler>>,
}

impl Element {
    pub fn new(tag: &str) -> Arc<Self> {
        Arc::new(Self {
            id: ElementId(NEXT_ELEMENT_ID.fetch_add(1, Ordering::Relaxed)),
            tag: tag.to_ascii_lowercase(),
            attributes: RwLock::new(HashMap::new()),
            style: RwLock::new(Style::default()),
            text: RwLock::new(String::new()),
            children: RwLock::new(Vec::new()),
            parent: RwLock::new(Weak::new()),
            click_handlers: RwLock::new(Vec::new()),
        })
    }

    /// Builder-style attribute setter for freshly created elements.
    pub fn with_attr(self: Arc<Self>, name: &str, value: &str) -> Arc<Self> {
        self.set_attr(name, value);
        self
    }

    pub fn id(&self) -> ElementId {
        self.id
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn is(&self, tag: &str) -> bool {
        self.tag.eq_ignore_ascii_case(tag)
    }

    pub fn attr(&self, name: &str) -> Option<String> {
        self.attributes.read().get(name).cloned()
    }

    pub fn set_attr(&self, name: &str, value: &str) {
        self.attributes
            .write()
            .insert(name.to_string(), value.to_string());
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.attributes
            .read()
            .get("class")
            .is_some_and(|list| list.split_whitespace().any(|c| c == class))
    }

    /// Numeric attribute (e.g. `width`), `None` if absent or unparsable.
    pub fn dimension(&self, name: &str) -> Option<u32> {
        self.attr(name).and_then(|v| v.trim().parse().ok())
    }

    pub fn style(&self) -> Style {
        self.style.read().clone()
    }

    pub fn update_style(&self, f: impl FnOnce(&mut Style)) {
        f(&mut self.style.write());
    }

    pub fn text(&self) -> String {
        self.text.read().clone()
    }

    pub fn set_text(&self, text: &str) {
        *self.text.write() = text.to_string();
    }

    pub fn children(&self) -> Vec<Arc<Element>> {
        self.children.read().clone()
    }

    pub fn parent(&self) -> Option<Arc<Element>> {
        self.parent.read().upgrade()
    }

    pub fn on_click(&self, handler: ClickHandler) {
        self.click_handlers.write().push(handler);
    }

    /// Dispatch a click to every registered handler, in registration order.
    pub fn click(&self) {
        let handlers = self.click_handlers.read().clone();
        for handler in handlers {
            handler();
        }
    }

    /// Pre-order walk of this element and all of its descendants.
    pub fn subtree(self: &Arc<Self>) -> Vec<Arc<Element>> {
        let mut out = Vec::new();
        let mut stack = vec![Arc::clone(self)];
        while let Some(el) = stack.pop() {
            let children = el.children();
            stack.extend(children.into_iter().rev());
            out.push(el);
        }
        out
    }

    pub fn find_by_class(self: &Arc<Self>, class: &str) -> Option<Arc<Element>> {
        self.subtree().into_iter().find(|el| el.has_class(class))
    }
}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Element")
            .field("id", &self.id)
            .field("tag", &self.tag)
            .field("attributes", &*self.attributes.read())
            .field("style", &*self.style.read())
            .finish_non_exhaustive()
    }
}

/// One childList mutation, delivered to every document observer.
#[derive(Debug, Clone, Default)]
pub struct MutationRecord {
    pub added_nodes: Vec<Arc<Element>>,
    pub removed_nodes: Vec<Arc<Element>>,
}

/// Document root plus the set of subtree observers.
pub struct Document {
    root: Arc<Element>,
    body: Arc<Element>,
    observers: Mutex<Vec<mpsc::UnboundedSender<Vec<MutationRecord>>>>,
}

impl Document {
    pub fn new() -> Arc<Self> {
        let root = Element::new("html");
        let body = Element::new("body");
        *body.parent.write() = Arc::downgrade(&root);
        root.children.write().push(Arc::clone(&body));
        Arc::new(Self {
            root,
            body,
            observers: Mutex::new(Vec::new()),
        })
    }

    pub fn root(&self) -> &Arc<Element> {
        &self.root
    }

    pub fn body(&self) -> &Arc<Element> {
        &self.body
    }

    /// Subscribe to childList mutations anywhere under the root. Dropping the
    /// receiver unsubscribes.
    pub fn observe(&self) -> mpsc::UnboundedReceiver<Vec<MutationRecord>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.observers.lock().push(tx);
        rx
    }

    /// True if `el` is attached under this document's root.
    pub fn contains(&self, el: &Arc<Element>) -> bool {
        let mut cursor = Some(Arc::clone(el));
        while let Some(node) = cursor {
            if Arc::ptr_eq(&node, &self.root) {
                return true;
            }
            cursor = node.parent();
        }
        false
    }

    /// Append `child` under `parent`, detaching it from any previous parent.
    /// Returns false and leaves the tree alone if `child` is `parent` or one
    /// of its ancestors.
    pub fn append_child(&self, parent: &Arc<Element>, child: Arc<Element>) -> bool {
        let mut cursor = Some(Arc::clone(parent));
        while let Some(node) = cursor {
            if Arc::ptr_eq(&node, &child) {
                warn!(parent = %parent.id(), child = %child.id(), "append would create a cycle");
                return false;
            }
            cursor = node.parent();
        }

        if let Some(old_parent) = child.parent() {
            old_parent
                .children
                .write()
                .retain(|c| !Arc::ptr_eq(c, &child));
        }
        *child.parent.write() = Arc::downgrade(parent);
        parent.children.write().push(Arc::clone(&child));

        if self.contains(parent) {
            self.notify(MutationRecord {
                added_nodes: vec![child],
                removed_nodes: Vec::new(),
            });
        }
        true
    }

    /// Detach `child` from `parent`. Returns false if it was not a child.
    pub fn remove_child(&self, parent: &Arc<Element>, child: &Arc<Element>) -> bool {
        let removed = {
            let mut children = parent.children.write();
            let before = children.len();
            children.retain(|c| !Arc::ptr_eq(c, child));
            children.len() != before
        };
        if !removed {
            return false;
        }
        *child.parent.write() = Weak::new();
        if self.contains(parent) {
            self.notify(MutationRecord {
                added_nodes: Vec::new(),
                removed_nodes: vec![Arc::clone(child)],
            });
        }
        true
    }

    /// Every attached element matching `pred`, in document order.
    pub fn query_all(&self, pred: impl Fn(&Element) -> bool) -> Vec<Arc<Element>> {
        self.root
            .subtree()
            .into_iter()
            .filter(|el| pred(el))
            .collect()
    }

    fn notify(&self, record: MutationRecord) {
        self.observers
            .lock()
            .retain(|tx| tx.send(vec![record.clone()]).is_ok());
    }
}

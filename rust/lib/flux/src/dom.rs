//! Minimal DOM surface the dispatcher needs.
//!
//! The browser binding implements `Element` and `EventTarget` over real
//! nodes. `VirtualDocument` / `VirtualElement` implement them in memory for
//! tests and headless embeddings.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use serde_json::Value;

/// DOM event types the dispatcher listens for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventType {
    Click,
    Change,
    Input,
}

impl EventType {
    pub const ALL: [EventType; 3] = [EventType::Click, EventType::Change, EventType::Input];

    /// DOM event name (`click`, `change`, `input`).
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Click => "click",
            EventType::Change => "change",
            EventType::Input => "input",
        }
    }

    /// Marker attribute whose value names the action for this event type.
    pub fn marker_attribute(&self) -> &'static str {
        match self {
            EventType::Click => "data-action",
            EventType::Change => "data-change-action",
            EventType::Input => "data-input-action",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared handle to an element.
pub type ElementRef = Arc<dyn Element>;

/// Read-only view of a DOM element.
pub trait Element: Send + Sync {
    fn tag_name(&self) -> &str;

    fn attribute(&self, name: &str) -> Option<&str>;

    fn parent_element(&self) -> Option<ElementRef>;
}

impl fmt::Debug for dyn Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}>", self.tag_name())
    }
}

/// An interaction event as delivered by the document.
#[derive(Clone, Debug)]
pub struct DomEvent {
    pub event_type: EventType,
    /// Original target. `None` for events not aimed at an element.
    pub target: Option<ElementRef>,
    /// Current value of a form control for change/input events.
    pub value: Option<Value>,
}

impl DomEvent {
    pub fn new(event_type: EventType, target: ElementRef) -> Self {
        Self {
            event_type,
            target: Some(target),
            value: None,
        }
    }

    pub fn click(target: ElementRef) -> Self {
        Self::new(EventType::Click, target)
    }

    pub fn with_value(mut self, value: impl Into<Value>) -> Self {
        self.value = Some(value.into());
        self
    }
}

/// Listener callback installed on an event target.
pub type Listener = Arc<dyn Fn(&DomEvent) + Send + Sync>;

/// Something listeners can be attached to (the document root).
pub trait EventTarget {
    fn add_event_listener(&self, event_type: EventType, listener: Listener, capture: bool);
}

// ============================================================================
// In-memory implementation
// ============================================================================

/// In-memory element with a fixed parent.
pub struct VirtualElement {
    tag: String,
    attributes: BTreeMap<String, String>,
    parent: Option<ElementRef>,
}

impl VirtualElement {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            attributes: BTreeMap::new(),
            parent: None,
        }
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attributes.insert(name.to_string(), value.to_string());
        self
    }

    pub fn child_of(mut self, parent: &ElementRef) -> Self {
        self.parent = Some(Arc::clone(parent));
        self
    }

    pub fn build(self) -> ElementRef {
        Arc::new(self)
    }
}

impl Element for VirtualElement {
    fn tag_name(&self) -> &str {
        &self.tag
    }

    fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    fn parent_element(&self) -> Option<ElementRef> {
        self.parent.clone()
    }
}

/// In-memory document root. Delivers events to its listeners, capture-phase
/// listeners first, each group in installation order.
#[derive(Default)]
pub struct VirtualDocument {
    listeners: RwLock<Vec<(EventType, bool, Listener)>>,
}

impl VirtualDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver an event to every listener registered for its type.
    pub fn dispatch_event(&self, event: &DomEvent) {
        let matching: Vec<(bool, Listener)> = self
            .listeners
            .read()
            .unwrap()
            .iter()
            .filter(|(ty, _, _)| *ty == event.event_type)
            .map(|(_, capture, l)| (*capture, Arc::clone(l)))
            .collect();
        for capture_phase in [true, false] {
            for (capture, listener) in &matching {
                if *capture == capture_phase {
                    listener(event);
                }
            }
        }
    }

    /// Number of listeners installed for `event_type`.
    pub fn listener_count(&self, event_type: EventType) -> usize {
        self.listeners
            .read()
            .unwrap()
            .iter()
            .filter(|(ty, _, _)| *ty == event_type)
            .count()
    }

    /// Number of capture-phase listeners installed for `event_type`.
    pub fn capture_listener_count(&self, event_type: EventType) -> usize {
        self.listeners
            .read()
            .unwrap()
            .iter()
            .filter(|(ty, capture, _)| *ty == event_type && *capture)
            .count()
    }
}

impl EventTarget for VirtualDocument {
    fn add_event_listener(&self, event_type: EventType, listener: Listener, capture: bool) {
        self.listeners
            .write()
            .unwrap()
            .push((event_type, capture, listener));
    }
}

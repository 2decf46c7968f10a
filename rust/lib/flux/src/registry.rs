use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::Value;

use crate::dom::{ElementRef, EventType};

/// What an action handler sees besides the marked element.
#[derive(Clone, Debug)]
pub struct ActionEvent {
    /// Action name that was resolved or triggered.
    pub action: String,
    /// Originating DOM event type; `None` for programmatic triggers.
    pub event_type: Option<EventType>,
    /// Original event target (may be a descendant of the marked element).
    pub target: Option<ElementRef>,
    /// Control value carried by change/input events.
    pub value: Option<Value>,
    /// Payload passed to `trigger`.
    pub data: Option<Value>,
    /// True when the event was synthesized by `trigger`.
    pub synthetic: bool,
}

impl ActionEvent {
    /// Event-like object for a programmatic trigger.
    pub fn synthetic(action: &str, data: Option<Value>) -> Self {
        Self {
            action: action.to_string(),
            event_type: None,
            target: None,
            value: None,
            data,
            synthetic: true,
        }
    }
}

/// Handler invoked for an action: `(marked element, event)`.
///
/// The element is `None` for programmatic triggers.
pub type ActionHandler =
    Arc<dyn Fn(Option<&ElementRef>, &ActionEvent) -> anyhow::Result<()> + Send + Sync>;

/// Wrap a closure as an `ActionHandler`.
///
/// Pins the closure's signature so argument types need no annotations.
pub fn action_handler<F>(f: F) -> ActionHandler
where
    F: Fn(Option<&ElementRef>, &ActionEvent) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Action name → handler table. One handler per name; later inserts replace
/// earlier ones.
#[derive(Default)]
pub struct ActionRegistry {
    handlers: RwLock<HashMap<String, ActionHandler>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `handler` under `name`. Returns true if it replaced another.
    pub fn insert(&self, name: &str, handler: ActionHandler) -> bool {
        self.handlers
            .write()
            .unwrap()
            .insert(name.to_string(), handler)
            .is_some()
    }

    /// Remove the handler for `name`. Returns true if one was present.
    pub fn remove(&self, name: &str) -> bool {
        self.handlers.write().unwrap().remove(name).is_some()
    }

    /// Cloned handle to the handler for `name`, so the caller can invoke it
    /// without holding the table lock.
    pub fn get(&self, name: &str) -> Option<ActionHandler> {
        self.handlers.read().unwrap().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.read().unwrap().contains_key(name)
    }

    /// Registered action names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.read().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.handlers.write().unwrap().clear();
    }
}

use std::sync::Arc;

use serde_json::Value;

use crate::config::FluxConfig;
use crate::dispatcher::ActionDispatcher;
use crate::dom::{ElementRef, EventTarget};
use crate::registry::ActionEvent;
use crate::storage::Storage;
use crate::store::{ReactiveStore, Unsubscribe};

/// Flux: one store and one dispatcher, owned together.
///
/// The two halves stay independent; `on` is the one place they meet, handing
/// the store to action handlers so a click can become a state write.
///
/// # Examples
///
/// ```ignore
/// let flux = Flux::in_memory();
/// flux.attach(&document);
///
/// flux.on("showLoginView", |store, _element, _event| {
///     store.set_state("view.current", "loginView");
///     Ok(())
/// });
///
/// flux.subscribe("view.current", |new, _old| render(new));
/// ```
#[derive(Clone)]
pub struct Flux {
    store: Arc<ReactiveStore>,
    dispatcher: Arc<ActionDispatcher>,
}

impl Flux {
    /// Open the store from `storage` and create an unattached dispatcher.
    pub fn new(storage: Option<Arc<dyn Storage>>, config: &FluxConfig) -> Self {
        Self::from_parts(
            Arc::new(ReactiveStore::open(storage, config)),
            Arc::new(ActionDispatcher::new()),
        )
    }

    /// Memory-only store plus a fresh dispatcher.
    pub fn in_memory() -> Self {
        Self::from_parts(
            Arc::new(ReactiveStore::in_memory()),
            Arc::new(ActionDispatcher::new()),
        )
    }

    pub fn from_parts(store: Arc<ReactiveStore>, dispatcher: Arc<ActionDispatcher>) -> Self {
        Self { store, dispatcher }
    }

    /// Attach the dispatcher's listeners to `document` (first call only).
    pub fn attach(&self, document: &dyn EventTarget) -> bool {
        self.dispatcher.attach(document)
    }

    // ====================================================================
    // State
    // ====================================================================

    pub fn get_state(&self, path: &str) -> Option<Value> {
        self.store.get_state(path)
    }

    pub fn set_state(&self, path: &str, value: impl Into<Value>) {
        self.store.set_state(path, value);
    }

    pub fn subscribe<F>(&self, path: &str, handler: F) -> Unsubscribe
    where
        F: Fn(&Value, Option<&Value>) + Send + Sync + 'static,
    {
        self.store.subscribe(path, handler)
    }

    // ====================================================================
    // Actions
    // ====================================================================

    /// Register an action handler that receives the store.
    pub fn on<F>(&self, action: &str, handler: F)
    where
        F: Fn(&ReactiveStore, Option<&ElementRef>, &ActionEvent) -> anyhow::Result<()>
            + Send
            + Sync
            + 'static,
    {
        self.dispatcher
            .register_with_context(action, Arc::clone(&self.store), handler);
    }

    pub fn trigger(&self, action: &str, data: Option<Value>) {
        self.dispatcher.trigger(action, data);
    }

    // ====================================================================
    // Advanced
    // ====================================================================

    pub fn store(&self) -> &Arc<ReactiveStore> {
        &self.store
    }

    pub fn dispatcher(&self) -> &Arc<ActionDispatcher> {
        &self.dispatcher
    }
}

impl Default for Flux {
    fn default() -> Self {
        Self::in_memory()
    }
}

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, warn};

use crate::dom::{DomEvent, ElementRef, EventTarget, EventType, Listener};
use crate::error::{panic_message, DispatchError};
use crate::registry::{action_handler, ActionEvent, ActionHandler, ActionRegistry};

/// Handler that receives a bound context as its first argument.
pub type ContextHandler<C> =
    Arc<dyn Fn(&C, Option<&ElementRef>, &ActionEvent) -> anyhow::Result<()> + Send + Sync>;

/// Wrap a closure as a `ContextHandler`.
pub fn context_handler<C, F>(f: F) -> ContextHandler<C>
where
    F: Fn(&C, Option<&ElementRef>, &ActionEvent) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Routes DOM interaction events to named action handlers.
///
/// One capturing listener per `EventType` is installed on the document by
/// `attach`. Each event walks from its target up to the nearest element
/// carrying that event type's marker attribute; the attribute value names
/// the action whose handler runs with `(marked element, event)`.
///
/// Handler errors and panics are logged and swallowed, so one broken
/// handler never stops the listener from serving the next event.
///
/// # Examples
///
/// ```ignore
/// let dispatcher = Arc::new(ActionDispatcher::new());
/// dispatcher.attach(&document);
///
/// dispatcher.register("showLoginView", |element, _event| {
///     store.set_state("view.current", "loginView");
///     Ok(())
/// });
///
/// // <button data-action="showLoginView"><span>Log in</span></button>
/// // A click on the span runs the handler with the button as `element`.
/// ```
#[derive(Default)]
pub struct ActionDispatcher {
    registry: ActionRegistry,
    active: AtomicBool,
}

impl ActionDispatcher {
    /// Create an uninitialized dispatcher with an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    // ====================================================================
    // Lifecycle
    // ====================================================================

    /// Install one capture-phase listener per event type on `document`.
    ///
    /// Only the first call installs anything; later calls return `false`.
    /// Listeners hold a weak reference, so dropping the dispatcher turns them
    /// into no-ops.
    pub fn attach(self: &Arc<Self>, document: &dyn EventTarget) -> bool {
        if self
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("action dispatcher already attached");
            return false;
        }
        for event_type in EventType::ALL {
            let weak = Arc::downgrade(self);
            let listener: Listener = Arc::new(move |event: &DomEvent| {
                if let Some(dispatcher) = weak.upgrade() {
                    dispatcher.handle_event(event);
                }
            });
            document.add_event_listener(event_type, listener, true);
        }
        debug!("action dispatcher attached");
        true
    }

    /// True once listeners are installed.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    // ====================================================================
    // Registration
    // ====================================================================

    /// Register `handler` for `action`, replacing any existing one.
    ///
    /// An empty action name is logged and ignored.
    pub fn register<F>(&self, action: &str, handler: F)
    where
        F: Fn(Option<&ElementRef>, &ActionEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        if let Err(e) = self.try_register(action, Arc::new(handler)) {
            warn!(error = %e, "action registration rejected");
        }
    }

    /// Register `handler` with `context` bound as its first argument.
    pub fn register_with_context<C, F>(&self, action: &str, context: Arc<C>, handler: F)
    where
        C: Send + Sync + 'static,
        F: Fn(&C, Option<&ElementRef>, &ActionEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let bound = action_handler(move |element, event| handler(context.as_ref(), element, event));
        if let Err(e) = self.try_register(action, bound) {
            warn!(error = %e, "action registration rejected");
        }
    }

    /// Register every `(action, handler)` pair. Returns how many were accepted.
    pub fn register_multiple<I, K>(&self, handlers: I) -> usize
    where
        I: IntoIterator<Item = (K, ActionHandler)>,
        K: AsRef<str>,
    {
        let mut accepted = 0;
        for (action, handler) in handlers {
            match self.try_register(action.as_ref(), handler) {
                Ok(_) => accepted += 1,
                Err(e) => warn!(error = %e, "action registration rejected"),
            }
        }
        accepted
    }

    /// `register_multiple` with one shared context bound into every handler.
    pub fn register_multiple_with_context<C, I, K>(&self, context: Arc<C>, handlers: I) -> usize
    where
        C: Send + Sync + 'static,
        I: IntoIterator<Item = (K, ContextHandler<C>)>,
        K: AsRef<str>,
    {
        let bound = handlers.into_iter().map(|(action, handler)| {
            let context = Arc::clone(&context);
            let bound = action_handler(move |element, event| handler(context.as_ref(), element, event));
            (action, bound)
        });
        self.register_multiple(bound)
    }

    /// Validate and store a handler. Returns whether it replaced another.
    pub fn try_register(&self, action: &str, handler: ActionHandler) -> Result<bool, DispatchError> {
        validate_action_name(action)?;
        let replaced = self.registry.insert(action, handler);
        if replaced {
            debug!(action, "action handler replaced");
        }
        Ok(replaced)
    }

    /// Remove the handler for `action`. A missing handler is logged only.
    pub fn unregister(&self, action: &str) {
        if let Err(e) = self.try_unregister(action) {
            debug!(error = %e, "unregister ignored");
        }
    }

    pub fn try_unregister(&self, action: &str) -> Result<(), DispatchError> {
        if self.registry.remove(action) {
            Ok(())
        } else {
            Err(DispatchError::NotRegistered(action.to_string()))
        }
    }

    /// Remove every handler.
    pub fn clear_all(&self) {
        self.registry.clear();
    }

    // ====================================================================
    // Introspection
    // ====================================================================

    pub fn has_handler(&self, action: &str) -> bool {
        self.registry.contains(action)
    }

    /// Registered action names, sorted.
    pub fn registered_actions(&self) -> Vec<String> {
        self.registry.names()
    }

    pub fn handler_count(&self) -> usize {
        self.registry.len()
    }

    // ====================================================================
    // Dispatch
    // ====================================================================

    /// Find the nearest element (target inclusive) carrying the marker
    /// attribute for `event`'s type, with the action name it names.
    pub fn resolve(&self, event: &DomEvent) -> Option<(ElementRef, String)> {
        let marker = event.event_type.marker_attribute();
        let mut current = event.target.clone();
        while let Some(element) = current {
            if let Some(action) = element.attribute(marker).map(str::to_string) {
                return Some((element, action));
            }
            current = element.parent_element();
        }
        None
    }

    /// Listener entry point: resolve, then invoke. Never panics.
    pub fn handle_event(&self, event: &DomEvent) {
        match self.try_handle_event(event) {
            Ok(_) => {}
            Err(DispatchError::NotRegistered(action)) => {
                debug!(action = %action, event = %event.event_type, "no handler for action");
            }
            Err(e) => error!(error = %e, event = %event.event_type, "action handler failed"),
        }
    }

    /// Resolve and invoke, surfacing the outcome.
    ///
    /// `Ok(None)` means no marked ancestor; `Ok(Some(action))` means the
    /// handler for `action` ran to completion.
    pub fn try_handle_event(&self, event: &DomEvent) -> Result<Option<String>, DispatchError> {
        let Some((element, action)) = self.resolve(event) else {
            return Ok(None);
        };
        let action_event = ActionEvent {
            action: action.clone(),
            event_type: Some(event.event_type),
            target: event.target.clone(),
            value: event.value.clone(),
            data: None,
            synthetic: false,
        };
        self.invoke(&action, Some(&element), &action_event)?;
        Ok(Some(action))
    }

    /// Run the handler for `action` programmatically with a synthetic event
    /// and no element. Failures are logged.
    pub fn trigger(&self, action: &str, data: Option<Value>) {
        match self.try_trigger(action, data) {
            Ok(()) => {}
            Err(DispatchError::NotRegistered(action)) => {
                debug!(action = %action, "trigger for unregistered action");
            }
            Err(e) => error!(error = %e, "triggered action failed"),
        }
    }

    pub fn try_trigger(&self, action: &str, data: Option<Value>) -> Result<(), DispatchError> {
        let event = ActionEvent::synthetic(action, data);
        self.invoke(action, None, &event)
    }

    fn invoke(
        &self,
        action: &str,
        element: Option<&ElementRef>,
        event: &ActionEvent,
    ) -> Result<(), DispatchError> {
        let handler = self
            .registry
            .get(action)
            .ok_or_else(|| DispatchError::NotRegistered(action.to_string()))?;
        match catch_unwind(AssertUnwindSafe(|| handler(element, event))) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(DispatchError::HandlerFailed {
                action: action.to_string(),
                source,
            }),
            Err(payload) => Err(DispatchError::HandlerPanicked {
                action: action.to_string(),
                message: panic_message(payload.as_ref()),
            }),
        }
    }
}

fn validate_action_name(action: &str) -> Result<(), DispatchError> {
    if action.trim().is_empty() {
        return Err(DispatchError::InvalidActionName(action.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::{VirtualDocument, VirtualElement};
    use std::sync::atomic::AtomicU64;
    use std::sync::Mutex;

    fn attached() -> (Arc<ActionDispatcher>, VirtualDocument) {
        let dispatcher = Arc::new(ActionDispatcher::new());
        let doc = VirtualDocument::new();
        assert!(dispatcher.attach(&doc));
        (dispatcher, doc)
    }

    fn counter(dispatcher: &ActionDispatcher, action: &str) -> Arc<AtomicU64> {
        let count = Arc::new(AtomicU64::new(0));
        let c = count.clone();
        dispatcher.register(action, move |_, _| {
            c.fetch_add(1, Ordering::Relaxed);
            Ok(())
        });
        count
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    #[test]
    fn attach_installs_one_capture_listener_per_type() {
        let (dispatcher, doc) = attached();
        assert!(dispatcher.is_active());
        assert!(!dispatcher.attach(&doc));
        for ty in EventType::ALL {
            assert_eq!(doc.listener_count(ty), 1, "{ty}");
            assert_eq!(doc.capture_listener_count(ty), 1, "{ty}");
        }
    }

    #[test]
    fn new_dispatcher_is_inactive() {
        let dispatcher = ActionDispatcher::new();
        assert!(!dispatcher.is_active());
        assert_eq!(dispatcher.handler_count(), 0);
    }

    #[test]
    fn registration_before_attach_is_honored() {
        let dispatcher = Arc::new(ActionDispatcher::new());
        let count = counter(&dispatcher, "addToCart");

        let doc = VirtualDocument::new();
        dispatcher.attach(&doc);
        let button = VirtualElement::new("button").attr("data-action", "addToCart").build();
        doc.dispatch_event(&DomEvent::click(button));

        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn dropped_dispatcher_leaves_inert_listeners() {
        let (dispatcher, doc) = attached();
        drop(dispatcher);
        let button = VirtualElement::new("button").attr("data-action", "x").build();
        doc.dispatch_event(&DomEvent::click(button));
    }

    // ========================================================================
    // Resolution
    // ========================================================================

    #[test]
    fn click_on_descendant_resolves_marked_ancestor() {
        let (dispatcher, doc) = attached();
        let seen: Arc<Mutex<Vec<(String, String)>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_c = seen.clone();
        dispatcher.register("showLoginView", move |element, event| {
            let element = element.expect("dom dispatch passes the marked element");
            let target = event.target.as_ref().expect("dom dispatch keeps the target");
            seen_c
                .lock()
                .unwrap()
                .push((element.tag_name().to_string(), target.tag_name().to_string()));
            Ok(())
        });

        let button = VirtualElement::new("button")
            .attr("data-action", "showLoginView")
            .build();
        let icon = VirtualElement::new("svg").child_of(&button).build();
        let path = VirtualElement::new("path").child_of(&icon).build();
        doc.dispatch_event(&DomEvent::click(path));

        assert_eq!(
            *seen.lock().unwrap(),
            vec![("button".to_string(), "path".to_string())]
        );
    }

    #[test]
    fn click_without_marked_ancestor_invokes_nothing() {
        let (dispatcher, doc) = attached();
        let count = counter(&dispatcher, "foo");

        let div = VirtualElement::new("div").build();
        let span = VirtualElement::new("span").child_of(&div).build();
        doc.dispatch_event(&DomEvent::click(span.clone()));

        assert_eq!(count.load(Ordering::Relaxed), 0);
        assert!(dispatcher.resolve(&DomEvent::click(span)).is_none());
    }

    #[test]
    fn nearest_marker_wins() {
        let (dispatcher, doc) = attached();
        let outer = counter(&dispatcher, "outer");
        let inner = counter(&dispatcher, "inner");

        let card = VirtualElement::new("div").attr("data-action", "outer").build();
        let button = VirtualElement::new("button")
            .attr("data-action", "inner")
            .child_of(&card)
            .build();
        doc.dispatch_event(&DomEvent::click(button));

        assert_eq!(inner.load(Ordering::Relaxed), 1);
        assert_eq!(outer.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn marker_is_per_event_type() {
        let (dispatcher, doc) = attached();
        let clicks = counter(&dispatcher, "selectSize");
        let changes = counter(&dispatcher, "changeSize");
        let inputs = counter(&dispatcher, "searchProducts");

        let select = VirtualElement::new("select")
            .attr("data-action", "selectSize")
            .attr("data-change-action", "changeSize")
            .build();
        let search = VirtualElement::new("input")
            .attr("data-input-action", "searchProducts")
            .build();

        doc.dispatch_event(&DomEvent::new(EventType::Change, select.clone()));
        doc.dispatch_event(&DomEvent::new(EventType::Input, select));
        doc.dispatch_event(&DomEvent::click(search.clone()));
        doc.dispatch_event(&DomEvent::new(EventType::Input, search).with_value("shoes"));

        assert_eq!(clicks.load(Ordering::Relaxed), 0);
        assert_eq!(changes.load(Ordering::Relaxed), 1);
        assert_eq!(inputs.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn input_value_reaches_handler() {
        let (dispatcher, doc) = attached();
        let seen = Arc::new(Mutex::new(None));
        let seen_c = seen.clone();
        dispatcher.register("searchProducts", move |_, event| {
            *seen_c.lock().unwrap() = event.value.clone();
            Ok(())
        });

        let search = VirtualElement::new("input")
            .attr("data-input-action", "searchProducts")
            .build();
        doc.dispatch_event(&DomEvent::new(EventType::Input, search).with_value("boots"));
        assert_eq!(*seen.lock().unwrap(), Some(Value::from("boots")));
    }

    #[test]
    fn unregistered_action_is_noop() {
        let (dispatcher, doc) = attached();
        let button = VirtualElement::new("button").attr("data-action", "ghost").build();
        doc.dispatch_event(&DomEvent::click(button.clone()));
        assert!(matches!(
            dispatcher.try_handle_event(&DomEvent::click(button)),
            Err(DispatchError::NotRegistered(a)) if a == "ghost"
        ));
    }

    #[test]
    fn try_handle_event_reports_outcome() {
        let dispatcher = ActionDispatcher::new();
        counter(&dispatcher, "ok");
        let ok = VirtualElement::new("a").attr("data-action", "ok").build();
        let plain = VirtualElement::new("a").build();

        assert_eq!(
            dispatcher.try_handle_event(&DomEvent::click(ok)).unwrap(),
            Some("ok".to_string())
        );
        assert_eq!(dispatcher.try_handle_event(&DomEvent::click(plain)).unwrap(), None);
    }

    // ========================================================================
    // Failure containment
    // ========================================================================

    #[test]
    fn failing_handler_does_not_block_next_event() {
        let (dispatcher, doc) = attached();
        dispatcher.register("boom", |_, _| Err(anyhow::anyhow!("payment widget missing")));
        let ok = counter(&dispatcher, "ok");

        let boom = VirtualElement::new("button").attr("data-action", "boom").build();
        let fine = VirtualElement::new("button").attr("data-action", "ok").build();
        doc.dispatch_event(&DomEvent::click(boom.clone()));
        doc.dispatch_event(&DomEvent::click(fine));

        assert_eq!(ok.load(Ordering::Relaxed), 1);
        assert!(matches!(
            dispatcher.try_handle_event(&DomEvent::click(boom)),
            Err(DispatchError::HandlerFailed { action, .. }) if action == "boom"
        ));
    }

    #[test]
    fn panicking_handler_is_contained() {
        let (dispatcher, doc) = attached();
        dispatcher.register("boom", |_, _| panic!("handler exploded"));
        let ok = counter(&dispatcher, "ok");

        let boom = VirtualElement::new("button").attr("data-action", "boom").build();
        let fine = VirtualElement::new("button").attr("data-action", "ok").build();
        doc.dispatch_event(&DomEvent::click(boom.clone()));
        doc.dispatch_event(&DomEvent::click(fine));
        doc.dispatch_event(&DomEvent::click(boom.clone()));

        assert_eq!(ok.load(Ordering::Relaxed), 1);
        match dispatcher.try_handle_event(&DomEvent::click(boom)) {
            Err(DispatchError::HandlerPanicked { action, message }) => {
                assert_eq!(action, "boom");
                assert_eq!(message, "handler exploded");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    // ========================================================================
    // Registration
    // ========================================================================

    #[test]
    fn reregister_replaces_handler() {
        let (dispatcher, doc) = attached();
        let first = counter(&dispatcher, "foo");
        let second = counter(&dispatcher, "foo");

        dispatcher.trigger("foo", None);
        let el = VirtualElement::new("a").attr("data-action", "foo").build();
        doc.dispatch_event(&DomEvent::click(el));

        assert_eq!(first.load(Ordering::Relaxed), 0);
        assert_eq!(second.load(Ordering::Relaxed), 2);
        assert_eq!(dispatcher.handler_count(), 1);
    }

    #[test]
    fn empty_action_name_rejected() {
        let dispatcher = ActionDispatcher::new();
        dispatcher.register("", |_, _| Ok(()));
        dispatcher.register("   ", |_, _| Ok(()));
        assert_eq!(dispatcher.handler_count(), 0);
        assert!(matches!(
            dispatcher.try_register("", action_handler(|_, _| Ok(()))),
            Err(DispatchError::InvalidActionName(_))
        ));
    }

    #[test]
    fn action_names_are_case_sensitive() {
        let dispatcher = ActionDispatcher::new();
        let lower = counter(&dispatcher, "checkout");
        dispatcher.trigger("Checkout", None);
        assert_eq!(lower.load(Ordering::Relaxed), 0);
        assert!(!dispatcher.has_handler("Checkout"));
    }

    #[test]
    fn register_with_context_binds_context() {
        struct Cart {
            items: Mutex<Vec<String>>,
        }

        let dispatcher = ActionDispatcher::new();
        let cart = Arc::new(Cart {
            items: Mutex::new(Vec::new()),
        });
        dispatcher.register_with_context("addToCart", cart.clone(), |cart, _, event| {
            let sku = event
                .data
                .as_ref()
                .and_then(Value::as_str)
                .ok_or_else(|| anyhow::anyhow!("missing sku"))?;
            cart.items.lock().unwrap().push(sku.to_string());
            Ok(())
        });

        dispatcher.trigger("addToCart", Some(Value::from("SKU-1")));
        dispatcher.trigger("addToCart", None);
        assert_eq!(*cart.items.lock().unwrap(), vec!["SKU-1".to_string()]);
    }

    #[test]
    fn register_multiple_counts_accepted() {
        let dispatcher = ActionDispatcher::new();
        let accepted = dispatcher.register_multiple([
            ("showHomeView", action_handler(|_, _| Ok(()))),
            ("showCartView", action_handler(|_, _| Ok(()))),
            ("", action_handler(|_, _| Ok(()))),
        ]);
        assert_eq!(accepted, 2);
        assert_eq!(
            dispatcher.registered_actions(),
            vec!["showCartView".to_string(), "showHomeView".to_string()]
        );
    }

    #[test]
    fn register_multiple_with_context() {
        let dispatcher = ActionDispatcher::new();
        let log = Arc::new(Mutex::new(Vec::<String>::new()));

        let push_a = context_handler(|log: &Mutex<Vec<String>>, _, _| {
            log.lock().unwrap().push("a".into());
            Ok(())
        });
        let push_b = context_handler(|log: &Mutex<Vec<String>>, _, _| {
            log.lock().unwrap().push("b".into());
            Ok(())
        });
        let accepted =
            dispatcher.register_multiple_with_context(log.clone(), [("a", push_a), ("b", push_b)]);

        assert_eq!(accepted, 2);
        dispatcher.trigger("b", None);
        dispatcher.trigger("a", None);
        assert_eq!(*log.lock().unwrap(), vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn unregister_and_clear() {
        let dispatcher = ActionDispatcher::new();
        counter(&dispatcher, "a");
        counter(&dispatcher, "b");

        dispatcher.unregister("a");
        assert!(!dispatcher.has_handler("a"));
        dispatcher.unregister("a");
        assert!(matches!(
            dispatcher.try_unregister("a"),
            Err(DispatchError::NotRegistered(_))
        ));

        dispatcher.clear_all();
        assert_eq!(dispatcher.handler_count(), 0);
        assert!(dispatcher.registered_actions().is_empty());
    }

    #[test]
    fn handler_may_register_during_dispatch() {
        let dispatcher = Arc::new(ActionDispatcher::new());
        let weak = Arc::downgrade(&dispatcher);
        dispatcher.register("init", move |_, _| {
            if let Some(d) = weak.upgrade() {
                d.register("late", |_, _| Ok(()));
                d.trigger("late", None);
            }
            Ok(())
        });
        dispatcher.trigger("init", None);
        assert!(dispatcher.has_handler("late"));
    }

    // ========================================================================
    // Trigger
    // ========================================================================

    #[test]
    fn trigger_passes_synthetic_event_and_no_element() {
        let dispatcher = ActionDispatcher::new();
        let seen = Arc::new(Mutex::new(None));
        let seen_c = seen.clone();
        dispatcher.register("refreshStats", move |element, event| {
            *seen_c.lock().unwrap() = Some((element.is_none(), event.synthetic, event.data.clone()));
            Ok(())
        });

        dispatcher.trigger("refreshStats", Some(Value::from(42)));
        assert_eq!(
            *seen.lock().unwrap(),
            Some((true, true, Some(Value::from(42))))
        );
    }

    #[test]
    fn trigger_unknown_is_logged_noop() {
        let dispatcher = ActionDispatcher::new();
        dispatcher.trigger("nothing", None);
        assert!(matches!(
            dispatcher.try_trigger("nothing", None),
            Err(DispatchError::NotRegistered(_))
        ));
    }
}

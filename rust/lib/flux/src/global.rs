//! Process-wide instances.
//!
//! Independently-loaded modules reach the shared store and dispatcher
//! through these accessors instead of passing handles around. Installation
//! is idempotent: whichever module installs first wins, and every later call
//! gets the same instance back with its state and subscriptions intact.
//!
//! Load order does not decide persistence. If a module reads `store()` before
//! the bootstrap calls `install_store`, the memory-only store created then
//! picks up the installer's storage and rehydrates from it.
//!
//! `state_manager()` is the compatibility alias for `store()` used by legacy
//! consumers. It resolves to the same `Arc`, not a copy.

use std::sync::Arc;

use once_cell::sync::{Lazy, OnceCell};
use tracing::{debug, warn};

use crate::config::FluxConfig;
use crate::dispatcher::ActionDispatcher;
use crate::dom::EventTarget;
use crate::storage::Storage;
use crate::store::ReactiveStore;

static STORE: OnceCell<Arc<ReactiveStore>> = OnceCell::new();

static DISPATCHER: Lazy<Arc<ActionDispatcher>> = Lazy::new(|| Arc::new(ActionDispatcher::new()));

/// Install the process-wide store, or return the one already installed.
///
/// When the store already exists without storage, `storage` is attached to
/// it (see [`ReactiveStore::attach_storage`]). Storage offered to a store
/// that already persists is ignored with a warning.
pub fn install_store(storage: Option<Arc<dyn Storage>>, config: &FluxConfig) -> Arc<ReactiveStore> {
    let mut storage = storage;
    let mut installed = false;
    let store = STORE.get_or_init(|| {
        installed = true;
        Arc::new(ReactiveStore::open(storage.take(), config))
    });
    if installed {
        debug!(key = %store.storage_key(), "global store installed");
        return Arc::clone(store);
    }
    match storage {
        None => debug!("global store already installed, keeping existing state"),
        Some(storage) => {
            if store.attach_storage(storage, config) {
                debug!(key = %store.storage_key(), "storage attached to global store created before install");
            } else if config.persist {
                warn!(
                    key = %store.storage_key(),
                    "global store already persists, ignoring storage passed to install_store"
                );
            }
        }
    }
    Arc::clone(store)
}

/// The process-wide store. Installs a memory-only store if none exists yet.
pub fn store() -> Arc<ReactiveStore> {
    Arc::clone(STORE.get_or_init(|| {
        debug!("global store accessed before install, using memory-only store");
        Arc::new(ReactiveStore::in_memory())
    }))
}

/// Compatibility alias for [`store`].
pub fn state_manager() -> Arc<ReactiveStore> {
    store()
}

/// The process-wide dispatcher (possibly not yet attached).
pub fn dispatcher() -> Arc<ActionDispatcher> {
    Arc::clone(&DISPATCHER)
}

/// Attach the process-wide dispatcher to `document` and return it.
///
/// Only the first call installs listeners.
pub fn install_dispatcher(document: &dyn EventTarget) -> Arc<ActionDispatcher> {
    let dispatcher = dispatcher();
    dispatcher.attach(document);
    dispatcher
}

//! Storefront Flux: reactive state store and action dispatcher.
//!
//! The storefront and admin console are built from many independently
//! loaded modules with no component tree. They coordinate through two
//! shared primitives:
//!
//! - [`ReactiveStore`]: one nested state tree, read and written by dotted
//!   path, with per-path change subscriptions and snapshot persistence.
//! - [`ActionDispatcher`]: one capturing listener per DOM event type that
//!   resolves the nearest marked ancestor and runs the handler registered
//!   under its action name.
//!
//! # Path Addressing
//!
//! State paths use `.` as separator and descend through nested objects:
//! - `user.isAuthenticated`
//! - `view.current`
//! - `admin.stats.totalUsers`
//!
//! Reading a path whose intermediate segment is missing yields `None`.
//!
//! # Marker Attributes
//!
//! | Event    | Attribute            |
//! |----------|----------------------|
//! | `click`  | `data-action`        |
//! | `change` | `data-change-action` |
//! | `input`  | `data-input-action`  |
//!
//! # Example
//!
//! ```ignore
//! use storefront_flux::{global, FluxConfig};
//!
//! let store = global::install_store(storage, &FluxConfig::default());
//! let dispatcher = global::install_dispatcher(&document);
//!
//! dispatcher.register("showLoginView", move |_element, _event| {
//!     global::store().set_state("view.current", "loginView");
//!     Ok(())
//! });
//!
//! store.subscribe("view.current", |new, old| {
//!     println!("view {:?} -> {}", old, new);
//! });
//! ```

pub mod app;
pub mod config;
pub mod dispatcher;
pub mod dom;
pub mod error;
pub mod global;
pub mod path;
pub mod registry;
pub mod storage;
pub mod store;
pub mod value;

// Re-export primary types at crate root.
pub use app::Flux;
pub use config::{FluxConfig, DEFAULT_STORAGE_KEY};
pub use dispatcher::{context_handler, ActionDispatcher, ContextHandler};
pub use dom::{DomEvent, Element, ElementRef, EventTarget, EventType, Listener, VirtualDocument, VirtualElement};
pub use error::{DispatchError, StorageError, StoreError};
pub use path::StatePath;
pub use registry::{action_handler, ActionEvent, ActionHandler, ActionRegistry};
pub use storage::{MemoryStorage, RedbStorage, Storage};
pub use store::{ChangeHandler, ReactiveStore, Unsubscribe};
pub use value::{default_state, deep_merge, SubscriptionId};

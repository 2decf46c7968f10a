use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::config::FluxConfig;
use crate::error::{panic_message, StorageError, StoreError};
use crate::path::StatePath;
use crate::storage::Storage;
use crate::value::{deep_merge, default_state, get_in, set_in, SubscriptionId};

/// Callback type for state change notifications: `(new_value, old_value)`.
///
/// `old_value` is `None` when nothing was stored at the path before the write.
pub type ChangeHandler = Arc<dyn Fn(&Value, Option<&Value>) + Send + Sync>;

#[derive(Clone)]
struct HandlerEntry {
    id: SubscriptionId,
    handler: ChangeHandler,
}

/// Subscriber table, shared with `Unsubscribe` guards through a `Weak`.
#[derive(Default)]
struct Subscribers {
    by_path: RwLock<HashMap<String, Vec<HandlerEntry>>>,
}

impl Subscribers {
    fn remove(&self, path: &str, id: SubscriptionId) -> bool {
        let mut by_path = self.by_path.write().unwrap();
        let Some(entries) = by_path.get_mut(path) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            by_path.remove(path);
        }
        removed
    }
}

/// Handle returned by `ReactiveStore::subscribe`.
///
/// `unsubscribe()` removes exactly the registration that produced this
/// handle. Dropping the handle without calling it leaves the subscription in
/// place.
#[derive(Clone)]
pub struct Unsubscribe {
    path: String,
    id: SubscriptionId,
    subscribers: Weak<Subscribers>,
}

impl Unsubscribe {
    /// Remove the subscription. Calling this more than once is a no-op.
    ///
    /// Returns `true` if a registration was removed by this call.
    pub fn unsubscribe(&self) -> bool {
        match self.subscribers.upgrade() {
            Some(subscribers) => subscribers.remove(&self.path, self.id),
            None => false,
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Path-addressable reactive state store.
///
/// Holds one nested JSON tree addressed by dotted paths:
///
/// - `get_state(path)` reads a clone of the value at a path.
/// - `set_state(path, value)` writes, persists the whole tree, then
///   synchronously notifies subscribers of exactly that path.
/// - `subscribe(path, handler)` registers a `(new, old)` change handler.
///
/// Writes are applied and persisted one at a time. Subscribers run after
/// the write gate is released, so a handler may call `set_state` itself, or
/// hand a write to another thread and wait for it. Notifications of writes
/// made concurrently from different threads may interleave; each one still
/// carries the `(new, old)` pair of its own write.
///
/// Writing the path you are subscribed to from inside your own handler
/// recurses without bound; avoiding that is up to the caller.
pub struct ReactiveStore {
    state: RwLock<Value>,
    subscribers: Arc<Subscribers>,
    next_id: AtomicU64,
    persistence: RwLock<Persistence>,
    degraded: AtomicBool,
    write_gate: Mutex<()>,
}

/// Where snapshots go. Storage may be attached after the store was opened.
struct Persistence {
    storage: Option<Arc<dyn Storage>>,
    key: String,
}

impl ReactiveStore {
    /// Open a store, rehydrating from `storage` when persistence is enabled.
    ///
    /// A persisted snapshot is merged over the default shape. A missing,
    /// unreadable or malformed snapshot falls back to the defaults.
    pub fn open(storage: Option<Arc<dyn Storage>>, config: &FluxConfig) -> Self {
        let storage = storage.filter(|_| config.persist);
        let state = match storage
            .as_deref()
            .and_then(|storage| read_snapshot(storage, &config.storage_key))
        {
            Some(persisted) => deep_merge(&default_state(), &persisted),
            None => default_state(),
        };
        Self {
            state: RwLock::new(state),
            subscribers: Arc::new(Subscribers::default()),
            next_id: AtomicU64::new(1),
            persistence: RwLock::new(Persistence {
                storage,
                key: config.storage_key.clone(),
            }),
            degraded: AtomicBool::new(false),
            write_gate: Mutex::new(()),
        }
    }

    /// Open a memory-only store seeded with the defaults.
    pub fn in_memory() -> Self {
        let config = FluxConfig {
            persist: false,
            ..FluxConfig::default()
        };
        Self::open(None, &config)
    }

    // ====================================================================
    // Read
    // ====================================================================

    /// Read the value at `path`.
    ///
    /// Returns `None` for a malformed path or when any segment is absent.
    /// The returned value is a clone; mutating it does not touch the store.
    pub fn get_state(&self, path: &str) -> Option<Value> {
        let path = match StatePath::parse(path) {
            Ok(path) => path,
            Err(e) => {
                debug!(error = %e, "get_state on malformed path");
                return None;
            }
        };
        let state = self.state.read().unwrap();
        get_in(&state, &path).cloned()
    }

    /// Read and deserialize the value at `path`.
    pub fn get_as<T: DeserializeOwned>(&self, path: &str) -> Option<T> {
        let value = self.get_state(path)?;
        match serde_json::from_value(value) {
            Ok(v) => Some(v),
            Err(e) => {
                debug!(path, error = %e, "get_as type mismatch");
                None
            }
        }
    }

    /// Check if a value exists at the given path.
    pub fn contains(&self, path: &str) -> bool {
        self.get_state(path).is_some()
    }

    /// Clone of the whole state tree.
    pub fn snapshot(&self) -> Value {
        self.state.read().unwrap().clone()
    }

    // ====================================================================
    // Write
    // ====================================================================

    /// Write `value` at `path`, persist, and notify subscribers of `path`.
    ///
    /// Never fails from the caller's point of view: a malformed path is
    /// logged and ignored, and a storage failure leaves the write in memory.
    pub fn set_state(&self, path: &str, value: impl Into<Value>) {
        if let Err(e) = self.try_set_state(path, value) {
            warn!(error = %e, "set_state rejected");
        }
    }

    /// Serialize `value` to JSON and write it at `path`.
    pub fn set_json<T: Serialize + ?Sized>(&self, path: &str, value: &T) {
        let result = serde_json::to_value(value)
            .map_err(StoreError::from)
            .and_then(|value| self.try_set_state(path, value));
        if let Err(e) = result {
            warn!(path, error = %e, "set_json rejected");
        }
    }

    /// `set_state` with the rejection reason surfaced.
    ///
    /// Persistence failure is not an error here: the in-memory write has
    /// happened and `persistence_degraded()` reports the fallback.
    pub fn try_set_state(&self, path: &str, value: impl Into<Value>) -> Result<(), StoreError> {
        let path = StatePath::parse(path)?;
        let value = value.into();

        let old = {
            let _gate = self.write_gate.lock();
            let old = {
                let mut state = self.state.write().unwrap();
                set_in(&mut state, &path, value.clone())
            };
            self.persist_best_effort();
            old
        };
        self.notify(&path, &value, old.as_ref());
        Ok(())
    }

    /// Write the whole tree to storage now.
    ///
    /// A no-op when the store has no storage or persistence is disabled.
    pub fn persist(&self) -> Result<(), StorageError> {
        let (storage, key) = {
            let persistence = self.persistence.read().unwrap();
            match persistence.storage.as_ref() {
                Some(storage) => (Arc::clone(storage), persistence.key.clone()),
                None => return Ok(()),
            }
        };
        let snapshot = {
            let state = self.state.read().unwrap();
            serde_json::to_string(&*state).map_err(|e| StorageError::Backend(e.to_string()))?
        };
        storage.set_item(&key, &snapshot)
    }

    /// Attach `storage` to a store that was opened without any.
    ///
    /// The persisted snapshot is merged over the live tree (persisted leaves
    /// win, live-only paths are kept), the merged tree is written back, and
    /// subscribers of every path whose value changed are notified. Returns
    /// `false` and changes nothing when the store already persists or
    /// `config.persist` is off.
    pub fn attach_storage(&self, storage: Arc<dyn Storage>, config: &FluxConfig) -> bool {
        if !config.persist {
            debug!(key = %config.storage_key, "persistence disabled, storage not attached");
            return false;
        }
        let changed = {
            let _gate = self.write_gate.lock();
            {
                let mut persistence = self.persistence.write().unwrap();
                if persistence.storage.is_some() {
                    return false;
                }
                persistence.storage = Some(Arc::clone(&storage));
                persistence.key = config.storage_key.clone();
            }
            let changed = match read_snapshot(storage.as_ref(), &config.storage_key) {
                Some(persisted) => {
                    let mut state = self.state.write().unwrap();
                    let merged = deep_merge(&state, &persisted);
                    let before = std::mem::replace(&mut *state, merged);
                    self.changed_subscriptions(&before, &state)
                }
                None => Vec::new(),
            };
            self.persist_best_effort();
            changed
        };
        debug!(key = %config.storage_key, notified = changed.len(), "storage attached");
        for (path, new, old) in changed {
            self.notify(&path, &new, old.as_ref());
        }
        true
    }

    /// True when writes are being persisted to a storage backend.
    pub fn is_persistent(&self) -> bool {
        self.persistence.read().unwrap().storage.is_some()
    }

    /// True while the last persistence attempt failed.
    pub fn persistence_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    pub fn storage_key(&self) -> String {
        self.persistence.read().unwrap().key.clone()
    }

    fn persist_best_effort(&self) {
        match self.persist() {
            Ok(()) => {
                if self.degraded.swap(false, Ordering::Relaxed) {
                    debug!(key = %self.storage_key(), "state persistence recovered");
                }
            }
            Err(e) => {
                if self.degraded.swap(true, Ordering::Relaxed) {
                    debug!(key = %self.storage_key(), error = %e, "state persistence still failing");
                } else {
                    warn!(
                        key = %self.storage_key(),
                        error = %e,
                        "state persistence failed, continuing in memory"
                    );
                }
            }
        }
    }

    // ====================================================================
    // Subscriptions
    // ====================================================================

    /// Subscribe to writes at exactly `path`.
    ///
    /// The handler runs synchronously inside `set_state` with
    /// `(new_value, old_value)`.
    pub fn subscribe<F>(&self, path: &str, handler: F) -> Unsubscribe
    where
        F: Fn(&Value, Option<&Value>) + Send + Sync + 'static,
    {
        if StatePath::parse(path).is_err() {
            debug!(path, "subscribed to a malformed path, it will never fire");
        }
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let entry = HandlerEntry {
            id,
            handler: Arc::new(handler),
        };
        self.subscribers
            .by_path
            .write()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .push(entry);
        Unsubscribe {
            path: path.to_string(),
            id,
            subscribers: Arc::downgrade(&self.subscribers),
        }
    }

    /// Remove a subscription by path and ID.
    pub fn unsubscribe(&self, path: &str, id: SubscriptionId) -> bool {
        self.subscribers.remove(path, id)
    }

    /// Number of handlers subscribed to exactly `path`.
    pub fn subscriber_count(&self, path: &str) -> usize {
        self.subscribers
            .by_path
            .read()
            .unwrap()
            .get(path)
            .map_or(0, Vec::len)
    }

    /// Subscribed paths whose value differs between `before` and `after`,
    /// with `(path, new, old)` ready for `notify`.
    fn changed_subscriptions(&self, before: &Value, after: &Value) -> Vec<(StatePath, Value, Option<Value>)> {
        let by_path = self.subscribers.by_path.read().unwrap();
        by_path
            .keys()
            .filter_map(|path| StatePath::parse(path).ok())
            .filter_map(|path| {
                let old = get_in(before, &path);
                let new = get_in(after, &path)?;
                if old == Some(new) {
                    return None;
                }
                Some((path, new.clone(), old.cloned()))
            })
            .collect()
    }

    fn notify(&self, path: &StatePath, new: &Value, old: Option<&Value>) {
        // Clone the entries out so handlers can subscribe, unsubscribe or
        // write without contending on the table lock.
        let entries: Vec<HandlerEntry> = match self.subscribers.by_path.read().unwrap().get(path.as_str()) {
            Some(entries) => entries.clone(),
            None => return,
        };
        for entry in entries {
            let result = catch_unwind(AssertUnwindSafe(|| (entry.handler)(new, old)));
            if let Err(payload) = result {
                error!(
                    path = %path,
                    subscription = entry.id.0,
                    panic = %panic_message(payload.as_ref()),
                    "state subscriber panicked"
                );
            }
        }
    }
}

/// The persisted snapshot under `key`, if there is a usable one.
///
/// Missing, unreadable and malformed snapshots are logged and yield `None`.
fn read_snapshot(storage: &dyn Storage, key: &str) -> Option<Value> {
    let raw = match storage.get_item(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => {
            debug!(key, "no persisted state, using defaults");
            return None;
        }
        Err(e) => {
            warn!(key, error = %e, "persisted state unreadable, using defaults");
            return None;
        }
    };
    match serde_json::from_str::<Value>(&raw) {
        Ok(persisted @ Value::Object(_)) => Some(persisted),
        Ok(_) => {
            warn!(key, "persisted state is not an object, using defaults");
            None
        }
        Err(e) => {
            warn!(key, error = %e, "persisted state malformed, using defaults");
            None
        }
    }
}

use serde_json::{json, Map, Value};

use crate::path::StatePath;

/// Unique handle for a subscription, returned inside `Unsubscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub(crate) u64);

/// The compiled-in default state shape.
///
/// Persisted snapshots are merged on top of this, so every key here is
/// guaranteed to exist after the store opens.
pub fn default_state() -> Value {
    json!({
        "user": {
            "isAuthenticated": false,
        },
        "view": {
            "current": "homeView",
        },
    })
}

/// Deep-merge `overlay` on top of `base`.
///
/// Objects merge key by key; any other value in `overlay` replaces the one in
/// `base`. Keys only present in `base` are kept.
pub fn deep_merge(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            let mut merged = base_map.clone();
            for (key, value) in overlay_map {
                let next = match merged.get(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value.clone(),
                };
                merged.insert(key.clone(), next);
            }
            Value::Object(merged)
        }
        (_, overlay) => overlay.clone(),
    }
}

/// Read the value at `path`, or `None` if any segment is missing or an
/// intermediate is not an object.
pub(crate) fn get_in<'a>(root: &'a Value, path: &StatePath) -> Option<&'a Value> {
    path.segments()
        .try_fold(root, |node, segment| node.as_object()?.get(segment))
}

/// Write `value` at `path`, creating intermediate objects as needed.
///
/// A non-object intermediate is replaced by an empty object. Returns the
/// previous leaf value.
pub(crate) fn set_in(root: &mut Value, path: &StatePath, value: Value) -> Option<Value> {
    let (parents, leaf) = path.split_leaf();
    let mut node = root;
    for segment in parents {
        node = ensure_object(node)
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    ensure_object(node).insert(leaf.to_string(), value)
}

fn ensure_object(node: &mut Value) -> &mut Map<String, Value> {
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    match node {
        Value::Object(map) => map,
        _ => unreachable!("node was just made an object"),
    }
}

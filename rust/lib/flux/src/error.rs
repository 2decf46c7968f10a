use thiserror::Error;

/// Errors from the state store's inspectable write path.
///
/// The public `set_state` surface swallows these after logging; `try_set_state`
/// returns them so callers and tests can see why a write was rejected.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("invalid state path: {0:?}")]
    InvalidPath(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Errors from a persistent storage backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("storage quota exceeded for key: {0}")]
    QuotaExceeded(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Errors from action registration and dispatch.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("invalid action name: {0:?}")]
    InvalidActionName(String),

    #[error("no handler registered for action: {0}")]
    NotRegistered(String),

    #[error("handler for action {action} failed: {source}")]
    HandlerFailed {
        action: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("handler for action {action} panicked: {message}")]
    HandlerPanicked { action: String, message: String },
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

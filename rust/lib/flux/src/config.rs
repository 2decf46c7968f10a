use std::path::PathBuf;
use std::sync::Arc;

use crate::error::StorageError;
use crate::storage::{RedbStorage, Storage};

/// Storage key the whole state snapshot lives under.
pub const DEFAULT_STORAGE_KEY: &str = "storefront.state";

/// Store configuration.
///
/// Embedders build this from command-line arguments or by hand, then pass it
/// to `ReactiveStore::open` / `global::install_store`.
#[derive(Debug, Clone)]
pub struct FluxConfig {
    /// Key the serialized state tree is persisted under.
    pub storage_key: String,

    /// When false the store neither reads nor writes storage.
    pub persist: bool,

    /// Path to a redb file for durable storage. None means the embedder
    /// supplies its own `Storage` (or none at all).
    pub db_path: Option<PathBuf>,
}

impl Default for FluxConfig {
    fn default() -> Self {
        Self {
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            persist: true,
            db_path: None,
        }
    }
}

impl FluxConfig {
    /// Parse configuration from command-line arguments.
    ///
    /// Supported flags:
    /// - `--storage-key=KEY`
    /// - `--no-persist`
    /// - `--db=PATH`
    ///
    /// Unknown arguments are ignored.
    pub fn from_args(args: &[String]) -> Self {
        let mut config = FluxConfig::default();

        for arg in args {
            if let Some(val) = arg.strip_prefix("--storage-key=") {
                if !val.is_empty() {
                    config.storage_key = val.to_string();
                }
            } else if arg == "--no-persist" {
                config.persist = false;
            } else if let Some(val) = arg.strip_prefix("--db=") {
                config.db_path = Some(PathBuf::from(val));
            }
        }

        config
    }

    /// Open the redb storage named by `db_path`, if any.
    pub fn open_storage(&self) -> Result<Option<Arc<dyn Storage>>, StorageError> {
        match &self.db_path {
            Some(path) => {
                let storage: Arc<dyn Storage> = Arc::new(RedbStorage::open(path)?);
                Ok(Some(storage))
            }
            None => Ok(None),
        }
    }
}

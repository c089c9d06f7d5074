use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{info, warn};
use uuid::Uuid;

use super::{file_storage::FileStorage, memory_storage::MemoryStorage};
use crate::config::StorageConfig;
use crate::errors::StorageError;

/// Identifies one running instance of the application (one "tab").
pub type ContextId = Uuid;

/// Capacity of the change-notification channel of every backend.
pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 64;

/// A change to durable storage, as observed by every subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    pub key: String,
    /// `None` when the key was removed.
    pub new_value: Option<String>,
    /// The context that made the write; `None` when it came from outside this process.
    pub origin: Option<ContextId>,
}

/// Key/value durable storage shared by every instance of the application, with change
/// notifications. Writes are synchronous; a write that leaves a value unchanged emits
/// no event.
pub trait StorageBackend: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set_item(&self, key: &str, value: &str, origin: ContextId) -> Result<(), StorageError>;
    fn remove_item(&self, key: &str, origin: ContextId) -> Result<(), StorageError>;
    fn subscribe(&self) -> broadcast::Receiver<StorageEvent>;
}

/// Creates a concrete storage backend from the StorageConfig.
///
/// For the file backend a watcher for writes by other processes is started when a tokio
/// runtime is available and the poll interval is non-zero.
pub fn create_storage(config: &StorageConfig) -> Result<Arc<dyn StorageBackend>, StorageError> {
    match config {
        StorageConfig::Memory => {
            info!("Using in-memory session storage.");
            Ok(Arc::new(MemoryStorage::new()))
        }
        StorageConfig::File(file_config) => {
            let storage = Arc::new(FileStorage::open(&file_config.path)?);
            info!("Using file session storage at '{}'.", file_config.path);
            if file_config.poll_interval_ms > 0 {
                match tokio::runtime::Handle::try_current() {
                    Ok(_) => {
                        storage.clone().spawn_watcher(std::time::Duration::from_millis(
                            file_config.poll_interval_ms,
                        ));
                    }
                    Err(_) => warn!("No async runtime; file storage watcher not started."),
                }
            }
            Ok(storage)
        }
    }
}

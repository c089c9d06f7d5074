use std::collections::HashMap;
use std::sync::RwLock;

use tokio::sync::broadcast;

use super::base::{ContextId, StorageBackend, StorageEvent, EVENT_CHANNEL_CAPACITY};
use crate::errors::StorageError;

/// Process-local storage. Session managers sharing one instance behave like tabs of one
/// browser profile.
pub struct MemoryStorage {
    items: RwLock<HashMap<String, String>>,
    events: broadcast::Sender<StorageEvent>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        MemoryStorage {
            items: RwLock::new(HashMap::new()),
            events,
        }
    }

    fn notify(&self, key: &str, new_value: Option<String>, origin: ContextId) {
        // No subscribers is fine.
        let _ = self.events.send(StorageEvent {
            key: key.to_string(),
            new_value,
            origin: Some(origin),
        });
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageBackend for MemoryStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        let items = self.items.read().map_err(|_| StorageError::Lock)?;
        Ok(items.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str, origin: ContextId) -> Result<(), StorageError> {
        {
            let mut items = self.items.write().map_err(|_| StorageError::Lock)?;
            if items.get(key).map(String::as_str) == Some(value) {
                return Ok(());
            }
            items.insert(key.to_string(), value.to_string());
        }
        self.notify(key, Some(value.to_string()), origin);
        Ok(())
    }

    fn remove_item(&self, key: &str, origin: ContextId) -> Result<(), StorageError> {
        let removed = {
            let mut items = self.items.write().map_err(|_| StorageError::Lock)?;
            items.remove(key).is_some()
        };
        if removed {
            self.notify(key, None, origin);
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.events.subscribe()
    }
}

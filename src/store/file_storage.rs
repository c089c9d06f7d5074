use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use super::base::{ContextId, StorageBackend, StorageEvent, EVENT_CHANNEL_CAPACITY};
use crate::errors::StorageError;

/// Storage kept in a single JSON object file, shared between processes.
///
/// Every read goes to disk. Writes by this process are announced immediately; writes by
/// other processes are picked up by the watcher (see [`FileStorage::spawn_watcher`]) and
/// announced with an unknown origin.
pub struct FileStorage {
    path: PathBuf,
    /// Contents as of the last read or write by this process, used to diff external changes.
    known: Mutex<HashMap<String, String>>,
    events: broadcast::Sender<StorageEvent>,
}

impl FileStorage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let known = read_items(&path)?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(FileStorage {
            path,
            known: Mutex::new(known),
            events,
        })
    }

    /// Polls the file for changes made by other processes.
    pub fn spawn_watcher(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(e) = self.poll_external_changes() {
                    warn!(
                        event_name = "storage.file.poll.failed",
                        event_domain = "storage",
                        path = %self.path.display(),
                        "Failed to read session storage file: {}",
                        e
                    );
                }
            }
        })
    }

    /// Compares the file against the last known contents and announces every difference.
    pub fn poll_external_changes(&self) -> Result<usize, StorageError> {
        let current = read_items(&self.path)?;
        let mut known = self.known.lock().map_err(|_| StorageError::Lock)?;

        let mut changes = Vec::new();
        for (key, value) in &current {
            if known.get(key) != Some(value) {
                changes.push((key.clone(), Some(value.clone())));
            }
        }
        for key in known.keys() {
            if !current.contains_key(key) {
                changes.push((key.clone(), None));
            }
        }
        *known = current;
        drop(known);

        for (key, new_value) in &changes {
            debug!("External change to storage key '{}'", key);
            let _ = self.events.send(StorageEvent {
                key: key.clone(),
                new_value: new_value.clone(),
                origin: None,
            });
        }
        Ok(changes.len())
    }

    fn write_with<F>(&self, origin: ContextId, key: &str, edit: F) -> Result<(), StorageError>
    where
        F: FnOnce(&mut HashMap<String, String>) -> bool,
    {
        let mut known = self.known.lock().map_err(|_| StorageError::Lock)?;
        let mut items = read_items(&self.path)?;
        if !edit(&mut items) {
            *known = items;
            return Ok(());
        }
        write_items(&self.path, &items)?;
        let new_value = items.get(key).cloned();
        *known = items;
        drop(known);

        let _ = self.events.send(StorageEvent {
            key: key.to_string(),
            new_value,
            origin: Some(origin),
        });
        Ok(())
    }
}

impl StorageBackend for FileStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(read_items(&self.path)?.remove(key))
    }

    fn set_item(&self, key: &str, value: &str, origin: ContextId) -> Result<(), StorageError> {
        self.write_with(origin, key, |items| {
            if items.get(key).map(String::as_str) == Some(value) {
                return false;
            }
            items.insert(key.to_string(), value.to_string());
            true
        })
    }

    fn remove_item(&self, key: &str, origin: ContextId) -> Result<(), StorageError> {
        self.write_with(origin, key, |items| items.remove(key).is_some())
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.events.subscribe()
    }
}

fn read_items(path: &Path) -> Result<HashMap<String, String>, StorageError> {
    match std::fs::read_to_string(path) {
        Ok(content) if content.trim().is_empty() => Ok(HashMap::new()),
        Ok(content) => Ok(serde_json::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
        Err(e) => Err(e.into()),
    }
}

/// Writes through a sibling temp file so readers never see a half-written file.
fn write_items(path: &Path, items: &HashMap<String, String>) -> Result<(), StorageError> {
    let content = serde_json::to_string_pretty(items)?;
    let tmp = temp_file_for(path);
    if let Err(e) = std::fs::write(&tmp, content).and_then(|_| std::fs::rename(&tmp, path)) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

/// A sibling of `path` unique to this write, so concurrent writers never share one.
fn temp_file_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "storage".to_string());
    path.with_file_name(format!(".{}.{}.tmp", name, Uuid::new_v4()))
}

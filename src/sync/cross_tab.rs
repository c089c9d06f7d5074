//! Replays session changes made by other instances of the application.
//!
//! A pure relay: storage change events for the session key that originate elsewhere are
//! parsed and applied to the local store wholesale (last writer wins). No network calls.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::models::{PersistedRecord, PersistedSession};
use crate::store::{SessionStore, StorageEvent};
use crate::utils::log_throttle::LogThrottle;

const MALFORMED_LOG_WINDOW: Duration = Duration::from_secs(30);

/// What happened to a single storage event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Applied,
    /// Another key, or a write made by this context.
    Ignored,
    /// The new value could not be parsed; local state left untouched.
    Rejected,
}

pub struct CrossTabSync {
    store: Arc<SessionStore>,
    throttle: LogThrottle,
}

impl CrossTabSync {
    pub fn new(store: Arc<SessionStore>) -> Self {
        CrossTabSync {
            store,
            throttle: LogThrottle::new(MALFORMED_LOG_WINDOW),
        }
    }

    /// Subscribes to the store's storage and replays peer changes until the storage
    /// backend goes away.
    pub fn spawn(self) -> JoinHandle<()> {
        let events = self.store.storage().subscribe();
        tokio::spawn(self.run(events))
    }

    pub async fn run(self, mut events: broadcast::Receiver<StorageEvent>) {
        loop {
            match events.recv().await {
                Ok(event) => {
                    self.handle_event(&event);
                }
                Err(RecvError::Lagged(skipped)) => {
                    // Missed events only matter as far as the latest value; re-read it.
                    warn!(
                        event_name = "sync.lagged",
                        event_domain = "sync",
                        skipped,
                        "Cross-tab sync fell behind; reloading session from storage"
                    );
                    self.resync();
                }
                Err(RecvError::Closed) => {
                    debug!("Storage notifications closed; stopping cross-tab sync");
                    break;
                }
            }
        }
    }

    pub fn handle_event(&self, event: &StorageEvent) -> SyncOutcome {
        if event.key != self.store.storage_key() || event.origin == Some(self.store.context_id()) {
            return SyncOutcome::Ignored;
        }

        let snapshot = match &event.new_value {
            // Peer removed the record entirely.
            None => PersistedSession::default(),
            Some(raw) => match PersistedRecord::parse(raw) {
                Ok(record) => record.state,
                Err(e) => {
                    if let Some(suppressed_count) = self.throttle.should_emit("sync.snapshot.malformed") {
                        warn!(
                            event_name = "sync.snapshot.malformed",
                            event_domain = "sync",
                            suppressed_count,
                            "Ignoring malformed session snapshot from another tab: {}",
                            e
                        );
                    }
                    return SyncOutcome::Rejected;
                }
            },
        };

        info!(
            event_name = "sync.snapshot.applied",
            event_domain = "sync",
            authenticated = snapshot.is_authenticated,
            "Applying session snapshot from another tab"
        );
        self.store.replace_from_peer(snapshot);
        SyncOutcome::Applied
    }

    fn resync(&self) {
        match self.store.storage().get_item(self.store.storage_key()) {
            Ok(value) => {
                self.handle_event(&StorageEvent {
                    key: self.store.storage_key().to_string(),
                    new_value: value,
                    origin: None,
                });
            }
            Err(e) => warn!("Failed to reload session after lag: {}", e),
        }
    }
}

//! Single source of truth for the session.
//!
//! Every mutation is applied under one write lock, persisted to durable storage while the
//! lock is held and then published to watchers, so no partially applied state is ever
//! observable. Persistence is best-effort: a failed write is logged and the in-memory
//! state is kept.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::base::{ContextId, StorageBackend};
use crate::auth::token_clock::TokenClock;
use crate::config::SessionConfig;
use crate::models::{PersistedRecord, PersistedSession, Session, SessionPhase, User};

/// Handle returned by [`SessionStore::on_unauthenticated`], used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn() + Send + Sync>;

/// Tokens (and optionally the identity) issued by a login or refresh. They are always
/// written together.
#[derive(Debug, Clone)]
pub struct Credentials {
    /// `None` keeps the current user; a refresh re-issues tokens for the same identity.
    pub user: Option<User>,
    pub access_token: String,
    /// `None` keeps the current refresh token when the server does not rotate it.
    pub refresh_token: Option<String>,
}

/// A partial update for [`SessionStore::set_session`]. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct SessionPatch {
    pub credentials: Option<Credentials>,
    pub is_loading: Option<bool>,
    pub error: Option<Option<String>>,
}

pub struct SessionStore {
    state: RwLock<Session>,
    storage: Arc<dyn StorageBackend>,
    context_id: ContextId,
    storage_key: String,
    storage_version: u32,
    clock: TokenClock,
    init_started: AtomicBool,
    /// Bumped whenever the session is replaced rather than rotated: login, clear, peer
    /// replay, load. Only changed while the state write lock is held.
    generation: AtomicU64,
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
    next_listener: AtomicU64,
    snapshots: watch::Sender<Session>,
}

impl SessionStore {
    pub fn new(storage: Arc<dyn StorageBackend>, config: &SessionConfig, clock: TokenClock) -> Self {
        let (snapshots, _) = watch::channel(Session::default());
        SessionStore {
            state: RwLock::new(Session::default()),
            storage,
            context_id: Uuid::new_v4(),
            storage_key: config.storage_key.clone(),
            storage_version: config.storage_version,
            clock,
            init_started: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(1),
            snapshots,
        }
    }

    // -- Read access

    pub fn snapshot(&self) -> Session {
        self.read().clone()
    }

    /// Receives a fresh snapshot after every mutation.
    pub fn watch(&self) -> watch::Receiver<Session> {
        self.snapshots.subscribe()
    }

    pub fn access_token(&self) -> Option<String> {
        self.read().access_token.clone()
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.read().refresh_token.clone()
    }

    /// The refresh token together with the generation it belongs to, read atomically.
    pub fn refresh_ticket(&self) -> Option<(String, u64)> {
        let state = self.read();
        let refresh_token = state.refresh_token.clone()?;
        Some((refresh_token, self.generation.load(Ordering::SeqCst)))
    }

    pub fn current_user(&self) -> Option<User> {
        self.read().user.clone()
    }

    /// False as soon as the access token is known to be expired, even before a refresh.
    pub fn is_authenticated(&self) -> bool {
        let state = self.read();
        state.is_authenticated
            && state
                .access_token
                .as_deref()
                .is_some_and(|token| !self.clock.is_expired(token))
    }

    pub fn is_initialized(&self) -> bool {
        self.read().is_initialized
    }

    pub fn phase(&self) -> SessionPhase {
        if self.is_initialized() {
            if self.is_authenticated() {
                SessionPhase::Authenticated
            } else {
                SessionPhase::Unauthenticated
            }
        } else if self.init_started.load(Ordering::SeqCst) {
            SessionPhase::Initializing
        } else {
            SessionPhase::Uninitialized
        }
    }

    pub fn clock(&self) -> &TokenClock {
        &self.clock
    }

    pub fn context_id(&self) -> ContextId {
        self.context_id
    }

    pub fn storage_key(&self) -> &str {
        &self.storage_key
    }

    pub fn storage(&self) -> &Arc<dyn StorageBackend> {
        &self.storage
    }

    // -- Listeners

    /// Registers a callback run whenever the session goes from authenticated to not.
    pub fn on_unauthenticated<F>(&self, callback: F) -> ListenerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(callback)));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    // -- Mutations

    /// Applies a partial update. New credentials start a new session generation.
    pub fn set_session(&self, patch: SessionPatch) {
        self.mutate(true, |state| {
            if let Some(credentials) = patch.credentials {
                self.bump_generation();
                apply_credentials(state, credentials);
            }
            if let Some(is_loading) = patch.is_loading {
                state.is_loading = is_loading;
            }
            if let Some(error) = patch.error {
                state.error = error;
            }
        });
    }

    /// Stores tokens issued by a login. The session becomes authenticated as a consequence.
    pub fn set_credentials(&self, credentials: Credentials) {
        self.set_session(SessionPatch {
            credentials: Some(credentials),
            ..SessionPatch::default()
        });
    }

    /// Marks the start of a login/refresh/logout: loading, previous error cleared.
    pub fn begin_operation(&self) {
        self.set_session(SessionPatch {
            is_loading: Some(true),
            error: Some(None),
            ..SessionPatch::default()
        });
    }

    /// Stores rotated tokens, unless the session was replaced since `generation` was read.
    /// Returns whether they were applied.
    pub fn rotate_credentials(&self, generation: u64, credentials: Credentials) -> bool {
        self.mutate_if(Some(generation), true, |state| apply_credentials(state, credentials))
    }

    /// Clears the session, unless it was replaced since `generation` was read.
    pub fn clear_if_current(&self, generation: u64) -> bool {
        self.mutate_if(Some(generation), true, |state| {
            self.bump_generation();
            clear_state(state);
        })
    }

    pub fn finish_operation(&self, error: Option<String>) {
        self.set_session(SessionPatch {
            is_loading: Some(false),
            error: Some(error),
            ..SessionPatch::default()
        });
    }

    /// Drops user and tokens. The persisted record keeps its shape with every field empty.
    pub fn clear(&self) {
        self.mutate(true, |state| {
            self.bump_generation();
            clear_state(state);
        });
    }

    /// Replaces user and tokens wholesale with a snapshot written by another context.
    /// Storage already holds this snapshot, so nothing is written back.
    pub fn replace_from_peer(&self, snapshot: PersistedSession) {
        self.mutate(false, |state| {
            self.bump_generation();
            apply_persisted(state, snapshot);
        });
    }

    /// Loads the persisted record, if any. Returns whether a session was restored.
    pub fn load_persisted(&self) -> bool {
        let raw = match self.storage.get_item(&self.storage_key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return false,
            Err(e) => {
                warn!(
                    event_name = "session.store.load.failed",
                    event_domain = "session",
                    "Failed to read persisted session: {}",
                    e
                );
                return false;
            }
        };
        let record = match PersistedRecord::parse(&raw) {
            Ok(record) => record,
            Err(e) => {
                warn!(
                    event_name = "session.store.load.malformed",
                    event_domain = "session",
                    "Ignoring malformed persisted session: {}",
                    e
                );
                return false;
            }
        };
        if record.version != self.storage_version {
            warn!(
                event_name = "session.store.load.version_mismatch",
                event_domain = "session",
                found = record.version,
                expected = self.storage_version,
                "Discarding persisted session with unexpected version"
            );
            return false;
        }
        let restored = record.state.access_token.is_some();
        self.mutate(false, |state| {
            self.bump_generation();
            apply_persisted(state, record.state);
        });
        restored
    }

    /// Returns false if initialization already started; `Initializing` is entered once.
    pub(crate) fn begin_initialization(&self) -> bool {
        !self.init_started.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn mark_initialized(&self) {
        self.mutate(false, |state| {
            state.is_initialized = true;
            state.is_loading = false;
        });
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Session> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn bump_generation(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    fn mutate<F>(&self, persist: bool, edit: F)
    where
        F: FnOnce(&mut Session),
    {
        self.mutate_if(None, persist, edit);
    }

    /// Applies `edit` under the write lock, or nothing when `expected` no longer matches
    /// the session generation.
    fn mutate_if<F>(&self, expected: Option<u64>, persist: bool, edit: F) -> bool
    where
        F: FnOnce(&mut Session),
    {
        let (was_authenticated, snapshot) = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            if expected.is_some_and(|g| g != self.generation.load(Ordering::SeqCst)) {
                return false;
            }
            let was_authenticated = state.is_authenticated;
            edit(&mut state);
            if persist {
                self.persist(&state);
            }
            (was_authenticated, state.clone())
        };

        let lost_authentication = was_authenticated && !snapshot.is_authenticated;
        self.snapshots.send_replace(snapshot);

        if lost_authentication {
            info!(
                event_name = "session.unauthenticated",
                event_domain = "session",
                "Session is no longer authenticated"
            );
            self.notify_unauthenticated();
        }
        true
    }

    fn persist(&self, state: &Session) {
        let record = PersistedRecord::new(state.persisted(), self.storage_version);
        let result = record
            .to_json()
            .map_err(crate::errors::StorageError::from)
            .and_then(|json| self.storage.set_item(&self.storage_key, &json, self.context_id));
        match result {
            Ok(()) => debug!("Persisted session under '{}'", self.storage_key),
            Err(e) => warn!(
                event_name = "session.store.persist.failed",
                event_domain = "session",
                "Failed to persist session; keeping in-memory state: {}",
                e
            ),
        }
    }

    fn notify_unauthenticated(&self) {
        // Run callbacks without holding the lock so they may touch the store.
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener();
        }
    }
}

fn apply_credentials(state: &mut Session, credentials: Credentials) {
    if let Some(user) = credentials.user {
        state.user = Some(user);
    }
    state.access_token = Some(credentials.access_token);
    if let Some(refresh_token) = credentials.refresh_token {
        state.refresh_token = Some(refresh_token);
    }
    state.is_authenticated = true;
}

fn clear_state(state: &mut Session) {
    state.user = None;
    state.access_token = None;
    state.refresh_token = None;
    state.is_authenticated = false;
    state.is_loading = false;
    state.error = None;
}

fn apply_persisted(state: &mut Session, snapshot: PersistedSession) {
    state.is_authenticated = snapshot.is_authenticated && snapshot.access_token.is_some();
    state.user = snapshot.user;
    state.access_token = snapshot.access_token;
    state.refresh_token = snapshot.refresh_token;
}

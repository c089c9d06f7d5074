//! The session manager handed to the rest of the application.
//!
//! One instance is built at startup (see [`crate::startup`]) and cloned into whatever needs
//! it; every clone shares the same store, refresh coordinator and HTTP client.

use std::sync::Arc;

use tokio::sync::{watch, OnceCell};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::auth::api::AuthApi;
use crate::auth::refresh::RefreshCoordinator;
use crate::client::AuthClient;
use crate::config::ConfigV1;
use crate::errors::SessionError;
use crate::models::{Session, SessionPhase, User};
use crate::startup;
use crate::store::session_store::Credentials;
use crate::store::{ListenerId, SessionStore};
use crate::sync::CrossTabSync;

#[derive(Clone)]
pub struct SessionManager {
    /// Configuration loaded at startup.
    pub config: Arc<ConfigV1>,
    pub store: Arc<SessionStore>,
    pub coordinator: Arc<RefreshCoordinator>,
    api: Arc<dyn AuthApi>,
    client: AuthClient,
    initialized: Arc<OnceCell<SessionPhase>>,
}

impl SessionManager {
    pub(crate) fn new(
        config: Arc<ConfigV1>,
        store: Arc<SessionStore>,
        coordinator: Arc<RefreshCoordinator>,
        api: Arc<dyn AuthApi>,
        client: AuthClient,
    ) -> Self {
        SessionManager {
            config,
            store,
            coordinator,
            api,
            client,
            initialized: Arc::new(OnceCell::new()),
        }
    }

    // -- Read-only contract

    pub fn get_access_token(&self) -> Option<String> {
        self.store.access_token()
    }

    pub fn is_authenticated(&self) -> bool {
        self.store.is_authenticated()
    }

    pub fn current_user(&self) -> Option<User> {
        self.store.current_user()
    }

    pub fn snapshot(&self) -> Session {
        self.store.snapshot()
    }

    pub fn phase(&self) -> SessionPhase {
        self.store.phase()
    }

    pub fn watch(&self) -> watch::Receiver<Session> {
        self.store.watch()
    }

    /// Client for business calls; attaches the token and recovers from expired sessions.
    pub fn client(&self) -> &AuthClient {
        &self.client
    }

    // -- Lifecycle

    /// Runs the initialization pass once. Concurrent and later callers wait for, and get,
    /// the phase the first pass ended in.
    pub async fn initialize(&self) -> SessionPhase {
        *self
            .initialized
            .get_or_init(|| startup::initialize(&self.store, &self.coordinator))
            .await
    }

    /// Starts replaying session changes made by other instances.
    pub fn start_sync(&self) -> JoinHandle<()> {
        CrossTabSync::new(self.store.clone()).spawn()
    }

    pub fn on_unauthenticated<F>(&self, callback: F) -> ListenerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.store.on_unauthenticated(callback)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.store.remove_listener(id)
    }

    /// Signs in. On failure any previous session is cleared and the error is recorded.
    pub async fn login(&self, email: &str, password: &str) -> Result<(), SessionError> {
        self.store.begin_operation();
        match self.request_login(email, password).await {
            Ok(credentials) => {
                self.store.set_credentials(credentials);
                self.store.finish_operation(None);
                info!(
                    event_name = "session.login.succeeded",
                    event_domain = "session",
                    email,
                    "Logged in"
                );
                Ok(())
            }
            Err(e) => {
                warn!(
                    event_name = "session.login.failed",
                    event_domain = "session",
                    email,
                    "Login failed: {}",
                    e
                );
                self.store.clear();
                self.store.finish_operation(Some(e.to_string()));
                Err(e)
            }
        }
    }

    async fn request_login(&self, email: &str, password: &str) -> Result<Credentials, SessionError> {
        let grant = self.api.login(email, password).await?;
        let user = match grant.user {
            Some(user) => user,
            None => self.api.current_user(&grant.access_token).await?,
        };
        Ok(Credentials {
            user: Some(user),
            access_token: grant.access_token,
            refresh_token: grant.refresh_token,
        })
    }

    /// Joins (or starts) the shared refresh.
    pub async fn refresh(&self) -> Option<String> {
        self.coordinator.ensure_fresh_token().await
    }

    /// Clears the session locally without waiting for the server.
    ///
    /// The server is notified in the background; the returned handle resolves when that
    /// notification settles. Its outcome never affects local state.
    pub fn logout(&self) -> Option<JoinHandle<()>> {
        let notification = self.store.access_token().and_then(|token| {
            let api = self.api.clone();
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => Some(handle.spawn(async move {
                    if let Err(e) = api.logout(&token).await {
                        warn!(
                            event_name = "session.logout.notify_failed",
                            event_domain = "session",
                            "Server logout failed (ignored): {}",
                            e
                        );
                    }
                })),
                Err(_) => {
                    warn!("No async runtime; skipping server logout notification");
                    None
                }
            }
        });

        self.store.clear();
        info!(
            event_name = "session.logout",
            event_domain = "session",
            "Logged out"
        );
        notification
    }
}

//! Construction of the session manager and the one-time initialization pass.

use std::sync::Arc;

use reqwest::Client;
use tracing::{debug, info};

use crate::auth::api::{AuthApi, HttpAuthApi};
use crate::auth::refresh::RefreshCoordinator;
use crate::auth::token_clock::TokenClock;
use crate::client::AuthClient;
use crate::config::ConfigV1;
use crate::errors::SessionError;
use crate::models::SessionPhase;
use crate::state::SessionManager;
use crate::store::{create_storage, SessionStore, StorageBackend};

/// Builds a session manager talking HTTP to the configured API, over the configured storage.
pub fn build(config: Arc<ConfigV1>) -> Result<SessionManager, SessionError> {
    let storage = create_storage(&config.storage)?;
    let client = Client::builder()
        .timeout(config.api.request_timeout())
        .build()?;
    let api = Arc::new(HttpAuthApi::with_client(client.clone(), &config.api));
    let clock = TokenClock::new(&config.session);
    Ok(build_with(config, storage, api, client, clock))
}

/// Wires the components together from explicit collaborators.
pub fn build_with(
    config: Arc<ConfigV1>,
    storage: Arc<dyn StorageBackend>,
    api: Arc<dyn AuthApi>,
    client: Client,
    clock: TokenClock,
) -> SessionManager {
    let store = Arc::new(SessionStore::new(storage, &config.session, clock));
    let coordinator = Arc::new(RefreshCoordinator::new(
        store.clone(),
        api.clone(),
        config.session.refresh_timeout(),
    ));
    let auth_client = AuthClient::new(
        client,
        &config.api,
        &config.session,
        store.clone(),
        coordinator.clone(),
    );
    SessionManager::new(config, store, coordinator, api, auth_client)
}

/// Builds the manager, runs initialization and starts cross-tab sync.
pub async fn run(config: Arc<ConfigV1>) -> Result<SessionManager, SessionError> {
    let manager = build(config)?;
    let phase = manager.initialize().await;
    manager.start_sync();
    info!("Session ready: {:?}", phase);
    Ok(manager)
}

/// Loads the persisted session, refreshes it if the access token has expired, and marks
/// the store initialized whatever the outcome. Only the first call does any work.
pub async fn initialize(store: &Arc<SessionStore>, coordinator: &Arc<RefreshCoordinator>) -> SessionPhase {
    if !store.begin_initialization() {
        return store.phase();
    }
    // Must precede any persisting mutation, or the stored session is overwritten.
    let restored = store.load_persisted();
    debug!("Persisted session restored: {}", restored);
    store.begin_operation();

    if let Some(token) = store.access_token() {
        if store.clock().is_expired(&token) {
            info!(
                event_name = "session.init.expired",
                event_domain = "session",
                "Persisted access token has expired; refreshing"
            );
            // A failed refresh has already cleared the session and recorded why.
            if coordinator.ensure_fresh_token().await.is_none() && store.access_token().is_some() {
                store.clear();
            }
        }
    }

    store.mark_initialized();
    let phase = store.phase();
    info!(
        event_name = "session.init.completed",
        event_domain = "session",
        phase = ?phase,
        "Session initialized"
    );
    phase
}

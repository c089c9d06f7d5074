//! Single-flight token refresh.
//!
//! At most one refresh call is outstanding at any time. The first caller starts it and
//! parks a shared handle in the in-flight slot; every caller arriving before it settles
//! awaits that same handle and receives the same outcome.
//!
//! The outcome is written back only if the session it was started for is still the
//! current one. A logout or login in the meantime wins, and the refresh resolves to `None`.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::api::AuthApi;
use crate::errors::SessionError;
use crate::store::session_store::{Credentials, SessionStore};

type PendingRefresh = Shared<BoxFuture<'static, Option<String>>>;

pub struct RefreshCoordinator {
    store: Arc<SessionStore>,
    api: Arc<dyn AuthApi>,
    refresh_timeout: Duration,
    in_flight: Mutex<Option<PendingRefresh>>,
}

impl RefreshCoordinator {
    pub fn new(store: Arc<SessionStore>, api: Arc<dyn AuthApi>, refresh_timeout: Duration) -> Self {
        RefreshCoordinator {
            store,
            api,
            refresh_timeout,
            in_flight: Mutex::new(None),
        }
    }

    /// Resolves to a fresh access token, or `None` when the session could not be refreshed
    /// (no refresh token, the refresh failed and the session was cleared, or the session
    /// was replaced while the refresh was outstanding).
    pub async fn ensure_fresh_token(self: &Arc<Self>) -> Option<String> {
        let pending = {
            let mut slot = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            match slot.as_ref() {
                Some(pending) => pending.clone(),
                None => {
                    let (refresh_token, generation) = self.store.refresh_ticket()?;
                    let this = Arc::clone(self);
                    let pending = async move {
                        let outcome = this.run_refresh(refresh_token, generation).await;
                        // Release the marker whatever the outcome.
                        this.in_flight
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .take();
                        outcome
                    }
                    .boxed()
                    .shared();
                    *slot = Some(pending.clone());
                    pending
                }
            }
        };
        pending.await
    }

    /// Whether a refresh call is currently outstanding.
    pub fn is_refreshing(&self) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    async fn run_refresh(&self, refresh_token: String, generation: u64) -> Option<String> {
        self.store.begin_operation();
        info!(
            event_name = "session.refresh.started",
            event_domain = "session",
            "Refreshing access token"
        );

        let result = match timeout(self.refresh_timeout, self.api.refresh(&refresh_token)).await {
            Ok(result) => result,
            Err(_) => Err(SessionError::Timeout),
        };

        match result {
            Ok(grant) => {
                let access_token = grant.access_token.clone();
                let applied = self.store.rotate_credentials(
                    generation,
                    Credentials {
                        user: grant.user,
                        access_token: grant.access_token,
                        refresh_token: grant.refresh_token,
                    },
                );
                self.store.finish_operation(None);
                if !applied {
                    info!(
                        event_name = "session.refresh.discarded",
                        event_domain = "session",
                        "Session changed while refreshing; discarding refreshed tokens"
                    );
                    return None;
                }
                info!(
                    event_name = "session.refresh.succeeded",
                    event_domain = "session",
                    "Access token refreshed"
                );
                Some(access_token)
            }
            Err(e) => {
                if self.store.clear_if_current(generation) {
                    warn!(
                        event_name = "session.refresh.failed",
                        event_domain = "session",
                        "Token refresh failed, logging out: {}",
                        e
                    );
                    self.store
                        .finish_operation(Some(format!("Session expired: {}", e)));
                } else {
                    debug!("Refresh failed for a session that was already replaced: {}", e);
                    self.store.finish_operation(None);
                }
                None
            }
        }
    }
}

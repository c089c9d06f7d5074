#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{encode, EncodingKey, Header};
use namesearch_session::auth::{AuthApi, HttpAuthApi, TokenClock};
use namesearch_session::config::{ApiConfig, ConfigV1, LoggingConfig, SessionConfig, StorageConfig};
use namesearch_session::startup::build_with;
use namesearch_session::store::StorageBackend;
use namesearch_session::models::{TokenGrant, User};
use namesearch_session::{SessionError, SessionManager};
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
    #[serde(rename = "type")]
    pub token_type: String,
}

/// Mints an HS256 access token expiring `expires_in` seconds from now (negative for past).
pub fn mint_token(sub: &str, expires_in: i64) -> String {
    let claims = Claims {
        sub: sub.to_string(),
        exp: Utc::now().timestamp() + expires_in,
        token_type: "access".to_string(),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(b"test-secret"),
    )
    .expect("failed to encode token")
}

pub fn test_config(base_url: &str, session: SessionConfig) -> Arc<ConfigV1> {
    Arc::new(ConfigV1 {
        api: ApiConfig::new(base_url),
        session,
        storage: StorageConfig::default(),
        logging: LoggingConfig::default(),
    })
}

/// A manager talking to `base_url` over the given storage.
pub fn build_manager(base_url: &str, storage: Arc<dyn StorageBackend>) -> SessionManager {
    build_manager_with(base_url, storage, SessionConfig::default())
}

/// Like [`build_manager`], with a custom session policy.
pub fn build_manager_with(
    base_url: &str,
    storage: Arc<dyn StorageBackend>,
    session: SessionConfig,
) -> SessionManager {
    let config = test_config(base_url, session);
    let client = reqwest::Client::builder()
        .timeout(config.api.request_timeout())
        .build()
        .expect("failed to build client");
    let api = Arc::new(HttpAuthApi::with_client(client.clone(), &config.api));
    build_with(config, storage, api, client, TokenClock::default())
}

/// Body returned by the login endpoint.
pub fn login_body(access_token: &str, refresh_token: &str) -> String {
    json!({
        "accessToken": access_token,
        "refreshToken": refresh_token,
        "user": {"id": 7, "email": "a@b.com", "full_name": "Ada"}
    })
    .to_string()
}

/// Body returned by the refresh endpoint.
pub fn refresh_body(access_token: &str, refresh_token: &str) -> String {
    json!({"access_token": access_token, "refresh_token": refresh_token}).to_string()
}

/// Registers an `on_unauthenticated` listener and returns its call counter.
pub fn count_unauthenticated(manager: &SessionManager) -> Arc<AtomicUsize> {
    let counter = Arc::new(AtomicUsize::new(0));
    let c = counter.clone();
    manager.on_unauthenticated(move || {
        c.fetch_add(1, Ordering::SeqCst);
    });
    counter
}

/// Waits until the manager's session satisfies `predicate`, failing the test after two seconds.
pub async fn wait_for_session<F>(manager: &SessionManager, predicate: F)
where
    F: FnMut(&namesearch_session::models::Session) -> bool,
{
    let mut rx = manager.watch();
    tokio::time::timeout(Duration::from_secs(2), rx.wait_for(predicate))
        .await
        .expect("timed out waiting for session change")
        .expect("session channel closed");
}

/// In-process auth API whose refresh takes `refresh_delay`, for racing refreshes against
/// other session changes.
pub struct SlowRefreshApi {
    pub access_token: String,
    pub refreshed_token: String,
    pub refresh_delay: Duration,
    pub refreshes: AtomicUsize,
}

impl SlowRefreshApi {
    pub fn new(refresh_delay: Duration) -> Self {
        SlowRefreshApi {
            access_token: mint_token("7", 3600),
            refreshed_token: mint_token("7", 7200),
            refresh_delay,
            refreshes: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl AuthApi for SlowRefreshApi {
    async fn login(&self, email: &str, _password: &str) -> Result<TokenGrant, SessionError> {
        Ok(TokenGrant {
            access_token: self.access_token.clone(),
            refresh_token: Some("r1".to_string()),
            user: Some(User::new(7, email)),
        })
    }

    async fn refresh(&self, _refresh_token: &str) -> Result<TokenGrant, SessionError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.refresh_delay).await;
        Ok(TokenGrant {
            access_token: self.refreshed_token.clone(),
            refresh_token: Some("r2".to_string()),
            user: None,
        })
    }

    async fn logout(&self, _access_token: &str) -> Result<(), SessionError> {
        Ok(())
    }

    async fn current_user(&self, _access_token: &str) -> Result<User, SessionError> {
        Err(SessionError::Unauthorized)
    }
}

/// A manager over `api` that never touches the network.
pub fn build_offline_manager(api: Arc<SlowRefreshApi>, storage: Arc<dyn StorageBackend>) -> SessionManager {
    let config = test_config("http://127.0.0.1:9", SessionConfig::default());
    build_with(config, storage, api, reqwest::Client::new(), TokenClock::default())
}

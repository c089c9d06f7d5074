//! Request middleware for authenticated API calls.
//!
//! Attaches the current access token, and on an authorization failure joins the shared
//! refresh and re-issues the call exactly once. Anonymous calls and calls flagged
//! `skip_auth_refresh` are passed through untouched.

use std::sync::Arc;

use http::Method;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::auth::api::{join_url, read_json};
use crate::auth::refresh::RefreshCoordinator;
use crate::config::{ApiConfig, SessionConfig};
use crate::errors::SessionError;
use crate::store::SessionStore;
use crate::utils::fingerprint;

/// An outgoing API call, described so it can be issued again after a refresh.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    pub requires_auth: bool,
    pub skip_auth_refresh: bool,
    retried: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        ApiRequest {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            requires_auth: true,
            skip_auth_refresh: false,
            retried: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn json<T: Serialize>(mut self, body: &T) -> Result<Self, SessionError> {
        self.body = Some(serde_json::to_value(body)?);
        Ok(self)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Sends the call without a bearer credential.
    pub fn anonymous(mut self) -> Self {
        self.requires_auth = false;
        self
    }

    /// Bypasses refresh handling entirely.
    pub fn skip_auth_refresh(mut self) -> Self {
        self.skip_auth_refresh = true;
        self
    }

    /// Whether this call has already been re-issued after a refresh.
    pub fn is_retried(&self) -> bool {
        self.retried
    }
}

/// HTTP client for business calls, wired to the session.
#[derive(Clone)]
pub struct AuthClient {
    client: Client,
    base_url: String,
    store: Arc<SessionStore>,
    coordinator: Arc<RefreshCoordinator>,
    proactive_refresh: bool,
}

impl AuthClient {
    pub fn new(
        client: Client,
        api_config: &ApiConfig,
        session_config: &SessionConfig,
        store: Arc<SessionStore>,
        coordinator: Arc<RefreshCoordinator>,
    ) -> Self {
        AuthClient {
            client,
            base_url: api_config.base_url.clone(),
            store,
            coordinator,
            proactive_refresh: session_config.proactive_refresh,
        }
    }

    /// Issues the call. Transport failures are errors; HTTP statuses are left to the caller,
    /// except that an authorization failure is only returned after one refresh-and-retry.
    pub async fn execute(&self, mut request: ApiRequest) -> Result<Response, SessionError> {
        if !request.requires_auth {
            return self.dispatch(&request, None).await;
        }
        if request.skip_auth_refresh {
            let token = self.store.access_token();
            return self.dispatch(&request, token.as_deref()).await;
        }

        let token = self.pre_call_token(&request).await;
        let response = self.dispatch(&request, token.as_deref()).await?;
        if response.status() != StatusCode::UNAUTHORIZED || request.retried {
            return Ok(response);
        }

        request.retried = true;
        info!(
            event_name = "session.request.unauthorized",
            event_domain = "session",
            method = %request.method,
            path = request.path.as_str(),
            "Call rejected as unauthorized; refreshing session"
        );
        let fresh = match self.store.access_token() {
            // Another call already rotated the token while this one was in flight.
            Some(current) if token.as_deref() != Some(current.as_str()) => Some(current),
            _ => self.coordinator.ensure_fresh_token().await,
        };
        match fresh {
            Some(fresh) => {
                let retry = self.dispatch(&request, Some(&fresh)).await?;
                debug!(
                    "Retried {} {} after refresh: {}",
                    request.method,
                    request.path,
                    retry.status()
                );
                Ok(retry)
            }
            // The coordinator has already logged the session out.
            None => Ok(response),
        }
    }

    /// Issues the call and decodes a JSON body, mapping failure statuses to errors.
    pub async fn send_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, SessionError> {
        let response = self.execute(request).await?;
        read_json(response).await
    }

    /// Issues the call and discards the body, mapping failure statuses to errors.
    pub async fn send(&self, request: ApiRequest) -> Result<(), SessionError> {
        let response = self.execute(request).await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(crate::auth::api::status_error(status, body))
    }

    /// The token to attach, refreshing first when it is about to lapse.
    async fn pre_call_token(&self, request: &ApiRequest) -> Option<String> {
        let token = self.store.access_token()?;
        if !self.proactive_refresh || !self.store.clock().is_expiring_soon(&token) {
            return Some(token);
        }
        if self.store.refresh_token().is_none() {
            return Some(token);
        }
        debug!(
            "Access token {} is expiring; refreshing before {} {}",
            fingerprint(&token),
            request.method,
            request.path
        );
        // A failed refresh clears the session; the call then goes out without a credential.
        self.coordinator.ensure_fresh_token().await
    }

    async fn dispatch(&self, request: &ApiRequest, token: Option<&str>) -> Result<Response, SessionError> {
        let mut builder = self
            .client
            .request(request.method.clone(), join_url(&self.base_url, &request.path));
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }
        Ok(builder.send().await?)
    }
}

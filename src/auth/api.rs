use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::ApiConfig;
use crate::errors::SessionError;
use crate::models::{TokenGrant, User};

/// The authentication endpoints the session manager talks to.
///
/// None of these calls go through the refresh middleware; a failing login or refresh must
/// never trigger another refresh.
#[async_trait]
pub trait AuthApi: Send + Sync {
    async fn login(&self, email: &str, password: &str) -> Result<TokenGrant, SessionError>;
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, SessionError>;
    async fn logout(&self, access_token: &str) -> Result<(), SessionError>;
    async fn current_user(&self, access_token: &str) -> Result<User, SessionError>;
}

/// [`AuthApi`] over HTTP with JSON bodies.
pub struct HttpAuthApi {
    client: Client,
    config: ApiConfig,
}

impl HttpAuthApi {
    pub fn new(config: &ApiConfig) -> Result<Self, SessionError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: Client, config: &ApiConfig) -> Self {
        HttpAuthApi {
            client,
            config: config.clone(),
        }
    }

    fn url(&self, path: &str) -> String {
        join_url(&self.config.base_url, path)
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.client.post(self.url(path))
    }
}

#[async_trait]
impl AuthApi for HttpAuthApi {
    async fn login(&self, email: &str, password: &str) -> Result<TokenGrant, SessionError> {
        debug!("Logging in '{}'", email);
        let response = self
            .post(&self.config.endpoints.login)
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await?;

        match response.status() {
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                let body = response.text().await.unwrap_or_default();
                Err(SessionError::Credentials(error_detail(&body)))
            }
            _ => read_json(response).await,
        }
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, SessionError> {
        let response = self
            .post(&self.config.endpoints.refresh)
            .json(&json!({ "refreshToken": refresh_token }))
            .send()
            .await?;
        read_json(response).await
    }

    async fn logout(&self, access_token: &str) -> Result<(), SessionError> {
        let response = self
            .post(&self.config.endpoints.logout)
            .bearer_auth(access_token)
            .json(&json!({}))
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(status_error(status, body))
        }
    }

    async fn current_user(&self, access_token: &str) -> Result<User, SessionError> {
        let response = self
            .client
            .get(self.url(&self.config.endpoints.me))
            .bearer_auth(access_token)
            .send()
            .await?;
        read_json(response).await
    }
}

/// Joins a base URL and a path without doubling or dropping the slash.
pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Decodes a successful JSON response, mapping other statuses to [`SessionError`].
pub(crate) async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, SessionError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(status_error(status, body));
    }
    Ok(serde_json::from_str(&body)?)
}

pub(crate) fn status_error(status: StatusCode, body: String) -> SessionError {
    if status == StatusCode::UNAUTHORIZED {
        SessionError::Unauthorized
    } else {
        SessionError::Status {
            status,
            body: error_detail(&body),
        }
    }
}

/// Pulls `detail` (or `error`/`message`) out of a JSON error body, falling back to the raw text.
fn error_detail(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            ["detail", "error", "message"]
                .iter()
                .find_map(|key| value.get(*key).and_then(Value::as_str).map(str::to_string))
        })
        .unwrap_or_else(|| body.to_string())
}

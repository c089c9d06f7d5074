use std::time::Duration;

use figment::providers::{Env, Format, Yaml};
use figment::Figment;
use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};

use super::logging::LoggingConfig;
use super::storage::StorageConfig;

/// A top-level enum for versioned configurations.
#[derive(Deserialize, Serialize, JsonSchema)]
#[serde(tag = "version")]
pub enum Config {
    #[serde(rename = "1.0.0")]
    ConfigV1(ConfigV1),
}

/// Main config for v1.0.0: API location, session policy, storage backend and logging.
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct ConfigV1 {
    pub api: ApiConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Load config from a YAML file, with `NAMESEARCH_`-prefixed environment overrides.
pub fn load_config(path: &str) -> Result<ConfigV1, figment::Error> {
    let figment = Figment::new()
        .merge(Yaml::file(path))
        .merge(Env::prefixed("NAMESEARCH_").split("__"));
    match figment.extract::<Config>()? {
        Config::ConfigV1(c) => Ok(c),
    }
}

/// Print the JSON schema for the configuration to stdout.
pub fn print_schema() -> Result<(), serde_json::Error> {
    let schema = schema_for!(Config);
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}

/// Where the authentication API lives and how long a single call may take.
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct ApiConfig {
    pub base_url: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default)]
    pub endpoints: EndpointsConfig,
}

impl ApiConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        ApiConfig {
            base_url: base_url.into(),
            request_timeout_ms: default_request_timeout_ms(),
            endpoints: EndpointsConfig::default(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct EndpointsConfig {
    #[serde(default = "default_login_path")]
    pub login: String,
    #[serde(default = "default_refresh_path")]
    pub refresh: String,
    #[serde(default = "default_logout_path")]
    pub logout: String,
    #[serde(default = "default_me_path")]
    pub me: String,
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        EndpointsConfig {
            login: default_login_path(),
            refresh: default_refresh_path(),
            logout: default_logout_path(),
            me: default_me_path(),
        }
    }
}

/// Session lifecycle policy.
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct SessionConfig {
    /// Key of the persisted session record in durable storage.
    #[serde(default = "default_storage_key")]
    pub storage_key: String,
    /// Version stamped on the persisted record; records with another version are discarded.
    #[serde(default)]
    pub storage_version: u32,
    /// Tolerance subtracted from a token's expiry when judging whether it is expired.
    #[serde(default = "default_grace_seconds")]
    pub grace_seconds: i64,
    /// Remaining lifetime under which a token counts as expiring soon.
    #[serde(default = "default_expiring_soon_seconds")]
    pub expiring_soon_seconds: i64,
    /// Upper bound on a single refresh call; expiry releases the in-flight marker.
    #[serde(default = "default_refresh_timeout_ms")]
    pub refresh_timeout_ms: u64,
    /// Refresh before a call when the attached token is expiring soon.
    #[serde(default = "default_true")]
    pub proactive_refresh: bool,
}

impl SessionConfig {
    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_millis(self.refresh_timeout_ms)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            storage_key: default_storage_key(),
            storage_version: 0,
            grace_seconds: default_grace_seconds(),
            expiring_soon_seconds: default_expiring_soon_seconds(),
            refresh_timeout_ms: default_refresh_timeout_ms(),
            proactive_refresh: default_true(),
        }
    }
}

fn default_request_timeout_ms() -> u64 {
    15_000
}

fn default_refresh_timeout_ms() -> u64 {
    15_000
}

fn default_storage_key() -> String {
    "auth-storage".to_string()
}

fn default_grace_seconds() -> i64 {
    30
}

fn default_expiring_soon_seconds() -> i64 {
    300
}

fn default_true() -> bool {
    true
}

fn default_login_path() -> String {
    "/auth/login".to_string()
}

fn default_refresh_path() -> String {
    "/auth/refresh-token".to_string()
}

fn default_logout_path() -> String {
    "/auth/logout".to_string()
}

fn default_me_path() -> String {
    "/users/me".to_string()
}

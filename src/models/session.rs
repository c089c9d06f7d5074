use serde::{Deserialize, Serialize};

use super::user::User;

/// In-memory session state. Handed out to consumers as read-only clones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub user: Option<User>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    /// Derived from a successful login or refresh; never assigned directly.
    pub is_authenticated: bool,
    pub is_loading: bool,
    /// Set once the initialization pass finishes; never reset.
    pub is_initialized: bool,
    pub error: Option<String>,
}

impl Session {
    /// The durable projection of this session. Transient flags are left out.
    pub fn persisted(&self) -> PersistedSession {
        PersistedSession {
            user: self.user.clone(),
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
            is_authenticated: self.is_authenticated,
        }
    }
}

/// The part of a session written to durable storage.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSession {
    #[serde(default)]
    pub user: Option<User>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub is_authenticated: bool,
}

/// Envelope stored under the session storage key:
/// `{ "state": { user, accessToken, refreshToken, isAuthenticated }, "version": n }`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PersistedRecord {
    pub state: PersistedSession,
    #[serde(default)]
    pub version: u32,
}

impl PersistedRecord {
    pub fn new(state: PersistedSession, version: u32) -> Self {
        PersistedRecord { state, version }
    }

    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Lifecycle of the session as a whole.
///
/// `Initializing` is entered exactly once; afterwards the session moves between
/// `Authenticated` and `Unauthenticated` only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Uninitialized,
    Initializing,
    Authenticated,
    Unauthenticated,
}

use serde::{Deserialize, Serialize};

use super::user::User;

/// Tokens issued by the login and refresh endpoints.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TokenGrant {
    #[serde(alias = "access_token")]
    pub access_token: String,
    #[serde(default, alias = "refresh_token")]
    pub refresh_token: Option<String>,
    /// Some deployments return the identity alongside the tokens.
    #[serde(default)]
    pub user: Option<User>,
}

/// Claims read from a signed token. Only `exp` is required.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct TokenClaims {
    pub exp: i64,
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub iat: Option<i64>,
    /// "access" or "refresh".
    #[serde(default, rename = "type")]
    pub token_type: Option<String>,
}

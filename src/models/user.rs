use serde::{Deserialize, Serialize};

/// The identity record attached to an authenticated session.
///
/// Field aliases accept the backend's snake_case representation as well as the
/// camelCase one written to durable storage.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub email: String,
    #[serde(default, alias = "full_name", alias = "display_name")]
    pub display_name: Option<String>,
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(default, alias = "is_verified")]
    pub is_verified: bool,
}

impl User {
    pub fn new(id: i64, email: impl Into<String>) -> Self {
        User {
            id,
            email: email.into(),
            display_name: None,
            role: default_role(),
            is_verified: false,
        }
    }
}

fn default_role() -> String {
    "user".to_string()
}

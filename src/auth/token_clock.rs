//! Expiry checks for signed tokens.
//!
//! Tokens are decoded without signature verification: the server is the authority on
//! validity, this module only reads the embedded `exp` claim to decide when to refresh.
//! Anything that fails to decode is treated as expired.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, DecodingKey, Validation};

use crate::config::SessionConfig;
use crate::errors::TokenDecodeError;
use crate::models::TokenClaims;

/// Tolerance subtracted from a token's expiry, absorbing clock skew and latency.
pub const GRACE_SECONDS: i64 = 30;
/// Remaining lifetime under which a token counts as expiring soon.
pub const EXPIRING_SOON_SECONDS: i64 = 300;

/// Reads the claims of a token without checking its signature or expiry.
pub fn decode_claims(token: &str) -> Result<TokenClaims, TokenDecodeError> {
    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;

    let data = decode::<TokenClaims>(token, &DecodingKey::from_secret(&[]), &validation)?;
    Ok(data.claims)
}

/// Parses the token's embedded expiry claim.
pub fn decode_expiry(token: &str) -> Result<DateTime<Utc>, TokenDecodeError> {
    let exp = decode_claims(token)?.exp;
    DateTime::from_timestamp(exp, 0).ok_or(TokenDecodeError::ExpiryOutOfRange(exp))
}

/// True if `now >= expiry - grace_seconds`, or if the token cannot be decoded.
pub fn is_expired_at(token: &str, now: DateTime<Utc>, grace_seconds: i64) -> bool {
    match decode_expiry(token) {
        Ok(expiry) => now.timestamp() >= expiry.timestamp() - grace_seconds,
        Err(_) => true,
    }
}

/// True if `expiry - now <= within_seconds`, or if the token cannot be decoded.
pub fn is_expiring_soon_at(token: &str, now: DateTime<Utc>, within_seconds: i64) -> bool {
    match decode_expiry(token) {
        Ok(expiry) => expiry.timestamp() - now.timestamp() <= within_seconds,
        Err(_) => true,
    }
}

type NowFn = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Expiry policy bound to a time source. Tests swap the time source with [`TokenClock::with_now`].
#[derive(Clone)]
pub struct TokenClock {
    grace_seconds: i64,
    expiring_soon_seconds: i64,
    now: NowFn,
}

impl TokenClock {
    pub fn new(config: &SessionConfig) -> Self {
        TokenClock {
            grace_seconds: config.grace_seconds,
            expiring_soon_seconds: config.expiring_soon_seconds,
            now: Arc::new(Utc::now),
        }
    }

    pub fn with_now<F>(mut self, now: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        self.now = Arc::new(now);
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.now)()
    }

    pub fn is_expired(&self, token: &str) -> bool {
        is_expired_at(token, self.now(), self.grace_seconds)
    }

    pub fn is_expiring_soon(&self, token: &str) -> bool {
        self.is_expiring_soon_within(token, self.expiring_soon_seconds)
    }

    pub fn is_expiring_soon_within(&self, token: &str, within_seconds: i64) -> bool {
        is_expiring_soon_at(token, self.now(), within_seconds)
    }
}

impl Default for TokenClock {
    fn default() -> Self {
        TokenClock {
            grace_seconds: GRACE_SECONDS,
            expiring_soon_seconds: EXPIRING_SOON_SECONDS,
            now: Arc::new(Utc::now),
        }
    }
}

impl std::fmt::Debug for TokenClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenClock")
            .field("grace_seconds", &self.grace_seconds)
            .field("expiring_soon_seconds", &self.expiring_soon_seconds)
            .finish_non_exhaustive()
    }
}

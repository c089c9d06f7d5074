pub mod session;
pub mod token;
pub mod user;

pub use session::{PersistedRecord, PersistedSession, Session, SessionPhase};
pub use token::{TokenClaims, TokenGrant};
pub use user::User;

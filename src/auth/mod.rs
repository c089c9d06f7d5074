pub mod api;
pub mod refresh;
pub mod token_clock;

// Re-export the main pieces so we can do "use crate::auth::*;"
pub use api::{AuthApi, HttpAuthApi};
pub use refresh::RefreshCoordinator;
pub use token_clock::TokenClock;

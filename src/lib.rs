//! Session lifecycle manager for the name-search client: token storage, single-flight
//! refresh, an authenticated request middleware and cross-tab synchronization.
//!
//! Library exports, shared between the binary and tests.

pub mod auth;
pub mod client;
pub mod config;
pub mod errors;
pub mod models;
pub mod startup;
pub mod state;
pub mod store;
pub mod sync;
pub mod utils;

pub use errors::SessionError;
pub use state::SessionManager;

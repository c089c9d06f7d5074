pub mod base;
pub mod file_storage;
pub mod memory_storage;
pub mod session_store;

// Re-export the primary storage items so code outside can do
// "use crate::store::{StorageBackend, SessionStore};"
pub use base::{create_storage, ContextId, StorageBackend, StorageEvent};
pub use file_storage::FileStorage;
pub use memory_storage::MemoryStorage;
pub use session_store::{ListenerId, SessionStore};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Durable storage backends. We differentiate them via a "type" tag in the YAML.
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
#[serde(tag = "type")]
pub enum StorageConfig {
    /// Process-local storage; every session manager sharing it behaves like a tab
    /// of the same browser profile.
    #[serde(rename = "memory")]
    Memory,
    /// A JSON file shared between processes.
    #[serde(rename = "file")]
    File(FileStorageConfig),
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Memory
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct FileStorageConfig {
    pub path: String,
    /// How often to look for writes made by other processes. Zero disables the watcher.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

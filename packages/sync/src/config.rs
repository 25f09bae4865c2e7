use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CONFIG_NAME: &str = "tandem.config.json";

/// Tandem synchronization settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    /// Capacity of each actor's command channel
    #[serde(default = "default_command_capacity")]
    pub command_capacity: usize,

    /// Close a watched document after this long without operations
    #[serde(default = "default_inactivity_timeout_ms")]
    pub document_inactivity_timeout_ms: u64,

    /// How often the server looks for idle documents
    #[serde(default = "default_reaper_interval_ms")]
    pub reaper_interval_ms: u64,
}

fn default_command_capacity() -> usize {
    64
}

fn default_inactivity_timeout_ms() -> u64 {
    10 * 60 * 1000
}

fn default_reaper_interval_ms() -> u64 {
    30 * 1000
}

impl SyncConfig {
    /// Load config from a directory
    pub fn load(dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        let config_path = dir.as_ref().join(DEFAULT_CONFIG_NAME);

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: SyncConfig = serde_json::from_str(&content)?;
            Ok(config)
        } else {
            Ok(SyncConfig::default())
        }
    }

    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_millis(self.document_inactivity_timeout_ms)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_millis(self.reaper_interval_ms)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            command_capacity: default_command_capacity(),
            document_inactivity_timeout_ms: default_inactivity_timeout_ms(),
            reaper_interval_ms: default_reaper_interval_ms(),
        }
    }
}

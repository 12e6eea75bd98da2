//! Repository and persistence-context configuration.

use serde::{Deserialize, Serialize};

/// Settings for the repository layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Persistence-context provider: `"postgres"` or `"memory"`.
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Whether repositories created without an explicit flag track the
    /// entities they read.
    #[serde(default)]
    pub default_tracking: bool,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            default_tracking: false,
        }
    }
}

fn default_provider() -> String {
    "memory".to_string()
}

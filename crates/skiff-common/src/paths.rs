//! Standard filesystem paths for Skiff.

use std::path::PathBuf;

use once_cell::sync::Lazy;

/// Default configuration directory for Skiff.
pub static SKIFF_CONFIG_DIR: Lazy<PathBuf> = Lazy::new(|| {
    std::env::var("SKIFF_CONFIG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/etc/skiff"))
});

/// Standard paths used by the Skiff drivers.
#[derive(Debug, Clone)]
pub struct SkiffPaths {
    /// Configuration directory (default: /etc/skiff).
    pub config: PathBuf,
}

impl SkiffPaths {
    /// Create paths with default locations.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create paths with a custom configuration directory.
    #[must_use]
    pub fn with_config_dir(config: impl Into<PathBuf>) -> Self {
        Self {
            config: config.into(),
        }
    }

    /// Bridge driver configuration file.
    #[must_use]
    pub fn bridge_config(&self) -> PathBuf {
        self.config.join("bridge.toml")
    }

    /// Directory holding remote plugin descriptors.
    #[must_use]
    pub fn plugins(&self) -> PathBuf {
        self.config.join("plugins")
    }

    /// Descriptor file for a named remote plugin.
    #[must_use]
    pub fn plugin_spec(&self, name: &str) -> PathBuf {
        self.plugins().join(format!("{name}.spec"))
    }
}

impl Default for SkiffPaths {
    fn default() -> Self {
        Self {
            config: SKIFF_CONFIG_DIR.clone(),
        }
    }
}

//! Driver selection by network type.

use std::collections::HashMap;
use std::sync::Arc;

use crate::driver::Driver;
use crate::error::{NetworkError, NetworkResult};

/// Maps network type names to drivers.
#[derive(Default)]
pub struct DriverRegistry {
    drivers: HashMap<String, Arc<dyn Driver>>,
}

impl DriverRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a driver under its own network type, replacing any driver
    /// previously registered for that type.
    pub fn register(&mut self, driver: Arc<dyn Driver>) {
        let network_type = driver.network_type().to_string();
        if self
            .drivers
            .insert(network_type.clone(), driver)
            .is_some()
        {
            tracing::warn!(network_type = %network_type, "Replacing registered driver");
        } else {
            tracing::debug!(network_type = %network_type, "Driver registered");
        }
    }

    /// The driver for `network_type`.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::UnknownDriver`] if none is registered.
    pub fn get(&self, network_type: &str) -> NetworkResult<Arc<dyn Driver>> {
        self.drivers
            .get(network_type)
            .cloned()
            .ok_or_else(|| NetworkError::UnknownDriver {
                network_type: network_type.to_string(),
            })
    }

    /// Registered network types, sorted.
    #[must_use]
    pub fn network_types(&self) -> Vec<&str> {
        let mut types: Vec<_> = self.drivers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("network_types", &self.network_types())
            .finish()
    }
}

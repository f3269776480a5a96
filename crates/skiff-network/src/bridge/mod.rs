//! The in-process bridge driver.
//!
//! Bridge networks are backed by a Linux bridge device that already exists
//! on the host. The driver owns the firewall side of each network: NAT,
//! ICC policy and forwarding rules when the network is created, and
//! published ports when endpoints are created. Creating interfaces and
//! moving them into sandboxes is left to the runtime.

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use skiff_common::{EndpointId, NetworkId, SkiffError};

use crate::driver::{Driver, JoinInfo, SandboxInfo};
use crate::error::{NetworkError, NetworkResult};
use crate::iptables::Iptables;
use crate::options::{self, Options};
use crate::portmap::{PortBinding, PortMapper, PortMapping};

pub mod address;
pub mod setup_iptables;

pub use address::{AddressResolver, InterfaceAddrs, IpCommandResolver, StaticResolver};
pub use setup_iptables::{BridgeChains, set_icc, setup_ip_tables, teardown_ip_tables};

/// Network type served by [`BridgeDriver`].
pub const NETWORK_TYPE: &str = "bridge";

/// Bridge device used when a network does not name one.
pub const DEFAULT_BRIDGE: &str = "skiff0";

/// Firewall configuration of one bridge network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Bridge device name.
    pub bridge_name: String,
    /// Allow traffic between containers on the bridge.
    pub enable_icc: bool,
    /// Masquerade traffic leaving the bridge subnet.
    pub enable_ip_masquerade: bool,
    /// Masquerade locally originated traffic so containers can reach their
    /// own published ports through the host address. Used when no
    /// userland proxy serves published ports.
    pub hairpin_mode: bool,
    /// Program iptables at all.
    pub enable_ip_tables: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bridge_name: DEFAULT_BRIDGE.to_string(),
            enable_icc: true,
            enable_ip_masquerade: true,
            hairpin_mode: false,
            enable_ip_tables: true,
        }
    }
}

impl BridgeConfig {
    /// Default configuration for a named bridge.
    #[must_use]
    pub fn new(bridge_name: &str) -> Self {
        Self {
            bridge_name: bridge_name.to_string(),
            ..Self::default()
        }
    }

    /// Parse a TOML configuration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the TOML is invalid.
    pub fn from_toml(text: &str) -> NetworkResult<Self> {
        toml::from_str(text).map_err(|e| {
            SkiffError::Config {
                message: e.to_string(),
            }
            .into()
        })
    }

    /// Load a TOML configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> NetworkResult<Self> {
        let text = std::fs::read_to_string(path).map_err(SkiffError::from)?;
        Self::from_toml(&text)
    }

    fn apply_network_options(&mut self, opts: &Options) -> NetworkResult<()> {
        if let Some(name) = options::get_string(opts, options::BRIDGE_NAME)? {
            self.bridge_name = name;
        }
        if let Some(icc) = options::get_bool(opts, options::ENABLE_ICC)? {
            self.enable_icc = icc;
        }
        if let Some(masquerade) = options::get_bool(opts, options::ENABLE_IP_MASQUERADE)? {
            self.enable_ip_masquerade = masquerade;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct DriverDefaults {
    enable_ip_tables: bool,
    enable_userland_proxy: bool,
}

#[derive(Debug)]
struct Endpoint {
    address: Option<IpAddr>,
    ports: Vec<PortMapping>,
}

#[derive(Debug)]
struct BridgeNetwork {
    config: BridgeConfig,
    chains: Option<BridgeChains>,
    port_mapper: PortMapper,
    endpoints: HashMap<EndpointId, Endpoint>,
}

/// Driver for networks backed by a host bridge device.
pub struct BridgeDriver {
    ipt: Arc<dyn Iptables>,
    resolver: Arc<dyn AddressResolver>,
    defaults: Mutex<DriverDefaults>,
    networks: Mutex<HashMap<NetworkId, BridgeNetwork>>,
}

impl BridgeDriver {
    /// Create a bridge driver on top of the given firewall and address
    /// lookup primitives.
    pub fn new(ipt: Arc<dyn Iptables>, resolver: Arc<dyn AddressResolver>) -> Self {
        Self {
            ipt,
            resolver,
            defaults: Mutex::new(DriverDefaults {
                enable_ip_tables: true,
                enable_userland_proxy: true,
            }),
            networks: Mutex::new(HashMap::new()),
        }
    }

    /// The configuration a network was created with.
    #[must_use]
    pub fn network_config(&self, id: &NetworkId) -> Option<BridgeConfig> {
        self.networks.lock().get(id).map(|n| n.config.clone())
    }

    fn network_config_for(&self, opts: &Options) -> NetworkResult<BridgeConfig> {
        let defaults = *self.defaults.lock();
        let mut config = BridgeConfig {
            enable_ip_tables: defaults.enable_ip_tables,
            hairpin_mode: !defaults.enable_userland_proxy,
            ..BridgeConfig::default()
        };
        config.apply_network_options(opts)?;
        Ok(config)
    }
}

impl std::fmt::Debug for BridgeDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeDriver")
            .field("networks", &self.networks.lock().len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Driver for BridgeDriver {
    async fn config(&self, opts: &Options) -> NetworkResult<()> {
        let mut defaults = self.defaults.lock();
        if let Some(enabled) = options::get_bool(opts, options::ENABLE_IP_TABLES)? {
            defaults.enable_ip_tables = enabled;
        }
        if let Some(enabled) = options::get_bool(opts, options::ENABLE_USERLAND_PROXY)? {
            defaults.enable_userland_proxy = enabled;
        }
        tracing::debug!(
            iptables = defaults.enable_ip_tables,
            userland_proxy = defaults.enable_userland_proxy,
            "Bridge driver configured"
        );
        Ok(())
    }

    async fn create_network(&self, id: &NetworkId, opts: &Options) -> NetworkResult<()> {
        let config = self.network_config_for(opts)?;

        let mut networks = self.networks.lock();
        if networks.contains_key(id) {
            return Err(NetworkError::NetworkExists { id: id.to_string() });
        }

        let mut port_mapper = PortMapper::new(self.ipt.clone(), &config.bridge_name);
        let chains = if config.enable_ip_tables {
            Some(setup_ip_tables(
                self.ipt.as_ref(),
                self.resolver.as_ref(),
                &config,
                &mut port_mapper,
            )?)
        } else {
            None
        };

        tracing::info!(network = %id.short(), bridge = %config.bridge_name, "Bridge network created");
        networks.insert(
            id.clone(),
            BridgeNetwork {
                config,
                chains,
                port_mapper,
                endpoints: HashMap::new(),
            },
        );
        Ok(())
    }

    async fn delete_network(&self, id: &NetworkId) -> NetworkResult<()> {
        let mut networks = self.networks.lock();
        let network = networks
            .get_mut(id)
            .ok_or_else(|| NetworkError::UnknownNetwork { id: id.to_string() })?;

        // The network stays registered until teardown succeeds so a failed
        // delete can be retried.
        network.port_mapper.remove_all();
        teardown_ip_tables(
            self.ipt.as_ref(),
            self.resolver.as_ref(),
            &network.config,
            network.chains.as_ref(),
        )?;

        networks.remove(id);
        tracing::info!(network = %id.short(), "Bridge network deleted");
        Ok(())
    }

    async fn create_endpoint(
        &self,
        network_id: &NetworkId,
        endpoint_id: &EndpointId,
        opts: &Options,
    ) -> NetworkResult<SandboxInfo> {
        let address = options::get_ip(opts, options::ENDPOINT_ADDRESS)?;
        let bindings: Vec<PortBinding> =
            options::get_typed(opts, options::PORT_BINDINGS)?.unwrap_or_default();

        let mut networks = self.networks.lock();
        let network = networks
            .get_mut(network_id)
            .ok_or_else(|| NetworkError::UnknownNetwork {
                id: network_id.to_string(),
            })?;
        if network.endpoints.contains_key(endpoint_id) {
            return Err(NetworkError::EndpointExists {
                id: endpoint_id.to_string(),
            });
        }

        let mut ports: Vec<PortMapping> = Vec::with_capacity(bindings.len());
        if !bindings.is_empty() {
            let container_ip = address.ok_or_else(|| NetworkError::InvalidOption {
                key: options::ENDPOINT_ADDRESS.to_string(),
                message: "required when ports are published".to_string(),
            })?;

            for binding in &bindings {
                let mapping = binding.to_mapping(container_ip);
                if let Err(e) = network.port_mapper.add_mapping(mapping.clone()) {
                    for mapped in &ports {
                        if let Err(undo) = network.port_mapper.remove_mapping(mapped) {
                            tracing::warn!(error = %undo, "Failed to undo port mapping");
                        }
                    }
                    return Err(e);
                }
                ports.push(mapping);
            }
        }

        tracing::debug!(
            network = %network_id.short(),
            endpoint = %endpoint_id,
            ports = ports.len(),
            "Bridge endpoint created"
        );
        network
            .endpoints
            .insert(endpoint_id.clone(), Endpoint { address, ports });

        Ok(SandboxInfo::default())
    }

    async fn delete_endpoint(
        &self,
        network_id: &NetworkId,
        endpoint_id: &EndpointId,
    ) -> NetworkResult<()> {
        let mut networks = self.networks.lock();
        let network = networks
            .get_mut(network_id)
            .ok_or_else(|| NetworkError::UnknownNetwork {
                id: network_id.to_string(),
            })?;
        let endpoint = network
            .endpoints
            .remove(endpoint_id)
            .ok_or_else(|| NetworkError::UnknownEndpoint {
                id: endpoint_id.to_string(),
            })?;

        for mapping in &endpoint.ports {
            network.port_mapper.remove_mapping(mapping)?;
        }
        Ok(())
    }

    async fn endpoint_info(
        &self,
        network_id: &NetworkId,
        endpoint_id: &EndpointId,
    ) -> NetworkResult<Options> {
        let networks = self.networks.lock();
        let endpoint = networks
            .get(network_id)
            .ok_or_else(|| NetworkError::UnknownNetwork {
                id: network_id.to_string(),
            })?
            .endpoints
            .get(endpoint_id)
            .ok_or_else(|| NetworkError::UnknownEndpoint {
                id: endpoint_id.to_string(),
            })?;

        let mut info = Options::new();
        if let Some(address) = endpoint.address {
            info.insert(
                options::ENDPOINT_ADDRESS.to_string(),
                serde_json::Value::String(address.to_string()),
            );
        }
        let bindings: Vec<PortBinding> = endpoint.ports.iter().map(PortBinding::from).collect();
        info.insert(
            options::PORT_BINDINGS.to_string(),
            serde_json::to_value(bindings).map_err(SkiffError::from)?,
        );
        Ok(info)
    }

    async fn join(
        &self,
        network_id: &NetworkId,
        endpoint_id: &EndpointId,
        sandbox_key: &str,
        _options: &Options,
    ) -> NetworkResult<JoinInfo> {
        let bridge = {
            let networks = self.networks.lock();
            let network = networks
                .get(network_id)
                .ok_or_else(|| NetworkError::UnknownNetwork {
                    id: network_id.to_string(),
                })?;
            if !network.endpoints.contains_key(endpoint_id) {
                return Err(NetworkError::UnknownEndpoint {
                    id: endpoint_id.to_string(),
                });
            }
            network.config.bridge_name.clone()
        };

        let gateway = self.resolver.interface_addrs(&bridge)?.ipv4.addr();
        tracing::debug!(endpoint = %endpoint_id, sandbox = sandbox_key, %gateway, "Sandbox joined");

        Ok(JoinInfo {
            gateway: gateway.to_string(),
            ..JoinInfo::default()
        })
    }

    async fn leave(
        &self,
        network_id: &NetworkId,
        endpoint_id: &EndpointId,
        _options: &Options,
    ) -> NetworkResult<()> {
        let networks = self.networks.lock();
        let network = networks
            .get(network_id)
            .ok_or_else(|| NetworkError::UnknownNetwork {
                id: network_id.to_string(),
            })?;
        if !network.endpoints.contains_key(endpoint_id) {
            return Err(NetworkError::UnknownEndpoint {
                id: endpoint_id.to_string(),
            });
        }
        Ok(())
    }

    fn network_type(&self) -> &str {
        NETWORK_TYPE
    }
}

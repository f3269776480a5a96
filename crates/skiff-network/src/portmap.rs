//! Port mapping for published container ports.
//!
//! The bridge driver hands the port mapper its filter chain once the
//! network's firewall is set up; every published port is then programmed
//! into that chain.

use std::net::IpAddr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{NetworkError, NetworkResult};
use crate::iptables::{Action, Chain, Iptables};

/// Protocol for port mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// TCP protocol.
    #[default]
    Tcp,
    /// UDP protocol.
    Udp,
}

impl Protocol {
    /// Get the protocol string for iptables.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A port mapping between host and container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    /// Host port.
    pub host_port: u16,
    /// Container port.
    pub container_port: u16,
    /// Container IP address.
    pub container_ip: IpAddr,
    /// Protocol (TCP or UDP).
    pub protocol: Protocol,
    /// Host IP to bind to (`None` binds every address).
    pub host_ip: Option<IpAddr>,
}

impl PortMapping {
    /// Create a new TCP port mapping.
    #[must_use]
    pub const fn tcp(host_port: u16, container_port: u16, container_ip: IpAddr) -> Self {
        Self {
            host_port,
            container_port,
            container_ip,
            protocol: Protocol::Tcp,
            host_ip: None,
        }
    }

    /// Create a new UDP port mapping.
    #[must_use]
    pub const fn udp(host_port: u16, container_port: u16, container_ip: IpAddr) -> Self {
        Self {
            host_port,
            container_port,
            container_ip,
            protocol: Protocol::Udp,
            host_ip: None,
        }
    }

    /// Set the host IP to bind to.
    #[must_use]
    pub const fn with_host_ip(mut self, ip: IpAddr) -> Self {
        self.host_ip = Some(ip);
        self
    }

    /// Whether both mappings claim the same host port. An unset or
    /// unspecified host IP covers every address.
    #[must_use]
    pub fn conflicts_with(&self, other: &Self) -> bool {
        let wildcard = |ip: Option<IpAddr>| ip.is_none_or(|ip| ip.is_unspecified());
        self.host_port == other.host_port
            && self.protocol == other.protocol
            && (wildcard(self.host_ip) || wildcard(other.host_ip) || self.host_ip == other.host_ip)
    }
}

/// A published port as requested in endpoint options. The container
/// address comes from the endpoint itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortBinding {
    /// Host port.
    pub host_port: u16,
    /// Container port.
    pub container_port: u16,
    /// Protocol, TCP when omitted.
    #[serde(default)]
    pub protocol: Protocol,
    /// Host IP to bind to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_ip: Option<IpAddr>,
}

impl PortBinding {
    /// The mapping of this binding onto a container address.
    #[must_use]
    pub const fn to_mapping(&self, container_ip: IpAddr) -> PortMapping {
        PortMapping {
            host_port: self.host_port,
            container_port: self.container_port,
            container_ip,
            protocol: self.protocol,
            host_ip: self.host_ip,
        }
    }
}

impl From<&PortMapping> for PortBinding {
    fn from(mapping: &PortMapping) -> Self {
        Self {
            host_port: mapping.host_port,
            container_port: mapping.container_port,
            protocol: mapping.protocol,
            host_ip: mapping.host_ip,
        }
    }
}

/// Programs published ports into a bridge's chain.
pub struct PortMapper {
    ipt: Arc<dyn Iptables>,
    bridge: String,
    chain: Option<Chain>,
    mappings: Vec<PortMapping>,
}

impl std::fmt::Debug for PortMapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortMapper")
            .field("bridge", &self.bridge)
            .field("chain", &self.chain)
            .field("mappings", &self.mappings)
            .finish_non_exhaustive()
    }
}

impl PortMapper {
    /// Create a port mapper for a bridge. Ports can be mapped once a chain
    /// has been set.
    pub fn new(ipt: Arc<dyn Iptables>, bridge: &str) -> Self {
        Self {
            ipt,
            bridge: bridge.to_string(),
            chain: None,
            mappings: Vec::new(),
        }
    }

    /// Use `chain` for all later mappings.
    pub fn set_chain(&mut self, chain: Chain) {
        tracing::debug!(bridge = %self.bridge, chain = %chain.name, "Port mapper chain set");
        self.chain = Some(chain);
    }

    /// The chain mappings are programmed into.
    #[must_use]
    pub const fn chain(&self) -> Option<&Chain> {
        self.chain.as_ref()
    }

    fn require_chain(&self) -> NetworkResult<&Chain> {
        self.chain.as_ref().ok_or_else(|| NetworkError::NoChain {
            bridge: self.bridge.clone(),
        })
    }

    /// Add a port mapping.
    ///
    /// # Errors
    ///
    /// Returns an error if no chain is set, the host port is already
    /// published or the rules cannot be added.
    pub fn add_mapping(&mut self, mapping: PortMapping) -> NetworkResult<()> {
        tracing::debug!(
            host_port = mapping.host_port,
            container_port = mapping.container_port,
            container_ip = %mapping.container_ip,
            protocol = %mapping.protocol,
            "Adding port mapping"
        );

        let chain = self.require_chain()?;
        if let Some(existing) = self.mappings.iter().find(|m| m.conflicts_with(&mapping)) {
            return Err(NetworkError::PortAllocated {
                host_port: mapping.host_port,
                protocol: mapping.protocol.as_str(),
                container_ip: existing.container_ip,
            });
        }
        chain.forward(self.ipt.as_ref(), Action::Append, &mapping)?;
        self.mappings.push(mapping);
        Ok(())
    }

    /// Remove a port mapping. Mappings that were never added are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the rules cannot be removed.
    pub fn remove_mapping(&mut self, mapping: &PortMapping) -> NetworkResult<()> {
        let idx = self.mappings.iter().position(|m| m == mapping);

        if let Some(idx) = idx {
            let chain = self.require_chain()?;
            chain.forward(self.ipt.as_ref(), Action::Delete, &self.mappings[idx])?;
            self.mappings.remove(idx);
        }

        Ok(())
    }

    /// Remove all port mappings, continuing past individual failures.
    pub fn remove_all(&mut self) {
        let mappings: Vec<_> = self.mappings.drain(..).collect();
        let Some(chain) = &self.chain else {
            return;
        };
        for mapping in mappings {
            if let Err(e) = chain.forward(self.ipt.as_ref(), Action::Delete, &mapping) {
                tracing::warn!(error = %e, host_port = mapping.host_port, "Failed to remove port mapping");
            }
        }
    }

    /// Get active mappings.
    #[must_use]
    pub fn mappings(&self) -> &[PortMapping] {
        &self.mappings
    }
}

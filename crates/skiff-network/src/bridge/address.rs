//! Bridge interface address discovery.

use std::collections::HashMap;
use std::process::Command;

use ipnet::{IpNet, Ipv4Net, Ipv6Net};

use crate::error::{NetworkError, NetworkResult};

/// Addresses configured on an interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceAddrs {
    /// The primary IPv4 address, with its prefix length.
    pub ipv4: Ipv4Net,
    /// All IPv6 addresses.
    pub ipv6: Vec<Ipv6Net>,
}

/// Looks up the addresses of a network interface.
pub trait AddressResolver: Send + Sync {
    /// Addresses of `interface`.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::AddressResolution`] if the interface does not
    /// exist or has no IPv4 address.
    fn interface_addrs(&self, interface: &str) -> NetworkResult<InterfaceAddrs>;
}

fn resolution_error(interface: &str, message: impl Into<String>) -> NetworkError {
    NetworkError::AddressResolution {
        interface: interface.to_string(),
        message: message.into(),
    }
}

/// Resolves addresses with `ip -o addr show dev <name>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct IpCommandResolver;

impl AddressResolver for IpCommandResolver {
    fn interface_addrs(&self, interface: &str) -> NetworkResult<InterfaceAddrs> {
        let output = Command::new("ip")
            .args(["-o", "addr", "show", "dev", interface])
            .output()
            .map_err(|e| resolution_error(interface, format!("failed to run ip: {e}")))?;

        if !output.status.success() {
            return Err(resolution_error(
                interface,
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        parse_addr_output(interface, &String::from_utf8_lossy(&output.stdout))
    }
}

/// Parse one-line-per-address `ip -o addr` output.
///
/// # Errors
///
/// Returns an error if the output holds no IPv4 address.
pub fn parse_addr_output(interface: &str, output: &str) -> NetworkResult<InterfaceAddrs> {
    let mut ipv4 = Vec::new();
    let mut ipv6 = Vec::new();

    for line in output.lines() {
        let mut fields = line.split_whitespace();
        while let Some(field) = fields.next() {
            if field != "inet" && field != "inet6" {
                continue;
            }
            match fields.next().and_then(|cidr| cidr.parse::<IpNet>().ok()) {
                Some(IpNet::V4(net)) => ipv4.push(net),
                Some(IpNet::V6(net)) => ipv6.push(net),
                None => {}
            }
            break;
        }
    }

    let Some(&first) = ipv4.first() else {
        return Err(resolution_error(
            interface,
            format!("Interface {interface} has no IPv4 addresses"),
        ));
    };

    if ipv4.len() > 1 {
        tracing::info!(
            interface,
            address = %first,
            "Interface has more than one IPv4 address, using the first"
        );
    }

    Ok(InterfaceAddrs { ipv4: first, ipv6 })
}

/// Resolves from a fixed table. Used for dry runs and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    interfaces: HashMap<String, InterfaceAddrs>,
}

impl StaticResolver {
    /// An empty resolver; every lookup fails.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer lookups of `interface` with `ipv4`.
    #[must_use]
    pub fn with_interface(mut self, interface: &str, ipv4: Ipv4Net) -> Self {
        self.interfaces.insert(
            interface.to_string(),
            InterfaceAddrs {
                ipv4,
                ipv6: Vec::new(),
            },
        );
        self
    }
}

impl AddressResolver for StaticResolver {
    fn interface_addrs(&self, interface: &str) -> NetworkResult<InterfaceAddrs> {
        self.interfaces
            .get(interface)
            .cloned()
            .ok_or_else(|| resolution_error(interface, "no such interface"))
    }
}

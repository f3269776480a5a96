//! Wire format of the network plugin protocol.
//!
//! Field names follow the plugin protocol exactly and must not change.

use std::net::IpAddr;

use ipnet::IpNet;
use serde::{Deserialize, Deserializer, Serialize};

use crate::driver::{Interface, SandboxInfo};
use crate::error::{NetworkError, NetworkResult};
use crate::options::Options;

/// Remote procedure creating a network.
pub const CREATE_NETWORK: &str = "NetworkDriver.CreateNetwork";
/// Remote procedure creating an endpoint.
pub const CREATE_ENDPOINT: &str = "NetworkDriver.CreateEndpoint";
/// Remote procedure deleting an endpoint.
pub const DELETE_ENDPOINT: &str = "NetworkDriver.DeleteEndpoint";
/// Remote procedure attaching a sandbox.
pub const JOIN: &str = "NetworkDriver.Join";
/// Remote procedure detaching a sandbox.
pub const LEAVE: &str = "NetworkDriver.Leave";

/// Plugins may send `null` for empty lists.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

/// `NetworkDriver.CreateNetwork` request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateNetworkRequest<'a> {
    /// Network ID.
    pub id: &'a str,
    /// Caller options, passed through.
    pub options: &'a Options,
}

/// `NetworkDriver.CreateEndpoint` request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateEndpointRequest<'a> {
    /// Network ID.
    pub network_id: &'a str,
    /// Endpoint ID.
    pub id: &'a str,
    /// Caller options, passed through.
    pub options: &'a Options,
}

/// `NetworkDriver.DeleteEndpoint` request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeleteEndpointRequest<'a> {
    /// Network ID.
    pub network_id: &'a str,
    /// Endpoint ID.
    pub endpoint_id: &'a str,
}

/// `NetworkDriver.Join` request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct JoinRequest<'a> {
    /// Network ID.
    pub network_id: &'a str,
    /// Endpoint ID.
    pub endpoint_id: &'a str,
    /// Key identifying the sandbox.
    pub sandbox_key: &'a str,
    /// Caller options, passed through.
    pub options: &'a Options,
}

/// `NetworkDriver.Leave` request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct LeaveRequest<'a> {
    /// Network ID.
    pub network_id: &'a str,
    /// Endpoint ID.
    pub endpoint_id: &'a str,
    /// Caller options, passed through.
    pub options: &'a Options,
}

/// An interface in a `NetworkDriver.CreateEndpoint` response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct EndpointInterface {
    /// Host side name.
    #[serde(rename = "SrcName", default)]
    pub src_name: String,
    /// Name inside the sandbox.
    #[serde(rename = "DstName", default)]
    pub dst_name: String,
    /// IPv4 address in CIDR notation.
    #[serde(rename = "Address", default)]
    pub address: String,
    /// IPv6 address in CIDR notation.
    #[serde(rename = "AddressIPv6", default)]
    pub address_ipv6: String,
}

/// `NetworkDriver.CreateEndpoint` response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CreateEndpointResponse {
    /// Interfaces to place in the sandbox.
    #[serde(rename = "Interfaces", default, deserialize_with = "null_as_default")]
    pub interfaces: Vec<EndpointInterface>,
    /// IPv4 gateway.
    #[serde(rename = "Gateway", default)]
    pub gateway: String,
    /// IPv6 gateway.
    #[serde(rename = "GatewayIPv6", default)]
    pub gateway_ipv6: String,
}

fn parse_cidr(field: &'static str, value: &str) -> NetworkResult<Option<IpNet>> {
    if value.is_empty() {
        return Ok(None);
    }
    // IpNet keeps the host bits, so "172.17.0.2/16" stays 172.17.0.2.
    value
        .parse()
        .map(Some)
        .map_err(|_| NetworkError::InvalidAddress {
            field,
            value: value.to_string(),
        })
}

fn parse_ip(field: &'static str, value: &str) -> NetworkResult<Option<IpAddr>> {
    if value.is_empty() {
        return Ok(None);
    }
    value
        .parse()
        .map(Some)
        .map_err(|_| NetworkError::InvalidAddress {
            field,
            value: value.to_string(),
        })
}

impl CreateEndpointResponse {
    /// Convert into sandbox information.
    ///
    /// Empty strings mean "not set".
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::InvalidAddress`] for the first malformed
    /// address or gateway; nothing is returned for the other interfaces.
    pub fn to_sandbox_info(&self) -> NetworkResult<SandboxInfo> {
        let interfaces = self
            .interfaces
            .iter()
            .map(|iface| {
                Ok(Interface {
                    src_name: iface.src_name.clone(),
                    dst_name: iface.dst_name.clone(),
                    address: parse_cidr("Address", &iface.address)?,
                    address_ipv6: parse_cidr("AddressIPv6", &iface.address_ipv6)?,
                })
            })
            .collect::<NetworkResult<Vec<_>>>()?;

        Ok(SandboxInfo {
            interfaces,
            gateway: parse_ip("Gateway", &self.gateway)?,
            gateway_ipv6: parse_ip("GatewayIPv6", &self.gateway_ipv6)?,
        })
    }
}

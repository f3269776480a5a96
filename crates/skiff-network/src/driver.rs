//! The network driver contract.

use std::net::IpAddr;

use async_trait::async_trait;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use skiff_common::{EndpointId, NetworkId};

use crate::error::NetworkResult;
use crate::options::Options;

/// A network interface to be placed in a sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Interface {
    /// Name of the interface on the host side.
    pub src_name: String,
    /// Name the interface gets inside the sandbox.
    pub dst_name: String,
    /// IPv4 address with the prefix length of its network.
    pub address: Option<IpNet>,
    /// IPv6 address with the prefix length of its network.
    pub address_ipv6: Option<IpNet>,
}

/// What a sandbox needs to attach to an endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SandboxInfo {
    /// Interfaces to move into the sandbox.
    pub interfaces: Vec<Interface>,
    /// IPv4 gateway.
    pub gateway: Option<IpAddr>,
    /// IPv6 gateway.
    pub gateway_ipv6: Option<IpAddr>,
}

/// Source and destination names of an interface handed over on join.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InterfaceName {
    /// Name on the host side.
    #[serde(default)]
    pub src_name: String,
    /// Name inside the sandbox.
    #[serde(default)]
    pub dst_name: String,
}

/// Result of joining a sandbox to an endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinInfo {
    /// Interfaces to rename inside the sandbox.
    #[serde(
        rename = "InterfaceNames",
        default,
        deserialize_with = "crate::remote::api::null_as_default"
    )]
    pub interface_names: Vec<InterfaceName>,
    /// IPv4 gateway.
    #[serde(rename = "Gateway", default)]
    pub gateway: String,
    /// IPv6 gateway.
    #[serde(rename = "GatewayIPv6", default)]
    pub gateway_ipv6: String,
    /// Path of a hosts file to use in the sandbox.
    #[serde(rename = "HostsPath", default)]
    pub hosts_path: String,
    /// Path of a resolv.conf to use in the sandbox.
    #[serde(rename = "ResolvConfPath", default)]
    pub resolv_conf_path: String,
}

/// A network driver.
///
/// The runtime picks one implementation per network by type name (see
/// [`crate::registry::DriverRegistry`]) and routes every network, endpoint
/// and sandbox operation for that network through it.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Apply driver-wide configuration.
    async fn config(&self, options: &Options) -> NetworkResult<()>;

    /// Create a network.
    async fn create_network(&self, id: &NetworkId, options: &Options) -> NetworkResult<()>;

    /// Delete a network.
    async fn delete_network(&self, id: &NetworkId) -> NetworkResult<()>;

    /// Create an endpoint on a network.
    async fn create_endpoint(
        &self,
        network_id: &NetworkId,
        endpoint_id: &EndpointId,
        options: &Options,
    ) -> NetworkResult<SandboxInfo>;

    /// Delete an endpoint.
    async fn delete_endpoint(
        &self,
        network_id: &NetworkId,
        endpoint_id: &EndpointId,
    ) -> NetworkResult<()>;

    /// Driver-specific details about an endpoint.
    async fn endpoint_info(
        &self,
        network_id: &NetworkId,
        endpoint_id: &EndpointId,
    ) -> NetworkResult<Options>;

    /// Attach a sandbox to an endpoint.
    async fn join(
        &self,
        network_id: &NetworkId,
        endpoint_id: &EndpointId,
        sandbox_key: &str,
        options: &Options,
    ) -> NetworkResult<JoinInfo>;

    /// Detach a sandbox from an endpoint.
    async fn leave(
        &self,
        network_id: &NetworkId,
        endpoint_id: &EndpointId,
        options: &Options,
    ) -> NetworkResult<()>;

    /// The network type this driver serves.
    fn network_type(&self) -> &str;
}

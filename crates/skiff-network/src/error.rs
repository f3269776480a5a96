//! Error types for the network drivers.

use miette::Diagnostic;
use skiff_common::SkiffError;
use thiserror::Error;

use crate::iptables::Table;

/// Result type alias using [`NetworkError`].
pub type NetworkResult<T> = Result<T, NetworkError>;

/// Errors raised by the bridge and remote drivers.
#[derive(Error, Diagnostic, Debug)]
pub enum NetworkError {
    /// Firewall orchestration was requested for a bridge with iptables disabled.
    #[error("Cannot program iptables for bridge {bridge}: iptables is disabled")]
    #[diagnostic(
        code(skiff::bridge::iptables_disabled),
        help("Set enable_ip_tables = true in the bridge configuration")
    )]
    IptablesDisabled {
        /// The bridge whose configuration disables iptables.
        bridge: String,
    },

    /// The bridge interface address could not be discovered.
    #[error("Failed to setup IP tables, cannot acquire interface address of {interface}: {message}")]
    #[diagnostic(code(skiff::bridge::address))]
    AddressResolution {
        /// The interface that was queried.
        interface: String,
        /// What went wrong.
        message: String,
    },

    /// The iptables binary could not be run or exited with a failure.
    #[error("iptables failed: iptables {}: {message}", .args.join(" "))]
    #[diagnostic(
        code(skiff::iptables::command),
        help("Check that iptables is installed and that skiff runs with CAP_NET_ADMIN")
    )]
    Iptables {
        /// Arguments passed to iptables.
        args: Vec<String>,
        /// Output or spawn error text.
        message: String,
    },

    /// iptables exited successfully but printed diagnostic text.
    #[error("Error iptables {chain}: {output}")]
    #[diagnostic(code(skiff::iptables::chain))]
    Chain {
        /// The chain the command targeted.
        chain: String,
        /// Raw output of the command.
        output: String,
    },

    /// A rule could not be inserted or removed.
    #[error("Unable to {operation} {label} rule: {source}")]
    #[diagnostic(code(skiff::iptables::rule))]
    RuleProgramming {
        /// `enable` or `disable`.
        operation: &'static str,
        /// Human readable rule name.
        label: String,
        /// The underlying command failure.
        #[source]
        source: Box<NetworkError>,
    },

    /// The ICC policy rule could not be installed.
    #[error("Unable to {action} intercontainer communication: {message}")]
    #[diagnostic(code(skiff::iptables::icc))]
    Icc {
        /// `allow` or `prevent`.
        action: &'static str,
        /// Command error or unexpected output.
        message: String,
    },

    /// Rule programming for a bridge failed.
    #[error("Failed to Setup IP tables: {source}")]
    #[diagnostic(code(skiff::bridge::setup))]
    IptablesSetup {
        /// The step that failed.
        #[source]
        source: Box<NetworkError>,
    },

    /// A top-level chain could not be created or removed.
    #[error("Failed to create {table} chain: {source}")]
    #[diagnostic(code(skiff::iptables::new_chain))]
    ChainCreation {
        /// Table of the chain.
        table: Table,
        /// The underlying failure.
        #[source]
        source: Box<NetworkError>,
    },

    /// The driver does not implement this operation.
    #[error("Not implemented: {operation}")]
    #[diagnostic(code(skiff::driver::not_implemented))]
    NotImplemented {
        /// The operation that was requested.
        operation: &'static str,
    },

    /// No driver is registered for a network type.
    #[error("No driver registered for network type {network_type}")]
    #[diagnostic(code(skiff::driver::unknown))]
    UnknownDriver {
        /// The requested network type.
        network_type: String,
    },

    /// The network is not known to the driver.
    #[error("Network not found: {id}")]
    #[diagnostic(code(skiff::network::not_found))]
    UnknownNetwork {
        /// The network ID.
        id: String,
    },

    /// A network with this ID already exists.
    #[error("Network already exists: {id}")]
    #[diagnostic(code(skiff::network::exists))]
    NetworkExists {
        /// The network ID.
        id: String,
    },

    /// An endpoint with this ID already exists.
    #[error("Endpoint already exists: {id}")]
    #[diagnostic(code(skiff::endpoint::exists))]
    EndpointExists {
        /// The endpoint ID.
        id: String,
    },

    /// The endpoint is not known to the driver.
    #[error("Endpoint not found: {id}")]
    #[diagnostic(code(skiff::endpoint::not_found))]
    UnknownEndpoint {
        /// The endpoint ID.
        id: String,
    },

    /// An option value has the wrong shape.
    #[error("Invalid value for option {key}: {message}")]
    #[diagnostic(code(skiff::options::invalid))]
    InvalidOption {
        /// Option key.
        key: String,
        /// What was wrong with it.
        message: String,
    },

    /// The host port is already published on this bridge.
    #[error("Host port {host_port}/{protocol} is already published to {container_ip}")]
    #[diagnostic(
        code(skiff::portmap::allocated),
        help("Choose a different host port or host IP")
    )]
    PortAllocated {
        /// Host port.
        host_port: u16,
        /// Protocol name.
        protocol: &'static str,
        /// Container the port is published to.
        container_ip: std::net::IpAddr,
    },

    /// A port mapping was requested before the bridge chain existed.
    #[error("Port mapper for bridge {bridge} has no iptables chain")]
    #[diagnostic(
        code(skiff::portmap::no_chain),
        help("Create the network before publishing ports on it")
    )]
    NoChain {
        /// The bridge name.
        bridge: String,
    },

    /// An address in a plugin response is malformed.
    #[error("Invalid {field} in plugin response: {value:?}")]
    #[diagnostic(code(skiff::remote::invalid_address))]
    InvalidAddress {
        /// The response field.
        field: &'static str,
        /// The offending value.
        value: String,
    },

    /// A plugin response could not be decoded.
    #[error("Failed to decode {method} response: {source}")]
    #[diagnostic(code(skiff::remote::decode))]
    Decode {
        /// The remote procedure.
        method: String,
        /// JSON decode error.
        #[source]
        source: serde_json::Error,
    },

    /// The plugin reported an error.
    #[error("Plugin error from {method}: {message}")]
    #[diagnostic(code(skiff::remote::plugin))]
    Plugin {
        /// The remote procedure.
        method: String,
        /// Message returned by the plugin.
        message: String,
    },

    /// The plugin could not be reached.
    #[error("Plugin transport error: {0}")]
    #[diagnostic(code(skiff::remote::transport))]
    Transport(#[from] reqwest::Error),

    /// Shared error from skiff-common.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Common(#[from] SkiffError),
}

impl NetworkError {
    /// Create a `NotImplemented` error.
    #[must_use]
    pub const fn not_implemented(operation: &'static str) -> Self {
        Self::NotImplemented { operation }
    }
}

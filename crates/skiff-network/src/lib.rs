//! # skiff-network
//!
//! Network drivers for Skiff.
//!
//! Two backends implement the [`Driver`] contract:
//! - [`BridgeDriver`] programs the host's iptables for networks backed by a
//!   Linux bridge: NAT, inter-container communication policy, forwarding
//!   and published ports.
//! - [`RemoteDriver`] forwards every operation to an out-of-process network
//!   plugin.
//!
//! [`DriverRegistry`] selects a backend by network type name.

#![warn(missing_docs)]

pub mod bridge;
pub mod driver;
pub mod error;
pub mod iptables;
pub mod options;
pub mod portmap;
pub mod registry;
pub mod remote;

pub use bridge::{BridgeConfig, BridgeDriver};
pub use driver::{Driver, Interface, InterfaceName, JoinInfo, SandboxInfo};
pub use error::{NetworkError, NetworkResult};
pub use iptables::{Iptables, MemoryIptables, SystemIptables, Table};
pub use options::Options;
pub use portmap::{PortBinding, PortMapper, PortMapping, Protocol};
pub use registry::DriverRegistry;
pub use remote::{HttpPluginClient, PluginClient, RemoteDriver};

//! Option maps passed through driver calls.
//!
//! Options are an open map of string keys to JSON values. Remote drivers
//! forward them untouched; the bridge driver reads the keys below and
//! ignores everything else.

use std::collections::BTreeMap;
use std::net::IpAddr;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{NetworkError, NetworkResult};

/// Caller-supplied driver options.
pub type Options = BTreeMap<String, Value>;

/// Driver-wide: whether the bridge driver programs iptables (bool).
pub const ENABLE_IP_TABLES: &str = "skiff.bridge.enable_ip_tables";
/// Driver-wide: whether a userland proxy serves published ports (bool).
/// Hairpin NAT is used when this is off.
pub const ENABLE_USERLAND_PROXY: &str = "skiff.bridge.enable_userland_proxy";

/// Per network: bridge device name (string).
pub const BRIDGE_NAME: &str = "skiff.network.bridge.name";
/// Per network: allow traffic between containers on the bridge (bool).
pub const ENABLE_ICC: &str = "skiff.network.bridge.enable_icc";
/// Per network: masquerade traffic leaving the bridge subnet (bool).
pub const ENABLE_IP_MASQUERADE: &str = "skiff.network.bridge.enable_ip_masquerade";

/// Per endpoint: the container address ports are forwarded to (string).
pub const ENDPOINT_ADDRESS: &str = "skiff.endpoint.address";
/// Per endpoint: published ports, a list of
/// `{"host_port", "container_port", "protocol"?, "host_ip"?}` objects.
pub const PORT_BINDINGS: &str = "skiff.endpoint.port_bindings";

fn invalid(key: &str, message: impl Into<String>) -> NetworkError {
    NetworkError::InvalidOption {
        key: key.to_string(),
        message: message.into(),
    }
}

/// Read a boolean option. Accepts JSON booleans and the strings
/// `"true"`/`"false"`.
///
/// # Errors
///
/// Returns [`NetworkError::InvalidOption`] for any other value.
pub fn get_bool(options: &Options, key: &str) -> NetworkResult<Option<bool>> {
    match options.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(Value::String(s)) => s
            .parse()
            .map(Some)
            .map_err(|_| invalid(key, format!("expected a boolean, got {s:?}"))),
        Some(other) => Err(invalid(key, format!("expected a boolean, got {other}"))),
    }
}

/// Read a string option.
///
/// # Errors
///
/// Returns [`NetworkError::InvalidOption`] if the value is not a string.
pub fn get_string(options: &Options, key: &str) -> NetworkResult<Option<String>> {
    match options.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(invalid(key, format!("expected a string, got {other}"))),
    }
}

/// Read an IP address option.
///
/// # Errors
///
/// Returns [`NetworkError::InvalidOption`] if the value is not an address.
pub fn get_ip(options: &Options, key: &str) -> NetworkResult<Option<IpAddr>> {
    get_string(options, key)?
        .map(|s| {
            s.parse()
                .map_err(|_| invalid(key, format!("expected an IP address, got {s:?}")))
        })
        .transpose()
}

/// Deserialize an option into a typed value.
///
/// # Errors
///
/// Returns [`NetworkError::InvalidOption`] if the value has the wrong shape.
pub fn get_typed<T: DeserializeOwned>(options: &Options, key: &str) -> NetworkResult<Option<T>> {
    match options.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value.clone())
            .map(Some)
            .map_err(|e| invalid(key, e.to_string())),
    }
}

//! Top-level chains that anchor driver-owned rules.

use std::net::IpAddr;

use crate::error::NetworkResult;
use crate::portmap::PortMapping;

use super::{Action, Iptables, Table, raw_checked, to_args};

/// Name of the chain published ports are programmed into.
pub const DOCKER_CHAIN: &str = "DOCKER";

/// Handle to a chain created for a bridge.
///
/// The chain itself is shared by every bridge; the handle remembers which
/// bridge it was linked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chain {
    /// Chain name.
    pub name: String,
    /// Bridge device the chain was linked for.
    pub bridge: String,
    /// Table the chain lives in.
    pub table: Table,
}

/// Create `name` in `table` if missing and link it into the built-in chains.
///
/// In the nat table the chain is jumped to from PREROUTING and OUTPUT for
/// locally addressed traffic; without hairpin mode loopback destinations
/// are excluded from OUTPUT. In the filter table it is jumped to from
/// FORWARD for traffic leaving through `bridge`.
///
/// # Errors
///
/// Returns an error if creating the chain or a linking rule fails.
pub fn new_chain(
    ipt: &dyn Iptables,
    name: &str,
    bridge: &str,
    table: Table,
    hairpin_mode: bool,
) -> NetworkResult<Chain> {
    let chain = Chain {
        name: name.to_string(),
        bridge: bridge.to_string(),
        table,
    };

    if ipt
        .raw(&to_args(&["-t", table.as_str(), "-n", "-L", name]))
        .is_err()
    {
        tracing::debug!(table = table.as_str(), chain = name, "Creating chain");
        raw_checked(ipt, name, &to_args(&["-t", table.as_str(), "-N", name]))?;
    }

    for (parent, link) in chain.links(hairpin_mode) {
        if ipt.exists(table, parent, &link) {
            continue;
        }
        let mut cmd = to_args(&["-t", table.as_str()]);
        // FORWARD jumps go first so they win over broader accept rules.
        let action = if table == Table::Filter {
            Action::Insert
        } else {
            Action::Append
        };
        cmd.push(action.flag().to_string());
        cmd.push(parent.to_string());
        cmd.extend(link);
        raw_checked(ipt, parent, &cmd)?;
    }

    Ok(chain)
}

impl Chain {
    /// Jump rules that feed this chain, as `(parent chain, args)`.
    fn links(&self, hairpin_mode: bool) -> Vec<(&'static str, Vec<String>)> {
        match self.table {
            Table::Nat => {
                let mut output = to_args(&["-m", "addrtype", "--dst-type", "LOCAL"]);
                if !hairpin_mode {
                    output.extend(to_args(&["!", "--dst", "127.0.0.0/8"]));
                }
                output.extend(to_args(&["-j", &self.name]));

                vec![
                    (
                        "PREROUTING",
                        to_args(&["-m", "addrtype", "--dst-type", "LOCAL", "-j", &self.name]),
                    ),
                    ("OUTPUT", output),
                ]
            }
            Table::Filter => vec![("FORWARD", to_args(&["-o", &self.bridge, "-j", &self.name]))],
        }
    }

    /// Remove this bridge's jump into the chain.
    ///
    /// Only the filter link is per bridge. The chains and the nat links are
    /// shared with other bridges and stay in place.
    ///
    /// # Errors
    ///
    /// Returns an error if deleting the link fails.
    pub fn unlink(&self, ipt: &dyn Iptables) -> NetworkResult<()> {
        if self.table != Table::Filter {
            return Ok(());
        }
        for (parent, link) in self.links(false) {
            if !ipt.exists(self.table, parent, &link) {
                continue;
            }
            let mut cmd = to_args(&["-t", self.table.as_str(), "-D", parent]);
            cmd.extend(link);
            raw_checked(ipt, parent, &cmd)?;
        }
        Ok(())
    }

    /// Add or delete the rules that publish one port.
    ///
    /// Programs a DNAT rule in the nat chain, an ACCEPT rule in the filter
    /// chain and a MASQUERADE rule so a container can reach its own
    /// published port. When adding fails part way, the rules already added
    /// are deleted again before the error is returned.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the three commands fails.
    pub fn forward(
        &self,
        ipt: &dyn Iptables,
        action: Action,
        mapping: &PortMapping,
    ) -> NetworkResult<()> {
        tracing::debug!(
            chain = %self.name,
            bridge = %self.bridge,
            action = action.flag(),
            host_port = mapping.host_port,
            container_ip = %mapping.container_ip,
            container_port = mapping.container_port,
            "Programming port forward"
        );

        let rules = self.forward_rules(action, mapping);
        for (applied, (chain, args)) in rules.iter().enumerate() {
            if let Err(e) = raw_checked(ipt, chain, args) {
                if action != Action::Delete {
                    self.undo_forward(ipt, mapping, applied);
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Delete the first `applied` rules of a partially added forward.
    fn undo_forward(&self, ipt: &dyn Iptables, mapping: &PortMapping, applied: usize) {
        for (chain, args) in self.forward_rules(Action::Delete, mapping).iter().take(applied) {
            if let Err(e) = raw_checked(ipt, chain, args) {
                tracing::warn!(
                    chain = %chain,
                    host_port = mapping.host_port,
                    error = %e,
                    "Failed to undo partial port forward"
                );
            }
        }
    }

    /// The DNAT, ACCEPT and MASQUERADE commands for one mapping, each with
    /// the chain it targets.
    fn forward_rules(&self, action: Action, mapping: &PortMapping) -> [(String, Vec<String>); 3] {
        let proto = mapping.protocol.as_str();
        let daddr = match mapping.host_ip {
            Some(ip) if !ip.is_unspecified() => ip.to_string(),
            _ => "0/0".to_string(),
        };
        let host_port = mapping.host_port.to_string();
        let dest_addr = mapping.container_ip.to_string();
        let dest_port = mapping.container_port.to_string();
        let destination = match mapping.container_ip {
            IpAddr::V4(ip) => format!("{ip}:{dest_port}"),
            IpAddr::V6(ip) => format!("[{ip}]:{dest_port}"),
        };

        [
            (
                self.name.clone(),
                to_args(&[
                    "-t",
                    "nat",
                    action.flag(),
                    &self.name,
                    "-p",
                    proto,
                    "-d",
                    &daddr,
                    "--dport",
                    &host_port,
                    "!",
                    "-i",
                    &self.bridge,
                    "-j",
                    "DNAT",
                    "--to-destination",
                    &destination,
                ]),
            ),
            (
                self.name.clone(),
                to_args(&[
                    action.flag(),
                    &self.name,
                    "!",
                    "-i",
                    &self.bridge,
                    "-o",
                    &self.bridge,
                    "-p",
                    proto,
                    "-d",
                    &dest_addr,
                    "--dport",
                    &dest_port,
                    "-j",
                    "ACCEPT",
                ]),
            ),
            (
                "POSTROUTING".to_string(),
                to_args(&[
                    "-t",
                    "nat",
                    action.flag(),
                    "POSTROUTING",
                    "-p",
                    proto,
                    "-s",
                    &dest_addr,
                    "-d",
                    &dest_addr,
                    "--dport",
                    &dest_port,
                    "-j",
                    "MASQUERADE",
                ]),
            ),
        ]
    }
}

//! iptables programming for bridge networks.
//!
//! [`setup_ip_tables`] installs, in order: subnet masquerading, hairpin
//! masquerading, the inter-container communication (ICC) policy, and the
//! forwarding accept rules; then creates the `DOCKER` chains and hands the
//! filter chain to the port mapper. [`teardown_ip_tables`] runs the same
//! rule set in reverse polarity.
//!
//! Nothing is rolled back when a step fails; a later teardown converges.

use ipnet::Ipv4Net;

use crate::error::{NetworkError, NetworkResult};
use crate::iptables::{
    Action, Chain, DOCKER_CHAIN, Iptables, Rule, Table, new_chain, program_chain_rule, raw_checked,
    to_args,
};
use crate::portmap::PortMapper;

use super::BridgeConfig;
use super::address::AddressResolver;

/// The chains created for a bridge network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeChains {
    /// The nat `DOCKER` chain.
    pub nat: Chain,
    /// The filter `DOCKER` chain.
    pub filter: Chain,
}

/// Program the firewall for a bridge network.
///
/// # Errors
///
/// Fails fast with [`NetworkError::IptablesDisabled`] when the config
/// disables iptables, before any command runs. Any later failure stops
/// the remaining steps.
pub fn setup_ip_tables(
    ipt: &dyn Iptables,
    resolver: &dyn AddressResolver,
    config: &BridgeConfig,
    port_mapper: &mut PortMapper,
) -> NetworkResult<BridgeChains> {
    if !config.enable_ip_tables {
        return Err(NetworkError::IptablesDisabled {
            bridge: config.bridge_name.clone(),
        });
    }

    let hairpin_mode = config.hairpin_mode;
    let addr = resolver.interface_addrs(&config.bridge_name)?.ipv4;

    tracing::debug!(
        bridge = %config.bridge_name,
        address = %addr,
        icc = config.enable_icc,
        masquerade = config.enable_ip_masquerade,
        hairpin = hairpin_mode,
        "Setting up iptables"
    );

    setup_ip_tables_internal(
        ipt,
        &config.bridge_name,
        addr,
        config.enable_icc,
        config.enable_ip_masquerade,
        hairpin_mode,
        true,
    )
    .map_err(|e| NetworkError::IptablesSetup {
        source: Box::new(e),
    })?;

    let nat = new_chain(ipt, DOCKER_CHAIN, &config.bridge_name, Table::Nat, hairpin_mode).map_err(
        |e| NetworkError::ChainCreation {
            table: Table::Nat,
            source: Box::new(e),
        },
    )?;

    let filter = new_chain(
        ipt,
        DOCKER_CHAIN,
        &config.bridge_name,
        Table::Filter,
        hairpin_mode,
    )
    .map_err(|e| NetworkError::ChainCreation {
        table: Table::Filter,
        source: Box::new(e),
    })?;

    port_mapper.set_chain(filter.clone());

    tracing::info!(bridge = %config.bridge_name, "iptables configured");
    Ok(BridgeChains { nat, filter })
}

/// Remove the firewall rules of a bridge network.
///
/// Published ports should be unmapped first. The shared `DOCKER` chains
/// stay; only this bridge's link into the filter chain is removed.
///
/// # Errors
///
/// Returns an error if the address cannot be resolved or a rule cannot be
/// removed. ICC cleanup never fails.
pub fn teardown_ip_tables(
    ipt: &dyn Iptables,
    resolver: &dyn AddressResolver,
    config: &BridgeConfig,
    chains: Option<&BridgeChains>,
) -> NetworkResult<()> {
    if !config.enable_ip_tables {
        return Ok(());
    }

    let addr = resolver.interface_addrs(&config.bridge_name)?.ipv4;

    if let Some(chains) = chains {
        chains.filter.unlink(ipt)?;
    }

    setup_ip_tables_internal(
        ipt,
        &config.bridge_name,
        addr,
        config.enable_icc,
        config.enable_ip_masquerade,
        config.hairpin_mode,
        false,
    )?;

    tracing::info!(bridge = %config.bridge_name, "iptables removed");
    Ok(())
}

fn setup_ip_tables_internal(
    ipt: &dyn Iptables,
    bridge: &str,
    addr: Ipv4Net,
    icc: bool,
    ip_masquerade: bool,
    hairpin: bool,
    enable: bool,
) -> NetworkResult<()> {
    let address = addr.to_string();
    let nat_rule = Rule::nat(
        "POSTROUTING",
        &["-s", &address, "!", "-o", bridge, "-j", "MASQUERADE"],
    );
    let hairpin_rule = Rule::nat(
        "POSTROUTING",
        &["-m", "addrtype", "--src-type", "LOCAL", "-o", bridge, "-j", "MASQUERADE"],
    );
    let out_rule = Rule::filter("FORWARD", &["-i", bridge, "!", "-o", bridge, "-j", "ACCEPT"]);
    let in_rule = Rule::filter(
        "FORWARD",
        &[
            "-o",
            bridge,
            "-m",
            "conntrack",
            "--ctstate",
            "RELATED,ESTABLISHED",
            "-j",
            "ACCEPT",
        ],
    );

    if ip_masquerade {
        program_chain_rule(ipt, &nat_rule, "NAT", enable)?;
    }

    // Lets containers reach published ports through the host address.
    if hairpin {
        program_chain_rule(ipt, &hairpin_rule, "MASQ LOCAL HOST", enable)?;
    }

    set_icc(ipt, bridge, icc, enable)?;

    program_chain_rule(ipt, &out_rule, "ACCEPT NON_ICC OUTGOING", enable)?;
    program_chain_rule(ipt, &in_rule, "ACCEPT INCOMING", enable)?;

    Ok(())
}

fn icc_args(bridge: &str, target: &str) -> Vec<String> {
    to_args(&["-i", bridge, "-o", bridge, "-j", target])
}

/// Set the inter-container communication policy of a bridge.
///
/// When enabling, exactly one of the ACCEPT/DROP rules is left in FORWARD:
/// the opposite rule is removed on a best-effort basis and the wanted one
/// is appended at the tail if missing, so it is evaluated after the more
/// specific rules inserted at the head.
///
/// When disabling, the rule matching `icc_enabled` is deleted if present.
/// This path is cleanup and never returns an error.
///
/// # Errors
///
/// Returns [`NetworkError::Icc`] if the wanted rule cannot be appended.
pub fn set_icc(
    ipt: &dyn Iptables,
    bridge: &str,
    icc_enabled: bool,
    insert: bool,
) -> NetworkResult<()> {
    let chain = "FORWARD";
    let accept = icc_args(bridge, "ACCEPT");
    let drop = icc_args(bridge, "DROP");
    let (wanted, stray, action) = if icc_enabled {
        (accept, drop, "allow")
    } else {
        (drop, accept, "prevent")
    };

    if !insert {
        if ipt.exists(Table::Filter, chain, &wanted) {
            let mut cmd = to_args(&[Action::Delete.flag(), chain]);
            cmd.extend(wanted);
            // Failures and unexpected output leave a stale rule behind but
            // never fail the teardown.
            if let Err(e) = raw_checked(ipt, chain, &cmd) {
                tracing::warn!(bridge, error = %e, "Failed to remove ICC rule");
            }
        }
        return Ok(());
    }

    let mut remove = to_args(&[Action::Delete.flag(), chain]);
    remove.extend(stray);
    // Best effort: the opposite rule is usually not installed.
    if let Err(e) = ipt.raw(&remove) {
        tracing::debug!(bridge, error = %e, "No stray ICC rule to remove");
    }

    if ipt.exists(Table::Filter, chain, &wanted) {
        return Ok(());
    }

    let mut append = to_args(&[Action::Append.flag(), chain]);
    append.extend(wanted);
    match ipt.raw(&append) {
        Err(e) => Err(NetworkError::Icc {
            action,
            message: e.to_string(),
        }),
        Ok(output) if !output.trim().is_empty() => Err(NetworkError::Icc { action, message: output }),
        Ok(_) => {
            tracing::debug!(bridge, icc = icc_enabled, "ICC policy set");
            Ok(())
        }
    }
}

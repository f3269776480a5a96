//! `skiff bridge` commands.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Subcommand};
use color_eyre::eyre::Result;
use ipnet::Ipv4Net;
use skiff_common::SkiffPaths;
use skiff_network::bridge::{
    AddressResolver, BridgeChains, IpCommandResolver, StaticResolver, setup_ip_tables,
    teardown_ip_tables,
};
use skiff_network::iptables::{Chain, DOCKER_CHAIN, Iptables, MemoryIptables, SystemIptables, Table};
use skiff_network::{BridgeConfig, PortMapper};

/// Bridge operations.
#[derive(Subcommand)]
pub enum BridgeCommand {
    /// Install the NAT, ICC and forwarding rules of a bridge
    Setup(BridgeArgs),

    /// Remove the rules installed by `setup`
    Teardown(BridgeArgs),
}

/// Options shared by the bridge operations.
#[derive(Args)]
pub struct BridgeArgs {
    /// Bridge configuration file (default: <config-dir>/bridge.toml)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Override the bridge device name
    #[arg(short, long)]
    pub bridge: Option<String>,

    /// Print the iptables commands instead of running them
    #[arg(long, requires = "address")]
    pub dry_run: bool,

    /// Bridge address to assume in a dry run (CIDR)
    #[arg(long)]
    pub address: Option<String>,
}

fn load_config(paths: &SkiffPaths, args: &BridgeArgs) -> Result<BridgeConfig> {
    let mut config = match &args.config {
        Some(path) => BridgeConfig::load(path)?,
        None => {
            let path = paths.bridge_config();
            if path.exists() {
                BridgeConfig::load(&path)?
            } else {
                tracing::debug!(path = %path.display(), "No bridge configuration, using defaults");
                BridgeConfig::default()
            }
        }
    };
    if let Some(bridge) = &args.bridge {
        config.bridge_name.clone_from(bridge);
    }
    Ok(config)
}

struct Backend {
    ipt: Arc<dyn Iptables>,
    resolver: Box<dyn AddressResolver>,
    memory: Option<Arc<MemoryIptables>>,
}

fn backend(config: &BridgeConfig, args: &BridgeArgs) -> Result<Backend> {
    if !args.dry_run {
        return Ok(Backend {
            ipt: Arc::new(SystemIptables::detect()),
            resolver: Box::new(IpCommandResolver),
            memory: None,
        });
    }

    let address = args
        .address
        .as_deref()
        .ok_or_else(|| color_eyre::eyre::eyre!("--dry-run needs --address"))?
        .parse::<Ipv4Net>()
        .map_err(|e| color_eyre::eyre::eyre!("Invalid bridge address: {}", e))?;
    let memory = Arc::new(MemoryIptables::new());

    Ok(Backend {
        ipt: memory.clone(),
        resolver: Box::new(StaticResolver::new().with_interface(&config.bridge_name, address)),
        memory: Some(memory),
    })
}

fn print_commands(memory: &MemoryIptables, skip: usize) {
    for command in memory.commands().iter().skip(skip) {
        println!("iptables {}", command.join(" "));
    }
}

/// Run a bridge command.
pub(super) fn execute(paths: &SkiffPaths, command: BridgeCommand) -> Result<()> {
    match command {
        BridgeCommand::Setup(args) => {
            let config = load_config(paths, &args)?;
            let backend = backend(&config, &args)?;
            let mut port_mapper = PortMapper::new(backend.ipt.clone(), &config.bridge_name);

            setup_ip_tables(
                backend.ipt.as_ref(),
                backend.resolver.as_ref(),
                &config,
                &mut port_mapper,
            )?;

            match &backend.memory {
                Some(memory) => print_commands(memory, 0),
                None => println!("Bridge {} configured", config.bridge_name),
            }
            Ok(())
        }

        BridgeCommand::Teardown(args) => {
            let config = load_config(paths, &args)?;
            let backend = backend(&config, &args)?;

            // A dry run starts from the state setup would leave behind.
            if config.enable_ip_tables && backend.memory.is_some() {
                let mut port_mapper = PortMapper::new(backend.ipt.clone(), &config.bridge_name);
                setup_ip_tables(
                    backend.ipt.as_ref(),
                    backend.resolver.as_ref(),
                    &config,
                    &mut port_mapper,
                )?;
            }
            let skip = backend.memory.as_ref().map_or(0, |m| m.command_count());

            let chains = BridgeChains {
                nat: Chain {
                    name: DOCKER_CHAIN.to_string(),
                    bridge: config.bridge_name.clone(),
                    table: Table::Nat,
                },
                filter: Chain {
                    name: DOCKER_CHAIN.to_string(),
                    bridge: config.bridge_name.clone(),
                    table: Table::Filter,
                },
            };
            teardown_ip_tables(
                backend.ipt.as_ref(),
                backend.resolver.as_ref(),
                &config,
                Some(&chains),
            )?;

            match &backend.memory {
                Some(memory) => print_commands(memory, skip),
                None => println!("Bridge {} cleaned up", config.bridge_name),
            }
            Ok(())
        }
    }
}

//! `skiff plugin` commands.

use std::sync::Arc;

use clap::{Args, Subcommand};
use color_eyre::eyre::{Result, eyre};
use serde_json::Value;
use skiff_common::{EndpointId, NetworkId, SkiffPaths};
use skiff_network::{Driver, HttpPluginClient, Options, RemoteDriver};

/// Target plugin and operation.
#[derive(Args)]
pub struct PluginArgs {
    /// Base URL of the plugin
    #[arg(long, conflicts_with = "plugin", required_unless_present = "plugin")]
    pub url: Option<String>,

    /// Name of a plugin described in <config-dir>/plugins/<name>.spec
    #[arg(long)]
    pub plugin: Option<String>,

    /// Network type the plugin serves
    #[arg(long = "type", default_value = "remote")]
    pub network_type: String,

    /// The plugin operation.
    #[command(subcommand)]
    pub command: PluginCommand,
}

/// Plugin operations.
#[derive(Subcommand)]
pub enum PluginCommand {
    /// Create a network
    CreateNetwork {
        /// Network ID
        #[arg(long)]
        network: NetworkId,

        /// Driver option as key=value (value parsed as JSON when possible)
        #[arg(long = "opt", value_parser = parse_option)]
        options: Vec<(String, Value)>,
    },

    /// Create an endpoint
    CreateEndpoint {
        /// Network ID
        #[arg(long)]
        network: NetworkId,

        /// Endpoint ID
        #[arg(long)]
        endpoint: EndpointId,

        /// Driver option as key=value (value parsed as JSON when possible)
        #[arg(long = "opt", value_parser = parse_option)]
        options: Vec<(String, Value)>,
    },

    /// Delete an endpoint
    DeleteEndpoint {
        /// Network ID
        #[arg(long)]
        network: NetworkId,

        /// Endpoint ID
        #[arg(long)]
        endpoint: EndpointId,
    },

    /// Attach a sandbox to an endpoint
    Join {
        /// Network ID
        #[arg(long)]
        network: NetworkId,

        /// Endpoint ID
        #[arg(long)]
        endpoint: EndpointId,

        /// Sandbox key
        #[arg(long)]
        sandbox: String,

        /// Driver option as key=value (value parsed as JSON when possible)
        #[arg(long = "opt", value_parser = parse_option)]
        options: Vec<(String, Value)>,
    },

    /// Detach a sandbox from an endpoint
    Leave {
        /// Network ID
        #[arg(long)]
        network: NetworkId,

        /// Endpoint ID
        #[arg(long)]
        endpoint: EndpointId,

        /// Driver option as key=value (value parsed as JSON when possible)
        #[arg(long = "opt", value_parser = parse_option)]
        options: Vec<(String, Value)>,
    },
}

/// Parse `key=value`. Values that are not valid JSON become strings.
fn parse_option(s: &str) -> Result<(String, Value), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got {s:?}"))?;
    if key.is_empty() {
        return Err(format!("empty key in {s:?}"));
    }
    let value =
        serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

fn plugin_url(paths: &SkiffPaths, args: &PluginArgs) -> Result<String> {
    if let Some(url) = &args.url {
        return Ok(url.clone());
    }
    let name = args
        .plugin
        .as_deref()
        .ok_or_else(|| eyre!("Either --url or --plugin is required"))?;
    let path = paths.plugin_spec(name);
    let spec = std::fs::read_to_string(&path)
        .map_err(|e| eyre!("Failed to read plugin spec {}: {}", path.display(), e))?;
    let url = spec.trim();
    if url.is_empty() {
        return Err(eyre!("Plugin spec {} is empty", path.display()));
    }
    Ok(url.to_string())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Run a plugin command.
pub(super) async fn execute(paths: &SkiffPaths, args: PluginArgs) -> Result<()> {
    let url = plugin_url(paths, &args)?;
    tracing::debug!(url = %url, network_type = %args.network_type, "Using plugin");
    let driver = RemoteDriver::new(args.network_type, Arc::new(HttpPluginClient::new(url)));
    let empty = Value::Object(serde_json::Map::new());

    match args.command {
        PluginCommand::CreateNetwork { network, options } => {
            let options: Options = options.into_iter().collect();
            driver.create_network(&network, &options).await?;
            print_json(&empty)
        }

        PluginCommand::CreateEndpoint {
            network,
            endpoint,
            options,
        } => {
            let options: Options = options.into_iter().collect();
            let info = driver.create_endpoint(&network, &endpoint, &options).await?;
            print_json(&info)
        }

        PluginCommand::DeleteEndpoint { network, endpoint } => {
            driver.delete_endpoint(&network, &endpoint).await?;
            print_json(&empty)
        }

        PluginCommand::Join {
            network,
            endpoint,
            sandbox,
            options,
        } => {
            let options: Options = options.into_iter().collect();
            let info = driver.join(&network, &endpoint, &sandbox, &options).await?;
            print_json(&info)
        }

        PluginCommand::Leave {
            network,
            endpoint,
            options,
        } => {
            let options: Options = options.into_iter().collect();
            driver.leave(&network, &endpoint, &options).await?;
            print_json(&empty)
        }
    }
}

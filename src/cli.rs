use clap::{ArgAction, Parser};
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::config::{load_config_file, BroadcasterConfig, ConfigError};

#[derive(Parser, Debug)]
#[command(name = "capacity-broadcaster")]
#[command(about = "Advertise this cluster's spare capacity to peer clusters")]
#[command(version)]
pub struct Args {
    /// Identifier of this cluster
    #[arg(long, env = "CLUSTER_ID")]
    pub cluster_id: Option<String>,

    /// Public address of the gateway node
    #[arg(long, env = "GATEWAY_IP")]
    pub gateway_ip: Option<String>,

    /// Private address of the gateway node
    #[arg(long, env = "GATEWAY_PRIVATE_IP")]
    pub gateway_private_ip: Option<String>,

    /// API server of the local cluster
    #[arg(long, env = "LOCAL_API_SERVER", default_value = "http://127.0.0.1:8001")]
    pub api_server: String,

    /// Bearer token for the local API server
    #[arg(long, env = "LOCAL_API_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Accept a self-signed certificate from the local API server
    #[arg(long)]
    pub insecure: bool,

    /// Path to a YAML config file with overrides
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Path to a .env file
    #[arg(long, value_name = "FILE")]
    pub env_file: Option<PathBuf>,

    /// Serve /health and /status on this address
    #[arg(long, value_name = "ADDR")]
    pub status_addr: Option<SocketAddr>,

    /// Enable verbose logging output (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Dry-run mode: resolve the config, print it and exit
    #[arg(long)]
    pub dry_run: bool,
}

/// Build the broadcaster config from the config file and flags
///
/// Flags take precedence over the file.
pub fn resolve_config(args: &Args) -> Result<BroadcasterConfig, ConfigError> {
    let mut config = BroadcasterConfig::default();

    if let Some(ref path) = args.config {
        config.apply_file(load_config_file(path)?)?;
    }
    if let Some(ref id) = args.cluster_id {
        config.cluster_id = id.clone();
    }
    if let Some(ref ip) = args.gateway_ip {
        config.gateway_ip = ip.clone();
    }
    if let Some(ref ip) = args.gateway_private_ip {
        config.gateway_private_ip = ip.clone();
    }

    config.validate()?;
    Ok(config)
}

// ============================================================================
// SBIO: Pure display logic (no I/O - returns formatted strings)
// ============================================================================

/// Format the resolved configuration for dry-run output
pub fn format_dry_run(config: &BroadcasterConfig, args: &Args) -> String {
    let mut output = String::new();

    output.push_str(&format!(
        "capacity-broadcaster v{} - Dry Run Mode\n\n",
        env!("CARGO_PKG_VERSION")
    ));
    output.push_str(&format!("Cluster:        {}\n", config.cluster_id));
    output.push_str(&format!("Local API:      {}\n", args.api_server));
    output.push_str(&format!(
        "Gateway:        {} (private {})\n\n",
        or_unset(&config.gateway_ip),
        or_unset(&config.gateway_private_ip)
    ));

    output.push_str("Peer descriptors:\n");
    output.push_str(&format!(
        "  {}/{}<peer-id> [field: {}]\n\n",
        config.descriptor_namespace, config.descriptor_prefix, config.credential_field
    ));

    output.push_str("Advertisement:\n");
    output.push_str(&format!(
        "  {}/{}\n",
        config.advertisement_namespace,
        config.advertisement_name()
    ));
    output.push_str(&format!("  node selector:    {}\n", config.node_selector));
    output.push_str(&format!(
        "  publish interval: {}s\n",
        config.publish_interval.as_secs()
    ));
    output.push_str(&format!(
        "  time to live:     {}m\n",
        config.advertisement_ttl.num_minutes()
    ));
    output.push_str(&format!(
        "  connect retries:  {} x {}s\n",
        config.retry_budget,
        config.retry_delay.as_secs()
    ));

    if let Some(addr) = args.status_addr {
        output.push_str(&format!("\nStatus server: http://{}/status\n", addr));
    }

    output
}

fn or_unset(value: &str) -> &str {
    if value.is_empty() {
        "unset"
    } else {
        value
    }
}

//! netsurvey CLI - survey a device inventory from the command line
//!
//! This binary can:
//! - List interfaces per device, or one interface in detail
//! - Classify device roles from their protocol state
//! - Build the L3 topology and answer neighbor, path and segment queries
//!
//! Queries are answered from recorded responses (`--snapshots`), so every
//! command runs without network access.

mod inventory;
mod snapshot;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use netsurvey_core::batch::DeviceOutcome;
use netsurvey_core::topology::TopologyGraph;
use netsurvey_core::{
    BatchResult, Device, InterfaceInventory, QueryError, SubnetKey, SurveyConfig, Surveyor,
    config,
};
use snapshot::SnapshotClient;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "netsurvey")]
#[command(author = "netsurvey contributors")]
#[command(version)]
#[command(about = "Survey interfaces, device roles and L3 topology across a device inventory")]
#[command(long_about = "
netsurvey queries every device of an inventory in parallel and derives
network-wide views from the answers: interface inventories, device roles
and the L3 topology implied by shared subnets.

Quick start:
  1. Interfaces:  netsurvey -i inventory.json -s snapshots/ interfaces
  2. Roles:       netsurvey -i inventory.json -s snapshots/ profile
  3. Topology:    netsurvey -i inventory.json -s snapshots/ topology

Recorded responses live at <snapshots>/<device>/<query>.json.
")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Device inventory (JSON list, or an object with a devices list)
    #[arg(short, long, global = true)]
    pub inventory: Option<PathBuf>,

    /// Directory of recorded device responses
    #[arg(short, long, global = true)]
    pub snapshots: Option<PathBuf>,

    /// Only survey these devices (comma separated)
    #[arg(short, long, global = true, value_delimiter = ',')]
    pub devices: Vec<String>,

    /// Devices queried at the same time (overrides configuration)
    #[arg(long, global = true)]
    pub max_workers: Option<usize>,

    /// Configuration file (defaults to the per-user config file)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for scripting
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List interfaces of each device
    Interfaces {
        /// Show this interface in detail instead
        #[arg(long)]
        interface: Option<String>,
    },

    /// Classify device roles (PE, P, RR, IGP-only, CE)
    #[command(alias = "roles")]
    Profile,

    /// Build the L3 topology from shared interface subnets
    Topology,

    /// Show devices directly connected to a device
    Neighbors {
        /// Device name
        device: String,
    },

    /// Shortest device path between two devices
    Path {
        from: String,
        to: String,
    },

    /// Devices attached to a network (e.g. 10.0.0.0/30)
    Segment {
        network: String,
    },

    /// Show configuration paths and settings
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("netsurvey={},netsurvey_core={}", log_level, log_level).into()
            }),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match &cli.command {
        Commands::Interfaces { interface } => cmd_interfaces(&cli, interface.clone()).await,
        Commands::Profile => cmd_profile(&cli).await,
        Commands::Topology => cmd_topology(&cli).await,
        Commands::Neighbors { device } => cmd_neighbors(&cli, device).await,
        Commands::Path { from, to } => cmd_path(&cli, from, to).await,
        Commands::Segment { network } => cmd_segment(&cli, network).await,
        Commands::Config => cmd_config(&cli),
    }
}

fn load_config(cli: &Cli) -> Result<SurveyConfig> {
    let mut config = match &cli.config {
        Some(path) => config::load_survey_config_from(path)?,
        None => config::load_survey_config(),
    };
    if let Some(workers) = cli.max_workers {
        config.batch.max_workers = workers.max(1);
    }
    Ok(config)
}

/// Surveyor and the selected devices for a command.
fn prepare(cli: &Cli) -> Result<(Surveyor<SnapshotClient>, Vec<Device>)> {
    let Some(inventory_path) = &cli.inventory else {
        bail!("No inventory given. Use --inventory <file.json>");
    };
    let Some(snapshots) = &cli.snapshots else {
        bail!("No snapshot directory given. Use --snapshots <dir>");
    };

    let inventory = inventory::load_inventory(inventory_path)?;
    let devices = inventory::select_devices(&inventory, &cli.devices)?;
    if devices.is_empty() {
        bail!("Inventory {} has no devices", inventory_path.display());
    }

    let client = SnapshotClient::new(snapshots);
    tracing::debug!("Answering queries from recorded responses in {:?}", client.root());

    let surveyor = Surveyor::new(client, load_config(cli)?);
    Ok((surveyor, devices))
}

/// Topology over the selected devices; `required` names must be among them.
async fn survey_topology(cli: &Cli, required: &[&str]) -> Result<TopologyGraph> {
    let (surveyor, devices) = prepare(cli)?;
    for name in required {
        if !devices.iter().any(|d| d.name == *name) {
            return Err(QueryError::DeviceNotFound(name.to_string()).into());
        }
    }
    Ok(surveyor.topology(&devices).await.graph)
}

fn outcome_label<T>(outcome: &DeviceOutcome<T>) -> String {
    match outcome {
        DeviceOutcome::Success { .. } => "ok".to_string(),
        DeviceOutcome::Failed { error } => format!("failed: {}", error),
        DeviceOutcome::FeatureNotAvailable { message, .. } => format!("not available: {}", message),
        DeviceOutcome::Timeout { after_secs } => format!("timed out after {:.0}s", after_secs),
    }
}

fn print_batch_footer<T>(batch: &BatchResult<T>) {
    let summary = &batch.summary;
    println!();
    println!(
        "{}/{} devices succeeded ({:.1}%) in {:.2}s",
        summary.successful, summary.total_devices, summary.success_rate, summary.execution_time
    );
}

async fn cmd_interfaces(cli: &Cli, interface: Option<String>) -> Result<()> {
    let (surveyor, devices) = prepare(cli)?;
    let batch = surveyor.interfaces_batch(&devices, interface).await;

    match cli.format {
        OutputFormat::Text => {
            for result in &batch.results {
                println!("{}", result.device_name);
                match result.data() {
                    Some(inventory) => print_inventory(inventory),
                    None => println!("  {}", outcome_label(&result.outcome)),
                }
                println!();
            }
            print_batch_footer(&batch);
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&batch)?);
        }
    }

    Ok(())
}

fn print_inventory(inventory: &InterfaceInventory) {
    for interface in &inventory.interfaces {
        let address = match (interface.ip_address, interface.prefix_length) {
            (Some(ip), Some(prefix)) => format!("{}/{}", ip, prefix),
            (Some(ip), None) => ip.to_string(),
            _ => "-".to_string(),
        };
        println!(
            "  {:28} {:>5}/{:<5} {:18} {:12} {}",
            interface.name,
            interface.admin_state.as_deref().unwrap_or("-"),
            interface.oper_state.as_deref().unwrap_or("-"),
            address,
            interface.vrf.as_deref().unwrap_or("-"),
            interface.description.as_deref().unwrap_or("")
        );

        if let Some(details) = &interface.details {
            println!(
                "    mtu {}  mac {}  speed {}  duplex {}",
                details.mtu.map(|m| m.to_string()).unwrap_or_else(|| "-".to_string()),
                details.mac_address.as_deref().unwrap_or("-"),
                details.speed.as_deref().unwrap_or("-"),
                details.duplex.as_deref().unwrap_or("-")
            );
            let counters = &details.counters;
            let fmt = |v: Option<u64>| v.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string());
            println!(
                "    in {} pkts ({} errors)  out {} pkts ({} errors)",
                fmt(counters.in_packets),
                fmt(counters.in_errors),
                fmt(counters.out_packets),
                fmt(counters.out_errors)
            );
        }
        if interface.status.is_some() {
            println!("    interface exists but is not configured");
        }
    }

    if let Some(summary) = &inventory.summary {
        println!(
            "  {} interfaces: {} admin up, {} oper up, {} with IP, {} in a VRF",
            summary.total_interfaces,
            summary.admin_up,
            summary.oper_up,
            summary.with_ip,
            summary.with_vrf
        );
    }
}

async fn cmd_profile(cli: &Cli) -> Result<()> {
    let (surveyor, devices) = prepare(cli)?;
    let batch = surveyor.profile_batch(&devices).await;

    match cli.format {
        OutputFormat::Text => {
            let yes_no = |b: bool| if b { "yes" } else { "no" };
            println!(
                "  {:20} {:9} {:5} {:5} {:6} {:4} {}",
                "DEVICE", "ROLE", "MPLS", "ISIS", "L3VPN", "RR", "VPN-IPV4"
            );
            for result in &batch.results {
                match result.data() {
                    Some(profile) => {
                        let f = &profile.features;
                        println!(
                            "  {:20} {:9} {:5} {:5} {:6} {:4} {}",
                            result.device_name,
                            profile.role.to_string(),
                            yes_no(f.mpls_enabled),
                            yes_no(f.isis_enabled),
                            yes_no(f.bgp_l3vpn_enabled),
                            yes_no(f.route_reflector),
                            yes_no(f.vpn_ipv4_unicast_bgp)
                        );
                    }
                    None => {
                        println!("  {:20} {}", result.device_name, outcome_label(&result.outcome))
                    }
                }
            }
            print_batch_footer(&batch);
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&batch)?);
        }
    }

    Ok(())
}

async fn cmd_topology(cli: &Cli) -> Result<()> {
    let (surveyor, devices) = prepare(cli)?;
    let survey = surveyor.topology(&devices).await;

    match cli.format {
        OutputFormat::Text => {
            let graph = &survey.graph;
            println!(
                "Topology: {} devices, {} direct connections",
                graph.node_count(),
                graph.edge_count()
            );
            println!();
            for edge in &graph.edges {
                let a = &edge.attributes;
                println!(
                    "  {} {} ({}) <-> {} {} ({})  [{}]",
                    edge.source,
                    a.local_interface,
                    a.local_ip,
                    edge.target,
                    a.remote_interface,
                    a.remote_ip,
                    a.network
                );
            }
            if !survey.missing_devices.is_empty() {
                println!();
                println!("No interface data from: {}", survey.missing_devices.join(", "));
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&survey)?);
        }
    }

    Ok(())
}

async fn cmd_neighbors(cli: &Cli, device: &str) -> Result<()> {
    let graph = survey_topology(cli, &[device]).await?;
    let neighbors = graph.neighbors(device);

    match cli.format {
        OutputFormat::Text => {
            if neighbors.is_empty() {
                println!("No neighbors found for {}", device);
            } else {
                println!("{} has {} direct connections:", device, neighbors.len());
                for n in &neighbors {
                    let a = n.attributes;
                    println!(
                        "  {:20} {} <-> {}  [{}]",
                        n.neighbor, a.local_interface, a.remote_interface, a.network
                    );
                }
            }
        }
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "device": device,
                    "in_topology": graph.contains(device),
                    "neighbors": neighbors,
                })
            );
        }
    }

    Ok(())
}

async fn cmd_path(cli: &Cli, from: &str, to: &str) -> Result<()> {
    let graph = survey_topology(cli, &[from, to]).await?;
    let path = graph.shortest_path(from, to);

    match cli.format {
        OutputFormat::Text => match &path {
            Some(hops) => println!("{} ({} hops)", hops.join(" -> "), hops.len() - 1),
            None => println!("No path between {} and {}", from, to),
        },
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "source": from,
                    "target": to,
                    "path": path,
                })
            );
        }
    }

    Ok(())
}

async fn cmd_segment(cli: &Cli, network: &str) -> Result<()> {
    let key: SubnetKey = network
        .parse()
        .with_context(|| {
            format!("Invalid network '{}', expected a CIDR like 10.0.0.0/30", network)
        })?;
    let graph = survey_topology(cli, &[]).await?;
    let devices = graph.segment(&key);

    match cli.format {
        OutputFormat::Text => {
            if devices.is_empty() {
                println!("No devices found on {}", key);
            } else {
                println!("{}: {}", key, devices.join(", "));
            }
        }
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "segment": key,
                    "devices": devices,
                })
            );
        }
    }

    Ok(())
}

fn cmd_config(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    let config_path = match &cli.config {
        Some(path) => path.display().to_string(),
        None => config::get_config_file_path_string(),
    };

    match cli.format {
        OutputFormat::Text => {
            println!("Configuration");
            println!("=============");
            println!();
            println!("Config file:        {}", config_path);
            println!("Loaded from:        {}", config.source);
            println!("Max workers:        {}", config.batch.max_workers);
            println!("Operation timeout:  {:?}", config.batch.operation_timeout);
            println!("Max retries:        {}", config.retry.max_retries);
            println!(
                "Retry delay:        {:?} (max {:?})",
                config.retry.base_delay, config.retry.max_delay
            );
            println!();
            println!("Environment variables:");
            println!("  NETSURVEY_MAX_WORKERS            - Override worker pool size");
            println!("  NETSURVEY_OPERATION_TIMEOUT_SECS - Override per-device timeout");
            println!("  NETSURVEY_MAX_RETRIES            - Override rate-limit retries");
            println!();
            println!("Example config.toml:");
            println!();
            println!("{}", config::generate_example_config());
        }
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "config_file": config_path,
                    "source": config.source.to_string(),
                    "max_workers": config.batch.max_workers,
                    "operation_timeout_secs": config.batch.operation_timeout.as_secs_f64(),
                    "max_retries": config.retry.max_retries,
                    "base_delay_secs": config.retry.base_delay.as_secs_f64(),
                    "max_delay_secs": config.retry.max_delay.as_secs_f64(),
                })
            );
        }
    }

    Ok(())
}

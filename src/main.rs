// Beacon - LAN service discovery and task dispatch
// Main entry point

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use beacon::capabilities::demo_capabilities;
use beacon::config::{load_config, Config};
use beacon::discovery::{ClientDiscoveryAgent, ServiceRegistry};
use beacon::dispatch::{ServiceTarget, TaskClient};
use beacon::service::{CapabilityStatus, ServiceDescriptor};
use beacon::ServiceProvider;

/// Discover service providers on the local network and dispatch work to them
#[derive(Parser, Debug)]
#[command(name = "beacon")]
#[command(version, about, long_about = None)]
#[command(after_help = r#"ENVIRONMENT VARIABLES:
    BEACON_DISCOVERY_PORT       UDP discovery port (default: 50001)
    BEACON_CLIENT_PORT          UDP port clients listen on (default: 4096)
    BEACON_HEARTBEAT_SECS       Heartbeat interval (default: 30)
    BEACON_EXPIRY_MULTIPLIER    Registry expiry in heartbeats (default: 3)
    BEACON_BROADCAST_NETWORKS   Comma separated CIDR list
    BEACON_BIND_ADDRESS         Task-dispatch listen address (default: 0.0.0.0:8080)
    BEACON_LOG                  Log filter (falls back to RUST_LOG, default: info)
"#)]
struct Cli {
    /// Config file (default: ~/.beacon/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the demo image-processing provider until Ctrl-C
    Provide {
        /// Override the advertised service name
        #[arg(long)]
        name: Option<String>,

        /// Simulated work time per task, in milliseconds
        #[arg(long, default_value_t = 2000)]
        work_ms: u64,
    },

    /// Listen for advertisements and print the services found
    Discover {
        /// How long to listen
        #[arg(long, default_value_t = 5)]
        seconds: u64,

        /// Only show online services with this name
        #[arg(long)]
        name: Option<String>,
    },

    /// Discover a provider, assign one task and wait for its result
    Assign {
        /// Capability key, e.g. resizeImage
        #[arg(long)]
        operation: String,

        /// Only use services with this name
        #[arg(long)]
        service: Option<String>,

        /// Task parameter as key=value; JSON values are parsed
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, Value)>,

        /// How long to discover before picking a provider
        #[arg(long, default_value_t = 5)]
        seconds: u64,
    },
}

fn parse_param(raw: &str) -> std::result::Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))?;
    if key.is_empty() {
        return Err(format!("empty parameter name in '{}'", raw));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("BEACON_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Provide { name, work_ms } => provide(config, name, work_ms).await,
        Commands::Discover { seconds, name } => {
            let services = discover(&config, Duration::from_secs(seconds), name.as_deref()).await?;
            print_services(&services);
            Ok(())
        }
        Commands::Assign {
            operation,
            service,
            params,
            seconds,
        } => assign(&config, &operation, service.as_deref(), params, seconds).await,
    }
}

async fn provide(mut config: Config, name: Option<String>, work_ms: u64) -> Result<()> {
    if let Some(name) = name {
        config.provider.service_name = name;
    }
    let mut provider = ServiceProvider::new(config, demo_capabilities(Duration::from_millis(work_ms)));
    let role = provider.start().await?;
    tracing::info!(role = ?role, "Provider running, Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    provider.stop().await;
    Ok(())
}

async fn discover(config: &Config, listen_for: Duration, name: Option<&str>) -> Result<Vec<ServiceDescriptor>> {
    let registry = ServiceRegistry::new();
    let client_id = Uuid::new_v4().to_string();
    let mut agent = ClientDiscoveryAgent::new(client_id, registry.clone(), config.discovery.clone());
    agent.start().await?;
    tokio::time::sleep(listen_for).await;
    agent.stop().await;
    Ok(registry.query(name).await)
}

fn print_services(services: &[ServiceDescriptor]) {
    if services.is_empty() {
        println!("No services found");
        return;
    }
    println!(
        "{:<10} {:<28} {:<10} {:<22} {:>6}  CAPABILITIES",
        "ID", "NAME", "VERSION", "ENDPOINT", "LOAD"
    );
    for service in services {
        let capabilities: Vec<String> = service
            .capabilities
            .values()
            .map(|c| match c.status {
                CapabilityStatus::Ready => c.key.clone(),
                CapabilityStatus::Busy => format!("{}*", c.key),
            })
            .collect();
        println!(
            "{:<10} {:<28} {:<10} {:<22} {:>5.1}%  {}",
            service.short_id(),
            service.service_name,
            service.service_version,
            service.endpoint,
            service.load,
            capabilities.join(", ")
        );
    }
}

async fn assign(
    config: &Config,
    operation: &str,
    service: Option<&str>,
    params: Vec<(String, Value)>,
    seconds: u64,
) -> Result<()> {
    let services = discover(config, Duration::from_secs(seconds), service).await?;
    let Some(chosen) = services
        .iter()
        .filter(|s| s.is_online() && s.capabilities.contains_key(operation))
        .min_by(|a, b| a.load.total_cmp(&b.load))
    else {
        bail!("No online service offers '{}'", operation);
    };

    let target = ServiceTarget::from(chosen);
    let client = TaskClient::from_config(Uuid::new_v4().to_string(), &config.client);
    let parameters: Map<String, Value> = params.into_iter().collect();

    let accepted = client.assign(&target, operation, parameters).await?;
    println!(
        "Task {} accepted by {} ({})",
        accepted.task_id,
        chosen.service_name,
        chosen.short_id()
    );

    let result = client
        .poll_until_done(
            &target,
            &accepted.task_id,
            config.client.poll_interval(),
            config.client.max_poll_attempts,
        )
        .await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_param() {
        assert_eq!(
            parse_param("width=100").unwrap(),
            ("width".to_string(), Value::from(100))
        );
        assert_eq!(
            parse_param("output=out.png").unwrap(),
            ("output".to_string(), Value::from("out.png"))
        );
        assert!(parse_param("noequals").is_err());
        assert!(parse_param("=1").is_err());
    }

    #[test]
    fn test_cli_parses_assign() {
        let cli = Cli::try_parse_from([
            "beacon",
            "assign",
            "--operation",
            "resizeImage",
            "--param",
            "width=100",
            "--param",
            "height=50",
        ])
        .unwrap();
        match cli.command {
            Commands::Assign { operation, params, .. } => {
                assert_eq!(operation, "resizeImage");
                assert_eq!(params.len(), 2);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}

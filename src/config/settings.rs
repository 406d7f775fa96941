// Configuration structs

use super::constants::*;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::time::Duration;

/// Discovery protocol settings, shared by clients and providers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Well-known port owned by the primary provider
    pub discovery_port: u16,

    /// Port clients bind to (0 = ephemeral)
    pub client_port: u16,

    /// Heartbeat / re-advertisement period
    pub heartbeat_interval_secs: u64,

    /// Registry entries expire after `heartbeat × multiplier`
    pub expiry_multiplier: u32,

    /// Secondaries silent for longer than this are pruned by the primary
    pub registration_staleness_secs: u64,

    /// How often clients repeat their discovery broadcast
    pub rediscovery_interval_secs: u64,

    /// Attempts a secondary makes to locate the primary
    pub primary_lookup_attempts: u32,

    /// Wait per lookup attempt
    pub primary_lookup_timeout_ms: u64,

    /// Networks (CIDR, e.g. "192.168.50.0/24") whose broadcast addresses are probed
    pub broadcast_networks: Vec<String>,

    /// Destination for unsolicited advertisements
    pub advertise_address: Ipv4Addr,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            discovery_port: DEFAULT_DISCOVERY_PORT,
            client_port: DEFAULT_CLIENT_PORT,
            heartbeat_interval_secs: DEFAULT_HEARTBEAT_INTERVAL_SECS,
            expiry_multiplier: DEFAULT_EXPIRY_MULTIPLIER,
            registration_staleness_secs: DEFAULT_REGISTRATION_STALENESS_SECS,
            rediscovery_interval_secs: DEFAULT_REDISCOVERY_INTERVAL_SECS,
            primary_lookup_attempts: DEFAULT_PRIMARY_LOOKUP_ATTEMPTS,
            primary_lookup_timeout_ms: DEFAULT_PRIMARY_LOOKUP_TIMEOUT_MS,
            broadcast_networks: DEFAULT_BROADCAST_NETWORKS
                .iter()
                .map(|n| n.to_string())
                .collect(),
            advertise_address: Ipv4Addr::BROADCAST,
        }
    }
}

impl DiscoveryConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Age after which a client drops a silent service
    pub fn service_expiry(&self) -> Duration {
        self.heartbeat_interval().saturating_mul(self.expiry_multiplier)
    }

    pub fn registration_staleness(&self) -> Duration {
        Duration::from_secs(self.registration_staleness_secs)
    }

    pub fn rediscovery_interval(&self) -> Duration {
        Duration::from_secs(self.rediscovery_interval_secs)
    }

    pub fn primary_lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.primary_lookup_timeout_ms)
    }
}

/// Settings for a service provider process
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Advertised service name
    pub service_name: String,

    /// Advertised service version
    pub service_version: String,

    /// Task-dispatch listener bind address
    pub bind_address: String,

    /// Host part of the advertised endpoint (defaults to the outbound local IP)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advertised_host: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            service_name: "ImageProcessingService".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            bind_address: DEFAULT_DISPATCH_ADDR.to_string(),
            advertised_host: None,
        }
    }
}

/// Settings for issuing tasks to providers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Delay between GetStatus polls
    pub poll_interval_ms: u64,

    /// GetStatus polls before giving up
    pub max_poll_attempts: u32,

    /// Connect + reply timeout for a single request
    pub request_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            max_poll_attempts: 30,
            request_timeout_secs: 10,
        }
    }
}

impl ClientConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub discovery: DiscoveryConfig,
    pub provider: ProviderConfig,
    pub client: ClientConfig,
}

impl Config {
    /// Validate configuration and return helpful errors
    pub fn validate(&self) -> Result<()> {
        let d = &self.discovery;
        if d.heartbeat_interval_secs == 0 {
            bail!("discovery.heartbeat_interval_secs must be greater than zero");
        }
        for (name, secs) in [
            ("heartbeat_interval_secs", d.heartbeat_interval_secs),
            ("registration_staleness_secs", d.registration_staleness_secs),
            ("rediscovery_interval_secs", d.rediscovery_interval_secs),
            ("primary_lookup_timeout_ms", d.primary_lookup_timeout_ms / 1000),
        ] {
            if secs > MAX_INTERVAL_SECS {
                bail!(
                    "discovery.{} is too large (at most {} seconds)",
                    name,
                    MAX_INTERVAL_SECS
                );
            }
        }
        if d.expiry_multiplier == 0 {
            bail!("discovery.expiry_multiplier must be greater than zero");
        }
        if d.rediscovery_interval_secs == 0 {
            bail!("discovery.rediscovery_interval_secs must be greater than zero");
        }
        if d.primary_lookup_attempts == 0 {
            bail!("discovery.primary_lookup_attempts must be greater than zero");
        }
        for network in &d.broadcast_networks {
            crate::net::parse_network(network)
                .with_context(|| format!("Invalid broadcast network '{}'", network))?;
        }
        if self.provider.service_name.trim().is_empty() {
            bail!("provider.service_name cannot be empty");
        }
        if self.client.poll_interval_ms == 0 {
            bail!("client.poll_interval_ms must be greater than zero");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_protocol_constants() {
        let config = Config::default();
        assert_eq!(config.discovery.discovery_port, 50001);
        assert_eq!(config.discovery.client_port, 4096);
        assert_eq!(config.discovery.service_expiry(), Duration::from_secs(90));
        assert_eq!(
            config.discovery.registration_staleness(),
            Duration::from_secs(60)
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_heartbeat_rejected() {
        let mut config = Config::default();
        config.discovery.heartbeat_interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_huge_intervals_rejected_and_expiry_saturates() {
        let mut config = Config::default();
        config.discovery.heartbeat_interval_secs = MAX_INTERVAL_SECS + 1;
        assert!(config.validate().is_err());

        config.discovery.heartbeat_interval_secs = u64::MAX;
        config.discovery.expiry_multiplier = u32::MAX;
        assert_eq!(config.discovery.service_expiry(), Duration::MAX);

        let mut config = Config::default();
        config.discovery.primary_lookup_timeout_ms = u64::MAX;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_network_rejected() {
        let mut config = Config::default();
        config.discovery.broadcast_networks = vec!["not-a-network".to_string()];
        let err = config.validate().unwrap_err();
        assert!(format!("{:#}", err).contains("not-a-network"));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [discovery]
            discovery_port = 6000

            [provider]
            service_name = "Thumbnailer"
            "#,
        )
        .unwrap();
        assert_eq!(config.discovery.discovery_port, 6000);
        assert_eq!(config.discovery.heartbeat_interval_secs, 30);
        assert_eq!(config.provider.service_name, "Thumbnailer");
        assert_eq!(config.client.max_poll_attempts, 30);
    }
}

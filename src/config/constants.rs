// Project-wide constants
//
// Centralised here so port numbers and timing defaults have one
// source of truth. Import via `use crate::config::constants::*;`.

/// Well-known UDP port the primary provider owns.
pub const DEFAULT_DISCOVERY_PORT: u16 = 50001;

/// UDP port clients bind to receive advertisements.
pub const DEFAULT_CLIENT_PORT: u16 = 4096;

/// Heartbeat and re-advertisement period in seconds.
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Registry entries expire after this many missed heartbeats.
pub const DEFAULT_EXPIRY_MULTIPLIER: u32 = 3;

/// A secondary with no heartbeat for this long is dropped by the primary.
pub const DEFAULT_REGISTRATION_STALENESS_SECS: u64 = 60;

/// Clients re-broadcast discovery requests this often (5 minutes).
pub const DEFAULT_REDISCOVERY_INTERVAL_SECS: u64 = 300;

/// A secondary gives up looking for a primary after this many attempts.
pub const DEFAULT_PRIMARY_LOOKUP_ATTEMPTS: u32 = 3;

/// Per-attempt wait for a `ProviderDiscoveryResponse`.
pub const DEFAULT_PRIMARY_LOOKUP_TIMEOUT_MS: u64 = 2000;

/// Upper bound for any configured discovery period (one day).
pub const MAX_INTERVAL_SECS: u64 = 86_400;

/// Networks probed when none are configured.
pub const DEFAULT_BROADCAST_NETWORKS: &[&str] = &["192.168.50.0/24"];

/// Bind address for the task-dispatch listener.
pub const DEFAULT_DISPATCH_ADDR: &str = "0.0.0.0:8080";

/// Largest datagram we expect to receive.
pub const MAX_DATAGRAM_SIZE: usize = 8192;

/// Largest WebSocket message accepted on the dispatch channel.
pub const MAX_FRAME_LENGTH: usize = 1024 * 1024;

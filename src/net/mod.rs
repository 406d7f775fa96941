// Network helpers shared by the discovery client and providers

pub mod address;

pub use address::{broadcast_address, broadcast_addresses, local_ip, parse_network};

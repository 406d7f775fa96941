// Service discovery over UDP
//
// Clients broadcast requests and collect advertisements into a
// registry. Providers on one host share the well-known port through a
// primary that relays requests to its registered secondaries.

pub mod client;
pub mod coordinator;
pub mod messages;
pub mod registrations;
pub mod registry;

pub use client::ClientDiscoveryAgent;
pub use coordinator::{ProviderDiscoveryCoordinator, Role};
pub use messages::{utc_timestamp, Advertisement, DiscoveryMessage, TIMESTAMP_FORMAT};
pub use registrations::{ProviderRegistration, ProviderRegistrations};
pub use registry::ServiceRegistry;

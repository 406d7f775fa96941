// Beacon - LAN service discovery and task dispatch
// Library exports

pub mod capabilities;
pub mod config;
pub mod discovery;
pub mod dispatch;
pub mod errors;
pub mod net;
pub mod provider;
pub mod service;

pub use provider::ServiceProvider;

// Provider discovery coordinator
//
// Whoever binds the well-known discovery port first on a host becomes
// the primary. Everyone else is a secondary: it finds the primary,
// registers once and heartbeats, and the primary fans client requests
// out to it so each provider answers for itself.
//
// Roles are terminal for the life of the process. If the primary dies
// its secondaries stay secondaries and new clients cannot find them
// until some process binds the port again. There is no re-election.
// A secondary that never found a primary stays silent: it neither
// advertises on its own nor answers anyone.

use anyhow::{Context, Result};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::messages::DiscoveryMessage;
use super::registrations::{ProviderRegistration, ProviderRegistrations};
use crate::config::constants::MAX_DATAGRAM_SIZE;
use crate::config::DiscoveryConfig;
use crate::service::{current_load, SharedDescriptor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Unelected,
    Primary,
    Secondary,
}

/// State shared by the coordinator's background loops
#[derive(Clone)]
struct Node {
    provider_id: String,
    config: DiscoveryConfig,
    descriptor: SharedDescriptor,
    registrations: ProviderRegistrations,
    socket: Arc<UdpSocket>,
}

impl Node {
    async fn send(&self, message: &DiscoveryMessage, target: SocketAddr) -> Result<()> {
        let payload = message.encode()?;
        self.socket
            .send_to(&payload, target)
            .await
            .with_context(|| format!("Failed to send {} to {}", message.discovery_type(), target))?;
        Ok(())
    }

    fn general_broadcast_addr(&self) -> SocketAddr {
        SocketAddr::new(
            IpAddr::V4(self.config.advertise_address),
            self.config.client_port,
        )
    }

    /// Advertise the current descriptor, with a fresh load reading.
    async fn advertise(&self, target: Option<SocketAddr>) -> Result<()> {
        self.descriptor.set_load(current_load()).await;
        let descriptor = self.descriptor.snapshot().await;
        let target = target.unwrap_or_else(|| self.general_broadcast_addr());
        self.send(
            &DiscoveryMessage::advertisement(descriptor, &self.provider_id),
            target,
        )
        .await?;
        debug!(target = %target, "Sent service advertisement");
        Ok(())
    }

    async fn handle_as_primary(&self, message: DiscoveryMessage, from: SocketAddr) {
        match message {
            DiscoveryMessage::ClientServiceDiscoveryRequest { client_id, .. } => {
                debug!(client_id = %client_id, from = %from, "Client discovery request");
                if let Err(e) = self.advertise(Some(from)).await {
                    warn!(error = %e, "Failed to answer discovery request");
                }
                self.relay(from).await;
            }
            DiscoveryMessage::ProviderDiscoveryRequest { provider_id, .. } => {
                if provider_id == self.provider_id {
                    return;
                }
                let reply = DiscoveryMessage::provider_response(&self.provider_id);
                if let Err(e) = self.send(&reply, from).await {
                    warn!(error = %e, "Failed to answer provider discovery request");
                }
            }
            DiscoveryMessage::ProviderRegistration {
                provider_id,
                service_info,
                ..
            } => {
                self.registrations
                    .register(&provider_id, from, service_info)
                    .await;
            }
            DiscoveryMessage::ProviderHeartbeat { provider_id, .. } => {
                if !self.registrations.heartbeat(&provider_id, from).await {
                    debug!(provider_id = %provider_id, "Heartbeat from unregistered provider ignored");
                }
            }
            DiscoveryMessage::ProviderUnregistration { provider_id, .. } => {
                self.registrations.unregister(&provider_id).await;
            }
            other => {
                debug!(from = %from, kind = other.discovery_type(), "Primary ignoring message");
            }
        }
    }

    /// Ask every live secondary to answer `client` directly.
    async fn relay(&self, client: SocketAddr) {
        self.registrations.prune().await;
        let secondaries: Vec<ProviderRegistration> = self.registrations.live().await;
        let notification = DiscoveryMessage::notification(client);
        for secondary in secondaries {
            if let Err(e) = self.send(&notification, secondary.address).await {
                warn!(provider_id = %secondary.provider_id, error = %e, "Failed to relay discovery request");
            }
        }
    }

    async fn handle_as_secondary(&self, message: DiscoveryMessage, from: SocketAddr) {
        match message {
            DiscoveryMessage::ProviderNotification { client_addr, .. } => {
                if let Err(e) = self.advertise(Some(client_addr)).await {
                    warn!(client = %client_addr, error = %e, "Failed to answer relayed request");
                }
            }
            other => {
                debug!(from = %from, kind = other.discovery_type(), "Secondary ignoring message");
            }
        }
    }
}

pub struct ProviderDiscoveryCoordinator {
    provider_id: String,
    config: DiscoveryConfig,
    descriptor: SharedDescriptor,
    registrations: ProviderRegistrations,
    role: Role,
    primary_addr: Option<SocketAddr>,
    node: Option<Node>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl ProviderDiscoveryCoordinator {
    pub fn new(descriptor: SharedDescriptor, config: DiscoveryConfig) -> Self {
        let registrations = ProviderRegistrations::new(config.registration_staleness());
        Self {
            provider_id: Uuid::new_v4().to_string(),
            config,
            descriptor,
            registrations,
            role: Role::Unelected,
            primary_addr: None,
            node: None,
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
        }
    }

    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// The primary this secondary registered with, if any
    pub fn primary_addr(&self) -> Option<SocketAddr> {
        self.primary_addr
    }

    /// A secondary that never found a primary cannot be discovered
    pub fn is_discoverable(&self) -> bool {
        match self.role {
            Role::Primary => true,
            Role::Secondary => self.primary_addr.is_some(),
            Role::Unelected => false,
        }
    }

    /// Secondaries registered with this primary
    pub fn registrations(&self) -> &ProviderRegistrations {
        &self.registrations
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.node.as_ref().and_then(|n| n.socket.local_addr().ok())
    }

    /// Run the election and start the background loops for the
    /// resulting role. Calling it again returns the existing role.
    pub async fn start(&mut self) -> Result<Role> {
        if self.role != Role::Unelected {
            return Ok(self.role);
        }

        let well_known = SocketAddr::new(
            IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            self.config.discovery_port,
        );

        match UdpSocket::bind(well_known).await {
            Ok(socket) => {
                let node = self.make_node(socket)?;
                self.role = Role::Primary;
                info!(
                    provider_id = %self.provider_id,
                    port = self.config.discovery_port,
                    "Bound discovery port, acting as primary provider"
                );
                self.tasks.push(tokio::spawn(receive_loop(
                    node.clone(),
                    Role::Primary,
                    self.cancel.clone(),
                )));
                self.tasks
                    .push(tokio::spawn(advertise_loop(node.clone(), self.cancel.clone())));
                self.node = Some(node);
            }
            Err(e) => {
                info!(
                    provider_id = %self.provider_id,
                    port = self.config.discovery_port,
                    error = %e,
                    "Discovery port unavailable, acting as secondary provider"
                );
                let socket = UdpSocket::bind(SocketAddr::new(
                    IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                    0,
                ))
                .await
                .context("Failed to bind secondary discovery socket")?;
                let node = self.make_node(socket)?;
                self.role = Role::Secondary;
                self.primary_addr = locate_primary(&node).await;

                match self.primary_addr {
                    Some(primary) => {
                        let registration = DiscoveryMessage::registration(
                            &self.provider_id,
                            self.descriptor.snapshot().await,
                        );
                        if let Err(e) = node.send(&registration, primary).await {
                            warn!(error = %e, "Failed to register with primary");
                        } else {
                            info!(primary = %primary, "Registered with primary provider");
                        }
                        self.tasks.push(tokio::spawn(heartbeat_loop(
                            node.clone(),
                            primary,
                            self.cancel.clone(),
                        )));
                        self.tasks
                            .push(tokio::spawn(advertise_loop(node.clone(), self.cancel.clone())));
                    }
                    None => {
                        error!(
                            attempts = self.config.primary_lookup_attempts,
                            "No primary provider found; this provider is undiscoverable by new clients"
                        );
                    }
                }

                self.tasks.push(tokio::spawn(receive_loop(
                    node.clone(),
                    Role::Secondary,
                    self.cancel.clone(),
                )));
                self.node = Some(node);
            }
        }

        Ok(self.role)
    }

    fn make_node(&self, socket: UdpSocket) -> Result<Node> {
        socket
            .set_broadcast(true)
            .context("Failed to enable SO_BROADCAST")?;
        Ok(Node {
            provider_id: self.provider_id.clone(),
            config: self.config.clone(),
            descriptor: self.descriptor.clone(),
            registrations: self.registrations.clone(),
            socket: Arc::new(socket),
        })
    }

    /// Send an advertisement to `target`, or to the general broadcast
    /// address when `None`.
    pub async fn broadcast(&self, target: Option<SocketAddr>) -> Result<()> {
        let node = self
            .node
            .as_ref()
            .context("Coordinator has not been started")?;
        node.advertise(target).await
    }

    /// Unregister from the primary (secondaries only) and close sockets
    pub async fn stop(&mut self) {
        if let (Role::Secondary, Some(primary), Some(node)) =
            (self.role, self.primary_addr, self.node.as_ref())
        {
            let notice = DiscoveryMessage::unregistration(&self.provider_id);
            if let Err(e) = node.send(&notice, primary).await {
                debug!(error = %e, "Unregistration notice not delivered");
            }
        }

        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        self.node = None;
        info!(provider_id = %self.provider_id, "Discovery coordinator stopped");
    }
}

impl Drop for ProviderDiscoveryCoordinator {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Look for a primary on this host. Bounded: `attempts × timeout`.
async fn locate_primary(node: &Node) -> Option<SocketAddr> {
    let target = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), node.config.discovery_port);
    let request = DiscoveryMessage::provider_request(&node.provider_id);
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

    for attempt in 1..=node.config.primary_lookup_attempts {
        debug!(attempt, target = %target, "Looking for primary provider");
        if let Err(e) = node.send(&request, target).await {
            warn!(attempt, error = %e, "Primary lookup send failed");
        }

        let deadline = Instant::now() + node.config.primary_lookup_timeout();
        loop {
            match timeout_at(deadline, node.socket.recv_from(&mut buf)).await {
                Err(_) => break,
                Ok(Err(e)) => {
                    debug!(attempt, error = %e, "Primary lookup receive failed");
                    tokio::time::sleep_until(deadline).await;
                    break;
                }
                Ok(Ok((len, from))) => {
                    if let Ok(DiscoveryMessage::ProviderDiscoveryResponse { provider_id, .. }) =
                        DiscoveryMessage::decode(&buf[..len])
                    {
                        info!(primary_id = %provider_id, primary = %from, "Found primary provider");
                        return Some(from);
                    }
                }
            }
        }
    }
    None
}

async fn receive_loop(node: Node, role: Role, cancel: CancellationToken) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    loop {
        let (len, from) = tokio::select! {
            _ = cancel.cancelled() => break,
            received = node.socket.recv_from(&mut buf) => match received {
                Ok(r) => r,
                Err(e) => {
                    warn!(error = %e, "Discovery receive error");
                    continue;
                }
            },
        };

        let message = match DiscoveryMessage::decode(&buf[..len]) {
            Ok(m) => m,
            Err(e) => {
                debug!(from = %from, error = %e, "Discarding datagram");
                continue;
            }
        };

        match role {
            Role::Primary => node.handle_as_primary(message, from).await,
            Role::Secondary => node.handle_as_secondary(message, from).await,
            Role::Unelected => {}
        }
    }
}

async fn heartbeat_loop(node: Node, primary: SocketAddr, cancel: CancellationToken) {
    let mut ticker = interval(node.config.heartbeat_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // first tick is immediate; registration already covered it
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let heartbeat = DiscoveryMessage::heartbeat(&node.provider_id);
                if let Err(e) = node.send(&heartbeat, primary).await {
                    warn!(error = %e, "Heartbeat to primary failed");
                }
            }
        }
    }
}

/// Unsolicited advertisement every heartbeat interval, starting now
async fn advertise_loop(node: Node, cancel: CancellationToken) {
    let mut ticker = interval(node.config.heartbeat_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = node.advertise(None).await {
                    debug!(error = %e, "Periodic advertisement failed");
                }
            }
        }
    }
}

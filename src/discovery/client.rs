// Client discovery agent
//
// Broadcasts ClientServiceDiscoveryRequest datagrams and feeds every
// ServiceAdvertisement it hears into a ServiceRegistry.

use anyhow::{Context, Result};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::messages::DiscoveryMessage;
use super::registry::ServiceRegistry;
use crate::config::constants::MAX_DATAGRAM_SIZE;
use crate::config::DiscoveryConfig;
use crate::net;

pub struct ClientDiscoveryAgent {
    client_id: String,
    registry: ServiceRegistry,
    config: DiscoveryConfig,
    bind_ip: IpAddr,
    socket: Option<Arc<UdpSocket>>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl ClientDiscoveryAgent {
    pub fn new(client_id: impl Into<String>, registry: ServiceRegistry, config: DiscoveryConfig) -> Self {
        Self {
            client_id: client_id.into(),
            registry,
            config,
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            socket: None,
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
        }
    }

    /// Bind to a specific local address instead of all interfaces
    pub fn with_bind_ip(mut self, ip: IpAddr) -> Self {
        self.bind_ip = ip;
        self
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    /// Address the agent receives advertisements on, once bound
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    /// Bind the client socket. Idempotent.
    pub async fn bind(&mut self) -> Result<SocketAddr> {
        if let Some(addr) = self.local_addr() {
            return Ok(addr);
        }
        let addr = SocketAddr::new(self.bind_ip, self.config.client_port);
        let socket = UdpSocket::bind(addr)
            .await
            .with_context(|| format!("Failed to bind discovery client socket on {}", addr))?;
        socket
            .set_broadcast(true)
            .context("Failed to enable SO_BROADCAST")?;
        let local = socket.local_addr()?;
        debug!(addr = %local, "Discovery client socket bound");
        self.socket = Some(Arc::new(socket));
        Ok(local)
    }

    fn socket(&self) -> Result<Arc<UdpSocket>> {
        self.socket
            .clone()
            .context("Discovery client socket is not bound")
    }

    /// Send a discovery request to every broadcast target.
    /// Returns how many targets the request was handed to.
    pub async fn send_discovery_request(&self) -> Result<usize> {
        let socket = self.socket()?;
        send_request(&socket, &self.client_id, &self.config).await
    }

    /// Receive loop; runs until `stop()` is called.
    pub async fn listen(&self) -> Result<()> {
        let socket = self.socket()?;
        receive_loop(socket, self.registry.clone(), self.cancel.clone()).await;
        Ok(())
    }

    /// Bind, start the receive loop, send one request immediately and
    /// schedule periodic re-broadcasts and registry expiry.
    pub async fn start(&mut self) -> Result<()> {
        self.bind().await?;
        let socket = self.socket()?;

        self.tasks.push(tokio::spawn(receive_loop(
            socket.clone(),
            self.registry.clone(),
            self.cancel.clone(),
        )));

        if let Err(e) = self.send_discovery_request().await {
            warn!(error = %e, "Initial discovery request failed");
        }

        self.tasks.push(tokio::spawn(rediscovery_loop(
            socket,
            self.client_id.clone(),
            self.config.clone(),
            self.cancel.clone(),
        )));

        self.tasks.push(tokio::spawn(expiry_loop(
            self.registry.clone(),
            self.config.clone(),
            self.cancel.clone(),
        )));

        info!(client_id = %self.client_id, "Discovery client started");
        Ok(())
    }

    /// Halt all loops and release the socket
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        self.socket = None;
        self.cancel = CancellationToken::new();
        info!(client_id = %self.client_id, "Discovery client stopped");
    }
}

impl Drop for ClientDiscoveryAgent {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn send_request(socket: &UdpSocket, client_id: &str, config: &DiscoveryConfig) -> Result<usize> {
    let payload = DiscoveryMessage::client_request(client_id).encode()?;
    let targets = net::broadcast_addresses(&config.broadcast_networks);

    let mut sent = 0;
    for ip in &targets {
        let target = SocketAddr::new(IpAddr::V4(*ip), config.discovery_port);
        match socket.send_to(&payload, target).await {
            Ok(_) => sent += 1,
            Err(e) => warn!(target = %target, error = %e, "Failed to send discovery request"),
        }
    }
    debug!(sent, targets = targets.len(), "Sent discovery request");
    Ok(sent)
}

async fn receive_loop(socket: Arc<UdpSocket>, registry: ServiceRegistry, cancel: CancellationToken) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    loop {
        let (len, from) = tokio::select! {
            _ = cancel.cancelled() => break,
            received = socket.recv_from(&mut buf) => match received {
                Ok(r) => r,
                Err(e) => {
                    warn!(error = %e, "Discovery receive error");
                    continue;
                }
            },
        };

        match DiscoveryMessage::decode(&buf[..len]) {
            Ok(DiscoveryMessage::ServiceAdvertisement(ad)) => {
                registry.update(ad.descriptor).await;
            }
            Ok(other) => {
                debug!(from = %from, kind = other.discovery_type(), "Ignoring discovery message");
            }
            Err(e) => {
                debug!(from = %from, error = %e, "Discarding datagram");
            }
        }
    }
}

async fn rediscovery_loop(
    socket: Arc<UdpSocket>,
    client_id: String,
    config: DiscoveryConfig,
    cancel: CancellationToken,
) {
    let mut ticker = interval(config.rediscovery_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the initial request was sent by start()
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = send_request(&socket, &client_id, &config).await {
                    warn!(error = %e, "Periodic discovery request failed");
                }
            }
        }
    }
}

async fn expiry_loop(registry: ServiceRegistry, config: DiscoveryConfig, cancel: CancellationToken) {
    let max_age = config.service_expiry();
    let mut ticker = interval(config.heartbeat_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                registry.expire(max_age).await;
            }
        }
    }
}

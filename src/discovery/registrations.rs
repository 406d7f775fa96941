// Provider registrations, the primary's table of co-located secondaries
//
// Created by ProviderRegistration, refreshed by ProviderHeartbeat,
// removed by ProviderUnregistration or once stale. Pruned entries are
// gone for good; a secondary has to register again.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::service::ServiceDescriptor;

#[derive(Debug, Clone)]
pub struct ProviderRegistration {
    pub provider_id: String,
    /// Where the secondary's datagrams come from
    pub address: SocketAddr,
    pub service_info: ServiceDescriptor,
    pub last_heartbeat: Instant,
}

#[derive(Debug, Clone)]
pub struct ProviderRegistrations {
    entries: Arc<RwLock<HashMap<String, ProviderRegistration>>>,
    staleness: Duration,
}

impl ProviderRegistrations {
    pub fn new(staleness: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            staleness,
        }
    }

    /// Record or refresh a registration
    pub async fn register(&self, provider_id: &str, address: SocketAddr, service_info: ServiceDescriptor) {
        self.register_at(provider_id, address, service_info, Instant::now())
            .await;
    }

    async fn register_at(
        &self,
        provider_id: &str,
        address: SocketAddr,
        service_info: ServiceDescriptor,
        now: Instant,
    ) {
        let mut entries = self.entries.write().await;
        let previous = entries.insert(
            provider_id.to_string(),
            ProviderRegistration {
                provider_id: provider_id.to_string(),
                address,
                service_info,
                last_heartbeat: now,
            },
        );
        if previous.is_none() {
            tracing::info!(provider_id = %provider_id, address = %address, "Secondary provider registered");
        }
    }

    /// Refresh a known provider. Unknown providers are not registered
    /// from a heartbeat; returns false for them.
    pub async fn heartbeat(&self, provider_id: &str, address: SocketAddr) -> bool {
        self.heartbeat_at(provider_id, address, Instant::now()).await
    }

    async fn heartbeat_at(&self, provider_id: &str, address: SocketAddr, now: Instant) -> bool {
        let mut entries = self.entries.write().await;
        match entries.get_mut(provider_id) {
            Some(entry) => {
                entry.last_heartbeat = now;
                entry.address = address;
                true
            }
            None => false,
        }
    }

    pub async fn unregister(&self, provider_id: &str) -> bool {
        let removed = self.entries.write().await.remove(provider_id).is_some();
        if removed {
            tracing::info!(provider_id = %provider_id, "Secondary provider unregistered");
        }
        removed
    }

    /// Drop registrations whose last heartbeat is older than the
    /// staleness threshold. Returns the dropped provider ids.
    pub async fn prune(&self) -> Vec<String> {
        self.prune_at(Instant::now()).await
    }

    async fn prune_at(&self, now: Instant) -> Vec<String> {
        let mut entries = self.entries.write().await;
        let stale: Vec<String> = entries
            .values()
            .filter(|e| now.saturating_duration_since(e.last_heartbeat) > self.staleness)
            .map(|e| e.provider_id.clone())
            .collect();
        for id in &stale {
            entries.remove(id);
            tracing::warn!(provider_id = %id, "Pruned stale secondary provider");
        }
        stale
    }

    /// Snapshot of all current registrations
    pub async fn live(&self) -> Vec<ProviderRegistration> {
        self.entries.read().await.values().cloned().collect()
    }

    pub async fn contains(&self, provider_id: &str) -> bool {
        self.entries.read().await.contains_key(provider_id)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

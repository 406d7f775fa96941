// Service registry: the client-side view of discovered providers
//
// Last write wins by serviceId. Entries are stamped on receipt and
// removed once they go unrefreshed for longer than the expiry window.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::service::ServiceDescriptor;

/// Thread-safe map of serviceId → last received descriptor.
#[derive(Debug, Clone, Default)]
pub struct ServiceRegistry {
    services: Arc<RwLock<HashMap<String, ServiceDescriptor>>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a descriptor, stamping it with the receive time.
    pub async fn update(&self, descriptor: ServiceDescriptor) {
        self.update_at(descriptor, Utc::now()).await;
    }

    async fn update_at(&self, mut descriptor: ServiceDescriptor, received: DateTime<Utc>) {
        let mut services = self.services.write().await;

        // Stamps for one id never repeat or go backwards, even if the
        // wall clock does.
        let stamp = match services
            .get(&descriptor.service_id)
            .and_then(|previous| previous.last_seen_timestamp)
        {
            Some(previous) if previous >= received => previous + ChronoDuration::microseconds(1),
            _ => received,
        };
        descriptor.last_seen_timestamp = Some(stamp);

        if !services.contains_key(&descriptor.service_id) {
            tracing::info!(
                service_id = %descriptor.service_id,
                service_name = %descriptor.service_name,
                endpoint = %descriptor.endpoint,
                "Discovered service"
            );
        }
        services.insert(descriptor.service_id.clone(), descriptor);
    }

    /// Snapshot of the registry.
    ///
    /// With a name filter only online services with that exact name are
    /// returned. Ordered by service name, then id.
    pub async fn query(&self, service_name: Option<&str>) -> Vec<ServiceDescriptor> {
        let services = self.services.read().await;
        let mut result: Vec<ServiceDescriptor> = services
            .values()
            .filter(|s| match service_name {
                Some(name) => s.is_online() && s.service_name == name,
                None => true,
            })
            .cloned()
            .collect();
        result.sort_by(|a, b| {
            a.service_name
                .cmp(&b.service_name)
                .then_with(|| a.service_id.cmp(&b.service_id))
        });
        result
    }

    pub async fn get(&self, service_id: &str) -> Option<ServiceDescriptor> {
        self.services.read().await.get(service_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.services.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.services.read().await.is_empty()
    }

    /// Remove entries last seen more than `older_than` ago.
    /// Returns the removed service ids.
    pub async fn expire(&self, older_than: Duration) -> Vec<String> {
        self.expire_at(Utc::now(), older_than).await
    }

    async fn expire_at(&self, now: DateTime<Utc>, older_than: Duration) -> Vec<String> {
        let max_age = ChronoDuration::from_std(older_than).unwrap_or(ChronoDuration::MAX);
        let mut services = self.services.write().await;

        let expired: Vec<String> = services
            .iter()
            .filter(|(_, s)| match s.last_seen_timestamp {
                Some(seen) => now.signed_duration_since(seen) > max_age,
                None => true,
            })
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            services.remove(id);
            tracing::info!(service_id = %id, "Service expired");
        }
        expired
    }
}

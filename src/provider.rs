// Service provider
//
// One provider process: a descriptor built from its capability table, a
// dispatch server for task traffic and a discovery coordinator that
// advertises the server's endpoint.

use anyhow::Result;
use std::net::SocketAddr;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::discovery::{ProviderDiscoveryCoordinator, Role};
use crate::dispatch::{CapabilityTable, DispatchServer, TaskDispatcher};
use crate::net;
use crate::service::{ServiceDescriptor, SharedDescriptor};

pub struct ServiceProvider {
    config: Config,
    descriptor: SharedDescriptor,
    dispatcher: TaskDispatcher,
    coordinator: ProviderDiscoveryCoordinator,
    server_cancel: Option<CancellationToken>,
    server_task: Option<JoinHandle<()>>,
    dispatch_addr: Option<SocketAddr>,
}

impl ServiceProvider {
    pub fn new(config: Config, handlers: CapabilityTable) -> Self {
        let descriptor = SharedDescriptor::new(ServiceDescriptor::new(
            config.provider.service_name.clone(),
            config.provider.service_version.clone(),
            String::new(),
            handlers.specs(),
        ));
        let dispatcher = TaskDispatcher::new(descriptor.clone(), handlers);
        let coordinator =
            ProviderDiscoveryCoordinator::new(descriptor.clone(), config.discovery.clone());

        Self {
            config,
            descriptor,
            dispatcher,
            coordinator,
            server_cancel: None,
            server_task: None,
            dispatch_addr: None,
        }
    }

    pub fn descriptor(&self) -> &SharedDescriptor {
        &self.descriptor
    }

    pub fn dispatcher(&self) -> &TaskDispatcher {
        &self.dispatcher
    }

    pub fn coordinator(&self) -> &ProviderDiscoveryCoordinator {
        &self.coordinator
    }

    pub fn role(&self) -> Role {
        self.coordinator.role()
    }

    /// Address the dispatch server is bound to, once started
    pub fn dispatch_addr(&self) -> Option<SocketAddr> {
        self.dispatch_addr
    }

    /// Bind the dispatch server, publish its endpoint and join discovery
    pub async fn start(&mut self) -> Result<Role> {
        if self.server_task.is_none() {
            let server =
                DispatchServer::bind(&self.config.provider.bind_address, self.dispatcher.clone())
                    .await?;
            let local = server.local_addr()?;
            let host = self
                .config
                .provider
                .advertised_host
                .clone()
                .unwrap_or_else(|| net::local_ip().to_string());
            let endpoint = format!("{}:{}", host, local.port());
            self.descriptor.set_endpoint(endpoint.clone()).await;

            self.server_cancel = Some(server.cancel_token());
            self.server_task = Some(tokio::spawn(async move {
                if let Err(e) = server.serve().await {
                    warn!(error = %e, "Dispatch server exited");
                }
            }));
            self.dispatch_addr = Some(local);

            let descriptor = self.descriptor.snapshot().await;
            info!(
                service_id = %descriptor.service_id,
                service_name = %descriptor.service_name,
                endpoint = %endpoint,
                capabilities = descriptor.capabilities.len(),
                "Service provider ready"
            );
        }

        self.coordinator.start().await
    }

    pub async fn stop(&mut self) {
        self.coordinator.stop().await;
        if let Some(cancel) = self.server_cancel.take() {
            cancel.cancel();
        }
        if let Some(task) = self.server_task.take() {
            let _ = task.await;
        }
        self.dispatch_addr = None;
        info!("Service provider stopped");
    }
}

//! Multi-transport dispatch.
//!
//! A [`DispatchServer`] fans one logical registry across N underlying
//! transports: registrations and announcements go to every transport,
//! `need` races them all and keeps whichever settles first. Transport
//! errors are logged and swallowed here; `close` events are forwarded
//! upward for the embedding application to observe.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{self, BoxFuture};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::service::{ClientService, Service, ServiceDescriptor, ServiceError};

use super::{LifecycleEvent, Registry};

#[derive(Default)]
pub struct DispatchServer {
    servers: RwLock<Vec<Arc<dyn Registry>>>,
    lifecycle: LifecycleChannel,
}

struct LifecycleChannel(broadcast::Sender<LifecycleEvent>);

impl Default for LifecycleChannel {
    fn default() -> LifecycleChannel {
        let (sender, _) = broadcast::channel(16);
        LifecycleChannel(sender)
    }
}

impl DispatchServer {
    pub fn new() -> DispatchServer {
        DispatchServer::default()
    }

    /// Attach an underlying registry. Its `close` events are forwarded
    /// upward; its `error` events are logged and swallowed.
    ///
    /// Must be called from within a tokio runtime: event forwarding runs on
    /// a spawned task.
    pub fn add_server(&self, server: Arc<dyn Registry>) {
        let mut events = server.lifecycle();
        let upstream = self.lifecycle.0.clone();
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                match event {
                    LifecycleEvent::Closed => {
                        debug!("underlying registry closed");
                        let _ = upstream.send(LifecycleEvent::Closed);
                    }
                    LifecycleEvent::Error(message) => warn!(%message, "registry error"),
                }
            }
        });

        self.servers.write().unwrap().push(server);
    }

    /// Number of underlying registries.
    pub fn server_count(&self) -> usize {
        self.servers.read().unwrap().len()
    }

    /// Register a service on every underlying registry.
    pub fn add_service(&self, service: Arc<Service>) {
        for server in self.servers.read().unwrap().iter() {
            server.add_service(Arc::clone(&service));
        }
    }

    /// Register a service on a single underlying registry only - e.g. keep
    /// it off remote transports by targeting the in-process registry.
    pub fn add_service_at(&self, service: Arc<Service>, index: usize) -> Result<(), ServiceError> {
        let servers = self.servers.read().unwrap();
        let server = servers
            .get(index)
            .ok_or(ServiceError::NoSuchRegistry(index))?;
        server.add_service(service);
        Ok(())
    }

    /// Resolve every named service, racing all underlying registries per
    /// name. All-or-nothing across names; per name, first to settle wins
    /// and a registry that never settles cannot block another that does.
    pub async fn need(&self, names: &[&str]) -> Result<Vec<ClientService>, ServiceError> {
        let needs: Vec<_> = names.iter().map(|name| self.need_raced(name)).collect();
        future::try_join_all(needs).await
    }

    /// `need` with a deadline. Fails with `NeedTimeout` on expiry.
    pub async fn need_timeout(
        &self,
        names: &[&str],
        deadline: Duration,
    ) -> Result<Vec<ClientService>, ServiceError> {
        tokio::time::timeout(deadline, self.need(names))
            .await
            .map_err(|_| ServiceError::NeedTimeout(names.join(", ")))?
    }

    /// Start every underlying registry listening.
    pub fn listen(&self) {
        for server in self.servers.read().unwrap().iter() {
            server.listen();
        }
    }

    /// Re-announce every service on every underlying registry.
    pub fn announce_all(&self) {
        for server in self.servers.read().unwrap().iter() {
            server.announce_all();
        }
    }

    async fn need_raced(&self, name: &str) -> Result<ClientService, ServiceError> {
        let servers: Vec<Arc<dyn Registry>> = self.servers.read().unwrap().clone();
        if servers.is_empty() {
            return Err(ServiceError::NoRegistries);
        }

        let races: Vec<BoxFuture<'static, Result<ClientService, ServiceError>>> = servers
            .iter()
            .map(|server| {
                let server = Arc::clone(server);
                let name = name.to_string();
                Box::pin(async move { server.need_service(&name).await })
                    as BoxFuture<'static, Result<ClientService, ServiceError>>
            })
            .collect();

        let (winner, rest) = future::select_ok(races).await?;
        watch_divergence(name.to_string(), winner.descriptor().clone(), rest);
        Ok(winner)
    }
}

/// Transports for the same name are assumed to agree; if a slower one later
/// resolves with a different descriptor, log the divergence. The winner has
/// already been delivered either way.
fn watch_divergence(
    name: String,
    winning: ServiceDescriptor,
    rest: Vec<BoxFuture<'static, Result<ClientService, ServiceError>>>,
) {
    if rest.is_empty() {
        return;
    }
    tokio::spawn(async move {
        for pending in rest {
            if let Ok(other) = pending.await {
                if *other.descriptor() != winning {
                    warn!(service = %name, "raced registries disagree on service descriptor");
                }
            }
        }
    });
}

#[async_trait]
impl Registry for DispatchServer {
    fn add_service(&self, service: Arc<Service>) {
        DispatchServer::add_service(self, service)
    }

    async fn need_service(&self, name: &str) -> Result<ClientService, ServiceError> {
        self.need_raced(name).await
    }

    fn listen(&self) {
        DispatchServer::listen(self)
    }

    fn announce_all(&self) {
        DispatchServer::announce_all(self)
    }

    fn lifecycle(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.lifecycle.0.subscribe()
    }
}

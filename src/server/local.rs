//! In-process service registry.
//!
//! Tracks announced services, resolves pending `need()` requests when a
//! matching service appears, and hands out [`ClientService`] proxies bound
//! through the configured service transform.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::future;
use tokio::sync::{broadcast, oneshot};
use tracing::debug;

use crate::service::{passthrough_transform, ClientService, Service, ServiceError, ServiceTransform};

use super::{LifecycleEvent, Registry};

struct PendingNeed {
    name: String,
    resolve: oneshot::Sender<ClientService>,
}

#[derive(Default)]
struct LocalState {
    services: Vec<Arc<Service>>,
    pending: Vec<PendingNeed>,
    resolved: HashMap<String, ClientService>,
}

pub struct LocalServer {
    namespace: String,
    transform: ServiceTransform,
    state: Mutex<LocalState>,
    lifecycle: broadcast::Sender<LifecycleEvent>,
}

impl LocalServer {
    /// A registry whose proxies pass raw results through unchanged.
    pub fn new(namespace: &str) -> LocalServer {
        LocalServer::with_transform(namespace, passthrough_transform())
    }

    /// A registry whose proxies pipe every raw result through `transform`.
    pub fn with_transform(namespace: &str, transform: ServiceTransform) -> LocalServer {
        let (lifecycle, _) = broadcast::channel(16);
        LocalServer {
            namespace: namespace.to_string(),
            transform,
            state: Mutex::new(LocalState::default()),
            lifecycle,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Number of registered services.
    pub fn service_count(&self) -> usize {
        self.state.lock().unwrap().services.len()
    }

    /// Register a service and immediately announce it.
    pub fn add_service(&self, service: Arc<Service>) {
        let mut state = self.state.lock().unwrap();
        state.services.push(Arc::clone(&service));
        self.announce_locked(&mut state, &[service]);
    }

    /// Announce the given services: build client proxies, cache them, and
    /// resolve matching pending needs in request order.
    pub fn announce(&self, services: &[Arc<Service>]) {
        let mut state = self.state.lock().unwrap();
        self.announce_locked(&mut state, services);
    }

    /// Re-announce every registered service.
    pub fn announce_all(&self) {
        let mut state = self.state.lock().unwrap();
        let services = state.services.clone();
        self.announce_locked(&mut state, &services);
    }

    fn announce_locked(&self, state: &mut LocalState, services: &[Arc<Service>]) {
        for service in services {
            let proxy = ClientService::new(Arc::clone(service), Arc::clone(&self.transform));
            state
                .resolved
                .insert(service.name().to_string(), proxy.clone());
            debug!(namespace = %self.namespace, service = service.name(), "announced");

            // Resolve matching pending needs, FIFO. Each record resolves at
            // most once.
            let mut index = 0;
            while index < state.pending.len() {
                if state.pending[index].name == service.name() {
                    let pending = state.pending.remove(index);
                    let _ = pending.resolve.send(proxy.clone());
                } else {
                    index += 1;
                }
            }
        }
    }

    /// Resolve every named service, suspending until each is announced.
    /// All-or-nothing: completes only once every name has resolved.
    pub async fn need(&self, names: &[&str]) -> Result<Vec<ClientService>, ServiceError> {
        let needs: Vec<_> = names.iter().map(|name| self.need_one(name)).collect();
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

    async fn need_one(&self, name: &str) -> Result<ClientService, ServiceError> {
        let receiver = {
            let mut state = self.state.lock().unwrap();
            if let Some(found) = state.resolved.get(name) {
                return Ok(found.clone());
            }
            let (resolve, receiver) = oneshot::channel();
            state.pending.push(PendingNeed {
                name: name.to_string(),
                resolve,
            });
            receiver
        };

        receiver.await.map_err(|_| ServiceError::RegistryClosed)
    }
}

#[async_trait]
impl Registry for LocalServer {
    fn add_service(&self, service: Arc<Service>) {
        LocalServer::add_service(self, service)
    }

    async fn need_service(&self, name: &str) -> Result<ClientService, ServiceError> {
        self.need_one(name).await
    }

    fn listen(&self) {}

    fn announce_all(&self) {
        LocalServer::announce_all(self)
    }

    fn lifecycle(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.lifecycle.subscribe()
    }
}

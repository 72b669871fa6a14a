//! Service registries - in-process and multi-transport dispatch.
//!
//! [`LocalServer`] is the in-process registry; [`DispatchServer`] fans one
//! logical registry across many. Both implement [`Registry`], the trait a
//! remote transport supplied by the embedding application implements to
//! plug into the dispatch layer.

mod dispatch;
mod local;

pub use dispatch::DispatchServer;
pub use local::LocalServer;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::service::{ClientService, Service, ServiceError};

/// Lifecycle notification emitted by a registry.
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    /// The registry's transport shut down.
    Closed,
    /// A transport-level failure the registry swallowed.
    Error(String),
}

/// A service registry transport.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Register a service and announce it.
    fn add_service(&self, service: Arc<Service>);

    /// Resolve one service by name, suspending until it is announced.
    async fn need_service(&self, name: &str) -> Result<ClientService, ServiceError>;

    /// Start accepting connections. A no-op for in-process registries.
    fn listen(&self);

    /// Re-announce every registered service.
    fn announce_all(&self);

    /// Subscribe to `close`/`error` lifecycle events.
    fn lifecycle(&self) -> broadcast::Receiver<LifecycleEvent>;
}

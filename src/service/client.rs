//! Client-side proxies and the service-transform seam.
//!
//! A [`ClientService`] is what `need()` hands back: a callable proxy that
//! forwards method calls to the service and pipes every raw result through
//! the registry's configured transform. The transform is the seam where
//! descriptor-kind results become resolved proxies; the standard
//! implementation ships here as [`descriptor_transform`].

use std::fmt;
use std::sync::{Arc, Weak};

use futures::future::{self, BoxFuture};
use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::server::Registry;

use super::{RawResult, ResultKind, Service, ServiceDescriptor, ServiceError};

/// A resolved method result.
#[derive(Clone)]
pub enum Resolved {
    /// Plain data.
    Value(Value),
    /// The null-descriptor sentinel: the call yielded no document. Distinct
    /// from an error.
    None,
    /// A single resolved service.
    Service(ClientService),
    /// One resolved service per descriptor in an array result.
    Services(Vec<ClientService>),
}

impl Resolved {
    pub fn into_value(self) -> Option<Value> {
        match self {
            Resolved::Value(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_service(self) -> Option<ClientService> {
        match self {
            Resolved::Service(service) => Some(service),
            _ => None,
        }
    }

    pub fn into_services(self) -> Option<Vec<ClientService>> {
        match self {
            Resolved::Services(services) => Some(services),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Resolved::None)
    }
}

impl fmt::Debug for Resolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolved::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Resolved::None => f.write_str("None"),
            Resolved::Service(service) => f.debug_tuple("Service").field(service).finish(),
            Resolved::Services(services) => f.debug_tuple("Services").field(services).finish(),
        }
    }
}

/// Function from a raw method result to a resolved one, possibly async.
pub type ServiceTransform =
    Arc<dyn Fn(RawResult) -> BoxFuture<'static, Result<Resolved, ServiceError>> + Send + Sync>;

/// The identity transform: every raw result passes through as its data.
pub fn passthrough_transform() -> ServiceTransform {
    Arc::new(|raw| Box::pin(async move { Ok(Resolved::Value(raw.data)) }))
}

/// The standard descriptor-resolving transform.
///
/// Descriptor-kind results resolve through the given registry: the
/// `{type:"null"}` sentinel becomes [`Resolved::None`], an array resolves
/// every named service, anything else resolves the single named service.
/// Value-kind results pass through unchanged. The registry is held weakly;
/// a transform that outlives its registry fails with `RegistryClosed`.
pub fn descriptor_transform<R>(registry: &Arc<R>) -> ServiceTransform
where
    R: Registry + ?Sized + 'static,
{
    let registry = Arc::downgrade(registry);

    Arc::new(move |raw| {
        let registry = Weak::clone(&registry);
        Box::pin(async move {
            if raw.kind != ResultKind::ServiceDescriptor {
                return Ok(Resolved::Value(raw.data));
            }
            if raw.data.get("type").and_then(Value::as_str) == Some("null") {
                return Ok(Resolved::None);
            }

            let registry = registry.upgrade().ok_or(ServiceError::RegistryClosed)?;

            match raw.data {
                Value::Array(items) => {
                    let names = items
                        .iter()
                        .map(descriptor_name)
                        .collect::<Result<Vec<_>, _>>()?;
                    let needs = names.into_iter().map(|name| {
                        let registry = Arc::clone(&registry);
                        async move { registry.need_service(&name).await }
                    });
                    let services = future::try_join_all(needs).await?;
                    Ok(Resolved::Services(services))
                }
                single => {
                    let name = descriptor_name(&single)?;
                    let service = registry.need_service(&name).await?;
                    Ok(Resolved::Service(service))
                }
            }
        })
    })
}

fn descriptor_name(descriptor: &Value) -> Result<String, ServiceError> {
    descriptor
        .get("name")
        .and_then(Value::as_str)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ServiceError::BadDescriptor(descriptor.to_string()))
}

/// The callable proxy handed back by `need()`.
#[derive(Clone)]
pub struct ClientService {
    service: Arc<Service>,
    descriptor: ServiceDescriptor,
    transform: ServiceTransform,
}

impl ClientService {
    pub(crate) fn new(service: Arc<Service>, transform: ServiceTransform) -> ClientService {
        let descriptor = service.descriptor();
        ClientService {
            service,
            descriptor,
            transform,
        }
    }

    pub fn descriptor(&self) -> &ServiceDescriptor {
        &self.descriptor
    }

    /// Forward a method call and pipe the raw result through the transform.
    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Resolved, ServiceError> {
        let raw = self.service.call(method, params).await?;
        (self.transform)(raw).await
    }

    /// Observe the service's notifications for an event.
    pub fn subscribe(&self, event: &str) -> UnboundedReceiver<Value> {
        self.service.subscribe(event)
    }
}

impl fmt::Debug for ClientService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientService")
            .field("descriptor", &self.descriptor)
            .finish()
    }
}

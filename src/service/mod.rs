//! Service primitive - named method tables, descriptors, notifications.
//!
//! A [`Service`] holds an explicit, ordered table of named methods. Each
//! method is an async handler plus a [`ResultKind`] telling the transport
//! boundary whether the returned JSON is plain data or a service
//! descriptor that must itself be resolved before a caller sees it.
//!
//! ## Example
//!
//! ```ignore
//! let service = Service::new("greeter")
//!     .method("hello", ResultKind::Value, |params| async move {
//!         Ok(json!({ "hello": params.first().cloned() }))
//!     });
//!
//! let raw = service.call("hello", vec![json!("Pat")]).await?;
//! assert_eq!(raw.kind, ResultKind::Value);
//! ```

mod client;
mod document;
mod model;

pub use client::{
    descriptor_transform, passthrough_transform, ClientService, Resolved, ServiceTransform,
};
pub use document::DocumentService;
pub use model::ModelService;

use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::model::ModelError;
use crate::validator::ValidationIssue;

/// How a method's raw result must be treated at the transport boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultKind {
    /// Plain data, delivered as-is.
    #[serde(rename = "value")]
    Value,
    /// Descriptor JSON naming further services; the transform resolves it
    /// into callable proxies before delivery.
    #[serde(rename = "serviceDescriptor")]
    ServiceDescriptor,
}

/// A method's raw result before the service transform runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawResult {
    #[serde(rename = "type")]
    pub kind: ResultKind,
    pub data: Value,
}

/// Wire-level summary of a service: name and method list, no bodies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub methods: Vec<String>,
}

impl ServiceDescriptor {
    pub fn new(name: impl Into<String>, methods: Vec<String>) -> ServiceDescriptor {
        ServiceDescriptor {
            name: name.into(),
            kind: "service".to_string(),
            methods,
        }
    }
}

/// Error type for service calls and registry operations.
#[derive(Debug)]
pub enum ServiceError {
    /// The service has no method with this name.
    UnknownMethod { service: String, method: String },
    /// The caller's input failed schema validation.
    Invalid(Vec<ValidationIssue>),
    /// A method's parameters did not have the expected shape.
    InvalidParams(String),
    /// A descriptor result did not carry a resolvable service name.
    BadDescriptor(String),
    /// Serialization of a result or descriptor failed.
    Codec(String),
    /// The underlying model operation failed.
    Model(ModelError),
    /// The service has not been published to a registry yet.
    NotPublished(String),
    /// The service was already published.
    AlreadyPublished(String),
    /// A `need` deadline expired.
    NeedTimeout(String),
    /// The registry went away before the need resolved.
    RegistryClosed,
    /// The dispatch server has no underlying registries.
    NoRegistries,
    /// No underlying registry exists at the requested index.
    NoSuchRegistry(usize),
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceError::UnknownMethod { service, method } => {
                write!(f, "service {} has no method {}", service, method)
            }
            ServiceError::Invalid(issues) => {
                let summary: Vec<String> = issues
                    .iter()
                    .map(|issue| format!("{} {}", issue.property, issue.message))
                    .collect();
                write!(f, "validation failed: {}", summary.join("; "))
            }
            ServiceError::InvalidParams(message) => write!(f, "invalid params: {}", message),
            ServiceError::BadDescriptor(message) => write!(f, "bad descriptor: {}", message),
            ServiceError::Codec(message) => write!(f, "codec error: {}", message),
            ServiceError::Model(err) => write!(f, "model error: {}", err),
            ServiceError::NotPublished(name) => {
                write!(f, "service {} is not published to a registry", name)
            }
            ServiceError::AlreadyPublished(name) => {
                write!(f, "service {} is already published", name)
            }
            ServiceError::NeedTimeout(names) => {
                write!(f, "need timed out waiting for: {}", names)
            }
            ServiceError::RegistryClosed => {
                write!(f, "registry closed before the need resolved")
            }
            ServiceError::NoRegistries => {
                write!(f, "dispatch server has no underlying registries")
            }
            ServiceError::NoSuchRegistry(index) => {
                write!(f, "no underlying registry at index {}", index)
            }
        }
    }
}

impl Error for ServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ServiceError::Model(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ModelError> for ServiceError {
    fn from(err: ModelError) -> ServiceError {
        ServiceError::Model(err)
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> ServiceError {
        ServiceError::Codec(err.to_string())
    }
}

/// Explicit subscription registry for service-level notifications
/// (`"create"`, `"pre.<mutation>"`, ...). Delivery is a synchronous
/// iteration over current subscribers; closed receivers are pruned.
#[derive(Default)]
pub struct NotificationRegistry {
    subscribers: Mutex<HashMap<String, Vec<UnboundedSender<Value>>>>,
}

impl NotificationRegistry {
    pub fn new() -> NotificationRegistry {
        NotificationRegistry::default()
    }

    pub fn subscribe(&self, event: &str) -> UnboundedReceiver<Value> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap()
            .entry(event.to_string())
            .or_default()
            .push(sender);
        receiver
    }

    pub fn notify(&self, event: &str, payload: Value) {
        let mut subscribers = self.subscribers.lock().unwrap();
        if let Some(senders) = subscribers.get_mut(event) {
            senders.retain(|sender| sender.send(payload.clone()).is_ok());
        }
    }
}

pub(crate) type MethodHandler =
    Box<dyn Fn(Vec<Value>) -> BoxFuture<'static, Result<Value, ServiceError>> + Send + Sync>;

struct Method {
    kind: ResultKind,
    handler: MethodHandler,
}

/// A named service with an explicit, ordered method table.
pub struct Service {
    name: String,
    methods: Vec<(String, Method)>,
    notifications: Arc<NotificationRegistry>,
}

impl Service {
    pub fn new(name: impl Into<String>) -> Service {
        Service::with_notifications(name, Arc::new(NotificationRegistry::new()))
    }

    /// Build a service around an externally owned notification registry, so
    /// the component assembling the service can publish on it directly.
    pub fn with_notifications(
        name: impl Into<String>,
        notifications: Arc<NotificationRegistry>,
    ) -> Service {
        Service {
            name: name.into(),
            methods: Vec::new(),
            notifications,
        }
    }

    /// Register a method. Builder pattern - returns `self` for chaining.
    pub fn method<F, Fut>(mut self, name: &str, kind: ResultKind, handler: F) -> Service
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ServiceError>> + Send + 'static,
    {
        self.methods.push((
            name.to_string(),
            Method {
                kind,
                handler: Box::new(move |params| Box::pin(handler(params))),
            },
        ));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Method names in registration order.
    pub fn method_names(&self) -> Vec<&str> {
        self.methods.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn descriptor(&self) -> ServiceDescriptor {
        ServiceDescriptor::new(
            self.name.clone(),
            self.methods.iter().map(|(name, _)| name.clone()).collect(),
        )
    }

    /// Invoke a method by name, returning its raw `{kind, data}` result.
    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<RawResult, ServiceError> {
        let entry = self
            .methods
            .iter()
            .find(|(name, _)| name == method)
            .map(|(_, entry)| entry)
            .ok_or_else(|| ServiceError::UnknownMethod {
                service: self.name.clone(),
                method: method.to_string(),
            })?;

        let data = (entry.handler)(params).await?;
        Ok(RawResult {
            kind: entry.kind,
            data,
        })
    }

    pub fn subscribe(&self, event: &str) -> UnboundedReceiver<Value> {
        self.notifications.subscribe(event)
    }

    pub fn notify(&self, event: &str, payload: Value) {
        self.notifications.notify(event, payload)
    }

    pub fn notifications(&self) -> &Arc<NotificationRegistry> {
        &self.notifications
    }
}

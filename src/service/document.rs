//! DocumentService - one document as a remotely callable service.
//!
//! Built in two phases: [`DocumentService::build`] computes the
//! content-derived identity and assembles the method table with no side
//! effects; [`DocumentService::publish`] registers the service with a
//! registry. The split keeps construction free of network-visible effects,
//! so caches can probe identities without announcing anything.

use std::sync::{Arc, OnceLock, Weak};

use serde_json::Value;

use crate::document::{content_id, Document};
use crate::model::{Model, Validated};
use crate::server::Registry;

use super::{ResultKind, Service, ServiceDescriptor, ServiceError};

type RegistrySlot = Arc<OnceLock<Weak<dyn Registry>>>;

pub struct DocumentService {
    document: Document,
    id: String,
    service: Arc<Service>,
    registry: RegistrySlot,
}

impl DocumentService {
    /// Compute the content identity and assemble the method table.
    ///
    /// Nothing is registered until `publish`; the service name is
    /// `"document." + digest(data)`.
    pub fn build(document: Document, model: Arc<Model>) -> Arc<DocumentService> {
        let id = content_id(&document.data);
        let name = format!("document.{}", id);
        let registry: RegistrySlot = Arc::new(OnceLock::new());

        let service = Service::new(name)
            .method("mutate", ResultKind::ServiceDescriptor, {
                let document = document.clone();
                let model = Arc::clone(&model);
                let registry = Arc::clone(&registry);
                move |params: Vec<Value>| {
                    let document = document.clone();
                    let model = Arc::clone(&model);
                    let registry = Arc::clone(&registry);
                    async move {
                        let mut params = params.into_iter();
                        let mutation = params
                            .next()
                            .as_ref()
                            .and_then(Value::as_str)
                            .map(str::to_string)
                            .ok_or_else(|| {
                                ServiceError::InvalidParams(
                                    "mutate expects a mutation name".to_string(),
                                )
                            })?;
                        let data = params.next().unwrap_or(Value::Null);

                        match model.apply_mutation(&mutation, &document, data).await? {
                            Validated::Invalid(issues) => Err(ServiceError::Invalid(issues)),
                            Validated::Valid(next) => {
                                let registry = upgrade(&registry, &document)?;
                                // A fresh identity per mutation; content-identical
                                // results collapse at the next dedup check upstream.
                                let successor = DocumentService::build(next, model);
                                successor.publish_dyn(registry)?;
                                Ok(serde_json::to_value(successor.descriptor())?)
                            }
                        }
                    }
                }
            })
            .method("remove", ResultKind::Value, {
                let document = document.clone();
                let model = Arc::clone(&model);
                move |_params| {
                    let document = document.clone();
                    let model = Arc::clone(&model);
                    async move {
                        model.remove(&document).await?;
                        Ok(Value::Null)
                    }
                }
            })
            .method("get_data", ResultKind::Value, {
                let data = document.data.clone();
                move |_params| {
                    let data = data.clone();
                    async move { Ok(data) }
                }
            });

        Arc::new(DocumentService {
            document,
            id,
            service: Arc::new(service),
            registry,
        })
    }

    /// Hex content identity of the wrapped document.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        self.service.name()
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn descriptor(&self) -> ServiceDescriptor {
        self.service.descriptor()
    }

    pub fn service(&self) -> &Arc<Service> {
        &self.service
    }

    /// True when `other`'s data hashes to this service's identity. Pure -
    /// nothing is constructed and nothing is registered.
    pub fn equals_document(&self, other: &Document) -> bool {
        content_id(&other.data) == self.id
    }

    /// Register with the registry. The handle is retained weakly so
    /// mutations can publish their successor services.
    pub fn publish<R>(&self, registry: &Arc<R>) -> Result<(), ServiceError>
    where
        R: Registry + 'static,
    {
        self.publish_dyn(Arc::clone(registry) as Arc<dyn Registry>)
    }

    pub(crate) fn publish_dyn(&self, registry: Arc<dyn Registry>) -> Result<(), ServiceError> {
        self.registry
            .set(Arc::downgrade(&registry))
            .map_err(|_| ServiceError::AlreadyPublished(self.name().to_string()))?;
        registry.add_service(Arc::clone(&self.service));
        Ok(())
    }
}

fn upgrade(slot: &RegistrySlot, document: &Document) -> Result<Arc<dyn Registry>, ServiceError> {
    slot.get()
        .and_then(Weak::upgrade)
        .ok_or_else(|| ServiceError::NotPublished(format!("document.{}", document.content_id())))
}

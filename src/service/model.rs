//! ModelService - a model's query/mutation surface as a service.
//!
//! One method per declared query (the `"default"` query backs `get`), plus
//! `describe` and `create`. Query and create results are descriptor-kind:
//! the method body resolves documents into document services through the
//! per-service dedup cache and returns descriptor JSON for the transport
//! boundary to resolve.

use std::sync::{Arc, Mutex, OnceLock, Weak};

use serde_json::{json, Value};

use crate::document::Document;
use crate::model::middleware::{post_stage, pre_stage};
use crate::model::{Model, QueryOutcome, Validated};
use crate::server::Registry;
use tokio::sync::mpsc::UnboundedReceiver;

use super::document::DocumentService;
use super::{NotificationRegistry, ResultKind, Service, ServiceDescriptor, ServiceError};

struct Shared {
    service_name: String,
    cache: Mutex<Vec<Arc<DocumentService>>>,
    registry: OnceLock<Weak<dyn Registry>>,
    notifications: Arc<NotificationRegistry>,
}

pub struct ModelService {
    model: Arc<Model>,
    service: Arc<Service>,
    shared: Arc<Shared>,
}

impl ModelService {
    /// Assemble the service for a model. The service name is
    /// `"model." + name`. Nothing is registered until `publish`.
    ///
    /// Building also appends observability middleware to the model: every
    /// mutation publishes `"pre.<name>"` / `"post.<name>"` notifications on
    /// this service, in addition to whatever middleware the model already
    /// had.
    pub fn build(name: &str, model: Arc<Model>) -> ModelService {
        let notifications = Arc::new(NotificationRegistry::new());
        let shared = Arc::new(Shared {
            service_name: format!("model.{}", name),
            cache: Mutex::new(Vec::new()),
            registry: OnceLock::new(),
            notifications: Arc::clone(&notifications),
        });

        let mut service =
            Service::with_notifications(shared.service_name.clone(), Arc::clone(&notifications));

        for query_name in model.query_names() {
            let method_name = if query_name == "default" {
                "get".to_string()
            } else {
                query_name.clone()
            };

            service = service.method(&method_name, ResultKind::ServiceDescriptor, {
                let model = Arc::clone(&model);
                let shared = Arc::clone(&shared);
                move |params: Vec<Value>| {
                    let model = Arc::clone(&model);
                    let shared = Arc::clone(&shared);
                    let query_name = query_name.clone();
                    async move {
                        let input = params.into_iter().next().unwrap_or(Value::Null);
                        match model.query(&query_name, input).await? {
                            QueryOutcome::None => Ok(json!({ "type": "null" })),
                            QueryOutcome::One(document) => {
                                resolve_document(&shared, &model, &document)
                            }
                            QueryOutcome::Many(documents) => {
                                let mut descriptors = Vec::with_capacity(documents.len());
                                for document in &documents {
                                    descriptors.push(resolve_document(&shared, &model, document)?);
                                }
                                Ok(Value::Array(descriptors))
                            }
                        }
                    }
                }
            });
        }

        service = service
            .method("describe", ResultKind::Value, {
                let model = Arc::clone(&model);
                move |_params| {
                    let model = Arc::clone(&model);
                    async move { Ok(serde_json::to_value(model.describe())?) }
                }
            })
            .method("create", ResultKind::ServiceDescriptor, {
                let model = Arc::clone(&model);
                let shared = Arc::clone(&shared);
                move |params: Vec<Value>| {
                    let model = Arc::clone(&model);
                    let shared = Arc::clone(&shared);
                    async move {
                        let input = params.into_iter().next().unwrap_or(Value::Null);
                        match model.create(input).await? {
                            Validated::Invalid(issues) => Err(ServiceError::Invalid(issues)),
                            Validated::Valid(document) => {
                                let descriptor = resolve_document(&shared, &model, &document)?;
                                shared.notifications.notify("create", document.data.clone());
                                Ok(descriptor)
                            }
                        }
                    }
                }
            });

        attach_observability(&model, &notifications);

        ModelService {
            model,
            service: Arc::new(service),
            shared,
        }
    }

    pub fn name(&self) -> &str {
        self.service.name()
    }

    pub fn descriptor(&self) -> ServiceDescriptor {
        self.service.descriptor()
    }

    pub fn service(&self) -> &Arc<Service> {
        &self.service
    }

    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    /// Observe this service's notifications (`"create"`, `"pre.<m>"`, ...).
    pub fn subscribe(&self, event: &str) -> UnboundedReceiver<Value> {
        self.service.subscribe(event)
    }

    /// Number of document services currently cached.
    pub fn cached_documents(&self) -> usize {
        self.shared.cache.lock().unwrap().len()
    }

    /// Register with the registry; document services resolved later publish
    /// on the same registry.
    pub fn publish<R>(&self, registry: &Arc<R>) -> Result<(), ServiceError>
    where
        R: Registry + 'static,
    {
        let registry = Arc::clone(registry) as Arc<dyn Registry>;
        self.shared
            .registry
            .set(Arc::downgrade(&registry))
            .map_err(|_| ServiceError::AlreadyPublished(self.name().to_string()))?;
        registry.add_service(Arc::clone(&self.service));
        Ok(())
    }
}

/// The single dedup point: reuse the cached service for content-identical
/// data, otherwise build a new one, publish it, and cache it. The cache is
/// probed before any registration side effect.
fn resolve_document(
    shared: &Shared,
    model: &Arc<Model>,
    document: &Document,
) -> Result<Value, ServiceError> {
    let mut cache = shared.cache.lock().unwrap();

    if let Some(existing) = cache.iter().find(|cached| cached.equals_document(document)) {
        return Ok(serde_json::to_value(existing.descriptor())?);
    }

    let registry = shared
        .registry
        .get()
        .and_then(Weak::upgrade)
        .ok_or_else(|| ServiceError::NotPublished(shared.service_name.clone()))?;

    let document_service = DocumentService::build(document.clone(), Arc::clone(model));
    document_service.publish_dyn(registry)?;
    let descriptor = serde_json::to_value(document_service.descriptor())?;
    cache.push(document_service);

    Ok(descriptor)
}

fn attach_observability(model: &Arc<Model>, notifications: &Arc<NotificationRegistry>) {
    let pre_notifications = Arc::clone(notifications);
    let post_notifications = Arc::clone(notifications);

    model.add_mutation_middleware(
        Some(pre_stage(move |document: Document, data: Value, name: String| {
            pre_notifications.notify(
                &format!("pre.{}", name),
                json!({ "document": document, "data": data }),
            );
            async move { data }
        })),
        Some(post_stage(
            move |document: Document, sources: Value, name: String| {
                post_notifications.notify(
                    &format!("post.{}", name),
                    json!({ "document": document, "sources": sources }),
                );
                async move { sources }
            },
        )),
    );
}

//! modelserv - expose data models as discoverable remote services.
//!
//! A [`Model`] (schema, queries, mutations, validation, middleware,
//! reactive bindings) produces documents. [`ModelService`] exposes the
//! model's surface as a callable service and turns every query/mutation
//! result into a content-addressed [`DocumentService`], deduplicated by
//! the digest of the document's data. Services register on a
//! [`DispatchServer`], which fans one logical registry across N transports
//! - the in-process [`LocalServer`] plus whatever remote registries the
//! embedding application plugs in - and races `need()` across all of them.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use modelserv::{descriptor_transform, DispatchServer, LocalServer, ModelService};
//!
//! let dispatch = Arc::new(DispatchServer::new());
//! let transform = descriptor_transform(&dispatch);
//! let local = Arc::new(LocalServer::with_transform("app", transform));
//! dispatch.add_server(local);
//!
//! let users = ModelService::build("user", Arc::new(user_model()));
//! users.publish(&dispatch)?;
//!
//! // Anywhere else in the process (or over a remote transport):
//! let found = dispatch.need(&["model.user"]).await?;
//! let document = found[0].call("get", vec![serde_json::json!(1)]).await?;
//! ```

pub mod document;
pub mod model;
pub mod server;
pub mod service;
pub mod validator;

pub use document::{content_id, Document};
pub use model::middleware::{post_stage, pre_stage, PostStage, PreStage};
pub use model::{
    BindingClass, DefaultValue, FieldDef, Model, ModelBuilder, ModelError, QueryOutcome,
    SourceResult, Validated,
};
pub use server::{DispatchServer, LifecycleEvent, LocalServer, Registry};
pub use service::{
    descriptor_transform, passthrough_transform, ClientService, DocumentService, ModelService,
    NotificationRegistry, RawResult, Resolved, ResultKind, Service, ServiceDescriptor,
    ServiceError, ServiceTransform,
};
pub use validator::{Schema, ShapeSchema, TypeName, TypeNode, ValidationIssue};

//! ModelBuilder - fluent assembly of a model definition.
//!
//! ## Example
//!
//! ```ignore
//! let model = ModelBuilder::new()
//!     .field("full", FieldDef::new(TypeName::String, |sources| {
//!         let user = sources.get("user")?;
//!         Some(json!(format!(
//!             "{} {}",
//!             user["first"].as_str()?,
//!             user["last"].as_str()?
//!         )))
//!     }))
//!     .set_selector(|_, sources| json!({ "id": sources["user"]["id"] }))
//!     .add_query("default", |input| async move { /* ... */ })
//!     .build();
//! ```

use std::future::Future;
use std::sync::Mutex;

use serde_json::Value;

use crate::document::Document;
use crate::validator::{self, Schema, TypeName, TypeNode};

use super::bindings::{BindingClass, BindingDef, BindingRegistry};
use super::middleware::{MiddlewareChain, PostStage, PreStage};
use super::{
    DestructorFn, ExtractorFn, Field, Initializer, InitializerFn, Model, ModelError, Mutation,
    QueryFn, SelectorFn, SourceResult,
};

/// Default value for a document field: a constant, or a provider invoked at
/// document-construction time.
pub enum DefaultValue {
    Value(Value),
    Provider(Box<dyn Fn() -> Value + Send + Sync>),
}

impl DefaultValue {
    pub(crate) fn value(&self) -> Value {
        match self {
            DefaultValue::Value(value) => value.clone(),
            DefaultValue::Provider(provider) => provider(),
        }
    }
}

/// One document field: its declared type, how to extract it from raw
/// sources, and an optional default.
pub struct FieldDef {
    pub(crate) kind: TypeName,
    pub(crate) extract: ExtractorFn,
    pub(crate) default: Option<DefaultValue>,
}

impl FieldDef {
    /// A field extracted from raw sources. Returning `None` drops the
    /// property from the document.
    pub fn new<F>(kind: TypeName, extract: F) -> FieldDef
    where
        F: Fn(&Value) -> Option<Value> + Send + Sync + 'static,
    {
        FieldDef {
            kind,
            extract: Box::new(extract),
            default: None,
        }
    }

    pub fn with_default(mut self, value: Value) -> FieldDef {
        self.default = Some(DefaultValue::Value(value));
        self
    }

    pub fn with_default_provider<F>(mut self, provider: F) -> FieldDef
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        self.default = Some(DefaultValue::Provider(Box::new(provider)));
        self
    }
}

enum InitializerSchema {
    None,
    /// Validate against the schema merged over the document fields
    /// (document fields become optional properties beneath it).
    Extend(Schema),
    /// Validate against the schema alone.
    Exact(Schema),
}

#[derive(Default)]
pub struct ModelBuilder {
    fields: Vec<(String, FieldDef)>,
    queries: Vec<(String, QueryFn)>,
    mutations: Vec<(String, Mutation)>,
    initializer: Option<(InitializerFn, InitializerSchema)>,
    destructor: Option<DestructorFn>,
    selector: Option<SelectorFn>,
    middleware: MiddlewareChain,
    bindings: Vec<(String, BindingDef)>,
}

impl ModelBuilder {
    pub fn new() -> ModelBuilder {
        ModelBuilder::default()
    }

    /// Declare a document field. Declaration order is preserved in the
    /// service method surface; the compiled schema is order-independent.
    pub fn field(mut self, name: &str, def: FieldDef) -> ModelBuilder {
        self.fields.push((name.to_string(), def));
        self
    }

    /// Register a named query. The query named `"default"` backs `get`.
    pub fn add_query<F, Fut>(mut self, name: &str, query: F) -> ModelBuilder
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<SourceResult, ModelError>> + Send + 'static,
    {
        self.queries
            .push((name.to_string(), Box::new(move |input| Box::pin(query(input)))));
        self
    }

    /// Register a named mutation with an optional input schema.
    pub fn add_mutation<F, Fut>(
        mut self,
        name: &str,
        mutation: F,
        schema: Option<Schema>,
    ) -> ModelBuilder
    where
        F: Fn(Document, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ModelError>> + Send + 'static,
    {
        self.mutations.push((
            name.to_string(),
            Mutation {
                run: Box::new(move |document, data| Box::pin(mutation(document, data))),
                schema: schema.as_ref().map(validator::parse),
            },
        ));
        self
    }

    /// Register the initializer used by `create`, without input validation.
    pub fn set_initializer<F, Fut>(mut self, initializer: F) -> ModelBuilder
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ModelError>> + Send + 'static,
    {
        self.initializer = Some((
            Box::new(move |input| Box::pin(initializer(input))),
            InitializerSchema::None,
        ));
        self
    }

    /// Register the initializer with a schema that extends the document
    /// fields: every declared field is accepted as an optional property
    /// beneath the given shape.
    pub fn set_initializer_with_schema<F, Fut>(
        mut self,
        initializer: F,
        schema: impl Into<Schema>,
    ) -> ModelBuilder
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ModelError>> + Send + 'static,
    {
        self.initializer = Some((
            Box::new(move |input| Box::pin(initializer(input))),
            InitializerSchema::Extend(schema.into()),
        ));
        self
    }

    /// Register the initializer with a schema validated as given, without
    /// extending it with the document fields.
    pub fn set_initializer_with_exact_schema<F, Fut>(
        mut self,
        initializer: F,
        schema: impl Into<Schema>,
    ) -> ModelBuilder
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ModelError>> + Send + 'static,
    {
        self.initializer = Some((
            Box::new(move |input| Box::pin(initializer(input))),
            InitializerSchema::Exact(schema.into()),
        ));
        self
    }

    /// Register the destructor used by `remove`.
    pub fn set_destructor<F, Fut>(mut self, destructor: F) -> ModelBuilder
    where
        F: Fn(Document) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ModelError>> + Send + 'static,
    {
        self.destructor = Some(Box::new(move |document| Box::pin(destructor(document))));
        self
    }

    /// Derive the document selector from `(transformed data, raw sources)`.
    pub fn set_selector<F>(mut self, selector: F) -> ModelBuilder
    where
        F: Fn(&Value, &Value) -> Value + Send + Sync + 'static,
    {
        self.selector = Some(Box::new(selector));
        self
    }

    /// Append mutation middleware stages. See [`super::middleware`] for
    /// stage constructors.
    pub fn add_mutation_middleware(
        mut self,
        pre: Option<PreStage>,
        post: Option<PostStage>,
    ) -> ModelBuilder {
        if let Some(stage) = pre {
            self.middleware.push_pre(stage);
        }
        if let Some(stage) = post {
            self.middleware.push_post(stage);
        }
        self
    }

    /// Declare a named binding for an event class.
    pub fn add_binding<F>(mut self, class: BindingClass, name: &str, predicate: F) -> ModelBuilder
    where
        F: Fn(&Document, &Value) -> bool + Send + Sync + 'static,
    {
        self.bindings.push((
            name.to_string(),
            BindingDef {
                class,
                predicate: std::sync::Arc::new(predicate),
            },
        ));
        self
    }

    pub fn build(self) -> Model {
        let schema = TypeNode::object(
            self.fields
                .iter()
                .map(|(name, def)| (name.clone(), def.kind, false)),
        );

        let initializer = self.initializer.map(|(run, init_schema)| Initializer {
            run,
            schema: match init_schema {
                InitializerSchema::None => None,
                InitializerSchema::Exact(description) => Some(validator::parse(&description)),
                InitializerSchema::Extend(description) => {
                    Some(extend_schema(&schema, &description))
                }
            },
        });

        Model {
            schema,
            fields: self
                .fields
                .into_iter()
                .map(|(name, def)| Field {
                    name,
                    extract: def.extract,
                    default: def.default,
                })
                .collect(),
            queries: self.queries,
            mutations: self.mutations,
            initializer,
            destructor: self.destructor,
            selector: self
                .selector
                .unwrap_or_else(|| Box::new(|_, _| Value::Object(serde_json::Map::new()))),
            middleware: Mutex::new(self.middleware),
            bindings: BindingRegistry::new(self.bindings),
        }
    }
}

/// Merge the document schema beneath a provided shape: provided properties
/// win, document fields fill in as optional.
fn extend_schema(document_schema: &TypeNode, description: &Schema) -> TypeNode {
    let mut provided = validator::parse(description);

    if let (Some(base), Some(overlay)) = (&document_schema.properties, provided.properties.take())
    {
        let mut merged = base.clone();
        merged.extend(overlay);
        provided.properties = Some(merged);
        provided
    } else {
        // A scalar description has nothing to extend.
        validator::parse(description)
    }
}

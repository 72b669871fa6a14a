//! Models - data definitions that produce documents.
//!
//! A [`Model`] owns a document schema, queries, mutations, an optional
//! initializer/destructor pair, mutation middleware, and reactive creation
//! bindings. It is assembled once through [`ModelBuilder`] and then shared
//! (`Arc<Model>`) with the services that expose it.
//!
//! Validation failure is a value, not an error: `apply_mutation` and
//! `create` return [`Validated`], and only lookup failures and
//! query/mutation/destructor faults surface as [`ModelError`].

mod bindings;
mod builder;
pub mod middleware;

pub use bindings::{BindingClass, BindingPredicate};
pub use builder::{DefaultValue, FieldDef, ModelBuilder};

use std::error::Error;
use std::fmt;
use std::sync::Mutex;

use futures::future::BoxFuture;
use serde_json::{Map, Value};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::document::Document;
use crate::validator::{self, TypeNode, ValidationIssue};

use bindings::BindingRegistry;
use middleware::{MiddlewareChain, PostStage, PreStage};

/// Raw result of a query function: the source records documents are built
/// from.
#[derive(Debug, Clone)]
pub enum SourceResult {
    /// The query matched nothing.
    None,
    /// Sources for a single document.
    One(Value),
    /// Sources for one document each.
    Many(Vec<Value>),
}

/// Result of `get`/`query`: zero, one, or many constructed documents.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    None,
    One(Document),
    Many(Vec<Document>),
}

/// Outcome of an operation whose input is checked against a schema.
#[derive(Debug)]
pub enum Validated<T> {
    Valid(T),
    Invalid(Vec<ValidationIssue>),
}

impl<T> Validated<T> {
    pub fn is_valid(&self) -> bool {
        matches!(self, Validated::Valid(_))
    }

    pub fn valid(self) -> Option<T> {
        match self {
            Validated::Valid(value) => Some(value),
            Validated::Invalid(_) => None,
        }
    }

    pub fn invalid(self) -> Option<Vec<ValidationIssue>> {
        match self {
            Validated::Valid(_) => None,
            Validated::Invalid(issues) => Some(issues),
        }
    }
}

/// Error type for model operations.
#[derive(Debug)]
pub enum ModelError {
    /// No query registered under this name.
    UnknownQuery(String),
    /// No mutation registered under this name.
    UnknownMutation(String),
    /// No binding declared under this name.
    UnknownBinding(String),
    /// `create` was called on a model without an initializer.
    MissingInitializer,
    /// `remove` was called on a model without a destructor.
    MissingDestructor,
    /// A query/mutation/initializer/destructor function faulted.
    Source(Box<dyn Error + Send + Sync>),
}

impl ModelError {
    /// Wrap a source-side fault.
    pub fn source(err: impl Into<Box<dyn Error + Send + Sync>>) -> ModelError {
        ModelError::Source(err.into())
    }
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::UnknownQuery(name) => write!(f, "unknown query: {}", name),
            ModelError::UnknownMutation(name) => write!(f, "unknown mutation: {}", name),
            ModelError::UnknownBinding(name) => write!(f, "unknown binding: {}", name),
            ModelError::MissingInitializer => write!(f, "no initializer defined"),
            ModelError::MissingDestructor => write!(f, "no destructor defined"),
            ModelError::Source(err) => write!(f, "source error: {}", err),
        }
    }
}

impl Error for ModelError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ModelError::Source(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

pub(crate) type QueryFn =
    Box<dyn Fn(Value) -> BoxFuture<'static, Result<SourceResult, ModelError>> + Send + Sync>;
pub(crate) type MutationFn =
    Box<dyn Fn(Document, Value) -> BoxFuture<'static, Result<Value, ModelError>> + Send + Sync>;
pub(crate) type InitializerFn =
    Box<dyn Fn(Value) -> BoxFuture<'static, Result<Value, ModelError>> + Send + Sync>;
pub(crate) type DestructorFn =
    Box<dyn Fn(Document) -> BoxFuture<'static, Result<(), ModelError>> + Send + Sync>;
pub(crate) type SelectorFn = Box<dyn Fn(&Value, &Value) -> Value + Send + Sync>;
pub(crate) type ExtractorFn = Box<dyn Fn(&Value) -> Option<Value> + Send + Sync>;

pub(crate) struct Mutation {
    pub run: MutationFn,
    pub schema: Option<TypeNode>,
}

pub(crate) struct Initializer {
    pub run: InitializerFn,
    pub schema: Option<TypeNode>,
}

pub(crate) struct Field {
    pub name: String,
    pub extract: ExtractorFn,
    pub default: Option<DefaultValue>,
}

/// A data model: schema, queries, mutations, middleware, bindings.
pub struct Model {
    pub(crate) schema: TypeNode,
    pub(crate) fields: Vec<Field>,
    pub(crate) queries: Vec<(String, QueryFn)>,
    pub(crate) mutations: Vec<(String, Mutation)>,
    pub(crate) initializer: Option<Initializer>,
    pub(crate) destructor: Option<DestructorFn>,
    pub(crate) selector: SelectorFn,
    pub(crate) middleware: Mutex<MiddlewareChain>,
    pub(crate) bindings: BindingRegistry,
}

impl Model {
    pub fn builder() -> ModelBuilder {
        ModelBuilder::new()
    }

    /// Execute the default query.
    pub async fn get(&self, input: Value) -> Result<QueryOutcome, ModelError> {
        self.query("default", input).await
    }

    /// Execute a named query and construct documents from its sources.
    pub async fn query(&self, name: &str, input: Value) -> Result<QueryOutcome, ModelError> {
        let query = self
            .queries
            .iter()
            .find(|(query_name, _)| query_name == name)
            .map(|(_, query)| query)
            .ok_or_else(|| ModelError::UnknownQuery(name.to_string()))?;

        match query(input).await? {
            SourceResult::None => Ok(QueryOutcome::None),
            SourceResult::One(sources) => Ok(QueryOutcome::One(self.build_document(&sources, true))),
            SourceResult::Many(items) => Ok(QueryOutcome::Many(
                items
                    .iter()
                    .map(|sources| self.build_document(sources, true))
                    .collect(),
            )),
        }
    }

    /// Apply a named mutation against a document.
    ///
    /// Pre-middleware runs over the incoming data before validation; the
    /// mutation function only runs when validation passes, so an invalid
    /// input never touches a source.
    pub async fn apply_mutation(
        &self,
        name: &str,
        document: &Document,
        data: Value,
    ) -> Result<Validated<Document>, ModelError> {
        let mutation = self
            .mutations
            .iter()
            .find(|(mutation_name, _)| mutation_name == name)
            .map(|(_, mutation)| mutation)
            .ok_or_else(|| ModelError::UnknownMutation(name.to_string()))?;

        let pre_stages = self.middleware.lock().unwrap().pre_stages();
        let mut data = data;
        for stage in pre_stages {
            data = stage(document.clone(), data, name.to_string()).await;
        }

        if let Some(schema) = &mutation.schema {
            let issues = validator::validate(schema, &data);
            if !issues.is_empty() {
                return Ok(Validated::Invalid(issues));
            }
        }

        let mut sources = (mutation.run)(document.clone(), data).await?;

        let post_stages = self.middleware.lock().unwrap().post_stages();
        for stage in post_stages {
            sources = stage(document.clone(), sources, name.to_string()).await;
        }

        Ok(Validated::Valid(self.build_document(&sources, true)))
    }

    /// Create a new document through the initializer.
    ///
    /// Defaults are merged beneath the input (input wins) *before* the
    /// initializer runs, and not applied again when the document is built -
    /// re-applying them would let stale defaults overwrite fresh data.
    pub async fn create(&self, input: Value) -> Result<Validated<Document>, ModelError> {
        let initializer = self
            .initializer
            .as_ref()
            .ok_or(ModelError::MissingInitializer)?;

        if let Some(schema) = &initializer.schema {
            let issues = validator::validate(schema, &input);
            if !issues.is_empty() {
                return Ok(Validated::Invalid(issues));
            }
        }

        let merged = self.merge_defaults(input);
        let sources = (initializer.run)(merged).await?;
        let document = self.build_document(&sources, false);

        self.bindings.fire_create(&document);

        Ok(Validated::Valid(document))
    }

    /// Remove a document through the destructor.
    pub async fn remove(&self, document: &Document) -> Result<(), ModelError> {
        let destructor = self
            .destructor
            .as_ref()
            .ok_or(ModelError::MissingDestructor)?;

        destructor(document.clone()).await
    }

    /// Open a channel on a declared binding. The returned receiver observes
    /// every future creation whose predicate matches the given input.
    pub fn bind(&self, name: &str, input: Value) -> Result<UnboundedReceiver<Document>, ModelError> {
        self.bindings.subscribe(name, input)
    }

    /// Append mutation middleware stages. Previously installed stages keep
    /// running before the new ones.
    pub fn add_mutation_middleware(&self, pre: Option<PreStage>, post: Option<PostStage>) {
        let mut chain = self.middleware.lock().unwrap();
        if let Some(stage) = pre {
            chain.push_pre(stage);
        }
        if let Some(stage) = post {
            chain.push_post(stage);
        }
    }

    /// The compiled document schema.
    pub fn describe(&self) -> &TypeNode {
        &self.schema
    }

    /// Declared query names, in registration order.
    pub fn query_names(&self) -> Vec<String> {
        self.queries.iter().map(|(name, _)| name.clone()).collect()
    }

    /// Declared mutation names, in registration order.
    pub fn mutation_names(&self) -> Vec<String> {
        self.mutations.iter().map(|(name, _)| name.clone()).collect()
    }

    /// Build a document from raw sources: run every field extractor, drop
    /// fields that yield nothing, then (outside of creation) overlay
    /// defaults beneath the extracted values.
    fn build_document(&self, sources: &Value, apply_defaults: bool) -> Document {
        let mut data = Map::new();
        for field in &self.fields {
            if let Some(value) = (field.extract)(sources) {
                data.insert(field.name.clone(), value);
            }
        }

        if apply_defaults {
            for field in &self.fields {
                if let Some(default) = &field.default {
                    if !data.contains_key(&field.name) {
                        data.insert(field.name.clone(), default.value());
                    }
                }
            }
        }

        let data = Value::Object(data);
        let selector = (self.selector)(&data, sources);
        Document { selector, data }
    }

    /// Computed defaults merged beneath an object input; the input wins on
    /// conflict. Non-object inputs pass through unchanged.
    fn merge_defaults(&self, input: Value) -> Value {
        match input {
            Value::Object(input_map) => {
                let mut merged = Map::new();
                for field in &self.fields {
                    if let Some(default) = &field.default {
                        merged.insert(field.name.clone(), default.value());
                    }
                }
                merged.extend(input_map);
                Value::Object(merged)
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::middleware::{post_stage, pre_stage};
    use super::*;
    use crate::validator::{Schema, ShapeSchema, TypeName};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn extract_full(sources: &Value) -> Option<Value> {
        let user = sources.get("user")?;
        Some(json!(format!(
            "{} {}",
            user.get("first")?.as_str()?,
            user.get("last")?.as_str()?
        )))
    }

    fn john_model() -> ModelBuilder {
        ModelBuilder::new()
            .field("full", FieldDef::new(TypeName::String, extract_full))
            .set_selector(|_, sources| json!({ "id": sources["user"]["id"] }))
            .add_query("default", |_input| async {
                Ok(SourceResult::One(
                    json!({ "user": { "id": 1, "first": "John", "last": "Smith" } }),
                ))
            })
    }

    #[tokio::test]
    async fn get_runs_default_query_through_the_transform() {
        let model = john_model().build();

        let outcome = model.get(json!(1)).await.unwrap();
        assert_eq!(
            outcome,
            QueryOutcome::One(Document {
                selector: json!({ "id": 1 }),
                data: json!({ "full": "John Smith" }),
            })
        );
    }

    #[tokio::test]
    async fn query_applies_defaults_beneath_transformed_data() {
        let model = john_model()
            .field(
                "nickname",
                FieldDef::new(TypeName::String, |sources| {
                    sources.get("user")?.get("nickname").cloned()
                })
                .with_default(json!("Sir pickles")),
            )
            .build();

        let outcome = model.get(json!(1)).await.unwrap();
        let QueryOutcome::One(document) = outcome else {
            panic!("expected one document");
        };
        assert_eq!(
            document.data,
            json!({ "full": "John Smith", "nickname": "Sir pickles" })
        );
    }

    #[tokio::test]
    async fn query_propagates_a_query_fault() {
        let model = ModelBuilder::new()
            .add_query("failing", |_input| async {
                Err(ModelError::source("store unavailable"))
            })
            .build();

        let err = model.query("failing", Value::Null).await.unwrap_err();
        assert!(matches!(err, ModelError::Source(_)));
    }

    #[tokio::test]
    async fn query_builds_one_document_per_source_item() {
        let model = ModelBuilder::new()
            .field("full", FieldDef::new(TypeName::String, extract_full))
            .set_selector(|_, sources| json!({ "id": sources["user"]["id"] }))
            .add_query("all", |_input| async {
                Ok(SourceResult::Many(vec![
                    json!({ "user": { "id": 1, "first": "John", "last": "Smith" } }),
                    json!({ "user": { "id": 2, "first": "Jane", "last": "Doe" } }),
                ]))
            })
            .build();

        let outcome = model.query("all", Value::Null).await.unwrap();
        let QueryOutcome::Many(documents) = outcome else {
            panic!("expected many documents");
        };
        assert_eq!(documents.len(), 2);
        assert_eq!(documents[1].data, json!({ "full": "Jane Doe" }));
    }

    #[tokio::test]
    async fn unknown_query_fails() {
        let model = john_model().build();
        let err = model.query("missing", Value::Null).await.unwrap_err();
        assert!(matches!(err, ModelError::UnknownQuery(ref name) if name == "missing"));
    }

    #[tokio::test]
    async fn apply_mutation_builds_the_new_document() {
        let model = john_model()
            .add_mutation(
                "update_last_name",
                |_document, data| async move {
                    Ok(json!({ "user": { "id": 1, "first": "John", "last": data } }))
                },
                None,
            )
            .build();

        let QueryOutcome::One(document) = model.get(json!(1)).await.unwrap() else {
            panic!("expected one document");
        };
        let updated = model
            .apply_mutation("update_last_name", &document, json!("Simpson"))
            .await
            .unwrap()
            .valid()
            .unwrap();

        assert_eq!(updated.data, json!({ "full": "John Simpson" }));
    }

    #[tokio::test]
    async fn invalid_mutation_input_never_touches_the_source() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);

        let model = john_model()
            .add_mutation(
                "update_last_name",
                move |_document, data| {
                    counted.fetch_add(1, Ordering::SeqCst);
                    async move { Ok(json!({ "user": { "id": 1, "first": "John", "last": data } })) }
                },
                Some(Schema::scalar(TypeName::String)),
            )
            .build();

        let QueryOutcome::One(document) = model.get(json!(1)).await.unwrap() else {
            panic!("expected one document");
        };
        let issues = model
            .apply_mutation("update_last_name", &document, json!(120))
            .await
            .unwrap()
            .invalid()
            .unwrap();

        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].property, "@");
        assert_eq!(issues[0].reason, "type");
        assert_eq!(issues[0].message, "must be string, but is number");
        assert_eq!(issues[0].code, None);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn middleware_stages_run_in_registration_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));

        let record = |label: &'static str, log: &Arc<Mutex<Vec<String>>>| {
            let log = Arc::clone(log);
            move |_document: Document, data: Value, name: String| {
                log.lock().unwrap().push(format!("{}:{}", label, name));
                async move { data }
            }
        };

        let model = john_model()
            .add_mutation(
                "touch",
                |_document, _data| async {
                    Ok(json!({ "user": { "id": 1, "first": "John", "last": "Smith" } }))
                },
                None,
            )
            .add_mutation_middleware(
                Some(pre_stage(record("pre1", &seen))),
                Some(post_stage(record("post1", &seen))),
            )
            .build();

        model.add_mutation_middleware(Some(pre_stage(record("pre2", &seen))), None);

        let QueryOutcome::One(document) = model.get(json!(1)).await.unwrap() else {
            panic!("expected one document");
        };
        model
            .apply_mutation("touch", &document, json!("x"))
            .await
            .unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["pre1:touch", "pre2:touch", "post1:touch"]
        );
    }

    #[tokio::test]
    async fn pre_middleware_replaces_the_mutation_data() {
        let model = john_model()
            .add_mutation(
                "update_last_name",
                |_document, data| async move {
                    Ok(json!({ "user": { "id": 1, "first": "John", "last": data } }))
                },
                None,
            )
            .add_mutation_middleware(
                Some(pre_stage(|_document, data, _name| async move {
                    json!(format!("{}son", data.as_str().unwrap_or_default()))
                })),
                None,
            )
            .build();

        let QueryOutcome::One(document) = model.get(json!(1)).await.unwrap() else {
            panic!("expected one document");
        };
        let updated = model
            .apply_mutation("update_last_name", &document, json!("Simp"))
            .await
            .unwrap()
            .valid()
            .unwrap();

        assert_eq!(updated.data, json!({ "full": "John Simpson" }));
    }

    #[tokio::test]
    async fn create_runs_the_initializer_and_skips_default_reapplication() {
        let model = ModelBuilder::new()
            .field("full", FieldDef::new(TypeName::String, extract_full))
            .field(
                "greeting",
                FieldDef::new(TypeName::String, |sources| {
                    sources.get("user")?.get("greeting").cloned()
                })
                .with_default(json!("hello")),
            )
            .set_selector(|_, sources| json!({ "id": sources["user"]["id"] }))
            .set_initializer(|input| async move {
                // Stores everything except the greeting.
                let mut user = input;
                if let Some(map) = user.as_object_mut() {
                    map.remove("greeting");
                }
                Ok(json!({ "user": user }))
            })
            .build();

        let document = model
            .create(json!({ "id": 2, "first": "Jane", "last": "Doe" }))
            .await
            .unwrap()
            .valid()
            .unwrap();

        assert_eq!(document.selector, json!({ "id": 2 }));
        // The default was merged into the initializer input, dropped by the
        // initializer, and must not come back during construction.
        assert_eq!(document.data, json!({ "full": "Jane Doe" }));
    }

    #[tokio::test]
    async fn create_merges_defaults_beneath_the_input() {
        let observed = Arc::new(Mutex::new(Value::Null));
        let sink = Arc::clone(&observed);

        let model = ModelBuilder::new()
            .field("full", FieldDef::new(TypeName::String, extract_full))
            .field(
                "nickname",
                FieldDef::new(TypeName::String, |sources| {
                    sources.get("user")?.get("nickname").cloned()
                })
                .with_default(json!("Sir pickles")),
            )
            .set_selector(|_, sources| json!({ "id": sources["user"]["id"] }))
            .set_initializer(move |input| {
                *sink.lock().unwrap() = input.clone();
                async move { Ok(json!({ "user": input })) }
            })
            .build();

        let document = model
            .create(json!({ "id": 2, "first": "Jane", "last": "Doe" }))
            .await
            .unwrap()
            .valid()
            .unwrap();

        assert_eq!(
            observed.lock().unwrap()["nickname"],
            json!("Sir pickles"),
            "default merged into the initializer input"
        );
        assert_eq!(document.data["nickname"], json!("Sir pickles"));

        let named = model
            .create(json!({ "id": 3, "first": "Zed", "last": "Doe", "nickname": "Z" }))
            .await
            .unwrap()
            .valid()
            .unwrap();
        assert_eq!(named.data["nickname"], json!("Z"), "input wins over default");
    }

    #[tokio::test]
    async fn create_reports_schema_issues_without_running_the_initializer() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);

        let model = ModelBuilder::new()
            .field("full", FieldDef::new(TypeName::String, extract_full))
            .set_selector(|_, sources| json!({ "id": sources["user"]["id"] }))
            .set_initializer_with_schema(
                move |input| {
                    counted.fetch_add(1, Ordering::SeqCst);
                    async move { Ok(json!({ "user": input })) }
                },
                ShapeSchema::new()
                    .required("first", TypeName::String)
                    .required("last", TypeName::String),
            )
            .build();

        let issues = model
            .create(json!({ "id": 2, "first": "Jane" }))
            .await
            .unwrap()
            .invalid()
            .unwrap();

        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].property, "@.last");
        assert_eq!(issues[0].reason, "optional");
        assert_eq!(issues[0].message, "is missing and not optional");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn create_without_initializer_fails() {
        let model = ModelBuilder::new().build();
        let err = model.create(json!({})).await.unwrap_err();
        assert!(matches!(err, ModelError::MissingInitializer));
    }

    #[tokio::test]
    async fn bindings_fire_only_for_matching_predicates() {
        let model = ModelBuilder::new()
            .field("full", FieldDef::new(TypeName::String, extract_full))
            .set_selector(|_, sources| json!({ "id": sources["user"]["id"] }))
            .set_initializer(|input| async move { Ok(json!({ "user": input })) })
            .add_binding(BindingClass::Create, "matching_name", |document, input| {
                let (Some(full), Some(needle)) =
                    (document.data["full"].as_str(), input.as_str())
                else {
                    return false;
                };
                full.contains(needle)
            })
            .build();

        let mut receiver = model.bind("matching_name", json!("Jane")).unwrap();

        let document = model
            .create(json!({ "id": 2, "first": "Jane", "last": "Doe" }))
            .await
            .unwrap()
            .valid()
            .unwrap();
        assert_eq!(receiver.try_recv().unwrap(), document);

        model
            .create(json!({ "id": 3, "first": "John", "last": "Smith" }))
            .await
            .unwrap();
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn bind_fails_for_an_undeclared_binding() {
        let model = ModelBuilder::new().build();
        let err = model.bind("missing", Value::Null).unwrap_err();
        assert!(matches!(err, ModelError::UnknownBinding(ref name) if name == "missing"));
    }

    #[tokio::test]
    async fn remove_invokes_the_destructor() {
        let removed = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&removed);

        let model = ModelBuilder::new()
            .set_destructor(move |document| {
                sink.lock().unwrap().push(document.selector.clone());
                async { Ok(()) }
            })
            .build();

        let document = Document::new(json!({ "id": 1 }), json!({ "full": "John Doe" }));
        model.remove(&document).await.unwrap();

        assert_eq!(*removed.lock().unwrap(), vec![json!({ "id": 1 })]);
    }

    #[tokio::test]
    async fn remove_without_destructor_fails() {
        let model = ModelBuilder::new().build();
        let document = Document::new(json!({}), json!({}));
        let err = model.remove(&document).await.unwrap_err();
        assert!(matches!(err, ModelError::MissingDestructor));
    }

    #[test]
    fn describe_returns_the_order_independent_schema() {
        let first = ModelBuilder::new()
            .field("full", FieldDef::new(TypeName::String, |_| None))
            .field("age", FieldDef::new(TypeName::Number, |_| None))
            .build();
        let second = ModelBuilder::new()
            .field("age", FieldDef::new(TypeName::Number, |_| None))
            .field("full", FieldDef::new(TypeName::String, |_| None))
            .build();

        assert_eq!(first.describe(), second.describe());
        assert_eq!(
            serde_json::to_value(first.describe()).unwrap(),
            serde_json::json!({
                "type": "object",
                "optional": false,
                "properties": {
                    "age": { "type": "number", "optional": true },
                    "full": { "type": "string", "optional": true },
                }
            })
        );
    }
}

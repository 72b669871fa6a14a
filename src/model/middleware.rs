//! Mutation middleware - explicit ordered stage lists.
//!
//! A model carries two stage lists, pre and post. `apply_mutation` runs the
//! pre stages in registration order over the incoming data before
//! validation, and the post stages over the raw sources a mutation
//! produced. Composition is list-append: installing more middleware never
//! discards what was there before.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;

use crate::document::Document;

/// A pre-mutation stage: receives the current document, the incoming
/// mutation data, and the mutation name; returns the (possibly replaced)
/// data.
pub type PreStage = Arc<dyn Fn(Document, Value, String) -> BoxFuture<'static, Value> + Send + Sync>;

/// A post-mutation stage: receives the document the mutation ran against,
/// the raw sources it produced, and the mutation name; returns the sources.
pub type PostStage = Arc<dyn Fn(Document, Value, String) -> BoxFuture<'static, Value> + Send + Sync>;

/// Box an async closure as a pre-mutation stage.
pub fn pre_stage<F, Fut>(stage: F) -> PreStage
where
    F: Fn(Document, Value, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Value> + Send + 'static,
{
    Arc::new(move |document, data, name| Box::pin(stage(document, data, name)))
}

/// Box an async closure as a post-mutation stage.
pub fn post_stage<F, Fut>(stage: F) -> PostStage
where
    F: Fn(Document, Value, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Value> + Send + 'static,
{
    Arc::new(move |document, sources, name| Box::pin(stage(document, sources, name)))
}

#[derive(Default)]
pub(crate) struct MiddlewareChain {
    pre: Vec<PreStage>,
    post: Vec<PostStage>,
}

impl MiddlewareChain {
    pub fn push_pre(&mut self, stage: PreStage) {
        self.pre.push(stage);
    }

    pub fn push_post(&mut self, stage: PostStage) {
        self.post.push(stage);
    }

    pub fn pre_stages(&self) -> Vec<PreStage> {
        self.pre.clone()
    }

    pub fn post_stages(&self) -> Vec<PostStage> {
        self.post.clone()
    }
}

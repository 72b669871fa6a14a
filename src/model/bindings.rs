//! Reactive creation bindings - an explicit subscription registry.
//!
//! A model definition declares named bindings: a predicate over
//! `(document, bound input)` registered against an event class. `bind`
//! opens a private channel for one subscription; `create` fires matching
//! subscriptions by synchronous iteration, in the order they were
//! registered.

use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::document::Document;

use super::ModelError;

/// Event class a binding definition is registered against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingClass {
    /// Fires when `create` produces a document.
    Create,
}

/// Predicate evaluated against `(document, bound input)`.
pub type BindingPredicate = Arc<dyn Fn(&Document, &Value) -> bool + Send + Sync>;

pub(crate) struct BindingDef {
    pub class: BindingClass,
    pub predicate: BindingPredicate,
}

struct Subscription {
    class: BindingClass,
    predicate: BindingPredicate,
    input: Value,
    sender: UnboundedSender<Document>,
}

pub(crate) struct BindingRegistry {
    definitions: Vec<(String, BindingDef)>,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl BindingRegistry {
    pub fn new(definitions: Vec<(String, BindingDef)>) -> BindingRegistry {
        BindingRegistry {
            definitions,
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    /// Open a channel for the named binding with the given input.
    pub fn subscribe(
        &self,
        name: &str,
        input: Value,
    ) -> Result<UnboundedReceiver<Document>, ModelError> {
        let def = self
            .definitions
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, def)| def)
            .ok_or_else(|| ModelError::UnknownBinding(name.to_string()))?;

        let (sender, receiver) = mpsc::unbounded_channel();
        self.subscriptions.lock().unwrap().push(Subscription {
            class: def.class,
            predicate: Arc::clone(&def.predicate),
            input,
            sender,
        });

        Ok(receiver)
    }

    /// Deliver a freshly created document to every `Create`-class
    /// subscription whose predicate matches, in registration order.
    pub fn fire_create(&self, document: &Document) {
        let subscriptions = self.subscriptions.lock().unwrap();
        for subscription in subscriptions.iter() {
            if subscription.class == BindingClass::Create
                && (subscription.predicate)(document, &subscription.input)
            {
                // A closed receiver just misses the event.
                let _ = subscription.sender.send(document.clone());
            }
        }
    }
}

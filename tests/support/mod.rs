//! Shared fixture: a user model over an in-memory store.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use modelserv::{
    BindingClass, FieldDef, Model, ModelBuilder, ModelError, ShapeSchema, SourceResult, TypeName,
};
use serde_json::{json, Value};

/// In-memory user records, keyed by `id`.
#[derive(Default)]
pub struct UserStore {
    users: Mutex<Vec<Value>>,
}

impl UserStore {
    pub fn with_users(users: Vec<Value>) -> Arc<UserStore> {
        Arc::new(UserStore {
            users: Mutex::new(users),
        })
    }

    pub fn get(&self, id: i64) -> Option<Value> {
        self.users
            .lock()
            .unwrap()
            .iter()
            .find(|user| user["id"] == json!(id))
            .cloned()
    }

    pub fn all(&self) -> Vec<Value> {
        self.users.lock().unwrap().clone()
    }

    pub fn insert(&self, user: Value) {
        self.users.lock().unwrap().push(user);
    }

    pub fn update_last(&self, id: i64, last: &str) -> Option<Value> {
        let mut users = self.users.lock().unwrap();
        let user = users.iter_mut().find(|user| user["id"] == json!(id))?;
        user["last"] = json!(last);
        Some(user.clone())
    }

    pub fn remove(&self, id: i64) {
        self.users
            .lock()
            .unwrap()
            .retain(|user| user["id"] != json!(id));
    }

    pub fn len(&self) -> usize {
        self.users.lock().unwrap().len()
    }
}

pub fn seed() -> Vec<Value> {
    vec![
        json!({ "id": 1, "first": "John", "last": "Smith" }),
        json!({ "id": 2, "first": "Jane", "last": "Doe" }),
    ]
}

pub fn user_model(store: &Arc<UserStore>) -> Model {
    let by_id = Arc::clone(store);
    let every = Arc::clone(store);
    let update = Arc::clone(store);
    let init = Arc::clone(store);
    let destroy = Arc::clone(store);

    ModelBuilder::new()
        .field(
            "id",
            FieldDef::new(TypeName::Number, |sources| {
                sources.get("user")?.get("id").cloned()
            }),
        )
        .field(
            "full",
            FieldDef::new(TypeName::String, |sources| {
                let user = sources.get("user")?;
                Some(json!(format!(
                    "{} {}",
                    user.get("first")?.as_str()?,
                    user.get("last")?.as_str()?
                )))
            }),
        )
        .field(
            "nickname",
            FieldDef::new(TypeName::String, |sources| {
                sources.get("user")?.get("nickname").cloned()
            })
            .with_default(json!("Sir pickles")),
        )
        .set_selector(|_, sources| json!({ "id": sources["user"]["id"] }))
        .add_query("default", move |input| {
            let store = Arc::clone(&by_id);
            async move {
                let Some(id) = input.as_i64() else {
                    return Ok(SourceResult::None);
                };
                Ok(match store.get(id) {
                    Some(user) => SourceResult::One(json!({ "user": user })),
                    None => SourceResult::None,
                })
            }
        })
        .add_query("all", move |_input| {
            let store = Arc::clone(&every);
            async move {
                Ok(SourceResult::Many(
                    store
                        .all()
                        .into_iter()
                        .map(|user| json!({ "user": user }))
                        .collect(),
                ))
            }
        })
        .add_mutation(
            "update_last_name",
            move |document, data| {
                let store = Arc::clone(&update);
                async move {
                    let id = document.selector["id"].as_i64().unwrap_or_default();
                    let last = data.as_str().unwrap_or_default().to_string();
                    let user = store
                        .update_last(id, &last)
                        .ok_or_else(|| ModelError::source("user not found"))?;
                    Ok(json!({ "user": user }))
                }
            },
            Some(TypeName::String.into()),
        )
        .set_initializer_with_schema(
            move |input| {
                let store = Arc::clone(&init);
                async move {
                    store.insert(input.clone());
                    Ok(json!({ "user": input }))
                }
            },
            ShapeSchema::new()
                .required("first", TypeName::String)
                .required("last", TypeName::String),
        )
        .set_destructor(move |document| {
            let store = Arc::clone(&destroy);
            async move {
                let id = document.selector["id"].as_i64().unwrap_or_default();
                store.remove(id);
                Ok(())
            }
        })
        .add_binding(BindingClass::Create, "matching_name", |document, input| {
            matches!(
                (document.data["full"].as_str(), input.as_str()),
                (Some(full), Some(needle)) if full.contains(needle)
            )
        })
        .build()
}

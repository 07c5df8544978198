//! The entities resolved through loaders, and an in-memory store that can
//! serve as their fetcher.

use std::{
    collections::HashMap,
    fmt::Debug,
    iter::FromIterator,
    sync::{PoisonError, RwLock},
};

use futures::future::{self, BoxFuture, FutureExt};
use tracing::trace;

use crate::{error::FetchError, fetcher::Fetcher};

/// Something that can be looked up by a string id.
pub trait Entity: Clone + Debug + Send + Sync + 'static {
    /// The name used in error messages and logs, such as "user".
    const KIND: &'static str;

    fn id(&self) -> &str;
}

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub phone: String,
}

impl Entity for User {
    const KIND: &'static str = "user";

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub description: String,
    pub price: f64,
    pub stock: i32,
    pub category: String,
}

impl Entity for Product {
    const KIND: &'static str = "product";

    fn id(&self) -> &str {
        &self.id
    }
}

/// A lock-guarded map of entities keyed by id.
///
/// Lookups through [`Fetcher`] resolve immediately, answering
/// [`FetchError::NotFound`] for unknown ids.
#[derive(Debug)]
pub struct MemoryStore<T> {
    entities: RwLock<HashMap<String, T>>,
}

impl<T> Default for MemoryStore<T> {
    fn default() -> Self {
        Self {
            entities: RwLock::new(HashMap::new()),
        }
    }
}

impl<T: Entity> MemoryStore<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an entity, returning the one it replaced.
    pub fn insert(&self, entity: T) -> Option<T> {
        self.entities
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entity.id().to_owned(), entity)
    }

    pub fn remove(&self, id: &str) -> Option<T> {
        self.entities
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }

    pub fn get(&self, id: &str) -> Result<T, FetchError> {
        self.entities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| FetchError::not_found(T::KIND, id))
    }

    pub fn len(&self) -> usize {
        self.entities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Entity> FromIterator<T> for MemoryStore<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let store = Self::new();
        iter.into_iter().for_each(|entity| {
            store.insert(entity);
        });
        store
    }
}

impl<T: Entity> Fetcher<String> for MemoryStore<T> {
    type Value = T;
    type Error = FetchError;
    type Future = BoxFuture<'static, Result<T, FetchError>>;

    fn get_by_id(&self, key: &String) -> Self::Future {
        trace!(kind = T::KIND, id = %key, "memory store lookup");
        future::ready(self.get(key)).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor;

    fn alice() -> User {
        User {
            id: "u1".into(),
            name: "Alice".into(),
            email: "alice@example.com".into(),
            phone: "555-0100".into(),
        }
    }

    #[test]
    fn lookups_find_inserted_entities() {
        let store: MemoryStore<User> = vec![alice()].into_iter().collect();

        let user = executor::block_on(store.get_by_id(&"u1".to_string())).unwrap();
        assert_eq!(user, alice());
    }

    #[test]
    fn missing_ids_are_not_found() {
        let store = MemoryStore::<Product>::new();

        let err = executor::block_on(store.get_by_id(&"p9".to_string())).unwrap_err();
        assert_eq!(err, FetchError::not_found("product", "p9"));
        assert!(err.is_not_found());
    }

    #[test]
    fn removal_makes_an_entity_disappear() {
        let store = MemoryStore::new();
        store.insert(alice());
        assert_eq!(store.len(), 1);

        assert_eq!(store.remove("u1"), Some(alice()));
        assert!(store.is_empty());
        assert!(store.get("u1").is_err());
    }
}

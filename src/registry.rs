//! Per-request loader sets, and the request context resolvers reach them
//! through.
//!
//! Fetchers are shared by the whole process; loaders are not. A
//! [`LoaderRegistry`] is built once with the fetchers, and hands out a fresh
//! [`Loaders`] set for every inbound request so that cached values never
//! outlive the request that loaded them.

use std::{fmt, sync::Arc};

use arc_swap::ArcSwapOption;
use futures::future::BoxFuture;
use tracing::debug;

use crate::{
    entity::{Product, User},
    error::FetchError,
    fetcher::Fetcher,
    loader::{Loader, LoaderRules},
};

/// A shared, type-erased fetcher for one kind of entity.
pub type EntityFetcher<T> = dyn Fetcher<
        String,
        Value = T,
        Error = FetchError,
        Future = BoxFuture<'static, Result<T, FetchError>>,
    > + Send
    + Sync;

pub type UserLoader = Loader<String, EntityFetcher<User>>;
pub type ProductLoader = Loader<String, EntityFetcher<Product>>;

/// One loader per entity kind, all scoped to a single request.
#[derive(Debug)]
pub struct Loaders {
    pub users: UserLoader,
    pub products: ProductLoader,
}

/// Builds [`Loaders`] sets bound to a fixed group of fetchers.
#[derive(Clone)]
pub struct LoaderRegistry {
    users: Arc<EntityFetcher<User>>,
    products: Arc<EntityFetcher<Product>>,
    rules: LoaderRules,
}

impl LoaderRegistry {
    pub fn new(users: Arc<EntityFetcher<User>>, products: Arc<EntityFetcher<Product>>) -> Self {
        Self {
            users,
            products,
            rules: LoaderRules::default(),
        }
    }

    /// Use `rules` for every loader built from now on.
    pub fn with_rules(self, rules: LoaderRules) -> Self {
        Self { rules, ..self }
    }

    pub fn rules(&self) -> &LoaderRules {
        &self.rules
    }

    /// Build a fresh set of empty loaders. Performs no I/O.
    pub fn for_request(&self) -> Loaders {
        Loaders {
            users: Loader::with_rules(Arc::clone(&self.users), self.rules.clone()),
            products: Loader::with_rules(Arc::clone(&self.products), self.rules.clone()),
        }
    }

    /// Start a request: a new context with a fresh loader set attached.
    pub fn begin_request(&self) -> RequestContext {
        let context = RequestContext::new();
        context.attach(self.for_request());
        context
    }
}

impl fmt::Debug for LoaderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoaderRegistry")
            .field("users", &"<fetcher>")
            .field("products", &"<fetcher>")
            .field("rules", &self.rules)
            .finish()
    }
}

/// Per-request state shared by every resolver working on the request.
#[derive(Debug, Default)]
pub struct RequestContext {
    loaders: ArcSwapOption<Loaders>,
}

impl RequestContext {
    /// A context with no loaders attached.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a loader set, replacing any that was attached before.
    pub fn attach(&self, loaders: Loaders) {
        debug!("attaching loaders to request context");
        self.loaders.store(Some(Arc::new(loaders)));
    }

    pub fn try_loaders(&self) -> Option<Arc<Loaders>> {
        self.loaders.load_full()
    }

    /// The loader set for this request.
    ///
    /// # Panics
    ///
    /// If no loaders were attached. Every request is expected to pass
    /// through [`LoaderRegistry::begin_request`] (or [`attach`]) before any
    /// resolver runs, so this is a wiring bug rather than a runtime
    /// condition.
    ///
    /// [`attach`]: RequestContext::attach
    pub fn loaders(&self) -> Arc<Loaders> {
        match self.try_loaders() {
            Some(loaders) => loaders,
            None => panic!("entity loaders not found in request context"),
        }
    }

    pub async fn user(&self, id: &str) -> Result<User, FetchError> {
        let loaders = self.loaders();
        loaders.users.load(id.to_owned()).await
    }

    pub async fn product(&self, id: &str) -> Result<Product, FetchError> {
        let loaders = self.loaders();
        loaders.products.load(id.to_owned()).await
    }

    pub async fn users<I>(&self, ids: I) -> Vec<Result<User, FetchError>>
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let loaders = self.loaders();
        loaders.users.load_many(ids.into_iter().map(Into::into)).await
    }

    pub async fn products<I>(&self, ids: I) -> Vec<Result<Product, FetchError>>
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let loaders = self.loaders();
        loaders
            .products
            .load_many(ids.into_iter().map(Into::into))
            .await
    }
}

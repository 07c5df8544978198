//! Entityloader is a request-scoped, single-flight entity loader in the
//! spirit of the [dataloader pattern](https://github.com/graphql/dataloader).
//! It sits between GraphQL resolvers and the services that own users and
//! products, so that the many identical lookups produced by one nested query
//! turn into at most one fetch per key, with the result cached for the rest
//! of the request.
//!
//! ## Overview
//!
//! A [`Fetcher`] is the single-key lookup being protected: a repository, an
//! RPC client, anything with a `get_by_id`. A [`Loader`] wraps one fetcher
//! and offers [`load`], [`load_many`], [`prime`] and [`clear`]. Every
//! request gets its own loaders from a [`LoaderRegistry`], reachable through
//! the request's [`RequestContext`].
//!
//! ```
//! use std::sync::Arc;
//!
//! use entityloader::{LoaderRegistry, MemoryStore, Product, User};
//! use futures::{executor::block_on, join};
//!
//! let users: MemoryStore<User> = vec![User {
//!     id: "u1".into(),
//!     name: "Alice".into(),
//!     email: "alice@example.com".into(),
//!     phone: "555-0100".into(),
//! }]
//! .into_iter()
//! .collect();
//!
//! // The registry lives as long as the server; it only holds fetchers.
//! let registry = LoaderRegistry::new(Arc::new(users), Arc::new(MemoryStore::<Product>::new()));
//!
//! // Each inbound request gets a context with fresh loaders.
//! let ctx = registry.begin_request();
//!
//! block_on(async {
//!     // Both of these join the same pending key; the store is asked once.
//!     let (author, reviewer) = join!(ctx.user("u1"), ctx.user("u1"));
//!     assert_eq!(author, reviewer);
//!     assert_eq!(author.unwrap().name, "Alice");
//!
//!     let missing = ctx.product("p1").await;
//!     assert!(missing.unwrap_err().is_not_found());
//! });
//! ```
//!
//! ## How a load is resolved
//!
//! - A cached value is returned immediately.
//! - Otherwise the load registers a waiter under the key's pending entry. The
//!   first waiter for a key opens the batch window (see [`LoaderRules`]).
//! - When the window closes the entry is detached from the pending table,
//!   the fetcher is called once, and its outcome is handed to every waiter
//!   that had joined. Loads that arrive after the detach start a new cycle.
//! - Successful values are cached. Errors, including "not found", are not;
//!   the next load simply fetches again.
//!
//! Only identical keys are coalesced. Distinct keys pending in the same
//! window are still fetched one by one, because the fetcher contract has no
//! bulk lookup.
//!
//! ## Design notes
//!
//! ### Poll-driven dispatch
//!
//! Nothing is spawned. The window delay and the fetch are driven directly by
//! the [`LoadFuture`]s waiting on them, so the loader works under any
//! executor. Only one waiter needs to drive the shared work: the one that
//! polled it most recently. The rest are woken when the outcome is ready, or
//! when the driving waiter is dropped and one of them has to take over.
//!
//! ### Cancellation
//!
//! There are no deadlines. Dropping a `LoadFuture` withdraws its waiter; if
//! it was the last waiter before dispatch, the pending key disappears with
//! it. Callers who want a timeout can race the future against their own
//! timer.
//!
//! [`load`]: Loader::load
//! [`load_many`]: Loader::load_many
//! [`prime`]: Loader::prime
//! [`clear`]: Loader::clear

mod data;
mod entity;
mod error;
mod fetcher;
mod loader;
mod registry;
mod wakerset;

pub use entity::{Entity, MemoryStore, Product, User};
pub use error::FetchError;
pub use fetcher::{Fetcher, Window};
pub use loader::{LoadFuture, Loader, LoaderRules};
pub use registry::{
    EntityFetcher, LoaderRegistry, Loaders, ProductLoader, RequestContext, UserLoader,
};

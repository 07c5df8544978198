//! These tests exercise the per-request plumbing: a registry of shared
//! fetchers handing out fresh loaders through a request context.

use entityloader::{
    Entity, FetchError, Fetcher, LoaderRegistry, LoaderRules, MemoryStore, Product,
    RequestContext, User,
};
use futures::{
    executor,
    future::{self, BoxFuture, FutureExt},
    join,
};
use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

/// A memory store that counts how often it is asked for something. While
/// `down` is set, every lookup fails as if the backing service were
/// unreachable.
#[derive(Debug)]
struct Counted<T> {
    store: MemoryStore<T>,
    calls: AtomicUsize,
    down: AtomicBool,
}

impl<T: Entity> Counted<T> {
    fn new(entities: Vec<T>) -> Arc<Self> {
        Arc::new(Counted {
            store: entities.into_iter().collect(),
            calls: AtomicUsize::new(0),
            down: AtomicBool::new(false),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst)
    }
}

impl<T: Entity> Fetcher<String> for Counted<T> {
    type Value = T;
    type Error = FetchError;
    type Future = BoxFuture<'static, Result<T, FetchError>>;

    fn get_by_id(&self, key: &String) -> Self::Future {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.down.load(Ordering::SeqCst) {
            future::ready(Err(FetchError::unavailable(T::KIND, "connection reset"))).boxed()
        } else {
            self.store.get_by_id(key)
        }
    }
}

fn user(id: &str, name: &str) -> User {
    User {
        id: id.into(),
        name: name.into(),
        email: format!("{}@example.com", name.to_lowercase()),
        phone: "555-0100".into(),
    }
}

fn product(id: &str, name: &str) -> Product {
    Product {
        id: id.into(),
        name: name.into(),
        description: String::new(),
        price: 9.99,
        stock: 3,
        category: "books".into(),
    }
}

struct Fixture {
    users: Arc<Counted<User>>,
    products: Arc<Counted<Product>>,
    registry: LoaderRegistry,
}

fn fixture() -> Fixture {
    let users = Counted::new(vec![user("u1", "Alice"), user("u2", "Bob")]);
    let products = Counted::new(vec![product("p1", "Rust in Action")]);
    let registry = LoaderRegistry::new(users.clone(), products.clone());

    Fixture {
        users,
        products,
        registry,
    }
}

/// Two resolvers asking for the same user inside one window cause one
/// lookup, and both see the same user.
#[test]
fn test_concurrent_resolvers_share_a_lookup() {
    let Fixture {
        users, registry, ..
    } = fixture();
    let ctx = registry.begin_request();

    let (first, second) = executor::block_on(async { join!(ctx.user("u1"), ctx.user("u1")) });

    assert_eq!(first.unwrap().name, "Alice");
    assert_eq!(second.unwrap().name, "Alice");
    assert_eq!(users.calls(), 1);
}

#[test]
fn test_requests_do_not_share_caches() {
    let Fixture {
        users, registry, ..
    } = fixture();

    let ctx1 = registry.begin_request();
    executor::block_on(ctx1.user("u1")).unwrap();
    executor::block_on(ctx1.user("u1")).unwrap();
    assert_eq!(users.calls(), 1);

    let ctx2 = registry.begin_request();
    executor::block_on(ctx2.user("u1")).unwrap();
    assert_eq!(users.calls(), 2);
}

#[test]
fn test_batch_accessors_keep_order() {
    let Fixture {
        users,
        products,
        registry,
    } = fixture();
    let ctx = registry.begin_request();

    let names: Vec<String> = executor::block_on(ctx.users(vec!["u2", "u1", "u2"]))
        .into_iter()
        .map(|user| user.unwrap().name)
        .collect();
    assert_eq!(names, ["Bob", "Alice", "Bob"]);
    assert_eq!(users.calls(), 2);

    let found = executor::block_on(ctx.products(vec!["p1", "p2"]));
    assert_eq!(found[0].as_ref().unwrap().name, "Rust in Action");
    assert_eq!(found[1], Err(FetchError::not_found("product", "p2")));
    assert_eq!(products.calls(), 2);
}

#[test]
fn test_not_found_is_fetched_again() {
    let Fixture {
        products, registry, ..
    } = fixture();
    let ctx = registry.begin_request();

    let missing = executor::block_on(ctx.product("p2"));
    assert!(missing.unwrap_err().is_not_found());

    products.store.insert(product("p2", "Programming Rust"));

    let found = executor::block_on(ctx.product("p2"));
    assert_eq!(found.unwrap().name, "Programming Rust");
    assert_eq!(products.calls(), 2);
}

/// A transient failure reaches every joined resolver, and is forgotten as
/// soon as it has been delivered.
#[test]
fn test_unavailable_is_shared_then_retried() {
    let Fixture {
        users, registry, ..
    } = fixture();
    let ctx = registry.begin_request();

    users.set_down(true);
    let (first, second) = executor::block_on(async { join!(ctx.user("u1"), ctx.user("u1")) });

    assert_eq!(
        first,
        Err(FetchError::unavailable("user", "connection reset"))
    );
    assert_eq!(first, second);
    assert!(!first.unwrap_err().is_not_found());
    assert_eq!(users.calls(), 1);
    assert!(!ctx.loaders().users.is_cached(&"u1".to_string()));

    users.set_down(false);
    assert_eq!(executor::block_on(ctx.user("u1")).unwrap().name, "Alice");
    assert_eq!(users.calls(), 2);
}

#[test]
fn test_loaders_can_be_primed_through_the_context() {
    let Fixture {
        users, registry, ..
    } = fixture();
    let ctx = registry.begin_request();

    ctx.loaders().users.prime("u9".into(), user("u9", "Carol"));

    assert_eq!(executor::block_on(ctx.user("u9")).unwrap().name, "Carol");
    assert_eq!(users.calls(), 0);
}

#[test]
fn test_rules_apply_to_every_loader() {
    let Fixture { registry, .. } = fixture();
    let registry = registry.with_rules(LoaderRules {
        window: Duration::from_millis(5),
        max_batch: None,
    });

    let loaders = registry.for_request();
    assert_eq!(loaders.users.rules().window, Duration::from_millis(5));
    assert_eq!(loaders.products.rules().max_batch, None);
}

#[test]
fn test_attach_and_probe() {
    let Fixture { registry, .. } = fixture();
    let ctx = RequestContext::new();
    assert!(ctx.try_loaders().is_none());

    ctx.attach(registry.for_request());
    assert!(ctx.try_loaders().is_some());
    assert_eq!(executor::block_on(ctx.user("u2")).unwrap().name, "Bob");
}

#[test]
#[should_panic(expected = "entity loaders not found in request context")]
fn test_missing_loaders_panic() {
    let ctx = RequestContext::new();
    let _ = executor::block_on(ctx.user("u1"));
}

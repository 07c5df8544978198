use std::{
    collections::hash_map::{Entry, HashMap},
    fmt::{self, Debug, Formatter},
    future::Future,
    hash::Hash,
    mem,
    num::NonZeroUsize,
    pin::Pin,
    sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
    task::{Context, Poll},
    time::Duration,
};

use futures::future::{join_all, JoinAll};
use tracing::{debug, trace};

use crate::{
    data::Outcome,
    fetcher::{Fetcher, Window},
    wakerset::{Token, WakerSet},
};

/// The configuration of a [`Loader`].
#[derive(Debug, Clone)]
pub struct LoaderRules<W = Duration> {
    /// How long a pending key waits for duplicate requests to join it
    /// before it is dispatched.
    pub window: W,

    /// Nominal cap on the keys per dispatch. A dispatch only ever carries a
    /// single key, so this is never reached and is not enforced.
    pub max_batch: Option<NonZeroUsize>,
}

impl Default for LoaderRules<Duration> {
    fn default() -> Self {
        Self {
            window: Duration::from_millis(1),
            max_batch: NonZeroUsize::new(100),
        }
    }
}

/// The lifecycle of a single pending key. Every waiter that joined the key
/// shares one of these, and whichever of them polled most recently drives
/// it forward.
enum Batch<Value, Error, Fut, Delay> {
    /// The window is open; more waiters can still join through the pending
    /// table.
    Waiting {
        delay: Pin<Box<Delay>>,
        wakers: WakerSet,
    },

    /// Detached from the pending table, with the fetch in flight.
    Fetching {
        fut: Pin<Box<Fut>>,
        wakers: WakerSet,
        waiters: usize,
        dropped: usize,
    },

    Done(Outcome<Value, Error>),
}

/// An entry in the pending table. `waiters` counts the sinks registered
/// under the key; the entry is removed when it reaches zero or when the
/// batch is dispatched, whichever comes first.
struct PendingKey<B> {
    batch: Arc<Mutex<B>>,
    waiters: usize,
}

#[allow(clippy::type_complexity)]
type BatchOf<Key, F, W> = Batch<
    <F as Fetcher<Key>>::Value,
    <F as Fetcher<Key>>::Error,
    <F as Fetcher<Key>>::Future,
    <W as Window>::Delay,
>;

/// A request-scoped, single-flight cache in front of a [`Fetcher`].
///
/// Concurrent loads of the same key are coalesced: the first load of an
/// uncached key opens a batch window, every load of that key before the
/// window closes joins it, and exactly one fetch is made on behalf of all of
/// them. Successful values are cached for the lifetime of the loader;
/// errors (including "not found") are delivered to every joined waiter and
/// forgotten, so the next load retries.
///
/// Distinct keys are never merged into one call: each key is dispatched on
/// its own.
pub struct Loader<Key, F, W = Duration>
where
    Key: Eq + Hash,
    F: Fetcher<Key> + ?Sized,
    W: Window,
{
    fetcher: Arc<F>,
    rules: LoaderRules<W>,
    cache: RwLock<HashMap<Key, F::Value>>,
    pending: Mutex<HashMap<Key, PendingKey<BatchOf<Key, F, W>>>>,
}

impl<Key, F> Loader<Key, F, Duration>
where
    Key: Eq + Hash,
    F: Fetcher<Key> + ?Sized,
{
    pub fn new(fetcher: Arc<F>) -> Self {
        Self::with_rules(fetcher, LoaderRules::default())
    }
}

impl<Key, F, W> Loader<Key, F, W>
where
    Key: Eq + Hash,
    F: Fetcher<Key> + ?Sized,
    W: Window,
{
    pub fn with_rules(fetcher: Arc<F>, rules: LoaderRules<W>) -> Self {
        Self {
            fetcher,
            rules,
            cache: RwLock::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
        }
    }

    #[inline]
    pub fn rules(&self) -> &LoaderRules<W> {
        &self.rules
    }

    /// Put a value straight into the cache. A dispatch already in flight
    /// for the key is left alone and will overwrite it if it succeeds.
    pub fn prime(&self, key: Key, value: F::Value) {
        write(&self.cache).insert(key, value);
    }

    /// Drop the cached value for a key, if any. In-flight dispatches are
    /// unaffected.
    pub fn clear(&self, key: &Key) {
        write(&self.cache).remove(key);
    }

    pub fn is_cached(&self, key: &Key) -> bool {
        read(&self.cache).contains_key(key)
    }

    /// True while at least one waiter for `key` is waiting for its batch
    /// window to close.
    pub fn is_pending(&self, key: &Key) -> bool {
        lock(&self.pending).contains_key(key)
    }

    /// A waiter is going away. Called with the waiter's batch and the waker
    /// token it registered, if it was ever polled.
    fn abandon(&self, key: &Key, batch: &Arc<Mutex<BatchOf<Key, F, W>>>, token: Option<Token>) {
        let mut guard = lock(batch);

        match &mut *guard {
            Batch::Waiting { wakers, .. } => {
                if let Some(token) = token {
                    wakers.discard_and_wake(token);
                }

                // Holding the batch lock guarantees the key can't be
                // dispatched underneath us.
                let mut pending = lock(&self.pending);
                let emptied = match pending.get_mut(key) {
                    Some(entry) if Arc::ptr_eq(&entry.batch, batch) => {
                        entry.waiters -= 1;
                        entry.waiters == 0
                    }
                    _ => false,
                };

                if emptied {
                    pending.remove(key);
                    debug!("last waiter left before dispatch; pending key dropped");
                }
            }
            Batch::Fetching {
                wakers, dropped, ..
            } => {
                if let Some(token) = token {
                    wakers.discard_and_wake(token);
                }
                *dropped += 1;
            }
            Batch::Done(outcome) => outcome.discard(),
        }
    }
}

impl<Key, F, W> Loader<Key, F, W>
where
    Key: Eq + Hash + Clone + Debug,
    F: Fetcher<Key> + ?Sized,
    W: Window,
{
    /// Load the value for a key.
    ///
    /// A cached value resolves immediately. Otherwise the returned future
    /// joins the pending batch for the key (opening one if there is none)
    /// and resolves with that batch's single fetch outcome. Only the
    /// awaiting task is suspended.
    pub fn load(&self, key: Key) -> LoadFuture<'_, Key, F, W> {
        let cached = read(&self.cache).get(&key).cloned();
        if let Some(value) = cached {
            trace!(?key, "cache hit");
            return LoadFuture {
                loader: self,
                key,
                stage: Stage::Cached(value),
            };
        }

        let batch = self.enqueue(&key);
        LoadFuture {
            loader: self,
            key,
            stage: Stage::Waiting { batch, token: None },
        }
    }

    /// Load several keys at once. Results come back in input order; repeated
    /// keys share a single fetch and a single outcome.
    pub fn load_many<I>(&self, keys: I) -> JoinAll<LoadFuture<'_, Key, F, W>>
    where
        I: IntoIterator<Item = Key>,
    {
        join_all(keys.into_iter().map(|key| self.load(key)))
    }

    /// Register a sink for `key` in the pending table and return the batch
    /// it belongs to.
    fn enqueue(&self, key: &Key) -> Arc<Mutex<BatchOf<Key, F, W>>> {
        let mut pending = lock(&self.pending);

        let batch = match pending.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                let entry = entry.get_mut();
                entry.waiters += 1;
                trace!(?key, waiters = entry.waiters, "joined pending key");
                Arc::clone(&entry.batch)
            }
            Entry::Vacant(entry) => {
                trace!(?key, "opening batch window");
                let batch = Arc::new(Mutex::new(Batch::Waiting {
                    delay: Box::pin(self.rules.window.open()),
                    wakers: WakerSet::default(),
                }));
                entry.insert(PendingKey {
                    batch: Arc::clone(&batch),
                    waiters: 1,
                });
                batch
            }
        };

        batch
    }

    /// Take the pending entry for a key out of the table, provided it still
    /// belongs to `batch`, and return how many waiters were registered.
    /// Loads that arrive afterwards open a fresh batch.
    fn detach(&self, key: &Key, batch: &Arc<Mutex<BatchOf<Key, F, W>>>) -> usize {
        let mut pending = lock(&self.pending);

        let owned = pending
            .get(key)
            .map_or(false, |entry| Arc::ptr_eq(&entry.batch, batch));

        if owned {
            pending.remove(key).map_or(1, |entry| entry.waiters)
        } else {
            // Unreachable while the caller is a live waiter; count just the
            // caller.
            1
        }
    }

    /// Advance the shared batch on behalf of one waiter.
    fn drive(
        &self,
        key: &Key,
        batch: &Arc<Mutex<BatchOf<Key, F, W>>>,
        token: &mut Option<Token>,
        ctx: &mut Context<'_>,
    ) -> Poll<Result<F::Value, F::Error>> {
        // The batch lock is held for the duration of one poll, never across
        // an await. The pending-table lock may be taken under it, but never
        // the other way around.
        let mut guard = lock(batch);

        if let Batch::Waiting { delay, wakers } = &mut *guard {
            if delay.as_mut().poll(ctx).is_pending() {
                wakers.register(token, ctx.waker());
                return Poll::Pending;
            }

            // Window closed: claim every waiter registered so far and start
            // the one fetch they will all share.
            let wakers = mem::take(wakers);
            let waiters = self.detach(key, batch);
            debug!(?key, waiters, "dispatching fetch");

            *guard = Batch::Fetching {
                fut: Box::pin(self.fetcher.get_by_id(key)),
                wakers,
                waiters,
                dropped: 0,
            };
        }

        if let Batch::Fetching {
            fut,
            wakers,
            waiters,
            dropped,
        } = &mut *guard
        {
            let result = match fut.as_mut().poll(ctx) {
                Poll::Pending => {
                    wakers.register(token, ctx.waker());
                    return Poll::Pending;
                }
                Poll::Ready(result) => result,
            };

            let remaining = waiters.saturating_sub(*dropped);
            match result {
                Ok(ref value) => {
                    self.prime(key.clone(), value.clone());
                    debug!(?key, waiters = remaining, "fetch resolved");
                }
                Err(_) => debug!(?key, waiters = remaining, "fetch failed; not cached"),
            }

            // The caller is about to collect its share in this poll, so it
            // doesn't need waking.
            mem::take(wakers).wake_all_except(*token);
            *guard = Batch::Done(Outcome::new(result, remaining));
        }

        match &mut *guard {
            Batch::Done(outcome) => match outcome.take() {
                Some(result) => Poll::Ready(result),
                None => {
                    drop(guard);
                    panic!("Unknown logic error: more waiters than were dispatched");
                }
            },
            _ => unreachable!("Batch was not advanced to Done"),
        }
    }
}

impl<Key, F, W> Debug for Loader<Key, F, W>
where
    Key: Eq + Hash,
    F: Fetcher<Key> + ?Sized,
    W: Window,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let cached = read(&self.cache).len();
        let pending = lock(&self.pending).len();

        f.debug_struct("Loader")
            .field("fetcher", &"<fetcher>")
            .field("cached", &cached)
            .field("pending", &pending)
            .finish()
    }
}

enum Stage<Value, B> {
    Cached(Value),
    Waiting {
        batch: Arc<Mutex<B>>,
        token: Option<Token>,
    },
    Finished,
}

/// A single `load` in progress. Resolves with the value for its key, or with
/// the error its batch's fetch produced.
///
/// Dropping an unresolved `LoadFuture` withdraws it from its batch; if it
/// was the task driving the batch, another waiter takes over.
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct LoadFuture<'a, Key, F, W = Duration>
where
    Key: Eq + Hash,
    F: Fetcher<Key> + ?Sized,
    W: Window,
{
    loader: &'a Loader<Key, F, W>,
    key: Key,
    stage: Stage<F::Value, BatchOf<Key, F, W>>,
}

// Nothing in a LoadFuture is ever pinned in place: the window delay and the
// fetch live behind their own boxes.
impl<'a, Key, F, W> Unpin for LoadFuture<'a, Key, F, W>
where
    Key: Eq + Hash,
    F: Fetcher<Key> + ?Sized,
    W: Window,
{
}

impl<'a, Key, F, W> Future for LoadFuture<'a, Key, F, W>
where
    Key: Eq + Hash + Clone + Debug,
    F: Fetcher<Key> + ?Sized,
    W: Window,
{
    type Output = Result<F::Value, F::Error>;

    fn poll(self: Pin<&mut Self>, ctx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = Pin::into_inner(self);

        match mem::replace(&mut this.stage, Stage::Finished) {
            Stage::Cached(value) => Poll::Ready(Ok(value)),
            Stage::Waiting { batch, mut token } => {
                match this.loader.drive(&this.key, &batch, &mut token, ctx) {
                    Poll::Pending => {
                        this.stage = Stage::Waiting { batch, token };
                        Poll::Pending
                    }
                    Poll::Ready(result) => Poll::Ready(result),
                }
            }
            Stage::Finished => panic!("Can't re-poll a completed LoadFuture"),
        }
    }
}

impl<'a, Key, F, W> Drop for LoadFuture<'a, Key, F, W>
where
    Key: Eq + Hash,
    F: Fetcher<Key> + ?Sized,
    W: Window,
{
    fn drop(&mut self) {
        if let Stage::Waiting { batch, token } = mem::replace(&mut self.stage, Stage::Finished) {
            self.loader.abandon(&self.key, &batch, token);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

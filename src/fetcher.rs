//! The single-key lookup a loader sits in front of, and the batch window
//! that decides how long a loader waits before calling it.

use std::{future::Future, time::Duration};

/// A single-key lookup backed by a repository or a remote service.
///
/// A loader calls `get_by_id` at most once per dispatch, and never while
/// holding its pending-key lock. Absent keys should be reported as an error
/// (see [`FetchError::NotFound`](crate::FetchError::NotFound)); errors are
/// handed verbatim to every waiter and are never cached.
///
/// The returned future must not borrow the fetcher or the key. Fetchers are
/// shared by every request, so implementations that need their own state in
/// the future should clone an `Arc` into it.
pub trait Fetcher<Key> {
    type Value: Clone;
    type Error: Clone;
    type Future: Future<Output = Result<Self::Value, Self::Error>>;

    fn get_by_id(&self, key: &Key) -> Self::Future;
}

/// The batch window: the delay between the first request for a key and its
/// dispatch, during which concurrent requests for the same key join it.
///
/// A fresh delay is opened once for every pending key. `Duration` opens a
/// runtime-agnostic timer; any `Fn() -> impl Future<Output = ()>` works as
/// well, which is handy for windows such as `future::ready` (dispatch on
/// first poll) or `future::pending` (never dispatch on its own).
pub trait Window {
    type Delay: Future<Output = ()>;

    fn open(&self) -> Self::Delay;
}

impl Window for Duration {
    type Delay = futures_timer::Delay;

    fn open(&self) -> Self::Delay {
        futures_timer::Delay::new(*self)
    }
}

impl<F, D> Window for F
where
    F: Fn() -> D,
    D: Future<Output = ()>,
{
    type Delay = D;

    fn open(&self) -> D {
        self()
    }
}

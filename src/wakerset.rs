use std::{collections::HashMap, task::Waker};

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub(crate) struct Token(usize);

/// The wakers of every task waiting on one pending key.
///
/// Only one task needs to drive the shared window and fetch: the one that
/// most recently polled it, called the driving waker. The others sleep until
/// the outcome is ready. If the driving task goes away, another waker is
/// promoted and woken so the shared job always has a path forward.
///
/// Each waiter keeps the token handed out by `register` and must give it
/// back through `discard_and_wake` when it loses interest.
#[derive(Debug, Default)]
pub(crate) struct WakerSet {
    wakers: HashMap<Token, Waker>,
    driver: Option<Token>,

    // WakerSets live for one dispatch cycle, so this never gets near
    // overflow in practice.
    next_token: usize,
}

impl WakerSet {
    /// Record `waker` for the waiter holding `slot`, issuing a token on its
    /// first poll. The waker becomes the driving waker, on the assumption
    /// that it was just used to poll the shared job.
    pub(crate) fn register(&mut self, slot: &mut Option<Token>, waker: &Waker) {
        let token = match *slot {
            Some(token) => token,
            None => {
                let token = Token(self.next_token);
                self.next_token = self.next_token.wrapping_add(1);
                *slot = Some(token);
                token
            }
        };

        match self.wakers.get_mut(&token) {
            Some(existing) if existing.will_wake(waker) => {}
            Some(existing) => existing.clone_from(waker),
            None => {
                self.wakers.insert(token, waker.clone());
            }
        }

        self.driver = Some(token);
    }

    /// Forget a waiter. If it was driving (or nobody is), an arbitrary
    /// remaining waker is promoted and woken.
    pub(crate) fn discard_and_wake(&mut self, token: Token) {
        self.wakers.remove(&token);

        if self.driver == Some(token) || self.driver.is_none() {
            self.driver = None;
            if let Some((&next, waker)) = self.wakers.iter().next() {
                self.driver = Some(next);
                waker.wake_by_ref();
            }
        }
    }

    /// Wake every waiter except `skip`, which is about to collect its
    /// result in the current poll anyway.
    pub(crate) fn wake_all_except(self, skip: Option<Token>) {
        self.wakers
            .into_iter()
            .filter(|&(token, _)| Some(token) != skip)
            .for_each(|(_, waker)| waker.wake());
    }

    #[cfg(test)]
    fn driver(&self) -> Option<Token> {
        self.driver
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.wakers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cooked_waker::{IntoWaker, Wake, WakeRef};
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    #[derive(Debug, Clone, Default, IntoWaker)]
    struct CountingWaker {
        count: Arc<AtomicUsize>,
    }

    impl WakeRef for CountingWaker {
        fn wake_by_ref(&self) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl Wake for CountingWaker {}

    impl CountingWaker {
        fn wakes(&self) -> usize {
            self.count.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn reregistering_keeps_the_same_token() {
        let mut set = WakerSet::default();
        let signal = CountingWaker::default();
        let waker = signal.clone().into_waker();

        let mut slot = None;
        set.register(&mut slot, &waker);
        let first = slot;
        set.register(&mut slot, &waker);

        assert_eq!(slot, first);
        assert_eq!(set.len(), 1);
        assert_eq!(set.driver(), first);
    }

    #[test]
    fn dropping_the_driver_promotes_another_waiter() {
        let mut set = WakerSet::default();
        let a = CountingWaker::default();
        let b = CountingWaker::default();

        let mut slot_a = None;
        let mut slot_b = None;
        set.register(&mut slot_a, &a.clone().into_waker());
        set.register(&mut slot_b, &b.clone().into_waker());
        assert_eq!(set.driver(), slot_b);

        set.discard_and_wake(slot_b.unwrap());

        assert_eq!(set.driver(), slot_a);
        assert_eq!(a.wakes(), 1);
        assert_eq!(b.wakes(), 0);
    }

    #[test]
    fn dropping_a_passive_waiter_wakes_nobody() {
        let mut set = WakerSet::default();
        let a = CountingWaker::default();
        let b = CountingWaker::default();

        let mut slot_a = None;
        let mut slot_b = None;
        set.register(&mut slot_a, &a.clone().into_waker());
        set.register(&mut slot_b, &b.clone().into_waker());

        set.discard_and_wake(slot_a.unwrap());

        assert_eq!(set.driver(), slot_b);
        assert_eq!(a.wakes() + b.wakes(), 0);
    }

    #[test]
    fn wake_all_skips_the_finishing_waiter() {
        let mut set = WakerSet::default();
        let a = CountingWaker::default();
        let b = CountingWaker::default();
        let c = CountingWaker::default();

        let mut slots = [None, None, None];
        set.register(&mut slots[0], &a.clone().into_waker());
        set.register(&mut slots[1], &b.clone().into_waker());
        set.register(&mut slots[2], &c.clone().into_waker());

        set.wake_all_except(slots[2]);

        assert_eq!((a.wakes(), b.wakes(), c.wakes()), (1, 1, 0));
    }
}

//! The shared result of one dispatch, handed out to every waiter that was
//! drained with it.

/// A fetch outcome plus the number of waiters that have yet to collect it.
///
/// Every waiter but the last receives a clone; the last one takes the
/// original, so the common case of a single waiter never clones.
#[derive(Debug)]
pub(crate) struct Outcome<Value, Error> {
    result: Option<Result<Value, Error>>,
    remaining: usize,
}

impl<Value, Error> Outcome<Value, Error> {
    pub(crate) fn new(result: Result<Value, Error>, remaining: usize) -> Self {
        Self {
            result: if remaining == 0 { None } else { Some(result) },
            remaining,
        }
    }

    /// A waiter lost interest without collecting its share. No-op if
    /// everything has already been handed out.
    pub(crate) fn discard(&mut self) {
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            self.result = None;
        }
    }
}

impl<Value: Clone, Error: Clone> Outcome<Value, Error> {
    /// Collect one share of the outcome. Returns `None` only if more waiters
    /// collect than were counted at dispatch, which is a logic error.
    pub(crate) fn take(&mut self) -> Option<Result<Value, Error>> {
        match self.remaining {
            0 => None,
            1 => {
                self.remaining = 0;
                self.result.take()
            }
            _ => {
                self.remaining -= 1;
                self.result.clone()
            }
        }
    }
}

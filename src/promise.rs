use crate::error::RunError;
use core::{
    pin::Pin,
    task::{Context, Poll, Waker},
    time::Duration,
};
use parking_lot::{Condvar, Mutex};
use std::{sync::Arc, time::Instant};

type Outcome = Result<(), RunError>;

#[derive(Debug, Default)]
struct Slot {
    outcome: Option<Outcome>,
    waker: Option<Waker>,
    fulfilled: bool,
}

#[derive(Debug, Default)]
struct Completion {
    slot: Mutex<Slot>,
    ready: Condvar,
}

/// Producer half of a run's completion signal. Fulfilled exactly once.
#[derive(Debug)]
pub(crate) struct Promise {
    completion: Option<Arc<Completion>>,
}

/// Completion signal of one graph run.
///
/// Await it as a [`Future`] or block on it with [`wait`](Self::wait).
#[derive(Debug)]
#[must_use = "a run is only known to be complete once its future resolves"]
pub struct RunFuture {
    completion: Arc<Completion>,
}

pub(crate) fn channel() -> (Promise, RunFuture) {
    let completion = Arc::new(Completion::default());
    (
        Promise {
            completion: Some(Arc::clone(&completion)),
        },
        RunFuture { completion },
    )
}

impl Promise {
    pub(crate) fn fulfill(mut self, outcome: Outcome) {
        if let Some(completion) = self.completion.take() {
            completion.resolve(outcome);
        }
    }
}

impl Drop for Promise {
    fn drop(&mut self) {
        if let Some(completion) = self.completion.take() {
            completion.resolve(Err(RunError::Abandoned));
        }
    }
}

impl Completion {
    fn resolve(&self, outcome: Outcome) {
        let waker = {
            let mut slot = self.slot.lock();
            slot.outcome = Some(outcome);
            slot.fulfilled = true;
            slot.waker.take()
        };
        self.ready.notify_all();
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

impl RunFuture {
    /// Block the calling thread until the run resolves.
    ///
    /// # Errors
    /// The run's [`RunError`] if it did not complete normally.
    pub fn wait(self) -> Result<(), RunError> {
        let mut slot = self.completion.slot.lock();
        while !slot.fulfilled {
            self.completion.ready.wait(&mut slot);
        }
        slot.outcome.take().unwrap_or(Ok(()))
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`, returning the
    /// future back.
    ///
    /// # Errors
    /// `Err(self)` on timeout.
    pub fn wait_timeout(self, timeout: Duration) -> Result<Result<(), RunError>, Self> {
        let deadline = Instant::now() + timeout;
        {
            let mut slot = self.completion.slot.lock();
            while !slot.fulfilled {
                if self
                    .completion
                    .ready
                    .wait_until(&mut slot, deadline)
                    .timed_out()
                {
                    break;
                }
            }
            if slot.fulfilled {
                return Ok(slot.outcome.take().unwrap_or(Ok(())));
            }
        }
        Err(self)
    }

    /// Whether the run has resolved.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.completion.slot.lock().fulfilled
    }
}

impl Future for RunFuture {
    type Output = Result<(), RunError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut slot = self.completion.slot.lock();
        if slot.fulfilled {
            return Poll::Ready(slot.outcome.take().unwrap_or(Ok(())));
        }
        match &mut slot.waker {
            Some(waker) if waker.will_wake(cx.waker()) => {}
            waker => *waker = Some(cx.waker().clone()),
        }
        Poll::Pending
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::channel;
    use crate::error::RunError;
    use core::time::Duration;
    use std::thread;

    #[test]
    fn dropped_promise_resolves_as_abandoned() {
        let (promise, future) = channel();
        assert!(!future.is_ready());
        drop(promise);
        assert!(future.is_ready());
        assert_eq!(future.wait(), Err(RunError::Abandoned));
    }

    #[test]
    fn fulfilled_promise_is_not_abandoned() {
        let (promise, future) = channel();
        promise.fulfill(Err(RunError::Stopped));
        assert_eq!(future.wait(), Err(RunError::Stopped));
    }

    #[test]
    fn wait_timeout_hands_the_future_back() {
        let (promise, future) = channel();
        let future = future.wait_timeout(Duration::from_millis(10)).unwrap_err();
        let fulfiller = thread::spawn(move || promise.fulfill(Ok(())));
        assert_eq!(future.wait_timeout(Duration::from_secs(10)).unwrap(), Ok(()));
        fulfiller.join().unwrap();
    }

    #[test]
    fn abandoned_future_wakes_its_task() {
        let (promise, future) = channel();
        let dropper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            drop(promise);
        });
        assert_eq!(futures::executor::block_on(future), Err(RunError::Abandoned));
        dropper.join().unwrap();
    }
}

/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! One-shot promise/future pairs used to hand results across threads.
//!
//! A [`Promise`] is held by whoever will produce the value; the matching [`Future`] is held by whoever
//! waits for it. A future can be waited on (blocking, with or without a timeout), polled with
//! [`Future::is_ready`], or given a continuation with [`Future::then`]. Continuations run on the thread that
//! fulfils the promise, or immediately if the future is already resolved, and never under an internal lock.
//!
//! Dropping a promise without fulfilling it resolves its future with [`BrokenPromise`], so a waiter can
//! never hang on a producer that went away.

use std::{
    fmt::{self, Display, Formatter},
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

/// The producer of a future went away without providing a value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BrokenPromise;

impl Display for BrokenPromise {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("promise dropped before it was fulfilled")
    }
}

type Continuation<T> = Box<dyn FnOnce(Result<T, BrokenPromise>) + Send>;

enum State<T> {
    Pending(Option<Continuation<T>>),
    Ready(Result<T, BrokenPromise>),
    Taken,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    resolved: Condvar,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Create a connected promise/future pair.
pub fn channel<T: Send + 'static>() -> (Promise<T>, Future<T>) {
    let shared = Arc::new(Shared {
        state: Mutex::new(State::Pending(None)),
        resolved: Condvar::new(),
    });
    (
        Promise {
            shared: Some(shared.clone()),
        },
        Future { shared },
    )
}

pub struct Promise<T: Send + 'static> {
    shared: Option<Arc<Shared<T>>>,
}

impl<T: Send + 'static> Promise<T> {
    /// Resolve the future with `value`. If a continuation is registered it runs on the calling thread.
    pub fn fulfil(mut self, value: T) {
        if let Some(shared) = self.shared.take() {
            settle(&shared, Ok(value));
        }
    }
}

impl<T: Send + 'static> Drop for Promise<T> {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            settle(&shared, Err(BrokenPromise));
        }
    }
}

fn settle<T>(shared: &Shared<T>, outcome: Result<T, BrokenPromise>) {
    let mut state = shared.lock();
    match std::mem::replace(&mut *state, State::Taken) {
        State::Pending(Some(continuation)) => {
            drop(state);
            continuation(outcome);
        }
        State::Pending(None) => {
            *state = State::Ready(outcome);
            drop(state);
            shared.resolved.notify_all();
        }
        settled => *state = settled,
    }
}

pub struct Future<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Send + 'static> Future<T> {
    /// A future that is already resolved with `value`.
    pub fn ready(value: T) -> Future<T> {
        Future {
            shared: Arc::new(Shared {
                state: Mutex::new(State::Ready(Ok(value))),
                resolved: Condvar::new(),
            }),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(*self.shared.lock(), State::Ready(_))
    }

    /// Block until the future resolves, then take its value.
    pub fn get(self) -> Result<T, BrokenPromise> {
        let state = self.shared.lock();
        let mut state = self
            .shared
            .resolved
            .wait_while(state, |state| matches!(state, State::Pending(_)))
            .unwrap_or_else(PoisonError::into_inner);
        match std::mem::replace(&mut *state, State::Taken) {
            State::Ready(outcome) => outcome,
            _ => Err(BrokenPromise),
        }
    }

    /// Block for at most `timeout`. Returns whether the future is resolved.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let state = self.shared.lock();
        let (state, _) = self
            .shared
            .resolved
            .wait_timeout_while(state, timeout, |state| matches!(state, State::Pending(_)))
            .unwrap_or_else(PoisonError::into_inner);
        matches!(*state, State::Ready(_))
    }

    /// Register `continuation` to run with the value once the future resolves. Runs it right away if the
    /// future is already resolved.
    pub fn then(self, continuation: impl FnOnce(Result<T, BrokenPromise>) + Send + 'static) {
        let mut state = self.shared.lock();
        match std::mem::replace(&mut *state, State::Taken) {
            State::Ready(outcome) => {
                drop(state);
                continuation(outcome);
            }
            State::Pending(_) => *state = State::Pending(Some(Box::new(continuation))),
            State::Taken => {
                drop(state);
                continuation(Err(BrokenPromise));
            }
        }
    }
}

impl<T: Send + 'static, E: From<BrokenPromise> + Send + 'static> Future<Result<T, E>> {
    /// Block until the future resolves and flatten a broken promise into `E`.
    pub fn join(self) -> Result<T, E> {
        self.get().unwrap_or_else(|broken| Err(broken.into()))
    }
}

//! Exactly-once barrier.
//!
//! A [`Fuse`] runs its initializer at most once for its whole lifetime and
//! remembers the outcome, including a failure. Callers racing the first run
//! block until it completes and then all observe the same result.
use std::{
    panic::{self, AssertUnwindSafe},
    sync::{Condvar, Mutex, MutexGuard, PoisonError},
};

use crate::error::Error;

enum State<T> {
    Pending,
    Running,
    Done(Result<T, Error>),
}

/// A "do at most once, remember outcome" cell.
pub struct Fuse<T> {
    state: Mutex<State<T>>,
    state_cond: Condvar,
}

impl<T: Clone> Default for Fuse<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Fuse<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::Pending),
            state_cond: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` unless it already ran, and return the single recorded outcome.
    ///
    /// A panic inside `f` is recorded as [`Error::EnginePoisoned`].
    pub fn get_or_run<F>(&self, f: F) -> Result<T, Error>
    where
        F: FnOnce() -> Result<T, Error>,
    {
        let mut guard = self.lock();
        loop {
            match &*guard {
                State::Done(result) => return result.clone(),
                State::Running => {
                    guard = self
                        .state_cond
                        .wait(guard)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                State::Pending => break,
            }
        }
        *guard = State::Running;
        drop(guard);

        let result = match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(result) => result,
            Err(_) => Err(Error::EnginePoisoned),
        };

        let mut guard = self.lock();
        *guard = State::Done(result.clone());
        self.state_cond.notify_all();

        result
    }

    /// The recorded outcome, if the initializer already completed.
    pub fn get(&self) -> Option<Result<T, Error>> {
        match &*self.lock() {
            State::Done(result) => Some(result.clone()),
            _ => None,
        }
    }

    /// Whether the initializer completed successfully.
    pub fn is_done_ok(&self) -> bool {
        matches!(&*self.lock(), State::Done(Ok(_)))
    }
}

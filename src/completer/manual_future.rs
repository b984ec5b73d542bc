use std::{future::Future, pin::Pin, sync::{Arc, Mutex}, task::{Context, Poll, Waker}};

use log::warn;

use crate::{error::HubError, sync::MutexExt};

enum State<T> {
    Incomplete,
    Waiting(Waker),
    Complete(Option<Result<T, HubError>>),
}

/// A future resolved by hand through its [`ManualFutureCompleter`].
///
/// The completer resolves it at most once. A completer dropped without
/// resolving it fails the future with [`HubError::ConnectionClosed`].
pub struct ManualFuture<T> {
    state: Arc<Mutex<State<T>>>,
}

impl<T> ManualFuture<T> {
    pub fn new() -> (Self, ManualFutureCompleter<T>) {
        let state = Arc::new(Mutex::new(State::Incomplete));

        (Self { state: state.clone() }, ManualFutureCompleter { state })
    }

    pub fn is_completed(&self) -> bool {
        matches!(*self.state.locked(), State::Complete(_))
    }
}

pub struct ManualFutureCompleter<T> {
    state: Arc<Mutex<State<T>>>,
}

impl<T> ManualFutureCompleter<T> {
    /// Resolves the future. Returns `false` when it was already resolved.
    pub fn complete(&self, result: Result<T, HubError>) -> bool {
        let mut state = self.state.locked();

        match std::mem::replace(&mut *state, State::Incomplete) {
            State::Incomplete => {
                *state = State::Complete(Some(result));
                true
            },
            State::Waiting(waker) => {
                *state = State::Complete(Some(result));
                waker.wake();
                true
            },
            done @ State::Complete(_) => {
                *state = done;
                false
            },
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(*self.state.locked(), State::Complete(_))
    }
}

impl<T> Drop for ManualFutureCompleter<T> {
    fn drop(&mut self) {
        if !self.is_completed() {
            warn!("Cancelling future...");
            self.complete(Err(HubError::ConnectionClosed));
        }
    }
}

impl<T> Future for ManualFuture<T> {
    type Output = Result<T, HubError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Self::Output> {
        let mut state = self.state.locked();

        match &mut *state {
            s @ State::Incomplete => *s = State::Waiting(cx.waker().clone()),
            State::Waiting(w) if w.will_wake(cx.waker()) => {},
            s @ State::Waiting(_) => *s = State::Waiting(cx.waker().clone()),
            State::Complete(result) => {
                return match result.take() {
                    Some(result) => Poll::Ready(result),
                    None => Poll::Ready(Err(HubError::InvalidState("Future polled after completion".to_string()))),
                };
            },
        }

        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test(tokio::test)]
    async fn test_completes_once() {
        let (future, completer) = ManualFuture::<i32>::new();

        let waiter = tokio::spawn(future);
        tokio::task::yield_now().await;

        assert!(completer.complete(Ok(1)));
        assert!(!completer.complete(Ok(2)));
        assert_eq!(waiter.await.unwrap(), Ok(1));
    }

    #[test_log::test(tokio::test)]
    async fn test_dropped_completer_fails_future() {
        let (future, completer) = ManualFuture::<i32>::new();
        drop(completer);

        assert_eq!(future.await, Err(HubError::ConnectionClosed));
    }
}
